//! Layered configuration for the helpdesk server.
//!
//! Values are resolved in order, later layers winning:
//! built-in defaults → `helpdesk.toml` → environment (`HELPDESK_*`,
//! including a `.env` file) → command-line flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! dev = false
//!
//! [database]
//! path = "helpdesk.db"
//!
//! [auth]
//! session_ttl_hours = 336
//!
//! [tickets]
//! page_size = 20
//!
//! [logging]
//! json = false
//! directory = "logs"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "helpdesk.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Permissive CORS for a locally served front-end.
    #[serde(default)]
    pub dev: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("helpdesk.db")
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSection {
    /// Lifetime of a login session. Two weeks by default.
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: u32,
}

fn default_session_ttl_hours() -> u32 {
    14 * 24
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketsSection {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    20
}

impl Default for TicketsSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub json: bool,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HelpdeskConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub tickets: TicketsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl HelpdeskConfig {
    /// Load configuration from `path`, or from `helpdesk.toml` in the
    /// working directory when no path is given. A missing default file is
    /// not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid helpdesk configuration")
    }

    /// Apply the process environment on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        // A missing .env file is fine; a broken one is not.
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                return Err(err).context("Failed to load .env");
            }
        }
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HELPDESK_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("HELPDESK_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("HELPDESK_PORT is not a valid port: {}", port))?;
        }
        if let Some(path) = lookup("HELPDESK_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(ttl) = lookup("HELPDESK_SESSION_TTL_HOURS") {
            self.auth.session_ttl_hours = ttl
                .parse()
                .with_context(|| format!("HELPDESK_SESSION_TTL_HOURS is not a number: {}", ttl))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be greater than 0");
        }
        if self.tickets.page_size == 0 {
            bail!("tickets.page_size must be greater than 0");
        }
        if self.auth.session_ttl_hours == 0 {
            bail!("auth.session_ttl_hours must be greater than 0");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_sensible() {
        let config = HelpdeskConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.database.path, PathBuf::from("helpdesk.db"));
        assert_eq!(config.auth.session_ttl_hours, 336);
        assert_eq!(config.tickets.page_size, 20);
        assert!(!config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() -> Result<()> {
        let config = HelpdeskConfig::from_toml(
            r#"
            [server]
            port = 9090

            [tickets]
            page_size = 50
            "#,
        )?;
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.tickets.page_size, 50);
        assert_eq!(config.auth.session_ttl_hours, 336);
        Ok(())
    }

    #[test]
    fn load_reads_explicit_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[database]\npath = \"/var/lib/helpdesk.db\"\n")?;
        let config = HelpdeskConfig::load(Some(&path))?;
        assert_eq!(config.database.path, PathBuf::from("/var/lib/helpdesk.db"));
        Ok(())
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let result = HelpdeskConfig::load(Some(Path::new("/nonexistent/helpdesk.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_file_values() -> Result<()> {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HELPDESK_PORT", "7000"),
            ("HELPDESK_DB_PATH", "/tmp/desk.db"),
            ("HELPDESK_SESSION_TTL_HOURS", "1"),
        ]);
        let mut config = HelpdeskConfig::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()))?;
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/desk.db"));
        assert_eq!(config.auth.session_ttl_hours, 1);
        assert_eq!(config.server.host, "127.0.0.1");
        Ok(())
    }

    #[test]
    fn env_rejects_bad_port() {
        let mut config = HelpdeskConfig::default();
        let result = config.apply_env_from(|key| {
            (key == "HELPDESK_PORT").then(|| "eighty".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut config = HelpdeskConfig::default();
        config.tickets.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = HelpdeskConfig::default();
        config.auth.session_ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let config = HelpdeskConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8000");
    }
}
