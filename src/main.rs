use anyhow::Result;
use clap::{Parser, Subcommand};
use helpdesk::config::HelpdeskConfig;
use helpdesk::logging;
use helpdesk_common::Role;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "helpdesk")]
#[command(version, about = "Internal helpdesk: tickets, clients and projects")]
pub struct Cli {
    /// Configuration file (defaults to ./helpdesk.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path. Overrides the config file and HELPDESK_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (permissive CORS for a local front-end)
        #[arg(long)]
        dev: bool,
    },
    /// Create the database and exit
    Init,
    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum UserCommands {
    /// Create an account
    Create {
        #[arg(long)]
        username: String,

        /// DEV, REP or CLI (or developer, reporter, client)
        #[arg(long)]
        role: Role,

        #[arg(long, default_value = "")]
        email: String,

        /// Grant management rights regardless of role
        #[arg(long)]
        staff: bool,

        /// Client this account represents (client-role users)
        #[arg(long)]
        client_id: Option<i64>,

        /// Password (prompted for when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// List all accounts
    List,
    /// Allow an account to log in again
    Activate { username: String },
    /// Block an account and end its sessions
    Deactivate { username: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = HelpdeskConfig::load(cli.config.as_deref())?;
    config.apply_env()?;
    if let Some(db_path) = &cli.db_path {
        config.database.path = db_path.clone();
    }
    if cli.log_json {
        config.logging.json = true;
    }
    if let Commands::Serve { port, host, dev } = &cli.command {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        config.server.dev |= *dev;
    }
    config.validate()?;

    let _log_guard = logging::init_tracing(
        cli.verbose,
        config.logging.json,
        config.logging.directory.as_deref(),
    )?;

    match cli.command {
        Commands::Serve { .. } => cmd::cmd_serve(config).await?,
        Commands::Init => cmd::cmd_init(&config.database.path)?,
        Commands::User { command } => match command {
            UserCommands::Create {
                username,
                role,
                email,
                staff,
                client_id,
                password,
            } => cmd::cmd_user_create(
                &config.database.path,
                cmd::UserArgs {
                    username,
                    role,
                    email,
                    staff,
                    client_id,
                    password,
                },
            )?,
            UserCommands::List => cmd::cmd_user_list(&config.database.path)?,
            UserCommands::Activate { username } => {
                cmd::cmd_user_set_active(&config.database.path, &username, true)?
            }
            UserCommands::Deactivate { username } => {
                cmd::cmd_user_set_active(&config.database.path, &username, false)?
            }
        },
    }

    Ok(())
}
