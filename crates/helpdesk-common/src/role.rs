use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a user plays in the helpdesk.
///
/// Stored and serialized as a three-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "DEV")]
    Developer,
    #[serde(rename = "REP")]
    Reporter,
    #[serde(rename = "CLI")]
    #[default]
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Developer => "DEV",
            Self::Reporter => "REP",
            Self::Client => "CLI",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Developer => "Developer",
            Self::Reporter => "Reporter",
            Self::Client => "Client",
        }
    }

    pub fn is_developer(&self) -> bool {
        *self == Self::Developer
    }

    pub fn is_reporter(&self) -> bool {
        *self == Self::Reporter
    }

    pub fn is_client(&self) -> bool {
        *self == Self::Client
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the stored code or the lowercase role name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEV" | "developer" => Ok(Self::Developer),
            "REP" | "reporter" => Ok(Self::Reporter),
            "CLI" | "client" => Ok(Self::Client),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// The authenticated user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub is_staff: bool,
    /// For client-role users: the client record they belong to.
    pub client_id: Option<i64>,
}

impl Actor {
    /// Developers and staff run the day-to-day ticket workflow.
    pub fn can_manage(&self) -> bool {
        self.is_staff || self.role.is_developer()
    }
}
