use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a ticket.
///
/// ```text
///   OPEN ──start──> WIP ──resolve──> RES
///    │               │                │
///    └─────close─────┴─────close──────┴──> CLO
///
///   RES / CLO ──reopen──> OPEN
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "OPEN")]
    #[default]
    Open,
    #[serde(rename = "WIP")]
    InProgress,
    #[serde(rename = "RES")]
    Resolved,
    #[serde(rename = "CLO")]
    Closed,
}

impl TicketStatus {
    /// Display order used by listings and the dashboard.
    pub const ALL: [TicketStatus; 4] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "WIP",
            Self::Resolved => "RES",
            Self::Closed => "CLO",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In progress",
            Self::Resolved => "Resolved",
            Self::Closed => "Closed",
        }
    }

    /// Resolved and closed tickets count as processed.
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }

    /// Target state of `transition` from this state, or `None` when the
    /// transition is not allowed from here.
    pub fn apply(self, transition: Transition) -> Option<TicketStatus> {
        use TicketStatus::*;
        match (transition, self) {
            (Transition::Start, Open) => Some(InProgress),
            (Transition::Resolve, InProgress) => Some(Resolved),
            (Transition::Close, Open | InProgress | Resolved) => Some(Closed),
            (Transition::Reopen, Resolved | Closed) => Some(Open),
            _ => None,
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "WIP" => Ok(Self::InProgress),
            "RES" => Ok(Self::Resolved),
            "CLO" => Ok(Self::Closed),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MED")]
    #[default]
    Medium,
    #[serde(rename = "HIG")]
    High,
    #[serde(rename = "URG")]
    Urgent,
}

impl Priority {
    /// Most pressing first.
    pub const BY_URGENCY: [Priority; 4] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MED",
            Self::High => "HIG",
            Self::Urgent => "URG",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Urgent => "Urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MED" => Ok(Self::Medium),
            "HIG" => Ok(Self::High),
            "URG" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A workflow action that moves a ticket between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Resolve,
    Close,
    Reopen,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Resolve => "resolve",
            Self::Close => "close",
            Self::Reopen => "reopen",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_default_is_open() {
        assert_eq!(TicketStatus::default(), TicketStatus::Open);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn start_only_from_open() {
        assert_eq!(
            TicketStatus::Open.apply(Transition::Start),
            Some(TicketStatus::InProgress)
        );
        assert_eq!(TicketStatus::InProgress.apply(Transition::Start), None);
        assert_eq!(TicketStatus::Resolved.apply(Transition::Start), None);
        assert_eq!(TicketStatus::Closed.apply(Transition::Start), None);
    }

    #[test]
    fn resolve_only_from_in_progress() {
        assert_eq!(TicketStatus::Open.apply(Transition::Resolve), None);
        assert_eq!(
            TicketStatus::InProgress.apply(Transition::Resolve),
            Some(TicketStatus::Resolved)
        );
        assert_eq!(TicketStatus::Closed.apply(Transition::Resolve), None);
    }

    #[test]
    fn close_from_any_live_state() {
        for from in [
            TicketStatus::Open,
            TicketStatus::InProgress,
            TicketStatus::Resolved,
        ] {
            assert_eq!(from.apply(Transition::Close), Some(TicketStatus::Closed));
        }
        assert_eq!(TicketStatus::Closed.apply(Transition::Close), None);
    }

    #[test]
    fn reopen_from_resolved_or_closed() {
        assert_eq!(
            TicketStatus::Resolved.apply(Transition::Reopen),
            Some(TicketStatus::Open)
        );
        assert_eq!(
            TicketStatus::Closed.apply(Transition::Reopen),
            Some(TicketStatus::Open)
        );
        assert_eq!(TicketStatus::Open.apply(Transition::Reopen), None);
        assert_eq!(TicketStatus::InProgress.apply(Transition::Reopen), None);
    }

    #[test]
    fn processed_means_resolved_or_closed() {
        let processed: Vec<_> = TicketStatus::ALL
            .iter()
            .filter(|s| s.is_processed())
            .collect();
        assert_eq!(processed, [&TicketStatus::Resolved, &TicketStatus::Closed]);
    }

    #[test]
    fn urgency_order_puts_urgent_first() {
        let codes: Vec<&str> = Priority::BY_URGENCY.iter().map(|p| p.as_str()).collect();
        assert_eq!(codes, ["URG", "HIG", "MED", "LOW"]);
    }

    #[test]
    fn invalid_codes_are_rejected() {
        let err = Priority::from_str("critical").unwrap_err();
        assert!(err.contains("Invalid priority"));
        assert!(TicketStatus::from_str("DONE").is_err());
    }
}
