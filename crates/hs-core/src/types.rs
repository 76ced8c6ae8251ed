//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Availability reported to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusSignal {
    Available,
    Offline,
    #[serde(rename = "INUSE")]
    InUse,
    Disabled,
    Unknown,
}

impl StatusSignal {
    /// Wire name used in the status PATCH body
    pub fn api_name(&self) -> &'static str {
        match self {
            StatusSignal::Available => "AVAILABLE",
            StatusSignal::Offline => "OFFLINE",
            StatusSignal::InUse => "INUSE",
            StatusSignal::Disabled => "DISABLED",
            StatusSignal::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StatusSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Lifecycle state of a session
///
/// `Created -> Starting -> Active -> Ended`, or `Starting -> FailedToStart`.
/// Both `Ended` and `FailedToStart` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Starting,
    Active,
    Ended,
    FailedToStart,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::FailedToStart)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Created, Starting) | (Starting, Active) | (Starting, FailedToStart) | (Active, Ended)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Created => write!(f, "created"),
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Ended => write!(f, "ended"),
            SessionStatus::FailedToStart => write!(f, "failed-to-start"),
        }
    }
}

/// A launchable program exposed by this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
}
