//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Availability of a target as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Up,
    Down,
    /// Placeholder held between registration and the first completed check.
    Checking,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Up => "UP",
            Status::Down => "DOWN",
            Status::Checking => "CHECKING",
        }
    }

    /// Whether this is a real observed status rather than the placeholder.
    pub fn is_observed(&self) -> bool {
        !matches!(self, Status::Checking)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Status::Up),
            "DOWN" => Ok(Status::Down),
            "CHECKING" => Ok(Status::Checking),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// A monitored endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub url: String,
}

/// Latest-known projection for one target, overwritten on every check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentState {
    pub name: String,
    pub url: String,
    pub status: Status,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_response_time: Option<f64>,
    pub last_status_code: Option<u16>,
    pub ssl_expiry_days: Option<i64>,
}

impl CurrentState {
    /// State of a freshly registered target.
    pub fn checking(target: &Target) -> Self {
        Self {
            name: target.name.clone(),
            url: target.url.clone(),
            status: Status::Checking,
            last_checked: None,
            last_response_time: None,
            last_status_code: None,
            ssl_expiry_days: None,
        }
    }

    pub fn target(&self) -> Target {
        Target {
            name: self.name.clone(),
            url: self.url.clone(),
        }
    }
}

/// One immutable probe result in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub target_name: String,
    pub url: String,
    pub status: Status,
    /// Seconds, present even for failed probes.
    pub response_time: Option<f64>,
    pub status_code: Option<u16>,
    pub checked_at: DateTime<Utc>,
}

/// A recorded status change between two consecutive observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub target_name: String,
    pub old_status: Status,
    pub new_status: Status,
    pub changed_at: DateTime<Utc>,
}

/// Result of committing one check for one target.
#[derive(Debug, Clone)]
pub struct CheckCommit {
    pub state: CurrentState,
    pub observation: Observation,
    pub transition: Option<TransitionEvent>,
}
