use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Composite key identifying one course section within a term.
/// Never mutated after creation; used as the lookup key everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct ClassIdentity {
    pub campus: String,
    pub department: String,
    pub course: String,
    pub crn: String,
}

/// Seating status as reported by the upstream API. Upstream sends free-form
/// strings ("Open", "FULL", ...); anything unrecognized parses as Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Full,
    Waitlist,
    Unknown,
}

impl Status {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "open" => Status::Open,
            "full" => Status::Full,
            "waitlist" => Status::Waitlist,
            _ => Status::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Full => "full",
            Status::Waitlist => "waitlist",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-observed state for a class, used as the diff baseline.
/// Overwritten in place after every refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSnapshot {
    pub seats: i64,
    pub wait_seats: i64,
    pub status: Status,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub classes: Vec<ClassIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationOutcome {
    Registered,
    Duplicated,
    Unregistered,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResult {
    #[serde(rename = "type")]
    pub outcome: RegistrationOutcome,
    pub class: ClassIdentity,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationResponse {
    pub result: Vec<RegistrationResult>,
}
