use serde::Serialize;

use super::class::{ClassIdentity, Status};

/// One detected transition for one class. Produced per refresh cycle,
/// consumed by fan-out and dispatch, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeRecord {
    Seats { previous: i64, updated: i64 },
    WaitlistSeats { previous: i64, updated: i64 },
    Status { previous: Status, updated: Status },
}

/// A changed class together with the display metadata needed for the email.
#[derive(Debug, Clone, Serialize)]
pub struct ClassChanges {
    pub class: ClassIdentity,
    pub department: String,
    pub course: String,
    pub title: String,
    pub changes: Vec<ChangeRecord>,
}

/// Outcome of one email dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailReport {
    Emailed { email: String },
    Error { email: String, error: String },
}

impl EmailReport {
    pub fn email(&self) -> &str {
        match self {
            EmailReport::Emailed { email } => email,
            EmailReport::Error { email, .. } => email,
        }
    }
}

/// Aggregated result of one refresh cycle.
#[derive(Debug, Serialize)]
pub struct RefreshOutcome {
    pub ran_at: String,
    pub emails: Vec<EmailReport>,
    pub campus_errors: Vec<String>,
}
