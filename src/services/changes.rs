use crate::models::{ChangeRecord, ClassSnapshot, Status};
use crate::opencourse::dto::UpstreamClassData;

/// Compare the last-observed snapshot against freshly fetched data and
/// return the changes worth notifying about. The three checks are
/// independent, so a single call yields between zero and three records.
///
/// A class seen for the first time has no baseline and yields no changes;
/// its snapshot still gets created by the caller.
pub fn detect(previous: Option<&ClassSnapshot>, updated: &UpstreamClassData) -> Vec<ChangeRecord> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut changes = Vec::new();

    // Seats is no longer 0. The positivity guard keeps erroneous negative
    // counts from being reported as an opening.
    if previous.seats == 0 && updated.seats > 0 {
        changes.push(ChangeRecord::Seats {
            previous: previous.seats,
            updated: updated.seats,
        });
    }

    // Waitlist seats is no longer 0.
    if previous.wait_seats == 0 && updated.wait_seats > 0 {
        changes.push(ChangeRecord::WaitlistSeats {
            previous: previous.wait_seats,
            updated: updated.wait_seats,
        });
    }

    // Status has changed and is not full anymore. Filling up is not worth
    // an email, so a transition into full is suppressed.
    let updated_status = Status::parse(&updated.status);
    if previous.status != updated_status && updated_status != Status::Full {
        changes.push(ChangeRecord::Status {
            previous: previous.status,
            updated: updated_status,
        });
    }

    changes
}

/// The snapshot to persist after a fetch, regardless of detection outcome.
pub fn snapshot_of(updated: &UpstreamClassData) -> ClassSnapshot {
    ClassSnapshot {
        seats: updated.seats,
        wait_seats: updated.wait_seats,
        status: Status::parse(&updated.status),
    }
}
