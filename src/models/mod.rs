pub mod changes;
pub mod class;

pub use changes::{ChangeRecord, ClassChanges, EmailReport, RefreshOutcome};
pub use class::{
    ClassIdentity, ClassSnapshot, EmailRequest, RegistrationOutcome, RegistrationRequest,
    RegistrationResponse, RegistrationResult, Status,
};
