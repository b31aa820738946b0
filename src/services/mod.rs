pub mod changes;
pub mod refresh_service;
pub mod render;
pub mod scheduler;

pub use refresh_service::RefreshService;
pub use scheduler::{RefreshScheduler, SchedulerHandle};
