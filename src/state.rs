use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::mailer::Mailer;
use crate::opencourse::CourseDataClient;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub courses: Arc<dyn CourseDataClient>,
    pub mailer: Arc<dyn Mailer>,
    /// Held for the duration of a refresh cycle so the scheduler and the
    /// manual trigger never run overlapping cycles against the same snapshots.
    pub refresh_lock: Arc<Mutex<()>>,
}
