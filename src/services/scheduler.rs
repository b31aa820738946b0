use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::error::AppError;
use crate::mailer::Mailer;
use crate::models::{EmailReport, RefreshOutcome};
use crate::opencourse::CourseDataClient;
use crate::services::refresh_service::RefreshService;

/// Periodic refresh driver. Each cycle runs to completion before the next
/// tick is considered; stopping via the handle only prevents future cycles
/// from starting, it never interrupts one in flight.
pub struct RefreshScheduler {
    db: SqlitePool,
    courses: Arc<dyn CourseDataClient>,
    mailer: Arc<dyn Mailer>,
    refresh_lock: Arc<Mutex<()>>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl RefreshScheduler {
    pub fn new(
        db: SqlitePool,
        courses: Arc<dyn CourseDataClient>,
        mailer: Arc<dyn Mailer>,
        refresh_lock: Arc<Mutex<()>>,
        interval_secs: u64,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                db,
                courses,
                mailer,
                refresh_lock,
                interval: Duration::from_secs(interval_secs),
                shutdown: rx,
            },
            SchedulerHandle { shutdown: tx },
        )
    }

    pub async fn start(mut self) {
        info!("Starting refresh scheduler (interval: {:?})", self.interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.changed() => {
                    info!("Refresh scheduler stopped");
                    return;
                }
            }

            match self.run_refresh().await {
                Ok(outcome) => report_outcome(&outcome),
                Err(e) => {
                    // Keep the loop alive; the next tick gets a fresh try.
                    tracing::warn!("Refresh cycle failed: {:?}", e);
                }
            }
        }
    }

    async fn run_refresh(&self) -> Result<RefreshOutcome, AppError> {
        let service = RefreshService::new(
            self.db.clone(),
            self.courses.clone(),
            self.mailer.clone(),
            self.refresh_lock.clone(),
        );
        service.run().await
    }
}

fn report_outcome(outcome: &RefreshOutcome) {
    for campus_error in &outcome.campus_errors {
        tracing::error!("Campus error: {}", campus_error);
    }

    let mut emailed = Vec::new();
    for report in &outcome.emails {
        match report {
            EmailReport::Emailed { email } => emailed.push(email.as_str()),
            EmailReport::Error { email, error } => {
                tracing::error!("Email error ({}): {}", email, error);
            }
        }
    }
    if !emailed.is_empty() {
        info!("Successfully sent emails to {}", emailed.join(", "));
    }
}
