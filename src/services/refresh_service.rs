use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db::repository;
use crate::error::AppError;
use crate::mailer::{Mailer, SUBJECT};
use crate::models::{ClassChanges, ClassIdentity, EmailReport, RefreshOutcome};
use crate::opencourse::CourseDataClient;
use crate::opencourse::dto::{ClassResult, UpstreamClassData};
use crate::services::changes;
use crate::services::render;

/// Drives one refresh cycle: gather tracked classes, fetch batch data per
/// campus, detect changes and persist snapshots, resolve recipients,
/// dispatch emails, and aggregate the report.
pub struct RefreshService {
    db: SqlitePool,
    courses: Arc<dyn CourseDataClient>,
    mailer: Arc<dyn Mailer>,
    refresh_lock: Arc<Mutex<()>>,
}

impl RefreshService {
    pub fn new(
        db: SqlitePool,
        courses: Arc<dyn CourseDataClient>,
        mailer: Arc<dyn Mailer>,
        refresh_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            db,
            courses,
            mailer,
            refresh_lock,
        }
    }

    pub async fn run(&self) -> Result<RefreshOutcome, AppError> {
        // One cycle at a time; a concurrent trigger waits its turn.
        let _guard = self.refresh_lock.lock().await;
        let ran_at = Utc::now().to_rfc3339();

        let tracked = repository::tracked_classes(&self.db).await?;
        info!("Refreshing {} tracked classes", tracked.len());

        let mut campus_errors = Vec::new();
        let mut classes_with_changes = Vec::new();

        if !tracked.is_empty() {
            let fetched = self.fetch_partitions(partition_by_campus(tracked)).await;

            for (campus, classes, result) in fetched {
                let results = match result {
                    Ok(results) => results,
                    Err(message) => {
                        error!("skipping campus {}: {}", campus, message);
                        campus_errors.push(message);
                        continue;
                    }
                };

                if results.len() != classes.len() {
                    warn!(
                        "campus {}: {} results for {} requested classes",
                        campus,
                        results.len(),
                        classes.len()
                    );
                }

                // Response order matches request order, so pair by position.
                for (class, result) in classes.iter().zip(results) {
                    match result {
                        ClassResult::Error { error } => {
                            warn!(
                                "skipping class {} {} (CRN {}): {}",
                                class.campus, class.course, class.crn, error
                            );
                        }
                        ClassResult::Success { data } => {
                            match self.process_class(class, &data).await {
                                Ok(Some(changed)) => classes_with_changes.push(changed),
                                Ok(None) => {}
                                Err(e) => {
                                    // A store failure leaves this class's
                                    // snapshot untouched, so its changes are
                                    // picked up again next cycle.
                                    warn!(
                                        "skipping class {} {} (CRN {}): {}",
                                        class.campus, class.course, class.crn, e
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }

        let per_user = self.resolve(&classes_with_changes).await;
        let emails = self.dispatch_all(per_user).await;

        info!(
            "Refresh cycle done: {} changed classes, {} emails attempted, {} campus errors",
            classes_with_changes.len(),
            emails.len(),
            campus_errors.len()
        );

        Ok(RefreshOutcome {
            ran_at,
            emails,
            campus_errors,
        })
    }

    /// Issue one concurrent batch request per campus partition. Partition
    /// failures come back as error strings instead of aborting the cycle.
    async fn fetch_partitions(
        &self,
        partitions: Vec<(String, Vec<ClassIdentity>)>,
    ) -> Vec<(String, Vec<ClassIdentity>, Result<Vec<ClassResult>, String>)> {
        let mut handles = Vec::with_capacity(partitions.len());
        for (campus, classes) in partitions {
            let client = self.courses.clone();
            let task_campus = campus.clone();
            let task_classes = classes.clone();
            let handle = tokio::spawn(async move {
                client.fetch_batch(&task_campus, &task_classes).await
            });
            handles.push((campus, classes, handle));
        }

        let mut fetched = Vec::with_capacity(handles.len());
        for (campus, classes, handle) in handles {
            let result = match handle.await {
                Ok(Ok(results)) => Ok(results),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("fetch task for campus {campus} failed: {e}")),
            };
            fetched.push((campus, classes, result));
        }
        fetched
    }

    /// Detect and persist for one fetched class. The snapshot write comes
    /// last, so a store failure here never loses a detected change for good.
    async fn process_class(
        &self,
        class: &ClassIdentity,
        data: &UpstreamClassData,
    ) -> Result<Option<ClassChanges>, AppError> {
        let previous = repository::snapshot(&self.db, class).await?;
        let records = changes::detect(previous.as_ref(), data);

        // Written whether or not anything changed, so stale diffs never
        // compound across cycles.
        repository::save_snapshot(&self.db, class, &changes::snapshot_of(data)).await?;

        if records.is_empty() {
            return Ok(None);
        }
        Ok(Some(ClassChanges {
            class: class.clone(),
            department: data.dept.clone(),
            course: data.course.clone(),
            title: data.title.clone(),
            changes: records,
        }))
    }

    /// Fan changed classes out to their subscribers. Users without changed
    /// subscribed classes never appear in the map. A failed subscriber lookup
    /// drops that class from this cycle's fan-out instead of aborting.
    async fn resolve(&self, classes_with_changes: &[ClassChanges]) -> HashMap<String, Vec<ClassChanges>> {
        let mut per_user: HashMap<String, Vec<ClassChanges>> = HashMap::new();
        for class_changes in classes_with_changes {
            match repository::subscribers(&self.db, &class_changes.class).await {
                Ok(registered) => {
                    for email in registered {
                        per_user
                            .entry(email)
                            .or_default()
                            .push(class_changes.clone());
                    }
                }
                Err(e) => {
                    warn!(
                        "could not resolve subscribers for {} {} (CRN {}): {}",
                        class_changes.class.campus,
                        class_changes.class.course,
                        class_changes.class.crn,
                        e
                    );
                }
            }
        }
        per_user
    }

    /// Send one consolidated email per user, concurrently. Every user gets
    /// exactly one report; a failed or panicked send for one user never
    /// affects the others.
    async fn dispatch_all(&self, per_user: HashMap<String, Vec<ClassChanges>>) -> Vec<EmailReport> {
        let mut handles = Vec::with_capacity(per_user.len());
        for (email, user_classes) in per_user {
            let mailer = self.mailer.clone();
            let task_email = email.clone();
            let handle = tokio::spawn(async move {
                let (html, text) = render::render_bodies(&task_email, &user_classes);
                match mailer.submit(&task_email, SUBJECT, &html, &text).await {
                    Ok(()) => EmailReport::Emailed { email: task_email },
                    Err(e) => EmailReport::Error {
                        email: task_email,
                        error: e.to_string(),
                    },
                }
            });
            handles.push((email, handle));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (email, handle) in handles {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => reports.push(EmailReport::Error {
                    email,
                    error: format!("dispatch task failed: {e}"),
                }),
            }
        }
        reports
    }
}

/// Partition the gathered classes by campus, keeping first-seen order.
fn partition_by_campus(classes: Vec<ClassIdentity>) -> Vec<(String, Vec<ClassIdentity>)> {
    let mut partitions: Vec<(String, Vec<ClassIdentity>)> = Vec::new();
    for class in classes {
        match partitions
            .iter_mut()
            .find(|(campus, _)| campus == &class.campus)
        {
            Some((_, items)) => items.push(class),
            None => partitions.push((class.campus.clone(), vec![class])),
        }
    }
    partitions
}
