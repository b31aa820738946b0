use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use classwatch::db::repository;
use classwatch::error::AppError;
use classwatch::mailer::Mailer;
use classwatch::models::{ClassIdentity, ClassSnapshot, EmailReport, Status};
use classwatch::opencourse::CourseDataClient;
use classwatch::opencourse::dto::{ClassResult, UpstreamClassData};
use classwatch::services::RefreshService;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create database");

    sqlx::query("CREATE TABLE users (email TEXT PRIMARY KEY)")
        .execute(&pool)
        .await
        .expect("Failed to create users table");

    sqlx::query(
        r#"
        CREATE TABLE classes (
            campus TEXT NOT NULL,
            department TEXT NOT NULL,
            course TEXT NOT NULL,
            crn TEXT NOT NULL,
            seats INTEGER,
            wait_seats INTEGER,
            status TEXT,
            PRIMARY KEY (campus, department, course, crn)
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create classes table");

    sqlx::query(
        r#"
        CREATE TABLE registrations (
            email TEXT NOT NULL,
            campus TEXT NOT NULL,
            department TEXT NOT NULL,
            course TEXT NOT NULL,
            crn TEXT NOT NULL,
            PRIMARY KEY (email, campus, department, course, crn)
        )
        "#,
    )
    .execute(&pool)
    .await
    .expect("Failed to create registrations table");

    pool
}

/// Course client scripted per campus: either a full batch response or a
/// partition-level failure.
struct ScriptedCourseClient {
    responses: HashMap<String, Result<Vec<ClassResult>, String>>,
}

impl ScriptedCourseClient {
    fn new() -> Self {
        Self {
            responses: HashMap::new(),
        }
    }

    fn campus_ok(mut self, campus: &str, results: Vec<ClassResult>) -> Self {
        self.responses.insert(campus.to_string(), Ok(results));
        self
    }

    fn campus_err(mut self, campus: &str, message: &str) -> Self {
        self.responses
            .insert(campus.to_string(), Err(message.to_string()));
        self
    }
}

#[async_trait]
impl CourseDataClient for ScriptedCourseClient {
    async fn fetch_batch(
        &self,
        campus: &str,
        _classes: &[ClassIdentity],
    ) -> Result<Vec<ClassResult>, AppError> {
        match self.responses.get(campus) {
            Some(Ok(results)) => Ok(results.clone()),
            Some(Err(message)) => Err(AppError::Upstream(message.clone())),
            None => Ok(Vec::new()),
        }
    }
}

/// Records every accepted submission; fails for listed recipients.
struct RecordingMailer {
    sent: StdMutex<Vec<(String, String)>>,
    fail_for: Vec<String>,
}

impl RecordingMailer {
    fn new() -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            fail_for: Vec::new(),
        }
    }

    fn failing_for(recipients: &[&str]) -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            fail_for: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("mailer mutex poisoned").clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn submit(
        &self,
        to: &str,
        _subject: &str,
        _html: &str,
        text: &str,
    ) -> Result<(), AppError> {
        if self.fail_for.iter().any(|recipient| recipient == to) {
            return Err(AppError::Mail(format!(
                "Could not send email to {to}: provider rejected"
            )));
        }
        self.sent
            .lock()
            .expect("mailer mutex poisoned")
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}

fn class(campus: &str, department: &str, course: &str, crn: &str) -> ClassIdentity {
    ClassIdentity {
        campus: campus.to_string(),
        department: department.to_string(),
        course: course.to_string(),
        crn: crn.to_string(),
    }
}

fn success(dept: &str, course: &str, seats: i64, wait_seats: i64, status: &str) -> ClassResult {
    ClassResult::Success {
        data: UpstreamClassData {
            crn: 0,
            dept: dept.to_string(),
            course: course.to_string(),
            title: format!("{dept} {course}"),
            seats,
            wait_seats,
            status: status.to_string(),
        },
    }
}

fn service(
    pool: &SqlitePool,
    courses: ScriptedCourseClient,
    mailer: Arc<RecordingMailer>,
) -> RefreshService {
    RefreshService::new(
        pool.clone(),
        Arc::new(courses),
        mailer,
        Arc::new(Mutex::new(())),
    )
}

#[tokio::test]
async fn first_sight_creates_snapshot_without_emailing() {
    let pool = setup_pool().await;
    repository::register(&pool, "a@example.com", &[class("da", "MATH", "1A", "40001")])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 0, 0, "full")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert!(outcome.emails.is_empty());
    assert!(outcome.campus_errors.is_empty());
    assert!(mailer.sent().is_empty());

    let snapshot = repository::snapshot(&pool, &class("da", "MATH", "1A", "40001"))
        .await
        .expect("query failed")
        .expect("snapshot should exist after first sight");
    assert_eq!(
        snapshot,
        ClassSnapshot {
            seats: 0,
            wait_seats: 0,
            status: Status::Full,
        }
    );
}

#[tokio::test]
async fn seat_opening_emails_every_subscriber() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    repository::register(&pool, "a@example.com", &[math.clone()])
        .await
        .expect("register failed");
    repository::register(&pool, "b@example.com", &[math.clone()])
        .await
        .expect("register failed");

    // Baseline cycle: full, no seats.
    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 0, 0, "full")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // Seats open up.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 3, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert_eq!(outcome.emails.len(), 2);
    assert!(outcome
        .emails
        .iter()
        .all(|report| matches!(report, EmailReport::Emailed { .. })));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    for (_, text) in &sent {
        assert!(text.contains("There are 3 seats available (was 0)"));
        assert!(text.contains("Class status is now open (was full)."));
        assert!(text.contains("MATH 1A"));
        assert!(text.contains("De Anza"));
    }

    // Snapshot caught up, so an identical third cycle stays quiet.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 3, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");
    assert!(outcome.emails.is_empty());
}

#[tokio::test]
async fn snapshot_is_overwritten_even_without_important_changes() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    repository::register(&pool, "a@example.com", &[math.clone()])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 5, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // Seats drop 5 -> 2: not an "opened" event, no email, but the baseline
    // must move anyway.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 2, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert!(outcome.emails.is_empty());
    let snapshot = repository::snapshot(&pool, &math)
        .await
        .expect("query failed")
        .expect("snapshot should exist");
    assert_eq!(snapshot.seats, 2);
}

#[tokio::test]
async fn dispatch_failure_is_isolated_per_user() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    repository::register(&pool, "a@example.com", &[math.clone()])
        .await
        .expect("register failed");
    repository::register(&pool, "b@example.com", &[math.clone()])
        .await
        .expect("register failed");

    let ok_mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 0, 0, "full")]),
        ok_mailer,
    )
    .run()
    .await
    .expect("cycle failed");

    let mailer = Arc::new(RecordingMailer::failing_for(&["a@example.com"]));
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok("da", vec![success("MATH", "1A", 1, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert_eq!(outcome.emails.len(), 2);
    let failed: Vec<_> = outcome
        .emails
        .iter()
        .filter(|report| matches!(report, EmailReport::Error { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].email(), "a@example.com");
    assert!(outcome
        .emails
        .iter()
        .any(|report| matches!(report, EmailReport::Emailed { email } if email == "b@example.com")));

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "b@example.com");
}

#[tokio::test]
async fn failed_partition_does_not_block_the_other_campus() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    let cs = class("fh", "CS", "2B", "20002");
    repository::register(&pool, "a@example.com", &[math.clone(), cs.clone()])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new()
            .campus_ok("da", vec![success("MATH", "1A", 0, 0, "full")])
            .campus_ok("fh", vec![success("CS", "2B", 0, 0, "full")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // da times out this cycle; fh opens a seat.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new()
            .campus_err("da", "request for campus da failed: timed out")
            .campus_ok("fh", vec![success("CS", "2B", 4, 0, "open")]),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert_eq!(outcome.campus_errors.len(), 1);
    assert!(outcome.campus_errors[0].contains("da"));

    // The fh class was still detected, persisted, and dispatched.
    assert_eq!(outcome.emails.len(), 1);
    assert!(matches!(
        &outcome.emails[0],
        EmailReport::Emailed { email } if email == "a@example.com"
    ));
    let fh_snapshot = repository::snapshot(&pool, &cs)
        .await
        .expect("query failed")
        .expect("snapshot should exist");
    assert_eq!(fh_snapshot.seats, 4);

    // The failed partition's snapshot was left untouched.
    let da_snapshot = repository::snapshot(&pool, &math)
        .await
        .expect("query failed")
        .expect("snapshot should exist");
    assert_eq!(da_snapshot.seats, 0);
}

#[tokio::test]
async fn per_class_error_skips_only_that_class() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    let phys = class("da", "PHYS", "4A", "40002");
    repository::register(&pool, "a@example.com", &[math.clone(), phys.clone()])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 0, 0, "full"),
                success("PHYS", "4A", 0, 0, "full"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // First class in the partition errors; the second still proceeds.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                ClassResult::Error {
                    error: "class not found".to_string(),
                },
                success("PHYS", "4A", 2, 0, "open"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert!(outcome.campus_errors.is_empty());
    assert_eq!(outcome.emails.len(), 1);

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("PHYS 4A"));
    assert!(!sent[0].1.contains("MATH 1A"));

    // The errored class kept its previous snapshot.
    let math_snapshot = repository::snapshot(&pool, &math)
        .await
        .expect("query failed")
        .expect("snapshot should exist");
    assert_eq!(math_snapshot.seats, 0);
}

#[tokio::test]
async fn fanout_only_reaches_subscribers_of_the_changed_class() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    let phys = class("da", "PHYS", "4A", "40002");
    repository::register(&pool, "a@example.com", &[math.clone()])
        .await
        .expect("register failed");
    repository::register(&pool, "b@example.com", &[phys.clone()])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 0, 0, "full"),
                success("PHYS", "4A", 0, 0, "full"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // Only MATH changes: b must not hear about it, and must not be emailed.
    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 1, 0, "open"),
                success("PHYS", "4A", 0, 0, "full"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert_eq!(outcome.emails.len(), 1);
    assert_eq!(outcome.emails[0].email(), "a@example.com");

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@example.com");
    assert!(sent[0].1.contains("MATH 1A"));
    assert!(!sent[0].1.contains("PHYS 4A"));
}

#[tokio::test]
async fn store_failure_for_one_class_does_not_abort_the_cycle() {
    let pool = setup_pool().await;
    let math = class("da", "MATH", "1A", "40001");
    let phys = class("da", "PHYS", "4A", "40002");
    repository::register(&pool, "a@example.com", &[math.clone(), phys.clone()])
        .await
        .expect("register failed");

    let mailer = Arc::new(RecordingMailer::new());
    service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 0, 0, "full"),
                success("PHYS", "4A", 0, 0, "full"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    // Snapshot writes for the first class start failing at the store level.
    sqlx::query(
        r#"
        CREATE TRIGGER math_updates_fail BEFORE UPDATE ON classes
        WHEN NEW.crn = '40001'
        BEGIN
            SELECT RAISE(ABORT, 'simulated store failure');
        END
        "#,
    )
    .execute(&pool)
    .await
    .expect("failed to create trigger");

    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 1, 0, "open"),
                success("PHYS", "4A", 2, 0, "open"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle should complete despite the store failure");

    // The other class was still detected, persisted, and dispatched.
    assert!(outcome.campus_errors.is_empty());
    assert_eq!(outcome.emails.len(), 1);
    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("PHYS 4A"));
    assert!(!sent[0].1.contains("MATH 1A"));

    // The failed class kept its old snapshot.
    let math_snapshot = repository::snapshot(&pool, &math)
        .await
        .expect("query failed")
        .expect("snapshot should exist");
    assert_eq!(math_snapshot.seats, 0);

    // Once the store recovers, the missed change is reported.
    sqlx::query("DROP TRIGGER math_updates_fail")
        .execute(&pool)
        .await
        .expect("failed to drop trigger");

    let outcome = service(
        &pool,
        ScriptedCourseClient::new().campus_ok(
            "da",
            vec![
                success("MATH", "1A", 1, 0, "open"),
                success("PHYS", "4A", 2, 0, "open"),
            ],
        ),
        mailer.clone(),
    )
    .run()
    .await
    .expect("cycle failed");

    assert_eq!(outcome.emails.len(), 1);
    let sent = mailer.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.contains("MATH 1A"));
}
