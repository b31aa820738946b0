use sqlx::SqlitePool;

use crate::models::{
    ClassIdentity, ClassSnapshot, RegistrationOutcome, RegistrationResult, Status,
};

/// Subscribe a user to the given classes. Ensures the user row and the
/// tracked-class rows exist, all within one transaction so the subscription
/// relation and the tracked-class index can never drift apart.
pub async fn register(
    db: &SqlitePool,
    email: &str,
    classes: &[ClassIdentity],
) -> Result<Vec<RegistrationResult>, sqlx::Error> {
    let mut tx = db.begin().await?;

    sqlx::query("INSERT OR IGNORE INTO users (email) VALUES (?)")
        .bind(email)
        .execute(&mut *tx)
        .await?;

    let mut results = Vec::with_capacity(classes.len());
    for class in classes {
        sqlx::query(
            "INSERT OR IGNORE INTO classes (campus, department, course, crn) VALUES (?, ?, ?, ?)",
        )
        .bind(&class.campus)
        .bind(&class.department)
        .bind(&class.course)
        .bind(&class.crn)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO registrations (email, campus, department, course, crn) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(email)
        .bind(&class.campus)
        .bind(&class.department)
        .bind(&class.course)
        .bind(&class.crn)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        results.push(RegistrationResult {
            outcome: if inserted > 0 {
                RegistrationOutcome::Registered
            } else {
                RegistrationOutcome::Duplicated
            },
            class: class.clone(),
        });
    }

    tx.commit().await?;
    Ok(results)
}

/// Unsubscribe a user from the given classes. Classes left with zero
/// subscribers and users left with zero subscriptions are removed in the
/// same transaction.
pub async fn unregister(
    db: &SqlitePool,
    email: &str,
    classes: &[ClassIdentity],
) -> Result<Vec<RegistrationResult>, sqlx::Error> {
    let mut tx = db.begin().await?;

    let mut results = Vec::with_capacity(classes.len());
    for class in classes {
        sqlx::query(
            "DELETE FROM registrations WHERE email = ? AND campus = ? AND department = ? AND course = ? AND crn = ?",
        )
        .bind(email)
        .bind(&class.campus)
        .bind(&class.department)
        .bind(&class.course)
        .bind(&class.crn)
        .execute(&mut *tx)
        .await?;

        let still_used: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations WHERE campus = ? AND department = ? AND course = ? AND crn = ?",
        )
        .bind(&class.campus)
        .bind(&class.department)
        .bind(&class.course)
        .bind(&class.crn)
        .fetch_one(&mut *tx)
        .await?;

        if still_used == 0 {
            sqlx::query(
                "DELETE FROM classes WHERE campus = ? AND department = ? AND course = ? AND crn = ?",
            )
            .bind(&class.campus)
            .bind(&class.department)
            .bind(&class.course)
            .bind(&class.crn)
            .execute(&mut *tx)
            .await?;
        }

        results.push(RegistrationResult {
            outcome: RegistrationOutcome::Unregistered,
            class: class.clone(),
        });
    }

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM registrations WHERE email = ?")
        .bind(email)
        .fetch_one(&mut *tx)
        .await?;
    if remaining == 0 {
        sqlx::query("DELETE FROM users WHERE email = ?")
            .bind(email)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(results)
}

/// Unsubscribe a user from every class they are registered to.
pub async fn unregister_all(
    db: &SqlitePool,
    email: &str,
) -> Result<Vec<RegistrationResult>, sqlx::Error> {
    let classes = user_classes(db, email).await?.unwrap_or_default();
    unregister(db, email, &classes).await
}

/// All classes a user is subscribed to, or None for an unknown user.
pub async fn user_classes(
    db: &SqlitePool,
    email: &str,
) -> Result<Option<Vec<ClassIdentity>>, sqlx::Error> {
    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
        .bind(email)
        .fetch_one(db)
        .await?;
    if known == 0 {
        return Ok(None);
    }

    let classes = sqlx::query_as::<_, ClassIdentity>(
        "SELECT campus, department, course, crn FROM registrations WHERE email = ? ORDER BY campus, department, course, crn",
    )
    .bind(email)
    .fetch_all(db)
    .await?;
    Ok(Some(classes))
}

/// The deduplicated set of all tracked classes, straight from the index.
pub async fn tracked_classes(db: &SqlitePool) -> Result<Vec<ClassIdentity>, sqlx::Error> {
    sqlx::query_as::<_, ClassIdentity>(
        "SELECT campus, department, course, crn FROM classes ORDER BY campus, department, course, crn",
    )
    .fetch_all(db)
    .await
}

/// Everyone subscribed to the given class.
pub async fn subscribers(
    db: &SqlitePool,
    class: &ClassIdentity,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT email FROM registrations WHERE campus = ? AND department = ? AND course = ? AND crn = ? ORDER BY email",
    )
    .bind(&class.campus)
    .bind(&class.department)
    .bind(&class.course)
    .bind(&class.crn)
    .fetch_all(db)
    .await
}

/// Last-observed snapshot for a class. None until the first successful fetch.
pub async fn snapshot(
    db: &SqlitePool,
    class: &ClassIdentity,
) -> Result<Option<ClassSnapshot>, sqlx::Error> {
    let row = sqlx::query_as::<_, (Option<i64>, Option<i64>, Option<String>)>(
        "SELECT seats, wait_seats, status FROM classes WHERE campus = ? AND department = ? AND course = ? AND crn = ?",
    )
    .bind(&class.campus)
    .bind(&class.department)
    .bind(&class.course)
    .bind(&class.crn)
    .fetch_optional(db)
    .await?;

    Ok(match row {
        Some((Some(seats), Some(wait_seats), Some(status))) => Some(ClassSnapshot {
            seats,
            wait_seats,
            status: Status::parse(&status),
        }),
        _ => None,
    })
}

/// Overwrite a class's snapshot with the latest fetched values. Creates the
/// tracked-class row if it does not exist yet.
pub async fn save_snapshot(
    db: &SqlitePool,
    class: &ClassIdentity,
    snapshot: &ClassSnapshot,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO classes (campus, department, course, crn, seats, wait_seats, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (campus, department, course, crn)
        DO UPDATE SET seats = excluded.seats,
                      wait_seats = excluded.wait_seats,
                      status = excluded.status
        "#,
    )
    .bind(&class.campus)
    .bind(&class.department)
    .bind(&class.course)
    .bind(&class.crn)
    .bind(snapshot.seats)
    .bind(snapshot.wait_seats)
    .bind(snapshot.status.as_str())
    .execute(db)
    .await?;

    Ok(())
}
