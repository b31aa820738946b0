use axum::Json;
use axum::extract::Path;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Router, extract::State, http::StatusCode, routing::get};

use crate::db::repository;
use crate::error::AppError;
use crate::models::{
    ClassIdentity, EmailRequest, RefreshOutcome, RegistrationRequest, RegistrationResponse,
};
use crate::services::RefreshService;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/unregister", post(unregister))
        .route("/unregister_all", post(unregister_all))
        .route("/users/{email}/classes", get(user_classes))
        .route("/refresh", post(refresh_now))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    sqlx::query("select 1").execute(&state.db).await?;
    Ok(StatusCode::OK)
}

fn validate_email(email: &str) -> Result<(), AppError> {
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::BadRequest(
            "Email must be a valid address.".to_string(),
        ));
    }
    Ok(())
}

fn validate_registration(req: &RegistrationRequest) -> Result<(), AppError> {
    validate_email(&req.email)?;
    if req.classes.is_empty() {
        return Err(AppError::BadRequest(
            "Classes field is required and must be a non-empty array of classes.".to_string(),
        ));
    }
    for class in &req.classes {
        if class.campus.is_empty()
            || class.department.is_empty()
            || class.course.is_empty()
            || class.crn.is_empty()
        {
            return Err(AppError::BadRequest(
                "Class must be an object in the format { campus, department, course, crn }."
                    .to_string(),
            ));
        }
    }
    Ok(())
}

/// Malformed or mistyped request bodies become the same JSON error shape as
/// every other 400 instead of axum's plain-text rejection.
fn require_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    match payload {
        Ok(Json(req)) => Ok(req),
        Err(rejection) => Err(AppError::BadRequest(rejection.body_text())),
    }
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<Json<RegistrationResponse>, AppError> {
    let req = require_body(payload)?;
    validate_registration(&req)?;
    let result = repository::register(&state.db, &req.email, &req.classes).await?;
    Ok(Json(RegistrationResponse { result }))
}

async fn unregister(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<Json<RegistrationResponse>, AppError> {
    let req = require_body(payload)?;
    validate_registration(&req)?;
    let result = repository::unregister(&state.db, &req.email, &req.classes).await?;
    Ok(Json(RegistrationResponse { result }))
}

async fn unregister_all(
    State(state): State<AppState>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<RegistrationResponse>, AppError> {
    let req = require_body(payload)?;
    validate_email(&req.email)?;
    let result = repository::unregister_all(&state.db, &req.email).await?;
    Ok(Json(RegistrationResponse { result }))
}

async fn user_classes(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<Vec<ClassIdentity>>, AppError> {
    let classes = repository::user_classes(&state.db, &email)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(Json(classes))
}

async fn refresh_now(State(state): State<AppState>) -> Result<Json<RefreshOutcome>, AppError> {
    let service = RefreshService::new(
        state.db.clone(),
        state.courses.clone(),
        state.mailer.clone(),
        state.refresh_lock.clone(),
    );
    let outcome = service.run().await?;
    Ok(Json(outcome))
}
