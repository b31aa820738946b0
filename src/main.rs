use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classwatch::api::router;
use classwatch::mailer::{Mailer, MailerConfig, MailgunMailer};
use classwatch::opencourse::{CourseDataClient, OpenCourseConfig, OpenCourseHttpClient};
use classwatch::services::RefreshScheduler;
use classwatch::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "classwatch=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://classwatch.db".to_string());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let courses: Arc<dyn CourseDataClient> =
        Arc::new(OpenCourseHttpClient::new(OpenCourseConfig::new_from_env())?);
    let mailer: Arc<dyn Mailer> = Arc::new(MailgunMailer::new(MailerConfig::new_from_env())?);
    let refresh_lock = Arc::new(Mutex::new(()));

    let interval_mins: u64 = std::env::var("REFRESH_INTERVAL_MINS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15);

    let (scheduler, _scheduler_handle) = RefreshScheduler::new(
        pool.clone(),
        courses.clone(),
        mailer.clone(),
        refresh_lock.clone(),
        interval_mins * 60,
    );
    tokio::spawn(scheduler.start());

    let state = AppState {
        db: pool.clone(),
        courses,
        mailer,
        refresh_lock,
    };
    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
