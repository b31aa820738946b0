pub mod dto;

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::AppError;
use crate::models::ClassIdentity;
use dto::{BatchRequest, BatchResponse, ClassResult, CrnRef};

#[derive(Clone, Debug)]
pub struct Term {
    pub year: i32,
    pub quarter: String,
}

#[derive(Clone, Debug)]
pub struct OpenCourseConfig {
    pub base_url: String,
    pub term: Option<Term>,
}

impl OpenCourseConfig {
    pub fn new_from_env() -> Self {
        let base_url = env::var("OPENCOURSE_BASE_URL")
            .unwrap_or_else(|_| "https://opencourse.dev".to_string());
        let term = match (env::var("TERM_YEAR"), env::var("TERM_QUARTER")) {
            (Ok(year), Ok(quarter)) => year.parse().ok().map(|year| Term { year, quarter }),
            _ => None,
        };
        Self { base_url, term }
    }
}

#[async_trait]
pub trait CourseDataClient: Send + Sync {
    /// Fetch current data for one campus partition in a single batch request.
    /// The returned list is position-aligned with `classes`.
    async fn fetch_batch(
        &self,
        campus: &str,
        classes: &[ClassIdentity],
    ) -> Result<Vec<ClassResult>, AppError>;
}

pub struct OpenCourseHttpClient {
    client: Client,
    config: OpenCourseConfig,
}

impl OpenCourseHttpClient {
    pub fn new(config: OpenCourseConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Upstream(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CourseDataClient for OpenCourseHttpClient {
    async fn fetch_batch(
        &self,
        campus: &str,
        classes: &[ClassIdentity],
    ) -> Result<Vec<ClassResult>, AppError> {
        let url = format!(
            "{}/{}/classes",
            self.config.base_url,
            campus.to_lowercase()
        );

        let request_body = BatchRequest {
            resources: classes
                .iter()
                .map(|class| CrnRef {
                    crn: class.crn.clone(),
                })
                .collect(),
        };

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(term) = &self.config.term {
            request = request.query(&[
                ("year", term.year.to_string()),
                ("quarter", term.quarter.clone()),
            ]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("request for campus {} failed: {}", campus, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "OpenCourseAPI error for campus {}: {} {}",
                campus, status, body
            )));
        }

        let body: BatchResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!(
                "invalid class data for campus {}: {}",
                campus, e
            ))
        })?;

        Ok(body.resources)
    }
}

pub struct NoopCourseDataClient;

#[async_trait]
impl CourseDataClient for NoopCourseDataClient {
    async fn fetch_batch(
        &self,
        _campus: &str,
        classes: &[ClassIdentity],
    ) -> Result<Vec<ClassResult>, AppError> {
        Ok(classes
            .iter()
            .map(|_| ClassResult::Error {
                error: "no upstream configured".to_string(),
            })
            .collect())
    }
}
