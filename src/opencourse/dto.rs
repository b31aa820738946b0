use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct BatchRequest {
    pub resources: Vec<CrnRef>,
}

#[derive(Debug, Serialize)]
pub struct CrnRef {
    #[serde(rename = "CRN")]
    pub crn: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchResponse {
    pub resources: Vec<ClassResult>,
}

/// Per-class result within a batch response, position-aligned with the
/// request list. The upstream API marks individual failures inline instead
/// of failing the whole batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ClassResult {
    Success { data: UpstreamClassData },
    Error { error: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamClassData {
    #[serde(rename = "CRN", default)]
    pub crn: i64,
    #[serde(default)]
    pub dept: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub title: String,
    pub seats: i64,
    pub wait_seats: i64,
    pub status: String,
}
