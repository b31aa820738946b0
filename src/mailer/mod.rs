use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::AppError;

pub const SUBJECT: &str = "Classes.fyi: Updates about your classes";
const FROM: &str = "Classes.fyi <help@classes.fyi>";

#[derive(Clone, Debug)]
pub struct MailerConfig {
    /// Missing key is surfaced as a submission error per recipient, not at
    /// startup, so the rest of the cycle keeps working without credentials.
    pub api_key: Option<String>,
    pub domain: String,
}

impl MailerConfig {
    pub fn new_from_env() -> Self {
        Self {
            api_key: env::var("MAILGUN_API_KEY").ok(),
            domain: env::var("MAILGUN_DOMAIN").unwrap_or_else(|_| "classes.fyi".to_string()),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Submit one outbound email. Called at most once per user per cycle.
    async fn submit(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), AppError>;
}

pub struct MailgunMailer {
    client: Client,
    config: MailerConfig,
}

impl MailgunMailer {
    pub fn new(config: MailerConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Mail(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Mailer for MailgunMailer {
    async fn submit(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), AppError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Mail("Mailgun API key not configured".to_string()))?;

        let url = format!("https://api.mailgun.net/v3/{}/messages", self.config.domain);
        let params = [
            ("from", FROM),
            ("to", to),
            ("subject", subject),
            ("text", text),
            ("html", html),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(api_key))
            .form(&params)
            .send()
            .await
            .map_err(|e| AppError::Mail(format!("Could not send email to {}: {}", to, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Mail(format!(
                "Mailgun error for {}: {} {}",
                to, status, body
            )));
        }

        Ok(())
    }
}

pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn submit(
        &self,
        _to: &str,
        _subject: &str,
        _html: &str,
        _text: &str,
    ) -> Result<(), AppError> {
        Ok(())
    }
}
