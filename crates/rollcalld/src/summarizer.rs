//! Narrative daily reports via a text-generation API.

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use rollcall_core::report::{build_prompt, summarize};
use rollcall_core::{AttendanceRecord, Identity};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const REPORT_FAILED: &str =
    "Error generating report. Please check your API key or network connection.";
pub const REPORT_EMPTY: &str = "Unable to generate report.";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("no API key configured")]
    MissingApiKey,
    #[error("invalid API key: {0}")]
    InvalidApiKey(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("report generation did not finish within {0:?}")]
    Timeout(Duration),
}

/// Prompt in, text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ReportError>;
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Result<Self, ReportError> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(ReportError::MissingApiKey);
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(key).map_err(|e| ReportError::InvalidApiKey(e.to_string()))?,
        );
        let client = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self {
            client,
            endpoint: format!("{API_BASE}/models/{model}:generateContent"),
        })
    }
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    contents: [ApiContent<'a>; 1],
}

#[derive(Serialize)]
struct ApiContent<'a> {
    parts: [ApiPart<'a>; 1],
}

#[derive(Serialize)]
struct ApiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Deserialize)]
struct ApiCandidate {
    #[serde(default)]
    content: Option<ApiCandidateContent>,
}

#[derive(Deserialize)]
struct ApiCandidateContent {
    #[serde(default)]
    parts: Vec<ApiCandidatePart>,
}

#[derive(Deserialize)]
struct ApiCandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl ApiResponse {
    /// Concatenated text of the first candidate.
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ReportError> {
        let body = ApiRequest {
            contents: [ApiContent {
                parts: [ApiPart { text: prompt }],
            }],
        };
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let parsed: ApiResponse = response.json().await?;
        Ok(parsed.text())
    }
}

/// Turns a day's attendance into a narrative report.
///
/// Never fails: every error path degrades to [`REPORT_FAILED`], and an
/// empty reply to [`REPORT_EMPTY`].
pub struct Summarizer {
    generator: Option<Arc<dyn TextGenerator>>,
    timeout: Duration,
}

impl Summarizer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Build from an optional API key. A bad key disables generation.
    pub fn from_api_key(api_key: Option<&str>, model: &str, timeout: Duration) -> Self {
        let generator = match api_key.map(|key| GeminiClient::new(key, model)) {
            Some(Ok(client)) => Some(Arc::new(client) as Arc<dyn TextGenerator>),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "report generation disabled");
                None
            }
            None => {
                tracing::info!("no API key configured; reports disabled");
                None
            }
        };
        Self::new(generator, timeout)
    }

    pub async fn daily_report(
        &self,
        log: &[AttendanceRecord],
        roster: &[Identity],
        date: NaiveDate,
    ) -> String {
        let summary = summarize(log, roster, date, &Local);
        let prompt = build_prompt(&summary, date);

        match self.generate(&prompt).await {
            Ok(text) if text.trim().is_empty() => REPORT_EMPTY.to_string(),
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, %date, "report generation failed");
                REPORT_FAILED.to_string()
            }
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String, ReportError> {
        let generator = self.generator.as_ref().ok_or(ReportError::MissingApiKey)?;
        tokio::time::timeout(self.timeout, generator.generate(prompt))
            .await
            .map_err(|_| ReportError::Timeout(self.timeout))?
    }
}
