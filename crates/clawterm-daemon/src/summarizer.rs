//! Transcript summaries via an Ollama-compatible text generation service.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use clawterm_core::config::SummarizerConfig;

use crate::archive::FileArchive;

const PROMPT: &str = "The following is a terminal session log from an AI coding assistant CLI. \
Summarize the key work done, concisely:\n\n";

/// Summarizer errors.
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Summarization service is not available")]
    Unavailable,

    #[error("Transcript not found: {0}")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid response from summarization service: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A generated summary and the file it was saved as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub file: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for the summarization service plus the summary archive.
#[derive(Debug)]
pub struct Summarizer {
    http: reqwest::Client,
    base_url: String,
    model: String,
    max_log_chars: usize,
    check_timeout: Duration,
    generate_timeout: Duration,
    transcripts: FileArchive,
    summaries: FileArchive,
}

impl Summarizer {
    pub fn new(
        config: &SummarizerConfig,
        logs_dir: impl Into<PathBuf>,
        summaries_dir: impl Into<PathBuf>,
    ) -> Result<Self, SummarizerError> {
        // reqwest is built without a default TLS provider.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let http = reqwest::Client::builder().build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_log_chars: config.max_log_chars,
            check_timeout: Duration::from_secs(config.check_timeout_secs),
            generate_timeout: Duration::from_secs(config.generate_timeout_secs),
            transcripts: FileArchive::new(logs_dir, "log"),
            summaries: FileArchive::new(summaries_dir, "md"),
        })
    }

    pub fn summaries(&self) -> &FileArchive {
        &self.summaries
    }

    /// Whether the service answers `GET /api/tags` with 200 in time.
    pub async fn check_available(&self) -> bool {
        let result = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.check_timeout)
            .send()
            .await;
        match result {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(error = %e, "Summarization service check failed");
                false
            }
        }
    }

    /// Summarize the tail of transcript `log_name` and save it as
    /// `<date>-summary.md`.
    pub async fn summarize(&self, log_name: &str) -> Result<Summary, SummarizerError> {
        if !self.check_available().await {
            return Err(SummarizerError::Unavailable);
        }
        let content = self
            .transcripts
            .read(log_name)
            .await?
            .ok_or_else(|| SummarizerError::NotFound(log_name.to_string()))?;

        let prompt = format!("{PROMPT}{}", tail_chars(&content, self.max_log_chars));
        let summary = self.generate(&prompt).await?;

        let date = summary_date(log_name);
        let file = format!("{date}-summary.md");
        let body = format!(
            "# Session summary: {date}\n\n{summary}\n\n---\n*Generated: {}*\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        tokio::fs::create_dir_all(self.summaries.dir()).await?;
        tokio::fs::write(self.summaries.dir().join(&file), body).await?;
        info!(log = log_name, file, "Summary written");

        Ok(Summary { summary, file })
    }

    async fn generate(&self, prompt: &str) -> Result<String, SummarizerError> {
        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.generate_timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SummarizerError::InvalidResponse(format!("HTTP {status}")));
        }
        serde_json::from_str::<GenerateResponse>(&body)
            .map(|r| r.response)
            .map_err(|e| SummarizerError::InvalidResponse(e.to_string()))
    }
}

/// Trailing `max_chars` characters of `text`.
fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    text.char_indices()
        .nth(total - max_chars)
        .map_or("", |(i, _)| &text[i..])
}

/// `2026-03-01-plain.log` -> `2026-03-01`.
fn summary_date(log_name: &str) -> &str {
    let base = std::path::Path::new(log_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(log_name);
    base.strip_suffix("-plain.log")
        .or_else(|| base.strip_suffix("-raw.log"))
        .unwrap_or(base)
}
