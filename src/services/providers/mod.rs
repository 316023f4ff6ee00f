pub mod google_free;
pub mod openai;
pub mod tencent;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::error::{CoreError, CoreResult};
use crate::model::config::{AppConfig, ProviderKind};
use crate::services::batch::DispatchPlan;

pub use google_free::GoogleFreeProvider;
pub use openai::OpenAiProvider;
pub use tencent::TencentProvider;

/// Failure of a single provider request. Caught by the retry loop; never
/// reaches the caller of a batch.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Format(String),

    #[error("expected {expected} translations, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("cannot sign request: {0}")]
    Signing(String),
}

impl ProviderError {
    /// Rejected credentials and malformed requests fail the same way on
    /// every attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(should_retry_http)
                .unwrap_or(true),
            ProviderError::Remote { code, .. } => {
                !(code.starts_with("AuthFailure") || code.starts_with("UnauthorizedOperation"))
            }
            ProviderError::Signing(_) => false,
            _ => true,
        }
    }

    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        ProviderError::Status {
            status: status.as_u16(),
            message: extract_error_message(body),
        }
    }
}

fn should_retry_http(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// `{"error":{"message":..}}` or `{"message":..}` when present, otherwise
/// the start of the body.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = v.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    snippet(body, 400)
}

pub(crate) fn snippet(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// A translation backend. One call translates one request unit; chunking,
/// concurrency and retries are handled by the caller according to `plan`.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn plan(&self) -> DispatchPlan;

    /// Must return one translation per input, in input order.
    async fn translate_unit(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Builds the configured provider, rejecting missing credentials up front.
pub fn build(config: &AppConfig) -> CoreResult<Box<dyn Provider>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
        .build()
        .map_err(|e| CoreError::Config(format!("failed to create HTTP client: {e}")))?;

    let provider: Box<dyn Provider> = match config.selected_provider {
        ProviderKind::GoogleFree => Box::new(GoogleFreeProvider::new(client, &config.google_free)),
        ProviderKind::OpenAi => {
            let cfg = &config.open_ai;
            if cfg.api_key.trim().is_empty() {
                return Err(CoreError::Config("OpenAI API key is not set".into()));
            }
            if cfg.model.trim().is_empty() {
                return Err(CoreError::Config("OpenAI model is not set".into()));
            }
            Box::new(OpenAiProvider::new(client, cfg, config.batch.concurrency))
        }
        ProviderKind::Tencent => {
            let cfg = &config.tencent;
            if cfg.secret_id.trim().is_empty() || cfg.secret_key.trim().is_empty() {
                return Err(CoreError::Config("Tencent SecretId/SecretKey are not set".into()));
            }
            Box::new(TencentProvider::new(client, cfg, config.batch.concurrency))
        }
    };

    Ok(provider)
}
