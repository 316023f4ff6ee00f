//! Anonymous Google Translate (`client=gtx`) provider.
//!
//! Many texts travel in one request joined by newlines; the reply is split
//! back on newlines.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use serde_json::Value;

use super::{Provider, ProviderError};
use crate::model::config::{GoogleFreeConfig, ProviderKind};
use crate::services::batch::{Chunking, DispatchPlan};

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Clone)]
pub struct GoogleFreeProvider {
    client: reqwest::Client,
    base_url: String,
    max_chars: usize,
    throttle: Duration,
    concurrency: usize,
}

impl GoogleFreeProvider {
    pub fn new(client: reqwest::Client, config: &GoogleFreeConfig) -> Self {
        GoogleFreeProvider {
            client,
            base_url: config.base_url.clone(),
            max_chars: config.max_chars.max(1),
            throttle: Duration::from_millis(config.throttle_ms),
            concurrency: config.concurrency.max(1),
        }
    }
}

#[async_trait]
impl Provider for GoogleFreeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleFree
    }

    fn plan(&self) -> DispatchPlan {
        DispatchPlan {
            chunking: Chunking::CharBudget(self.max_chars),
            concurrency: self.concurrency,
            throttle: (!self.throttle.is_zero()).then_some(self.throttle),
        }
    }

    async fn translate_unit(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let joined = texts.join("\n");

        let resp = self
            .client
            .get(&self.base_url)
            .header(USER_AGENT, BROWSER_AGENT)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_lang),
                ("dt", "t"),
                ("q", joined.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        let translated = join_segments(&body)?;
        Ok(split_lines(texts, &translated))
    }
}

/// Concatenates the translated pieces found at `[0][i][0]`.
pub(crate) fn join_segments(body: &str) -> Result<String, ProviderError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Format(format!("invalid JSON: {e}")))?;

    let segments = v
        .get(0)
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Format("missing translation segments".into()))?;

    Ok(segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(Value::as_str))
        .collect())
}

/// One trimmed line per source text; sources without a matching line keep
/// their original text and surplus lines are dropped.
pub(crate) fn split_lines(sources: &[String], translated: &str) -> Vec<String> {
    let lines: Vec<&str> = translated.split('\n').collect();

    sources
        .iter()
        .enumerate()
        .map(|(i, source)| match lines.get(i) {
            Some(line) => line.trim().to_string(),
            None => source.clone(),
        })
        .collect()
}
