use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use super::{Provider, ProviderError};
use crate::model::config::{ProviderKind, TencentConfig, DEFAULT_TENCENT_HOST};
use crate::services::batch::{Chunking, DispatchPlan};
use crate::services::signing::{self, SigningInput};

const SERVICE: &str = "tmt";
const ACTION: &str = "TextTranslate";
const VERSION: &str = "2018-03-21";

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct TextTranslateRequest<'a> {
    source_text: &'a str,
    source: &'a str,
    target: &'a str,
    project_id: i64,
}

/// Tencent Machine Translation `TextTranslate`, one signed request per text.
#[derive(Clone)]
pub struct TencentProvider {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    secret_id: String,
    secret_key: String,
    region: String,
    project_id: i64,
    concurrency: usize,
}

impl TencentProvider {
    pub fn new(client: reqwest::Client, config: &TencentConfig, concurrency: usize) -> Self {
        let endpoint = match config.endpoint.trim() {
            "" => format!("https://{DEFAULT_TENCENT_HOST}/"),
            e => e.to_string(),
        };

        TencentProvider {
            client,
            host: host_of(&endpoint),
            endpoint,
            secret_id: config.secret_id.trim().to_string(),
            secret_key: config.secret_key.trim().to_string(),
            region: config.region.trim().to_string(),
            project_id: config.project_id,
            concurrency: concurrency.max(1),
        }
    }

    async fn translate_text(&self, text: &str, target_lang: &str) -> Result<String, ProviderError> {
        let payload = serde_json::to_string(&TextTranslateRequest {
            source_text: text,
            source: "auto",
            target: tencent_language(target_lang),
            project_id: self.project_id,
        })
        .map_err(|e| ProviderError::Format(format!("cannot serialize request: {e}")))?;

        let timestamp = chrono::Utc::now().timestamp();
        let signature = signing::sign(&SigningInput {
            secret_id: &self.secret_id,
            secret_key: &self.secret_key,
            service: SERVICE,
            host: &self.host,
            payload: &payload,
            timestamp,
        })?;

        let resp = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, signature.authorization)
            .header(CONTENT_TYPE, signing::CONTENT_TYPE)
            .header("X-TC-Action", ACTION)
            .header("X-TC-Version", VERSION)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Region", &self.region)
            .body(payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status, &body));
        }

        parse_response(&body)
    }
}

#[async_trait]
impl Provider for TencentProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Tencent
    }

    fn plan(&self) -> DispatchPlan {
        DispatchPlan {
            chunking: Chunking::PerItem,
            concurrency: self.concurrency,
            throttle: None,
        }
    }

    async fn translate_unit(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate_text(text, target_lang).await?);
        }
        Ok(out)
    }
}

/// `Response.TargetText`, or the embedded `Response.Error` as a failure.
pub(crate) fn parse_response(body: &str) -> Result<String, ProviderError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Format(format!("invalid JSON: {e}")))?;

    let response = v
        .get("Response")
        .ok_or_else(|| ProviderError::Format("missing Response object".into()))?;

    if let Some(err) = response.get("Error") {
        let field = |name: &str| {
            err.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        return Err(ProviderError::Remote {
            code: field("Code"),
            message: field("Message"),
        });
    }

    response
        .get("TargetText")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProviderError::Format("missing Response.TargetText".into()))
}

/// Maps common language tags onto the codes the service accepts.
pub fn tencent_language(tag: &str) -> &str {
    match tag.to_ascii_lowercase().as_str() {
        "zh-cn" | "zh-hans" | "zh" => "zh",
        "zh-tw" | "zh-hk" | "zh-hant" => "zh-TW",
        _ => tag,
    }
}

fn host_of(endpoint: &str) -> String {
    match reqwest::Url::parse(endpoint) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => DEFAULT_TENCENT_HOST.to_string(),
        },
        Err(_) => DEFAULT_TENCENT_HOST.to_string(),
    }
}
