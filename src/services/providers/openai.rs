use async_trait::async_trait;
use serde_json::{json, Value};

use super::{snippet, Provider, ProviderError};
use crate::model::config::{OpenAiConfig, ProviderKind, DEFAULT_OPENAI_URL};
use crate::services::batch::{Chunking, DispatchPlan};

const CHAT_COMPLETIONS: &str = "/chat/completions";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a professional translator.";

/// Any OpenAI-compatible chat-completion endpoint. Each unit is sent as a
/// JSON array and must come back as a JSON array of the same length.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    batch_size: usize,
    temperature: f32,
    concurrency: usize,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, config: &OpenAiConfig, concurrency: usize) -> Self {
        let system_prompt = match config.custom_system_prompt.trim() {
            "" => DEFAULT_SYSTEM_PROMPT.to_string(),
            custom => custom.to_string(),
        };

        OpenAiProvider {
            client,
            endpoint: normalize_endpoint(&config.api_url),
            api_key: config.api_key.trim().to_string(),
            model: config.model.trim().to_string(),
            system_prompt,
            batch_size: config.batch_size.max(1),
            temperature: config.temperature,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn plan(&self) -> DispatchPlan {
        DispatchPlan {
            chunking: Chunking::FixedCount(self.batch_size),
            concurrency: self.concurrency,
            throttle: None,
        }
    }

    async fn translate_unit(
        &self,
        texts: &[String],
        target_lang: &str,
    ) -> Result<Vec<String>, ProviderError> {
        let prompt = build_prompt(texts, target_lang)?;
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": self.system_prompt },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.temperature
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ProviderError::from_status(status, &text));
        }

        // Misconfigured base URLs often land on a web page.
        if text.trim_start().starts_with('<') {
            return Err(ProviderError::Format(format!(
                "received HTML instead of JSON; check the API URL: {}",
                snippet(&text, 120)
            )));
        }

        let v: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Format(format!("invalid JSON: {e}")))?;

        let content = v
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Format("missing choices[0].message.content".into())
            })?;

        let translated = parse_string_array(content)?;
        if translated.len() != texts.len() {
            return Err(ProviderError::LengthMismatch {
                expected: texts.len(),
                actual: translated.len(),
            });
        }

        Ok(translated)
    }
}

fn build_prompt(texts: &[String], target_lang: &str) -> Result<String, ProviderError> {
    let payload = serde_json::to_string(texts)
        .map_err(|e| ProviderError::Format(format!("cannot serialize batch: {e}")))?;

    Ok(format!(
        "Translate the following JSON array of strings to {}. \
         Return ONLY a valid JSON array of strings with the same number of items in the same order. \
         Do not include markdown formatting like ```json.\n\n{payload}",
        language_name(target_lang)
    ))
}

/// Reads a JSON string array out of model output, tolerating code fences
/// and chatter around the array.
pub(crate) fn parse_string_array(content: &str) -> Result<Vec<String>, ProviderError> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let slice = match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };

    serde_json::from_str::<Vec<String>>(slice).map_err(|e| {
        ProviderError::Format(format!("model did not return a JSON string array: {e}"))
    })
}

/// Appends the chat-completions path unless the URL already ends with it.
pub fn normalize_endpoint(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return DEFAULT_OPENAI_URL.to_string();
    }

    if trimmed.to_ascii_lowercase().ends_with(CHAT_COMPLETIONS) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{CHAT_COMPLETIONS}")
    }
}

fn language_name(code: &str) -> &str {
    match code.to_ascii_lowercase().as_str() {
        "zh-cn" | "zh" | "zh-hans" => "Simplified Chinese",
        "zh-tw" | "zh-hant" => "Traditional Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "ru" => "Russian",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "pt" => "Portuguese",
        _ => code,
    }
}
