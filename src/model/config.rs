use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_GOOGLE_URL: &str = "https://translate.googleapis.com/translate_a/single";
pub const DEFAULT_TENCENT_HOST: &str = "tmt.tencentcloudapi.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    GoogleFree,
    OpenAi,
    Tencent,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::GoogleFree => "GoogleFree",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Tencent => "Tencent",
        }
    }
}

impl From<&str> for ProviderKind {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "googlefree" | "google" => ProviderKind::GoogleFree,
            "openai" => ProviderKind::OpenAi,
            "tencent" => ProviderKind::Tencent,
            _ => ProviderKind::default(),
        }
    }
}

impl Serialize for ProviderKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProviderKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown names and non-string values resolve to the default provider.
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().map(ProviderKind::from).unwrap_or_default())
    }
}

fn default_target_language() -> String {
    "zh-CN".to_string()
}

fn default_output_suffix() -> String {
    "_CN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    #[serde(alias = "SelectedProvider")]
    pub selected_provider: ProviderKind,

    #[serde(alias = "TargetLanguage")]
    pub target_language: String,

    #[serde(alias = "OutputSuffix")]
    pub output_suffix: String,

    #[serde(alias = "RequestTimeoutSecs")]
    pub request_timeout_secs: u64,

    #[serde(alias = "Batch")]
    pub batch: BatchSettings,

    #[serde(alias = "GoogleFree")]
    pub google_free: GoogleFreeConfig,

    #[serde(alias = "OpenAi")]
    pub open_ai: OpenAiConfig,

    #[serde(alias = "Tencent")]
    pub tencent: TencentConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            selected_provider: ProviderKind::default(),
            target_language: default_target_language(),
            output_suffix: default_output_suffix(),
            request_timeout_secs: default_timeout_secs(),
            batch: BatchSettings::default(),
            google_free: GoogleFreeConfig::default(),
            open_ai: OpenAiConfig::default(),
            tencent: TencentConfig::default(),
        }
    }
}

/// Dispatch and retry knobs shared by every provider.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchSettings {
    pub concurrency: usize,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub retry_jitter_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        BatchSettings {
            concurrency: 5,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_jitter_ms: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct GoogleFreeConfig {
    #[serde(alias = "BaseUrl")]
    pub base_url: String,
    /// Character budget of one joined request.
    pub max_chars: usize,
    /// Pause after every request to stay under the anonymous rate limit.
    pub throttle_ms: u64,
    pub concurrency: usize,
}

impl Default for GoogleFreeConfig {
    fn default() -> Self {
        GoogleFreeConfig {
            base_url: DEFAULT_GOOGLE_URL.to_string(),
            max_chars: 3000,
            throttle_ms: 200,
            concurrency: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenAiConfig {
    #[serde(alias = "ApiUrl")]
    pub api_url: String,
    #[serde(alias = "ApiKey")]
    pub api_key: String,
    #[serde(alias = "Model")]
    pub model: String,
    #[serde(alias = "CustomSystemPrompt")]
    pub custom_system_prompt: String,
    pub batch_size: usize,
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        OpenAiConfig {
            api_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
            custom_system_prompt: "You are a professional translator.".to_string(),
            batch_size: 20,
            temperature: 0.1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TencentConfig {
    #[serde(alias = "SecretId")]
    pub secret_id: String,
    #[serde(alias = "SecretKey")]
    pub secret_key: String,
    #[serde(alias = "Region")]
    pub region: String,
    pub project_id: i64,
    /// Base URL requests are sent to; its host is the one that gets signed.
    pub endpoint: String,
}

impl Default for TencentConfig {
    fn default() -> Self {
        TencentConfig {
            secret_id: String::new(),
            secret_key: String::new(),
            region: "ap-guangzhou".to_string(),
            project_id: 0,
            endpoint: format!("https://{DEFAULT_TENCENT_HOST}/"),
        }
    }
}
