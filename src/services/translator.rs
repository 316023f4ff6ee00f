use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::model::config::{AppConfig, ProviderKind};
use crate::services::batch::{self, DispatchStats, ProgressFn};
use crate::services::log::LogSink;
use crate::services::providers::{self, Provider};
use crate::services::retry::{RetryPolicy, UnitOutcome};

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    /// Every requested text maps to its translation, or to itself.
    pub translations: HashMap<String, String>,
    pub stats: DispatchStats,
}

/// The provider selected by configuration, wrapped with the retry policy
/// and log sink every request goes through.
pub struct Translator {
    provider: Box<dyn Provider>,
    retry: RetryPolicy,
    log: LogSink,
}

impl Translator {
    pub fn new(provider: Box<dyn Provider>, retry: RetryPolicy, log: LogSink) -> Self {
        Translator {
            provider,
            retry,
            log,
        }
    }

    pub fn from_config(config: &AppConfig, log: LogSink) -> CoreResult<Self> {
        let provider = providers::build(config)?;
        Ok(Translator::new(
            provider,
            RetryPolicy::from_settings(&config.batch),
            log,
        ))
    }

    pub fn kind(&self) -> ProviderKind {
        self.provider.kind()
    }

    /// Never fails: on any error the source text comes back unchanged.
    pub async fn translate_one(&self, text: &str, target_lang: &str) -> String {
        let mut result = self
            .translate_batch(&[text.to_string()], target_lang, None, &CancellationToken::new())
            .await;
        result
            .translations
            .remove(text)
            .unwrap_or_else(|| text.to_string())
    }

    /// Translates the distinct texts of `texts`. Blank texts are not sent
    /// and map to themselves, as does anything whose unit fails or is
    /// cancelled.
    pub async fn translate_batch(
        &self,
        texts: &[String],
        target_lang: &str,
        progress: Option<&ProgressFn<'_>>,
        cancel: &CancellationToken,
    ) -> TranslationResult {
        let mut translations = HashMap::with_capacity(texts.len());
        let mut seen = HashSet::with_capacity(texts.len());
        let mut pending = Vec::new();

        for text in texts {
            if !seen.insert(text.as_str()) {
                continue;
            }
            if text.trim().is_empty() {
                translations.insert(text.clone(), text.clone());
            } else {
                pending.push(text.clone());
            }
        }

        if pending.is_empty() {
            return TranslationResult {
                translations,
                stats: DispatchStats::default(),
            };
        }

        let plan = self.provider.plan();
        let units = plan.chunking.split(&pending);
        let source = self.provider.kind().as_str();

        self.log.info(
            source,
            format!(
                "translating {} texts in {} requests (concurrency {})",
                pending.len(),
                units.len(),
                plan.concurrency.max(1)
            ),
        );

        let (map, stats) = batch::dispatch(&units, &plan, cancel, progress, |unit| {
            self.run_unit(unit, target_lang, cancel)
        })
        .await;

        if cancel.is_cancelled() {
            self.log.warn(source, "translation cancelled");
        } else if stats.fallback_items > 0 {
            self.log.warn(
                source,
                format!("{} texts kept their original value", stats.fallback_items),
            );
        }

        translations.extend(map);
        TranslationResult {
            translations,
            stats,
        }
    }

    async fn run_unit(
        &self,
        unit: &[String],
        target_lang: &str,
        cancel: &CancellationToken,
    ) -> UnitOutcome {
        let source = self.provider.kind().as_str();
        self.log
            .debug(source, format!("sending request with {} texts", unit.len()));

        self.retry
            .run(
                cancel,
                &self.log,
                source,
                unit.len(),
                || self.provider.translate_unit(unit, target_lang),
            )
            .await
    }
}
