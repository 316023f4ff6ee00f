use crate::model::config::ProviderKind;
use crate::model::entry::Entry;
use crate::services::batch::{DispatchStats, ProgressFn};
use crate::services::translator::{TranslationResult, Translator};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// The distinct source texts of one translation run and where they go.
#[derive(Debug, Clone)]
pub struct TranslationJob {
    pub texts: Vec<String>,
    pub target_lang: String,
}

impl TranslationJob {
    /// Non-blank originals, first occurrence order, duplicates dropped.
    pub fn from_entries(entries: &[Entry], target_lang: &str) -> Self {
        let mut seen = HashSet::new();
        let texts = entries
            .iter()
            .map(|e| e.original.as_str())
            .filter(|t| !t.trim().is_empty())
            .filter(|t| seen.insert(*t))
            .map(str::to_string)
            .collect();

        TranslationJob {
            texts,
            target_lang: target_lang.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    pub provider: ProviderKind,
    pub unique: usize,
    pub translated: usize,
    pub unchanged: usize,
    pub cancelled: bool,
    pub elapsed_ms: u128,
    pub stats: DispatchStats,
}

pub async fn translate(
    job: &TranslationJob,
    translator: &Translator,
    progress: Option<&ProgressFn<'_>>,
    cancel: &CancellationToken,
) -> TranslationResult {
    translator
        .translate_batch(&job.texts, &job.target_lang, progress, cancel)
        .await
}

/// Writes translations back onto the entries. Fallbacks (a text mapped to
/// itself) leave the current translation alone, so earlier edits survive a
/// failed run. Returns how many entries end up differing from their
/// original.
pub fn apply(entries: &mut [Entry], translations: &HashMap<String, String>) -> usize {
    let mut translated = 0usize;

    for e in entries.iter_mut() {
        match translations.get(&e.original) {
            Some(value) if *value != e.original => {
                e.translation = clean_translation(&e.original, value);
            }
            _ => {}
        }
        if e.is_modified() {
            translated += 1;
        }
    }

    translated
}

/// Trims provider output and drops quote wrapping it added; typographic
/// quotes inside become plain ones.
pub fn clean_translation(original: &str, translated: &str) -> String {
    if translated == original {
        return translated.to_string();
    }

    let mut t = translated.trim();

    if t.chars().count() >= 2 {
        let wrapped = (t.starts_with('"') && t.ends_with('"'))
            || (t.starts_with('\u{201C}') && t.ends_with('\u{201D}'));
        if wrapped {
            let first = t.chars().next().map(char::len_utf8).unwrap_or(0);
            let last = t.chars().next_back().map(char::len_utf8).unwrap_or(0);
            t = t[first..t.len() - last].trim();
        }
    }

    t.replace(['\u{201C}', '\u{201D}'], "\"")
}

/// Collects, translates and applies in one call.
pub async fn run(
    entries: &mut [Entry],
    translator: &Translator,
    target_lang: &str,
    progress: Option<&ProgressFn<'_>>,
    cancel: &CancellationToken,
) -> PipelineReport {
    let started = Instant::now();
    let job = TranslationJob::from_entries(entries, target_lang);

    let result = translate(&job, translator, progress, cancel).await;
    let translated = apply(entries, &result.translations);

    report(translator.kind(), &job, translated, entries.len(), result.stats, cancel, started)
}

pub fn report(
    provider: ProviderKind,
    job: &TranslationJob,
    translated: usize,
    total_entries: usize,
    stats: DispatchStats,
    cancel: &CancellationToken,
    started: Instant,
) -> PipelineReport {
    PipelineReport {
        provider,
        unique: job.texts.len(),
        translated,
        unchanged: total_entries - translated,
        cancelled: cancel.is_cancelled(),
        elapsed_ms: started.elapsed().as_millis(),
        stats,
    }
}
