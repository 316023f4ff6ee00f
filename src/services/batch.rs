use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::services::retry::UnitOutcome;

/// How a provider wants its pending texts split into request units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunking {
    /// Joined requests under a character budget; each item costs its
    /// length plus one separator.
    CharBudget(usize),
    FixedCount(usize),
    PerItem,
}

impl Chunking {
    pub fn split(self, texts: &[String]) -> Vec<Vec<String>> {
        match self {
            Chunking::CharBudget(max) => chunk_by_chars(texts, max),
            Chunking::FixedCount(size) => chunk_by_count(texts, size),
            Chunking::PerItem => chunk_by_count(texts, 1),
        }
    }
}

/// Every unit holds at least one item, so an item longer than the budget
/// travels alone.
pub fn chunk_by_chars(texts: &[String], max_chars: usize) -> Vec<Vec<String>> {
    let mut units = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut used = 0usize;

    for text in texts {
        let cost = text.chars().count() + 1;
        if !current.is_empty() && used + cost > max_chars {
            units.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(text.clone());
        used += cost;
    }

    if !current.is_empty() {
        units.push(current);
    }
    units
}

pub fn chunk_by_count(texts: &[String], size: usize) -> Vec<Vec<String>> {
    texts.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPlan {
    pub chunking: Chunking,
    /// Units allowed in flight at once; values below one mean one.
    pub concurrency: usize,
    /// Pause after each unit, taken while still holding the permit.
    pub throttle: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressFn<'a> = dyn Fn(Progress) + Send + Sync + 'a;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub units: usize,
    pub translated_units: usize,
    pub failed_units: usize,
    pub cancelled_units: usize,
    /// Items that fell back to their source text.
    pub fallback_items: usize,
}

struct JobState {
    results: HashMap<String, String>,
    completed: usize,
    stats: DispatchStats,
}

/// Runs `work` over every unit behind a counting gate and merges the
/// outcomes into one source-to-translation map.
///
/// Units that fail, are cancelled, or never start map each of their items
/// to itself. The returned map therefore holds every item of `units`.
pub async fn dispatch<'a, F, Fut>(
    units: &'a [Vec<String>],
    plan: &DispatchPlan,
    cancel: &CancellationToken,
    progress: Option<&ProgressFn<'_>>,
    work: F,
) -> (HashMap<String, String>, DispatchStats)
where
    F: Fn(&'a [String]) -> Fut,
    Fut: Future<Output = UnitOutcome> + 'a,
{
    let total: usize = units.iter().map(Vec::len).sum();
    let gate = Semaphore::new(plan.concurrency.max(1));
    let state = Mutex::new(JobState {
        results: HashMap::with_capacity(total),
        completed: 0,
        stats: DispatchStats {
            units: units.len(),
            ..DispatchStats::default()
        },
    });

    let tasks = units.iter().map(|unit| {
        let gate = &gate;
        let state = &state;
        let work = &work;

        async move {
            let outcome = if cancel.is_cancelled() {
                UnitOutcome::Cancelled
            } else {
                match gate.acquire().await {
                    Ok(_permit) if !cancel.is_cancelled() => {
                        let outcome = work(unit.as_slice()).await;
                        if let Some(pause) = plan.throttle {
                            if !cancel.is_cancelled() {
                                tokio::time::sleep(pause).await;
                            }
                        }
                        outcome
                    }
                    _ => UnitOutcome::Cancelled,
                }
            };

            let mut s = state.lock().await;
            record(&mut s, unit, outcome);
            s.completed += unit.len();

            if let Some(report) = progress {
                report(Progress {
                    completed: s.completed,
                    total,
                });
            }
        }
    });

    join_all(tasks).await;

    let s = state.into_inner();
    (s.results, s.stats)
}

fn record(state: &mut JobState, unit: &[String], outcome: UnitOutcome) {
    match outcome {
        UnitOutcome::Translated(translated) => {
            state.stats.translated_units += 1;
            let mut translated = translated.into_iter();
            for source in unit {
                let value = match translated.next() {
                    Some(t) => t,
                    None => {
                        state.stats.fallback_items += 1;
                        source.clone()
                    }
                };
                state.results.insert(source.clone(), value);
            }
        }
        UnitOutcome::Failed => {
            state.stats.failed_units += 1;
            identity(state, unit);
        }
        UnitOutcome::Cancelled => {
            state.stats.cancelled_units += 1;
            identity(state, unit);
        }
    }
}

fn identity(state: &mut JobState, unit: &[String]) {
    state.stats.fallback_items += unit.len();
    for source in unit {
        state.results.insert(source.clone(), source.clone());
    }
}
