use std::path::PathBuf;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{get_str, Core, Reply};
use crate::error::CoreError;
use crate::services::batch::Progress;
use crate::services::log::LogSink;
use crate::services::pipeline::{self, TranslationJob};
use crate::services::session::Session;
use crate::services::translator::Translator;

fn no_session() -> String {
    CoreError::NoSession.to_string()
}

pub(super) async fn open(core: &Core, payload: &Value) -> Reply {
    let path = get_str(payload, "path").ok_or("payload.path is required")?;

    // Parse outside the lock; a failed open leaves the current table alone.
    let session = Session::open(&PathBuf::from(path)).map_err(|e| e.to_string())?;

    let mut st = core.state.lock().await;
    st.generation += 1;
    let reply = json!({
        "table": session.summary(),
        "entries": session.entries(),
    });
    st.session = Some(session);

    Ok(reply)
}

pub(super) async fn entries(core: &Core) -> Reply {
    let st = core.state.lock().await;
    let session = st.session.as_ref().ok_or_else(no_session)?;
    Ok(json!({ "entries": session.entries() }))
}

pub(super) async fn edit(core: &Core, payload: &Value) -> Reply {
    let region = payload
        .get("region")
        .and_then(Value::as_u64)
        .ok_or("payload.region is required")? as usize;
    let translation = payload
        .get("translation")
        .and_then(Value::as_str)
        .ok_or("payload.translation is required")?;

    let mut st = core.state.lock().await;
    let session = st.session.as_mut().ok_or_else(no_session)?;
    let entry = session.edit(region, translation).map_err(|e| e.to_string())?;

    Ok(json!({ "entry": entry }))
}

pub(super) async fn save(core: &Core, payload: &Value) -> Reply {
    let st = core.state.lock().await;
    let session = st.session.as_ref().ok_or_else(no_session)?;

    let target = match get_str(payload, "path") {
        Some(p) => PathBuf::from(p),
        None => session.default_output_path(&st.config.output_suffix),
    };

    let report = session.save(&target).map_err(|e| e.to_string())?;
    Ok(json!(report))
}

pub(super) async fn close(core: &Core) -> Reply {
    let mut st = core.state.lock().await;
    if let Some(job) = st.job.take() {
        job.cancel();
    }
    let closed = st.session.take().is_some();
    Ok(json!({ "closed": closed }))
}

pub(super) async fn cancel(core: &Core) -> Reply {
    let st = core.state.lock().await;
    let cancelled = match &st.job {
        Some(job) => {
            job.cancel();
            true
        }
        None => false,
    };
    Ok(json!({ "cancelled": cancelled }))
}

/// Translates every distinct description of the open table and applies the
/// results. Progress and log lines are emitted as events tagged with the
/// request id while the run is in flight.
pub(super) async fn translate(core: &Core, id: &Value, payload: &Value) -> Reply {
    let started = Instant::now();

    let (job, config, generation, cancel) = {
        let mut st = core.state.lock().await;
        let session = st.session.as_ref().ok_or_else(no_session)?;
        if st.job.is_some() {
            return Err("a translation is already running".into());
        }

        let target = get_str(payload, "targetLanguage")
            .unwrap_or(&st.config.target_language)
            .to_string();
        let job = TranslationJob::from_entries(session.entries(), &target);
        let cancel = CancellationToken::new();
        st.job = Some(cancel.clone());

        (job, st.config.clone(), st.generation, cancel)
    };

    let (log, forwarder) = forward_logs(core, id);
    let outcome = match Translator::from_config(&config, log) {
        Ok(translator) => {
            let progress = |p: Progress| core.emit(id, "progress", json!(p));
            let result = pipeline::translate(&job, &translator, Some(&progress), &cancel).await;
            Ok((translator.kind(), result))
        }
        Err(e) => Err(e.to_string()),
    };
    let _ = forwarder.await;

    let mut st = core.state.lock().await;
    st.job = None;
    let (provider, result) = outcome?;

    if st.generation != generation {
        return Err("the table was reloaded during translation; results discarded".into());
    }
    let session = st.session.as_mut().ok_or_else(no_session)?;

    let translated = pipeline::apply(session.entries_mut(), &result.translations);
    let report = pipeline::report(
        provider,
        &job,
        translated,
        session.entries().len(),
        result.stats,
        &cancel,
        started,
    );

    Ok(json!({
        "entries": session.entries(),
        "report": report,
    }))
}

pub(super) async fn translate_text(core: &Core, id: &Value, payload: &Value) -> Reply {
    let text = payload
        .get("text")
        .and_then(Value::as_str)
        .ok_or("payload.text is required")?;

    let config = core.state.lock().await.config.clone();
    let target = get_str(payload, "targetLanguage")
        .unwrap_or(&config.target_language)
        .to_string();

    let (log, forwarder) = forward_logs(core, id);
    let translated = match Translator::from_config(&config, log) {
        Ok(translator) => Ok(translator.translate_one(text, &target).await),
        Err(e) => Err(e.to_string()),
    };
    let _ = forwarder.await;
    let translated = translated?;

    Ok(json!({ "text": text, "translation": translated }))
}

/// Relays sink events until every sender is gone, so awaiting the handle
/// after dropping the translator flushes all log lines.
fn forward_logs(core: &Core, id: &Value) -> (LogSink, JoinHandle<()>) {
    let (sink, mut rx) = LogSink::channel();
    let out = core.out.clone();
    let id = id.clone();

    let handle = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let _ = out.send(super::event(&id, "log", json!(ev)));
        }
    });

    (sink, handle)
}
