use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A diagnostic line meant for the user, forwarded to the host as an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// Fire-and-forget sink for provider and dispatch diagnostics. Every line is
/// also written to `tracing`; a dropped receiver is not an error.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    tx: Option<UnboundedSender<LogEvent>>,
}

impl LogSink {
    pub fn channel() -> (Self, UnboundedReceiver<LogEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        LogSink { tx: None }
    }

    pub fn debug(&self, source: &str, message: impl Into<String>) {
        self.emit(LogLevel::Debug, source, message.into());
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.emit(LogLevel::Info, source, message.into());
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.emit(LogLevel::Warn, source, message.into());
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.emit(LogLevel::Error, source, message.into());
    }

    fn emit(&self, level: LogLevel, source: &str, message: String) {
        match level {
            LogLevel::Debug => debug!(source, "{message}"),
            LogLevel::Info => info!(source, "{message}"),
            LogLevel::Warn => warn!(source, "{message}"),
            LogLevel::Error => error!(source, "{message}"),
        }

        if let Some(tx) = &self.tx {
            let _ = tx.send(LogEvent {
                level,
                source: source.to_string(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_reach_the_receiver_in_order() {
        let (sink, mut rx) = LogSink::channel();
        sink.info("OpenAI", "batch 1/3");
        sink.warn("OpenAI", "retrying");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.source, "OpenAI");
        assert_eq!(rx.try_recv().unwrap().message, "retrying");
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (sink, rx) = LogSink::channel();
        drop(rx);
        sink.error("Tencent", "still fine");
        LogSink::disabled().info("GoogleFree", "nowhere");
    }

    #[test]
    fn level_serializes_lowercase() {
        let ev = LogEvent {
            level: LogLevel::Warn,
            source: "x".into(),
            message: "y".into(),
        };
        let v = serde_json::to_value(ev).unwrap();
        assert_eq!(v["level"], "warn");
    }
}
