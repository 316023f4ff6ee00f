use std::path::PathBuf;

use thiserror::Error;

/// Terminal failures of a load, save or configuration operation.
///
/// These are reported to the caller as-is; nothing here is retried.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode document as {0}")]
    Decode(String),

    #[error("cannot encode document as {encoding}: {detail}")]
    Encode { encoding: String, detail: String },

    #[error("malformed cheat table: {0}")]
    Malformed(String),

    #[error("found {scanned} description regions but the document holds {parsed} description elements")]
    RegionMismatch { scanned: usize, parsed: usize },

    #[error("no cheat table is loaded")]
    NoSession,

    #[error("no entry at region {0}")]
    UnknownEntry(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
