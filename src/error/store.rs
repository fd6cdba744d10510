use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error during {context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: tokio_rusqlite::Error,
    },
    #[error("Outcome {request_id} of test '{test_id}' was already recorded.")]
    DuplicateOutcome { test_id: String, request_id: u64 },
    #[error("Corrupt {context} row: {detail}")]
    Corrupt {
        context: &'static str,
        detail: String,
    },
    #[error("I/O error during {context} '{path}': {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode {context}: {source}")]
    Encode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}
