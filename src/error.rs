use crate::models::{ImportId, ImportStatus};

/// Faults that abort a whole import. Row-level problems never surface here;
/// they are collected into [`crate::models::ImportResult::errors`].
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Encoding could not be detected")]
    EncodingUndetectable,

    #[error("Failed to convert {encoding} to UTF-8: malformed sequence at byte {offset}")]
    TranscodeFailed {
        encoding: &'static str,
        /// Position of the first malformed sequence in the source bytes
        offset: usize,
    },

    #[error("Source is unreadable: {0}")]
    Source(#[from] std::io::Error),

    #[error("Malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Unknown booking field in mapping: {0}")]
    UnknownField(String),

    #[error("Invalid column mapping: {0}")]
    Mapping(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Ticket number {0} already exists")]
    DuplicateTicket(String),

    #[error("Import {0} not found")]
    ImportNotFound(ImportId),

    #[error("Import {id} already finished with status {status}")]
    ImportFinished { id: ImportId, status: ImportStatus },

    #[error("Corrupt import record {id}: {reason}")]
    Corrupt { id: ImportId, reason: String },

    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
