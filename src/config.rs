use crate::models::BookingField;

/// Rows persisted per transaction
pub const BATCH_SIZE: usize = 1000;

/// Bytes inspected by the delimiter sniffer
pub const SNIFF_PREFIX_LEN: usize = 1024;

/// Upload admission limit, checked by callers before the importer runs.
/// 100 MB is roughly 100k booking lines.
pub const MAX_UPLOAD_SIZE_MB: u64 = 100;

pub const MAX_UPLOAD_SIZE_BYTES: u64 = MAX_UPLOAD_SIZE_MB * 1024 * 1024;

/// Highest share of control characters tolerated in text decoded by a single-byte fallback
pub const MAX_CONTROL_CHAR_RATIO: f64 = 0.01;

pub const DEFAULT_DATABASE_PATH: &str = "guichet.sqlite";

/// How long a SQLite connection waits on a lock held by another import
pub const BUSY_TIMEOUT_SECS: u64 = 30;

/// Tunables for a single import run.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub batch_size: usize,
    pub sniff_len: usize,
    /// Mandatory fields whose presence check is skipped when the mapping leaves them out
    pub waived: Vec<BookingField>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            sniff_len: SNIFF_PREFIX_LEN,
            waived: Vec::new(),
        }
    }
}

impl ImporterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A zero batch size is bumped to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_sniff_len(mut self, sniff_len: usize) -> Self {
        self.sniff_len = sniff_len;
        self
    }

    /// Ignored for fields that can never be waived (see [`BookingField::can_be_waived`]).
    pub fn with_waived(mut self, field: BookingField) -> Self {
        if field.can_be_waived() && !self.waived.contains(&field) {
            self.waived.push(field);
        }
        self
    }
}
