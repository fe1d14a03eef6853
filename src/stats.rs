use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected while an import runs. Shared through an `Arc` so a caller can
/// watch progress from another thread.
#[derive(Default, Debug)]
pub struct ImportStats {
    pub rows_read: AtomicU64,
    pub rows_persisted: AtomicU64,
    pub rows_rejected: AtomicU64,
    pub batches_committed: AtomicU64,
}

impl ImportStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_rows_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_persisted(&self, count: u64) {
        self.rows_persisted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_rejected(&self, count: u64) {
        self.rows_rejected.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_batches(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    pub fn persisted(&self) -> u64 {
        self.rows_persisted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rows_rejected.load(Ordering::Relaxed)
    }

    pub fn batches(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }
}
