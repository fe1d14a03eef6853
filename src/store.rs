//! Storage capabilities the importer depends on.
//!
//! The core never talks to a database directly: bookings go through [`BookingStore`]
//! (one transaction per batch) and import lifecycle records through [`ImportStatusStore`].
//! [`crate::sqlite::SqliteStore`] implements both.

use crate::error::StoreError;
use crate::models::{Booking, ImportId, ImportRecord, ImportStatus, RowError};

/// Writes bookings inside an open batch transaction.
pub trait BookingWriter {
    /// Sees rows inserted earlier in the same batch as well as committed ones.
    fn ticket_number_exists(&self, ticket_number: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::DuplicateTicket`] when the ticket number is already stored.
    fn insert(&mut self, booking: &Booking) -> Result<(), StoreError>;
}

pub trait BookingStore {
    /// Runs `work` inside one transaction. The transaction commits when `work` returns
    /// `Ok`, and is rolled back when it returns `Err` or the commit itself fails.
    fn in_batch(
        &mut self,
        work: &mut dyn FnMut(&mut dyn BookingWriter) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}

/// Durable import lifecycle records.
pub trait ImportStatusStore {
    fn create(&mut self, status: ImportStatus) -> Result<ImportId, StoreError>;

    fn get(&self, id: ImportId) -> Result<ImportRecord, StoreError>;

    /// Records the outcome. Terminal records are final; updating one fails with
    /// [`StoreError::ImportFinished`].
    fn update(
        &mut self,
        id: ImportId,
        status: ImportStatus,
        successes: u64,
        errors: &[RowError],
    ) -> Result<(), StoreError>;

    /// Bookings created by the import are kept and lose their association.
    fn delete(&mut self, id: ImportId) -> Result<(), StoreError>;
}
