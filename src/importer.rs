//! Streaming CSV import with batched, row-isolated persistence.
//!
//! Rows are parsed lazily, mapped, and buffered. Every `batch_size` rows the buffer is
//! flushed inside one store transaction: each row is validated against the store (so
//! duplicates committed earlier in the same batch are caught) and either inserted or
//! recorded as a row error. A rejected row never aborts its batch; only a store fault does,
//! and that fault ends the import while batches already committed stay committed.

use crate::config::ImporterConfig;
use crate::encoding;
use crate::error::{ImportError, StoreError};
use crate::mapping::{raw_row, ResolvedMapping};
use crate::models::{CandidateFields, ColumnMapping, ImportId, ImportResult, RawRow, RowError};
use crate::sniff::sniff_delimiter_within;
use crate::stats::ImportStats;
use crate::store::{BookingStore, BookingWriter};
use crate::validate::{Validator, Verdict, TICKET_TAKEN};
use csv::{ReaderBuilder, Trim};
use indicatif::ProgressBar;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A buffered row, kept in file order until its batch is flushed.
enum PendingRow {
    Mapped {
        raw: RawRow,
        candidate: CandidateFields,
    },
    Malformed(RowError),
}

pub struct BatchImporter<'s, S: BookingStore + ?Sized> {
    store: &'s mut S,
    config: ImporterConfig,
    import_id: Option<ImportId>,
    progress: ProgressBar,
    stats: Arc<ImportStats>,
}

impl<'s, S: BookingStore + ?Sized> BatchImporter<'s, S> {
    pub fn new(store: &'s mut S, config: ImporterConfig) -> Self {
        Self {
            store,
            config,
            import_id: None,
            progress: ProgressBar::hidden(),
            stats: Arc::new(ImportStats::new()),
        }
    }

    /// Associates every persisted booking with `import_id`.
    pub fn for_import(mut self, import_id: ImportId) -> Self {
        self.import_id = Some(import_id);
        self
    }

    /// Ticked once per committed batch.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn stats(&self) -> Arc<ImportStats> {
        Arc::clone(&self.stats)
    }

    /// Imports UTF-8 CSV from `source`, starting at its current position.
    ///
    /// Row problems end up in [`ImportResult::errors`]; `Err` means the import was aborted
    /// (unreadable source or store fault).
    pub fn import<R: Read + Seek>(
        &mut self,
        mut source: R,
        mapping: &ColumnMapping,
    ) -> Result<ImportResult, ImportError> {
        let delimiter = self.sniff(&mut source)?;
        debug!(delimiter = %(delimiter as char), "Sniffed delimiter");

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(Trim::Headers)
            .from_reader(source);
        let headers = reader.headers()?.clone();

        let mapping = Arc::new(mapping.clone());
        let resolved = ResolvedMapping::resolve(&mapping, &headers);
        for field in resolved.unresolved() {
            warn!(field = %field, "Mapped column missing from source headers");
        }
        let validator = Validator::new(Arc::clone(&mapping), self.import_id, &self.config.waived);

        let batch_size = self.config.batch_size.max(1);
        let mut buffer: Vec<PendingRow> = Vec::with_capacity(batch_size);
        let mut result = ImportResult::default();

        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed row");
                    self.stats.inc_rows_read();
                    buffer.push(PendingRow::Malformed(RowError::fault(format!(
                        "Malformed row: {e}"
                    ))));
                    if buffer.len() >= batch_size {
                        self.flush(&validator, &mut buffer, &mut result)?;
                    }
                    continue;
                }
            };
            self.stats.inc_rows_read();
            buffer.push(PendingRow::Mapped {
                raw: raw_row(&headers, &record),
                candidate: resolved.apply(&record),
            });

            if buffer.len() >= batch_size {
                self.flush(&validator, &mut buffer, &mut result)?;
            }
        }
        self.flush(&validator, &mut buffer, &mut result)?;
        self.progress.finish_and_clear();

        info!(
            successes = result.successes,
            errors = result.errors.len(),
            batches = self.stats.batches(),
            "Import complete"
        );
        Ok(result)
    }

    /// Reads the sniff prefix and seeks back so parsing starts from the same position.
    fn sniff<R: Read + Seek>(&self, source: &mut R) -> Result<u8, ImportError> {
        let start = source.stream_position()?;
        let mut prefix = Vec::with_capacity(self.config.sniff_len);
        source
            .by_ref()
            .take(self.config.sniff_len as u64)
            .read_to_end(&mut prefix)?;
        source.seek(SeekFrom::Start(start))?;
        Ok(sniff_delimiter_within(&prefix, self.config.sniff_len))
    }

    fn flush(
        &mut self,
        validator: &Validator,
        buffer: &mut Vec<PendingRow>,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let mut outcome = ImportResult::default();
        let rows = buffer.as_slice();
        self.store.in_batch(&mut |writer: &mut dyn BookingWriter| {
            // A store may rerun the work after a rollback
            outcome = ImportResult::default();
            for row in rows {
                let (raw, candidate) = match row {
                    PendingRow::Mapped { raw, candidate } => (raw, candidate),
                    PendingRow::Malformed(error) => {
                        outcome.errors.push(error.clone());
                        continue;
                    }
                };
                match validator.validate(candidate, &*writer)? {
                    Verdict::Valid(booking) => match writer.insert(&booking) {
                        Ok(()) => outcome.successes += 1,
                        Err(StoreError::DuplicateTicket(_)) => {
                            let messages = vec![TICKET_TAKEN.to_string()];
                            outcome.errors.push(RowError::new(raw.clone(), messages));
                        }
                        Err(e) => return Err(e),
                    },
                    Verdict::Invalid(errors) => outcome.errors.push(RowError::new(
                        raw.clone(),
                        errors.iter().map(ToString::to_string).collect(),
                    )),
                }
            }
            Ok(())
        })?;

        self.stats.add_persisted(outcome.successes);
        self.stats.add_rejected(outcome.errors.len() as u64);
        self.stats.inc_batches();
        debug!(
            rows = buffer.len(),
            persisted = outcome.successes,
            rejected = outcome.errors.len(),
            "Batch committed"
        );
        self.progress.set_message(format!(
            "{} rows read, {} imported",
            self.stats.rows_read(),
            self.stats.persisted()
        ));
        self.progress.tick();

        result.merge(outcome);
        buffer.clear();
        Ok(())
    }
}

/// Normalizes the encoding of an in-memory export, then imports it.
pub fn import_bytes<S: BookingStore + ?Sized>(
    store: &mut S,
    raw: &[u8],
    mapping: &ColumnMapping,
    config: ImporterConfig,
) -> Result<ImportResult, ImportError> {
    let utf8 = encoding::normalize(raw)?;
    BatchImporter::new(store, config).import(Cursor::new(&*utf8), mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Booking, BookingField};
    use rustc_hash::FxHashSet;

    /// In-memory store that can be told to fail on a given insert.
    #[derive(Default)]
    struct MemoryStore {
        committed: Vec<Booking>,
        fail_on_insert: Option<usize>,
        inserts: usize,
    }

    struct MemoryBatch<'a> {
        committed: &'a [Booking],
        pending: Vec<Booking>,
        inserts: &'a mut usize,
        fail_on_insert: Option<usize>,
    }

    impl BookingWriter for MemoryBatch<'_> {
        fn ticket_number_exists(&self, ticket_number: &str) -> Result<bool, StoreError> {
            Ok(self
                .committed
                .iter()
                .chain(&self.pending)
                .any(|b| b.ticket_number == ticket_number))
        }

        fn insert(&mut self, booking: &Booking) -> Result<(), StoreError> {
            *self.inserts += 1;
            if self.fail_on_insert == Some(*self.inserts) {
                return Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            self.pending.push(booking.clone());
            Ok(())
        }
    }

    impl BookingStore for MemoryStore {
        fn in_batch(
            &mut self,
            work: &mut dyn FnMut(&mut dyn BookingWriter) -> Result<(), StoreError>,
        ) -> Result<(), StoreError> {
            let mut batch = MemoryBatch {
                committed: &self.committed,
                pending: Vec::new(),
                inserts: &mut self.inserts,
                fail_on_insert: self.fail_on_insert,
            };
            work(&mut batch)?;
            let pending = batch.pending;
            self.committed.extend(pending);
            Ok(())
        }
    }

    fn mapping() -> ColumnMapping {
        BookingField::ALL
            .iter()
            .fold(ColumnMapping::new(), |m, f| m.with(*f, f.as_str()))
    }

    fn csv(tickets: &[&str]) -> String {
        let headers: Vec<&str> = BookingField::ALL.iter().map(|f| f.as_str()).collect();
        let mut out = headers.join(";");
        out.push('\n');
        for ticket in tickets {
            let row: Vec<String> = BookingField::ALL
                .iter()
                .map(|f| match f {
                    BookingField::TicketNumber => ticket.to_string(),
                    BookingField::Price => "10.0".to_string(),
                    BookingField::Age => "40".to_string(),
                    other => format!("{other}-value"),
                })
                .collect();
            out.push_str(&row.join(";"));
            out.push('\n');
        }
        out
    }

    #[test]
    fn imports_valid_rows() {
        let mut store = MemoryStore::default();
        let result = BatchImporter::new(&mut store, ImporterConfig::new())
            .import(Cursor::new(csv(&["1", "2", "3"])), &mapping())
            .unwrap();
        assert_eq!(result.successes, 3);
        assert!(result.errors.is_empty());
        assert_eq!(store.committed.len(), 3);
    }

    #[test]
    fn duplicates_within_a_batch_are_rejected() {
        let mut store = MemoryStore::default();
        let result = BatchImporter::new(&mut store, ImporterConfig::new().with_batch_size(10))
            .import(Cursor::new(csv(&["1", "2", "1"])), &mapping())
            .unwrap();
        assert_eq!(result.successes, 2);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].messages, vec![TICKET_TAKEN]);
        assert_eq!(result.errors[0].row.get("ticket_number"), Some("1"));
    }

    #[test]
    fn malformed_rows_keep_file_order() {
        let mut content = csv(&["1", "1"]).into_bytes();
        content.extend_from_slice(b"2;\xff\n");

        let mut store = MemoryStore::default();
        let mut importer =
            BatchImporter::new(&mut store, ImporterConfig::new().with_batch_size(10));
        let stats = importer.stats();
        let result = importer.import(Cursor::new(content), &mapping()).unwrap();

        assert_eq!(result.successes, 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].row.get("ticket_number"), Some("1"));
        assert_eq!(result.errors[0].messages, vec![TICKET_TAKEN]);
        assert!(result.errors[1].row.is_empty());
        assert!(result.errors[1].messages[0].starts_with("Malformed row"));
        assert_eq!(stats.rejected(), 2);
    }

    #[test]
    fn store_fault_keeps_earlier_batches() {
        let mut store = MemoryStore {
            fail_on_insert: Some(3),
            ..Default::default()
        };
        let err = BatchImporter::new(&mut store, ImporterConfig::new().with_batch_size(2))
            .import(Cursor::new(csv(&["1", "2", "3", "4"])), &mapping())
            .unwrap_err();
        assert!(matches!(err, ImportError::Store(StoreError::Sqlite(_))));
        let tickets: FxHashSet<_> = store
            .committed
            .iter()
            .map(|b| b.ticket_number.as_str())
            .collect();
        let expected: FxHashSet<&str> = ["1", "2"].into_iter().collect();
        assert_eq!(tickets, expected);
    }

    #[test]
    fn sniff_does_not_consume_source() {
        let content = format!("xx{}", csv(&["9"]));
        let mut source = Cursor::new(content.into_bytes());
        source.set_position(2);

        let mut store = MemoryStore::default();
        let result = BatchImporter::new(&mut store, ImporterConfig::new())
            .import(&mut source, &mapping())
            .unwrap();
        assert_eq!(result.successes, 1);
    }

    #[test]
    fn header_only_source_yields_nothing() {
        let mut store = MemoryStore::default();
        let result = BatchImporter::new(&mut store, ImporterConfig::new())
            .import(Cursor::new(csv(&[])), &mapping())
            .unwrap();
        assert_eq!(result, ImportResult::default());

        let result = BatchImporter::new(&mut store, ImporterConfig::new())
            .import(Cursor::new(Vec::new()), &mapping())
            .unwrap();
        assert_eq!(result, ImportResult::default());
    }

    #[test]
    fn stats_track_rows_and_batches() {
        let mut store = MemoryStore::default();
        let mut importer =
            BatchImporter::new(&mut store, ImporterConfig::new().with_batch_size(2));
        let stats = importer.stats();
        importer
            .import(Cursor::new(csv(&["1", "2", "2", "3", "4"])), &mapping())
            .unwrap();
        assert_eq!(stats.rows_read(), 5);
        assert_eq!(stats.persisted(), 4);
        assert_eq!(stats.rejected(), 1);
        assert_eq!(stats.batches(), 3);
    }

    #[test]
    fn import_bytes_handles_latin1_comma_files() {
        let mut raw = b"ticket_number,price,event,last_name\n".to_vec();
        raw.extend_from_slice(b"55,12.5,Op\xe9ra,Durand\n");
        let mapping = ColumnMapping::new()
            .with(BookingField::TicketNumber, "ticket_number")
            .with(BookingField::Price, "price")
            .with(BookingField::Event, "event")
            .with(BookingField::LastName, "last_name");
        let mut store = MemoryStore::default();
        let result = import_bytes(&mut store, &raw, &mapping, ImporterConfig::new()).unwrap();

        // Only four columns mapped: the row fails presence but carries transcoded values
        assert_eq!(result.successes, 0);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].row.get("event"), Some("Opéra"));
        assert!(result.errors[0]
            .messages
            .contains(&"Booking number can't be blank".to_string()));
    }
}
