//! Guichet: ticketing CSV import pipeline
//!
//! This crate ingests loosely-structured CSV exports of ticketing transactions and turns them
//! into validated booking records:
//!
//! 1. **Encoding Pass** -- Detect the source encoding (BOM, UTF-16, UTF-8, Windows-1252) and
//!    transcode to UTF-8
//! 2. **Sniffing Pass** -- Pick `;` or `,` as the delimiter from a 1024-byte prefix
//! 3. **Import Pass** -- Stream rows, map source columns onto the booking schema, validate
//!    each row and persist in transactional batches of 1000
//! 4. **Recording Pass** -- Write the outcome (`success`, `partial_success`, `failed`) and
//!    the per-row error list into a durable import record
//!
//! # Architecture
//!
//! - **Row isolation** -- A rejected row is recorded and skipped; it never aborts its batch
//! - **Batch transactions** -- Uniqueness is checked inside the batch transaction, so
//!   duplicates within one file are caught regardless of batch boundaries
//! - **Storage traits** -- The importer only sees [`store::BookingStore`] and
//!   [`store::ImportStatusStore`]; [`sqlite::SqliteStore`] implements both
//! - **Guaranteed cleanup** -- Uploaded files are deleted when a job ends, whatever the outcome
//! - **Atomic operations** -- Lock-free counters for import statistics
//!
//! # Key Modules
//!
//! - [`encoding`] -- Encoding detection and UTF-8 transcoding
//! - [`sniff`] -- Delimiter detection
//! - [`mapping`] -- Source header to booking field resolution
//! - [`validate`] -- Presence, numeric and uniqueness checks
//! - [`importer`] -- Streaming batch importer
//! - [`job`] -- Import job orchestration and upload storage
//! - [`store`] -- Storage capabilities
//! - [`sqlite`] -- SQLite storage engine and booking statistics
//! - [`models`] -- Core data types (Booking, ColumnMapping, ImportResult, ImportRecord)
//! - [`stats`] -- Thread-safe atomic counters for import metrics
//! - [`config`] -- Constants and importer tunables
//! - [`error`] -- Library error types
//!
//! # Example Usage
//!
//! ```bash
//! # Import a file synchronously
//! guichet import -i export.csv -m mapping.json
//!
//! # Run several uploads as background jobs, then poll one
//! guichet submit -i monday.csv -i tuesday.csv -m mapping.json
//! guichet status --id 1
//!
//! # Booking statistics for one show
//! guichet stats --show "La Traviata"
//! ```

pub mod config;
pub mod encoding;
pub mod error;
pub mod importer;
pub mod job;
pub mod mapping;
pub mod models;
pub mod sniff;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod validate;
