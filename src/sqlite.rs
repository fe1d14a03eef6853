//! SQLite-backed booking and import status storage.
//!
//! One connection per import. Batches run in `IMMEDIATE` transactions so the uniqueness
//! check and the insert of a batch cannot interleave with another import's writes.

use crate::config::BUSY_TIMEOUT_SECS;
use crate::error::StoreError;
use crate::models::{Booking, ColumnMapping, ImportId, ImportRecord, ImportStatus, RowError};
use crate::store::{BookingStore, BookingWriter, ImportStatusStore};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS bookings_imports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL
        CHECK (status IN ('processing', 'success', 'partial_success', 'failed')),
    successes INTEGER NOT NULL DEFAULT 0,
    error_list TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bookings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticket_number TEXT NOT NULL UNIQUE,
    booking_number TEXT,
    booking_date TEXT,
    booking_hour TEXT,
    event_key TEXT,
    event TEXT,
    show_key TEXT,
    show TEXT,
    show_date TEXT,
    show_hour TEXT,
    show_end_date TEXT,
    show_end_hour TEXT,
    price REAL NOT NULL,
    product_type TEXT,
    sales_channel TEXT,
    first_name TEXT,
    last_name TEXT,
    email TEXT,
    address TEXT,
    postal_code TEXT,
    country TEXT,
    age INTEGER,
    gender TEXT,
    csv_mapping TEXT NOT NULL DEFAULT '{}',
    bookings_import_id INTEGER
        REFERENCES bookings_imports(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS index_bookings_on_show ON bookings(show);
CREATE INDEX IF NOT EXISTS index_bookings_on_email ON bookings(email);
CREATE INDEX IF NOT EXISTS index_bookings_on_bookings_import_id ON bookings(bookings_import_id);
"#;

const INSERT_BOOKING: &str = "
INSERT INTO bookings (
    ticket_number, booking_number, booking_date, booking_hour, event_key, event,
    show_key, show, show_date, show_hour, show_end_date, show_end_hour, price,
    product_type, sales_channel, first_name, last_name, email, address, postal_code,
    country, age, gender, csv_mapping, bookings_import_id, created_at, updated_at
) VALUES (
    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
    ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?26
)";

const SELECT_BOOKING: &str = "
SELECT ticket_number, booking_number, booking_date, booking_hour, event_key, event,
    show_key, show, show_date, show_hour, show_end_date, show_end_hour, price,
    product_type, sales_channel, first_name, last_name, email, address, postal_code,
    country, age, gender, csv_mapping, bookings_import_id
FROM bookings WHERE ticket_number = ?1";

/// Aggregates over stored bookings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookingStats {
    pub booking_count: u64,
    pub average_price: Option<f64>,
    pub total_revenue: f64,
    pub average_age: Option<i64>,
    pub unique_buyers: u64,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let store = Self::bootstrap(conn)?;
        info!(path = %path.display(), "Opened booking database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
        // In-memory databases answer "memory"; either way the mode is not checked
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn count_bookings(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM bookings", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn find_booking(&self, ticket_number: &str) -> Result<Option<Booking>, StoreError> {
        let found = self
            .conn
            .query_row(SELECT_BOOKING, params![ticket_number], read_booking)
            .optional()?;
        let Some((mut booking, mapping_json)) = found else {
            return Ok(None);
        };
        booking.csv_mapping = Arc::new(serde_json::from_str::<ColumnMapping>(&mapping_json)?);
        Ok(Some(booking))
    }

    /// `show_filter` is a case-insensitive substring match on the show name.
    pub fn booking_stats(&self, show_filter: Option<&str>) -> Result<BookingStats, StoreError> {
        let stats = self.conn.query_row(
            "SELECT COUNT(*), AVG(price), COALESCE(SUM(price), 0), AVG(age), COUNT(DISTINCT email)
             FROM bookings
             WHERE ?1 IS NULL OR LOWER(show) LIKE '%' || LOWER(?1) || '%'",
            params![show_filter],
            |row| {
                Ok(BookingStats {
                    booking_count: row.get::<_, i64>(0)? as u64,
                    average_price: row.get::<_, Option<f64>>(1)?.map(round2),
                    total_revenue: round2(row.get(2)?),
                    average_age: row.get::<_, Option<f64>>(3)?.map(|a| a.round() as i64),
                    unique_buyers: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(stats)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn read_booking(row: &Row<'_>) -> rusqlite::Result<(Booking, String)> {
    let text = |idx: usize| -> rusqlite::Result<String> {
        Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
    };
    let booking = Booking {
        ticket_number: row.get(0)?,
        booking_number: text(1)?,
        booking_date: text(2)?,
        booking_hour: text(3)?,
        event_key: text(4)?,
        event: text(5)?,
        show_key: text(6)?,
        show: text(7)?,
        show_date: text(8)?,
        show_hour: text(9)?,
        show_end_date: text(10)?,
        show_end_hour: text(11)?,
        price: row.get(12)?,
        product_type: text(13)?,
        sales_channel: text(14)?,
        first_name: text(15)?,
        last_name: text(16)?,
        email: text(17)?,
        address: text(18)?,
        postal_code: text(19)?,
        country: text(20)?,
        age: row.get(21)?,
        gender: row.get(22)?,
        csv_mapping: Arc::default(),
        import_id: row.get::<_, Option<i64>>(24)?.map(ImportId),
    };
    Ok((booking, row.get(23)?))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

struct SqliteBatch<'a> {
    conn: &'a Connection,
    now: DateTime<Utc>,
}

impl BookingWriter for SqliteBatch<'_> {
    fn ticket_number_exists(&self, ticket_number: &str) -> Result<bool, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM bookings WHERE ticket_number = ?1")?;
        Ok(stmt.exists(params![ticket_number])?)
    }

    fn insert(&mut self, booking: &Booking) -> Result<(), StoreError> {
        let mapping = serde_json::to_string(&*booking.csv_mapping)?;
        let mut stmt = self.conn.prepare_cached(INSERT_BOOKING)?;
        let inserted = stmt.execute(params![
            booking.ticket_number,
            non_empty(&booking.booking_number),
            non_empty(&booking.booking_date),
            non_empty(&booking.booking_hour),
            non_empty(&booking.event_key),
            non_empty(&booking.event),
            non_empty(&booking.show_key),
            non_empty(&booking.show),
            non_empty(&booking.show_date),
            non_empty(&booking.show_hour),
            non_empty(&booking.show_end_date),
            non_empty(&booking.show_end_hour),
            booking.price,
            non_empty(&booking.product_type),
            non_empty(&booking.sales_channel),
            non_empty(&booking.first_name),
            non_empty(&booking.last_name),
            non_empty(&booking.email),
            non_empty(&booking.address),
            non_empty(&booking.postal_code),
            non_empty(&booking.country),
            booking.age,
            booking.gender,
            mapping,
            booking.import_id.map(|id| id.0),
            self.now,
        ]);
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateTicket(booking.ticket_number.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl BookingStore for SqliteStore {
    fn in_batch(
        &mut self,
        work: &mut dyn FnMut(&mut dyn BookingWriter) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut batch = SqliteBatch {
                conn: &tx,
                now: Utc::now(),
            };
            work(&mut batch)?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl ImportStatusStore for SqliteStore {
    fn create(&mut self, status: ImportStatus) -> Result<ImportId, StoreError> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO bookings_imports (status, successes, error_list, created_at, updated_at)
             VALUES (?1, 0, '[]', ?2, ?2)",
            params![status.as_str(), now],
        )?;
        let id = ImportId(self.conn.last_insert_rowid());
        debug!(import_id = %id, status = %status, "Import record created");
        Ok(id)
    }

    fn get(&self, id: ImportId) -> Result<ImportRecord, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT status, successes, error_list, created_at, updated_at
                 FROM bookings_imports WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, DateTime<Utc>>(3)?,
                        row.get::<_, DateTime<Utc>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((status, successes, error_list, created_at, updated_at)) = row else {
            return Err(StoreError::ImportNotFound(id));
        };

        let status = status
            .parse::<ImportStatus>()
            .map_err(|reason| StoreError::Corrupt { id, reason })?;
        let errors: Vec<RowError> =
            serde_json::from_str(&error_list).map_err(|e| StoreError::Corrupt {
                id,
                reason: format!("unreadable error list: {e}"),
            })?;

        Ok(ImportRecord {
            id,
            status,
            successes: successes.max(0) as u64,
            errors,
            created_at,
            updated_at,
        })
    }

    fn update(
        &mut self,
        id: ImportId,
        status: ImportStatus,
        successes: u64,
        errors: &[RowError],
    ) -> Result<(), StoreError> {
        let error_list = serde_json::to_string(errors)?;
        let changed = self.conn.execute(
            "UPDATE bookings_imports
             SET status = ?1, successes = ?2, error_list = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'processing'",
            params![status.as_str(), successes as i64, error_list, Utc::now(), id.0],
        )?;
        if changed == 0 {
            let current = self.get(id)?;
            return Err(StoreError::ImportFinished {
                id,
                status: current.status,
            });
        }
        debug!(import_id = %id, status = %status, successes, "Import record updated");
        Ok(())
    }

    fn delete(&mut self, id: ImportId) -> Result<(), StoreError> {
        let deleted = self
            .conn
            .execute("DELETE FROM bookings_imports WHERE id = ?1", params![id.0])?;
        if deleted == 0 {
            return Err(StoreError::ImportNotFound(id));
        }
        debug!(import_id = %id, "Import record deleted");
        Ok(())
    }
}
