//! Integration tests for the guichet import pipeline.
//!
//! These tests drive the public API end to end against real SQLite databases (in-memory or
//! in a TempDir) and are organized into logical sections:
//!
//! - **Batch Tests** -- Row counts across batch boundaries, first-wins duplicate handling
//! - **Source Tests** -- Encodings, delimiters, optional columns, header-only files
//! - **Job Tests** -- Import record lifecycle, upload cleanup, concurrent jobs
//!
//! # Sample Data
//!
//! All tests share the French box-office export layout returned by `header()` and
//! `mapping()`: 23 columns, `;` separated, decimal comma prices. `row()` builds one booking
//! line whose ticket number, reservation and email are derived from its argument.

use guichet::config::ImporterConfig;
use guichet::importer::import_bytes;
use guichet::job::{submit_upload, ImportJob};
use guichet::models::{BookingField, ColumnMapping, ImportResult, ImportStatus};
use guichet::sqlite::SqliteStore;
use guichet::store::ImportStatusStore;
use guichet::validate::TICKET_TAKEN;
use tempfile::TempDir;

const MAPPING_JSON: &str = r#"{
    "ticket_number": "Numero billet",
    "booking_number": "Reservation",
    "booking_date": "Date reservation",
    "booking_hour": "Heure reservation",
    "event_key": "Cle spectacle",
    "event": "Spectacle",
    "show_key": "Cle representation",
    "show": "Representation",
    "show_date": "Date representation",
    "show_hour": "Heure representation",
    "show_end_date": "Date fin representation",
    "show_end_hour": "Heure fin representation",
    "price": "Prix",
    "product_type": "Type de produit",
    "sales_channel": "Filiere de vente",
    "first_name": "Prenom",
    "last_name": "Nom",
    "email": "Email",
    "address": "Adresse",
    "postal_code": "Code postal",
    "country": "Pays",
    "age": "Age",
    "gender": "Sexe"
}"#;

fn header() -> &'static str {
    "Numero billet;Reservation;Date reservation;Heure reservation;Cle spectacle;Spectacle;\
     Cle representation;Representation;Date representation;Heure representation;\
     Date fin representation;Heure fin representation;Prix;Type de produit;Filiere de vente;\
     Prenom;Nom;Email;Adresse;Code postal;Pays;Age;Sexe"
}

fn mapping() -> ColumnMapping {
    ColumnMapping::from_json(MAPPING_JSON).unwrap()
}

fn row_with(ticket: u32, reservation: &str) -> String {
    format!(
        "{ticket};{reservation};2023-01-01;10:00;EVT1;Concert;SHW1;Soirée jazz;2023-01-10;20:00;\
         2023-01-10;22:00;30,5;Billet standard;Online;Alice;Durand;buyer{ticket}@example.com;\
         1 rue Test;75000;France;35;F"
    )
}

fn row(ticket: u32) -> String {
    row_with(ticket, &format!("R{ticket}"))
}

/// Builds a CSV file body from the shared header and the given lines.
fn csv(lines: impl IntoIterator<Item = String>) -> String {
    let mut body = format!("{}\n", header());
    for line in lines {
        body.push_str(&line);
        body.push('\n');
    }
    body
}

fn import(store: &mut SqliteStore, body: &[u8], config: ImporterConfig) -> ImportResult {
    import_bytes(store, body, &mapping(), config).unwrap()
}

// ---------------------------------------------------------------------------
// Batch Tests
// ---------------------------------------------------------------------------

#[test]
fn every_row_is_persisted_across_batch_boundaries() {
    for n in [1u32, 1000, 1001] {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let body = csv((1..=n).map(row));

        let result = import(&mut store, body.as_bytes(), ImporterConfig::new());

        assert_eq!(result.successes, n as u64, "n = {n}");
        assert!(result.errors.is_empty(), "n = {n}");
        assert_eq!(store.count_bookings().unwrap(), n as u64);
    }
}

#[test]
fn first_occurrence_wins_for_any_batch_size() {
    let body = csv([
        row_with(1, "first"),
        row(2),
        row_with(1, "second"),
        row(3),
        row_with(2, "again"),
    ]);

    for batch_size in [1, 2, 1000] {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let config = ImporterConfig::new().with_batch_size(batch_size);

        let result = import(&mut store, body.as_bytes(), config);

        assert_eq!(result.successes, 3, "batch size {batch_size}");
        let rejected: Vec<(&str, &str)> = result
            .errors
            .iter()
            .map(|e| {
                (
                    e.row.get("Reservation").unwrap(),
                    e.messages[0].as_str(),
                )
            })
            .collect();
        assert_eq!(
            rejected,
            vec![("second", TICKET_TAKEN), ("again", TICKET_TAKEN)],
            "batch size {batch_size}"
        );
        let kept = store.find_booking("1").unwrap().unwrap();
        assert_eq!(kept.booking_number, "first");
    }
}

#[test]
fn reimporting_the_same_file_adds_nothing() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let body = csv((1..=5).map(row));

    let first = import(&mut store, body.as_bytes(), ImporterConfig::new());
    assert_eq!(first.status(), ImportStatus::Success);

    let second = import(&mut store, body.as_bytes(), ImporterConfig::new());
    assert_eq!(second.successes, 0);
    assert_eq!(second.errors.len(), 5);
    assert!(second
        .errors
        .iter()
        .all(|e| e.messages == vec![TICKET_TAKEN.to_string()]));
    assert_eq!(second.status(), ImportStatus::Failed);
    assert_eq!(store.count_bookings().unwrap(), 5);
}

#[test]
fn invalid_rows_do_not_block_the_batch() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let bad_price = row(2).replace("30,5", "gratuit");
    let no_email = row(3).replace("buyer3@example.com", "");
    let body = csv([row(1), bad_price, no_email, row(4)]);

    let result = import(&mut store, body.as_bytes(), ImporterConfig::new());

    assert_eq!(result.successes, 2);
    assert_eq!(result.status(), ImportStatus::PartialSuccess);
    assert_eq!(result.errors[0].messages, vec!["Price is not a number"]);
    assert_eq!(result.errors[1].messages, vec!["Email can't be blank"]);
    assert_eq!(result.errors[1].row.get("Numero billet"), Some("3"));
}

// ---------------------------------------------------------------------------
// Source Tests
// ---------------------------------------------------------------------------

#[test]
fn header_only_source_imports_nothing() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let body = csv(Vec::new());

    let result = import(&mut store, body.as_bytes(), ImporterConfig::new());

    assert_eq!(result, ImportResult::default());
    assert_eq!(result.status(), ImportStatus::Success);
}

#[test]
fn optional_columns_may_be_missing() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let mapping = mapping()
        .without(BookingField::Age)
        .without(BookingField::Gender);
    let header = header().trim_end_matches(";Age;Sexe");
    let line = row(1);
    let line = line.trim_end_matches(";35;F");
    let body = format!("{header}\n{line}\n");

    let result =
        import_bytes(&mut store, body.as_bytes(), &mapping, ImporterConfig::new()).unwrap();

    assert_eq!(result.successes, 1);
    let booking = store.find_booking("1").unwrap().unwrap();
    assert_eq!(booking.age, None);
    assert_eq!(booking.gender, None);
    assert_eq!(*booking.csv_mapping, mapping);
}

#[test]
fn windows_1252_export_is_transcoded() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let body = csv([row(1)]);
    let (latin1, _, unmappable) = encoding_rs::WINDOWS_1252.encode(&body);
    assert!(!unmappable);
    assert!(std::str::from_utf8(&latin1).is_err());

    let result = import(&mut store, &latin1, ImporterConfig::new());

    assert_eq!(result.successes, 1);
    let booking = store.find_booking("1").unwrap().unwrap();
    assert_eq!(booking.show, "Soirée jazz");
    assert_eq!(booking.price, 30.5);
}

#[test]
fn comma_delimited_export_is_detected() {
    let mut store = SqliteStore::open_in_memory().unwrap();
    let body = csv((1..=3).map(row))
        .replace("30,5", "30.5")
        .replace(';', ",");

    let result = import(&mut store, body.as_bytes(), ImporterConfig::new());

    assert_eq!(result.successes, 3);
    assert_eq!(store.find_booking("2").unwrap().unwrap().email, "buyer2@example.com");
}

// ---------------------------------------------------------------------------
// Job Tests
// ---------------------------------------------------------------------------

#[test]
fn job_records_outcome_and_removes_upload() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("bookings.sqlite");
    let mut store = SqliteStore::open(&db).unwrap();
    let id = store.create(ImportStatus::Processing).unwrap();

    let processing = store.get(id).unwrap().report();
    assert_eq!(processing.status, ImportStatus::Processing);
    assert_eq!(processing.finished_at, None);

    let body = csv([row(1), row(1), row(2)]);
    let upload = submit_upload(body.as_bytes(), &dir.path().join("uploads")).unwrap();
    let mut job = ImportJob::new(store, ImporterConfig::new());

    let status = job.run(&upload, &mapping(), id).unwrap();

    assert_eq!(status, ImportStatus::PartialSuccess);
    assert!(!upload.exists());
    let report = job.store().get(id).unwrap().report();
    assert_eq!(report.successes, 2);
    assert_eq!(report.errors.len(), 1);
    assert!(report.finished_at.is_some());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "partial_success");
    assert_eq!(json["errors"][0]["row"]["Numero billet"], "1");
    assert_eq!(json["errors"][0]["messages"][0], TICKET_TAKEN);
}

#[test]
fn concurrent_jobs_never_duplicate_tickets() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("bookings.sqlite");
    let uploads = dir.path().join("uploads");
    // Tickets 50..=100 appear in both files
    let bodies = [csv((1..=100).map(row)), csv((50..=150).map(row))];

    let mut jobs = Vec::new();
    for body in &bodies {
        let mut store = SqliteStore::open(&db).unwrap();
        let id = store.create(ImportStatus::Processing).unwrap();
        let upload = submit_upload(body.as_bytes(), &uploads).unwrap();
        jobs.push((store, id, upload));
    }

    let config = ImporterConfig::new().with_batch_size(10);
    let mapping = mapping();
    let ids: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|(store, id, upload)| {
                let config = config.clone();
                let mapping = &mapping;
                scope.spawn(move || {
                    ImportJob::new(store, config).run(&upload, mapping, id).unwrap();
                    id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let store = SqliteStore::open(&db).unwrap();
    assert_eq!(store.count_bookings().unwrap(), 150);
    let records: Vec<_> = ids.iter().map(|id| store.get(*id).unwrap()).collect();
    let successes: u64 = records.iter().map(|r| r.successes).sum();
    let rejected: usize = records.iter().map(|r| r.errors.len()).sum();
    assert_eq!(successes, 150);
    assert_eq!(rejected, 51);
    assert!(records.iter().all(|r| r.status.is_terminal()));
}

#[test]
fn deleting_an_import_keeps_its_bookings() {
    let dir = TempDir::new().unwrap();
    let mut store = SqliteStore::open_in_memory().unwrap();
    let id = store.create(ImportStatus::Processing).unwrap();
    let upload = submit_upload(csv((1..=3).map(row)).as_bytes(), dir.path()).unwrap();
    let mut job = ImportJob::new(store, ImporterConfig::new());
    job.run(&upload, &mapping(), id).unwrap();

    let mut store = job.into_store();
    store.delete(id).unwrap();

    assert!(store.get(id).is_err());
    assert_eq!(store.count_bookings().unwrap(), 3);
    assert_eq!(store.find_booking("3").unwrap().unwrap().import_id, None);

    let stats = store.booking_stats(Some("jazz")).unwrap();
    assert_eq!(stats.booking_count, 3);
    assert_eq!(stats.total_revenue, 91.5);
    assert_eq!(stats.average_age, Some(35));
    assert_eq!(stats.unique_buyers, 3);
}
