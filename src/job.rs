//! Runs one import end to end on behalf of a task runner.
//!
//! The job owns the lifecycle of the import record: it is created `processing` by whoever
//! accepted the upload, and [`ImportJob::run`] writes the single terminal outcome. The
//! uploaded file is deleted when the run ends, however it ends.

use crate::config::ImporterConfig;
use crate::encoding;
use crate::error::{ImportError, StoreError};
use crate::importer::BatchImporter;
use crate::models::{ColumnMapping, ImportId, ImportResult, ImportStatus, RowError};
use crate::store::{BookingStore, ImportStatusStore};
use indicatif::ProgressBar;
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Deletes the uploaded source file when dropped.
struct TempSource<'a> {
    path: &'a Path,
}

impl<'a> TempSource<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path }
    }
}

impl Drop for TempSource<'_> {
    fn drop(&mut self) {
        match fs::remove_file(self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed import source"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove import source")
            }
        }
    }
}

pub struct ImportJob<S> {
    store: S,
    config: ImporterConfig,
    progress: Option<ProgressBar>,
}

impl<S: BookingStore + ImportStatusStore> ImportJob<S> {
    pub fn new(store: S, config: ImporterConfig) -> Self {
        Self {
            store,
            config,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Imports `source_path` into the bookings of `import_id` and records the outcome.
    ///
    /// Import faults do not surface as `Err`: they are recorded as a `failed` import. `Err`
    /// means the outcome itself could not be written.
    pub fn run(
        &mut self,
        source_path: &Path,
        mapping: &ColumnMapping,
        import_id: ImportId,
    ) -> Result<ImportStatus, StoreError> {
        let _source = TempSource::new(source_path);

        let current = self.store.get(import_id)?;
        if current.status.is_terminal() {
            warn!(import_id = %import_id, status = %current.status, "Import already finished");
            return Err(StoreError::ImportFinished {
                id: import_id,
                status: current.status,
            });
        }
        info!(import_id = %import_id, path = %source_path.display(), "Import started");

        let (status, successes, errors) = match self.execute(source_path, mapping, import_id) {
            Ok(result) => (result.status(), result.successes, result.errors),
            Err(e) => {
                error!(import_id = %import_id, error = %e, "Import aborted");
                (ImportStatus::Failed, 0, vec![RowError::fault(e.to_string())])
            }
        };

        self.store.update(import_id, status, successes, &errors)?;
        info!(
            import_id = %import_id,
            status = %status,
            successes,
            errors = errors.len(),
            "Import finished"
        );
        Ok(status)
    }

    fn execute(
        &mut self,
        source_path: &Path,
        mapping: &ColumnMapping,
        import_id: ImportId,
    ) -> Result<ImportResult, ImportError> {
        let raw = fs::read(source_path)?;
        let utf8 = encoding::normalize(&raw)?;

        let mut importer =
            BatchImporter::new(&mut self.store, self.config.clone()).for_import(import_id);
        if let Some(progress) = &self.progress {
            importer = importer.with_progress(progress.clone());
        }
        importer.import(Cursor::new(&*utf8), mapping)
    }
}

/// Stores an accepted upload under `dir` for a later [`ImportJob::run`].
pub fn submit_upload(raw: &[u8], dir: &Path) -> Result<PathBuf, ImportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("upload_{}.csv", Uuid::new_v4()));
    fs::write(&path, raw)?;
    debug!(path = %path.display(), bytes = raw.len(), "Upload stored");
    Ok(path)
}
