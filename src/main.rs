use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{FuturesUnordered, StreamExt};
use guichet::config::{self, ImporterConfig};
use guichet::encoding;
use guichet::importer::BatchImporter;
use guichet::job::{self, ImportJob};
use guichet::models::{BookingField, ColumnMapping, ImportId, ImportStatus};
use guichet::sqlite::SqliteStore;
use guichet::store::ImportStatusStore;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "guichet")]
#[command(about = "Import ticketing CSV exports into a bookings database")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// SQLite database holding bookings and import records
    #[arg(long, default_value = config::DEFAULT_DATABASE_PATH, global = true)]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one CSV export and wait for the result
    Import(ImportArgs),
    /// Queue CSV exports as import jobs and run them concurrently
    Submit(SubmitArgs),
    /// Print the status report of an import job as JSON
    Status(ImportIdArgs),
    /// Delete an import record, keeping its bookings
    Delete(ImportIdArgs),
    /// Print booking statistics
    Stats(StatsArgs),
}

#[derive(Args)]
struct ImportOptions {
    /// JSON object mapping booking fields to source column headers
    #[arg(short, long)]
    mapping: PathBuf,

    /// Rows persisted per transaction
    #[arg(long, default_value_t = config::BATCH_SIZE)]
    batch_size: usize,

    /// Skip the presence check of a mandatory field the mapping leaves out (repeatable)
    #[arg(long = "waive", value_parser = parse_field)]
    waived: Vec<BookingField>,
}

impl ImportOptions {
    fn importer_config(&self) -> ImporterConfig {
        self.waived.iter().fold(
            ImporterConfig::new().with_batch_size(self.batch_size),
            |config, field| config.with_waived(*field),
        )
    }
}

#[derive(Args)]
struct ImportArgs {
    /// Path to the CSV export
    #[arg(short, long)]
    input: PathBuf,

    #[command(flatten)]
    options: ImportOptions,
}

#[derive(Args)]
struct SubmitArgs {
    /// Paths to the CSV exports (repeatable)
    #[arg(short, long, required = true)]
    input: Vec<PathBuf>,

    /// Directory where accepted uploads wait for their job (defaults to the system temp dir)
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    #[command(flatten)]
    options: ImportOptions,
}

#[derive(Args)]
struct ImportIdArgs {
    /// Import record id
    #[arg(long)]
    id: i64,
}

#[derive(Args)]
struct StatsArgs {
    /// Only count bookings whose show name contains this text (case-insensitive)
    #[arg(long)]
    show: Option<String>,
}

fn parse_field(value: &str) -> Result<BookingField, String> {
    value.parse::<BookingField>().map_err(|e| e.to_string())
}

fn load_mapping(path: &Path) -> Result<ColumnMapping> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read mapping file: {}", path.display()))?;
    ColumnMapping::from_json(&json)
        .with_context(|| format!("Invalid mapping file: {}", path.display()))
}

/// Reads an upload after checking it against the size limit.
fn read_upload(path: &Path) -> Result<Vec<u8>> {
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to stat input file: {}", path.display()))?
        .len();
    if size > config::MAX_UPLOAD_SIZE_BYTES {
        bail!(
            "{} is too large ({} bytes, limit is {} MB)",
            path.display(),
            size,
            config::MAX_UPLOAD_SIZE_MB
        );
    }
    fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

fn open_store(database: &Path) -> Result<SqliteStore> {
    SqliteStore::open(database)
        .with_context(|| format!("Failed to open database: {}", database.display()))
}

fn make_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb.set_message(msg.to_string());
    Ok(pb)
}

fn run_import(database: &Path, args: ImportArgs) -> Result<()> {
    let mapping = load_mapping(&args.options.mapping)?;
    let raw = read_upload(&args.input)?;
    let mut store = open_store(database)?;

    let start = Instant::now();
    let utf8 = encoding::normalize(&raw)
        .with_context(|| format!("Failed to decode {}", args.input.display()))?;

    let mut importer = BatchImporter::new(&mut store, args.options.importer_config())
        .with_progress(make_spinner("Importing bookings")?);
    let stats = importer.stats();
    let result = importer
        .import(Cursor::new(&*utf8), &mapping)
        .with_context(|| format!("Import of {} aborted", args.input.display()))?;
    let duration = start.elapsed();

    println!();
    println!("=== Summary ===");
    println!("Import time:        {:.2}s", duration.as_secs_f64());
    println!("Status:             {}", result.status());
    println!();
    println!("Rows read:          {}", stats.rows_read());
    println!("Bookings imported:  {}", result.successes);
    println!("Rows rejected:      {}", result.errors.len());
    println!("Batches committed:  {}", stats.batches());

    if !result.errors.is_empty() {
        println!();
        println!("=== Rejected rows ===");
        for row_error in &result.errors {
            println!(
                "{}: {}",
                serde_json::to_string(&row_error.row)?,
                row_error.messages.join("; ")
            );
        }
    }

    Ok(())
}

struct QueuedImport {
    id: ImportId,
    input: PathBuf,
    upload: PathBuf,
    store: SqliteStore,
}

async fn run_jobs(
    queued: Vec<QueuedImport>,
    mapping: Arc<ColumnMapping>,
    config: ImporterConfig,
) -> Result<Vec<(ImportId, PathBuf, ImportStatus)>> {
    let total = queued.len();
    let mut in_flight = FuturesUnordered::new();
    for queued in queued {
        let mapping = Arc::clone(&mapping);
        let config = config.clone();
        in_flight.push(tokio::task::spawn_blocking(move || {
            let QueuedImport {
                id,
                input,
                upload,
                store,
            } = queued;
            let status = ImportJob::new(store, config).run(&upload, &mapping, id);
            (id, input, status)
        }));
    }

    let mut finished = Vec::with_capacity(total);
    let mut failed = 0usize;
    while let Some(join_result) = in_flight.next().await {
        let (id, input, status) = join_result.context("Task join error")?;
        match status {
            Ok(status) => finished.push((id, input, status)),
            Err(e) => {
                failed += 1;
                warn!(import_id = %id, error = %e, "Failed to record import outcome");
                eprintln!("    FAILED: import {id} ({}): {e}", input.display());
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {total} import outcomes could not be recorded");
    }
    finished.sort_by_key(|(id, _, _)| *id);
    Ok(finished)
}

fn run_submit(database: &Path, args: SubmitArgs) -> Result<()> {
    let mapping = Arc::new(load_mapping(&args.options.mapping)?);
    let upload_dir = args
        .upload_dir
        .unwrap_or_else(|| std::env::temp_dir().join("guichet-uploads"));

    // Every file passes admission before any job is created
    let uploads = args
        .input
        .iter()
        .map(|input| Ok((input.clone(), read_upload(input)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut queued = Vec::with_capacity(uploads.len());
    for (input, raw) in uploads {
        let upload = job::submit_upload(&raw, &upload_dir)
            .with_context(|| format!("Failed to store upload in {}", upload_dir.display()))?;
        let mut store = open_store(database)?;
        let id = store.create(ImportStatus::Processing)?;
        info!(import_id = %id, file = %input.display(), "Import queued");
        queued.push(QueuedImport {
            id,
            input,
            upload,
            store,
        });
    }

    let start = Instant::now();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("guichet-import-worker")
        .build()?;
    let finished = rt.block_on(run_jobs(queued, mapping, args.options.importer_config()))?;

    println!();
    println!("=== Imports ===");
    for (id, input, status) in &finished {
        println!("{id:>6}  {status:<16} {}", input.display());
    }
    println!();
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());

    Ok(())
}

fn run_status(database: &Path, args: ImportIdArgs) -> Result<()> {
    let store = open_store(database)?;
    let record = store
        .get(ImportId(args.id))
        .with_context(|| format!("Failed to load import {}", args.id))?;
    println!("{}", serde_json::to_string_pretty(&record.report())?);
    Ok(())
}

fn run_delete(database: &Path, args: ImportIdArgs) -> Result<()> {
    let mut store = open_store(database)?;
    store
        .delete(ImportId(args.id))
        .with_context(|| format!("Failed to delete import {}", args.id))?;
    println!("Deleted import {}", args.id);
    Ok(())
}

fn run_stats(database: &Path, args: StatsArgs) -> Result<()> {
    let store = open_store(database)?;
    let stats = store.booking_stats(args.show.as_deref())?;

    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    println!();
    println!("=== Bookings ===");
    if let Some(show) = &args.show {
        println!("Show filter:        {show}");
    }
    println!("Bookings:           {}", stats.booking_count);
    println!("Total revenue:      {:.2}", stats.total_revenue);
    println!(
        "Average price:      {}",
        or_dash(stats.average_price.map(|p| format!("{p:.2}")))
    );
    println!(
        "Average age:        {}",
        or_dash(stats.average_age.map(|a| a.to_string()))
    );
    println!("Unique buyers:      {}", stats.unique_buyers);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let database = cli.database.as_path();
    let result = match cli.command {
        Commands::Import(args) => run_import(database, args),
        Commands::Submit(args) => run_submit(database, args),
        Commands::Status(args) => run_status(database, args),
        Commands::Delete(args) => run_delete(database, args),
        Commands::Stats(args) => run_stats(database, args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
