//! VerseForge - narration pipeline CLI
//!
//! The `verseforge` command turns a pre-extracted items file into narrated
//! audio and can undo everything a run created.
//!
//! ## Commands
//!
//! - `run`: narrate a batch of items and write the session record
//! - `rollback`: delete everything a previous session created

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use verseforge_core::{
    BatchOrchestrator, Catalog, ContentItem, Dispatcher, QuestIngest, RateLimiter, RetryPolicy,
    RollbackConfig, RollbackEngine, RunConfig, SessionRecord, SessionRecorder,
};
use verseforge_store::{FsObjectStore, FsRecordStore, ObjectStore, RecordStore};

#[derive(Parser)]
#[command(name = "verseforge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Concurrent narration pipeline with session rollback", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Data directory for records and audio objects
    #[arg(long, global = true, env = "VERSEFORGE_DATA_DIR", default_value = ".verseforge")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Narrate a batch of items
    Run {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Items file: JSON array of {"reference", "text"}
        #[arg(short, long)]
        items: PathBuf,

        /// Where to write the session record (default: session_record_<ts>.json)
        #[arg(short, long)]
        session_out: Option<PathBuf>,
    },

    /// Undo a previous session
    Rollback {
        /// Session record produced by `run`
        session_file: PathBuf,
    },
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

fn load_items(path: &Path) -> Result<Vec<ContentItem>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read items file {}", path.display()))?;
    let items: Vec<ContentItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Items file {} is not a valid item array", path.display()))?;
    Ok(items)
}

async fn cmd_run(
    data_dir: &Path,
    config_path: &Path,
    items_path: &Path,
    session_out: Option<PathBuf>,
) -> Result<()> {
    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config {}", config_path.display()))?;
    let config: RunConfig =
        serde_json::from_str(&raw).context("Run configuration is not valid JSON")?;
    config.validate().context("Invalid run configuration")?;

    let items = load_items(items_path)?;
    info!(items = items.len(), project = %config.project, quest = %config.quest, "starting run");

    let provider = config
        .build_provider(reqwest_client()?)
        .context("Provider setup failed")?;
    let limiter = Arc::new(RateLimiter::new(config.rate_limiter_config()));
    let dispatcher = Arc::new(Dispatcher::new(provider, limiter, RetryPolicy::default()));

    let records: Arc<dyn RecordStore> =
        Arc::new(FsRecordStore::new(data_dir).context("Failed to open record store")?);
    let objects: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(data_dir.join("objects")).context("Failed to open object store")?);
    let recorder = Arc::new(SessionRecorder::new());

    let orchestrator = Arc::new(BatchOrchestrator::new(
        dispatcher,
        records.clone(),
        objects,
        recorder.clone(),
        config.voice.clone(),
        config.run_policy(),
        config.storage_layout(),
    ));
    let catalog = Catalog::new(records, recorder.clone());
    let ingest = QuestIngest::new(catalog, orchestrator, config.language_code.clone())
        .with_tags(config.tags.clone());

    let outcome = ingest
        .run(&config.project, &config.quest, &config.language_name, items)
        .await;

    // The session record is written whether the run succeeded or not, so a
    // partial run can always be rolled back.
    let snapshot = recorder.snapshot();
    let out_path = session_out.unwrap_or_else(|| {
        PathBuf::from(format!(
            "session_record_{}.json",
            snapshot.timestamp.format("%Y%m%d_%H%M%S")
        ))
    });
    std::fs::write(&out_path, serde_json::to_string_pretty(&snapshot)?)
        .with_context(|| format!("Failed to write session record {}", out_path.display()))?;

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            warn!(session_record = %out_path.display(), "run aborted; session record written");
            return Err(e).context("Ingest failed");
        }
    };

    info!(
        succeeded = report.batch.succeeded(),
        failed = report.batch.failed(),
        skipped = report.skipped.len(),
        session_record = %out_path.display(),
        "run complete"
    );
    for failure in report.batch.results.iter().filter_map(|r| r.as_ref().err()) {
        warn!(reference = %failure.reference, error = %failure.error, "item failed");
    }
    if report.batch.failed() > 0 {
        anyhow::bail!(
            "{} of {} items failed (session record: {})",
            report.batch.failed(),
            report.batch.results.len(),
            out_path.display()
        );
    }
    Ok(())
}

async fn cmd_rollback(data_dir: &Path, session_file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(session_file)
        .with_context(|| format!("Failed to read session record {}", session_file.display()))?;
    let record: SessionRecord =
        serde_json::from_str(&raw).context("Session record is not valid JSON")?;
    if record.is_rolled_back() {
        warn!(session = %session_file.display(), "session was already rolled back");
    }

    let records: Arc<dyn RecordStore> =
        Arc::new(FsRecordStore::new(data_dir).context("Failed to open record store")?);
    let objects: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(data_dir.join("objects")).context("Failed to open object store")?);

    let engine = RollbackEngine::new(records, objects, RollbackConfig::default());
    let (consumed, report) = engine.run(&record).await;

    std::fs::write(session_file, serde_json::to_string_pretty(&consumed)?)
        .with_context(|| format!("Failed to update session record {}", session_file.display()))?;

    info!(
        deleted = report.deleted,
        already_absent = report.already_absent,
        skipped = report.skipped_preexisting,
        "rollback complete"
    );
    for failure in &report.failures {
        warn!(target = %failure.target, reason = %failure.reason, "deletion failed");
    }
    if !report.is_clean() {
        anyhow::bail!(
            "rollback finished with {} failed deletions; re-run to retry",
            report.failures.len()
        );
    }
    Ok(())
}

fn reqwest_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .context("Failed to build HTTP client")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            items,
            session_out,
        } => cmd_run(&cli.data_dir, &config, &items, session_out).await,
        Commands::Rollback { session_file } => cmd_rollback(&cli.data_dir, &session_file).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(
            &path,
            r#"[{"reference": "Gen 1:1", "text": "In the beginning"}]"#,
        )
        .unwrap();

        let items = load_items(&path).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reference, "Gen 1:1");
    }

    #[test]
    fn test_malformed_items_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, r#"{"not": "an array"}"#).unwrap();
        assert!(load_items(&path).is_err());
    }
}
