//! storyforge-daemon: hosts the external job poller for one database.
//!
//! Logging: `RUST_LOG` overrides the level from the config file.

use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use storyforge::config::LoggingConfig;
use storyforge::{
    load_config, Collaborators, Config, Database, DbEventLog, HttpTaskClient, LocalArtifactStore,
    LogBroadcaster, Orchestrator, TtlStatusCache,
};

#[derive(Parser, Debug)]
#[command(name = "storyforge-daemon", version, about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single poll cycle and exit.
    #[arg(long)]
    once: bool,
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("failed to install tracing subscriber")?;

    tracing_log::LogTracer::init().context("failed to bridge log records")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    init_logging(&config.logging)?;

    info!("Starting storyforge-daemon v{}", env!("CARGO_PKG_VERSION"));

    let db_path = config
        .database
        .resolved_path()
        .context("could not determine a database path; set database.path")?;
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!("Using database at {}", db_path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .max_blocking_threads(config.runner.max_blocking_threads)
        .thread_name("storyforge-runtime")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let http = Arc::new(HttpTaskClient::from_config(&config.generation)?);
    let collaborators = Collaborators {
        client: http.clone(),
        generation: http,
        artifacts: Arc::new(LocalArtifactStore::new(&config.storage.data_dir)?),
        events: Arc::new(DbEventLog::new(db.clone(), LogBroadcaster::default())),
        cache: Arc::new(TtlStatusCache::from_config(&config.cache)),
    };
    let orchestrator = Orchestrator::new(&config, db, collaborators, runtime.handle().clone())?;

    if cli.once {
        let summary = orchestrator.poller().poll_once()?;
        info!(
            checked = summary.checked,
            completed = summary.completed,
            failed = summary.failed,
            pending = summary.pending,
            errors = summary.errors,
            "Poll cycle finished"
        );
        return Ok(());
    }

    let poller = orchestrator.start_poller();

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    // Either Ctrl-C or a dropped handler ends the wait.
    let _ = stop_rx.recv();
    info!("Shutting down");
    poller.join();
    runtime.shutdown_timeout(std::time::Duration::from_secs(10));
    Ok(())
}
