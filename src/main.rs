use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tessera::{
    archive::{Archiver, RunOutcome},
    config::{self, TesseraConfig},
    db::{DbPool, TableSpec},
    jobs, observability, storage,
};

/// CLI arguments for Tessera
#[derive(Parser, Debug)]
#[command(version, about = "Tessera table archiver", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./tessera.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Archive eligible rows once and exit (default)
    Run,
    /// Archive on the configured interval until interrupted
    Schedule,
    /// Print the cutoff and the number of eligible rows without changing anything
    Count,
    /// Initialize a new configuration file
    Init {
        /// Path to create the config file (defaults to ./tessera.toml)
        #[arg(short, long)]
        output: Option<String>,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

const DEFAULT_CONFIG_FILE: &str = "tessera.toml";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let explicit_config = args.config.as_deref();

    match args.command.unwrap_or(Command::Run) {
        Command::Init { output, force } => run_init(output, force),
        Command::Run => run_once(explicit_config).await,
        Command::Schedule => run_schedule(explicit_config).await,
        Command::Count => run_count(explicit_config).await,
    }
}

/// Resolve the config path from `--config` or the working directory.
fn resolve_config_path(explicit_path: Option<&str>) -> Result<PathBuf, String> {
    let path = PathBuf::from(explicit_path.unwrap_or(DEFAULT_CONFIG_FILE));
    if !path.exists() {
        return Err(format!(
            "Config file not found: {}\nCreate one with: tessera init",
            path.display()
        ));
    }
    Ok(path)
}

/// Load config, initialize logging and metrics, and build the archiver.
async fn bootstrap(explicit_config_path: Option<&str>) -> Archiver {
    let config_path = match resolve_config_path(explicit_config_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match TesseraConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!(
                "Failed to load config from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(1);
        }
    };

    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    tracing::info!(
        config_file = %config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Loaded configuration"
    );

    let table = match TableSpec::from_config(&config.archive.table) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let db = match DbPool::from_config(&config.database).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(backend = db.backend_name(), "Connected to database");

    let store = match storage::create_archive_store(&config.storage).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize archive storage");
            eprintln!("Error: Failed to initialize archive storage: {}", e);
            std::process::exit(1);
        }
    };

    Archiver::new(db.archive_source(table), store, config.archive)
}

async fn run_once(explicit_config_path: Option<&str>) {
    let archiver = bootstrap(explicit_config_path).await;

    match archiver.run().await {
        Ok(RunOutcome::Archived(report)) => {
            println!(
                "Archived {} rows to {} and deleted {} rows",
                report.exported, report.object_url, report.deleted
            );
        }
        Ok(RunOutcome::DryRun(estimate)) => {
            println!(
                "Dry run: {} rows dated before {} would be archived",
                estimate.eligible,
                estimate.cutoff.to_rfc3339()
            );
        }
        Ok(RunOutcome::NothingToArchive { cutoff }) => {
            println!("Nothing to archive before {}", cutoff.to_rfc3339());
        }
        Err(e) => {
            eprintln!("Error: Archive run failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_count(explicit_config_path: Option<&str>) {
    let archiver = bootstrap(explicit_config_path).await;

    match archiver.estimate(chrono::Utc::now()).await {
        Ok(estimate) => {
            println!(
                "{} rows dated before {} are eligible for archival",
                estimate.eligible,
                estimate.cutoff.to_rfc3339()
            );
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_schedule(explicit_config_path: Option<&str>) {
    let archiver = Arc::new(bootstrap(explicit_config_path).await);

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker = tokio::spawn(jobs::start_archive_worker(archiver, shutdown_rx));

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for the current run to finish...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Archive worker panicked");
        std::process::exit(1);
    }
    tracing::info!("Archive worker stopped");
}

/// Create a default configuration file.
fn run_init(output: Option<String>, force: bool) {
    let output_path = PathBuf::from(output.as_deref().unwrap_or(DEFAULT_CONFIG_FILE));

    if output_path.exists() && !force {
        eprintln!(
            "Config file already exists: {}\nUse --force to overwrite.",
            output_path.display()
        );
        std::process::exit(1);
    }

    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create directory {}: {}", parent.display(), e);
        std::process::exit(1);
    }

    if let Err(e) = std::fs::write(&output_path, config::default_config_toml()) {
        eprintln!("Failed to write config file: {}", e);
        std::process::exit(1);
    }

    println!("Created config file: {}", output_path.display());
    println!();
    println!("Set the [database] and [storage] sections, then run:");
    println!("  tessera count   # preview");
    println!("  tessera run");
}
