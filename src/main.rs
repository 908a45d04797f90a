use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use alert_poster::bot::Bot;
use alert_poster::client::build_http_client;
use alert_poster::config::Config;
use alert_poster::engine::Engine;
use alert_poster::poster::{RedditCredentials, RedditPoster};
use alert_poster::scheduler::Scheduler;
use alert_poster::storage::{Database, DatabaseError};
use alert_poster::web;

#[derive(Parser, Debug)]
#[command(
    name = "alert-poster",
    about = "Posts Google Alert feed entries to subreddits"
)]
struct Args {
    /// Configuration file (TOML, or JSON for a .json file)
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Database file, overriding the configured one
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Do not start the web view
    #[arg(long)]
    no_web: bool,

    /// Merge a database written by the earlier alert bot before starting
    #[arg(long, value_name = "FILE")]
    import_legacy: Option<String>,
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let db_path = args.database.as_deref().unwrap_or(&config.database);
    let db = match Database::open(db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance appears to be using {}. Please stop it and try again.",
                db_path
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if let Some(legacy) = &args.import_legacy {
        let report = db
            .import_legacy(legacy)
            .await
            .with_context(|| format!("Failed to import legacy database {}", legacy))?;
        println!(
            "Imported {} posted urls and {} history rows ({} skipped)",
            report.posted, report.history, report.skipped
        );
    }

    let client = build_http_client(&config.user_agent).context("Failed to build HTTP client")?;
    let check_interval = config.check_interval();
    let Config {
        username,
        password,
        client_id,
        client_secret,
        feeds,
        resubmit,
        web: web_config,
        ..
    } = config;

    let poster = RedditPoster::new(
        client.clone(),
        RedditCredentials {
            username,
            password,
            client_id,
            client_secret,
        },
    );
    let engine = Engine::new(db.clone(), Arc::new(poster), resubmit);
    let bot = Bot::new(client, feeds, engine);
    let scheduler = Scheduler::new(check_interval);

    if args.once {
        let result = scheduler.run_once(&bot).await;
        db.close().await;
        return result.context("Cycle failed");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let web_task = if web_config.enabled && !args.no_web {
        let mut rx = shutdown_rx.clone();
        let db = db.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.changed().await;
            };
            if let Err(e) = web::serve(web_config.bind, db, shutdown).await {
                tracing::error!(error = %e, "Web view failed");
            }
        }))
    } else {
        None
    };

    let mut rx = shutdown_rx;
    let cycles = scheduler
        .run(&bot, async move {
            let _ = rx.changed().await;
        })
        .await;

    if let Some(task) = web_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Web view task ended abnormally");
        }
    }
    db.close().await;

    tracing::info!(cycles = cycles, "Stopped");
    Ok(())
}

/// Send the shutdown request once `signal` fires.
///
/// If the signal cannot be installed the sender is held forever, since a
/// dropped sender would read as a shutdown request.
async fn forward_shutdown<F>(signal: F, shutdown_tx: watch::Sender<bool>)
where
    F: std::future::Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C, running until killed");
            std::future::pending::<()>().await;
            drop(shutdown_tx);
        }
    }
}
