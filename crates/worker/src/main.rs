//! `storyreel` -- narrated video production worker.
//!
//! ```text
//! storyreel produce "<topic>" [--interactive]   research, script, review, render
//! storyreel serve                               render approved jobs until stopped
//! storyreel rerender --job <id>                 retry a job whose run failed
//! ```
//!
//! Configuration comes from the environment (and `.env`); see
//! [`WorkerConfig::from_env`]. `LOG_FORMAT=json` switches log output to JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use storyreel_core::store::JobStore;
use storyreel_db::SqlJobStore;
use storyreel_events::{EventBus, EventLogger};
use storyreel_pipeline::feedback::{AutoApprove, FeedbackSource};
use storyreel_pipeline::lifecycle::Lifecycle;
use storyreel_pipeline::studio::{ProductionOutcome, Studio};
use storyreel_worker::config::WorkerConfig;
use storyreel_worker::dispatcher::Dispatcher;
use storyreel_worker::engine;
use storyreel_worker::terminal::TerminalFeedback;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Connections kept open to the SQLite store.
const DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "storyreel", version, about = "Narrated video production pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Produce videos for a topic, start to finish.
    Produce {
        topic: String,
        /// Review each script in the terminal instead of auto-approving.
        #[arg(long)]
        interactive: bool,
    },
    /// Render approved jobs as they appear, until interrupted.
    Serve,
    /// Render a failed job again, reusing earlier scene artifacts when they
    /// are still valid.
    Rerender {
        #[arg(long)]
        job: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("Invalid configuration")?;

    let pool = storyreel_db::create_pool(&config.database_url, DB_MAX_CONNECTIONS)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    storyreel_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!(database_url = %config.database_url, "Database ready");

    let store: Arc<dyn JobStore> = Arc::new(SqlJobStore::new(pool));
    let bus = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();

    let logger = tokio::spawn(EventLogger::new(Arc::clone(&bus)).run(cancel.clone()));
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let lifecycle = Arc::new(Lifecycle::new(Arc::clone(&store), Arc::clone(&bus)));
    let runner = Arc::new(
        engine::build_runner(&config, lifecycle, Arc::clone(&bus))
            .context("Failed to configure the production engine")?,
    );

    let result = match cli.command {
        Command::Produce { topic, interactive } => {
            let writer = engine::build_writer(&config).context("`produce` needs a writer")?;
            let feedback: Arc<dyn FeedbackSource> = if interactive {
                Arc::new(TerminalFeedback::new())
            } else {
                Arc::new(AutoApprove)
            };
            let studio = Studio::new(writer, feedback, runner, config.required_forms.clone())
                .with_feedback_timeout(config.feedback_timeout)
                .with_retry(config.retry.clone());
            match studio.produce(&topic, &cancel).await {
                Ok(ProductionOutcome::Completed { job_id, runs }) => {
                    for run in runs {
                        println!("{}\t{}", run.form_factor, run.final_video.display());
                    }
                    tracing::info!(job_id, "Production finished");
                    Ok(())
                }
                Ok(ProductionOutcome::Aborted { job_id }) => {
                    println!("Job {job_id} aborted");
                    Ok(())
                }
                Err(e) => Err(anyhow::Error::new(e).context(format!("Production of '{topic}' failed"))),
            }
        }
        Command::Serve => {
            Dispatcher::new(store, runner).run(cancel.clone()).await;
            Ok(())
        }
        Command::Rerender { job } => match runner.render_job(job, &cancel).await {
            Ok(runs) => {
                for run in runs {
                    println!("{}\t{}", run.form_factor, run.final_video.display());
                }
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("Re-render of job {job} failed"))),
        },
    };

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), logger).await;
    result
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storyreel_worker=debug,storyreel_pipeline=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Cancel `cancel` on Ctrl-C, or SIGTERM on Unix.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received, cancelling in-flight work");
    cancel.cancel();
}
