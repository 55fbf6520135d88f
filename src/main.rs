//! CLI entry point for the mediaflow job engine.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use mediaflow_core::engine::Admission;
use mediaflow_core::{ContentKind, Engine, EngineConfig, EngineError};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, SubmitArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so command output on stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let mut config = EngineConfig::load(args.config.as_deref()).context("cannot load config")?;
    if let Some(root) = &args.data_dir {
        config = config.rooted_at(root);
    }

    let engine = Engine::open(config).await.map_err(client_error)?;
    run(&engine, args.command).await
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Serve => serve(engine).await,
        Command::Submit(submit) => submit_job(engine, &submit).await,
        Command::Status { job_id } => {
            let details = engine.get_job(&job_id).await.map_err(client_error)?;
            let logs = engine.job_logs(&job_id).await.map_err(client_error)?;
            print_json(&serde_json::json!({
                "job": details.job,
                "media": details.media,
                "logs": logs,
            }))
        }
        Command::Cancel { job_id } => {
            let outcome = engine.cancel(&job_id).await.map_err(client_error)?;
            print_json(&serde_json::json!({ "job_id": job_id, "outcome": outcome }))
        }
        Command::Retry { job_id } => {
            let job = engine.retry(&job_id).await.map_err(client_error)?;
            print_json(&job)
        }
        Command::List => print_json(&engine.list_active().await.map_err(client_error)?),
        Command::History(page) => print_json(
            &engine
                .history(page.page, page.size)
                .await
                .map_err(client_error)?,
        ),
        Command::Search { keyword, page } => print_json(
            &engine
                .search_media(&keyword, page.page, page.size)
                .await
                .map_err(client_error)?,
        ),
        Command::Disk => {
            let report = engine.disk_space_info().await.map_err(client_error)?;
            for warning in &report.warnings {
                warn!(warning = %warning, "disk check");
            }
            print_json(&report)
        }
        Command::Stats => print_json(&engine.stats().await.map_err(client_error)?),
        Command::Cleanup { days } => print_json(&engine.cleanup(days).await.map_err(client_error)?),
        Command::Formats { kind } => {
            let kind: ContentKind = kind.parse().map_err(|e: String| anyhow!(e))?;
            print_json(&engine.available_formats(kind))
        }
    }
}

/// Runs the scheduler until Ctrl-C, then waits for running workers.
async fn serve(engine: &Engine) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = engine.scheduler();
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    info!("shutdown requested");
    if shutdown_tx.send(true).is_err() {
        debug!("scheduler already stopped");
    }
    handle.await.context("scheduler task panicked")?;
    Ok(())
}

async fn submit_job(engine: &Engine, submit: &SubmitArgs) -> Result<()> {
    let job = engine
        .submit(submit.to_request())
        .await
        .map_err(client_error)?;
    info!(job_id = %job.id, "job submitted");
    if !submit.wait {
        return print_json(&job);
    }

    let scheduler = engine.scheduler();
    let backoff = Duration::from_secs(engine.config().throttle_backoff_secs);
    loop {
        let admission = scheduler.tick().await.map_err(client_error)?;
        scheduler.wait_idle().await;
        let details = engine.get_job(&job.id).await.map_err(client_error)?;
        if details.job.status().is_terminal() {
            return print_json(&details);
        }
        if let Admission::Throttled { reason } = admission {
            warn!(reason = %reason, "waiting for resources");
            tokio::time::sleep(backoff).await;
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Reduces an engine error to its caller-facing form.
fn client_error(error: EngineError) -> anyhow::Error {
    anyhow!("{}", error.to_client())
}
