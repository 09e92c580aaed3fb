//! umnyeseti - balance and tariff monitor for the Umnye Seti subscriber portal
//!
//! Logs in to the portal, polls the account JSON on a timer and exposes the
//! normalized result as a table of read-only sensor values.

mod config;
mod cookies;
mod http;
mod issues;
mod mapper;
mod models;
mod parser;
mod poller;
mod portal;
mod registry;
mod sensors;

use anyhow::{Context, Result};
use clap::Parser;
use issues::FileIssueReporter;
use poller::MonitorHandle;
use registry::MonitorRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "umnyeseti")]
#[command(about = "Umnye Seti subscriber portal monitor", long_about = None)]
struct Args {
    /// Run in daemon mode (poll until interrupted)
    #[arg(short, long)]
    daemon: bool,

    /// Config file path (default: config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the raw state as JSON instead of sensor lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let cfg = config::Config::load(args.config.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level)),
        )
        .init();

    tracing::info!("umnyeseti v{}", env!("CARGO_PKG_VERSION"));

    let issues = Arc::new(FileIssueReporter::new(cfg.global.state_dir.clone()));
    let mut registry = MonitorRegistry::new(issues);

    for account in &cfg.accounts {
        registry
            .spawn_account(&cfg, account)
            .with_context(|| format!("Failed to set up account {}", account.id()))?;
    }

    if registry.is_empty() {
        anyhow::bail!("No accounts configured! Add [[accounts]] entries to config.toml");
    }

    let result = if args.daemon {
        run_daemon(&cfg, &registry, args.json).await
    } else {
        run_once(&cfg, &registry, args.json).await
    };

    registry.close_all().await;
    result
}

/// Wait for the first poll cycle of every account and print the outcome
async fn run_once(cfg: &config::Config, registry: &MonitorRegistry, json: bool) -> Result<()> {
    let mut failed = 0;

    for id in registry.ids() {
        let Some(handle) = registry.get(id) else {
            continue;
        };
        let state = handle.initial_state().await;
        if !state.is_ok() {
            failed += 1;
        }
        print_state(cfg, handle, &state, json)?;
    }

    if failed > 0 {
        anyhow::bail!("{} of {} accounts failed to update", failed, cfg.accounts.len());
    }
    Ok(())
}

/// Run in daemon mode - poll until Ctrl-C
async fn run_daemon(cfg: &config::Config, registry: &MonitorRegistry, json: bool) -> Result<()> {
    tracing::info!("Starting daemon mode...");
    tracing::info!("Monitoring accounts: {}", registry.ids().join(", "));
    tracing::info!("---");

    let mut watchers = tokio::task::JoinSet::new();
    for handle in registry.handles() {
        let handle = handle.clone();
        let cfg = cfg.clone();
        watchers.spawn(async move {
            let mut updates = handle.subscribe();
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                if let Err(e) = print_state(&cfg, &handle, &state, json) {
                    tracing::warn!("[{}] Failed to print state: {:#}", handle.id(), e);
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down...");

    watchers.abort_all();
    Ok(())
}

fn print_state(
    cfg: &config::Config,
    handle: &MonitorHandle,
    state: &models::State,
    json: bool,
) -> Result<()> {
    if json {
        let out = serde_json::json!({ "account": handle.id(), "state": state });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let locale = cfg
        .accounts
        .iter()
        .find(|a| a.id() == handle.id())
        .map(|a| a.locale())
        .unwrap_or_default();

    println!("[{}]", handle.id());
    for reading in sensors::project(state, locale) {
        println!("  {:<16} {}", reading.id, reading.display());
        if let Some(error) = reading.attributes.get("error").and_then(|e| e.as_str()) {
            println!("  {:<16} {}", "", error);
        }
    }
    Ok(())
}
