//! valwatch CLI: validator liveness alerts for Cosmos SDK chains.
//!
//! Usage:
//! ```bash
//! # Track validators and send alerts until Ctrl-C
//! valwatch run --config valwatch.json
//!
//! # Check that the configured node answers
//! valwatch check --config valwatch.json
//!
//! # Manage subscriptions in the configured store
//! valwatch subscribe --config valwatch.json --operator cosmosvaloper1... --target chat-42
//! valwatch unsubscribe --config valwatch.json --operator cosmosvaloper1... --target chat-42
//! ```

mod config;
mod logging;
mod notifier;

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use valwatch_core::alert::{blocks_level, ALERT_LEVELS};
use valwatch_core::{ChainClient, Notifier, Store, Subscriptions, TrackingEngine};
use valwatch_rpc::{CosmosHttpClient, StreamSupervisor};
use valwatch_storage::{MemoryStore, SqliteStore};

use crate::config::{AppConfig, MEMORY_STORE};
use crate::notifier::{LogNotifier, WebhookNotifier};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "check" => cmd_check(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..], true).await,
        "unsubscribe" => cmd_subscribe(&args[2..], false).await,
        "info" => cmd_info(&args[2..]),
        "version" | "--version" | "-V" => {
            println!("valwatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("valwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Validator liveness alerts for Cosmos SDK chains\n");
    println!("USAGE:");
    println!("    valwatch <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    run          Track validators and deliver alerts until Ctrl-C");
    println!("    check        Query the node: latest height, validators, slashing window");
    println!("    subscribe    Add a notification target to a validator");
    println!("    unsubscribe  Remove a notification target from a validator");
    println!("    info         Print the effective configuration and alert tiers");
    println!("    version      Print version");
    println!("    help         Print this help\n");
    println!("FLAGS:");
    println!("    --config <FILE>       JSON configuration file (defaults apply without it)");
    println!("    --operator <ADDRESS>  Validator operator address  [subscribe, unsubscribe]");
    println!("    --target <ID>         Notification target id     [subscribe, unsubscribe]");
}

fn load_config(args: &[String]) -> anyhow::Result<AppConfig> {
    match parse_flag(args, "--config") {
        Some(path) => AppConfig::load(path),
        None => {
            let config = AppConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.storage.path == MEMORY_STORE {
        tracing::warn!("using in-memory store, state is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&config.storage.path)
        .await
        .with_context(|| format!("cannot open store {}", config.storage.path))?;
    Ok(Arc::new(store))
}

fn chain_client(config: &AppConfig) -> anyhow::Result<Arc<dyn ChainClient>> {
    let client = CosmosHttpClient::new(
        config.chain.lcd_url.clone(),
        config.chain.rpc_url.clone(),
        config.chain.http.clone(),
    )?;
    Ok(Arc::new(client))
}

fn notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    match &config.notifier.webhook_url {
        Some(url) if !url.is_empty() => {
            tracing::info!(url = %url, "delivering alerts via webhook");
            Ok(Arc::new(WebhookNotifier::new(url.clone(), config.notifier.timeout_ms)?))
        }
        _ => {
            tracing::info!("no webhook configured, alerts go to the log");
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    logging::init_tracing(&config.log);

    let store = open_store(&config).await?;
    let chain = chain_client(&config)?;
    let engine = Arc::new(TrackingEngine::new(
        config.tracker.clone(),
        chain,
        store,
        notifier(&config)?,
    ));

    let created = engine
        .registry()
        .bootstrap()
        .await
        .context("initial validator refresh failed")?;
    tracing::info!(created, "bootstrap complete");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = StreamSupervisor::new(config.stream.clone());
    let latest = supervisor.latest_height();
    let (blocks, stream_task) = supervisor.spawn(shutdown_rx);
    let engine_task = tokio::spawn(Arc::clone(&engine).run(blocks));

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl-C")?;
    tracing::info!(height = latest.get(), "shutting down");
    let _ = shutdown_tx.send(true);

    // The block queue closes when the supervisor exits, which ends the engine.
    stream_task.await.context("stream task failed")?;
    engine_task.await.context("engine task failed")?;
    tracing::info!(last_height = engine.last_height(), "stopped");
    Ok(())
}

async fn cmd_check(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let chain = chain_client(&config)?;

    println!("Checking {} / {}...", config.chain.rpc_url, config.chain.lcd_url);
    let start = std::time::Instant::now();
    let height = chain.latest_height().await?;
    let latency = start.elapsed();
    let validators = chain.validators().await?;
    let jailed = validators.iter().filter(|v| v.jailed).count();
    let params = chain.slashing_params().await?;

    println!("  Status:          OK");
    println!("  Latest height:   {height}");
    println!("  RPC latency:     {}ms", latency.as_millis());
    println!("  Validators:      {} ({} jailed)", validators.len(), jailed);
    println!(
        "  Slashing window: {:.0} ({} blocks × {})",
        params.slashing_window(),
        params.signed_blocks_window,
        params.min_signed_per_window
    );
    Ok(())
}

async fn cmd_subscribe(args: &[String], subscribe: bool) -> anyhow::Result<()> {
    let operator = parse_flag(args, "--operator").context("--operator is required")?;
    let target = parse_flag(args, "--target").context("--target is required")?;
    let config = load_config(args)?;

    let store = open_store(&config).await?;
    let engine = TrackingEngine::new(
        config.tracker.clone(),
        chain_client(&config)?,
        Arc::clone(&store),
        Arc::new(LogNotifier),
    );
    let subs = Subscriptions::new(engine.registry(), store, config.tracker.track_all_validators);

    if subscribe {
        let sub = subs.subscribe(&operator, &target).await?;
        println!("{target} subscribed to {operator} ({} subscriber(s))", sub.subscribers.len());
    } else {
        subs.unsubscribe(&operator, &target).await?;
        println!("{target} unsubscribed from {operator}");
    }
    let remaining = subs.subscriptions_of(&target).await?;
    println!("{target} now follows {} validator(s)", remaining.len());
    for op in remaining {
        println!("  {op}");
    }
    Ok(())
}

fn cmd_info(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    println!("{}", serde_json::to_string_pretty(&config)?);

    let window = config.tracker.initial_slashing_window;
    println!("\nAlert tiers for slashing window {window:.0}:");
    for level in 1..=ALERT_LEVELS {
        println!("  level {level}: every {} missed block(s)", blocks_level(level, window));
    }
    Ok(())
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}
