//! ovsnet-agent - host reconciliation daemon
//!
//! Entry point for the ovsnet-agent daemon.

use anyhow::{Context, Result};
use clap::Parser;
use ovsnet_agent::{build_driver, ReconciliationAgent};
use ovsnet_bridge::OvsBridge;
use ovsnet_common::{Agent, AgentMode, OvsNetConfig, DEFAULT_CONFIG_PATH};
use ovsnet_store::{NetStore, RedisStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Keeps the local Open vSwitch bridge in line with the network store
#[derive(Parser, Debug)]
#[command(name = "ovsnet-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log at DEBUG instead of INFO
    #[arg(short, long)]
    verbose: bool,

    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Override the agent mode (vlan, controller, tunnel-mesh)
    #[arg(long)]
    mode: Option<AgentMode>,

    /// Override the integration bridge
    #[arg(long)]
    bridge: Option<String>,
}

/// Initializes tracing; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")
}

/// Waits for SIGINT or SIGTERM. Errs only when neither can be listened for.
async fn wait_for_shutdown() -> std::io::Result<()> {
    let mut term = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            return signal::ctrl_c().await;
        }
    };
    tokio::select! {
        res = signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "Cannot listen for SIGINT");
                term.recv().await;
            }
        }
        _ = term.recv() => {}
    }
    Ok(())
}

/// Sets the returned flag on SIGINT or SIGTERM.
fn setup_signal_handlers() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown().await {
            warn!(error = %e, "Cannot listen for shutdown signals, stop the agent with SIGKILL");
            return;
        }
        info!("Received shutdown signal, stopping after the current tick");
        flag.store(true, Ordering::Relaxed);
    });

    shutdown
}

fn load_config(args: &Args) -> Result<OvsNetConfig> {
    let mut config = OvsNetConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    if let Some(mode) = args.mode {
        config.agent.mode = mode;
    }
    if let Some(bridge) = &args.bridge {
        config.bridge.integration_bridge = bridge.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    info!("--- Starting ovsnet-agent ---");
    let config = load_config(&args)?;
    info!(
        mode = config.agent.mode.as_str(),
        bridge = %config.bridge.integration_bridge,
        "Loaded configuration"
    );

    let store: Arc<dyn NetStore> = Arc::new(
        RedisStore::connect(&config.redis_url())
            .await
            .context("Failed to connect to the network store")?,
    );
    let bridge = Arc::new(OvsBridge::from_config(&config));
    let driver = build_driver(&config, store.clone())
        .await
        .context("Failed to set up agent driver")?;

    let mut agent = ReconciliationAgent::new(bridge, store, driver)
        .with_poll_interval(config.poll_interval());
    agent
        .initialize()
        .await
        .context("Failed to initialize agent")?;

    let shutdown = setup_signal_handlers();
    info!(interval = ?agent.poll_interval(), "Entering reconciliation loop");

    loop {
        agent.tick().await;
        if args.once || shutdown.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(agent.poll_interval()).await;
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }

    info!("ovsnet-agent stopped");
    Ok(())
}
