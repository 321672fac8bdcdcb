//! Network Mode Daemon (netmoded)
//!
//! Run by the service manager at boot. Waits for the wireless interface to
//! join a known network and falls back to access-point mode if it does not.
//!
//! # Usage
//!
//! ```bash
//! # Boot-time decision, then exit
//! sudo netmoded run
//!
//! # Keep watching and return to client mode when possible
//! sudo netmoded watch
//!
//! # Show what the daemons would be configured with
//! netmoded --config ./netmode.toml render
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use libnetmode::error::{NetmodeError, NetmodeResult};
use libnetmode::{
    InstanceLock, NetmodeConfig, NetworkModeController, ReconcilePolicy, SystemDaemonController,
    DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Network Mode Daemon
#[derive(Parser, Debug)]
#[command(name = "netmoded")]
#[command(author = "netmode contributors")]
#[command(version)]
#[command(about = "WiFi client / access-point fallback controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decide the mode once and exit
    Run {
        /// Override the configured grace period (seconds)
        #[arg(long)]
        grace_period: Option<u64>,
    },
    /// Decide the mode, then keep reconciling until stopped
    Watch {
        /// Override the configured grace period (seconds)
        #[arg(long)]
        grace_period: Option<u64>,
    },
    /// Show the current mode inferred from running daemons
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the hostapd and dnsmasq configuration
    Render,
    /// Validate the configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if matches!(cli.command, Some(Commands::CheckConfig)) {
        NetmodeConfig::load(&cli.config)
            .with_context(|| format!("checking {}", cli.config.display()))?;
        println!("Configuration OK ({})", cli.config.display());
        return Ok(());
    }

    let config = NetmodeConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let command = cli.command.unwrap_or(if config.reconcile.enabled {
        Commands::Watch { grace_period: None }
    } else {
        Commands::Run { grace_period: None }
    });

    match command {
        Commands::Run { grace_period } => handle_run(&config, grace_period, false).await,
        Commands::Watch { grace_period } => handle_run(&config, grace_period, true).await,
        Commands::Status { json } => handle_status(&config, json).await,
        Commands::Render => handle_render(&config),
        Commands::CheckConfig => Ok(()),
    }
}

async fn handle_run(
    config: &NetmodeConfig,
    grace_override: Option<u64>,
    watch_mode: bool,
) -> anyhow::Result<()> {
    info!("Starting Network Mode Daemon (netmoded)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    #[cfg(target_os = "linux")]
    {
        let uid = unsafe { libc::getuid() };
        if uid != 0 {
            warn!("Not running as root - daemon control will likely fail");
        }
    }

    let _lock = InstanceLock::acquire(&config.controller.lock_file)?;

    let grace_period = grace_override
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.controller.grace_period());

    let daemons = SystemDaemonController::from_config(config);
    let mut controller = NetworkModeController::new(daemons, config.controller.interface.clone())
        .with_rollback(config.controller.rollback_on_failure);

    let result = controller.evaluate_and_enforce(grace_period).await?;
    info!(
        "{}: mode={} action={:?}",
        config.controller.interface, result.mode, result.action
    );
    println!("{}", serde_json::to_string(&result)?);

    if !watch_mode {
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signal_tx).await {
            error!("Signal handler error: {}", e);
        }
    });

    let policy = ReconcilePolicy {
        interval: config.reconcile.interval(),
        max_backoff: config.reconcile.max_backoff(),
    };
    info!(
        "Reconciling every {}s (back-off up to {}s)",
        policy.interval.as_secs(),
        policy.max_backoff.as_secs()
    );
    controller
        .reconcile(policy, grace_period, shutdown_rx)
        .await?;

    for transition in controller.transitions() {
        info!(
            "{} {} -> {} ({})",
            transition.timestamp.to_rfc3339(),
            transition.from,
            transition.to,
            transition.reason
        );
    }
    Ok(())
}

async fn handle_status(config: &NetmodeConfig, json: bool) -> anyhow::Result<()> {
    let daemons = SystemDaemonController::from_config(config);
    let controller = NetworkModeController::new(daemons, config.controller.interface.clone());
    let observed = controller.observe().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&observed)?);
    } else {
        println!("INTERFACE  MODE          ASSOCIATED");
        println!(
            "{:<10} {:<13} {}",
            observed.name,
            observed.mode.to_string(),
            if observed.associated { "yes" } else { "no" }
        );
    }
    Ok(())
}

fn handle_render(config: &NetmodeConfig) -> anyhow::Result<()> {
    let interface = &config.controller.interface;
    println!("# hostapd.conf");
    print!("{}", config.access_point.render(interface)?);
    println!();
    println!("# dnsmasq.conf");
    print!("{}", config.dhcp.render(interface)?);
    Ok(())
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose { "debug" } else { &cli.log_level };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("netmoded={},libnetmode={}", log_level, log_level))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}

/// Handle Unix signals (SIGTERM, SIGINT)
async fn handle_signals(shutdown: Arc<watch::Sender<bool>>) -> NetmodeResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
        NetmodeError::ServiceError(format!("Failed to register SIGTERM handler: {}", e))
    })?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
        NetmodeError::ServiceError(format!("Failed to register SIGINT handler: {}", e))
    })?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM, stopping reconciliation");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT (Ctrl+C), stopping reconciliation");
        }
    }

    let _ = shutdown.send(true);
    Ok(())
}
