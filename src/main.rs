//! Presence attendance agent
//!
//! Watches the Bluetooth log for a tracked device and registers check-in and
//! check-out on the attendance site on the user's behalf.
//!
//! Module structure:
//! - `domain/` - Core types (ticks, actions, outcomes, status)
//! - `io/` - External interfaces (proximity log, browser, login, notifications, HTTP)
//! - `services/` - Business logic (signal tiers, retry, executor, state machine)
//! - `infra/` - Infrastructure (Config, Metrics, Clock)

use clap::Parser;
use presence_attendance::infra::{Config, Metrics, SystemClock};
use presence_attendance::io::{
    start_control_server, CommandSource, ControlContext, FormLogin, LogNotifier, Notifier,
    OsascriptNotifier, PresenceObserver, WebDriverBrowser,
};
use presence_attendance::services::{ActionExecutor, AttendanceMachine};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Presence-triggered attendance agent
#[derive(Parser, Debug)]
#[command(name = "presence-attendance", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug to see every record and strategy
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "presence-attendance starting");

    let args = Args::parse();
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path)?.with_env_overrides();

    info!(
        config_file = %config.config_file(),
        target_id = %config.target_id(),
        work_start_hour = %config.work_start_hour(),
        work_end_hour = %config.work_end_hour(),
        forced_checkout_hour = %config.forced_checkout_hour(),
        presence_enabled = %config.presence_enabled(),
        webdriver = %config.webdriver_endpoint(),
        server_port = %config.server_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let clock = Arc::new(SystemClock);

    let notifier: Arc<dyn Notifier> = if config.notify_enabled() {
        Arc::new(OsascriptNotifier)
    } else {
        Arc::new(LogNotifier)
    };

    let browser = Arc::new(WebDriverBrowser::new(&config)?);
    let login = Arc::new(FormLogin::new(&config));
    let executor = Arc::new(ActionExecutor::new(&config, browser, login, metrics.clone()));

    let (machine, handle) =
        AttendanceMachine::new(&config, executor, notifier, clock.clone(), metrics.clone());

    // Bounded tick channel; ticks are rare after de-duplication
    let (tick_tx, tick_rx) = mpsc::channel(256);
    // Latest sighting of the device, whatever its signal quality
    let (seen_tx, seen_rx) = watch::channel(None);

    if config.presence_enabled() {
        let source = Arc::new(CommandSource::new(&config));
        let observer = PresenceObserver::new(&config, source, clock, metrics.clone());
        let observer_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            observer.run(tick_tx, seen_tx, observer_shutdown).await;
        });
    } else {
        info!("presence_disabled_control_plane_only");
        drop(tick_tx);
        drop(seen_tx);
    }

    if config.server_enabled() {
        let ctx = ControlContext {
            handle: handle.clone(),
            metrics: metrics.clone(),
            device_id: Arc::new(config.target_id().to_string()),
            presence_enabled: config.presence_enabled(),
        };
        let port = config.server_port();
        let server_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_control_server(port, ctx, server_shutdown).await {
                tracing::error!(error = %e, "control server error");
            }
        });
    }

    // Periodic metrics summary (lock-free reads)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Run the state machine until shutdown
    machine.run(tick_rx, seen_rx, shutdown_rx).await;

    info!("presence-attendance shutdown complete");
    Ok(())
}
