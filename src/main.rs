//! LiveTrack - live courier tracking agent
//!
//! Runs one tracking session for an order: samples position and heading,
//! keeps the live location current, and reports accepted fixes to the backend.
//!
//! # Usage
//!
//! ```bash
//! # Simulated courier for order 42
//! livetrack run --order 42 --reporter 7 --role delivery
//!
//! # External GPS feed, one JSON fix per line
//! fix-adapter | livetrack run --order 42 --reporter 7 --stdin
//!
//! # Validate a config file
//! livetrack check-config ./tracking.toml
//! ```
//!
//! # Environment Variables
//!
//! - `LIVETRACK_CONFIG`: Path to tracking.toml (default: ./tracking.toml)
//! - `LIVETRACK_BACKEND_URL`: Backend base URL override
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use livetrack::acquisition::{OrientationSensors, PositionSource, SimulatedSource, SimulationParams, StdinSource};
use livetrack::config::validation::validate_ranges;
use livetrack::delivery::DeliveryOutcome;
use livetrack::{
    ActorRole, Collaborators, FileWakeLock, HttpReporter, LiveStateBroadcast, ResourceLifecycleManager,
    SensorKind, SessionEnd, TrackingConfig, TrackingSessionController,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "livetrack")]
#[command(about = "Live courier tracking agent")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Track one order until Ctrl+C, the duration elapses, or the source ends
    Run {
        /// Order being delivered
        #[arg(long)]
        order: i64,
        /// Courier / dispatcher reporting the position
        #[arg(long)]
        reporter: i64,
        /// Actor role: pickup (dispatch) or delivery
        #[arg(long, default_value = "delivery")]
        role: ActorRole,
        /// Read JSON fixes from stdin instead of the simulated receiver
        #[arg(long)]
        stdin: bool,
        /// Stop automatically after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Config file (overrides the LIVETRACK_CONFIG search)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Backend base URL
        #[arg(long, env = "LIVETRACK_BACKEND_URL")]
        backend_url: Option<String>,
    },

    /// Parse and validate a config file, then print the effective values
    CheckConfig {
        /// Path to the file (default: the LIVETRACK_CONFIG search)
        path: Option<PathBuf>,
    },
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    LiveStateLogger,
    OutcomeLogger,
    SessionWatcher,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::LiveStateLogger => write!(f, "LiveStateLogger"),
            TaskName::OutcomeLogger => write!(f, "OutcomeLogger"),
            TaskName::SessionWatcher => write!(f, "SessionWatcher"),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

fn load_config(path: Option<&PathBuf>) -> Result<TrackingConfig> {
    let config = match path {
        Some(p) => TrackingConfig::load_from_file(p)
            .with_context(|| format!("Failed to load config from {}", p.display()))?,
        None => TrackingConfig::load(),
    };
    for w in validate_ranges(&config) {
        warn!("{}", w);
    }
    Ok(config)
}

fn check_config(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path.as_ref())?;
    config.validate()?;
    println!("{}", config.to_toml()?);
    println!("# config OK");
    Ok(())
}

// ============================================================================
// Supervised Tasks
// ============================================================================

fn spawn_live_state_logger(
    task_set: &mut JoinSet<Result<TaskName>>,
    live: &LiveStateBroadcast,
    cancel_token: CancellationToken,
) {
    let mut subscription = live.subscribe();
    task_set.spawn(async move {
        info!("[LiveStateLogger] Task starting");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                state = subscription.recv() => match state {
                    Some(state) => match state.position {
                        Some(fix) => info!(
                            "📍 {:.6}, {:.6} ±{:.0}m | heading {:.1}°",
                            fix.latitude, fix.longitude, fix.accuracy_m, state.heading_deg
                        ),
                        None => debug!("📍 no position | heading {:.1}°", state.heading_deg),
                    },
                    None => {
                        warn!("[LiveStateLogger] Subscription ended");
                        break;
                    }
                },
            }
        }
        Ok(TaskName::LiveStateLogger)
    });
}

fn spawn_outcome_logger(
    task_set: &mut JoinSet<Result<TaskName>>,
    controller: &TrackingSessionController,
    cancel_token: CancellationToken,
) {
    let mut outcomes = controller.pipeline().subscribe_outcomes();
    task_set.spawn(async move {
        info!("[OutcomeLogger] Task starting");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Ok(DeliveryOutcome::Delivered { via, .. }) => debug!(?via, "[OutcomeLogger] Fix delivered"),
                    Ok(DeliveryOutcome::Failed { order_id, .. }) => warn!(order_id, "[OutcomeLogger] Fix dropped after fallback"),
                    Ok(other) => debug!(?other, "[OutcomeLogger] Delivery outcome"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(missed = n, "[OutcomeLogger] Lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        Ok(TaskName::OutcomeLogger)
    });
}

// ============================================================================
// Supervisor
// ============================================================================

/// Monitor tasks until shutdown is requested or one of them fails.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(TaskName::SessionWatcher))) => {
                        info!("🔒 Supervisor: Session ended, shutting down");
                        cancel_token.cancel();
                        break;
                    }
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Run
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_session(
    order: i64,
    reporter: i64,
    role: ActorRole,
    stdin: bool,
    duration_secs: Option<u64>,
    config_path: Option<PathBuf>,
    backend_url: Option<String>,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut config = load_config(config_path.as_ref())?;
    if let Some(url) = backend_url {
        config.delivery.base_url = url;
    }
    config.validate()?;

    let profile = config.role(role).clone();
    info!(
        "Role: {} | Backend: {} | Primary: {} | Fallback: {}",
        role, config.delivery.base_url, profile.primary_path, profile.fallback_path
    );

    let simulated = SimulatedSource::new(SimulationParams::default());
    let sensors: Arc<dyn OrientationSensors> =
        Arc::new(simulated.sensors(&[SensorKind::RotationVector, SensorKind::AccelMag]));
    let source: Arc<dyn PositionSource> = if stdin {
        info!("📥 Input: stdin (JSON position fixes)");
        Arc::new(StdinSource::stdin())
    } else {
        info!("📥 Input: simulated receiver");
        Arc::new(simulated)
    };

    let wake_lock = Arc::new(FileWakeLock::new(&config.lifecycle.lock_dir));
    let resources = Arc::new(ResourceLifecycleManager::from_config(wake_lock, &config.lifecycle));
    let (primary, fallback) =
        HttpReporter::pair(&config.delivery, &profile).context("Failed to build HTTP client")?;
    let live = LiveStateBroadcast::default();

    let controller = TrackingSessionController::new(
        config,
        role,
        Collaborators {
            source,
            sensors,
            resources,
            live: live.clone(),
            primary: Arc::new(primary),
            fallback: Arc::new(fallback),
        },
    );

    let mut session = match controller.start(order, reporter).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("❌ Could not start tracking: {}", e);
            eprintln!("{}", e.remediation());
            return Err(e.into());
        }
    };
    info!("✓ Tracking order {} (session {})", order, session.session_id());

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_live_state_logger(&mut task_set, &live, cancel_token.clone());
    spawn_outcome_logger(&mut task_set, &controller, cancel_token.clone());
    task_set.spawn(async move {
        match session.wait_terminated().await {
            SessionEnd::Failed { reason } => warn!("[SessionWatcher] Session failed: {}", reason),
            SessionEnd::Stopped => info!("[SessionWatcher] Session stopped"),
        }
        Ok(TaskName::SessionWatcher)
    });

    if let Some(secs) = duration_secs {
        let timer_token = cancel_token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("⏱️  Duration of {}s reached", secs);
            timer_token.cancel();
        });
    }

    let result = run_supervisor(&mut task_set, cancel_token).await;

    controller.stop().await;
    task_set.shutdown().await;

    let stats = controller.pipeline().stats();
    info!(
        "📊 Deliveries: {} primary | {} fallback | {} failed | {} saturated",
        stats.delivered_primary, stats.delivered_fallback, stats.failed, stats.saturated
    );
    result
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    match args.command {
        SubCommand::CheckConfig { path } => check_config(path),
        SubCommand::Run {
            order,
            reporter,
            role,
            stdin,
            duration_secs,
            config,
            backend_url,
        } => {
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            info!("  LiveTrack - live courier tracking");
            info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

            // Graceful shutdown via Ctrl+C
            let cancel_token = CancellationToken::new();
            let shutdown_token = cancel_token.clone();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("🛑 Received Ctrl+C, initiating shutdown...");
                shutdown_token.cancel();
            });

            run_session(order, reporter, role, stdin, duration_secs, config, backend_url, cancel_token).await?;

            info!("✓ LiveTrack shutdown complete");
            Ok(())
        }
    }
}
