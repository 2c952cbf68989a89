//! Headless driver for the scene supervisor.
//!
//! Runs one page session against a logging scene host so the mount,
//! fault and recovery paths can be observed from the terminal.

use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use scene_supervisor::config::Configuration;
use scene_supervisor::events::SceneCommand;
use scene_supervisor::platform::capability::{Capability, FixedProbe, WgpuProbe};
use scene_supervisor::supervisor::RenderSupervisor;
use scene_supervisor::tasks::recovery::RecoveryBudget;
use scene_supervisor::tasks::scene::{ScenePage, SceneHost, SurfaceCallbacks};

#[derive(Debug, Parser)]
#[command(
    name = "scene-supervisor",
    version,
    about = "Decides when decorative 3D content may render and recovers it after faults"
)]
struct Args {
    /// Path to YAML config (built-in defaults when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,
    /// Print the capability verdict and exit
    #[arg(long)]
    probe: bool,
    /// Skip the GPU probe and use this verdict instead
    #[arg(long = "fixed-capability", value_name = "BOOL")]
    fixed_capability: Option<bool>,
    /// Simulate this many context-loss events on the mounted scene
    #[arg(long = "inject-faults", value_name = "COUNT", default_value_t = 0)]
    inject_faults: u32,
    /// Delay between simulated context losses
    #[arg(
        long = "fault-interval",
        value_name = "DURATION",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    fault_interval: Duration,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level))
        .add_directive("wgpu=warn".parse()?)
        .add_directive("wgpu_hal=warn".parse()?);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

/// Callbacks of whichever scene instance is currently mounted.
#[derive(Debug, Clone, Default)]
struct LiveSurface(Arc<Mutex<Option<SurfaceCallbacks>>>);

impl LiveSurface {
    fn set(&self, callbacks: Option<SurfaceCallbacks>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = callbacks;
    }

    fn get(&self) -> Option<SurfaceCallbacks> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

struct HeadlessHost {
    live: LiveSurface,
    mounted_total: u32,
}

impl SceneHost for HeadlessHost {
    type Scene = u32;

    fn mount(&mut self, callbacks: SurfaceCallbacks) -> Result<u32> {
        self.mounted_total += 1;
        self.live.set(Some(callbacks));
        info!(instance = self.mounted_total, "3D scene mounted");
        Ok(self.mounted_total)
    }

    fn unmount(&mut self, scene: u32) {
        self.live.set(None);
        info!(instance = scene, "3D scene unmounted");
    }

    fn show_fallback(&mut self, retry_available: bool) {
        info!(retry_available, "showing static fallback");
    }
}

async fn inject_faults(live: LiveSurface, count: u32, interval: Duration, cancel: CancellationToken) {
    for n in 1..=count {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(interval) => {}
        }
        match live.get() {
            Some(callbacks) => callbacks.on_context_lost(format!("simulated fault {n}/{count}")),
            None => debug!(n, "no scene mounted; skipping simulated fault"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        probe,
        fixed_capability,
        inject_faults: fault_count,
        fault_interval,
        verbose,
    } = Args::parse();
    init_tracing(verbose)?;

    let cfg = match &config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    }
    .validated()
    .context("invalid configuration values")?;
    debug!("configuration: {cfg:#?}");

    let capability = match fixed_capability {
        Some(verdict) => Capability::new(FixedProbe(verdict)),
        None => Capability::new(WgpuProbe::new(&cfg.probe)),
    };

    if probe {
        let available = capability.resolve().await;
        println!("3d-capable: {available}");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let (command_tx, command_rx) = mpsc::channel::<SceneCommand>(4);

    // Each line on stdin presses "Retry"; EOF ends the session.
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            for line in io::stdin().lock().lines() {
                if line.is_err() || command_tx.blocking_send(SceneCommand::Retry).is_err() {
                    break;
                }
            }
            info!("stdin closed; ending session");
            cancel.cancel();
        });
    } else {
        debug!("stdin is not a terminal; manual retry disabled");
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; tearing down page");
            cancel.cancel();
        });
    }

    let supervisor = RenderSupervisor::new(cfg.supervisor.burst_window);
    let budget = RecoveryBudget::new(cfg.recovery.max_attempts);
    let live = LiveSurface::default();
    let host = HeadlessHost {
        live: live.clone(),
        mounted_total: 0,
    };

    if fault_count > 0 {
        tokio::spawn(inject_faults(live, fault_count, fault_interval, cancel.child_token()));
    }

    let page = ScenePage::new(
        host,
        capability,
        supervisor.clone(),
        budget.clone(),
        cfg.scene.clone(),
        cfg.recovery.clone(),
    );
    page.run(command_rx, cancel.clone())
        .await
        .context("scene page failed")?;

    let status = supervisor.status();
    info!(
        has_error = status.has_error,
        error_count = status.error_count,
        recovery_attempts = budget.used(),
        "session finished"
    );
    Ok(())
}
