mod state;

pub use state::MountSM;

use anyhow::{Context, Result};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RecoveryConfig, SceneConfig};
use crate::events::{DenialReason, FaultCause, MountState, MountStateChange, SceneCommand};
use crate::platform::capability::Capability;
use crate::supervisor::RenderSupervisor;
use crate::tasks::recovery::{self, RecoveryBudget};

/// The decorative content a page hosts.
///
/// Implementations own the actual rendering surface; the page only decides
/// when one may exist.
pub trait SceneHost: Send {
    type Scene: Send;

    /// Instantiate the scene. `callbacks` must be wired to the surface's
    /// context-loss notifications.
    fn mount(&mut self, callbacks: SurfaceCallbacks) -> Result<Self::Scene>;

    fn unmount(&mut self, scene: Self::Scene);

    /// Show static content in place of the scene.
    fn show_fallback(&mut self, retry_available: bool);
}

/// Handed to a mounted scene so it can report the health of its surface.
#[derive(Debug, Clone)]
pub struct SurfaceCallbacks {
    supervisor: RenderSupervisor,
}

impl SurfaceCallbacks {
    pub fn new(supervisor: RenderSupervisor) -> Self {
        Self { supervisor }
    }

    pub fn on_context_lost(&self, reason: impl Into<String>) {
        self.supervisor.report_error(FaultCause::ContextLost {
            reason: reason.into(),
        });
    }

    /// Informational only: recovery goes through an explicit clear.
    pub fn on_context_restored(&self) {
        info!("rendering surface restored by platform");
    }
}

/// One page visit hosting a decorative scene.
pub struct ScenePage<H: SceneHost> {
    host: H,
    capability: Capability,
    supervisor: RenderSupervisor,
    budget: RecoveryBudget,
    scene_cfg: SceneConfig,
    recovery_cfg: RecoveryConfig,
    state_tx: watch::Sender<MountState>,
}

impl<H: SceneHost> ScenePage<H> {
    pub fn new(
        host: H,
        capability: Capability,
        supervisor: RenderSupervisor,
        budget: RecoveryBudget,
        scene_cfg: SceneConfig,
        recovery_cfg: RecoveryConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(MountState::NotMounted);
        Self {
            host,
            capability,
            supervisor,
            budget,
            scene_cfg,
            recovery_cfg,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<MountState> {
        self.state_tx.subscribe()
    }

    /// Drive the page until `cancel` fires, then unmount and stop every timer.
    pub async fn run(
        self,
        mut commands: mpsc::Receiver<SceneCommand>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Self {
            host,
            capability,
            supervisor,
            budget,
            scene_cfg,
            recovery_cfg,
            state_tx,
        } = self;

        let mut page = PageRuntime {
            sm: MountSM::new(),
            host,
            scene: None,
            mount_at: None,
            mount_delay: scene_cfg.mount_delay,
            supervisor: supervisor.clone(),
            state_tx,
        };

        let admission = if scene_cfg.reduced_motion {
            Err(DenialReason::ReducedMotion)
        } else if capability.resolve().await {
            Ok(())
        } else {
            Err(DenialReason::NoAdapter)
        };
        let change = page.sm.on_start(admission);
        page.apply(change);

        if let Some(reason) = page.sm.denial() {
            info!(?reason, "3D scene disabled for this page");
            let mut commands_open = true;
            loop {
                select! {
                    _ = cancel.cancelled() => break,
                    cmd = commands.recv(), if commands_open => {
                        match cmd {
                            Some(cmd) => debug!(?cmd, "command ignored; 3D scene disabled"),
                            None => commands_open = false,
                        }
                    }
                }
            }
            return Ok(());
        }

        let mut status = supervisor.subscribe();
        let change = page.sm.on_status(status.current());
        page.apply(change);

        let recovery_cancel = cancel.child_token();
        // stops the recovery loop even if this future is dropped mid-await
        let _recovery_guard = recovery_cancel.clone().drop_guard();
        let recovery = tokio::spawn(recovery::run(
            supervisor.clone(),
            budget,
            recovery_cfg.cooldown,
            recovery_cancel.clone(),
        ));

        let mut commands_open = true;
        loop {
            let deadline = page.mount_at;
            select! {
                _ = cancel.cancelled() => break,

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    page.mount_at = None;
                    let change = page.sm.on_delay_elapsed(supervisor.status());
                    page.apply(change);
                }

                changed = status.changed() => {
                    match changed {
                        Ok(current) => {
                            let change = page.sm.on_status(current);
                            page.apply(change);
                        }
                        Err(_) => {
                            warn!("render supervisor dropped; stopping page");
                            break;
                        }
                    }
                }

                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(SceneCommand::Retry) => page.retry(),
                        None => commands_open = false,
                    }
                }
            }
        }

        recovery_cancel.cancel();
        let change = page.sm.on_teardown();
        page.apply(change);
        recovery.await.context("recovery loop panicked")?;
        Ok(())
    }
}

struct PageRuntime<H: SceneHost> {
    sm: MountSM,
    host: H,
    scene: Option<H::Scene>,
    mount_at: Option<Instant>,
    mount_delay: Duration,
    supervisor: RenderSupervisor,
    state_tx: watch::Sender<MountState>,
}

impl<H: SceneHost> PageRuntime<H> {
    fn apply(&mut self, change: Option<MountStateChange>) {
        let Some(change) = change else {
            return;
        };
        info!(from = ?change.from, to = ?change.to, "scene mount state changed");
        self.state_tx.send_replace(change.to);

        match change.to {
            MountState::PendingMount => {
                debug!(delay = ?self.mount_delay, "scene mount deferred");
                self.mount_at = Some(Instant::now() + self.mount_delay);
            }
            MountState::Mounted => self.mount(),
            MountState::Faulted => {
                self.mount_at = None;
                self.unmount();
                self.host.show_fallback(true);
            }
            MountState::CapabilityDenied => self.host.show_fallback(false),
            MountState::NotMounted => {
                self.mount_at = None;
                self.unmount();
            }
        }
    }

    fn mount(&mut self) {
        if let Some(stale) = self.scene.take() {
            warn!("replacing a scene that was still mounted");
            self.host.unmount(stale);
        }
        let callbacks = SurfaceCallbacks::new(self.supervisor.clone());
        match self.host.mount(callbacks) {
            Ok(scene) => self.scene = Some(scene),
            Err(err) => {
                warn!(error = ?err, "failed to mount 3D scene");
                self.supervisor.report_error(FaultCause::MountFailed {
                    reason: format!("{err:#}"),
                });
                let change = self.sm.on_status(self.supervisor.status());
                self.apply(change);
            }
        }
    }

    fn unmount(&mut self) {
        if let Some(scene) = self.scene.take() {
            self.host.unmount(scene);
        }
    }

    fn retry(&mut self) {
        if self.sm.current() != MountState::Faulted {
            debug!(state = ?self.sm.current(), "retry ignored outside faulted state");
            return;
        }
        info!("manual 3D retry requested");
        self.supervisor.clear_error();
        let change = self.sm.on_retry();
        self.apply(change);
    }
}
