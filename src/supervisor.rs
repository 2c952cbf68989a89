//! App-lifetime bookkeeping for rendering faults.
//!
//! One [`RenderSupervisor`] is created per application and handed to every
//! page that hosts a scene. Pages and the recovery loop mutate it through
//! [`RenderSupervisor::report_error`] and [`RenderSupervisor::clear_error`];
//! anything that needs to dim or hide 3D content subscribes to a
//! [`StatusWatch`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::FaultCause;

pub const DEFAULT_BURST_WINDOW: Duration = Duration::from_secs(60);

/// Read-only projection of the supervisor state handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneStatus {
    pub has_error: bool,
    pub error_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct RenderStatus {
    has_error: bool,
    error_count: u32,
    last_error_at: Option<Instant>,
}

impl RenderStatus {
    fn record_failure(&mut self, now: Instant, burst_window: Duration) {
        let fresh_burst = match self.last_error_at {
            Some(last) => now.saturating_duration_since(last) > burst_window,
            None => true,
        };
        self.error_count = if fresh_burst {
            1
        } else {
            self.error_count.saturating_add(1)
        };
        self.last_error_at = Some(now);
        self.has_error = true;
    }

    fn project(&self) -> SceneStatus {
        SceneStatus {
            has_error: self.has_error,
            error_count: self.error_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSupervisor {
    status: Arc<watch::Sender<RenderStatus>>,
    burst_window: Duration,
}

impl Default for RenderSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_BURST_WINDOW)
    }
}

impl RenderSupervisor {
    pub fn new(burst_window: Duration) -> Self {
        let (status, _) = watch::channel(RenderStatus::default());
        Self {
            status: Arc::new(status),
            burst_window,
        }
    }

    pub fn report_error(&self, cause: FaultCause) {
        self.report_error_at(cause, Instant::now());
    }

    /// Record a failure observed at `now`.
    ///
    /// A failure more than one burst window after the previous one restarts
    /// the count at 1; anything closer extends the current burst.
    pub fn report_error_at(&self, cause: FaultCause, now: Instant) {
        let burst_window = self.burst_window;
        let mut snapshot = SceneStatus::default();
        self.status.send_modify(|status| {
            status.record_failure(now, burst_window);
            snapshot = status.project();
        });
        warn!(
            %cause,
            error_count = snapshot.error_count,
            "3D rendering error reported"
        );
    }

    /// Mark the rendering surface as usable again. Burst history is kept.
    pub fn clear_error(&self) {
        self.clear_error_if(|| Some(()));
    }

    /// Clear the fault only if one is active and `admit` agrees.
    ///
    /// `admit` runs under the status lock and only while `has_error` is
    /// set, so concurrent callers cannot both observe and clear the same
    /// fault.
    pub fn clear_error_if<T>(&self, admit: impl FnOnce() -> Option<T>) -> Option<T> {
        let mut admitted = None;
        self.status.send_if_modified(|status| {
            if !status.has_error {
                return false;
            }
            admitted = admit();
            if admitted.is_some() {
                status.has_error = false;
            }
            admitted.is_some()
        });
        if admitted.is_some() {
            info!("3D rendering error cleared");
        } else {
            debug!("clear skipped; no active fault or not admitted");
        }
        admitted
    }

    pub fn status(&self) -> SceneStatus {
        self.status.borrow().project()
    }

    pub fn subscribe(&self) -> StatusWatch {
        StatusWatch {
            rx: self.status.subscribe(),
        }
    }

    pub fn burst_window(&self) -> Duration {
        self.burst_window
    }
}

/// The supervisor dropped every handle; no further updates will arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorGone;

/// Subscription to supervisor status changes.
#[derive(Debug, Clone)]
pub struct StatusWatch {
    rx: watch::Receiver<RenderStatus>,
}

impl StatusWatch {
    pub fn current(&self) -> SceneStatus {
        self.rx.borrow().project()
    }

    /// Wait for the next mutation and return the status it produced.
    pub async fn changed(&mut self) -> Result<SceneStatus, SupervisorGone> {
        self.rx.changed().await.map_err(|_| SupervisorGone)?;
        Ok(self.rx.borrow_and_update().project())
    }

    /// Resolve once `has_error` is true, immediately if it already is.
    pub async fn faulted(&mut self) -> Result<SceneStatus, SupervisorGone> {
        self.wait_until(true).await
    }

    /// Resolve once `has_error` is false, immediately if it already is.
    pub async fn cleared(&mut self) -> Result<SceneStatus, SupervisorGone> {
        self.wait_until(false).await
    }

    async fn wait_until(&mut self, has_error: bool) -> Result<SceneStatus, SupervisorGone> {
        let status = self
            .rx
            .wait_for(|status| status.has_error == has_error)
            .await
            .map_err(|_| SupervisorGone)?;
        Ok(status.project())
    }
}
