use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::RenderSupervisor;

/// Session-wide count of automatic recovery attempts.
///
/// Clones share the same counter, so a fresh page visit does not earn a
/// fresh budget; only a new session (a new budget) does.
#[derive(Debug, Clone)]
pub struct RecoveryBudget {
    used: Arc<AtomicU32>,
    max: u32,
}

impl RecoveryBudget {
    pub fn new(max: u32) -> Self {
        Self {
            used: Arc::new(AtomicU32::new(0)),
            max,
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn exhausted(&self) -> bool {
        self.used() >= self.max
    }

    /// Claim one attempt, returning its 1-based number.
    pub fn try_consume(&self) -> Option<u32> {
        let max = self.max;
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < max).then_some(used + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }
}

/// Clears supervisor faults automatically after `cooldown`, within `budget`.
///
/// Rules:
/// - Each fault waits a full cool-down before it is cleared.
/// - A fault cleared by someone else during the cool-down costs nothing,
///   including when several loops share one supervisor and budget.
/// - Repeated reports during the cool-down do not restart it.
/// - Once the budget is spent the loop only watches; manual retry is the
///   remaining way back.
pub async fn run(
    supervisor: RenderSupervisor,
    budget: RecoveryBudget,
    cooldown: Duration,
    cancel: CancellationToken,
) {
    let mut status = supervisor.subscribe();
    let mut warned_exhausted = false;

    loop {
        if !status.current().has_error {
            select! {
                _ = cancel.cancelled() => break,
                res = status.faulted() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        if budget.exhausted() {
            if !warned_exhausted {
                warn!(
                    max_attempts = budget.max(),
                    "automatic 3D recovery exhausted; waiting for manual retry"
                );
                warned_exhausted = true;
            }
            select! {
                _ = cancel.cancelled() => break,
                res = status.cleared() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            continue;
        }

        debug!(?cooldown, "scheduling 3D recovery");
        select! {
            _ = cancel.cancelled() => break,
            res = status.cleared() => {
                if res.is_err() {
                    break;
                }
                debug!("fault cleared before cool-down elapsed");
            }
            _ = sleep(cooldown) => {
                // another loop may have cleared this fault on the same tick
                match supervisor.clear_error_if(|| budget.try_consume()) {
                    Some(attempt) => info!(
                        attempt,
                        max_attempts = budget.max(),
                        "recovered 3D scene"
                    ),
                    None => debug!("fault already handled when cool-down elapsed"),
                }
            }
        }
    }

    debug!(attempts = budget.used(), "recovery loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_bounded() {
        let budget = RecoveryBudget::new(3);
        assert_eq!(budget.try_consume(), Some(1));
        assert_eq!(budget.try_consume(), Some(2));
        assert_eq!(budget.try_consume(), Some(3));
        assert_eq!(budget.try_consume(), None);
        assert!(budget.exhausted());
        assert_eq!(budget.used(), 3);
    }

    #[test]
    fn clones_share_the_counter() {
        let budget = RecoveryBudget::new(2);
        let page_copy = budget.clone();
        page_copy.try_consume();
        assert_eq!(budget.used(), 1);
    }
}
