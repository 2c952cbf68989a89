use crate::events::{DenialReason, MountState, MountStateChange};
use crate::supervisor::SceneStatus;

/// Per-page mount state machine. Side effects are left to the caller.
pub struct MountSM {
    state: MountState,
    denial: Option<DenialReason>,
}

impl Default for MountSM {
    fn default() -> Self {
        Self::new()
    }
}

impl MountSM {
    pub fn new() -> Self {
        Self {
            state: MountState::NotMounted,
            denial: None,
        }
    }

    pub fn current(&self) -> MountState {
        self.state
    }

    pub fn denial(&self) -> Option<DenialReason> {
        self.denial
    }

    pub fn on_start(&mut self, admission: Result<(), DenialReason>) -> Option<MountStateChange> {
        if self.state != MountState::NotMounted {
            return None;
        }
        match admission {
            Ok(()) => self.goto(MountState::PendingMount),
            Err(reason) => {
                self.denial = Some(reason);
                self.goto(MountState::CapabilityDenied)
            }
        }
    }

    pub fn on_delay_elapsed(&mut self, status: SceneStatus) -> Option<MountStateChange> {
        if self.state != MountState::PendingMount {
            return None;
        }
        if status.has_error {
            self.goto(MountState::Faulted)
        } else {
            self.goto(MountState::Mounted)
        }
    }

    pub fn on_status(&mut self, status: SceneStatus) -> Option<MountStateChange> {
        match (self.state, status.has_error) {
            (MountState::Mounted | MountState::PendingMount, true) => {
                self.goto(MountState::Faulted)
            }
            (MountState::Faulted, false) => self.goto(MountState::PendingMount),
            _ => None,
        }
    }

    /// Manual retry; the caller clears the supervisor fault first.
    pub fn on_retry(&mut self) -> Option<MountStateChange> {
        if self.state == MountState::Faulted {
            return self.goto(MountState::PendingMount);
        }
        None
    }

    pub fn on_teardown(&mut self) -> Option<MountStateChange> {
        if self.state == MountState::CapabilityDenied {
            return None;
        }
        self.goto(MountState::NotMounted)
    }

    fn goto(&mut self, to: MountState) -> Option<MountStateChange> {
        if self.state == to {
            return None;
        }
        let ch = MountStateChange {
            from: self.state,
            to,
        };
        self.state = to;
        Some(ch)
    }
}
