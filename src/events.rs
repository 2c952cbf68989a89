use std::fmt;

/// Why the rendering surface was reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCause {
    /// The platform revoked the rendering context after a successful mount.
    ContextLost { reason: String },
    /// The scene could not be instantiated at all.
    MountFailed { reason: String },
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContextLost { reason } => write!(f, "context lost: {reason}"),
            Self::MountFailed { reason } => write!(f, "mount failed: {reason}"),
        }
    }
}

/// Why a page will never attempt the 3D path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NoAdapter,
    ReducedMotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    NotMounted,
    CapabilityDenied,
    PendingMount,
    Mounted,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountStateChange {
    pub from: MountState,
    pub to: MountState,
}

/// User-driven input to a scene-hosting page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    /// The "Retry" affordance shown next to the fallback content.
    Retry,
}
