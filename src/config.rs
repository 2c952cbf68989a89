use std::path::Path;
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::error;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Per-page mount gating.
    pub scene: SceneConfig,
    /// Automatic recovery after rendering faults.
    pub recovery: RecoveryConfig,
    /// Fault bookkeeping shared by every page.
    pub supervisor: SupervisorConfig,
    /// Hardware capability check.
    pub probe: ProbeConfig,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> error::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.recovery.max_attempts >= 1,
            "recovery.max-attempts must be at least 1"
        );
        ensure!(
            !self.recovery.cooldown.is_zero(),
            "recovery.cooldown must be positive"
        );
        ensure!(
            !self.supervisor.burst_window.is_zero(),
            "supervisor.burst-window must be positive"
        );
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SceneConfig {
    /// Delay between the page appearing and the scene being instantiated,
    /// keeping the mount clear of page-transition animations.
    #[serde(with = "humantime_serde")]
    pub mount_delay: Duration,
    /// Treat the 3D path as unavailable, as when the user prefers reduced motion.
    pub reduced_motion: bool,
}

impl SceneConfig {
    const fn default_mount_delay() -> Duration {
        Duration::from_millis(1000)
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            mount_delay: Self::default_mount_delay(),
            reduced_motion: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RecoveryConfig {
    /// Wait after a fault before clearing it automatically.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// Automatic clears allowed per session.
    pub max_attempts: u32,
}

impl RecoveryConfig {
    const fn default_cooldown() -> Duration {
        Duration::from_millis(2000)
    }

    const fn default_max_attempts() -> u32 {
        3
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            cooldown: Self::default_cooldown(),
            max_attempts: Self::default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SupervisorConfig {
    /// Failures further apart than this start a new burst.
    #[serde(with = "humantime_serde")]
    pub burst_window: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            burst_window: crate::supervisor::DEFAULT_BURST_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    #[default]
    LowPower,
    HighPerformance,
}

impl From<PowerPreference> for wgpu::PowerPreference {
    fn from(value: PowerPreference) -> Self {
        match value {
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProbeConfig {
    pub power_preference: PowerPreference,
    /// Count a software (CPU) adapter as capable.
    pub allow_software_fallback: bool,
}
