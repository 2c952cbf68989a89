use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::config::{PowerPreference, ProbeConfig};

/// Synchronous check for a hardware-accelerated rendering path.
///
/// Absence of support is an expected answer, so probes return `false`
/// rather than an error.
pub trait Probe: Send + Sync {
    fn probe(&self) -> bool;
}

/// Asks wgpu for an adapter, the native analogue of requesting a WebGL
/// context from a scratch canvas.
#[derive(Debug, Clone, Default)]
pub struct WgpuProbe {
    power_preference: PowerPreference,
    allow_software_fallback: bool,
}

impl WgpuProbe {
    pub fn new(cfg: &ProbeConfig) -> Self {
        Self {
            power_preference: cfg.power_preference,
            allow_software_fallback: cfg.allow_software_fallback,
        }
    }
}

impl Probe for WgpuProbe {
    fn probe(&self) -> bool {
        let instance = wgpu::Instance::default();
        let request = instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.power_preference.into(),
            compatible_surface: None,
            force_fallback_adapter: false,
        });
        let adapter = match pollster::block_on(request) {
            Ok(adapter) => adapter,
            Err(err) => {
                info!(error = %err, "no rendering adapter available");
                return false;
            }
        };

        let adapter_info = adapter.get_info();
        if adapter_info.device_type == wgpu::DeviceType::Cpu && !self.allow_software_fallback {
            info!(
                adapter = %adapter_info.name,
                backend = ?adapter_info.backend,
                "only a software adapter is available; treating as unsupported"
            );
            return false;
        }

        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "hardware rendering available"
        );
        true
    }
}

/// A probe with a predetermined answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe(pub bool);

impl Probe for FixedProbe {
    fn probe(&self) -> bool {
        self.0
    }
}

/// Memoized probe result for one page lifetime.
#[derive(Clone)]
pub struct Capability {
    probe: Arc<dyn Probe>,
    verdict: Arc<OnceLock<bool>>,
}

impl Capability {
    pub fn new(probe: impl Probe + 'static) -> Self {
        Self {
            probe: Arc::new(probe),
            verdict: Arc::new(OnceLock::new()),
        }
    }

    /// Runs the probe on first use; later calls return the cached answer.
    ///
    /// Blocks the calling thread while the probe runs. Async callers use
    /// [`Capability::resolve`].
    pub fn is_available(&self) -> bool {
        *self.verdict.get_or_init(|| {
            let available = self.probe.probe();
            debug!(available, "capability probe finished");
            available
        })
    }

    /// Like [`Capability::is_available`], but runs an uncached probe on the
    /// blocking pool so adapter enumeration cannot stall the runtime.
    pub async fn resolve(&self) -> bool {
        if let Some(available) = self.verdict.get() {
            return *available;
        }
        let capability = self.clone();
        match tokio::task::spawn_blocking(move || capability.is_available()).await {
            Ok(available) => available,
            Err(err) => {
                warn!(error = %err, "capability probe did not complete; treating as unsupported");
                false
            }
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("verdict", &self.verdict.get())
            .finish_non_exhaustive()
    }
}
