//! Collector assembly and async control.

use std::io;
use std::sync::Arc;

use tokio::runtime::{Handle, TryCurrentError};
use tracing::{info, warn};

use sensord_core::{
    BleAdapterProbe, Collaborators, NoopWakeLock, ServiceLifecycle, StartReport, StopReport,
    SysfsWakeLock, WakeLock,
};
use sensord_types::ServiceState;

use crate::config::Config;
use crate::sink::JsonLinesSink;
use crate::sources::{battery_notifier, peripheral_notifier};

/// The daemon's collector: a [`ServiceLifecycle`] wired to sysfs sources,
/// the BLE adapter and a JSON-lines sink.
///
/// `start` and `stop` block on the worker, so the async wrappers run them on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct Collector {
    lifecycle: Arc<ServiceLifecycle>,
}

impl Collector {
    /// Build a collector from configuration.
    ///
    /// Must be called from within a tokio runtime; the sysfs pollers run as
    /// tasks on it.
    pub fn from_config(config: &Config) -> Result<Self, CollectorError> {
        let runtime = Handle::try_current()?;
        let adapter = BleAdapterProbe::new().map_err(CollectorError::Adapter)?;
        let collaborators = Collaborators {
            sink: Arc::new(JsonLinesSink::new(&config.sink.path)),
            battery: Arc::new(battery_notifier(&config.battery, runtime.clone())),
            peripheral: Arc::new(peripheral_notifier(&config.peripheral, runtime)),
            adapter: Arc::new(adapter),
        };
        Ok(Self::with_collaborators(config, collaborators))
    }

    /// Build a collector around existing collaborators.
    pub fn with_collaborators(config: &Config, collaborators: Collaborators) -> Self {
        let wake_lock: Arc<dyn WakeLock> = if config.wake_lock.enabled {
            Arc::new(SysfsWakeLock::with_paths(
                config.wake_lock.name.clone(),
                config.wake_lock.lock_path.clone(),
                config.wake_lock.unlock_path.clone(),
            ))
        } else {
            info!("Wake-lock disabled");
            Arc::new(NoopWakeLock)
        };

        let lifecycle =
            ServiceLifecycle::with_options(wake_lock, collaborators, config.lifecycle_options());
        lifecycle.set_overwrite_policy(config.collector.overwrite);
        Self {
            lifecycle: Arc::new(lifecycle),
        }
    }

    /// Start collecting.
    pub async fn start(&self) -> Result<StartReport, CollectorError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        let report = tokio::task::spawn_blocking(move || lifecycle.start()).await??;
        if report.scan.is_degraded() {
            warn!(scan = %report.scan, "Collecting without BLE scan");
        }
        Ok(report)
    }

    /// Stop collecting.
    pub async fn stop(&self) -> Result<StopReport, CollectorError> {
        let lifecycle = Arc::clone(&self.lifecycle);
        Ok(tokio::task::spawn_blocking(move || lifecycle.stop()).await??)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    /// Change the overwrite policy for the next start.
    pub fn set_overwrite(&self, overwrite: bool) {
        self.lifecycle.set_overwrite_policy(overwrite);
    }

    /// The lifecycle driven by this collector.
    pub fn lifecycle(&self) -> &ServiceLifecycle {
        &self.lifecycle
    }
}

/// Collector errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CollectorError {
    #[error("Failed to prepare BLE adapter: {0}")]
    Adapter(#[source] io::Error),
    #[error("Collector needs a tokio runtime: {0}")]
    NoRuntime(#[from] TryCurrentError),
    #[error(transparent)]
    Lifecycle(#[from] sensord_core::Error),
    #[error("Collector task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
