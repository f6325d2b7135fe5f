//! sysfs-backed battery and peripheral notifiers.
//!
//! Each registration runs one polling task on the tokio runtime the notifier
//! was created with. The task reads a small text file every interval and
//! pushes a payload whenever the value changes. The first successful read of
//! a registration is always pushed.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensord_core::{NotificationSender, Notifier, RegistrationId, SourceError};
use sensord_types::{BatteryPayload, PayloadError, PeripheralPayload, RawNotification, SourceKind};

use crate::config::{BatteryConfig, PeripheralConfig};

/// Errors raised while reading a source file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReadError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    /// The file content is not a valid payload.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// The blocking read task did not complete.
    #[error("read task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

type Reader = dyn Fn() -> Result<RawNotification, ReadError> + Send + Sync;

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A [`Notifier`] that polls a reader and pushes changed values.
pub struct PollingNotifier {
    kind: SourceKind,
    interval: Duration,
    runtime: Handle,
    read: Option<Arc<Reader>>,
    polls: Mutex<HashMap<RegistrationId, PollTask>>,
    next_id: AtomicU64,
}

impl PollingNotifier {
    /// Create a notifier for `kind` that calls `read` every `interval`.
    ///
    /// Polling tasks are spawned on `runtime`.
    pub fn new<F>(kind: SourceKind, interval: Duration, runtime: Handle, read: F) -> Self
    where
        F: Fn() -> Result<RawNotification, ReadError> + Send + Sync + 'static,
    {
        Self::build(kind, interval, runtime, Some(Arc::new(read)))
    }

    /// Create a notifier that accepts registrations but never polls.
    pub fn idle(kind: SourceKind, runtime: Handle) -> Self {
        Self::build(kind, Duration::ZERO, runtime, None)
    }

    fn build(kind: SourceKind, interval: Duration, runtime: Handle, read: Option<Arc<Reader>>) -> Self {
        Self {
            kind,
            interval,
            runtime,
            read,
            polls: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of registrations whose polling task is still running.
    pub fn active_polls(&self) -> usize {
        self.lock_polls()
            .values()
            .filter(|poll| !poll.handle.is_finished())
            .count()
    }

    fn lock_polls(&self) -> MutexGuard<'_, HashMap<RegistrationId, PollTask>> {
        self.polls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PollingNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingNotifier")
            .field("kind", &self.kind)
            .field("interval", &self.interval)
            .field("idle", &self.read.is_none())
            .field("active_polls", &self.active_polls())
            .finish()
    }
}

impl Notifier for PollingNotifier {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn register(&self, sender: NotificationSender) -> Result<RegistrationId, SourceError> {
        let id = RegistrationId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let Some(read) = self.read.as_ref().map(Arc::clone) else {
            debug!(source = %self.kind, "Source disabled; registered without polling");
            return Ok(id);
        };

        let cancel = CancellationToken::new();
        let handle = self.runtime.spawn(poll(
            self.kind,
            self.interval,
            read,
            sender,
            cancel.clone(),
        ));
        self.lock_polls().insert(id, PollTask { cancel, handle });
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        if let Some(poll) = self.lock_polls().remove(&id) {
            poll.cancel.cancel();
        }
    }
}

impl Drop for PollingNotifier {
    fn drop(&mut self) {
        for (_, poll) in self.lock_polls().drain() {
            poll.cancel.cancel();
        }
    }
}

async fn poll(
    kind: SourceKind,
    period: Duration,
    read: Arc<Reader>,
    sender: NotificationSender,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<RawNotification> = None;
    let mut failing = false;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // sysfs reads are synchronous; keep them off the async workers.
        let reader = Arc::clone(&read);
        let result = match tokio::task::spawn_blocking(move || reader()).await {
            Ok(result) => result,
            Err(e) => Err(ReadError::from(e)),
        };

        match result {
            Ok(notification) => {
                if failing {
                    info!(source = %kind, "Source readable again");
                    failing = false;
                }
                if last.as_ref() == Some(&notification) {
                    continue;
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    sent = sender.notify_async(notification.clone()) => {
                        if sent.is_err() {
                            debug!(source = %kind, "Queue closed; poller exiting");
                            break;
                        }
                    }
                }
                last = Some(notification);
            }
            Err(e) => {
                // Warn on the first failure only.
                if !failing {
                    warn!(source = %kind, error = %e, "Failed to read source");
                    failing = true;
                }
            }
        }
    }
}

fn read_trimmed(path: &Path) -> Result<String, ReadError> {
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Read the battery level and plugged state.
///
/// `plugged` comes from the AC `online` file; when that file does not
/// exist the battery's own `status` is used (`Charging` or `Full` count as
/// plugged).
pub fn read_battery(supply_dir: &Path, ac_online_path: &Path) -> Result<BatteryPayload, ReadError> {
    let level = read_trimmed(&supply_dir.join("capacity"))?;
    let plugged = match read_trimmed(ac_online_path) {
        Ok(online) => online,
        Err(ReadError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            let status = read_trimmed(&supply_dir.join("status"))?;
            match status.as_str() {
                "Charging" | "Full" => "1".to_string(),
                _ => "0".to_string(),
            }
        }
        Err(e) => return Err(e),
    };
    Ok(BatteryPayload::from_text(&level, &plugged)?)
}

/// Read the peripheral key state.
pub fn read_key_state(state_path: &Path) -> Result<PeripheralPayload, ReadError> {
    let state = read_trimmed(state_path)?;
    Ok(PeripheralPayload::from_text(&state)?)
}

/// Battery notifier polling a power-supply directory.
pub fn battery_notifier(config: &BatteryConfig, runtime: Handle) -> PollingNotifier {
    let supply_dir = config.supply_dir.clone();
    let ac_online_path = config.ac_online_path.clone();
    PollingNotifier::new(SourceKind::Battery, config.poll_interval(), runtime, move || {
        read_battery(&supply_dir, &ac_online_path).map(RawNotification::from)
    })
}

/// Peripheral notifier polling a key-state file.
///
/// When the peripheral is disabled the notifier registers but never polls.
pub fn peripheral_notifier(config: &PeripheralConfig, runtime: Handle) -> PollingNotifier {
    match config.state_path.clone().filter(|_| config.enabled) {
        Some(path) => PollingNotifier::new(
            SourceKind::Peripheral,
            config.poll_interval(),
            runtime,
            move || read_key_state(&path).map(RawNotification::from),
        ),
        None => PollingNotifier::idle(SourceKind::Peripheral, runtime),
    }
}
