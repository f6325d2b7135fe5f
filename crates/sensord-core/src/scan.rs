//! Time-windowed wireless device scanning.
//!
//! A [`ScanSession`] runs discovery on a [`ScanDriver`] for a bounded window
//! and forwards each discovered device to a callback. The window ends either
//! when it elapses or when [`ScanSession::stop`] is called, whichever comes
//! first. The window deadline is a task on the tokio runtime the session was
//! created with.
//!
//! Driver callbacks are gated by the session: once `stop` returns, no further
//! device is forwarded, even if the platform keeps delivering late results.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sensord_core::mock::MockScanDriver;
//! use sensord_core::ScanSession;
//! use sensord_types::ScanHit;
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let driver = Arc::new(MockScanDriver::new());
//! let session = ScanSession::new(driver.clone(), runtime.handle().clone(), |hit| {
//!     println!("{}", hit.address)
//! });
//! session.start(Duration::from_secs(5)).unwrap();
//! driver.emit(ScanHit::new("AA:BB:CC:DD:EE:FF", -60));
//! session.stop();
//! assert!(!driver.is_scanning());
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensord_types::{AdapterUnavailable, ScanHit};

use crate::error::{Error, Result};

/// Default scan window.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_millis(1000);

/// Callback a driver invokes for each discovered device.
pub type DeviceCallback = Arc<dyn Fn(ScanHit) + Send + Sync>;

/// Errors reported by scan drivers and adapter probes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// Discovery could not be started or failed while running.
    #[error("scan driver error: {0}")]
    Driver(String),

    /// The adapter failed in a way not covered by [`AdapterUnavailable`].
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Platform discovery backend.
///
/// Both methods may block; they are never called from inside the runtime's
/// async context.
pub trait ScanDriver: Send + Sync {
    /// Begin discovery, invoking `on_device` for every device seen.
    fn start_discovery(&self, on_device: DeviceCallback) -> std::result::Result<(), ScanError>;

    /// End discovery. Must be safe to call when discovery is not running.
    fn stop_discovery(&self);
}

/// Result of probing the wireless adapter.
#[derive(Clone)]
pub enum AdapterStatus {
    /// The adapter is usable; scanning goes through this driver.
    Available(Arc<dyn ScanDriver>),
    /// The adapter cannot scan right now.
    Unavailable(AdapterUnavailable),
}

impl fmt::Debug for AdapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterStatus::Available(_) => f.write_str("Available"),
            AdapterStatus::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

/// Checks whether the wireless adapter can be used.
pub trait AdapterProbe: Send + Sync {
    /// Probe the adapter. Called once per collection session.
    fn probe(&self) -> AdapterStatus;
}

#[derive(Default)]
struct SessionState {
    active: bool,
    generation: u64,
    window: Option<CancellationToken>,
}

struct SessionInner {
    driver: Arc<dyn ScanDriver>,
    on_device: Box<dyn Fn(ScanHit) + Send + Sync>,
    state: Mutex<SessionState>,
    // Serializes driver start/stop with the state change that triggers it.
    // Callbacks only take `state`, so a driver may call back while held.
    driver_ops: Mutex<()>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_driver(&self) -> MutexGuard<'_, ()> {
        self.driver_ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forward a hit if `generation` is still the active window.
    ///
    /// The lock is held while the callback runs so `stop` cannot return
    /// while a hit is being forwarded.
    fn deliver(&self, generation: u64, hit: ScanHit) {
        let state = self.lock();
        if state.active && state.generation == generation {
            (self.on_device)(hit);
        }
    }

    /// Close window `generation` if it is still the open one.
    fn close(&self, generation: Option<u64>) -> bool {
        let _driver = self.lock_driver();
        {
            let mut state = self.lock();
            if !state.active || generation.is_some_and(|g| g != state.generation) {
                return false;
            }
            state.active = false;
            if let Some(window) = state.window.take() {
                window.cancel();
            }
        }
        self.driver.stop_discovery();
        true
    }
}

/// One bounded discovery window over a [`ScanDriver`].
///
/// A session can be restarted after it stops; each start opens a new window.
pub struct ScanSession {
    inner: Arc<SessionInner>,
    runtime: Handle,
}

impl ScanSession {
    /// Create an idle session that forwards hits to `on_device`.
    ///
    /// Window deadlines run as tasks on `runtime`.
    pub fn new<F>(driver: Arc<dyn ScanDriver>, runtime: Handle, on_device: F) -> Self
    where
        F: Fn(ScanHit) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SessionInner {
                driver,
                on_device: Box::new(on_device),
                state: Mutex::new(SessionState::default()),
                driver_ops: Mutex::new(()),
            }),
            runtime,
        }
    }

    /// Start discovery for `window`.
    ///
    /// Returns [`Error::AlreadyActive`] if a window is already open and
    /// [`Error::Scan`] if the driver refuses to start.
    pub fn start(&self, window: Duration) -> Result<()> {
        let _driver = self.inner.lock_driver();
        let (generation, token) = {
            let mut state = self.inner.lock();
            if state.active {
                return Err(Error::AlreadyActive);
            }
            state.active = true;
            state.generation += 1;
            let token = CancellationToken::new();
            state.window = Some(token.clone());
            (state.generation, token)
        };

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let callback: DeviceCallback = Arc::new(move |hit| {
            if let Some(inner) = weak.upgrade() {
                inner.deliver(generation, hit);
            }
        });

        if let Err(e) = self.inner.driver.start_discovery(callback) {
            let mut state = self.inner.lock();
            state.active = false;
            state.window = None;
            warn!("Failed to start discovery: {e}");
            return Err(e.into());
        }

        let deadline = tokio::time::Instant::now() + window;
        let weak = Arc::downgrade(&self.inner);
        self.runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    // Drivers may block, so the window is closed off the runtime.
                    let closed = tokio::task::spawn_blocking(move || {
                        weak.upgrade().is_some_and(|inner| inner.close(Some(generation)))
                    })
                    .await;
                    if matches!(closed, Ok(true)) {
                        info!("Scan window elapsed");
                    }
                }
            }
        });
        debug!(window_ms = window.as_millis() as u64, "Scan window opened");
        Ok(())
    }

    /// Stop discovery. A no-op when no window is open.
    ///
    /// After this returns no further hits are forwarded.
    pub fn stop(&self) {
        if self.inner.close(None) {
            info!("Scan stopped");
        }
    }

    /// Whether a discovery window is open.
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockScanDriver;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Instant;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_time()
            .build()
            .unwrap()
    }

    fn counting_session(
        driver: Arc<dyn ScanDriver>,
        runtime: &tokio::runtime::Runtime,
    ) -> (ScanSession, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let session = ScanSession::new(driver, runtime.handle().clone(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (session, hits)
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Wraps the mock driver with a slow `stop_discovery`.
    struct SlowStopDriver {
        inner: MockScanDriver,
        stopping: AtomicBool,
        delay: Duration,
    }

    impl ScanDriver for SlowStopDriver {
        fn start_discovery(&self, on_device: DeviceCallback) -> std::result::Result<(), ScanError> {
            self.inner.start_discovery(on_device)
        }

        fn stop_discovery(&self) {
            self.stopping.store(true, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.inner.stop_discovery();
        }
    }

    #[test]
    fn test_start_forwards_hits() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, hits) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_secs(30)).unwrap();
        assert!(session.is_active());
        assert!(driver.is_scanning());

        driver.emit(ScanHit::new("11:22:33:44:55:66", -70));
        driver.emit(ScanHit::new("11:22:33:44:55:67", -71));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_start_twice_is_already_active() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, _) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_secs(30)).unwrap();
        assert!(matches!(
            session.start(Duration::from_secs(30)),
            Err(Error::AlreadyActive)
        ));
        assert_eq!(driver.start_count(), 1);
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, _) = counting_session(driver.clone(), &rt);
        session.stop();
        assert_eq!(driver.stop_count(), 0);
    }

    #[test]
    fn test_no_hits_after_stop() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, hits) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_secs(30)).unwrap();
        driver.emit(ScanHit::new("AA:AA:AA:AA:AA:AA", -40));
        session.stop();

        // A late platform callback arriving after stop is dropped.
        driver.emit_late(ScanHit::new("BB:BB:BB:BB:BB:BB", -41));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!session.is_active());
        assert_eq!(driver.stop_count(), 1);
    }

    #[test]
    fn test_window_expiry_stops_discovery() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, hits) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_millis(30)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !session.is_active()));
        assert!(wait_until(Duration::from_secs(2), || !driver.is_scanning()));

        driver.emit_late(ScanHit::new("CC:CC:CC:CC:CC:CC", -50));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Stop after expiry does not stop the driver a second time.
        session.stop();
        assert_eq!(driver.stop_count(), 1);
    }

    #[test]
    fn test_stop_cancels_pending_window() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, _) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_millis(50)).unwrap();
        session.stop();
        session.start(Duration::from_secs(30)).unwrap();

        // The first window's deadline passes without touching the second.
        thread::sleep(Duration::from_millis(150));
        assert!(session.is_active());
        assert!(driver.is_scanning());
        assert_eq!(driver.stop_count(), 1);
    }

    #[test]
    fn test_restart_after_expiry() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        let (session, hits) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_millis(10)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !session.is_active()));

        session.start(Duration::from_secs(30)).unwrap();
        driver.emit(ScanHit::new("DD:DD:DD:DD:DD:DD", -55));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(driver.start_count(), 2);
    }

    #[test]
    fn test_restart_during_expiry_keeps_new_window_scanning() {
        let rt = runtime();
        let driver = Arc::new(SlowStopDriver {
            inner: MockScanDriver::new(),
            stopping: AtomicBool::new(false),
            delay: Duration::from_millis(100),
        });
        let (session, _) = counting_session(driver.clone(), &rt);

        session.start(Duration::from_millis(10)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || driver
            .stopping
            .load(Ordering::SeqCst)));

        // Expiry is inside stop_discovery; a restart waits for it to finish
        // and the new window stays live.
        session.start(Duration::from_secs(30)).unwrap();
        assert!(session.is_active());
        assert!(driver.inner.is_scanning());
        thread::sleep(Duration::from_millis(150));
        assert!(session.is_active());
        assert!(driver.inner.is_scanning());
        assert_eq!(driver.inner.start_count(), 2);
    }

    #[test]
    fn test_driver_failure_leaves_session_idle() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        driver.set_should_fail(true);
        let (session, _) = counting_session(driver.clone(), &rt);

        let err = session.start(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, Error::Scan(ScanError::Driver(_))));
        assert!(!session.is_active());
    }

    #[test]
    fn test_drop_stops_discovery() {
        let rt = runtime();
        let driver = Arc::new(MockScanDriver::new());
        {
            let (session, _) = counting_session(driver.clone(), &rt);
            session.start(Duration::from_secs(30)).unwrap();
        }
        assert!(!driver.is_scanning());
    }
}
