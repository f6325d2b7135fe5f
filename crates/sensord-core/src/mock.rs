//! Mock collaborators for testing.
//!
//! Each mock counts the calls made on it and supports failure injection, so
//! tests can check acquire/release and register/unregister balance without
//! real hardware.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sensord_core::mock::{MockAdapterProbe, MockNotifier, MockWakeLock, RecordingSink};
//! use sensord_core::{Collaborators, ServiceLifecycle};
//! use sensord_types::{AdapterUnavailable, SourceKind};
//!
//! let lock = Arc::new(MockWakeLock::new());
//! let sink = Arc::new(RecordingSink::new());
//! let service = ServiceLifecycle::new(
//!     lock.clone(),
//!     Collaborators {
//!         sink: sink.clone(),
//!         battery: Arc::new(MockNotifier::new(SourceKind::Battery)),
//!         peripheral: Arc::new(MockNotifier::new(SourceKind::Peripheral)),
//!         adapter: Arc::new(MockAdapterProbe::unavailable(AdapterUnavailable::NotSupported)),
//!     },
//! );
//!
//! service.start().unwrap();
//! service.stop().unwrap();
//! assert_eq!(lock.acquire_count(), lock.release_count());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use sensord_types::{AdapterUnavailable, Event, RawNotification, ScanHit, SourceKind};

use crate::scan::{AdapterProbe, AdapterStatus, DeviceCallback, ScanDriver, ScanError};
use crate::sink::{EventSink, SinkError};
use crate::sources::{NotificationSender, Notifier, RegistrationId, SourceError};
use crate::wakelock::{WakeLock, WakeLockError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A wake-lock that only counts.
#[derive(Debug, Default)]
pub struct MockWakeLock {
    held: AtomicBool,
    acquire_count: AtomicU32,
    release_count: AtomicU32,
    should_fail: AtomicBool,
}

impl MockWakeLock {
    /// Create a mock wake-lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent acquisitions fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Whether the lock is currently held.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Number of successful acquisitions.
    pub fn acquire_count(&self) -> u32 {
        self.acquire_count.load(Ordering::SeqCst)
    }

    /// Number of releases.
    pub fn release_count(&self) -> u32 {
        self.release_count.load(Ordering::SeqCst)
    }
}

impl WakeLock for MockWakeLock {
    fn tag(&self) -> &str {
        "mock"
    }

    fn acquire(&self) -> Result<(), WakeLockError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(WakeLockError::Unavailable(
                "mock wake-lock unavailable".to_string(),
            ));
        }
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> Result<(), WakeLockError> {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// A notifier whose payloads are pushed by the test through [`fire`](Self::fire).
#[derive(Debug)]
pub struct MockNotifier {
    kind: SourceKind,
    senders: Mutex<Vec<(RegistrationId, NotificationSender)>>,
    next_id: AtomicU64,
    register_count: AtomicU32,
    unregister_count: AtomicU32,
    should_fail: AtomicBool,
}

impl MockNotifier {
    /// Create a notifier for `kind`.
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            senders: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            register_count: AtomicU32::new(0),
            unregister_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
        }
    }

    /// Make subsequent registrations fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Deliver a payload to every live registration.
    ///
    /// Blocks while the queue is full. Returns how many registrations
    /// accepted it. Must not be called from inside an async runtime.
    pub fn fire(&self, payload: impl Into<RawNotification>) -> usize {
        let payload = payload.into();
        let senders: Vec<NotificationSender> =
            lock(&self.senders).iter().map(|(_, tx)| tx.clone()).collect();
        senders
            .iter()
            .filter(|tx| tx.notify(payload.clone()).is_ok())
            .count()
    }

    /// Number of registrations not yet unregistered.
    pub fn active_registrations(&self) -> usize {
        lock(&self.senders).len()
    }

    /// Number of successful `register` calls.
    pub fn register_count(&self) -> u32 {
        self.register_count.load(Ordering::SeqCst)
    }

    /// Number of `unregister` calls that removed a registration.
    pub fn unregister_count(&self) -> u32 {
        self.unregister_count.load(Ordering::SeqCst)
    }
}

impl Notifier for MockNotifier {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn register(&self, sender: NotificationSender) -> Result<RegistrationId, SourceError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SourceError::RegistrationFailed {
                kind: self.kind,
                reason: "mock registration failure".to_string(),
            });
        }
        let id = RegistrationId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.senders).push((id, sender));
        self.register_count.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn unregister(&self, id: RegistrationId) {
        let mut senders = lock(&self.senders);
        let before = senders.len();
        senders.retain(|(existing, _)| *existing != id);
        if senders.len() < before {
            self.unregister_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A scan driver whose discoveries are pushed by the test.
#[derive(Default)]
pub struct MockScanDriver {
    callback: Mutex<Option<DeviceCallback>>,
    last_callback: Mutex<Option<DeviceCallback>>,
    start_count: AtomicU32,
    stop_count: AtomicU32,
    should_fail: AtomicBool,
}

impl std::fmt::Debug for MockScanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScanDriver")
            .field("scanning", &self.is_scanning())
            .field("start_count", &self.start_count())
            .field("stop_count", &self.stop_count())
            .finish()
    }
}

impl MockScanDriver {
    /// Create an idle driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `start_discovery` calls fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Report a discovered device while discovery runs.
    pub fn emit(&self, hit: ScanHit) {
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(hit);
        }
    }

    /// Report a device through the most recent callback even if discovery
    /// has been stopped, as a platform delivering late results would.
    pub fn emit_late(&self, hit: ScanHit) {
        let callback = lock(&self.last_callback).clone();
        if let Some(callback) = callback {
            callback(hit);
        }
    }

    /// Whether discovery is running.
    pub fn is_scanning(&self) -> bool {
        lock(&self.callback).is_some()
    }

    /// Number of successful `start_discovery` calls.
    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Number of `stop_discovery` calls.
    pub fn stop_count(&self) -> u32 {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl ScanDriver for MockScanDriver {
    fn start_discovery(&self, on_device: DeviceCallback) -> Result<(), ScanError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ScanError::Driver("mock discovery failure".to_string()));
        }
        *lock(&self.last_callback) = Some(on_device.clone());
        *lock(&self.callback) = Some(on_device);
        self.start_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_discovery(&self) {
        lock(&self.callback).take();
        self.stop_count.fetch_add(1, Ordering::SeqCst);
    }
}

/// An adapter probe returning a configurable status.
pub struct MockAdapterProbe {
    status: Mutex<AdapterStatus>,
    probe_count: AtomicU32,
    delay_ms: AtomicU64,
}

impl std::fmt::Debug for MockAdapterProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAdapterProbe")
            .field("status", &*lock(&self.status))
            .field("probe_count", &self.probe_count())
            .finish()
    }
}

impl MockAdapterProbe {
    /// A probe reporting an available adapter backed by `driver`.
    pub fn available(driver: Arc<dyn ScanDriver>) -> Self {
        Self::with_status(AdapterStatus::Available(driver))
    }

    /// A probe reporting an unavailable adapter.
    pub fn unavailable(reason: AdapterUnavailable) -> Self {
        Self::with_status(AdapterStatus::Unavailable(reason))
    }

    fn with_status(status: AdapterStatus) -> Self {
        Self {
            status: Mutex::new(status),
            probe_count: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Change the status returned by later probes.
    pub fn set_status(&self, status: AdapterStatus) {
        *lock(&self.status) = status;
    }

    /// Make each probe block for `delay`, simulating a slow radio.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of probes made.
    pub fn probe_count(&self) -> u32 {
        self.probe_count.load(Ordering::SeqCst)
    }
}

impl AdapterProbe for MockAdapterProbe {
    fn probe(&self) -> AdapterStatus {
        self.probe_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        lock(&self.status).clone()
    }
}

/// A sink that records every event it accepts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    begin_calls: Mutex<Vec<bool>>,
    end_count: AtomicU32,
    should_fail: AtomicBool,
}

impl RecordingSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent submissions fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Accepted events, in submission order.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    /// Accepted events as owned `(sender, name, value)` triples.
    pub fn triples(&self) -> Vec<(String, String, String)> {
        lock(&self.events)
            .iter()
            .map(|e| {
                (
                    e.sender().to_string(),
                    e.name().to_string(),
                    e.value().to_string(),
                )
            })
            .collect()
    }

    /// Number of accepted events.
    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    /// Whether no event has been accepted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The overwrite flag of every `begin` call, in order.
    pub fn begin_calls(&self) -> Vec<bool> {
        lock(&self.begin_calls).clone()
    }

    /// Number of `end` calls.
    pub fn end_count(&self) -> u32 {
        self.end_count.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` events were accepted or `timeout` passes.
    pub fn wait_for_len(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl EventSink for RecordingSink {
    fn begin(&self, overwrite: bool) -> Result<(), SinkError> {
        lock(&self.begin_calls).push(overwrite);
        Ok(())
    }

    fn submit(&self, event: Event) -> Result<(), SinkError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("mock sink failure".to_string()));
        }
        lock(&self.events).push(event);
        Ok(())
    }

    fn end(&self) {
        self.end_count.fetch_add(1, Ordering::SeqCst);
    }
}
