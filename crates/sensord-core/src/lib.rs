//! Lifecycle and event collection for the sensord background collector.
//!
//! This crate owns the hard part of the daemon: a start/stop state machine
//! that holds a wake-lock while it runs, and a single collection worker that
//! multiplexes several asynchronous event sources into one ordered stream of
//! events handed to a sink.
//!
//! # Sources
//!
//! | Source | Contract | Event |
//! |--------|----------|-------|
//! | Battery | [`Notifier`] | `BatteryChanged` / `Level;Plugged` = `<level>;<plugged>` |
//! | Peripheral | [`Notifier`] | `SensorTag` / `Key state` = `<key_state>` |
//! | Scan | [`AdapterProbe`] + [`ScanDriver`] | `BleDevicesScanner` / `<address>` = `<rssi>` |
//!
//! Every source pushes raw payloads into one bounded queue through a
//! [`NotificationSender`]. The worker drains that queue on its own thread,
//! normalizes each payload into an [`Event`](sensord_types::Event) and
//! submits it to the [`EventSink`] before taking the next one. Events from
//! one source therefore reach the sink in the order the source produced
//! them.
//!
//! # Guarantees
//!
//! - A wake-lock and a worker exist exactly while the service is not
//!   stopped, across any number of start/stop cycles. A worker that misses
//!   the stop timeout keeps the next `start` waiting, so two workers never
//!   run at once.
//! - After `stop` returns no source is registered and nothing more reaches
//!   the sink.
//! - An unusable wireless adapter only disables scanning; it is reported as
//!   [`ScanAvailability::Degraded`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensord_core::mock::{MockNotifier, RecordingSink};
//! use sensord_core::{BleAdapterProbe, Collaborators, NoopWakeLock, ServiceLifecycle};
//! use sensord_types::SourceKind;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = Arc::new(RecordingSink::new());
//!     let service = ServiceLifecycle::new(
//!         Arc::new(NoopWakeLock),
//!         Collaborators {
//!             sink: sink.clone(),
//!             battery: Arc::new(MockNotifier::new(SourceKind::Battery)),
//!             peripheral: Arc::new(MockNotifier::new(SourceKind::Peripheral)),
//!             adapter: Arc::new(BleAdapterProbe::new()?),
//!         },
//!     );
//!
//!     let report = service.start()?;
//!     println!("scan: {}", report.scan);
//!     service.stop()?;
//!     println!("{} events", sink.len());
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod mock;
pub mod scan;
pub mod sink;
pub mod sources;
pub mod wakelock;
pub mod worker;

pub use ble::{BleAdapterProbe, BleScanDriver};
pub use error::{Error, Result};
pub use events::normalize;
pub use lifecycle::{
    DEFAULT_STARTUP_TIMEOUT, DEFAULT_STOP_TIMEOUT, LifecycleOptions, ServiceLifecycle,
    StartReport, StopReport, WorkerExit,
};
pub use scan::{
    AdapterProbe, AdapterStatus, DEFAULT_SCAN_WINDOW, DeviceCallback, ScanDriver, ScanError,
    ScanSession,
};
pub use sink::{EventSink, SinkError};
pub use sources::{
    DEFAULT_QUEUE_CAPACITY, EventSourceSet, NotificationReceiver, NotificationSender, Notifier,
    NotifyError, Registration, RegistrationId, SourceError, notification_queue,
};
pub use wakelock::{NoopWakeLock, SysfsWakeLock, WakeLock, WakeLockError, WakeLockGuard};
pub use worker::{
    Collaborators, CollectionWorker, ScanAvailability, WorkerHandle, WorkerOptions, WorkerSummary,
};

// Re-export the data model so users need only one dependency.
pub use sensord_types;
