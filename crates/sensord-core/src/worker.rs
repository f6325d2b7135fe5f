//! The collection worker.
//!
//! One dedicated thread owns the notification queue, registers the event
//! sources, and drains the queue into the [`EventSink`]. Normalization and
//! submission only ever run on this thread, one notification at a time, so
//! the sink sees events in the order the queue received them.
//!
//! The thread drives its loop on a current-thread tokio runtime so the
//! single suspension point (waiting for the next notification) can race a
//! [`CancellationToken`]. The same runtime hosts the scan-window deadline.
//! Registration and teardown run outside the runtime because notifiers and
//! scan drivers are free to block.
//!
//! A quit requested while registration is still in progress is honored at
//! the next step: sources not yet registered are skipped.
//!
//! # Shutdown
//!
//! [`WorkerHandle::quit`] cancels the token. The loop finishes the
//! notification it is handling, closes the queue so no producer can add
//! more, dispatches whatever was already accepted, tears down every
//! source, ends the sink session, and reports a [`WorkerSummary`].

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sensord_types::{AdapterUnavailable, RawNotification};

use crate::error::{Error, Result};
use crate::events::normalize;
use crate::scan::{AdapterProbe, AdapterStatus, DEFAULT_SCAN_WINDOW, ScanSession};
use crate::sink::EventSink;
use crate::sources::{
    DEFAULT_QUEUE_CAPACITY, EventSourceSet, NotificationReceiver, NotificationSender, Notifier,
    notification_queue,
};

/// The external collaborators a worker drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Receives normalized events.
    pub sink: Arc<dyn EventSink>,
    /// Battery-state notifier.
    pub battery: Arc<dyn Notifier>,
    /// Peripheral key-state notifier.
    pub peripheral: Arc<dyn Notifier>,
    /// Wireless adapter probe, consulted once per worker.
    pub adapter: Arc<dyn AdapterProbe>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Tunables for a worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Whether to probe the adapter and open a scan window.
    pub scan_enabled: bool,
    /// Length of the scan window.
    pub scan_window: Duration,
    /// Capacity of the notification queue.
    pub queue_capacity: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            scan_enabled: true,
            scan_window: DEFAULT_SCAN_WINDOW,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What happened to the scan source when the worker started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanAvailability {
    /// A scan window is open.
    Active,
    /// The adapter could not be used; collection continues without scanning.
    Degraded(AdapterUnavailable),
    /// Scanning is turned off.
    Disabled,
    /// The adapter was available but discovery refused to start.
    Failed(String),
    /// The worker did not report in time.
    Pending,
}

impl ScanAvailability {
    /// Whether collection runs without the scan source.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ScanAvailability::Degraded(_) | ScanAvailability::Failed(_))
    }
}

impl fmt::Display for ScanAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanAvailability::Active => write!(f, "active"),
            ScanAvailability::Degraded(reason) => write!(f, "degraded ({reason})"),
            ScanAvailability::Disabled => write!(f, "disabled"),
            ScanAvailability::Failed(reason) => write!(f, "failed ({reason})"),
            ScanAvailability::Pending => write!(f, "pending"),
        }
    }
}

/// Counters reported by a worker once it has exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Events accepted by the sink.
    pub submitted: u64,
    /// Notifications that could not be normalized.
    pub rejected: u64,
    /// Events the sink refused.
    pub sink_failures: u64,
}

/// Spawns collection workers.
#[derive(Debug)]
pub struct CollectionWorker;

impl CollectionWorker {
    /// Spawn the worker thread.
    ///
    /// `overwrite` is handed to [`EventSink::begin`] and is fixed for the
    /// lifetime of the worker.
    pub fn spawn(
        collaborators: Collaborators,
        options: WorkerOptions,
        overwrite: bool,
    ) -> Result<WorkerHandle> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(Error::WorkerSpawn)?;

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (done_tx, done_rx) = std_mpsc::channel();

        let token = cancel.clone();
        let thread = thread::Builder::new()
            .name("collection-worker".to_string())
            .spawn(move || {
                if let Err(e) = collaborators.sink.begin(overwrite) {
                    error!(error = %e, "Failed to open sink session; continuing");
                }
                let (tx, rx) = notification_queue(options.queue_capacity);
                let mut sources = EventSourceSet::new();
                let scan = register_sources(
                    &collaborators,
                    &options,
                    &mut sources,
                    tx,
                    runtime.handle(),
                    &token,
                );
                info!(
                    sources = sources.active_count(),
                    scan = %scan,
                    overwrite,
                    "Collection worker running"
                );
                let _ = ready_tx.send(scan);

                let summary = runtime.block_on(receive_loop(
                    collaborators.sink.as_ref(),
                    rx,
                    token,
                ));

                sources.teardown();
                collaborators.sink.end();
                info!(
                    submitted = summary.submitted,
                    rejected = summary.rejected,
                    sink_failures = summary.sink_failures,
                    "Collection worker exited"
                );
                let _ = done_tx.send(summary);
            })
            .map_err(Error::WorkerSpawn)?;

        Ok(WorkerHandle {
            cancel,
            ready_rx,
            done_rx,
            thread: Some(thread),
        })
    }
}

/// Register battery, peripheral and scan sources in that order.
///
/// Stops early once `cancel` fires.
fn register_sources(
    collaborators: &Collaborators,
    options: &WorkerOptions,
    sources: &mut EventSourceSet,
    tx: NotificationSender,
    runtime: &Handle,
    cancel: &CancellationToken,
) -> ScanAvailability {
    for notifier in [&collaborators.battery, &collaborators.peripheral] {
        let kind = notifier.kind();
        if cancel.is_cancelled() {
            debug!(source = %kind, "Quit requested; skipping registration");
            continue;
        }
        if let Err(e) = sources.register(Arc::clone(notifier), tx.clone()) {
            warn!(source = %kind, error = %e, "Event source unavailable; continuing without it");
        }
    }

    if !options.scan_enabled {
        debug!("Scanning disabled");
        return ScanAvailability::Disabled;
    }

    let status = collaborators.adapter.probe();
    if cancel.is_cancelled() {
        debug!("Quit requested during adapter check; not scanning");
        return ScanAvailability::Pending;
    }
    match status {
        AdapterStatus::Unavailable(reason) => {
            warn!(%reason, "Wireless adapter unavailable; collecting without scan");
            ScanAvailability::Degraded(reason)
        }
        AdapterStatus::Available(driver) => {
            let session = ScanSession::new(driver, runtime.clone(), move |hit| {
                if let Err(e) = tx.notify(hit) {
                    debug!(error = %e, "Scan hit not accepted");
                }
            });
            if let Err(e) = session.start(options.scan_window) {
                warn!(error = %e, "Scan could not be started; collecting without scan");
                return ScanAvailability::Failed(e.to_string());
            }
            match sources.attach_scan(session) {
                Ok(()) => ScanAvailability::Active,
                Err(e) => ScanAvailability::Failed(e.to_string()),
            }
        }
    }
}

async fn receive_loop(
    sink: &dyn EventSink,
    mut rx: NotificationReceiver,
    cancel: CancellationToken,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(notification) => dispatch(sink, notification, &mut summary),
                None => {
                    debug!("All event sources gone; waiting for quit");
                    cancel.cancelled().await;
                    break;
                }
            },
        }
    }

    // Producers blocked on a full queue are released by the close.
    rx.close();
    let mut drained = 0usize;
    while let Ok(notification) = rx.try_recv() {
        dispatch(sink, notification, &mut summary);
        drained += 1;
    }
    if drained > 0 {
        debug!(drained, "Dispatched queued notifications after quit");
    }
    summary
}

fn dispatch(sink: &dyn EventSink, notification: RawNotification, summary: &mut WorkerSummary) {
    let source = notification.source();
    match normalize(notification) {
        Ok(event) => match sink.submit(event) {
            Ok(()) => summary.submitted += 1,
            Err(e) => {
                summary.sink_failures += 1;
                warn!(%source, error = %e, "Sink failed to accept event");
            }
        },
        Err(e) => {
            summary.rejected += 1;
            warn!(%source, error = %e, "Dropping malformed notification");
        }
    }
}

/// Control handle for a running worker.
///
/// Dropping the handle without calling [`quit`](Self::quit) still asks the
/// worker to exit, but does not wait for it.
pub struct WorkerHandle {
    cancel: CancellationToken,
    ready_rx: std_mpsc::Receiver<ScanAvailability>,
    done_rx: std_mpsc::Receiver<WorkerSummary>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Wait for the worker to finish registering its sources.
    ///
    /// Returns [`ScanAvailability::Pending`] if it does not report within
    /// `timeout`.
    pub fn wait_ready(&self, timeout: Duration) -> ScanAvailability {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(scan) => scan,
            Err(_) => {
                warn!(?timeout, "Collection worker did not report readiness in time");
                ScanAvailability::Pending
            }
        }
    }

    /// Ask the worker to quit and wait up to `timeout` for it to exit.
    ///
    /// On [`Error::WorkerShutdownTimeout`] the thread keeps running and the
    /// handle stays valid; calling `quit` again waits once more.
    pub fn quit(&mut self, timeout: Duration) -> Result<WorkerSummary> {
        self.cancel.cancel();
        match self.done_rx.recv_timeout(timeout) {
            Ok(summary) => {
                self.join();
                Ok(summary)
            }
            Err(RecvTimeoutError::Timeout) => Err(Error::WorkerShutdownTimeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Err(Error::WorkerPanicked)
            }
        }
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
