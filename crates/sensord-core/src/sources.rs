//! Event-source registration and the notification queue.
//!
//! Every event source delivers raw payloads through a [`NotificationSender`]
//! into one bounded queue drained by the collection worker. Producers never
//! run collector code themselves; they only enqueue.
//!
//! # Backpressure
//!
//! The queue is bounded. [`NotificationSender::notify`] blocks the producing
//! thread while the queue is full, so nothing a source hands over is dropped.
//! Once the worker begins quitting the queue is closed and every send fails
//! with [`NotifyError::Closed`].
//!
//! `notify` must not be called from inside an async runtime; async
//! producers use [`NotificationSender::notify_async`] instead.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use sensord_types::{RawNotification, SourceKind};

use crate::scan::ScanSession;

/// Default capacity of the notification queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Receiving half of the notification queue, owned by the worker.
pub type NotificationReceiver = mpsc::Receiver<RawNotification>;

/// Create a bounded notification queue.
///
/// A capacity of zero is raised to one.
pub fn notification_queue(capacity: usize) -> (NotificationSender, NotificationReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (NotificationSender { tx }, rx)
}

/// Errors returned when handing a notification to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum NotifyError {
    /// The worker has stopped accepting notifications.
    #[error("notification queue is closed")]
    Closed,

    /// The queue is full (only returned by [`NotificationSender::try_notify`]).
    #[error("notification queue is full")]
    Full,
}

/// Producer handle for the notification queue.
///
/// Cheap to clone; each event source receives its own clone when it is
/// registered.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<RawNotification>,
}

impl NotificationSender {
    /// Enqueue a notification, blocking while the queue is full.
    pub fn notify(&self, notification: impl Into<RawNotification>) -> Result<(), NotifyError> {
        self.tx
            .blocking_send(notification.into())
            .map_err(|_| NotifyError::Closed)
    }

    /// Enqueue a notification from async code.
    pub async fn notify_async(
        &self,
        notification: impl Into<RawNotification>,
    ) -> Result<(), NotifyError> {
        self.tx
            .send(notification.into())
            .await
            .map_err(|_| NotifyError::Closed)
    }

    /// Enqueue a notification without waiting.
    pub fn try_notify(&self, notification: impl Into<RawNotification>) -> Result<(), NotifyError> {
        self.tx.try_send(notification.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::Full,
            mpsc::error::TrySendError::Closed(_) => NotifyError::Closed,
        })
    }

    /// Whether the worker has stopped accepting notifications.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Identifier a notifier hands out for one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// Wrap a notifier-specific identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw identifier.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors raised while registering event sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The notifier refused the registration.
    #[error("failed to register {kind} source: {reason}")]
    RegistrationFailed {
        /// Source that failed.
        kind: SourceKind,
        /// Why it failed.
        reason: String,
    },

    /// A source of this kind is already registered.
    #[error("{0} source is already registered")]
    AlreadyRegistered(SourceKind),

    /// Scan sources are attached as a [`ScanSession`], not through a notifier.
    #[error("{0} sources cannot be registered as notifiers")]
    UnsupportedKind(SourceKind),
}

/// An external notifier that pushes raw payloads for one source kind.
///
/// Implementations keep the sender for as long as the registration lives
/// and must stop using it once [`unregister`](Notifier::unregister) returns.
pub trait Notifier: Send + Sync {
    /// The source kind this notifier produces.
    fn kind(&self) -> SourceKind;

    /// Start delivering payloads through `sender`.
    fn register(&self, sender: NotificationSender) -> Result<RegistrationId, SourceError>;

    /// Stop delivering payloads for `id`.
    ///
    /// Unknown identifiers are ignored.
    fn unregister(&self, id: RegistrationId);
}

/// A live registration with a notifier.
pub struct Registration {
    kind: SourceKind,
    id: RegistrationId,
    filter: &'static str,
    notifier: Arc<dyn Notifier>,
}

impl Registration {
    /// Source kind of this registration.
    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Notifier-assigned identifier.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Filter the registration listens on.
    pub fn capability_filter(&self) -> &'static str {
        self.filter
    }

    fn unregister(self) {
        self.notifier.unregister(self.id);
        debug!(source = %self.kind, id = %self.id, "Unregistered event source");
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}

/// The set of event sources registered for one worker lifetime.
///
/// Holds at most one registration per source kind. [`teardown`](Self::teardown)
/// is idempotent and also runs on drop, so no registration outlives the set.
#[derive(Debug, Default)]
pub struct EventSourceSet {
    battery: Option<Registration>,
    peripheral: Option<Registration>,
    scan: Option<ScanSession>,
}

impl EventSourceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a battery or peripheral notifier.
    pub fn register(
        &mut self,
        notifier: Arc<dyn Notifier>,
        sender: NotificationSender,
    ) -> Result<(), SourceError> {
        let kind = notifier.kind();
        let slot = match kind {
            SourceKind::Battery => &mut self.battery,
            SourceKind::Peripheral => &mut self.peripheral,
            SourceKind::Scan => return Err(SourceError::UnsupportedKind(kind)),
        };
        if slot.is_some() {
            return Err(SourceError::AlreadyRegistered(kind));
        }

        let id = notifier.register(sender)?;
        info!(source = %kind, id = %id, filter = kind.capability_filter(), "Registered event source");
        *slot = Some(Registration {
            kind,
            id,
            filter: kind.capability_filter(),
            notifier,
        });
        Ok(())
    }

    /// Attach a scan session as the scan source.
    pub fn attach_scan(&mut self, session: ScanSession) -> Result<(), SourceError> {
        if self.scan.is_some() {
            return Err(SourceError::AlreadyRegistered(SourceKind::Scan));
        }
        self.scan = Some(session);
        Ok(())
    }

    /// The attached scan session, if any.
    pub fn scan(&self) -> Option<&ScanSession> {
        self.scan.as_ref()
    }

    /// Whether a source of `kind` is registered.
    pub fn is_registered(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Battery => self.battery.is_some(),
            SourceKind::Peripheral => self.peripheral.is_some(),
            SourceKind::Scan => self.scan.is_some(),
        }
    }

    /// Number of registered sources.
    pub fn active_count(&self) -> usize {
        SourceKind::ALL
            .iter()
            .filter(|kind| self.is_registered(**kind))
            .count()
    }

    /// Stop the scan session and unregister every notifier.
    ///
    /// Safe to call repeatedly and when some sources were never registered.
    pub fn teardown(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.stop();
            debug!("Scan source detached");
        }
        if let Some(registration) = self.battery.take() {
            registration.unregister();
        }
        if let Some(registration) = self.peripheral.take() {
            registration.unregister();
        }
    }
}

impl Drop for EventSourceSet {
    fn drop(&mut self) {
        if self.active_count() > 0 {
            warn!("Event sources still registered on drop; tearing down");
            self.teardown();
        }
    }
}
