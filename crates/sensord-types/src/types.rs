//! Core types for collected events and the raw payloads they come from.

use core::fmt;
use std::time::Instant;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{PayloadError, PayloadResult};

/// Sender name used for battery events.
pub const BATTERY_SENDER: &str = "BatteryChanged";
/// Event name used for battery events.
pub const BATTERY_EVENT_NAME: &str = "Level;Plugged";
/// Sender name used for peripheral key-state events.
pub const PERIPHERAL_SENDER: &str = "SensorTag";
/// Event name used for peripheral key-state events.
pub const PERIPHERAL_EVENT_NAME: &str = "Key state";
/// Sender name used for wireless scan hits.
pub const SCAN_SENDER: &str = "BleDevicesScanner";

/// Kind of asynchronous event source.
///
/// Each kind has exactly one registration per collection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SourceKind {
    /// Periodic battery-state notifier.
    Battery,
    /// External peripheral (key state) notifier.
    Peripheral,
    /// Time-windowed wireless device scan.
    Scan,
}

impl SourceKind {
    /// All source kinds, in registration order.
    pub const ALL: [SourceKind; 3] = [SourceKind::Battery, SourceKind::Peripheral, SourceKind::Scan];

    /// Filter string describing what a registration for this source listens to.
    ///
    /// ```
    /// use sensord_types::SourceKind;
    ///
    /// assert_eq!(SourceKind::Battery.capability_filter(), "power.battery_changed");
    /// ```
    #[must_use]
    pub fn capability_filter(&self) -> &'static str {
        match self {
            SourceKind::Battery => "power.battery_changed",
            SourceKind::Peripheral => "peripheral.key_state",
            SourceKind::Scan => "ble.le_scan",
        }
    }

    /// The fixed sender name events from this source carry.
    #[must_use]
    pub fn sender(&self) -> &'static str {
        match self {
            SourceKind::Battery => BATTERY_SENDER,
            SourceKind::Peripheral => PERIPHERAL_SENDER,
            SourceKind::Scan => SCAN_SENDER,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Battery => write!(f, "battery"),
            SourceKind::Peripheral => write!(f, "peripheral"),
            SourceKind::Scan => write!(f, "scan"),
        }
    }
}

/// Battery state as reported by the battery notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryPayload {
    /// Charge level in percent.
    pub level: i32,
    /// Plugged state (0 = on battery, non-zero = plugged in).
    pub plugged: i32,
}

impl BatteryPayload {
    /// Create a battery payload.
    #[must_use]
    pub fn new(level: i32, plugged: i32) -> Self {
        Self { level, plugged }
    }

    /// Parse a battery payload from textual fields, as read from sysfs.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// ```
    /// use sensord_types::BatteryPayload;
    ///
    /// let payload = BatteryPayload::from_text("80\n", "1\n").unwrap();
    /// assert_eq!(payload, BatteryPayload::new(80, 1));
    /// assert!(BatteryPayload::from_text("full", "1").is_err());
    /// ```
    pub fn from_text(level: &str, plugged: &str) -> PayloadResult<Self> {
        Ok(Self {
            level: parse_field(SourceKind::Battery, "level", level)?,
            plugged: parse_field(SourceKind::Battery, "plugged", plugged)?,
        })
    }
}

/// Key state as reported by the peripheral notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeripheralPayload {
    /// Raw key state bitmask.
    pub key_state: i32,
}

impl PeripheralPayload {
    /// Create a peripheral payload.
    #[must_use]
    pub fn new(key_state: i32) -> Self {
        Self { key_state }
    }

    /// Parse a peripheral payload from a textual key state.
    pub fn from_text(key_state: &str) -> PayloadResult<Self> {
        Ok(Self {
            key_state: parse_field(SourceKind::Peripheral, "key_state", key_state)?,
        })
    }
}

/// A device discovered during a scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScanHit {
    /// Device address (MAC address, or platform identifier where MACs are hidden).
    pub address: String,
    /// Received signal strength in dBm.
    pub rssi: i32,
}

impl ScanHit {
    /// Create a scan hit.
    #[must_use]
    pub fn new(address: impl Into<String>, rssi: i32) -> Self {
        Self {
            address: address.into(),
            rssi,
        }
    }
}

/// A raw, source-specific notification as delivered to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "source", rename_all = "snake_case"))]
pub enum RawNotification {
    /// Battery state changed.
    Battery(BatteryPayload),
    /// Peripheral key state changed.
    Peripheral(PeripheralPayload),
    /// A device was seen during a scan.
    Scan(ScanHit),
}

impl RawNotification {
    /// The source this notification came from.
    #[must_use]
    pub fn source(&self) -> SourceKind {
        match self {
            RawNotification::Battery(_) => SourceKind::Battery,
            RawNotification::Peripheral(_) => SourceKind::Peripheral,
            RawNotification::Scan(_) => SourceKind::Scan,
        }
    }
}

impl From<BatteryPayload> for RawNotification {
    fn from(payload: BatteryPayload) -> Self {
        RawNotification::Battery(payload)
    }
}

impl From<PeripheralPayload> for RawNotification {
    fn from(payload: PeripheralPayload) -> Self {
        RawNotification::Peripheral(payload)
    }
}

impl From<ScanHit> for RawNotification {
    fn from(hit: ScanHit) -> Self {
        RawNotification::Scan(hit)
    }
}

/// A normalized event, ready for the downstream sink.
///
/// Events are immutable once created. `timestamp` is a monotonic instant
/// used for ordering; `captured_at` is the wall-clock time kept for
/// persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    sender: String,
    name: String,
    value: String,
    timestamp: Instant,
    captured_at: OffsetDateTime,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(sender: impl Into<String>, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            name: name.into(),
            value: value.into(),
            timestamp: Instant::now(),
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    /// Who produced the event.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// What the event is about.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The event value, taken verbatim from the payload.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Monotonic time the event was created.
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Wall-clock time the event was created.
    pub fn captured_at(&self) -> OffsetDateTime {
        self.captured_at
    }

    /// The `(sender, name, value)` triple.
    pub fn as_triple(&self) -> (&str, &str, &str) {
        (&self.sender, &self.name, &self.value)
    }

    /// Convert into a serializable record.
    #[must_use]
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            sender: self.sender.clone(),
            name: self.name.clone(),
            value: self.value.clone(),
            captured_at: self.captured_at,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}={}", self.sender, self.name, self.value)
    }
}

/// Serializable form of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventRecord {
    /// Who produced the event.
    pub sender: String,
    /// What the event is about.
    pub name: String,
    /// The event value.
    pub value: String,
    /// Wall-clock capture time.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub captured_at: OffsetDateTime,
}

/// Lifecycle state of the collector service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServiceState {
    /// No worker, no wake-lock.
    #[default]
    Stopped,
    /// Acquiring the wake-lock and spawning the worker.
    Starting,
    /// Collecting events.
    Running,
    /// Waiting for the worker to quit.
    Stopping,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Why the wireless adapter could not be used for scanning.
///
/// These are degraded-mode signals, not failures: collection continues
/// without the scan source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AdapterUnavailable {
    /// An adapter exists but Bluetooth is switched off.
    BluetoothDisabled,
    /// The platform has no Bluetooth LE support.
    NotSupported,
    /// The radio could not be reached or reported an unknown state.
    RadioUnavailable,
}

impl fmt::Display for AdapterUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterUnavailable::BluetoothDisabled => write!(f, "Bluetooth is disabled"),
            AdapterUnavailable::NotSupported => write!(f, "Bluetooth LE is not supported"),
            AdapterUnavailable::RadioUnavailable => write!(f, "Bluetooth radio is unavailable"),
        }
    }
}

fn parse_field(kind: SourceKind, field: &'static str, text: &str) -> PayloadResult<i32> {
    text.trim().parse().map_err(|_| PayloadError::InvalidField {
        kind,
        field,
        value: text.to_string(),
    })
}
