//! Normalization of raw notifications into events.
//!
//! Each source maps to a fixed `(sender, name)` pair. Values are taken
//! verbatim from the payload:
//!
//! | Source | Sender | Name | Value |
//! |--------|--------|------|-------|
//! | battery | `BatteryChanged` | `Level;Plugged` | `<level>;<plugged>` |
//! | peripheral | `SensorTag` | `Key state` | `<key_state>` |
//! | scan | `BleDevicesScanner` | `<address>` | `<rssi>` |

use sensord_types::{
    BATTERY_EVENT_NAME, Event, PERIPHERAL_EVENT_NAME, PayloadError, PayloadResult, RawNotification,
};

/// Turn one raw notification into an [`Event`] stamped with the current time.
///
/// Fails only for scan hits without an address.
///
/// ```
/// use sensord_core::normalize;
/// use sensord_types::{BatteryPayload, RawNotification};
///
/// let event = normalize(RawNotification::Battery(BatteryPayload::new(80, 1))).unwrap();
/// assert_eq!(event.as_triple(), ("BatteryChanged", "Level;Plugged", "80;1"));
/// ```
pub fn normalize(notification: RawNotification) -> PayloadResult<Event> {
    let sender = notification.source().sender();
    match notification {
        RawNotification::Battery(p) => Ok(Event::new(
            sender,
            BATTERY_EVENT_NAME,
            format!("{};{}", p.level, p.plugged),
        )),
        RawNotification::Peripheral(p) => Ok(Event::new(
            sender,
            PERIPHERAL_EVENT_NAME,
            p.key_state.to_string(),
        )),
        RawNotification::Scan(hit) => {
            if hit.address.trim().is_empty() {
                return Err(PayloadError::EmptyAddress);
            }
            Ok(Event::new(sender, hit.address, hit.rssi.to_string()))
        }
    }
}
