//! Platform-agnostic types for the sensord event collector.
//!
//! This crate provides the data model shared by the collector core and the
//! service binary:
//!
//! - Raw, source-specific payloads ([`BatteryPayload`], [`PeripheralPayload`], [`ScanHit`])
//! - The normalized [`Event`] handed to the downstream sink
//! - Service lifecycle state and adapter availability signals
//!
//! # Example
//!
//! ```
//! use sensord_types::{BatteryPayload, RawNotification, SourceKind};
//!
//! let notification = RawNotification::from(BatteryPayload::new(80, 1));
//! assert_eq!(notification.source(), SourceKind::Battery);
//! ```

pub mod error;
pub mod types;

pub use error::{PayloadError, PayloadResult};
pub use types::{
    AdapterUnavailable, BATTERY_EVENT_NAME, BATTERY_SENDER, BatteryPayload, Event, EventRecord,
    PERIPHERAL_EVENT_NAME, PERIPHERAL_SENDER, PeripheralPayload, RawNotification, SCAN_SENDER,
    ScanHit, ServiceState, SourceKind,
};

#[cfg(test)]
mod tests {
    use super::*;

    // --- SourceKind tests ---

    #[test]
    fn test_source_kind_registration_order() {
        assert_eq!(
            SourceKind::ALL,
            [SourceKind::Battery, SourceKind::Peripheral, SourceKind::Scan]
        );
    }

    #[test]
    fn test_source_kind_senders() {
        assert_eq!(SourceKind::Battery.sender(), "BatteryChanged");
        assert_eq!(SourceKind::Peripheral.sender(), "SensorTag");
        assert_eq!(SourceKind::Scan.sender(), "BleDevicesScanner");
    }

    #[test]
    fn test_source_kind_filters_are_distinct() {
        let filters: std::collections::HashSet<_> =
            SourceKind::ALL.iter().map(|k| k.capability_filter()).collect();
        assert_eq!(filters.len(), 3);
    }

    #[test]
    fn test_source_kind_display() {
        assert_eq!(SourceKind::Battery.to_string(), "battery");
        assert_eq!(SourceKind::Scan.to_string(), "scan");
    }

    // --- Payload tests ---

    #[test]
    fn test_battery_payload_from_text_trims_whitespace() {
        let payload = BatteryPayload::from_text(" 57\n", "0\n").unwrap();
        assert_eq!(payload.level, 57);
        assert_eq!(payload.plugged, 0);
    }

    #[test]
    fn test_battery_payload_from_text_rejects_garbage() {
        let err = BatteryPayload::from_text("80", "yes").unwrap_err();
        match err {
            PayloadError::InvalidField { kind, field, value } => {
                assert_eq!(kind, SourceKind::Battery);
                assert_eq!(field, "plugged");
                assert_eq!(value, "yes");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_peripheral_payload_from_text() {
        assert_eq!(
            PeripheralPayload::from_text("3\n").unwrap(),
            PeripheralPayload::new(3)
        );
        assert!(PeripheralPayload::from_text("").is_err());
    }

    #[test]
    fn test_raw_notification_source() {
        assert_eq!(
            RawNotification::from(PeripheralPayload::new(1)).source(),
            SourceKind::Peripheral
        );
        assert_eq!(
            RawNotification::from(ScanHit::new("AA:BB:CC:DD:EE:FF", -60)).source(),
            SourceKind::Scan
        );
    }

    // --- Event tests ---

    #[test]
    fn test_event_accessors() {
        let event = Event::new("BatteryChanged", "Level;Plugged", "80;1");
        assert_eq!(event.as_triple(), ("BatteryChanged", "Level;Plugged", "80;1"));
        assert_eq!(event.to_string(), "BatteryChanged/Level;Plugged=80;1");
    }

    #[test]
    fn test_event_timestamps_are_monotonic() {
        let first = Event::new("a", "b", "c");
        let second = Event::new("a", "b", "d");
        assert!(second.timestamp() >= first.timestamp());
    }

    #[test]
    fn test_event_record_serialization() {
        let event = Event::new("SensorTag", "Key state", "1");
        let json = serde_json::to_string(&event.to_record()).unwrap();
        assert!(json.contains("\"sender\":\"SensorTag\""));
        assert!(json.contains("\"name\":\"Key state\""));
        assert!(json.contains("\"value\":\"1\""));
        assert!(json.contains("captured_at"));

        let parsed: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.sender, "SensorTag");
    }

    #[test]
    fn test_raw_notification_serialization_is_tagged() {
        let json = serde_json::to_string(&RawNotification::from(BatteryPayload::new(80, 1))).unwrap();
        assert_eq!(json, r#"{"source":"battery","level":80,"plugged":1}"#);
    }

    // --- ServiceState tests ---

    #[test]
    fn test_service_state_default_and_display() {
        assert_eq!(ServiceState::default(), ServiceState::Stopped);
        assert_eq!(ServiceState::Stopping.to_string(), "stopping");
    }

    #[test]
    fn test_adapter_unavailable_display() {
        assert_eq!(
            AdapterUnavailable::BluetoothDisabled.to_string(),
            "Bluetooth is disabled"
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn battery_text_round_trips(level in -1i32..=100, plugged in 0i32..=4) {
                let payload = BatteryPayload::from_text(&format!("{level}\n"), &plugged.to_string()).unwrap();
                prop_assert_eq!(payload, BatteryPayload::new(level, plugged));
            }

            #[test]
            fn battery_text_never_panics(level in ".*", plugged in ".*") {
                let _ = BatteryPayload::from_text(&level, &plugged);
            }
        }
    }
}
