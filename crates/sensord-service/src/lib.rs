//! The sensord daemon: configuration and concrete collaborators.
//!
//! This crate wires [`sensord_core::ServiceLifecycle`] to the host:
//! - Battery level and plugged state polled from `/sys/class/power_supply`
//! - An optional peripheral key state polled from a sysfs file
//! - BLE device discovery through the system's first adapter
//! - A kernel wake-lock held while collecting
//! - Events appended to a JSON-lines file
//!
//! # Configuration
//!
//! The daemon reads configuration from `~/.config/sensord/sensord.toml`:
//!
//! ```toml
//! [collector]
//! overwrite = false
//! scan_enabled = true
//! scan_window_ms = 1000
//!
//! [wake_lock]
//! enabled = true
//! name = "sensord"
//!
//! [battery]
//! supply_dir = "/sys/class/power_supply/BAT0"
//! poll_interval_secs = 30
//!
//! [peripheral]
//! enabled = true
//! state_path = "/sys/class/sensortag/key_state"
//!
//! [sink]
//! path = "~/.local/share/sensord/events.jsonl"
//! ```
//!
//! # Output
//!
//! One JSON object per line:
//!
//! ```json
//! {"sender":"BatteryChanged","name":"Level;Plugged","value":"80;1","captured_at":"2026-01-12T08:30:00Z"}
//! ```

pub mod collector;
pub mod config;
pub mod sink;
pub mod sources;

pub use collector::{Collector, CollectorError};
pub use config::{
    BatteryConfig, CollectorConfig, Config, ConfigError, PeripheralConfig, SinkConfig,
    ValidationError, WakeLockConfig,
};
pub use sink::JsonLinesSink;
pub use sources::{PollingNotifier, ReadError, battery_notifier, peripheral_notifier};
