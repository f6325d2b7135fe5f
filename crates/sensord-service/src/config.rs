//! Daemon configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use sensord_core::{LifecycleOptions, WorkerOptions};
use sensord_core::wakelock::{SYSFS_WAKE_LOCK, SYSFS_WAKE_UNLOCK};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collector settings.
    pub collector: CollectorConfig,
    /// Wake-lock settings.
    pub wake_lock: WakeLockConfig,
    /// Battery notifier settings.
    pub battery: BatteryConfig,
    /// Peripheral notifier settings.
    pub peripheral: PeripheralConfig,
    /// Event sink settings.
    pub sink: SinkConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is absent.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// # Example
    ///
    /// ```
    /// use sensord_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.collector.validate());
        errors.extend(self.wake_lock.validate());
        errors.extend(self.battery.validate());
        errors.extend(self.peripheral.validate());
        errors.extend(self.sink.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Lifecycle options derived from the collector section.
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        let c = &self.collector;
        LifecycleOptions {
            worker: WorkerOptions {
                scan_enabled: c.scan_enabled,
                scan_window: Duration::from_millis(c.scan_window_ms),
                queue_capacity: c.queue_capacity,
            },
            startup_timeout: Duration::from_millis(c.startup_timeout_ms),
            stop_timeout: Duration::from_millis(c.stop_timeout_ms),
        }
    }
}

/// Minimum scan window in milliseconds.
pub const MIN_SCAN_WINDOW_MS: u64 = 100;
/// Maximum scan window in milliseconds (1 minute).
pub const MAX_SCAN_WINDOW_MS: u64 = 60_000;
/// Minimum stop/startup timeout in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 10;
/// Maximum stop/startup timeout in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 10_000;
/// Maximum notification queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 65_536;

/// Collector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Overwrite the sink output on start instead of appending.
    pub overwrite: bool,
    /// Open a BLE scan window on start.
    pub scan_enabled: bool,
    /// Scan window in milliseconds.
    pub scan_window_ms: u64,
    /// How long stop waits for the worker, in milliseconds.
    pub stop_timeout_ms: u64,
    /// How long start waits for source registration, in milliseconds.
    pub startup_timeout_ms: u64,
    /// Notification queue capacity.
    pub queue_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            scan_enabled: true,
            scan_window_ms: 1000,
            stop_timeout_ms: 250,
            startup_timeout_ms: 250,
            queue_capacity: 64,
        }
    }
}

impl CollectorConfig {
    /// Validate collector configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !(MIN_SCAN_WINDOW_MS..=MAX_SCAN_WINDOW_MS).contains(&self.scan_window_ms) {
            errors.push(ValidationError {
                field: "collector.scan_window_ms".to_string(),
                message: format!(
                    "scan window {} ms is out of range ({}-{} ms)",
                    self.scan_window_ms, MIN_SCAN_WINDOW_MS, MAX_SCAN_WINDOW_MS
                ),
            });
        }

        for (field, value) in [
            ("collector.stop_timeout_ms", self.stop_timeout_ms),
            ("collector.startup_timeout_ms", self.startup_timeout_ms),
        ] {
            if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&value) {
                errors.push(ValidationError {
                    field: field.to_string(),
                    message: format!(
                        "timeout {} ms is out of range ({}-{} ms)",
                        value, MIN_TIMEOUT_MS, MAX_TIMEOUT_MS
                    ),
                });
            }
        }

        if self.queue_capacity == 0 || self.queue_capacity > MAX_QUEUE_CAPACITY {
            errors.push(ValidationError {
                field: "collector.queue_capacity".to_string(),
                message: format!(
                    "queue capacity {} is out of range (1-{})",
                    self.queue_capacity, MAX_QUEUE_CAPACITY
                ),
            });
        }

        errors
    }
}

/// Wake-lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeLockConfig {
    /// Hold a kernel wake-lock while collecting.
    pub enabled: bool,
    /// Name the lock is registered under.
    pub name: String,
    /// Kernel wake-lock file.
    pub lock_path: PathBuf,
    /// Kernel wake-unlock file.
    pub unlock_path: PathBuf,
}

impl Default for WakeLockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "sensord".to_string(),
            lock_path: PathBuf::from(SYSFS_WAKE_LOCK),
            unlock_path: PathBuf::from(SYSFS_WAKE_UNLOCK),
        }
    }
}

impl WakeLockConfig {
    /// Validate wake-lock configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.name.is_empty() {
            errors.push(ValidationError {
                field: "wake_lock.name".to_string(),
                message: "wake-lock name cannot be empty".to_string(),
            });
        } else if self.name.chars().any(char::is_whitespace) {
            errors.push(ValidationError {
                field: "wake_lock.name".to_string(),
                message: format!("wake-lock name '{}' cannot contain whitespace", self.name),
            });
        }

        errors
    }
}

/// Minimum battery poll interval in seconds.
pub const MIN_BATTERY_POLL_SECS: u64 = 1;
/// Maximum battery poll interval in seconds (1 hour).
pub const MAX_BATTERY_POLL_SECS: u64 = 3600;

/// Battery notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// Power-supply directory holding the `capacity` file.
    pub supply_dir: PathBuf,
    /// File reporting whether AC power is connected.
    pub ac_online_path: PathBuf,
    /// Poll interval in seconds.
    pub poll_interval_secs: u64,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            supply_dir: PathBuf::from("/sys/class/power_supply/BAT0"),
            ac_online_path: PathBuf::from("/sys/class/power_supply/AC/online"),
            poll_interval_secs: 30,
        }
    }
}

impl BatteryConfig {
    /// Validate battery configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.poll_interval_secs < MIN_BATTERY_POLL_SECS {
            errors.push(ValidationError {
                field: "battery.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too short (minimum {} second)",
                    self.poll_interval_secs, MIN_BATTERY_POLL_SECS
                ),
            });
        } else if self.poll_interval_secs > MAX_BATTERY_POLL_SECS {
            errors.push(ValidationError {
                field: "battery.poll_interval_secs".to_string(),
                message: format!(
                    "poll interval {} is too long (maximum {} seconds / 1 hour)",
                    self.poll_interval_secs, MAX_BATTERY_POLL_SECS
                ),
            });
        }

        errors
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Minimum peripheral poll interval in milliseconds.
pub const MIN_PERIPHERAL_POLL_MS: u64 = 10;
/// Maximum peripheral poll interval in milliseconds.
pub const MAX_PERIPHERAL_POLL_MS: u64 = 60_000;

/// Peripheral notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Poll the peripheral state file.
    pub enabled: bool,
    /// File holding the peripheral's integer key state.
    pub state_path: Option<PathBuf>,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            state_path: None,
            poll_interval_ms: 200,
        }
    }
}

impl PeripheralConfig {
    /// Validate peripheral configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.enabled {
            match &self.state_path {
                None => errors.push(ValidationError {
                    field: "peripheral.state_path".to_string(),
                    message: "state path is required when the peripheral is enabled".to_string(),
                }),
                Some(path) if path.as_os_str().is_empty() => errors.push(ValidationError {
                    field: "peripheral.state_path".to_string(),
                    message: "state path cannot be empty".to_string(),
                }),
                Some(_) => {}
            }
        }

        if !(MIN_PERIPHERAL_POLL_MS..=MAX_PERIPHERAL_POLL_MS).contains(&self.poll_interval_ms) {
            errors.push(ValidationError {
                field: "peripheral.poll_interval_ms".to_string(),
                message: format!(
                    "poll interval {} ms is out of range ({}-{} ms)",
                    self.poll_interval_ms, MIN_PERIPHERAL_POLL_MS, MAX_PERIPHERAL_POLL_MS
                ),
            });
        }

        errors
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Event sink configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// JSON-lines output file.
    pub path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: default_sink_path(),
        }
    }
}

impl SinkConfig {
    /// Validate sink configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "sink.path".to_string(),
                message: "sink path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `collector.scan_window_ms`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensord")
        .join("sensord.toml")
}

/// Default event output path.
pub fn default_sink_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensord")
        .join("events.jsonl")
}
