//! Configuration management for Chatter Guard
//!
//! Provides persistent configuration that is automatically saved to and
//! loaded from a platform-specific config file.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/chatter-guard/config.toml` |
//! | macOS | `~/Library/Application Support/chatter-guard/config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use chatter_guard::Config;
//!
//! // Load existing config or use defaults
//! let mut config = Config::load().unwrap_or_default();
//!
//! // Modify settings
//! config.filter.global_threshold_ms = 80;
//!
//! // Save to disk
//! config.save().expect("Failed to save config");
//! ```

use crate::filter::{DetectionMode, ThresholdTable};
use crate::keyboard::KeyCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Returns the path to the config file.
///
/// Creates the config directory if it doesn't exist.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join("config.toml"))
}

/// Returns the application data directory (config + event logs),
/// creating it if needed.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join("chatter-guard");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir)
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Debounce filter settings
    pub filter: FilterConfig,
    /// Pause/continue shortcut keys
    pub shortcuts: ShortcutConfig,
    /// Synthetic repeat cadence
    pub repeat: RepeatConfig,
    /// Monitor loop timing
    pub monitor: MonitorConfig,
    /// Virtualization consumer detection
    #[serde(default)]
    pub virtualization: VirtualizationConfig,
    /// Event log persistence
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Debounce filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Global bounce threshold in ms
    pub global_threshold_ms: u64,
    /// Per-key threshold overrides: (scancode, threshold_ms)
    #[serde(default)]
    pub overrides: Vec<(u16, u64)>,
    /// Which gap the engine measures bounce against
    pub detection_mode: DetectionMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            global_threshold_ms: 50,
            overrides: Vec::new(),
            detection_mode: DetectionMode::AfterPress,
        }
    }
}

impl FilterConfig {
    /// Add or replace a per-key override
    pub fn add_override(&mut self, scancode: u16, threshold_ms: u64) {
        self.overrides.retain(|(k, _)| *k != scancode);
        self.overrides.push((scancode, threshold_ms));
    }

    /// Build the runtime threshold table
    pub fn threshold_table(&self) -> ThresholdTable {
        let overrides: HashMap<KeyCode, Duration> = self
            .overrides
            .iter()
            .map(|&(code, ms)| (KeyCode(code), Duration::from_millis(ms)))
            .collect();
        ThresholdTable::with_overrides(Duration::from_millis(self.global_threshold_ms), overrides)
    }
}

/// Pause/continue shortcut configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortcutConfig {
    /// Scancode that pauses filtering while active (default: Pause key)
    pub pause_key: u16,
    /// Scancode that resumes filtering while manually paused. May equal
    /// `pause_key`, in which case the key acts as a toggle.
    pub continue_key: u16,
}

impl Default for ShortcutConfig {
    fn default() -> Self {
        Self {
            pause_key: 119,
            continue_key: 119,
        }
    }
}

/// Synthetic repeat configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatConfig {
    /// Hold time before repetition starts, in ms
    pub hold_delay_ms: u64,
    /// Interval between synthetic press+release pairs, in ms
    pub interval_ms: u64,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            hold_delay_ms: 500,
            interval_ms: 50,
        }
    }
}

/// Monitor loop timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Virtualization/arbitration poll interval in ms
    pub arbitration_poll_ms: u64,
    /// Idle sleep when no edge is available, in microseconds
    pub idle_sleep_us: u64,
    /// Event queue capacity
    pub queue_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            arbitration_poll_ms: 500,
            idle_sleep_us: 1000,
            queue_capacity: crate::events::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Virtualization consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualizationConfig {
    /// Process names (as in /proc/<pid>/comm) that claim the raw device
    pub process_names: Vec<String>,
}

impl Default for VirtualizationConfig {
    fn default() -> Self {
        Self {
            process_names: vec![
                "qemu-system-x86_64".to_string(),
                "qemu-system-i386".to_string(),
                "kvm".to_string(),
            ],
        }
    }
}

/// Event log persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append accepted/informational events to events.jsonl
    pub event_log: bool,
    /// Append suppressed-bounce events to chatter.jsonl
    pub chatter_log: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            event_log: true,
            chatter_log: true,
        }
    }
}

/// Hot-swappable runtime snapshot of the filter-relevant settings.
///
/// Built from a `Config` and shipped to the monitor loop over its
/// command channel; applied atomically between edges.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub thresholds: ThresholdTable,
    pub mode: DetectionMode,
    pub pause_key: KeyCode,
    pub continue_key: KeyCode,
    pub repeat_hold_delay: Duration,
    pub repeat_interval: Duration,
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// Useful for testing or using custom config locations.
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Build the runtime snapshot the monitor loop consumes
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            thresholds: self.filter.threshold_table(),
            mode: self.filter.detection_mode,
            pause_key: KeyCode(self.shortcuts.pause_key),
            continue_key: KeyCode(self.shortcuts.continue_key),
            repeat_hold_delay: Duration::from_millis(self.repeat.hold_delay_ms),
            repeat_interval: Duration::from_millis(self.repeat.interval_ms),
        }
    }

    /// Arbitration/virtualization poll interval as a Duration
    pub fn arbitration_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.arbitration_poll_ms)
    }

    /// Idle sleep as a Duration
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.monitor.idle_sleep_us)
    }
}
