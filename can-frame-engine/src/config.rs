//! Engine configuration types
//!
//! `DisplayConfig` replaces process-wide display flags: the frame model owns
//! one instance and threads it through every formatting call. `EngineConfig`
//! is the on-disk (TOML) form used to construct a model.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How timestamps are rendered in log mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// Raw microsecond count
    #[default]
    Raw,
    /// Seconds with five decimals
    Seconds,
    /// Wall-clock time formatted with `time_format`
    SystemTime,
}

/// Display flags for the projected view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Render identifiers and payload bytes as hex (false = decimal)
    #[serde(default = "default_true")]
    pub hex_mode: bool,

    #[serde(default)]
    pub timestamp_mode: TimestampMode,

    /// strftime-style format used in `SystemTime` mode
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Interpret payloads through the DBC lookup
    #[serde(default)]
    pub interpret_frames: bool,
}

fn default_true() -> bool {
    true
}

fn default_time_format() -> String {
    "%b-%d %H:%M:%S%.3f".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            hex_mode: true,
            timestamp_mode: TimestampMode::Raw,
            time_format: default_time_format(),
            interpret_frames: false,
        }
    }
}

impl DisplayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: hex (true) or decimal (false) numbers
    pub fn with_hex_mode(mut self, enabled: bool) -> Self {
        self.hex_mode = enabled;
        self
    }

    /// Builder method: timestamp rendering
    pub fn with_timestamp_mode(mut self, mode: TimestampMode) -> Self {
        self.timestamp_mode = mode;
        self
    }

    /// Builder method: wall-clock format string
    pub fn with_time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    /// Builder method: DBC interpretation
    pub fn with_interpret_frames(mut self, enabled: bool) -> Self {
        self.interpret_frames = enabled;
        self
    }

    pub fn decimal_mode(&self) -> bool {
        !self.hex_mode
    }

    pub fn seconds_mode(&self) -> bool {
        self.timestamp_mode == TimestampMode::Seconds
    }
}

/// Configuration used to build a frame model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub display: DisplayConfig,

    /// Preallocated capacity of the frame sequences (default depends on the
    /// target's pointer width)
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Start in aggregate (overwrite) mode
    #[serde(default)]
    pub aggregate: bool,

    /// Filter file loaded when the model is built
    #[serde(default)]
    pub filter_file: Option<PathBuf>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: display flags
    pub fn with_display(mut self, display: DisplayConfig) -> Self {
        self.display = display;
        self
    }

    /// Builder method: preallocated capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Builder method: aggregate mode at start
    pub fn with_aggregate(mut self, enabled: bool) -> Self {
        self.aggregate = enabled;
        self
    }

    /// Builder method: filter file to load at start
    pub fn with_filter_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.filter_file = Some(path.into());
        self
    }

    /// Capacity to preallocate, falling back to [`default_capacity`]
    pub fn effective_capacity(&self) -> usize {
        self.capacity.unwrap_or_else(default_capacity)
    }
}

/// Preallocation sized to the address width: large enough that sustained
/// capture never reallocates on 64-bit hosts, restrained on 32-bit ones
pub fn default_capacity() -> usize {
    if usize::BITS > 32 {
        10_000_000
    } else {
        2_000_000
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if let Some(capacity) = config.capacity {
        if capacity == 0 {
            anyhow::bail!("capacity must be non-zero in {:?}", path);
        }
    }

    log::debug!("Loaded engine config from {:?}: {:?}", path, config);
    Ok(config)
}
