// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Performance counter configuration
//!
//! Loaded from TOML. Controls which categories may use the native counter
//! source and where the management source queries.

use serde::{Deserialize, Serialize};

use crate::error::{PerfError, Result};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Native counter source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Never use native counters; every group starts on the management source
    pub disabled: bool,
    /// Categories that skip native counters (case-insensitive)
    pub disabled_categories: Vec<String>,
    /// Resolve localized category names for instance enumeration
    pub localize: bool,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            disabled_categories: Vec::new(),
            localize: true,
        }
    }
}

/// Management query source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagementConfig {
    pub namespace: String,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            namespace: "root\\CIMV2".into(),
        }
    }
}

/// Performance counter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    pub log_level: LogLevel,
    pub poll_interval_ms: u64,
    pub native: NativeConfig,
    pub management: ManagementConfig,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            poll_interval_ms: 1000,
            native: NativeConfig::default(),
            management: ManagementConfig::default(),
        }
    }
}

impl PerfConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.poll_interval_ms == 0 {
            return Err(PerfError::Configuration(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        Ok(config)
    }

    /// Whether groups over `category` may use the native counter source
    pub fn native_allowed(&self, category: &str) -> bool {
        !self.native.disabled
            && !self
                .native
                .disabled_categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category))
    }

    /// Generate sample config
    pub fn sample_toml() -> String {
        r#"# Simon performance counter configuration
log_level = "Info"
poll_interval_ms = 1000

[native]
# Force every counter group onto the management (WMI) source
disabled = false
# Categories that are too expensive for native counters
disabled_categories = ["Process"]
localize = true

[management]
namespace = "root\\CIMV2"
"#
        .into()
    }
}
