//! Error types for Silicon Monitor performance counters

use std::io;
use thiserror::Error;

/// Result type alias for performance counter operations
pub type Result<T> = std::result::Result<T, PerfError>;

/// Error type for the counter acquisition subsystem.
///
/// Only [`PerfError::Configuration`] and [`PerfError::UnsupportedCell`] ever
/// escape a counter group; source failures are absorbed by the fallback to the
/// management source.
#[derive(Error, Debug)]
pub enum PerfError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed property descriptor or group setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Management cell with a type the decoder does not handle
    #[error("Unsupported cell type: {0}")]
    UnsupportedCell(String),

    /// Native counter source refused an open or add
    #[error("Native counter source error: {0}")]
    NativeSource(String),

    /// TOML config parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PerfError {
    /// True for errors that signal a defect rather than a transient condition.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::UnsupportedCell(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_configuration() {
        let err = PerfError::Configuration("no fields".to_string());
        assert_eq!(err.to_string(), "Configuration error: no fields");
    }

    #[test]
    fn test_display_unsupported_cell() {
        let err = PerfError::UnsupportedCell("R8".to_string());
        assert_eq!(err.to_string(), "Unsupported cell type: R8");
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: PerfError = io_err.into();
        assert!(err.to_string().contains("file missing"));
        assert!(!err.is_defect());
    }

    #[test]
    fn test_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid json }}}").unwrap_err();
        let err: PerfError = json_err.into();
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn test_defect_classification() {
        assert!(PerfError::Configuration("x".into()).is_defect());
        assert!(PerfError::UnsupportedCell("x".into()).is_defect());
        assert!(!PerfError::NativeSource("x".into()).is_defect());
    }
}
