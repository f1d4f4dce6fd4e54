//! Custom error types for the sweep engine.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the failures a sweep can run into, from configuration problems caught
//! before any hardware is touched to instrument faults in the middle of a run.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, raised when the TOML file cannot
//!   be parsed or a required field is missing.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine
//!   (a zero repetition count, an empty run name, a missing file).
//! - **`RunExists`**: A fresh run was requested but its directory already exists.
//! - **`ConfigDrift`**: A resumed run's configuration differs from its snapshot.
//!   Only returned when the drift policy is `abort`.
//! - **`DirectoryCollision`**: Two grid points would share a run directory.
//! - **`Device`** / **`Timeout`**: Instrument communication failures. Both abort
//!   the sweep; partially written points are picked up by the next invocation.
//! - **`Io`**, **`Serialization`**, **`Csv`**: Artifact persistence failures.
//!
//! By using `#[from]`, `SweepError` can be created from the underlying error
//! types, so the `?` operator works across the crate.

use crate::sweep::grid::GridPoint;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error(
        "Run path {} found and continue_on_restart is false",
        .0.display()
    )]
    RunExists(PathBuf),

    #[error(
        "Configuration of {} does not match its snapshot (sections: {})",
        .path.display(),
        .sections.join(", ")
    )]
    ConfigDrift { path: PathBuf, sections: Vec<String> },

    #[error("Grid points {first} and {second} both map to directory '{name}'")]
    DirectoryCollision {
        name: String,
        first: GridPoint,
        second: GridPoint,
    },

    #[error("Device error: {0:#}")]
    Device(#[from] anyhow::Error),

    #[error("Timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Trace file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<SweepError>),
}

impl SweepError {
    /// True for failures that originate at the instrument link.
    pub fn is_device_error(&self) -> bool {
        matches!(self, SweepError::Device(_) | SweepError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SweepError::Configuration("repetitions must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration validation error: repetitions must be at least 1"
        );
    }

    #[test]
    fn test_device_error_keeps_context_chain() {
        let err: SweepError = anyhow::anyhow!("no response")
            .context("query 'INR?' failed")
            .into();
        let msg = err.to_string();
        assert!(msg.contains("query 'INR?' failed"));
        assert!(msg.contains("no response"));
        assert!(err.is_device_error());
    }

    #[test]
    fn test_run_exists_names_path() {
        let err = SweepError::RunExists(PathBuf::from("/data/run-1"));
        assert!(err.to_string().contains("/data/run-1"));
        assert!(!err.is_device_error());
    }

    #[test]
    fn test_drift_lists_sections() {
        let err = SweepError::ConfigDrift {
            path: PathBuf::from("/data/run-1"),
            sections: vec!["oscilloscope".into(), "sweep".into()],
        };
        assert!(err.to_string().contains("oscilloscope, sweep"));
    }
}
