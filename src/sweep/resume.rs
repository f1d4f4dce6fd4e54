//! Fresh / resume / reject decision for a run directory.
//!
//! The configuration file that started a run is copied verbatim into the run
//! directory as `config.toml`. Every later invocation against the same
//! directory is compared against that snapshot.

use crate::config::{DriftPolicy, Settings};
use crate::error::{SweepError, SweepResult};
use crate::sweep::layout::CONFIG_FILE;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// Outcome of [`prepare`]. Rejection is reported as [`SweepError::RunExists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDecision {
    /// The run directory was created and the configuration snapshotted.
    Fresh,
    /// An existing run is being continued.
    Resume {
        /// Sections that differ from the snapshot (empty when identical)
        drift: Vec<String>,
    },
}

impl RunDecision {
    pub fn is_fresh(&self) -> bool {
        matches!(self, RunDecision::Fresh)
    }
}

/// Decide how to treat the run directory of `requested`.
///
/// `config_source` is the file `requested` was loaded from; it becomes the
/// snapshot of a fresh run. Nothing is written when the run is rejected.
pub fn prepare(requested: &Settings, config_source: &Path) -> SweepResult<RunDecision> {
    let run_path = requested.run_path();
    let snapshot = run_path.join(CONFIG_FILE);

    if !run_path.exists() {
        info!("Making run directory {}", run_path.display());
        fs::create_dir_all(&run_path)?;
        fs::copy(config_source, &snapshot)?;
        return Ok(RunDecision::Fresh);
    }

    if !requested.sweep.continue_on_restart {
        return Err(SweepError::RunExists(run_path));
    }

    info!(
        "Data run {} found, continuing from last position",
        run_path.display()
    );

    if !snapshot.exists() {
        warn!(
            "Run directory {} has no configuration snapshot, writing one",
            run_path.display()
        );
        fs::copy(config_source, &snapshot)?;
        return Ok(RunDecision::Resume { drift: Vec::new() });
    }

    let original = Settings::load_from(&snapshot)?;
    let drift = requested.diff_sections(&original);
    if !drift.is_empty() {
        error!(
            sections = %drift.join(", "),
            "Configuration does not match snapshot {}",
            snapshot.display()
        );
        if requested.sweep.on_config_drift == DriftPolicy::Abort {
            return Err(SweepError::ConfigDrift {
                path: run_path,
                sections: drift,
            });
        }
        warn!("Continuing with drifted configuration; snapshot left unchanged");
    }

    Ok(RunDecision::Resume { drift })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &Path, file: &str, resume: bool, averages: u32, drift: &str) -> std::path::PathBuf {
        let path = dir.join(file);
        let toml = format!(
            r#"
            [laser]
            [oscilloscope]
            averages = {averages}
            [sweep]
            path = "{}"
            name = "run"
            continue_on_restart = {resume}
            on_config_drift = "{drift}"
            [photoreceiver]
            bandwidth = 1e9
            transimpedance = 5e3
            "#,
            dir.join("data").display()
        );
        fs::write(&path, toml).unwrap();
        path
    }

    #[test]
    fn test_fresh_creates_dir_and_copies_config() {
        let dir = TempDir::new().unwrap();
        let source = write_config(dir.path(), "a.toml", false, 1, "warn");
        let settings = Settings::load_from(&source).unwrap();

        let decision = prepare(&settings, &source).unwrap();
        assert!(decision.is_fresh());
        let snapshot = settings.run_path().join(CONFIG_FILE);
        assert_eq!(fs::read(&snapshot).unwrap(), fs::read(&source).unwrap());
    }

    #[test]
    fn test_existing_dir_without_resume_rejected() {
        let dir = TempDir::new().unwrap();
        let source = write_config(dir.path(), "a.toml", false, 1, "warn");
        let settings = Settings::load_from(&source).unwrap();
        fs::create_dir_all(settings.run_path()).unwrap();

        let err = prepare(&settings, &source).unwrap_err();
        assert!(matches!(err, SweepError::RunExists(_)));
        assert!(!settings.run_path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_resume_with_matching_snapshot() {
        let dir = TempDir::new().unwrap();
        let source = write_config(dir.path(), "a.toml", true, 1, "warn");
        let settings = Settings::load_from(&source).unwrap();
        assert!(prepare(&settings, &source).unwrap().is_fresh());

        let decision = prepare(&settings, &source).unwrap();
        assert_eq!(decision, RunDecision::Resume { drift: vec![] });
    }

    #[test]
    fn test_drift_warns_and_keeps_snapshot() {
        let dir = TempDir::new().unwrap();
        let first = write_config(dir.path(), "a.toml", true, 1, "warn");
        let settings = Settings::load_from(&first).unwrap();
        prepare(&settings, &first).unwrap();
        let snapshot_before = fs::read(settings.run_path().join(CONFIG_FILE)).unwrap();

        let second = write_config(dir.path(), "b.toml", true, 8, "warn");
        let drifted = Settings::load_from(&second).unwrap();
        let decision = prepare(&drifted, &second).unwrap();

        assert_eq!(
            decision,
            RunDecision::Resume {
                drift: vec!["oscilloscope".to_string()]
            }
        );
        let snapshot_after = fs::read(settings.run_path().join(CONFIG_FILE)).unwrap();
        assert_eq!(snapshot_before, snapshot_after);
    }

    #[test]
    fn test_drift_aborts_when_configured() {
        let dir = TempDir::new().unwrap();
        let first = write_config(dir.path(), "a.toml", true, 1, "abort");
        let settings = Settings::load_from(&first).unwrap();
        prepare(&settings, &first).unwrap();

        let second = write_config(dir.path(), "b.toml", true, 8, "abort");
        let drifted = Settings::load_from(&second).unwrap();
        let err = prepare(&drifted, &second).unwrap_err();
        assert!(matches!(err, SweepError::ConfigDrift { ref sections, .. } if sections == &["oscilloscope"]));
    }

    #[test]
    fn test_resume_without_snapshot_writes_one() {
        let dir = TempDir::new().unwrap();
        let source = write_config(dir.path(), "a.toml", true, 1, "warn");
        let settings = Settings::load_from(&source).unwrap();
        fs::create_dir_all(settings.run_path()).unwrap();

        let decision = prepare(&settings, &source).unwrap();
        assert_eq!(decision, RunDecision::Resume { drift: vec![] });
        assert!(settings.run_path().join(CONFIG_FILE).exists());
    }
}
