//! End-to-end sweep execution.
//!
//! `run_sweep` wires the pieces together:
//!
//! 1. load and validate the configuration
//! 2. enumerate the grid and reject directory collisions
//! 3. decide fresh / resume / reject for the run directory
//! 4. drop points that are already complete on disk
//! 5. open the instruments, drive the remaining points, close the instruments
//!
//! No device is opened unless at least one point is pending.

use crate::config::Settings;
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{CommandPort, LaserLink, ScopeLink};
use crate::hardware::factory::DeviceFactory;
use crate::sweep::driver::{SweepDriver, SweepSummary};
use crate::sweep::filter::{filter, CompletionReport};
use crate::sweep::grid::enumerate;
use crate::sweep::layout::{check_collisions, RunLayout};
use crate::sweep::resume::{prepare, RunDecision};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// What a call to [`run_sweep`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub decision: RunDecision,
    /// Points in the full grid
    pub total: usize,
    /// Points already complete before this execution
    pub skipped: usize,
    /// Points acquired by this execution
    pub acquired: usize,
    pub temperature_settles: usize,
    pub current_settles: usize,
    pub traces_written: usize,
}

impl SweepOutcome {
    fn new(decision: RunDecision, report: &CompletionReport, summary: SweepSummary) -> Self {
        Self {
            decision,
            total: report.total,
            skipped: report.skipped,
            acquired: summary.points,
            temperature_settles: summary.temperature_settles,
            current_settles: summary.current_settles,
            traces_written: summary.traces_written,
        }
    }

    /// Nothing was acquired because every point was already complete.
    pub fn is_noop(&self) -> bool {
        self.acquired == 0 && self.skipped == self.total
    }
}

/// Run (or continue) the sweep described by the configuration at `config_path`.
pub async fn run_sweep(config_path: &Path, factory: &dyn DeviceFactory) -> SweepResult<SweepOutcome> {
    let settings = Settings::load_from(config_path)?;
    let points = enumerate(&settings.sweep)?;
    check_collisions(&points)?;

    let decision = prepare(&settings, config_path)?;
    let layout = RunLayout::new(settings.run_path(), settings.sweep.repetitions);
    let report = filter(&points, &layout);

    if report.is_done() {
        info!("All runs are complete");
        return Ok(SweepOutcome::new(decision, &report, SweepSummary::default()));
    }
    info!(
        "Partial data run, running {}/{}",
        report.pending.len(),
        report.total
    );

    let scope = factory.open_scope(&settings.oscilloscope).await?;
    let laser = match factory.open_laser(&settings.laser).await {
        Ok(laser) => laser,
        Err(err) => {
            if let Err(close_err) = close_device("oscilloscope", scope.as_ref()).await {
                error!("{}", close_err);
            }
            return Err(err);
        }
    };

    let result = {
        let mut driver = SweepDriver::new(&settings, &layout, scope.as_ref(), laser.as_ref());
        driver.run(&report.pending).await
    };
    let close_errors = close_devices(scope.as_ref(), laser.as_ref()).await;

    match result {
        Ok(summary) => {
            if !close_errors.is_empty() {
                return Err(SweepError::ShutdownFailed(close_errors));
            }
            let outcome = SweepOutcome::new(decision, &report, summary);
            info!(
                acquired = outcome.acquired,
                skipped = outcome.skipped,
                traces = outcome.traces_written,
                "Sweep finished"
            );
            Ok(outcome)
        }
        Err(err) => {
            for close_err in close_errors {
                error!("{}", close_err);
            }
            Err(err)
        }
    }
}

async fn close_device<D: CommandPort + ?Sized>(name: &str, device: &D) -> SweepResult<()> {
    device
        .close()
        .await
        .map_err(|e| SweepError::Device(e.context(format!("close {name}"))))
}

async fn close_devices(scope: &dyn ScopeLink, laser: &dyn LaserLink) -> Vec<SweepError> {
    let mut errors = Vec::new();
    if let Err(err) = close_device("oscilloscope", scope).await {
        errors.push(err);
    }
    if let Err(err) = close_device("laser", laser).await {
        errors.push(err);
    }
    errors
}

/// Progress of a run directory, read from disk only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub run_path: PathBuf,
    /// Whether the run directory exists
    pub exists: bool,
    pub total: usize,
    pub complete: usize,
    pub pending: usize,
}

/// Report how far the run described by `config_path` has progressed.
pub fn status(config_path: &Path) -> SweepResult<RunStatus> {
    let settings = Settings::load_from(config_path)?;
    let points = enumerate(&settings.sweep)?;
    let run_path = settings.run_path();
    let layout = RunLayout::new(&run_path, settings.sweep.repetitions);
    let report = filter(&points, &layout);

    Ok(RunStatus {
        exists: run_path.is_dir(),
        run_path,
        total: report.total,
        complete: report.skipped,
        pending: report.pending.len(),
    })
}
