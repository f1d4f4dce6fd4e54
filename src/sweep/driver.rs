//! Sweep driver state machine.
//!
//! Walks the pending grid points in enumeration order, issuing laser
//! setpoints only when they change and capturing every repetition of a point
//! before moving on.
//!
//! # State Machine
//!
//! ```text
//! Idle ──setup──> DeviceSetup ──> Idle
//!   │
//!   ├──(temperature changed)──> SettleTemperature ─┐
//!   ├──(current changed)──────> SettleCurrent ─────┤
//!   │                                              ▼
//!   └──────────────────────────────────────> PointAcquire ──> Idle
//!
//! Idle ──(no points left)──> Done
//! ```
//!
//! "Changed" is relative to the previous point visited by this driver, so the
//! first point of every execution issues both setpoints.

use crate::config::Settings;
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{LaserLink, ScopeLink};
use crate::instrument::{Laser, Oscilloscope, PollSettings};
use crate::sweep::grid::GridPoint;
use crate::sweep::layout::RunLayout;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Between points
    Idle,
    /// Applying instrument configuration
    DeviceSetup,
    /// Waiting for a new temperature setpoint
    SettleTemperature,
    /// Waiting for a new current setpoint
    SettleCurrent,
    /// Capturing and persisting a point
    PointAcquire,
    /// All pending points visited
    Done,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverState::Idle => write!(f, "Idle"),
            DriverState::DeviceSetup => write!(f, "DeviceSetup"),
            DriverState::SettleTemperature => write!(f, "SettleTemperature"),
            DriverState::SettleCurrent => write!(f, "SettleCurrent"),
            DriverState::PointAcquire => write!(f, "PointAcquire"),
            DriverState::Done => write!(f, "Done"),
        }
    }
}

/// Counters collected while driving the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub points: usize,
    pub temperature_settles: usize,
    pub current_settles: usize,
    pub traces_written: usize,
}

/// Drives one oscilloscope and one laser through the pending grid points.
pub struct SweepDriver<'a> {
    settings: &'a Settings,
    layout: &'a RunLayout,
    scope: Oscilloscope<'a>,
    laser: Laser<'a>,
    state: DriverState,
    configured: bool,
    last_point: Option<GridPoint>,
    summary: SweepSummary,
}

impl<'a> SweepDriver<'a> {
    pub fn new(
        settings: &'a Settings,
        layout: &'a RunLayout,
        scope: &'a dyn ScopeLink,
        laser: &'a dyn LaserLink,
    ) -> Self {
        let poll = PollSettings::from_sweep(&settings.sweep);
        Self {
            settings,
            layout,
            scope: Oscilloscope::new(scope, &settings.oscilloscope, poll),
            laser: Laser::new(laser, poll),
            state: DriverState::Idle,
            configured: false,
            last_point: None,
            summary: SweepSummary::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn summary(&self) -> SweepSummary {
        self.summary
    }

    fn transition(&mut self, next: DriverState) {
        debug!("Driver {} -> {}", self.state, next);
        self.state = next;
    }

    /// Configure both instruments. Runs once per driver.
    pub async fn setup(&mut self) -> SweepResult<()> {
        if self.configured {
            return Ok(());
        }
        self.transition(DriverState::DeviceSetup);
        self.scope.setup().await?;
        self.laser.setup(&self.settings.laser).await?;
        self.configured = true;
        self.transition(DriverState::Idle);
        Ok(())
    }

    /// Visit every point in order, then finish in [`DriverState::Done`].
    pub async fn run(&mut self, pending: &[GridPoint]) -> SweepResult<SweepSummary> {
        self.setup().await?;
        let total = pending.len();
        for (index, point) in pending.iter().enumerate() {
            info!("Point {}/{}: {}", index + 1, total, point);
            self.visit(*point).await?;
        }
        self.transition(DriverState::Done);
        Ok(self.summary)
    }

    /// Settle as needed and acquire a single point.
    pub async fn visit(&mut self, point: GridPoint) -> SweepResult<()> {
        let settings = self.settings;
        let sweep = &settings.sweep;
        let previous = self.last_point;

        if previous.map_or(true, |p| p.temperature != point.temperature) {
            self.transition(DriverState::SettleTemperature);
            self.laser.set_temperature(point.temperature).await?;
            debug!("Sleeping {} s", sweep.temp_sleep);
            settle(sweep.temp_sleep).await?;
            self.summary.temperature_settles += 1;
        }

        if previous.map_or(true, |p| p.current != point.current) {
            self.transition(DriverState::SettleCurrent);
            self.laser.set_current(point.current).await?;
            debug!("Sleeping {} s", sweep.current_sleep);
            settle(sweep.current_sleep).await?;
            self.summary.current_settles += 1;
        }
        self.last_point = Some(point);

        self.transition(DriverState::PointAcquire);
        self.acquire(point).await?;
        self.summary.points += 1;
        self.transition(DriverState::Idle);
        Ok(())
    }

    async fn acquire(&mut self, point: GridPoint) -> SweepResult<()> {
        let record = self.layout.record(point);
        record.ensure_dir()?;
        record.write_header()?;

        for n in 0..self.layout.repetitions() {
            if n > 0 {
                settle(self.settings.sweep.measurement_sleep).await?;
            }
            let (header, samples) = self.scope.capture().await?;
            record.write_trace(n, &header, &samples)?;
            self.summary.traces_written += 1;
        }

        let state = self.laser.read_telemetry().await?;
        record.write_laser_state(&state)?;
        Ok(())
    }
}

async fn settle(seconds: f64) -> SweepResult<()> {
    if seconds > 0.0 {
        let delay = Duration::try_from_secs_f64(seconds).map_err(|e| {
            SweepError::Configuration(format!("invalid settle time {seconds} s: {e}"))
        })?;
        tokio::time::sleep(delay).await;
    }
    Ok(())
}
