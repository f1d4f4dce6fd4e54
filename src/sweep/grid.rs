//! Grid enumeration over the temperature and current axes.
//!
//! Points are produced current-major: every temperature for the first
//! current, then every temperature for the next current. The sweep driver
//! relies on this ordering to keep current changes to one per outer group.

use crate::config::SweepConfig;
use crate::error::{SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative slack applied when deciding whether the last step lands on `max`.
const AXIS_EPSILON: f64 = 1e-9;

/// Largest number of values a single axis may expand to.
pub const MAX_AXIS_POINTS: usize = 100_000;

/// Largest number of points in the full grid.
pub const MAX_GRID_POINTS: usize = 1_000_000;

/// One (current, temperature) coordinate of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// Laser current in amperes
    pub current: f64,
    /// Temperature setpoint
    pub temperature: f64,
}

impl GridPoint {
    pub fn new(current: f64, temperature: f64) -> Self {
        Self {
            current,
            temperature,
        }
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(I={} A, T={})", self.current, self.temperature)
    }
}

/// Number of values on the axis `min..=max` with spacing `step`.
///
/// Degenerate axes (`step <= 0`, `max < min`, or a bound that is not finite)
/// have length zero. An axis longer than [`MAX_AXIS_POINTS`] is a
/// configuration error.
pub fn axis_len(min: f64, max: f64, step: f64) -> SweepResult<usize> {
    if !(min.is_finite() && max.is_finite() && step.is_finite()) || step <= 0.0 || max < min {
        return Ok(0);
    }
    let span = (max - min) / step;
    let count = (span + span.abs().max(1.0) * AXIS_EPSILON).floor() + 1.0;
    if !count.is_finite() || count > MAX_AXIS_POINTS as f64 {
        return Err(SweepError::Configuration(format!(
            "axis {min}..={max} with step {step} exceeds {MAX_AXIS_POINTS} points"
        )));
    }
    Ok(count as usize)
}

/// Values `min, min + step, ...` up to and including `max`.
///
/// Values are computed as `min + i * step` so rounding error does not
/// accumulate over long axes.
pub fn axis_values(min: f64, max: f64, step: f64) -> SweepResult<Vec<f64>> {
    let count = axis_len(min, max, step)?;
    Ok((0..count).map(|i| min + i as f64 * step).collect())
}

/// Check both axes and the size of their product without expanding them.
pub fn check_bounds(sweep: &SweepConfig) -> SweepResult<usize> {
    let temperatures = axis_len(sweep.temp_min, sweep.temp_max, sweep.temp_step)?;
    let currents = axis_len(sweep.current_min, sweep.current_max, sweep.current_step)?;
    match temperatures.checked_mul(currents) {
        Some(total) if total <= MAX_GRID_POINTS => Ok(total),
        _ => Err(SweepError::Configuration(format!(
            "grid of {currents} currents x {temperatures} temperatures exceeds {MAX_GRID_POINTS} points"
        ))),
    }
}

/// Expand the sweep bounds into the full ordered grid.
pub fn enumerate(sweep: &SweepConfig) -> SweepResult<Vec<GridPoint>> {
    check_bounds(sweep)?;
    let temperatures = axis_values(sweep.temp_min, sweep.temp_max, sweep.temp_step)?;
    let currents = axis_values(sweep.current_min, sweep.current_max, sweep.current_step)?;

    Ok(currents
        .iter()
        .flat_map(|&current| {
            temperatures
                .iter()
                .map(move |&temperature| GridPoint::new(current, temperature))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(temp: (f64, f64, f64), current: (f64, f64, f64)) -> SweepConfig {
        let toml = format!(
            r#"
            [laser]
            [oscilloscope]
            [sweep]
            path = "/tmp"
            temp_min = {}
            temp_max = {}
            temp_step = {}
            current_min = {}
            current_max = {}
            current_step = {}
            [photoreceiver]
            bandwidth = 1.0
            transimpedance = 1.0
            "#,
            temp.0, temp.1, temp.2, current.0, current.1, current.2
        );
        crate::config::Settings::from_toml_str(&toml)
            .unwrap()
            .sweep
    }

    #[test]
    fn test_temperature_axis_includes_max() {
        assert_eq!(axis_values(0.0, 35.0, 35.0).unwrap(), vec![0.0, 35.0]);
    }

    #[test]
    fn test_current_axis_has_100_values() {
        let currents = axis_values(1e-3, 100e-3, 1e-3).unwrap();
        assert_eq!(currents.len(), 100);
        assert!((currents[0] - 0.001).abs() < 1e-12);
        assert!((currents[99] - 0.100).abs() < 1e-12);
    }

    #[test]
    fn test_values_past_max_dropped() {
        assert_eq!(axis_values(0.0, 10.0, 4.0).unwrap(), vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn test_degenerate_axes_are_empty() {
        assert!(axis_values(0.0, 10.0, 0.0).unwrap().is_empty());
        assert!(axis_values(0.0, 10.0, -1.0).unwrap().is_empty());
        assert!(axis_values(10.0, 0.0, 1.0).unwrap().is_empty());
        assert!(axis_values(0.0, f64::INFINITY, 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_single_value_axis() {
        assert_eq!(axis_values(5.0, 5.0, 1.0).unwrap(), vec![5.0]);
    }

    #[test]
    fn test_enumerate_is_current_major() {
        let points = enumerate(&sweep((0.0, 35.0, 35.0), (1e-3, 3e-3, 1e-3))).unwrap();
        assert_eq!(points.len(), 6);

        let temps: Vec<f64> = points.iter().map(|p| p.temperature).collect();
        assert_eq!(temps, vec![0.0, 35.0, 0.0, 35.0, 0.0, 35.0]);

        // Current only changes at group boundaries.
        let changes = points
            .windows(2)
            .filter(|w| w[0].current != w[1].current)
            .count();
        assert_eq!(changes, 2);
    }

    #[test]
    fn test_enumerate_empty_when_an_axis_is_empty() {
        assert!(enumerate(&sweep((0.0, 35.0, 0.0), (1e-3, 3e-3, 1e-3)))
            .unwrap()
            .is_empty());
        assert!(enumerate(&sweep((0.0, 35.0, 35.0), (3e-3, 1e-3, 1e-3)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_tiny_step_is_rejected() {
        for step in [1e-300, 1e-12] {
            let err = axis_values(1e-3, 100e-3, step).unwrap_err();
            assert!(matches!(err, SweepError::Configuration(ref msg) if msg.contains("exceeds")));
        }
    }

    #[test]
    fn test_axis_at_limit_is_accepted() {
        let len = axis_len(0.0, (MAX_AXIS_POINTS - 1) as f64, 1.0).unwrap();
        assert_eq!(len, MAX_AXIS_POINTS);
        assert!(axis_len(0.0, MAX_AXIS_POINTS as f64, 1.0).is_err());
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let mut config = sweep((0.0, 35.0, 35.0), (1e-3, 3e-3, 1e-3));
        config.temp_max = 99_999.0;
        config.temp_step = 1.0;
        config.current_max = 100.0;
        config.current_step = 1.0;
        assert!(matches!(
            check_bounds(&config),
            Err(SweepError::Configuration(_))
        ));
        assert!(enumerate(&config).is_err());
    }
}
