//! Sweep configuration loaded with Figment.
//!
//! A run is described by one TOML file with four tables:
//!
//! ```toml
//! [laser]
//! baudrate = 115200
//!
//! [oscilloscope]
//! channel = 1
//! timescale = "100us"
//! coupling = "D1M"
//!
//! [sweep]
//! path = "/data/lc120"
//! name = "noise-2024-06"
//! continue_on_restart = true
//! repetitions = 3
//!
//! [photoreceiver]
//! bandwidth = 1e9
//! transimpedance = 5e3
//! ```
//!
//! `[measurement]` is accepted as an alias of `[sweep]`. Once a run directory
//! exists, the copy of this file inside it is the source of truth; a resumed
//! run must load to a value equal to the snapshot (see [`Settings::diff_sections`]).

use crate::error::{SweepError, SweepResult};
use figment::{
    providers::{Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Laser controller link settings
    pub laser: LaserConfig,
    /// Oscilloscope acquisition settings
    pub oscilloscope: OscilloscopeConfig,
    /// Grid bounds, delays and run directory
    #[serde(alias = "measurement")]
    pub sweep: SweepConfig,
    /// Device under test, recorded for analysis only
    pub photoreceiver: PhotoreceiverConfig,
}

/// Laser controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaserConfig {
    /// Serial baud rate
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
}

/// Oscilloscope configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscilloscopeConfig {
    /// Input channel (1-4)
    #[serde(default = "default_channel")]
    pub channel: u8,
    /// Horizontal scale, s/div, in instrument notation ("100us")
    #[serde(default = "default_timescale")]
    pub timescale: String,
    /// Probe attenuation factor
    #[serde(default = "default_unity")]
    pub attenuation: f64,
    /// Vertical scale in V/div
    #[serde(default = "default_unity")]
    pub scale: f64,
    /// Coupling mode ("D1M", "D50", "A1M", ...)
    #[serde(default = "default_coupling")]
    pub coupling: String,
    /// Vertical offset in instrument notation
    #[serde(default = "default_offset")]
    pub offset: String,
    /// Number of averages; 1 selects normal sampling
    #[serde(default = "default_averages")]
    pub averages: u32,
    /// Number of points per trace
    #[serde(default = "default_npoints")]
    pub npoints: u32,
    /// Trigger mode applied during setup
    #[serde(default = "default_trigger_mode")]
    pub trigger_mode: String,
    /// Enable the 20 MHz bandwidth limit
    #[serde(default)]
    pub bandwidth_limit: bool,
    /// Waveform transfer encoding
    #[serde(default)]
    pub waveform_format: WaveformFormat,
    /// I/O timeout for a single command on the link
    #[serde(default = "default_link_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Transfer chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// How the waveform payload is transferred from the scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformFormat {
    /// Comma separated ASCII values
    #[default]
    Ascii,
    /// Little-endian 16-bit words
    Binary,
}

/// What to do when a resumed run's configuration differs from its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Log the mismatch and continue
    #[default]
    Warn,
    /// Refuse to resume
    Abort,
}

/// Sweep grid, timing and run directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Parent directory for runs
    pub path: PathBuf,
    /// Run directory name under `path`
    #[serde(default = "default_run_name")]
    pub name: String,
    /// Allow resuming an existing run directory
    #[serde(default, alias = "resume")]
    pub continue_on_restart: bool,
    /// Traces captured per grid point
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    #[serde(default)]
    pub temp_min: f64,
    #[serde(default = "default_temp_max")]
    pub temp_max: f64,
    #[serde(default = "default_temp_step")]
    pub temp_step: f64,
    #[serde(default = "default_current_min")]
    pub current_min: f64,
    #[serde(default = "default_current_max")]
    pub current_max: f64,
    #[serde(default = "default_current_step")]
    pub current_step: f64,
    /// Settle time after a temperature change, seconds
    #[serde(default = "default_temp_sleep")]
    pub temp_sleep: f64,
    /// Settle time after a current change, seconds
    #[serde(default = "default_current_sleep")]
    pub current_sleep: f64,
    /// Pause between repetitions, seconds
    #[serde(default = "default_measurement_sleep")]
    pub measurement_sleep: f64,
    /// Interval between status register polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Deadline for a single acquisition to complete
    #[serde(default = "default_acquisition_timeout", with = "humantime_serde")]
    pub acquisition_timeout: Duration,
    /// Deadline for an operation-complete confirmation
    #[serde(default = "default_opc_timeout", with = "humantime_serde")]
    pub opc_timeout: Duration,
    /// Behaviour on configuration drift when resuming
    #[serde(default)]
    pub on_config_drift: DriftPolicy,
}

/// Photoreceiver metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoreceiverConfig {
    /// Bandwidth in Hz
    pub bandwidth: f64,
    /// Transimpedance gain in V/A
    pub transimpedance: f64,
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_channel() -> u8 {
    1
}

fn default_timescale() -> String {
    "100us".to_string()
}

fn default_unity() -> f64 {
    1.0
}

fn default_coupling() -> String {
    "D1M".to_string()
}

fn default_offset() -> String {
    "0".to_string()
}

fn default_averages() -> u32 {
    1
}

fn default_npoints() -> u32 {
    14_000
}

fn default_trigger_mode() -> String {
    "SINGle".to_string()
}

fn default_link_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_chunk_size() -> usize {
    20 * 1024
}

fn default_run_name() -> String {
    "untitled".to_string()
}

fn default_repetitions() -> u32 {
    1
}

fn default_temp_max() -> f64 {
    35.0
}

fn default_temp_step() -> f64 {
    35.0
}

fn default_current_min() -> f64 {
    1e-3
}

fn default_current_max() -> f64 {
    100e-3
}

fn default_current_step() -> f64 {
    1e-3
}

fn default_temp_sleep() -> f64 {
    1.0
}

fn default_current_sleep() -> f64 {
    0.05
}

fn default_measurement_sleep() -> f64 {
    10e-3
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_acquisition_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_opc_timeout() -> Duration {
    Duration::from_secs(10)
}

impl Settings {
    /// Load and validate a configuration file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SweepError::Configuration(format!(
                "configuration file {} not found",
                path.display()
            )));
        }
        let settings: Settings = Figment::new().merge(Toml::file(path)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> SweepResult<Self> {
        let settings: Settings = Figment::new().merge(Toml::string(toml)).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Directory holding every artifact of this run.
    pub fn run_path(&self) -> PathBuf {
        self.sweep.path.join(&self.sweep.name)
    }

    /// Validate configuration after loading.
    ///
    /// A zero or negative step yields an empty axis rather than an error, but
    /// a step so small that the grid would not fit in memory is rejected.
    pub fn validate(&self) -> SweepResult<()> {
        let sweep = &self.sweep;
        let scope = &self.oscilloscope;

        if sweep.name.trim().is_empty() {
            return Err(invalid("sweep.name cannot be empty"));
        }
        if sweep.repetitions == 0 {
            return Err(invalid("sweep.repetitions must be at least 1"));
        }
        for (field, value) in [
            ("temp_sleep", sweep.temp_sleep),
            ("current_sleep", sweep.current_sleep),
            ("measurement_sleep", sweep.measurement_sleep),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(&format!(
                    "sweep.{field} must be finite and non-negative, got {value}"
                )));
            }
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(invalid(&format!("sweep.{field} is too large, got {value}")));
            }
        }
        for (field, value) in [
            ("temp_min", sweep.temp_min),
            ("temp_max", sweep.temp_max),
            ("temp_step", sweep.temp_step),
            ("current_min", sweep.current_min),
            ("current_max", sweep.current_max),
            ("current_step", sweep.current_step),
        ] {
            if !value.is_finite() {
                return Err(invalid(&format!("sweep.{field} must be finite")));
            }
        }
        crate::sweep::grid::check_bounds(sweep)?;
        if sweep.poll_interval.is_zero() {
            return Err(invalid("sweep.poll_interval must be greater than zero"));
        }

        if !(1..=4).contains(&scope.channel) {
            return Err(invalid(&format!(
                "oscilloscope.channel must be 1-4, got {}",
                scope.channel
            )));
        }
        if scope.averages == 0 {
            return Err(invalid("oscilloscope.averages must be at least 1"));
        }
        if scope.npoints == 0 {
            return Err(invalid("oscilloscope.npoints must be at least 1"));
        }
        if scope.chunk_size == 0 {
            return Err(invalid("oscilloscope.chunk_size must be at least 1"));
        }
        if !scope.attenuation.is_finite() || scope.attenuation <= 0.0 {
            return Err(invalid("oscilloscope.attenuation must be positive"));
        }
        if !scope.scale.is_finite() || scope.scale <= 0.0 {
            return Err(invalid("oscilloscope.scale must be positive"));
        }

        if self.laser.baudrate == 0 {
            return Err(invalid("laser.baudrate must be positive"));
        }

        let receiver = &self.photoreceiver;
        if !receiver.bandwidth.is_finite() || receiver.bandwidth <= 0.0 {
            return Err(invalid("photoreceiver.bandwidth must be positive"));
        }
        if !receiver.transimpedance.is_finite() || receiver.transimpedance <= 0.0 {
            return Err(invalid("photoreceiver.transimpedance must be positive"));
        }

        Ok(())
    }

    /// Names of the top-level sections that differ between two configurations.
    pub fn diff_sections(&self, other: &Settings) -> Vec<String> {
        let mut sections = Vec::new();
        if self.laser != other.laser {
            sections.push("laser".to_string());
        }
        if self.oscilloscope != other.oscilloscope {
            sections.push("oscilloscope".to_string());
        }
        if self.sweep != other.sweep {
            sections.push("sweep".to_string());
        }
        if self.photoreceiver != other.photoreceiver {
            sections.push("photoreceiver".to_string());
        }
        sections
    }
}

fn invalid(msg: &str) -> SweepError {
    SweepError::Configuration(msg.to_string())
}
