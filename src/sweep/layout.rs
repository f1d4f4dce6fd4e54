//! On-disk layout of a run.
//!
//! ```text
//! <sweep.path>/<sweep.name>/
//!   config.toml                      canonical configuration snapshot
//!   1000uA-0mK/
//!     header.json                    {path, current, temperature, timestamp}
//!     laser-state.json               telemetry field -> raw response
//!     scope-trace-0.csv              "#key;value" lines, then one sample line
//!     scope-trace-1.csv
//!   1000uA-35000mK/
//!     ...
//! ```
//!
//! A point is complete when its header, its laser state and every trace file
//! exist. Completeness is decided from file presence only; contents are not
//! validated.

use crate::error::{SweepError, SweepResult};
use crate::sweep::grid::GridPoint;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the configuration snapshot inside a run directory.
pub const CONFIG_FILE: &str = "config.toml";
const HEADER_FILE: &str = "header.json";
const LASER_STATE_FILE: &str = "laser-state.json";

/// Key/value header stored at the top of each trace file.
pub type TraceHeader = BTreeMap<String, String>;

/// Laser telemetry snapshot, field name to raw response.
pub type LaserState = BTreeMap<String, String>;

/// Deterministic directory name for a grid point.
///
/// Current is expressed in microamps and temperature in millikelvin, both
/// rounded to the nearest integer with ties going to the even neighbour, so
/// names match run directories written by earlier acquisition scripts.
pub fn directory_name(point: &GridPoint) -> String {
    let micro_amps = (point.current * 1e6).round_ties_even() as i64;
    let milli_kelvin = (point.temperature * 1e3).round_ties_even() as i64;
    format!("{micro_amps}uA-{milli_kelvin}mK")
}

/// Reject grids in which two distinct points share a directory name.
pub fn check_collisions(points: &[GridPoint]) -> SweepResult<()> {
    let mut seen: HashMap<String, GridPoint> = HashMap::with_capacity(points.len());
    for point in points {
        let name = directory_name(point);
        if let Some(first) = seen.get(&name) {
            return Err(SweepError::DirectoryCollision {
                name,
                first: *first,
                second: *point,
            });
        }
        seen.insert(name, *point);
    }
    Ok(())
}

/// Root of a run: the configuration snapshot plus one directory per point.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
    repetitions: u32,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>, repetitions: u32) -> Self {
        Self {
            root: root.into(),
            repetitions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repetitions(&self) -> u32 {
        self.repetitions
    }

    /// Path of the canonical configuration snapshot.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Record for a single grid point.
    pub fn record(&self, point: GridPoint) -> PointRecord {
        PointRecord {
            path: self.root.join(directory_name(&point)),
            point,
            repetitions: self.repetitions,
        }
    }

    pub fn is_complete(&self, point: GridPoint) -> bool {
        self.record(point).is_complete()
    }
}

/// Contents of `header.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointHeader {
    /// Point directory
    pub path: String,
    pub current: f64,
    pub temperature: f64,
    /// Seconds since the Unix epoch at acquisition start
    pub timestamp: f64,
}

/// One trace file read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub header: TraceHeader,
    pub samples: Vec<f64>,
}

/// Artifacts belonging to one grid point.
#[derive(Debug, Clone)]
pub struct PointRecord {
    path: PathBuf,
    point: GridPoint,
    repetitions: u32,
}

impl PointRecord {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn point(&self) -> GridPoint {
        self.point
    }

    pub fn header_path(&self) -> PathBuf {
        self.path.join(HEADER_FILE)
    }

    pub fn laser_state_path(&self) -> PathBuf {
        self.path.join(LASER_STATE_FILE)
    }

    /// Trace file for repetition `n`.
    pub fn trace_path(&self, n: u32) -> PathBuf {
        self.path.join(format!("scope-trace-{n}.csv"))
    }

    /// Every file that must exist for the point to count as complete.
    pub fn artifact_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.header_path(), self.laser_state_path()];
        paths.extend((0..self.repetitions).map(|n| self.trace_path(n)));
        paths
    }

    pub fn is_complete(&self) -> bool {
        self.artifact_paths().iter().all(|path| path.exists())
    }

    /// Create the point directory if it does not exist yet.
    pub fn ensure_dir(&self) -> SweepResult<()> {
        if !self.path.exists() {
            debug!("Creating {}", self.path.display());
            fs::create_dir_all(&self.path)?;
        }
        Ok(())
    }

    /// Record the acquisition start for this point. Always overwrites.
    pub fn write_header(&self) -> SweepResult<PointHeader> {
        let header = PointHeader {
            path: self.path.to_string_lossy().into_owned(),
            current: self.point.current,
            temperature: self.point.temperature,
            timestamp: Utc::now().timestamp_micros() as f64 / 1e6,
        };
        let path = self.header_path();
        warn_overwrite(&path);
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &header)?;
        writer.flush()?;
        Ok(header)
    }

    /// Write repetition `n` as `#key;value` header lines followed by one
    /// comma separated line of samples.
    pub fn write_trace(&self, n: u32, header: &TraceHeader, samples: &[f64]) -> SweepResult<()> {
        let path = self.trace_path(n);
        debug!("Writing {}", path.display());
        warn_overwrite(&path);

        let mut file = BufWriter::new(File::create(&path)?);
        for (key, value) in header {
            writeln!(file, "#{key};{value}")?;
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(samples.iter().map(|s| s.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    /// Write the laser telemetry snapshot taken after the last repetition.
    pub fn write_laser_state(&self, state: &LaserState) -> SweepResult<()> {
        let path = self.laser_state_path();
        warn_overwrite(&path);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_header(&self) -> SweepResult<PointHeader> {
        let file = File::open(self.header_path())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn read_laser_state(&self) -> SweepResult<LaserState> {
        let file = File::open(self.laser_state_path())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Read repetition `n` back into its header map and samples.
    pub fn read_trace(&self, n: u32) -> SweepResult<Trace> {
        let path = self.trace_path(n);
        let reader = BufReader::new(File::open(&path)?);
        let mut header = TraceHeader::new();
        let mut samples = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(entry) = line.strip_prefix('#') {
                let (key, value) = entry.split_once(';').unwrap_or((entry, ""));
                header.insert(key.trim().to_string(), value.trim().to_string());
            } else {
                samples = line
                    .split(',')
                    .map(|v| v.trim().parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        SweepError::Configuration(format!(
                            "malformed sample in {}: {e}",
                            path.display()
                        ))
                    })?;
            }
        }
        Ok(Trace { header, samples })
    }

    /// Read every repetition of this point.
    pub fn read_traces(&self) -> SweepResult<Vec<Trace>> {
        (0..self.repetitions).map(|n| self.read_trace(n)).collect()
    }
}

fn warn_overwrite(path: &Path) {
    if path.exists() {
        warn!("Overwriting {}", path.display());
    }
}
