//! Resumable grid sweep.
//!
//! Data flow:
//!
//! ```text
//! Settings -> resume::prepare -> grid::enumerate -> filter::filter
//!          -> driver::SweepDriver -> layout::PointRecord (artifacts)
//! ```
//!
//! [`runner::run_sweep`] runs the whole chain.

pub mod driver;
pub mod filter;
pub mod grid;
pub mod layout;
pub mod resume;
pub mod runner;

pub use driver::{DriverState, SweepDriver, SweepSummary};
pub use filter::{filter, CompletionReport};
pub use grid::{enumerate, GridPoint};
pub use layout::{directory_name, PointRecord, RunLayout};
pub use resume::{prepare, RunDecision};
pub use runner::{run_sweep, status, RunStatus, SweepOutcome};
