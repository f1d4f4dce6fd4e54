//! # LC120 Noise Sweep Library
//!
//! Drives a temperature x current sweep of a laser diode controller while an
//! oscilloscope records photoreceiver noise traces, one directory per grid
//! point. A run can be interrupted at any time; the next invocation picks up
//! the points whose artifacts are missing.
//!
//! ## Crate Structure
//!
//! - **`config`**: `Settings`, loaded from TOML with `figment` and validated.
//! - **`error`**: the `SweepError` enum used across the crate.
//! - **`hardware`**: device capability traits, the connection factory, mock
//!   devices, and the VISA / serial transports (behind cargo features).
//! - **`instrument`**: oscilloscope and laser command sets, bounded polling.
//! - **`logging`**: `tracing-subscriber` setup for the binary.
//! - **`sweep`**: grid enumeration, run layout, completion filtering, the
//!   resume guard, and the sweep driver.

pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod logging;
pub mod sweep;

pub use config::Settings;
pub use error::{SweepError, SweepResult};
pub use sweep::{run_sweep, SweepOutcome};
