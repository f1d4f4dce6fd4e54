//! Instrument links.
//!
//! - `capabilities`: the command/query contracts both instruments satisfy
//! - `factory`: opens the links a sweep needs
//! - `mock`: simulated devices for `--mock` runs and tests
//! - `visa` / `serial`: real transports, behind cargo features

pub mod capabilities;
pub mod factory;
pub mod mock;

#[cfg(feature = "instrument_serial")]
pub mod serial;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use capabilities::{CommandPort, LaserLink, ScopeLink};
pub use factory::{DeviceFactory, HardwareFactory};
pub use mock::{MockFactory, MockLaser, MockScope};
