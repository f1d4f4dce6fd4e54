//! Instrument command sets layered on top of the hardware links.

pub mod laser;
pub mod oscilloscope;
pub mod poll;

pub use laser::Laser;
pub use oscilloscope::Oscilloscope;
pub use poll::{poll_until, PollSettings};
