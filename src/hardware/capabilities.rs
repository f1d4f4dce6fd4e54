//! Device Capabilities
//!
//! The sweep only ever talks to its two instruments through a narrow
//! command/query surface, regardless of the transport underneath:
//!
//! - [`CommandPort`]: `write`, `query`, `close` (every device)
//! - [`ScopeLink`]: adds binary block queries and link parameters
//! - [`LaserLink`]: adds serial framing parameters
//!
//! Real transports (VISA, serial) and the mocks in [`crate::hardware::mock`]
//! implement the same traits, so the sweep driver is unaware of which one it
//! is using.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Takes `&self`; implementations use interior mutability for link state

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Capability: Command / Query
///
/// # Contract
/// - `write` sends a command without reading a response
/// - `query` sends a command and returns the trimmed response line
/// - `close` releases the link; the device must not be used afterwards
#[async_trait]
pub trait CommandPort: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a command and read one response.
    async fn query(&self, command: &str) -> Result<String>;

    /// Release the underlying connection.
    ///
    /// # Default Implementation
    /// Nothing to release.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Numeric element type of a binary block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    I8,
    I16,
    F32,
}

impl NumericType {
    /// Element width in bytes.
    pub fn width(self) -> usize {
        match self {
            NumericType::I8 => 1,
            NumericType::I16 => 2,
            NumericType::F32 => 4,
        }
    }
}

/// Byte order of a binary block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Link parameters of an oscilloscope connection.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSettings {
    /// Per-command I/O timeout
    pub timeout: Duration,
    pub write_termination: String,
    pub read_termination: String,
    /// Transfer chunk size in bytes
    pub chunk_size: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            write_termination: "\n".to_string(),
            read_termination: "\n".to_string(),
            chunk_size: 20 * 1024,
        }
    }
}

/// Parity setting of a serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial framing of the laser link.
#[derive(Debug, Clone, PartialEq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    pub write_termination: String,
    pub read_termination: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            write_termination: "\n".to_string(),
            read_termination: "\n".to_string(),
        }
    }
}

/// Capability: Oscilloscope Link
///
/// # Contract
/// - `query_binary` decodes an IEEE 488.2 definite-length block into numbers
/// - `configure_link` may be called at any time; it applies to later commands
#[async_trait]
pub trait ScopeLink: CommandPort {
    /// Query a binary block and decode its elements.
    async fn query_binary(
        &self,
        command: &str,
        numeric_type: NumericType,
        endianness: Endianness,
    ) -> Result<Vec<f64>>;

    /// Apply timeout, terminators and chunk size.
    async fn configure_link(&self, settings: &LinkSettings) -> Result<()>;
}

/// Capability: Laser Link
#[async_trait]
pub trait LaserLink: CommandPort {
    /// Apply baud rate and framing.
    async fn configure_serial(&self, settings: &SerialSettings) -> Result<()>;
}

/// Decode the payload of an IEEE 488.2 definite-length block (`#<n><len><data>`).
///
/// Bytes before the `#` marker (an echoed header such as `DAT1,`) are skipped.
pub fn decode_block(raw: &[u8], numeric_type: NumericType, endianness: Endianness) -> Result<Vec<f64>> {
    let start = raw
        .iter()
        .position(|&b| b == b'#')
        .ok_or_else(|| anyhow::anyhow!("binary block has no '#' marker"))?;
    let digits = raw
        .get(start + 1)
        .and_then(|b| (*b as char).to_digit(10))
        .ok_or_else(|| anyhow::anyhow!("binary block has no length digit"))? as usize;
    let len_field = raw
        .get(start + 2..start + 2 + digits)
        .ok_or_else(|| anyhow::anyhow!("binary block length field truncated"))?;
    let len: usize = std::str::from_utf8(len_field)?.parse()?;
    let data_start = start + 2 + digits;
    let data = raw
        .get(data_start..data_start + len)
        .ok_or_else(|| anyhow::anyhow!("binary block shorter than its {len} byte header"))?;

    let width = numeric_type.width();
    let values = data
        .chunks_exact(width)
        .map(|chunk| match (numeric_type, endianness) {
            (NumericType::I8, _) => chunk[0] as i8 as f64,
            (NumericType::I16, Endianness::Little) => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            (NumericType::I16, Endianness::Big) => i16::from_be_bytes([chunk[0], chunk[1]]) as f64,
            (NumericType::F32, Endianness::Little) => {
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
            (NumericType::F32, Endianness::Big) => {
                f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64
            }
        })
        .collect();
    Ok(values)
}
