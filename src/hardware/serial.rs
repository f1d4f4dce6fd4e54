//! Serial link to the laser controller.
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232 (USB-serial adapter)
//! - Framing: 8N1, opened at 9600 baud and switched to the configured rate
//! - Terminator: LF (\n) both ways
//! - Commands: `set_temperature <K>`, `set_current <A>`
//! - Queries: telemetry field name followed by `?`

use crate::hardware::capabilities::{CommandPort, LaserLink, Parity, SerialSettings};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::debug;

const OPEN_BAUD_RATE: u32 = 9600;

/// Laser controller on a serial port.
pub struct SerialLaser {
    port: Mutex<BufReader<SerialStream>>,
    framing: Mutex<SerialSettings>,
    timeout: Duration,
}

impl SerialLaser {
    /// Open the port at 9600 baud, 8N1.
    pub fn open(port_path: &str) -> Result<Self> {
        let port = tokio_serial::new(port_path, OPEN_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .with_context(|| format!("Failed to open laser serial port {port_path}"))?;

        Ok(Self {
            port: Mutex::new(BufReader::new(port)),
            framing: Mutex::new(SerialSettings {
                baud_rate: OPEN_BAUD_RATE,
                ..SerialSettings::default()
            }),
            timeout: Duration::from_secs(5),
        })
    }
}

#[async_trait]
impl CommandPort for SerialLaser {
    async fn write(&self, command: &str) -> Result<()> {
        let terminator = self.framing.lock().await.write_termination.clone();
        let mut port = self.port.lock().await;
        debug!("laser <- {}", command);
        port.get_mut()
            .write_all(format!("{command}{terminator}").as_bytes())
            .await
            .context("Laser write failed")?;
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        let terminator = self.framing.lock().await.write_termination.clone();
        let mut port = self.port.lock().await;
        port.get_mut()
            .write_all(format!("{command}{terminator}").as_bytes())
            .await
            .context("Laser write failed")?;

        let mut response = String::new();
        tokio::time::timeout(self.timeout, port.read_line(&mut response))
            .await
            .with_context(|| format!("Laser read timeout on '{command}'"))??;
        let response = response.trim().to_string();
        debug!("laser {} -> {}", command, response);
        Ok(response)
    }
}

#[async_trait]
impl LaserLink for SerialLaser {
    async fn configure_serial(&self, settings: &SerialSettings) -> Result<()> {
        let data_bits = match settings.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => return Err(anyhow!("Unsupported data bits: {other}")),
        };
        let stop_bits = match settings.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => return Err(anyhow!("Unsupported stop bits: {other}")),
        };
        let parity = match settings.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        };

        let mut port = self.port.lock().await;
        let stream = port.get_mut();
        stream
            .set_baud_rate(settings.baud_rate)
            .context("Failed to set laser baud rate")?;
        stream.set_data_bits(data_bits)?;
        stream.set_stop_bits(stop_bits)?;
        stream.set_parity(parity)?;

        *self.framing.lock().await = settings.clone();
        debug!("laser serial configured at {} baud", settings.baud_rate);
        Ok(())
    }
}
