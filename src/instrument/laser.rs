//! LC120 laser diode controller command set.

use crate::config::LaserConfig;
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{LaserLink, SerialSettings};
use crate::instrument::poll::{poll_until, PollSettings};
use crate::sweep::layout::LaserState;
use anyhow::Context;
use tracing::debug;

/// Telemetry fields recorded after every grid point, each queried as `<field>?`.
pub const TELEMETRY_FIELDS: [&str; 20] = [
    "DATE", "LEN", "LON", "ILAS_LIM", "ILAS_SP", "ILAS", "ITEC", "ITEC_ILIM", "TEMP", "TEMP_SP",
    "TECMODE", "VCC", "VCC_SP", "PI", "PI_STATE", "PI_RATE", "VDD", "TSCAL", "VREF", "VS",
];

/// Laser controller driven over a [`LaserLink`].
pub struct Laser<'a> {
    link: &'a dyn LaserLink,
    poll: PollSettings,
}

impl<'a> Laser<'a> {
    pub fn new(link: &'a dyn LaserLink, poll: PollSettings) -> Self {
        Self { link, poll }
    }

    /// Apply serial framing, then wait for `*OPC?`.
    pub async fn setup(&self, config: &LaserConfig) -> SweepResult<()> {
        let settings = SerialSettings {
            baud_rate: config.baudrate,
            ..SerialSettings::default()
        };
        self.link
            .configure_serial(&settings)
            .await
            .context("configure laser serial link")?;

        poll_until(
            "laser operation complete",
            self.poll.interval,
            self.poll.opc_timeout,
            move || async move {
                let response = self.link.query("*OPC?").await.context("laser query '*OPC?'")?;
                Ok::<_, SweepError>(response.trim() == "1")
            },
        )
        .await
    }

    async fn write(&self, command: &str) -> SweepResult<()> {
        debug!("laser <- {}", command);
        self.link
            .write(command)
            .await
            .with_context(|| format!("laser write '{command}'"))?;
        Ok(())
    }

    /// Request a new TEC temperature setpoint.
    pub async fn set_temperature(&self, temperature: f64) -> SweepResult<()> {
        self.write(&format!("set_temperature {temperature}")).await
    }

    /// Request a new diode current setpoint, in amps.
    pub async fn set_current(&self, current: f64) -> SweepResult<()> {
        self.write(&format!("set_current {current}")).await
    }

    /// Query every telemetry field.
    pub async fn read_telemetry(&self) -> SweepResult<LaserState> {
        let mut state = LaserState::new();
        for field in TELEMETRY_FIELDS {
            let query = format!("{field}?");
            let value = self
                .link
                .query(&query)
                .await
                .with_context(|| format!("laser query '{query}'"))?;
            state.insert(field.to_string(), value);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockLaser;
    use std::time::Duration;

    #[tokio::test]
    async fn test_setup_applies_baud_rate() {
        let mock = MockLaser::new();
        let laser = Laser::new(&mock, PollSettings::default());
        laser.setup(&LaserConfig { baudrate: 115_200 }).await.unwrap();

        assert_eq!(mock.serial_settings().baud_rate, 115_200);
        assert_eq!(mock.call_log(), vec!["configure_serial:115200", "query:*OPC?"]);
    }

    #[tokio::test]
    async fn test_setup_operation_complete_deadline() {
        let mock = MockLaser::new().with_response("*OPC?", "0");
        let poll = PollSettings {
            interval: Duration::from_millis(1),
            opc_timeout: Duration::from_millis(50),
            ..PollSettings::default()
        };
        let laser = Laser::new(&mock, poll);

        let err = laser.setup(&LaserConfig { baudrate: 9600 }).await.unwrap_err();
        assert!(matches!(
            err,
            SweepError::Timeout { ref what, .. } if what == "laser operation complete"
        ));
        assert_eq!(mock.call_log()[0], "configure_serial:9600");
    }

    #[tokio::test]
    async fn test_setpoint_commands() {
        let mock = MockLaser::new();
        let laser = Laser::new(&mock, PollSettings::default());
        laser.set_temperature(35.0).await.unwrap();
        laser.set_current(0.001).await.unwrap();
        assert_eq!(
            mock.call_log(),
            vec!["write:set_temperature 35", "write:set_current 0.001"]
        );
    }

    #[tokio::test]
    async fn test_telemetry_has_every_field() {
        let mock = MockLaser::new().with_response("ILAS?", "0.0100");
        let laser = Laser::new(&mock, PollSettings::default());
        let state = laser.read_telemetry().await.unwrap();
        assert_eq!(state.len(), TELEMETRY_FIELDS.len());
        assert_eq!(state["ILAS"], "0.0100");
        assert_eq!(state["VS"], "0");
    }

    #[tokio::test]
    async fn test_write_failure_is_device_error() {
        let mock = MockLaser::new().failing_on("set_current");
        let laser = Laser::new(&mock, PollSettings::default());
        let err = laser.set_current(0.002).await.unwrap_err();
        assert!(err.is_device_error());
        assert!(err.to_string().contains("set_current 0.002"));
    }
}
