//! Device connection factory.
//!
//! The sweep runner never opens instruments itself. It is handed a
//! [`DeviceFactory`], asks it for one oscilloscope and one laser link, and
//! closes both again on every exit path.

use crate::config::{LaserConfig, OscilloscopeConfig};
use crate::error::{SweepError, SweepResult};
use crate::hardware::capabilities::{LaserLink, ScopeLink};
use async_trait::async_trait;

/// Serial port used for the laser controller when none is given.
pub const DEFAULT_LASER_PORT: &str = "/dev/ttyUSB0";

/// Opens the instrument links a sweep needs.
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    async fn open_scope(&self, config: &OscilloscopeConfig) -> SweepResult<Box<dyn ScopeLink>>;

    async fn open_laser(&self, config: &LaserConfig) -> SweepResult<Box<dyn LaserLink>>;
}

/// Factory for the physical bench: a VISA oscilloscope and a serial laser.
///
/// Each transport is only available when its cargo feature is enabled;
/// otherwise opening it fails with [`SweepError::FeatureNotEnabled`].
#[derive(Debug, Clone)]
pub struct HardwareFactory {
    scope_resource: Option<String>,
    laser_port: String,
}

impl HardwareFactory {
    pub fn new(scope_resource: Option<String>, laser_port: Option<String>) -> Self {
        Self {
            scope_resource,
            laser_port: laser_port.unwrap_or_else(|| DEFAULT_LASER_PORT.to_string()),
        }
    }

    pub fn scope_resource(&self) -> Option<&str> {
        self.scope_resource.as_deref()
    }

    pub fn laser_port(&self) -> &str {
        &self.laser_port
    }
}

#[async_trait]
impl DeviceFactory for HardwareFactory {
    #[cfg(feature = "instrument_visa")]
    async fn open_scope(&self, config: &OscilloscopeConfig) -> SweepResult<Box<dyn ScopeLink>> {
        let resource = self.scope_resource.clone().ok_or_else(|| {
            SweepError::Configuration("no oscilloscope resource given (--scope)".to_string())
        })?;
        let scope = crate::hardware::visa::VisaScope::open(&resource, config.timeout).await?;
        Ok(Box::new(scope))
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn open_scope(&self, _config: &OscilloscopeConfig) -> SweepResult<Box<dyn ScopeLink>> {
        Err(SweepError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    #[cfg(feature = "instrument_serial")]
    async fn open_laser(&self, _config: &LaserConfig) -> SweepResult<Box<dyn LaserLink>> {
        let laser = crate::hardware::serial::SerialLaser::open(&self.laser_port)?;
        Ok(Box::new(laser))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open_laser(&self, _config: &LaserConfig) -> SweepResult<Box<dyn LaserLink>> {
        Err(SweepError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_laser_port() {
        let factory = HardwareFactory::new(None, None);
        assert_eq!(factory.laser_port(), DEFAULT_LASER_PORT);
        assert!(factory.scope_resource().is_none());

        let factory = HardwareFactory::new(Some("USB0::INSTR".into()), Some("/dev/ttyS1".into()));
        assert_eq!(factory.laser_port(), "/dev/ttyS1");
        assert_eq!(factory.scope_resource(), Some("USB0::INSTR"));
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[tokio::test]
    async fn test_laser_requires_feature() {
        let factory = HardwareFactory::new(None, None);
        let config = LaserConfig { baudrate: 115_200 };
        let err = factory.open_laser(&config).await.err().unwrap();
        assert!(matches!(err, SweepError::FeatureNotEnabled(ref f) if f == "instrument_serial"));
    }
}
