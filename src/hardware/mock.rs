//! Mock Hardware Implementations
//!
//! Simulated oscilloscope and laser controller for running sweeps without
//! instruments attached (`--mock`) and for tests.
//!
//! # Available Mocks
//!
//! - `MockScope` - answers the oscilloscope command set, produces seeded
//!   synthetic noise traces, and can be told to report "not ready" for a
//!   number of status polls after each arm
//! - `MockLaser` - accepts setpoint commands and answers telemetry queries
//! - `MockFactory` - hands out mocks that share one call log per device kind
//!
//! Every command is appended to a shared call log (`"write:<cmd>"`,
//! `"query:<cmd>"`, ...) so tests can assert on device traffic even after the
//! device has been moved into the sweep driver.

use crate::config::{LaserConfig, OscilloscopeConfig};
use crate::error::SweepResult;
use crate::hardware::capabilities::{
    CommandPort, Endianness, LaserLink, LinkSettings, NumericType, ScopeLink, SerialSettings,
};
use crate::hardware::factory::DeviceFactory;
use crate::instrument::oscilloscope::{ARM_COMMAND, INR_NEW_SIGNAL, INR_TIMEOUT};
use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared, append-only log of device calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn record(log: &CallLog, entry: String) {
    lock(log).push(entry);
}

fn check_failure(fail_on: &Option<String>, command: &str) -> Result<()> {
    if let Some(prefix) = fail_on {
        if command.starts_with(prefix.as_str()) {
            bail!("Mock failure on '{}'", command);
        }
    }
    Ok(())
}

// =============================================================================
// MockScope - Simulated Oscilloscope
// =============================================================================

/// Behaviour knobs of a [`MockScope`].
#[derive(Debug, Clone)]
pub struct MockScopeOptions {
    /// Samples per synthetic trace
    pub npoints: usize,
    /// Status polls answered with "nothing yet" after each arm
    pub not_ready_polls: u32,
    /// Status polls answered with the timeout bit, before the not-ready ones
    pub timeout_polls: u32,
    /// Fail any command starting with this prefix
    pub fail_on: Option<String>,
    /// Seed for the synthetic noise
    pub seed: u64,
}

impl Default for MockScopeOptions {
    fn default() -> Self {
        Self {
            npoints: 1000,
            not_ready_polls: 0,
            timeout_polls: 0,
            fail_on: None,
            seed: 0x1c_120,
        }
    }
}

/// Mock oscilloscope answering the Siglent-style command set.
pub struct MockScope {
    options: MockScopeOptions,
    log: CallLog,
    responses: Mutex<HashMap<String, String>>,
    polls_remaining: AtomicU32,
    rng: Mutex<StdRng>,
    link: Mutex<LinkSettings>,
    closed: AtomicBool,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl MockScope {
    /// Create a mock scope with default behaviour.
    pub fn new() -> Self {
        Self::with_options(MockScopeOptions::default())
    }

    pub fn with_options(options: MockScopeOptions) -> Self {
        Self::build(options, Arc::new(Mutex::new(Vec::new())), None)
    }

    fn build(options: MockScopeOptions, log: CallLog, close_counter: Option<Arc<AtomicUsize>>) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        Self {
            options,
            log,
            responses: Mutex::new(HashMap::new()),
            polls_remaining: AtomicU32::new(0),
            rng: Mutex::new(rng),
            link: Mutex::new(LinkSettings::default()),
            closed: AtomicBool::new(false),
            close_counter,
        }
    }

    /// Override the response to a query.
    pub fn with_response(self, command: &str, response: &str) -> Self {
        lock(&self.responses).insert(command.to_string(), response.to_string());
        self
    }

    /// Handle to the call log, valid after the scope is moved.
    pub fn log_handle(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    /// Copy of the call log.
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Link settings last applied with `configure_link`.
    pub fn link_settings(&self) -> LinkSettings {
        lock(&self.link).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn noise(&self) -> Vec<f64> {
        let mut rng = lock(&self.rng);
        (0..self.options.npoints)
            .map(|_| 0.1 + rng.gen_range(-0.01..0.01))
            .collect()
    }

    fn interrupt_register(&self) -> u32 {
        let remaining = self.polls_remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return INR_NEW_SIGNAL;
        }
        self.polls_remaining.store(remaining - 1, Ordering::SeqCst);
        if remaining > self.options.not_ready_polls {
            INR_TIMEOUT
        } else {
            0
        }
    }
}

impl Default for MockScope {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandPort for MockScope {
    async fn write(&self, command: &str) -> Result<()> {
        record(&self.log, format!("write:{command}"));
        check_failure(&self.options.fail_on, command)?;
        if command == ARM_COMMAND {
            self.polls_remaining.store(
                self.options
                    .timeout_polls
                    .saturating_add(self.options.not_ready_polls),
                Ordering::SeqCst,
            );
        }
        Ok(())
    }

    async fn query(&self, command: &str) -> Result<String> {
        record(&self.log, format!("query:{command}"));
        check_failure(&self.options.fail_on, command)?;
        if let Some(response) = lock(&self.responses).get(command) {
            return Ok(response.clone());
        }
        let response = match command {
            "*IDN?" => "Siglent Technologies,SDS1104X-E,MOCK0000000001,8.2.6.1.37R9".to_string(),
            "*OPC?" => "1".to_string(),
            "INR?" => self.interrupt_register().to_string(),
            ":ACQuire:SRATe?" => "1.00E+09".to_string(),
            ":WAV:XINC?" => "1.00E-09".to_string(),
            ":WAV:DATA?" => self
                .noise()
                .iter()
                .map(|v| format!("{v:.6}"))
                .collect::<Vec<_>>()
                .join(","),
            _ => "0".to_string(),
        };
        Ok(response)
    }

    async fn close(&self) -> Result<()> {
        record(&self.log, "close".to_string());
        self.closed.store(true, Ordering::SeqCst);
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl ScopeLink for MockScope {
    async fn query_binary(
        &self,
        command: &str,
        _numeric_type: NumericType,
        _endianness: Endianness,
    ) -> Result<Vec<f64>> {
        record(&self.log, format!("query_binary:{command}"));
        check_failure(&self.options.fail_on, command)?;
        Ok(self.noise())
    }

    async fn configure_link(&self, settings: &LinkSettings) -> Result<()> {
        record(&self.log, "configure_link".to_string());
        *lock(&self.link) = settings.clone();
        Ok(())
    }
}

// =============================================================================
// MockLaser - Simulated Laser Controller
// =============================================================================

/// Mock laser controller.
pub struct MockLaser {
    fail_on: Option<String>,
    log: CallLog,
    responses: Mutex<HashMap<String, String>>,
    serial: Mutex<SerialSettings>,
    close_counter: Option<Arc<AtomicUsize>>,
}

impl MockLaser {
    pub fn new() -> Self {
        Self::build(None, Arc::new(Mutex::new(Vec::new())), None)
    }

    fn build(fail_on: Option<String>, log: CallLog, close_counter: Option<Arc<AtomicUsize>>) -> Self {
        Self {
            fail_on,
            log,
            responses: Mutex::new(HashMap::new()),
            serial: Mutex::new(SerialSettings::default()),
            close_counter,
        }
    }

    /// Fail any command starting with `prefix`.
    pub fn failing_on(mut self, prefix: &str) -> Self {
        self.fail_on = Some(prefix.to_string());
        self
    }

    /// Override the response to a query.
    pub fn with_response(self, command: &str, response: &str) -> Self {
        lock(&self.responses).insert(command.to_string(), response.to_string());
        self
    }

    pub fn log_handle(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn call_log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Serial settings last applied with `configure_serial`.
    pub fn serial_settings(&self) -> SerialSettings {
        lock(&self.serial).clone()
    }
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandPort for MockLaser {
    async fn write(&self, command: &str) -> Result<()> {
        record(&self.log, format!("write:{command}"));
        check_failure(&self.fail_on, command)
    }

    async fn query(&self, command: &str) -> Result<String> {
        record(&self.log, format!("query:{command}"));
        check_failure(&self.fail_on, command)?;
        if let Some(response) = lock(&self.responses).get(command) {
            return Ok(response.clone());
        }
        Ok(match command {
            "*OPC?" => "1".to_string(),
            _ => "0".to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        record(&self.log, "close".to_string());
        if let Some(counter) = &self.close_counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[async_trait]
impl LaserLink for MockLaser {
    async fn configure_serial(&self, settings: &SerialSettings) -> Result<()> {
        record(&self.log, format!("configure_serial:{}", settings.baud_rate));
        *lock(&self.serial) = settings.clone();
        Ok(())
    }
}

// =============================================================================
// MockFactory
// =============================================================================

/// Factory producing mock devices with shared logs and open/close counters.
#[derive(Default)]
pub struct MockFactory {
    scope_options: MockScopeOptions,
    laser_fail_on: Option<String>,
    scope_log: CallLog,
    laser_log: CallLog,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope_options(mut self, options: MockScopeOptions) -> Self {
        self.scope_options = options;
        self
    }

    /// Make the laser fail any command starting with `prefix`.
    pub fn with_laser_failure(mut self, prefix: &str) -> Self {
        self.laser_fail_on = Some(prefix.to_string());
        self
    }

    /// Calls made on every scope this factory opened.
    pub fn scope_calls(&self) -> Vec<String> {
        lock(&self.scope_log).clone()
    }

    /// Calls made on every laser this factory opened.
    pub fn laser_calls(&self) -> Vec<String> {
        lock(&self.laser_log).clone()
    }

    /// Number of devices opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of devices closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceFactory for MockFactory {
    async fn open_scope(&self, _config: &OscilloscopeConfig) -> SweepResult<Box<dyn ScopeLink>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockScope::build(
            self.scope_options.clone(),
            Arc::clone(&self.scope_log),
            Some(Arc::clone(&self.closed)),
        )))
    }

    async fn open_laser(&self, _config: &LaserConfig) -> SweepResult<Box<dyn LaserLink>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLaser::build(
            self.laser_fail_on.clone(),
            Arc::clone(&self.laser_log),
            Some(Arc::clone(&self.closed)),
        )))
    }
}
