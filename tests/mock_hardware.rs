//! Integration tests for device handling during a sweep
//!
//! These tests drive `run_sweep` with mock instruments that fail or stall,
//! and check that devices are always released and that the traffic seen by
//! the instruments follows the expected order.

use lc120_noise::hardware::capabilities::{CommandPort, Endianness, NumericType, ScopeLink};
use lc120_noise::hardware::mock::{MockFactory, MockScope, MockScopeOptions};
use lc120_noise::hardware::{DeviceFactory, HardwareFactory};
use lc120_noise::sweep::{run_sweep, status};
use lc120_noise::SweepError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing_test::traced_test;

fn write_config(dir: &Path, acquisition_timeout: &str) -> PathBuf {
    let path = dir.join("sweep.toml");
    let toml = format!(
        r#"
[laser]

[oscilloscope]
channel = 3
averages = 4

[sweep]
path = "{}"
name = "bench"
continue_on_restart = true
repetitions = 2
temp_min = 10.0
temp_max = 20.0
temp_step = 10.0
current_min = 1e-3
current_max = 2e-3
current_step = 1e-3
temp_sleep = 0.0
current_sleep = 0.0
measurement_sleep = 0.0
poll_interval = "1ms"
acquisition_timeout = "{acquisition_timeout}"

[photoreceiver]
bandwidth = 1e9
transimpedance = 5e3
"#,
        dir.join("data").display()
    );
    fs::write(&path, toml).unwrap();
    path
}

// =============================================================================
// Device traffic
// =============================================================================

#[tokio::test]
async fn test_setup_precedes_acquisition() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "1s");
    let factory = MockFactory::new();
    run_sweep(&config, &factory).await.unwrap();

    let scope = factory.scope_calls();
    let first_arm = scope.iter().position(|c| c == "write:ARM").unwrap();
    let opc = scope.iter().position(|c| c == "query:*OPC?").unwrap();
    assert!(opc < first_arm);
    assert!(scope.contains(&"write::WAV:SOUR CHAN3".to_string()));
    assert!(scope.contains(&"write::ACQuire:TYPE AVERage".to_string()));
    assert_eq!(scope.iter().filter(|c| *c == "write:ARM").count(), 8);
    assert_eq!(scope.last().unwrap(), "close");

    let laser = factory.laser_calls();
    assert_eq!(laser[0], "configure_serial:115200");
    let setpoints: Vec<&str> = laser
        .iter()
        .filter(|c| c.starts_with("write:"))
        .map(String::as_str)
        .collect();
    assert_eq!(
        setpoints,
        vec![
            "write:set_temperature 10",
            "write:set_current 0.001",
            "write:set_temperature 20",
            "write:set_temperature 10",
            "write:set_current 0.002",
            "write:set_temperature 20",
        ]
    );
    assert_eq!(laser.last().unwrap(), "close");
}

#[tokio::test]
async fn test_telemetry_read_once_per_point() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "1s");
    let factory = MockFactory::new();
    run_sweep(&config, &factory).await.unwrap();

    let ilas_queries = factory
        .laser_calls()
        .iter()
        .filter(|c| *c == "query:ILAS?")
        .count();
    assert_eq!(ilas_queries, 4);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_device_failure_aborts_and_closes_devices() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "1s");
    let factory = MockFactory::new().with_laser_failure("set_current 0.002");

    let err = run_sweep(&config, &factory).await.unwrap_err();

    assert!(err.is_device_error());
    assert!(err.to_string().contains("set_current 0.002"));
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.closed(), 2);

    let progress = status(&config).unwrap();
    assert_eq!((progress.complete, progress.pending), (2, 2));
}

#[tokio::test]
#[traced_test]
async fn test_acquisition_timeout_is_reported() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "30ms");
    let factory = MockFactory::new().with_scope_options(MockScopeOptions {
        timeout_polls: u32::MAX,
        ..Default::default()
    });

    let err = run_sweep(&config, &factory).await.unwrap_err();

    match err {
        SweepError::Timeout { ref what, elapsed } => {
            assert_eq!(what, "oscilloscope acquisition");
            assert!(elapsed.as_millis() >= 30);
        }
        ref other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_device_error());
    assert!(logs_contain("acquisition timeout, still waiting"));
    assert_eq!(factory.closed(), 2);
}

#[tokio::test]
async fn test_slow_acquisition_within_deadline() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "5s");
    let factory = MockFactory::new().with_scope_options(MockScopeOptions {
        not_ready_polls: 5,
        timeout_polls: 2,
        npoints: 64,
        ..Default::default()
    });

    let outcome = run_sweep(&config, &factory).await.unwrap();
    assert_eq!(outcome.traces_written, 8);

    let polls = factory
        .scope_calls()
        .iter()
        .filter(|c| *c == "query:INR?")
        .count();
    assert_eq!(polls, 8 * 8);
}

#[cfg(not(feature = "instrument_visa"))]
#[tokio::test]
async fn test_hardware_factory_without_visa() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "1s");
    let factory = HardwareFactory::new(Some("USB0::0xF4EC::0xEE38::SDS1::INSTR".into()), None);

    let result = run_sweep(&config, &factory).await;
    assert!(matches!(result, Err(SweepError::FeatureNotEnabled(ref f)) if f == "instrument_visa"));
}

// =============================================================================
// MockScope
// =============================================================================

#[tokio::test]
async fn test_mock_scope_scripted_response_and_failure() {
    let scope = MockScope::with_options(MockScopeOptions {
        fail_on: Some(":WAV:DATA".to_string()),
        ..Default::default()
    })
    .with_response(":TIM:SCAL?", "1.00E-04");

    assert_eq!(scope.query(":TIM:SCAL?").await.unwrap(), "1.00E-04");
    assert_eq!(scope.query(":CHAN1:DISPlay?").await.unwrap(), "0");
    assert!(scope.query(":WAV:DATA?").await.is_err());
    assert!(scope
        .query_binary(":WAV:DATA?", NumericType::I16, Endianness::Little)
        .await
        .is_err());
}

#[tokio::test]
async fn test_mock_noise_is_seeded() {
    let a = MockScope::with_options(MockScopeOptions {
        seed: 7,
        npoints: 10,
        ..Default::default()
    });
    let b = MockScope::with_options(MockScopeOptions {
        seed: 7,
        npoints: 10,
        ..Default::default()
    });
    let trace_a = a.query(":WAV:DATA?").await.unwrap();
    let trace_b = b.query(":WAV:DATA?").await.unwrap();
    assert_eq!(trace_a, trace_b);

    for value in trace_a.split(',') {
        let v: f64 = value.parse().unwrap();
        assert!((0.09..=0.11).contains(&v));
    }
}

#[tokio::test]
async fn test_factory_scopes_share_call_log() {
    let factory = MockFactory::new();
    let settings = lc120_noise::Settings::from_toml_str(
        r#"
        [laser]
        [oscilloscope]
        [sweep]
        path = "/tmp"
        [photoreceiver]
        bandwidth = 1.0
        transimpedance = 1.0
        "#,
    )
    .unwrap();

    let first = factory.open_scope(&settings.oscilloscope).await.unwrap();
    let second = factory.open_scope(&settings.oscilloscope).await.unwrap();
    first.write("A").await.unwrap();
    second.write("B").await.unwrap();

    assert_eq!(factory.scope_calls(), vec!["write:A", "write:B"]);
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.closed(), 0);
}
