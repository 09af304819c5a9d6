//! End-to-end scenarios driving the CLI entry point (`gsp::run_with`) against a
//! [`FakeAdapter`], one per device/session-layer scenario.

use std::sync::Arc;

use clap::Parser;
use gsp::cli::Args;
use gsp::transport::fake_backend::{FakeAdapter, FakeDevice, FakeLog};
use gsp::{AdapterFactory, Confirm, GspError, run_with};
use async_trait::async_trait;

struct SingleDeviceFactory {
    adapter: FakeAdapter,
}

#[async_trait]
impl AdapterFactory for SingleDeviceFactory {
    async fn new_adapter(&self) -> Result<Box<dyn gsp::transport::BleAdapter>, GspError> {
        Ok(Box::new(self.adapter.clone()))
    }
}

struct ScriptedConfirm(bool);

impl Confirm for ScriptedConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        self.0
    }
}

fn device(serial: &str) -> FakeDevice {
    FakeDevice::builder().serial_number(serial).build()
}

fn parse(argv: &[&str]) -> Args {
    Args::try_parse_from(argv).expect("valid CLI arguments")
}

#[tokio::test]
async fn status_reports_ready_datalogger_state() {
    let args = parse(&["gsp", "status", "-s", "0455"]);
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: FakeAdapter::new(device("241330000455")) });
    let mut out = Vec::new();

    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(succeeded);
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("241330000455"));
    assert!(printed.contains("TestSensor"));
    assert!(printed.contains("Ready"));
}

#[tokio::test]
async fn configure_appends_implicit_time_path() {
    let args = parse(&["gsp", "config", "-s", "0455", "-p", "/Meas/ECG/200/mV"]);
    let adapter = FakeAdapter::new(device("241330000455"));
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: adapter.clone() });

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(succeeded);
    let configured = adapter.configured_paths();
    assert_eq!(vec!["/Meas/ECG/200/mV".to_string(), "/Time/Detailed".to_string()], configured);
}

#[tokio::test]
async fn start_logging_succeeds_against_a_ready_device() {
    let args = parse(&["gsp", "start", "-s", "0455"]);
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: FakeAdapter::new(device("241330000455")) });

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(succeeded);
}

#[tokio::test]
async fn fetch_writes_one_log_and_stops_cleanly_at_the_404_boundary() {
    let mut fixture = device("241330000455");
    fixture.logs.insert(1, FakeLog { bytes: b"test data\0".to_vec() });
    let adapter = FakeAdapter::new(fixture);
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: adapter.clone() });

    let output_dir = std::env::temp_dir().join(format!("gsp-scenario-fetch-{}", std::process::id()));
    let args = parse(&["gsp", "fetch", "-s", "0455", "-o", output_dir.to_str().unwrap()]);

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(succeeded);
    let log_path = output_dir.join("Movesense_log_1_241330000455.sbem");
    assert!(log_path.exists());
    let written = std::fs::read(&log_path).unwrap();
    assert_eq!(b"test data\0".to_vec(), written);
    assert!(!output_dir.join("Movesense_log_2_241330000455.sbem").exists());
    assert_eq!(5, adapter.system_mode());

    let _ = std::fs::remove_dir_all(&output_dir);
}

#[tokio::test]
async fn erasemem_without_force_prompts_and_is_skipped_on_refusal() {
    let adapter = FakeAdapter::new(device("241330000455"));
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: adapter.clone() });
    let args = parse(&["gsp", "erasemem", "-s", "0455"]);

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(!succeeded);
    assert!(String::from_utf8(out).unwrap().contains("cancelled"));
}

#[tokio::test]
async fn erasemem_with_force_skips_the_prompt_and_erases() {
    let adapter = FakeAdapter::new(device("241330000455"));
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: adapter.clone() });
    let args = parse(&["gsp", "erasemem", "-s", "0455", "--force"]);

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(true))).await.unwrap();

    assert!(succeeded);
}

#[tokio::test]
async fn unknown_serial_suffix_fails_the_whole_operation() {
    let factory: Arc<dyn AdapterFactory> = Arc::new(SingleDeviceFactory { adapter: FakeAdapter::new(device("241330000455")) });
    let args = parse(&["gsp", "status", "-s", "9999"]);

    let mut out = Vec::new();
    let succeeded = run_with(args, &mut out, factory, Arc::new(ScriptedConfirm(false))).await.unwrap();

    assert!(!succeeded);
}
