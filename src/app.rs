//! Top-level orchestration: wires parsed CLI arguments to the Fleet Supervisor and
//! Session operations, generic over [`AdapterFactory`] so tests can inject a
//! [`crate::transport::fake_backend::FakeAdapter`] in place of real BLE hardware.

use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::cli::{Args, Command, EraseMemArgs, FetchArgs, OutputFormat};
use crate::error::GspError;
use crate::fetch::FetchOutcome;
use crate::fleet::{self, FleetResult, Outcome};
use crate::protocol::POST_FETCH_SYSTEM_MODE;
use crate::session::model::DeviceStatus;
use crate::session::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_SCAN_TIMEOUT, Session};
use crate::telemetry;
use crate::transport::BleAdapter;
use crate::transport::btleplug_backend::BtleplugAdapter;

/// Produces a fresh [`BleAdapter`] for each connection attempt. A real adapter owns
/// platform BLE resources that cannot be shared across connections; a fake adapter in
/// tests is cheaply cloned instead.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn new_adapter(&self) -> Result<Box<dyn BleAdapter>, GspError>;
}

/// The real [`AdapterFactory`], backed by `btleplug`.
pub struct BtleplugAdapterFactory;

#[async_trait]
impl AdapterFactory for BtleplugAdapterFactory {
    async fn new_adapter(&self) -> Result<Box<dyn BleAdapter>, GspError> {
        Ok(Box::new(BtleplugAdapter::new().await?))
    }
}

/// Asks the operator to confirm a destructive action.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Prompts on stderr and reads one line from stdin, accepting `yes`/`y`
/// case-insensitively.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N]: ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Runs the CLI with already-parsed arguments against the real BLE stack.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails or output writing fails.
pub async fn run<W>(args: Args, out: &mut W) -> Result<bool>
where
    W: Write,
{
    run_with(args, out, Arc::new(BtleplugAdapterFactory), Arc::new(StdinConfirm)).await
}

/// Runs the CLI with an injected [`AdapterFactory`] and [`Confirm`] policy. Returns
/// whether every targeted device succeeded.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails or output writing fails.
pub async fn run_with<W>(
    args: Args,
    out: &mut W,
    adapter_factory: Arc<dyn AdapterFactory>,
    confirm: Arc<dyn Confirm>,
) -> Result<bool>
where
    W: Write,
{
    telemetry::initialise_tracing("gsp", io::stderr().is_terminal(), args.verbose())
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    let command_timeout = args.timeout().unwrap_or(DEFAULT_COMMAND_TIMEOUT);
    let retries = args.retries().unwrap_or(fleet::DEFAULT_RETRIES);
    let output_format = args.output_format();

    match args.into_command() {
        Command::Status(serial_args) => {
            let reports = run_status(serial_args.serials(), &adapter_factory, command_timeout).await;
            print_status(out, output_format, &reports)?;
            Ok(reports.iter().all(|(_, _, error)| error.is_none()))
        }
        Command::Config(config_args) => {
            let serials = config_args.serials().to_vec();
            let paths = config_args.paths().to_vec();
            let results = fleet::run_fleet(serials, retries, move |serial| {
                let adapter_factory = adapter_factory.clone();
                let paths = paths.clone();
                async move { run_configure_one(&*adapter_factory, &serial, command_timeout, &paths).await }
            })
            .await;
            print_fleet(out, output_format, &results)?;
            Ok(results.iter().all(|result| result.succeeded))
        }
        Command::Start(serial_args) => {
            let results = run_state_change(serial_args.serials(), retries, adapter_factory, command_timeout, true).await;
            print_fleet(out, output_format, &results)?;
            Ok(results.iter().all(|result| result.succeeded))
        }
        Command::Stop(serial_args) => {
            let results = run_state_change(serial_args.serials(), retries, adapter_factory, command_timeout, false).await;
            print_fleet(out, output_format, &results)?;
            Ok(results.iter().all(|result| result.succeeded))
        }
        Command::Erasemem(erase_args) => run_erasemem(&erase_args, out, output_format, adapter_factory, command_timeout, retries, &*confirm).await,
        Command::Fetch(fetch_args) => run_fetch(&fetch_args, out, output_format, &adapter_factory, command_timeout).await,
    }
}

async fn connect(adapter_factory: &dyn AdapterFactory, serial: &str, command_timeout: Duration, time_set_policy: bool) -> Result<Session, GspError> {
    let adapter = adapter_factory.new_adapter().await?;
    Session::connect(adapter, serial, DEFAULT_SCAN_TIMEOUT, command_timeout, time_set_policy).await
}

async fn close_logging_errors(session: Session, serial: &str) {
    if let Err(error) = session.close().await {
        warn!(serial, %error, "error while closing session");
    }
}

async fn run_status(serials: &[String], adapter_factory: &Arc<dyn AdapterFactory>, command_timeout: Duration) -> Vec<(String, DeviceStatus, Option<GspError>)> {
    let collected = Arc::new(Mutex::new(Vec::with_capacity(serials.len())));
    let adapter_factory = adapter_factory.clone();
    let collected_for_closure = collected.clone();
    fleet::run_fleet(serials.to_vec(), fleet::STATUS_RETRIES, move |serial| {
        let adapter_factory = adapter_factory.clone();
        let collected = collected_for_closure.clone();
        async move {
            let (status, error) = match connect(&*adapter_factory, &serial, command_timeout, true).await {
                Ok(session) => {
                    let (status, error) = session.get_status().await;
                    close_logging_errors(session, &serial).await;
                    (status, error)
                }
                Err(error) => (empty_status(), Some(error)),
            };
            let outcome = match &error {
                None => Outcome::Succeeded,
                Some(error) if error.is_fatal() => Outcome::Fatal,
                Some(_) => Outcome::Retryable,
            };
            collected.lock().unwrap_or_else(|poison| poison.into_inner()).push((serial, status, error));
            outcome
        }
    })
    .await;

    let mut reports = Arc::try_unwrap(collected).map(|mutex| mutex.into_inner().unwrap_or_else(|poison| poison.into_inner())).unwrap_or_default();
    reports.sort_by_key(|(serial, _, _)| serials.iter().position(|candidate| candidate == serial));
    reports
}

fn empty_status() -> DeviceStatus {
    DeviceStatus {
        protocol_version: 0,
        serial_number: String::new(),
        product_name: String::new(),
        dfu_mac: String::new(),
        app_name: String::new(),
        app_version: String::new(),
        dl_state: None,
    }
}

async fn run_configure_one(adapter_factory: &dyn AdapterFactory, serial: &str, command_timeout: Duration, paths: &[String]) -> Outcome {
    match connect(adapter_factory, serial, command_timeout, true).await {
        Ok(session) => {
            let outcome = session.configure(paths).await;
            close_logging_errors(session, serial).await;
            report_outcome(serial, outcome)
        }
        Err(error) => report_outcome(serial, Err(error)),
    }
}

async fn run_state_change(serials: &[String], retries: u32, adapter_factory: Arc<dyn AdapterFactory>, command_timeout: Duration, start: bool) -> Vec<FleetResult> {
    fleet::run_fleet(serials.to_vec(), retries, move |serial| {
        let adapter_factory = adapter_factory.clone();
        async move {
            match connect(&*adapter_factory, &serial, command_timeout, true).await {
                Ok(session) => {
                    let outcome = if start { session.start_logging().await } else { session.stop_logging().await };
                    close_logging_errors(session, &serial).await;
                    report_outcome(&serial, outcome)
                }
                Err(error) => report_outcome(&serial, Err(error)),
            }
        }
    })
    .await
}

fn report_outcome(serial: &str, outcome: Result<(), GspError>) -> Outcome {
    match outcome {
        Ok(()) => Outcome::Succeeded,
        Err(error) => {
            let fatal = error.is_fatal();
            warn!(serial, %error, fatal, "operation failed");
            if fatal { Outcome::Fatal } else { Outcome::Retryable }
        }
    }
}

async fn run_erasemem<W>(
    erase_args: &EraseMemArgs,
    out: &mut W,
    output_format: OutputFormat,
    adapter_factory: Arc<dyn AdapterFactory>,
    command_timeout: Duration,
    retries: u32,
    confirm: &dyn Confirm,
) -> Result<bool>
where
    W: Write,
{
    if !erase_args.force() {
        let proceed = confirm.confirm(&format!("Erase logbook on {} device(s)?", erase_args.serials().len()));
        if !proceed {
            writeln!(out, "erasemem cancelled")?;
            return Ok(false);
        }
    }

    let serials = erase_args.serials().to_vec();
    let results = fleet::run_fleet(serials, retries, move |serial| {
        let adapter_factory = adapter_factory.clone();
        async move {
            match connect(&*adapter_factory, &serial, command_timeout, false).await {
                Ok(session) => {
                    let outcome = session.erase_memory().await;
                    close_logging_errors(session, &serial).await;
                    report_outcome(&serial, outcome)
                }
                Err(error) => report_outcome(&serial, Err(error)),
            }
        }
    })
    .await;

    print_fleet(out, output_format, &results)?;
    Ok(results.iter().all(|result| result.succeeded))
}

/// Summary of one device's fetch session: every log retrieved, or the error that
/// stopped the session.
#[derive(Debug, Serialize)]
struct FetchReport {
    serial: String,
    logs: Vec<FetchedLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct FetchedLog {
    log_id: u32,
    bytes_written: u64,
    duration_ms: u128,
}

async fn run_fetch<W>(fetch_args: &FetchArgs, out: &mut W, output_format: OutputFormat, adapter_factory: &Arc<dyn AdapterFactory>, command_timeout: Duration) -> Result<bool>
where
    W: Write,
{
    std::fs::create_dir_all(fetch_args.output_dir())?;

    let mut reports = Vec::with_capacity(fetch_args.serials().len());
    for serial in fetch_args.serials() {
        let report = fetch_one_device(serial, fetch_args.output_dir(), &**adapter_factory, command_timeout).await;
        reports.push(report);
    }

    match output_format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&reports)?)?,
        OutputFormat::Pretty => {
            for report in &reports {
                match &report.error {
                    Some(error) => writeln!(out, "{}: fetch failed: {error}", report.serial)?,
                    None => {
                        writeln!(out, "{}: fetched {} log(s)", report.serial, report.logs.len())?;
                        for log in &report.logs {
                            writeln!(out, "  log {}: {} bytes in {}ms", log.log_id, log.bytes_written, log.duration_ms)?;
                        }
                    }
                }
            }
        }
    }

    Ok(reports.iter().all(|report| report.error.is_none()))
}

async fn fetch_one_device(serial: &str, output_dir: &Path, adapter_factory: &dyn AdapterFactory, command_timeout: Duration) -> FetchReport {
    let session = match connect(adapter_factory, serial, command_timeout, false).await {
        Ok(session) => session,
        Err(error) => return FetchReport { serial: serial.to_string(), logs: Vec::new(), error: Some(error.to_string()) },
    };

    let mut logs = Vec::new();
    let mut fetch_error = None;
    let mut any_fetched = false;
    let mut log_id = 1u32;

    loop {
        let file_path: PathBuf = output_dir.join(format!("Movesense_log_{log_id}_{serial}.sbem"));
        let mut sink = match File::create(&file_path) {
            Ok(file) => file,
            Err(error) => {
                fetch_error = Some(GspError::IoError(error).to_string());
                break;
            }
        };

        match session.fetch_log(log_id, &mut sink).await {
            Ok(FetchOutcome::NoMoreLogs) => {
                let _ = std::fs::remove_file(&file_path);
                break;
            }
            Ok(FetchOutcome::Fetched(report)) => {
                any_fetched = true;
                logs.push(FetchedLog { log_id: report.log_id, bytes_written: report.bytes_written, duration_ms: report.duration.as_millis() });
                log_id += 1;
            }
            Err(error) => {
                let _ = std::fs::remove_file(&file_path);
                fetch_error = Some(error.to_string());
                break;
            }
        }
    }

    if any_fetched && fetch_error.is_none() {
        if let Err(error) = session.set_system_mode(POST_FETCH_SYSTEM_MODE).await {
            warn!(serial, %error, "failed to reset system mode after fetch session");
        }
    }

    close_logging_errors(session, serial).await;
    FetchReport { serial: serial.to_string(), logs, error: fetch_error }
}

fn print_status<W: Write>(out: &mut W, output_format: OutputFormat, reports: &[(String, DeviceStatus, Option<GspError>)]) -> Result<()> {
    match output_format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct StatusJson<'a> {
                serial: &'a str,
                #[serde(flatten)]
                status: &'a DeviceStatus,
                #[serde(skip_serializing_if = "Option::is_none")]
                error: Option<String>,
            }
            let payload: Vec<StatusJson<'_>> = reports
                .iter()
                .map(|(serial, status, error)| StatusJson { serial, status, error: error.as_ref().map(ToString::to_string) })
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&payload)?)?;
        }
        OutputFormat::Pretty => {
            for (serial, status, error) in reports {
                writeln!(
                    out,
                    "{serial} ({}): protocol={} product={} app={} mac={} dl_state={:?}",
                    status.serial_number, status.protocol_version, status.product_name, status.app_version, status.dfu_mac, status.dl_state
                )?;
                if let Some(error) = error {
                    writeln!(out, "  error: {error}")?;
                }
            }
        }
    }
    Ok(())
}

fn print_fleet<W: Write>(out: &mut W, output_format: OutputFormat, results: &[FleetResult]) -> Result<()> {
    match output_format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(results)?)?,
        OutputFormat::Pretty => {
            for result in results {
                let outcome = if result.succeeded { "ok" } else { "failed" };
                writeln!(out, "{}: {outcome} (attempts={})", result.serial, result.attempts)?;
            }
        }
    }
    Ok(())
}
