use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

/// Command-line options for the GSP datalogger tool.
#[derive(Debug, Parser)]
#[command(name = "gsp", about = "Interact with GSP-protocol wearable dataloggers over BLE.")]
pub struct Args {
    /// Raises the log level to informational.
    #[arg(short = 'V', long, global = true)]
    verbose: bool,
    /// Command-response timeout, e.g. `10s`, `500ms`.
    #[arg(long, global = true, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// Overrides the fleet's default retry count for mutating operations.
    #[arg(long, global = true)]
    retries: Option<u32>,
    /// Output format for command results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    output_format: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn retries(&self) -> Option<u32> {
        self.retries
    }

    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        self.output_format
    }

    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines.
    Pretty,
    /// Machine-readable JSON, one object per device.
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query HELLO and datalogger state for one or more devices.
    Status(SerialArgs),
    /// Configure logged resource paths on one or more devices.
    Config(ConfigArgs),
    /// Start logging on one or more devices.
    Start(SerialArgs),
    /// Stop logging on one or more devices.
    Stop(SerialArgs),
    /// Fetch every stored log from one or more devices into a directory.
    Fetch(FetchArgs),
    /// Erase the logbook on one or more devices.
    Erasemem(EraseMemArgs),
}

/// Arguments shared by every subcommand: one or more target serial suffixes.
#[derive(Debug, ClapArgs)]
pub struct SerialArgs {
    /// Serial-number suffix of a target device. May be repeated.
    #[arg(short = 's', long = "serial", required = true, num_args = 1..)]
    serials: Vec<String>,
}

impl SerialArgs {
    #[must_use]
    pub fn serials(&self) -> &[String] {
        &self.serials
    }
}

/// Arguments for `config`.
#[derive(Debug, ClapArgs)]
pub struct ConfigArgs {
    #[command(flatten)]
    serial: SerialArgs,
    /// Resource path to log. May be repeated.
    #[arg(short = 'p', long = "path", required = true, num_args = 1..)]
    paths: Vec<String>,
}

impl ConfigArgs {
    #[must_use]
    pub fn serials(&self) -> &[String] {
        self.serial.serials()
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }
}

/// Arguments for `fetch`.
#[derive(Debug, ClapArgs)]
pub struct FetchArgs {
    #[command(flatten)]
    serial: SerialArgs,
    /// Directory logs are written into.
    #[arg(short = 'o', long = "output")]
    output_dir: PathBuf,
}

impl FetchArgs {
    #[must_use]
    pub fn serials(&self) -> &[String] {
        self.serial.serials()
    }

    #[must_use]
    pub fn output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }
}

/// Arguments for `erasemem`.
#[derive(Debug, ClapArgs)]
pub struct EraseMemArgs {
    #[command(flatten)]
    serial: SerialArgs,
    /// Skips the confirmation prompt.
    #[arg(long)]
    force: bool,
}

impl EraseMemArgs {
    #[must_use]
    pub fn serials(&self) -> &[String] {
        self.serial.serials()
    }

    #[must_use]
    pub fn force(&self) -> bool {
        self.force
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn status_requires_at_least_one_serial() {
        let result = Args::try_parse_from(["gsp", "status"]);
        assert!(result.is_err());
    }

    #[test]
    fn status_parses_repeated_serials() {
        let args = Args::try_parse_from(["gsp", "status", "-s", "0455", "-s", "1199"]).unwrap();
        let Command::Status(serial_args) = args.into_command() else {
            panic!("expected status command");
        };
        assert_eq!(vec!["0455".to_string(), "1199".to_string()], serial_args.serials());
    }

    #[test]
    fn config_requires_paths_and_serials() {
        let result = Args::try_parse_from(["gsp", "config", "-s", "0455"]);
        assert!(result.is_err());
    }

    #[test]
    fn config_parses_paths() {
        let args = Args::try_parse_from(["gsp", "config", "-s", "0455", "-p", "/Meas/ECG/200/mV"]).unwrap();
        let Command::Config(config_args) = args.into_command() else {
            panic!("expected config command");
        };
        assert_eq!(["/Meas/ECG/200/mV"], config_args.paths());
    }

    #[test]
    fn fetch_requires_output_dir() {
        let result = Args::try_parse_from(["gsp", "fetch", "-s", "0455"]);
        assert!(result.is_err());
    }

    #[test]
    fn erasemem_force_flag_parses() {
        let args = Args::try_parse_from(["gsp", "erasemem", "-s", "0455", "--force"]).unwrap();
        let Command::Erasemem(erase_args) = args.into_command() else {
            panic!("expected erasemem command");
        };
        assert!(erase_args.force());
    }

    #[test]
    fn timeout_parses_humantime_duration() {
        let args = Args::try_parse_from(["gsp", "--timeout", "30s", "status", "-s", "0455"]).unwrap();
        assert_eq!(Some(Duration::from_secs(30)), args.timeout());
    }

    #[test]
    fn output_format_defaults_to_pretty() {
        let args = Args::try_parse_from(["gsp", "status", "-s", "0455"]).unwrap();
        assert_matches!(args.output_format(), OutputFormat::Pretty);
    }

    #[test]
    fn output_format_json_parses() {
        let args = Args::try_parse_from(["gsp", "--output-format", "json", "status", "-s", "0455"]).unwrap();
        assert_matches!(args.output_format(), OutputFormat::Json);
    }
}
