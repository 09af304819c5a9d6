use thiserror::Error;

/// Phase in which a timeout was observed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Phase {
    /// Waiting for a command's `CommandResponse`.
    CommandResponse,
    /// Waiting for the next streamed data frame during `fetch_log`.
    StreamFrame,
    /// Waiting for a BLE connection to be established.
    Connect,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::CommandResponse => "command-response",
            Self::StreamFrame => "streaming-frame",
            Self::Connect => "connect",
        };
        write!(f, "{label}")
    }
}

/// Partial results of a `fetch_log` call that did not run to completion.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PartialTransfer {
    pub log_id: u32,
    pub bytes_written: u64,
}

/// Errors surfaced by every GSP operation, per the taxonomy in the protocol design.
#[derive(Debug, Error)]
pub enum GspError {
    /// Scan timed out with no advertisement matching the requested serial suffix.
    #[error("no device with serial suffix `{suffix}` was found within {timeout:?}")]
    DeviceNotFound { suffix: String, timeout: std::time::Duration },

    /// The transport refused or errored while establishing a connection.
    #[error("failed to connect: {reason}")]
    ConnectFailed { reason: String },

    /// The session observed an unexpected disconnect while an operation was pending.
    #[error("device disconnected unexpectedly")]
    Disconnected,

    /// A malformed frame, an unknown response code, or a truncated payload.
    #[error("protocol error: {detail}")]
    ProtocolError { detail: String },

    /// A well-formed `CommandResponse` carried a non-success status code.
    #[error("command failed with status {status_code}")]
    CommandFailed { status_code: u16 },

    /// A command-response, streaming-frame, or connect phase exceeded its deadline.
    #[error("timed out waiting for {phase}")]
    Timeout {
        phase: Phase,
        partial: Option<PartialTransfer>,
    },

    /// Writing to the fetch sink failed.
    #[error("I/O error writing to sink: {0}")]
    IoError(#[from] std::io::Error),

    /// The session was closed while a caller was waiting on a mailbox.
    #[error("operation cancelled: session was closed")]
    Cancelled,

    /// The underlying BLE stack reported an error.
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),

    /// No BLE adapters were present on this host.
    #[error("no BLE adapters were found")]
    NoAdapters,
}

impl GspError {
    /// `ProtocolError` indicates peer misbehaviour or a version skew and is fatal —
    /// the fleet supervisor should not retry it. All other kinds are retryable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ProtocolError { .. })
    }
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
