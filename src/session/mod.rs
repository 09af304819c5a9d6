//! Owns one connected GSP device end to end: discovery, connection, the high-level
//! operations, and guaranteed teardown.

pub mod model;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{Instrument as _, Span, info, info_span, warn};

use crate::codec::{self, Command};
use crate::error::{GspError, Phase};
use crate::fetch::{self, DRAIN_WINDOW, FetchOutcome, LogFetchReport, LogSink, STREAM_IDLE_TIMEOUT};
use crate::protocol::{self, Opcode, STATUS_NOT_FOUND, STATUS_OK};
use crate::router::{CommandOutcome, ResponseRouter};
use crate::transport::{BleAdapter, BleLink};
use model::{DataLoggerState, DeviceStatus, parse_hello_body};

/// Default deadline for a command's `CommandResponse`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Default deadline for the initial scan to find a matching advertisement.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// One connected datalogger. Not `Clone`: a Session is exclusively owned, and
/// [`Session::close`] consumes it so a closed Session cannot be reused.
pub struct Session {
    link: Option<Box<dyn BleLink>>,
    router: Arc<ResponseRouter>,
    span: Span,
    command_timeout: Duration,
}

impl Session {
    /// Scans for a peripheral whose advertised name ends with `serial_suffix`,
    /// connects, subscribes to notifications, and — if `time_set_policy` is set —
    /// synchronises the device's clock.
    ///
    /// # Errors
    ///
    /// Returns [`GspError::DeviceNotFound`] if no match appears within `scan_timeout`,
    /// or [`GspError::ConnectFailed`]/[`GspError::Ble`] if the connection fails.
    pub async fn connect(
        adapter: Box<dyn BleAdapter>,
        serial_suffix: &str,
        scan_timeout: Duration,
        command_timeout: Duration,
        time_set_policy: bool,
    ) -> Result<Self, GspError> {
        let link = adapter.connect_by_serial_suffix(serial_suffix, scan_timeout).await?;

        let span = info_span!(
            "gsp_session",
            device_id = %link.device().device_id(),
            local_name = ?link.device().local_name(),
        );

        let router = Arc::new(ResponseRouter::new());
        router.set_hello_reference(protocol::reference::HELLO);

        let router_for_notify = router.clone();
        link.subscribe(Box::new(move |bytes: &[u8]| router_for_notify.dispatch_bytes(bytes)))
            .instrument(span.clone())
            .await?;

        let session = Self { link: Some(link), router, span, command_timeout };

        if time_set_policy {
            session.sync_time().await?;
        }

        Ok(session)
    }

    /// Returns the active link. Panics if called after [`Session::close`], which
    /// cannot happen through the public API since `close` consumes the Session.
    fn link(&self) -> &dyn BleLink {
        self.link.as_deref().expect("Session used after close")
    }

    /// Unsubscribes, disconnects, and cancels every outstanding mailbox. Completes
    /// even if the transport already observed a disconnect.
    pub async fn close(mut self) -> Result<(), GspError> {
        let span = self.span.clone();
        let link = self.link.take().expect("Session used after close");
        async move {
            self.router.cancel_all();
            if let Err(error) = link.unsubscribe().await {
                warn!(%error, "failed to unsubscribe cleanly");
            }
            link.disconnect().await
        }
        .instrument(span)
        .await
    }

    async fn send_command(
        &self,
        opcode: Opcode,
        reference: u8,
        payload: Vec<u8>,
    ) -> Result<CommandOutcome, GspError> {
        let receiver = self.router.arm(reference);
        let command = Command::new(opcode, reference, payload);
        let bytes = codec::encode_command(&command);

        if let Err(error) = self.link().write_command(&bytes).await {
            self.router.disarm(reference);
            return Err(error);
        }

        let disconnected = self.link().disconnected();
        tokio::select! {
            outcome = receiver => outcome.map_err(|_| GspError::Cancelled),
            () = disconnected.cancelled() => {
                self.router.disarm(reference);
                Err(GspError::Disconnected)
            }
            () = sleep(self.command_timeout) => {
                self.router.disarm(reference);
                Err(GspError::Timeout { phase: Phase::CommandResponse, partial: None })
            }
        }
    }

    fn require_ok(outcome: CommandOutcome) -> Result<CommandOutcome, GspError> {
        match outcome.status_code {
            None | Some(STATUS_OK) => Ok(outcome),
            Some(status_code) => Err(GspError::CommandFailed { status_code }),
        }
    }

    async fn sync_time(&self) -> Result<(), GspError> {
        async {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default();
            let microseconds = now.as_micros().try_into().unwrap_or(u64::MAX);
            let outcome = self
                .send_command(Opcode::PutUtcTime, protocol::reference::TIME, Command::utc_time_payload(microseconds))
                .await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Sends HELLO, then GET's the datalogger state resource, composing both into a
    /// [`DeviceStatus`]. If the follow-up GET fails, the HELLO-derived fields are
    /// still returned with `dl_state` absent and the error reported alongside.
    pub async fn get_status(&self) -> (DeviceStatus, Option<GspError>) {
        async {
            let hello_outcome = match self.send_command(Opcode::Hello, protocol::reference::HELLO, vec![]).await {
                Ok(outcome) => outcome,
                Err(error) => return (parse_hello_body(&[]), Some(error)),
            };
            let mut status = parse_hello_body(&hello_outcome.data);

            let state_outcome = self
                .send_command(
                    Opcode::Get,
                    protocol::reference::GET,
                    Command::resource_path_payload(protocol::DATALOGGER_STATE_PATH),
                )
                .await
                .and_then(Self::require_ok);

            match state_outcome {
                Ok(outcome) => {
                    let Some(&state_byte) = outcome.data.first() else {
                        return (status, Some(GspError::ProtocolError { detail: "datalogger state response is empty".to_string() }));
                    };
                    match DataLoggerState::try_from(state_byte) {
                        Ok(state) => {
                            status.dl_state = Some(state);
                            (status, None)
                        }
                        Err(value) => (status, Some(GspError::ProtocolError { detail: format!("unknown datalogger state byte {value}") })),
                    }
                }
                Err(error) => (status, Some(error)),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Appends the caller's paths to the implicit `/Time/Detailed` path and issues
    /// `PUT_DATALOGGER_CONFIG`.
    pub async fn configure(&self, paths: &[String]) -> Result<(), GspError> {
        async {
            let all_paths = paths.iter().map(String::as_str).chain(std::iter::once(protocol::IMPLICIT_CONFIG_PATH));
            let payload = Command::config_payload(all_paths);
            let outcome = self.send_command(Opcode::PutDataloggerConfig, protocol::reference::PUT_CONFIG, payload).await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn start_logging(&self) -> Result<(), GspError> {
        async {
            let outcome = self
                .send_command(Opcode::PutDataloggerState, protocol::reference::START, vec![protocol::DATALOGGER_STATE_LOGGING])
                .await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn stop_logging(&self) -> Result<(), GspError> {
        async {
            let outcome = self
                .send_command(Opcode::PutDataloggerState, protocol::reference::STOP, vec![protocol::DATALOGGER_STATE_READY])
                .await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn erase_memory(&self) -> Result<(), GspError> {
        async {
            let outcome = self.send_command(Opcode::ClearLogbook, protocol::reference::ERASE, vec![]).await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Issued after every successful fetch session to reset the device's system mode
    /// (a firmware quirk, see the module-level design notes).
    pub async fn set_system_mode(&self, mode: u8) -> Result<(), GspError> {
        async {
            let outcome = self.send_command(Opcode::PutSystemMode, protocol::reference::SYSMODE, vec![mode]).await?;
            Self::require_ok(outcome)?;
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Streams one log's contents into `sink`. The active-stream channel is armed
    /// before the `FETCH_LOG` command is written, so a data frame that arrives ahead
    /// of its command response is never lost.
    pub async fn fetch_log(&self, log_id: u32, sink: &mut dyn LogSink) -> Result<FetchOutcome, GspError> {
        let span = self.span.clone();
        async move {
        let reference = protocol::reference::FETCH_LOG;
        let mut stream_receiver = self.router.arm_stream(reference);
        let response_receiver = self.router.arm(reference);

        let command = Command::new(Opcode::FetchLog, reference, Command::fetch_log_payload(log_id));
        if let Err(error) = self.link().write_command(&codec::encode_command(&command)).await {
            self.router.disarm(reference);
            self.router.disarm_stream();
            return Err(error);
        }

        let disconnected = self.link().disconnected();
        let started_at = Instant::now();

        let initial = tokio::select! {
            outcome = response_receiver => outcome.map_err(|_| GspError::Cancelled),
            () = disconnected.cancelled() => Err(GspError::Disconnected),
            () = sleep(self.command_timeout) => Err(GspError::Timeout { phase: Phase::CommandResponse, partial: None }),
        };

        let initial = match initial {
            Ok(outcome) => outcome,
            Err(error) => {
                self.router.disarm_stream();
                return Err(error);
            }
        };

        match initial.status_code {
            Some(STATUS_OK) | None => {}
            Some(STATUS_NOT_FOUND) => {
                self.router.disarm_stream();
                return Ok(FetchOutcome::NoMoreLogs);
            }
            Some(status_code) => {
                self.router.disarm_stream();
                return Err(GspError::CommandFailed { status_code });
            }
        }

        let mut high_water_mark = 0u64;
        let eof = loop {
            tokio::select! {
                frame = stream_receiver.recv() => {
                    let Some(frame) = frame else {
                        self.router.disarm_stream();
                        return Err(GspError::Disconnected);
                    };
                    let applied = fetch::apply_frame(sink, &frame.payload)?;
                    high_water_mark = high_water_mark.max(applied.high_water_mark);
                    if applied.is_eof {
                        break true;
                    }
                }
                () = disconnected.cancelled() => {
                    self.router.disarm_stream();
                    return Err(GspError::Disconnected);
                }
                () = sleep(STREAM_IDLE_TIMEOUT) => {
                    self.router.disarm_stream();
                    return Err(GspError::Timeout {
                        phase: Phase::StreamFrame,
                        partial: Some(crate::error::PartialTransfer { log_id, bytes_written: high_water_mark }),
                    });
                }
            }
        };

        if eof {
            loop {
                tokio::select! {
                    frame = stream_receiver.recv() => {
                        let Some(frame) = frame else { break };
                        if let Ok(applied) = fetch::apply_frame(sink, &frame.payload) {
                            high_water_mark = high_water_mark.max(applied.high_water_mark);
                        }
                    }
                    () = sleep(DRAIN_WINDOW) => break,
                }
            }
        }

        self.router.disarm_stream();
        info!(log_id, bytes_written = high_water_mark, "fetch_log complete");
        Ok(FetchOutcome::Fetched(LogFetchReport {
            log_id,
            bytes_written: high_water_mark,
            duration: started_at.elapsed(),
        }))
        }
        .instrument(span)
        .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.router.is_idle() {
            warn!("Session dropped with outstanding mailboxes; cancelling");
            self.router.cancel_all();
        }
    }
}
