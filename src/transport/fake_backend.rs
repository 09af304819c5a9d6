//! Fixture-driven fake BLE transport used by unit and integration tests.
//!
//! Unlike a generic fixture DSL, the fake here is a small, faithful simulation of a
//! GSP peripheral's command handling — GSP's command surface is small and fully
//! enumerable, so scripting individual notification payloads by hand (as the teacher
//! codebase's image/GIF fixtures do) would add indirection without adding coverage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use super::{BleAdapter, BleLink, DiscoveredDevice, NotifyCallback};
use crate::error::GspError;
use crate::protocol::{self, Opcode, STATUS_NOT_FOUND, STATUS_OK};

/// One stored log on the fake datalogger: raw bytes, served back in fixed-size frames.
#[derive(Debug, Clone)]
pub struct FakeLog {
    pub bytes: Vec<u8>,
}

/// Scripted identity and content of a fake GSP peripheral.
#[derive(Debug, Clone, Builder)]
pub struct FakeDevice {
    #[builder(into)]
    pub serial_number: String,
    #[builder(into, default = "TestSensor".to_string())]
    pub product_name: String,
    #[builder(into, default = "AA:BB:CC:DD:EE:FF".to_string())]
    pub dfu_mac: String,
    #[builder(into, default = "gatt_sensordata_app".to_string())]
    pub app_name: String,
    #[builder(into, default = "1.0.0".to_string())]
    pub app_version: String,
    #[builder(default = 1)]
    pub protocol_version: u8,
    #[builder(default = 64)]
    pub frame_payload_size: usize,
    #[builder(default)]
    pub logs: BTreeMap<u32, FakeLog>,
}

impl FakeDevice {
    fn hello_body(&self) -> Vec<u8> {
        let mut body = vec![self.protocol_version];
        for field in [
            &self.serial_number,
            &self.product_name,
            &self.dfu_mac,
            &self.app_name,
            &self.app_version,
        ] {
            body.extend_from_slice(field.as_bytes());
            body.push(0);
        }
        body
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum LoggerState {
    Ready,
    Logging,
}

struct FakeDeviceState {
    device: FakeDevice,
    logger_state: LoggerState,
    system_mode: u8,
    configured_paths: Vec<String>,
}

/// A BLE adapter that always resolves to a single preconfigured fake peripheral.
#[derive(Clone)]
pub struct FakeAdapter {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeAdapter {
    #[must_use]
    pub fn new(device: FakeDevice) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeDeviceState {
                device,
                logger_state: LoggerState::Ready,
                system_mode: 0,
                configured_paths: Vec::new(),
            })),
        }
    }

    /// Returns the resource paths configured via `PUT_DATALOGGER_CONFIG` so far.
    #[must_use]
    pub fn configured_paths(&self) -> Vec<String> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).configured_paths.clone()
    }

    /// Returns the last system mode set via `PUT_SYSTEMMODE`.
    #[must_use]
    pub fn system_mode(&self) -> u8 {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner()).system_mode
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn connect_by_serial_suffix(
        self: Box<Self>,
        suffix: &str,
        timeout: Duration,
    ) -> Result<Box<dyn BleLink>, GspError> {
        let serial = self.state.lock().unwrap_or_else(|poison| poison.into_inner()).device.serial_number.clone();
        if !serial.ends_with(suffix) {
            return Err(GspError::DeviceNotFound { suffix: suffix.to_string(), timeout });
        }

        let device = DiscoveredDevice::new(
            "fake0".to_string(),
            serial.clone(),
            Some(format!("Movesense {serial}")),
            Some(-40),
        );

        Ok(Box::new(FakeLink {
            state: self.state,
            device,
            on_notify: Arc::new(AsyncMutex::new(None)),
            disconnected: CancellationToken::new(),
        }))
    }
}

struct FakeLink {
    state: Arc<Mutex<FakeDeviceState>>,
    device: DiscoveredDevice,
    on_notify: Arc<AsyncMutex<Option<Arc<dyn Fn(&[u8]) + Send + Sync>>>>,
    disconnected: CancellationToken,
}

fn command_response(reference: u8, status_code: u16, data: &[u8]) -> Vec<u8> {
    let mut bytes = vec![1, reference];
    bytes.extend_from_slice(&status_code.to_le_bytes());
    bytes.extend_from_slice(data);
    bytes
}

fn hello_response(reference: u8, data: &[u8]) -> Vec<u8> {
    let mut bytes = vec![1, reference];
    bytes.extend_from_slice(data);
    bytes
}

fn data_frame(reference: u8, offset: u32, chunk: &[u8]) -> Vec<u8> {
    let mut bytes = vec![2, reference];
    bytes.extend_from_slice(&offset.to_le_bytes());
    bytes.extend_from_slice(chunk);
    bytes
}

#[async_trait]
impl BleLink for FakeLink {
    fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    async fn write_command(&self, payload: &[u8]) -> Result<(), GspError> {
        if payload.len() < 2 {
            return Err(GspError::ProtocolError { detail: "command shorter than header".to_string() });
        }
        let opcode_byte = payload[0];
        let reference = payload[1];
        let body = &payload[2..];

        let Some(on_notify) = self.on_notify.lock().await.clone() else {
            return Err(GspError::ProtocolError { detail: "no subscriber for notifications".to_string() });
        };

        let frames = self.handle_command(opcode_byte, reference, body)?;
        for frame in frames {
            on_notify(&frame);
        }
        Ok(())
    }

    async fn subscribe(&self, on_notify: NotifyCallback) -> Result<(), GspError> {
        *self.on_notify.lock().await = Some(Arc::from(on_notify));
        Ok(())
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    async fn unsubscribe(&self) -> Result<(), GspError> {
        *self.on_notify.lock().await = None;
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), GspError> {
        self.disconnected.cancel();
        Ok(())
    }
}

impl FakeLink {
    fn handle_command(&self, opcode_byte: u8, reference: u8, body: &[u8]) -> Result<Vec<Vec<u8>>, GspError> {
        let mut state = self.state.lock().unwrap_or_else(|poison| poison.into_inner());

        if opcode_byte == Opcode::Hello.as_u8() {
            return Ok(vec![hello_response(reference, &state.device.hello_body())]);
        }
        if opcode_byte == Opcode::Get.as_u8() {
            let path = parse_nul_terminated(body)?;
            if path == protocol::DATALOGGER_STATE_PATH {
                let state_byte = match state.logger_state {
                    LoggerState::Ready => 2u8,
                    LoggerState::Logging => 3u8,
                };
                return Ok(vec![command_response(reference, STATUS_OK, &[state_byte])]);
            }
            return Ok(vec![command_response(reference, STATUS_NOT_FOUND, &[])]);
        }
        if opcode_byte == Opcode::PutDataloggerConfig.as_u8() {
            state.configured_paths = parse_nul_terminated_list(body)?;
            return Ok(vec![command_response(reference, STATUS_OK, &[])]);
        }
        if opcode_byte == Opcode::PutDataloggerState.as_u8() {
            let Some(&value) = body.first() else {
                return Err(GspError::ProtocolError { detail: "PUT_DATALOGGER_STATE missing byte".to_string() });
            };
            state.logger_state = if value == protocol::DATALOGGER_STATE_LOGGING {
                LoggerState::Logging
            } else {
                LoggerState::Ready
            };
            return Ok(vec![command_response(reference, STATUS_OK, &[])]);
        }
        if opcode_byte == Opcode::ClearLogbook.as_u8() {
            return Ok(vec![command_response(reference, STATUS_OK, &[])]);
        }
        if opcode_byte == Opcode::PutSystemMode.as_u8() {
            let Some(&value) = body.first() else {
                return Err(GspError::ProtocolError { detail: "PUT_SYSTEMMODE missing byte".to_string() });
            };
            state.system_mode = value;
            return Ok(vec![command_response(reference, STATUS_OK, &[])]);
        }
        if opcode_byte == Opcode::PutUtcTime.as_u8() {
            return Ok(vec![command_response(reference, STATUS_OK, &[])]);
        }
        if opcode_byte == Opcode::FetchLog.as_u8() {
            if body.len() < 4 {
                return Err(GspError::ProtocolError { detail: "FETCH_LOG missing log id".to_string() });
            }
            let log_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
            let Some(log) = state.device.logs.get(&log_id).cloned() else {
                return Ok(vec![command_response(reference, STATUS_NOT_FOUND, &[])]);
            };
            let mut frames = vec![command_response(reference, STATUS_OK, &[])];
            let chunk_size = state.device.frame_payload_size.max(1);
            let mut offset = 0u32;
            for chunk in log.bytes.chunks(chunk_size) {
                frames.push(data_frame(reference, offset, chunk));
                offset += chunk.len() as u32;
            }
            frames.push(data_frame(reference, offset, &[]));
            return Ok(frames);
        }

        Err(GspError::ProtocolError { detail: format!("fake device received unknown opcode {opcode_byte:#04x}") })
    }
}

fn parse_nul_terminated(body: &[u8]) -> Result<String, GspError> {
    let end = body.iter().position(|&byte| byte == 0).unwrap_or(body.len());
    String::from_utf8(body[..end].to_vec())
        .map_err(|error| GspError::ProtocolError { detail: error.to_string() })
}

fn parse_nul_terminated_list(body: &[u8]) -> Result<Vec<String>, GspError> {
    body.split(|&byte| byte == 0)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            String::from_utf8(segment.to_vec()).map_err(|error| GspError::ProtocolError { detail: error.to_string() })
        })
        .collect()
}
