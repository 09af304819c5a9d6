//! BLE transport abstraction: the capability interface the [`crate::session::Session`]
//! is built against, so its command/response logic never depends on a concrete BLE
//! stack.

pub mod btleplug_backend;
pub mod fake_backend;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::GspError;

/// A discovered BLE peripheral whose advertised local name matched the requested
/// serial suffix.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DiscoveredDevice {
    adapter_name: String,
    device_id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl DiscoveredDevice {
    #[must_use]
    pub fn new(
        adapter_name: String,
        device_id: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name,
            device_id,
            local_name,
            rssi,
        }
    }

    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Matches this device's advertised local name against a serial suffix, the way a
    /// peer's BLE advertisement is expected to carry its serial number as a trailing
    /// component of its local name.
    #[must_use]
    pub fn matches_serial_suffix(&self, suffix: &str) -> bool {
        self.local_name
            .as_deref()
            .is_some_and(|name| name.ends_with(suffix))
    }
}

/// Callback invoked for every inbound notification payload on the notify
/// characteristic. Implementations run it from whatever thread the underlying stack
/// delivers notifications on.
pub type NotifyCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Top-level BLE capability: scanning and connecting.
#[async_trait]
pub trait BleAdapter: Send {
    /// Scans until a peripheral whose local name ends with `suffix` is found, or
    /// `timeout` elapses, then connects and discovers the GSP service.
    async fn connect_by_serial_suffix(
        self: Box<Self>,
        suffix: &str,
        timeout: Duration,
    ) -> Result<Box<dyn BleLink>, GspError>;
}

/// Capability of one established connection to a GSP peripheral.
#[async_trait]
pub trait BleLink: Send + Sync {
    /// Returns the connected device's discovery record.
    fn device(&self) -> &DiscoveredDevice;

    /// Writes one frame to the write characteristic.
    async fn write_command(&self, payload: &[u8]) -> Result<(), GspError>;

    /// Subscribes to the notify characteristic, routing every payload to `on_notify`.
    /// Must be called exactly once, before any command is written.
    async fn subscribe(&self, on_notify: NotifyCallback) -> Result<(), GspError>;

    /// A token cancelled when the transport observes the peripheral disconnect.
    fn disconnected(&self) -> CancellationToken;

    /// Unsubscribes from the notify characteristic. Called once, before
    /// [`BleLink::disconnect`], as part of an orderly [`crate::session::Session::close`].
    async fn unsubscribe(&self) -> Result<(), GspError>;

    /// Disconnects from the peripheral.
    async fn disconnect(self: Box<Self>) -> Result<(), GspError>;
}
