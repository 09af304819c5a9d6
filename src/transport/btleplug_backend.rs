//! Real BLE transport backed by `btleplug`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{BleAdapter, BleLink, DiscoveredDevice, NotifyCallback};
use crate::error::GspError;
use crate::protocol::{NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// BLE transport built on the platform's real `btleplug` backend.
#[derive(Debug)]
pub struct BtleplugAdapter {
    manager: Manager,
}

impl BtleplugAdapter {
    /// Initialises the platform BLE manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform's BLE stack cannot be initialised.
    pub async fn new() -> Result<Self, GspError> {
        let manager = Manager::new().await?;
        Ok(Self { manager })
    }

    async fn adapters(&self) -> Result<Vec<Adapter>, GspError> {
        let adapters = self.manager.adapters().await?;
        if adapters.is_empty() {
            return Err(GspError::NoAdapters);
        }
        Ok(adapters)
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    #[instrument(skip(self), level = "debug", fields(%suffix, ?timeout))]
    async fn connect_by_serial_suffix(
        self: Box<Self>,
        suffix: &str,
        timeout: Duration,
    ) -> Result<Box<dyn BleLink>, GspError> {
        let adapters = self.adapters().await?;
        for adapter in &adapters {
            adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = Instant::now() + timeout;
        let peripheral = 'scan: loop {
            for adapter in &adapters {
                for peripheral in adapter.peripherals().await? {
                    let Some(properties) = peripheral.properties().await? else {
                        continue;
                    };
                    let local_name = properties.local_name.clone();
                    if !local_name.as_deref().is_some_and(|name| name.ends_with(suffix)) {
                        continue;
                    }

                    for adapter in &adapters {
                        if let Err(error) = adapter.stop_scan().await {
                            debug!(?error, "failed to stop scan cleanly");
                        }
                    }

                    info!(device_id = %peripheral.id(), "found matching peripheral");
                    break 'scan (peripheral, local_name, properties.rssi);
                }
            }

            if Instant::now() >= deadline {
                return Err(GspError::DeviceNotFound {
                    suffix: suffix.to_string(),
                    timeout,
                });
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        let (peripheral, local_name, rssi) = peripheral;
        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|error| GspError::ConnectFailed { reason: error.to_string() })?;
        }
        peripheral.discover_services().await?;

        let write_characteristic = find_characteristic(&peripheral, WRITE_CHARACTERISTIC_UUID)?;
        let notify_characteristic = find_characteristic(&peripheral, NOTIFY_CHARACTERISTIC_UUID)?;

        let device = DiscoveredDevice::new(
            "default".to_string(),
            peripheral.id().to_string(),
            local_name,
            rssi,
        );

        Ok(Box::new(BtleplugLink {
            peripheral,
            device,
            write_characteristic,
            notify_characteristic,
            disconnected: CancellationToken::new(),
        }))
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: &str) -> Result<Characteristic, GspError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid.to_string().eq_ignore_ascii_case(uuid))
        .ok_or_else(|| GspError::ProtocolError {
            detail: format!("peripheral does not expose characteristic {uuid}"),
        })
}

struct BtleplugLink {
    peripheral: Peripheral,
    device: DiscoveredDevice,
    write_characteristic: Characteristic,
    notify_characteristic: Characteristic,
    disconnected: CancellationToken,
}

#[async_trait]
impl BleLink for BtleplugLink {
    fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    #[instrument(skip(self, payload), level = "trace", fields(payload_len = payload.len()))]
    async fn write_command(&self, payload: &[u8]) -> Result<(), GspError> {
        self.peripheral
            .write(&self.write_characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, on_notify), level = "debug")]
    async fn subscribe(&self, on_notify: NotifyCallback) -> Result<(), GspError> {
        self.peripheral.subscribe(&self.notify_characteristic).await?;

        let mut notifications = self.peripheral.notifications().await?;
        let expected_uuid = self.notify_characteristic.uuid;
        let disconnected = self.disconnected.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != expected_uuid {
                    continue;
                }
                on_notify(&notification.value);
            }
            warn!("notification stream ended; marking link disconnected");
            disconnected.cancel();
        });

        Ok(())
    }

    fn disconnected(&self) -> CancellationToken {
        self.disconnected.clone()
    }

    #[instrument(skip(self), level = "debug")]
    async fn unsubscribe(&self) -> Result<(), GspError> {
        self.peripheral.unsubscribe(&self.notify_characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn disconnect(self: Box<Self>) -> Result<(), GspError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        self.disconnected.cancel();
        Ok(())
    }
}
