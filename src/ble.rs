use async_trait::async_trait;
use btleplug::api::{
    CentralEvent, CentralState, CharPropFlags, Central, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace, warn};
use uuid::Uuid;

use crate::transport::{DiscoveredPeripheral, PeripheralId, Transport, TransportEvent, WriteChannel};
use crate::{Error, Result};

/// Gets the default Bluetooth adapter
#[instrument(skip(manager))]
async fn get_central(manager: &Manager) -> Result<Adapter> {
    debug!("Getting default Bluetooth adapter");
    let adapter = manager.adapters().await?.into_iter().next().ok_or_else(|| {
        error!("No Bluetooth adapters found");
        Error::NoBluetoothAdapters
    })?;
    debug!("Using Bluetooth adapter");
    Ok(adapter)
}

/// [`Transport`] backed by the system Bluetooth stack through btleplug.
///
/// Holds no peripheral handles of its own; btleplug already tracks what the
/// adapter has seen, so lookups go through the adapter each time.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Opens the first adapter and starts forwarding its events.
    ///
    /// The receiver gets the current adapter state first, then discoveries,
    /// disconnects and adapter power changes as they happen.
    #[instrument]
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        info!("Initializing BLE transport");
        let manager = Manager::new().await?;
        let adapter = get_central(&manager).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let initial = match adapter.adapter_state().await {
            Ok(CentralState::PoweredOff) => TransportEvent::AdapterPoweredOff,
            Ok(_) => TransportEvent::AdapterPoweredOn,
            Err(err) => {
                warn!("Could not query adapter state, assuming powered on: {}", err);
                TransportEvent::AdapterPoweredOn
            }
        };
        // the receiver is still in scope, this cannot fail
        let _ = tx.send(initial);

        let events = adapter.events().await?;
        tokio::spawn(forward_events(adapter.clone(), events, tx));

        Ok((Self { adapter }, rx))
    }

    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == id.as_str())
            .ok_or_else(|| Error::Transport(format!("unknown peripheral {}", id)))
    }

    fn characteristic(&self, peripheral: &Peripheral, channel: &WriteChannel) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == channel.service && c.uuid == channel.characteristic)
            .ok_or_else(|| Error::CharacteristicNotFound(channel.characteristic.to_string()))
    }
}

async fn forward_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(event) = events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(p) => p,
                    Err(err) => {
                        trace!("Peripheral vanished before lookup: {}", err);
                        continue;
                    }
                };
                TransportEvent::Discovered(DiscoveredPeripheral {
                    id: PeripheralId::new(id.to_string()),
                    address: Some(peripheral.address().to_string()),
                })
            }
            CentralEvent::DeviceDisconnected(id) => {
                TransportEvent::Disconnected(PeripheralId::new(id.to_string()))
            }
            CentralEvent::StateUpdate(state) => match adapter_event(state) {
                Some(event) => event,
                None => continue,
            },
            _ => continue,
        };

        if tx.send(forwarded).is_err() {
            debug!("Event receiver dropped, stopping event forwarding");
            return;
        }
    }
    warn!("Bluetooth adapter event stream ended");
}

/// Maps an adapter state change onto a power event. `Unknown` carries no news.
fn adapter_event(state: CentralState) -> Option<TransportEvent> {
    match state {
        CentralState::PoweredOn => Some(TransportEvent::AdapterPoweredOn),
        CentralState::PoweredOff => Some(TransportEvent::AdapterPoweredOff),
        _ => None,
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self) -> Result<()> {
        info!("Scanning for BLE devices...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn is_connected(&self, peripheral: &PeripheralId) -> Result<bool> {
        Ok(self.peripheral(peripheral).await?.is_connected().await?)
    }

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()> {
        self.peripheral(peripheral).await?.connect().await?;
        Ok(())
    }

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()> {
        self.peripheral(peripheral).await?.disconnect().await?;
        Ok(())
    }

    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<WriteChannel> {
        let device = self.peripheral(peripheral).await?;
        debug!("Discovering services...");
        device.discover_services().await?;

        let found = device
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics)
            .any(|c| c.uuid == characteristic);
        if !found {
            return Err(Error::CharacteristicNotFound(characteristic.to_string()));
        }

        debug!("Found write characteristic: {}", characteristic);
        Ok(WriteChannel {
            peripheral: peripheral.clone(),
            service,
            characteristic,
        })
    }

    async fn write(&self, channel: &WriteChannel, frame: &[u8], with_response: bool) -> Result<()> {
        let device = self.peripheral(&channel.peripheral).await?;
        let characteristic = self.characteristic(&device, channel)?;

        // Fall back when the strip does not acknowledge writes
        let write_type = if with_response && characteristic.properties.contains(CharPropFlags::WRITE)
        {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        trace!("Sending {} byte frame ({:?})", frame.len(), write_type);
        device.write(&characteristic, frame, write_type).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_state_maps_to_power_events() {
        assert_eq!(
            adapter_event(CentralState::PoweredOn),
            Some(TransportEvent::AdapterPoweredOn)
        );
        assert_eq!(
            adapter_event(CentralState::PoweredOff),
            Some(TransportEvent::AdapterPoweredOff)
        );
        assert_eq!(adapter_event(CentralState::Unknown), None);
    }
}
