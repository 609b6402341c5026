/*!
 # Host property surface

 What an automation host sees: on/off, brightness, hue and saturation, each
 with a get that answers from the confirmed cache and a set that queues a
 command and returns straight away. Without a configured device identity every
 call fails with [`Error::MissingDeviceIdentity`] and no command is queued.
*/

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::device::LedStrip;
use crate::transport::{Transport, TransportEvent};
use crate::{Error, Result};

/// Accessory configuration as supplied by the host
#[derive(Debug, Clone, Default)]
pub struct AccessoryConfig {
    /// Display name
    pub name: String,
    /// Peripheral id or MAC address of the strip
    pub uuid: Option<String>,
}

pub struct Accessory {
    name: String,
    strip: Option<LedStrip>,
}

impl Accessory {
    pub fn new(
        config: AccessoryConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        settings: Settings,
    ) -> Self {
        let strip = match config.uuid.as_deref() {
            Some(uuid) => match LedStrip::new(uuid, transport, events, settings) {
                Ok(strip) => {
                    info!("Device UUID: {}", uuid);
                    Some(strip)
                }
                Err(err) => {
                    error!("{}", err);
                    None
                }
            },
            None => {
                error!("{}", Error::MissingDeviceIdentity);
                None
            }
        };

        Self {
            name: config.name,
            strip,
        }
    }

    /// Wraps an already built strip
    pub fn with_strip(name: impl Into<String>, strip: LedStrip) -> Self {
        Self {
            name: name.into(),
            strip: Some(strip),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strip(&self) -> Result<&LedStrip> {
        self.strip.as_ref().ok_or_else(|| {
            error!("{}", Error::MissingDeviceIdentity);
            Error::MissingDeviceIdentity
        })
    }

    pub fn get_power(&self) -> Result<bool> {
        let strip = self.strip()?;
        debug!("Host asked power state (connected: {})", strip.is_connected());
        Ok(strip.power())
    }

    pub fn set_power(&self, on: bool) -> Result<()> {
        let strip = self.strip()?;
        info!("Host gave new power state {}", on);
        // answered before the strip confirms; the queue logs the outcome
        let _ = strip.set_power(on);
        Ok(())
    }

    pub fn get_brightness(&self) -> Result<u8> {
        let strip = self.strip()?;
        debug!("Host asked brightness");
        Ok(strip.brightness())
    }

    pub fn set_brightness(&self, brightness: i32) -> Result<()> {
        let strip = self.strip()?;
        info!("Host set brightness {}", brightness);
        let _ = strip.set_brightness(brightness);
        Ok(())
    }

    pub fn get_hue(&self) -> Result<f64> {
        Ok(self.strip()?.hue())
    }

    pub fn set_hue(&self, hue: f64) -> Result<()> {
        let strip = self.strip()?;
        info!("Host set hue {}", hue);
        let _ = strip.set_hue(hue);
        Ok(())
    }

    pub fn get_saturation(&self) -> Result<f64> {
        Ok(self.strip()?.saturation())
    }

    pub fn set_saturation(&self, saturation: f64) -> Result<()> {
        let strip = self.strip()?;
        info!("Host set saturation {}", saturation);
        let _ = strip.set_saturation(saturation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{DiscoveredPeripheral, PeripheralId};
    use std::time::Duration;

    fn accessory(uuid: Option<&str>) -> (Accessory, Arc<MockTransport>, mpsc::UnboundedSender<TransportEvent>) {
        let transport = Arc::new(MockTransport::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let accessory = Accessory::new(
            AccessoryConfig {
                name: "Desk strip".into(),
                uuid: uuid.map(str::to_string),
            },
            transport.clone(),
            rx,
            Settings::default(),
        );
        (accessory, transport, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn missing_uuid_fails_every_call() {
        for uuid in [None, Some("")] {
            let (accessory, transport, _tx) = accessory(uuid);
            assert_eq!(accessory.get_power(), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.set_power(true), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.get_brightness(), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.set_brightness(10), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.get_hue(), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.set_hue(10.0), Err(Error::MissingDeviceIdentity));
            assert_eq!(accessory.get_saturation(), Err(Error::MissingDeviceIdentity));
            assert_eq!(
                accessory.set_saturation(10.0),
                Err(Error::MissingDeviceIdentity)
            );
            assert!(transport.calls().is_empty());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn setters_answer_before_confirmation() {
        let (accessory, transport, tx) = accessory(Some("be:89:d0:01:02:03"));
        assert_eq!(accessory.name(), "Desk strip");

        accessory.set_power(true).unwrap();
        accessory.set_brightness(150).unwrap();
        assert_eq!(accessory.get_power(), Ok(false));

        tx.send(TransportEvent::AdapterPoweredOn).unwrap();
        tx.send(TransportEvent::Discovered(DiscoveredPeripheral {
            id: PeripheralId::new("be:89:d0:01:02:03"),
            address: None,
        }))
        .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(accessory.get_power(), Ok(true));
        assert_eq!(accessory.get_brightness(), Ok(100));
        assert_eq!(transport.written().len(), 1);
    }
}
