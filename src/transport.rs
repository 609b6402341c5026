/*!
 # Radio transport seam

 The link logic never talks to a Bluetooth stack directly. It drives a
 [`Transport`] and reacts to the [`TransportEvent`]s the environment feeds it.
 [`crate::ble::BleTransport`] is the production implementation.
*/

use async_trait::async_trait;
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Transport-level key of a peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peripheral seen while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    pub id: PeripheralId,
    /// MAC address when the platform exposes one
    pub address: Option<String>,
}

/// The resolved command characteristic of a connected peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteChannel {
    pub peripheral: PeripheralId,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Notifications delivered by the radio environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterPoweredOn,
    AdapterPoweredOff,
    Discovered(DiscoveredPeripheral),
    Disconnected(PeripheralId),
}

/// The identity of the one strip this process controls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Accepts a peripheral id or MAC address; blank input is rejected
    pub fn new(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::MissingDeviceIdentity);
        }
        Ok(Self(raw.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match against either the peripheral id or its address
    pub fn matches(&self, peripheral: &DiscoveredPeripheral) -> bool {
        peripheral.id.as_str().to_lowercase() == self.0
            || peripheral
                .address
                .as_deref()
                .is_some_and(|address| address.to_lowercase() == self.0)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operations the link needs from a radio stack
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn start_scan(&self) -> Result<()>;

    async fn stop_scan(&self) -> Result<()>;

    /// Whether the peripheral holds a transport-level connection
    async fn is_connected(&self, peripheral: &PeripheralId) -> Result<bool>;

    async fn connect(&self, peripheral: &PeripheralId) -> Result<()>;

    async fn disconnect(&self, peripheral: &PeripheralId) -> Result<()>;

    /// Resolves one characteristic of one service on a connected peripheral
    async fn discover_characteristic(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<WriteChannel>;

    async fn write(&self, channel: &WriteChannel, frame: &[u8], with_response: bool)
        -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn seen(id: &str, address: Option<&str>) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: PeripheralId::new(id),
            address: address.map(str::to_string),
        }
    }

    #[test]
    fn blank_identity_is_missing() {
        assert_eq!(DeviceIdentity::new("  "), Err(Error::MissingDeviceIdentity));
    }

    #[test]
    fn identity_matches_id_or_address_ignoring_case() {
        let identity = DeviceIdentity::new("BE:89:D0:01:02:03").unwrap();
        assert!(identity.matches(&seen("hci0/dev_be_89", Some("be:89:d0:01:02:03"))));
        assert!(identity.matches(&seen("be:89:d0:01:02:03", None)));
        assert!(!identity.matches(&seen("aa:bb", Some("aa:bb:cc:dd:ee:ff"))));
    }
}
