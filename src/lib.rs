/*!
 # BLEDOM Bluetooth LED Strip Link

 A Rust library that keeps one BLEDOM-style Bluetooth LED strip connected and
 delivers power, brightness and color commands to it in order.

 ## Features

 * Scan / connect / reconnect state machine that survives the strip going out
   of range and the adapter being power cycled
 * Single-flight connection establishment shared by every caller
 * Ordered command queue that waits for the link and never lets one failure
   stall later commands
 * Cached power, brightness, hue and saturation reflecting confirmed writes only

 ## Example

 ```no_run
 use ledstrip_bledom::*;

 #[tokio::main]
 async fn main() -> std::result::Result<(), Error> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let strip = LedStrip::connect_ble("be:89:d0:01:02:03", Settings::default()).await?;

     // Commands are queued immediately and complete once the strip is reachable
     strip.set_power(true).await?;
     strip.set_hue(120.0).await?;
     if let Some(pending) = strip.set_brightness(80) {
         pending.await?;
     }

     println!("power={} brightness={}", strip.power(), strip.brightness());
     Ok(())
 }
 ```
*/

use std::time::Duration;
use thiserror::Error;

/// Error types for the LED strip link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Connecting or resolving the write characteristic failed
    #[error("Connection failed: {0}")]
    ConnectFailure(String),

    /// Writing a frame failed or there was nothing to write to
    #[error("Write failed: {0}")]
    WriteFailure(String),

    /// The strip did not become ready in time
    #[error("Timed out after {0:?} waiting for device")]
    ReadinessTimeout(Duration),

    /// No device identity configured
    #[error("Missing device UUID in config")]
    MissingDeviceIdentity,

    /// No Bluetooth adapters found
    #[error("No Bluetooth adapters found")]
    NoBluetoothAdapters,

    /// Failed to find required BLE characteristic
    #[error("Could not find required BLE characteristic: {0}")]
    CharacteristicNotFound(String),

    /// Error reported by the Bluetooth stack
    #[error("BLE communication error: {0}")]
    Transport(String),

    /// The command worker is gone
    #[error("Command queue closed")]
    QueueClosed,
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod accessory;
pub mod ble;
pub mod color;
pub mod config;
pub mod connection;
pub mod device;
pub mod protocol;
pub mod queue;
pub mod transport;

// Re-export key types
pub use accessory::{Accessory, AccessoryConfig};
pub use ble::BleTransport;
pub use color::hsl_to_rgb;
pub use config::Settings;
pub use connection::{ConnectionManager, LinkState};
pub use device::LedStrip;
pub use protocol::{encode_brightness, encode_power, encode_rgb, Frame};
pub use queue::{CommandQueue, Pending};
pub use transport::{
    DeviceIdentity, DiscoveredPeripheral, PeripheralId, Transport, TransportEvent, WriteChannel,
};
