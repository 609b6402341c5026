use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::ble::BleTransport;
use crate::color::hsl_to_rgb;
use crate::config::Settings;
use crate::connection::{ConnectionManager, LinkState};
use crate::protocol::{encode_brightness, encode_power, encode_rgb};
use crate::queue::{CommandQueue, Pending};
use crate::transport::{DeviceIdentity, Transport, TransportEvent};
use crate::Result;

/// Last confirmed state of the strip
#[derive(Debug, Clone, Copy, PartialEq)]
struct Confirmed {
    power: bool,
    brightness: u8,
    hue: f64,
    saturation: f64,
    rgb: (u8, u8, u8),
}

/// Hue and saturation as most recently requested, confirmed or not.
/// New color frames are built from these so that quick successive hue and
/// saturation changes combine.
#[derive(Debug, Clone, Copy)]
struct Requested {
    hue: f64,
    saturation: f64,
}

struct State {
    confirmed: Confirmed,
    requested: Requested,
    lightness: f64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            confirmed: Confirmed {
                power: false,
                brightness: 100,
                hue: 0.0,
                saturation: 0.0,
                rgb: (255, 255, 255),
            },
            requested: Requested {
                hue: 0.0,
                saturation: 0.0,
            },
            lightness: 0.5,
        }
    }
}

/// Main handle for one LED strip.
///
/// Setters queue a command and return immediately; getters report only what
/// the strip has confirmed, so a getter right after a setter may still show
/// the previous value until the command has been written.
pub struct LedStrip {
    connection: ConnectionManager,
    queue: CommandQueue,
    state: Arc<Mutex<State>>,
    events: JoinHandle<()>,
}

impl LedStrip {
    /// Builds the strip on top of any transport and starts consuming its events
    pub fn new(
        identity: &str,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        settings: Settings,
    ) -> Result<Self> {
        let identity = DeviceIdentity::new(identity)?;
        info!("Controlling LED strip {}", identity);

        let connection = ConnectionManager::new(identity, transport, settings);
        let queue = CommandQueue::new(connection.clone());
        let events = connection.spawn_event_loop(events);

        Ok(Self {
            connection,
            queue,
            state: Arc::new(Mutex::new(State::default())),
            events,
        })
    }

    /// Uses the system Bluetooth adapter. The strip is found by its
    /// peripheral id or MAC address whenever it advertises.
    #[instrument(skip(settings))]
    pub async fn connect_ble(identity: &str, settings: Settings) -> Result<Self> {
        // validate before touching the adapter
        DeviceIdentity::new(identity)?;
        let (transport, events) = BleTransport::new().await?;
        Self::new(identity, Arc::new(transport), events, settings)
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Turns the strip on or off
    #[instrument(skip(self))]
    pub fn set_power(&self, on: bool) -> Pending {
        debug!("Queueing power {}", if on { "on" } else { "off" });
        let state = self.state.clone();
        self.queue.enqueue("Power", encode_power(on), move || {
            state.lock().confirmed.power = on;
        })
    }

    /// Sets the brightness (0-100). Anything outside that range is dropped
    /// without queueing a command and `None` is returned.
    #[instrument(skip(self))]
    pub fn set_brightness(&self, level: i32) -> Option<Pending> {
        let Ok(level) = u8::try_from(level) else {
            debug!("Ignoring brightness {} outside 0-100", level);
            return None;
        };
        if level > 100 {
            debug!("Ignoring brightness {} outside 0-100", level);
            return None;
        }

        let state = self.state.clone();
        Some(self.queue.enqueue("Brightness", encode_brightness(level), move || {
            state.lock().confirmed.brightness = level;
        }))
    }

    /// Sets the hue in degrees, keeping the requested saturation
    #[instrument(skip(self))]
    pub fn set_hue(&self, hue: f64) -> Pending {
        let hue = hue.rem_euclid(360.0);
        let saturation = {
            let mut state = self.state.lock();
            state.requested.hue = hue;
            state.requested.saturation
        };
        self.send_hue_saturation(hue, saturation)
    }

    /// Sets the saturation in percent (clamped to 0-100), keeping the requested hue
    #[instrument(skip(self))]
    pub fn set_saturation(&self, saturation: f64) -> Pending {
        let saturation = saturation.clamp(0.0, 100.0);
        let hue = {
            let mut state = self.state.lock();
            state.requested.saturation = saturation;
            state.requested.hue
        };
        self.send_hue_saturation(hue, saturation)
    }

    fn send_hue_saturation(&self, hue: f64, saturation: f64) -> Pending {
        let lightness = self.state.lock().lightness;
        let rgb = hsl_to_rgb(hue / 360.0, saturation / 100.0, lightness);
        debug!(
            "Hue {} saturation {} -> RGB({}, {}, {})",
            hue, saturation, rgb.0, rgb.1, rgb.2
        );

        let state = self.state.clone();
        self.queue.enqueue("Colour", encode_rgb(rgb.0, rgb.1, rgb.2), move || {
            let mut state = state.lock();
            state.confirmed.hue = hue;
            state.confirmed.saturation = saturation;
            state.confirmed.rgb = rgb;
        })
    }

    /// Sets a raw RGB color; the cached hue and saturation are left alone
    #[instrument(skip(self))]
    pub fn set_rgb(&self, red: u8, green: u8, blue: u8) -> Pending {
        let state = self.state.clone();
        self.queue.enqueue("Colour", encode_rgb(red, green, blue), move || {
            state.lock().confirmed.rgb = (red, green, blue);
        })
    }

    pub fn power(&self) -> bool {
        self.state.lock().confirmed.power
    }

    pub fn brightness(&self) -> u8 {
        self.state.lock().confirmed.brightness
    }

    /// Hue in degrees (0-360)
    pub fn hue(&self) -> f64 {
        self.state.lock().confirmed.hue
    }

    /// Saturation in percent (0-100)
    pub fn saturation(&self) -> f64 {
        self.state.lock().confirmed.saturation
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        self.state.lock().confirmed.rgb
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn link_state(&self) -> LinkState {
        self.connection.state()
    }
}

impl Drop for LedStrip {
    fn drop(&mut self) {
        self.events.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{DiscoveredPeripheral, PeripheralId};
    use crate::Error;

    const STRIP: &str = "BE:89:D0:01:02:03";

    struct Rig {
        strip: LedStrip,
        transport: Arc<MockTransport>,
        events: mpsc::UnboundedSender<TransportEvent>,
    }

    impl Rig {
        fn new() -> Self {
            let transport = Arc::new(MockTransport::new());
            let (events, rx) = mpsc::unbounded_channel();
            let strip = LedStrip::new(STRIP, transport.clone(), rx, Settings::default()).unwrap();
            Self {
                strip,
                transport,
                events,
            }
        }

        async fn bring_up(&self) {
            self.events.send(TransportEvent::AdapterPoweredOn).unwrap();
            self.events
                .send(TransportEvent::Discovered(DiscoveredPeripheral {
                    id: PeripheralId::new("hci0/dev_be_89_d0_01_02_03"),
                    address: Some(STRIP.to_lowercase()),
                }))
                .unwrap();
            self.strip
                .connection()
                .wait_for_ready(std::time::Duration::from_secs(1))
                .await
                .unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blank_identity_is_rejected_up_front() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let result = LedStrip::new(" ", Arc::new(MockTransport::new()), rx, Settings::default());
        assert!(matches!(result, Err(Error::MissingDeviceIdentity)));
    }

    #[tokio::test(start_paused = true)]
    async fn defaults() {
        let rig = Rig::new();
        assert!(!rig.strip.power());
        assert_eq!(rig.strip.brightness(), 100);
        assert_eq!(rig.strip.hue(), 0.0);
        assert_eq!(rig.strip.saturation(), 0.0);
        assert_eq!(rig.strip.link_state(), LinkState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn power_is_cached_only_after_delivery() {
        let rig = Rig::new();
        let pending = rig.strip.set_power(true);
        assert!(!rig.strip.power());

        rig.bring_up().await;
        pending.await.unwrap();

        assert!(rig.strip.power());
        assert_eq!(rig.transport.written(), vec![encode_power(true).to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_brightness_is_dropped() {
        let rig = Rig::new();
        rig.bring_up().await;

        assert!(rig.strip.set_brightness(101).is_none());
        assert!(rig.strip.set_brightness(-1).is_none());
        assert!(rig.strip.set_brightness(1000).is_none());

        rig.strip.set_brightness(0).unwrap().await.unwrap();
        assert_eq!(rig.strip.brightness(), 0);
        assert_eq!(rig.transport.written(), vec![encode_brightness(0).to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn hue_and_saturation_combine_and_confirm() {
        let rig = Rig::new();
        rig.bring_up().await;

        let hue = rig.strip.set_hue(120.0);
        let saturation = rig.strip.set_saturation(100.0);
        // nothing confirmed yet
        assert_eq!(rig.strip.hue(), 0.0);

        hue.await.unwrap();
        saturation.await.unwrap();

        assert_eq!(rig.strip.hue(), 120.0);
        assert_eq!(rig.strip.saturation(), 100.0);
        assert_eq!(rig.strip.rgb(), (0, 255, 0));
        assert_eq!(
            rig.transport.written(),
            vec![
                // saturation still 0: gray
                encode_rgb(128, 128, 128).to_vec(),
                encode_rgb(0, 255, 0).to_vec(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hue_wraps_around() {
        let rig = Rig::new();
        rig.bring_up().await;
        rig.strip.set_saturation(100.0).await.unwrap();
        rig.strip.set_hue(360.0).await.unwrap();
        assert_eq!(rig.strip.hue(), 0.0);
        assert_eq!(rig.strip.rgb(), (255, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_leaves_cache_untouched() {
        let rig = Rig::new();
        rig.bring_up().await;
        rig.transport.fail_writes(&[1]);

        let failed = rig.strip.set_power(true).await;
        assert!(matches!(failed, Err(Error::WriteFailure(_))));
        assert!(!rig.strip.power());

        rig.strip.set_brightness(40).unwrap().await.unwrap();
        assert_eq!(rig.strip.brightness(), 40);
        assert!(!rig.strip.power());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_colour_keeps_previous_hue() {
        let transport = Arc::new(MockTransport::new());
        let (_events, rx) = mpsc::unbounded_channel();
        let strip = LedStrip::new(
            STRIP,
            transport,
            rx,
            Settings::default().with_ready_timeout(std::time::Duration::from_secs(2)),
        )
        .unwrap();

        let result = strip.set_hue(200.0).await;
        assert!(matches!(result, Err(Error::ReadinessTimeout(_))));
        assert_eq!(strip.hue(), 0.0);
    }
}
