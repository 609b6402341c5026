/*!
 # Link state machine

 Owns everything about reaching the strip: scanning, connecting, resolving the
 command characteristic and noticing when the strip goes away.

 ```text
 Idle --adapter on--> Scanning --discovered--> Connecting --ok--> Ready
                         ^                         |               |
                         +-------- failure --------+               |
                         +------------- peer disconnect -----------+
 any --adapter off--> Idle
 ```

 All state sits behind one mutex that is never held across an await. At most
 one connection attempt runs at a time; it is spawned as its own task and every
 caller asking for a connection meanwhile awaits the same shared outcome.
*/

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::Settings;
use crate::protocol::{SERVICE_UUID, WRITE_CHARACTERISTIC_UUID};
use crate::transport::{
    DeviceIdentity, DiscoveredPeripheral, PeripheralId, Transport, TransportEvent, WriteChannel,
};
use crate::{Error, Result};

/// Observable phase of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Adapter off or not reported yet
    Idle,
    Scanning,
    Connecting,
    /// Connected with a resolved write characteristic
    Ready,
    /// Adapter on but neither scanning nor connected
    Disconnected,
}

type Attempt = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
struct Link {
    radio_ready: bool,
    scanning: bool,
    peripheral: Option<PeripheralId>,
    write_channel: Option<WriteChannel>,
    connect_attempt: Option<(u64, Attempt)>,
    /// Peripheral whose disconnect notification we act on
    disconnect_watch: Option<PeripheralId>,
    attempts_started: u64,
    /// Bumped on every adapter power-off; attempts started before one are stale
    power_cycles: u64,
}

impl Link {
    fn connected(&self) -> bool {
        self.write_channel.is_some()
    }

    fn state(&self) -> LinkState {
        if !self.radio_ready {
            LinkState::Idle
        } else if self.connected() {
            LinkState::Ready
        } else if self.connect_attempt.is_some() {
            LinkState::Connecting
        } else if self.scanning {
            LinkState::Scanning
        } else {
            LinkState::Disconnected
        }
    }

    fn forget_channel(&mut self) {
        self.write_channel = None;
    }
}

struct Inner {
    identity: DeviceIdentity,
    transport: Arc<dyn Transport>,
    settings: Settings,
    link: Mutex<Link>,
    state_tx: watch::Sender<LinkState>,
}

/// Keeps one peripheral connected; cheap to clone
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(identity: DeviceIdentity, transport: Arc<dyn Transport>, settings: Settings) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Idle);
        Self {
            inner: Arc::new(Inner {
                identity,
                transport,
                settings,
                link: Mutex::new(Link::default()),
                state_tx,
            }),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Current phase of the link
    pub fn state(&self) -> LinkState {
        self.inner.link.lock().state()
    }

    /// Ready with a usable write characteristic
    pub fn is_connected(&self) -> bool {
        self.inner.link.lock().connected()
    }

    /// Subscribes to phase changes. A `Ready` to `Scanning` transition is an
    /// involuntary disconnect.
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.inner.state_tx.subscribe()
    }

    fn publish(&self, link: &Link) {
        let next = link.state();
        self.inner.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!("Link {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    /// Feeds transport events into the state machine until the sender is dropped
    pub fn spawn_event_loop(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                trace!("Transport event: {:?}", event);
                match event {
                    TransportEvent::AdapterPoweredOn => this.on_adapter_powered_on().await,
                    TransportEvent::AdapterPoweredOff => this.on_adapter_powered_off().await,
                    TransportEvent::Discovered(peripheral) => {
                        if !this.inner.identity.matches(&peripheral) {
                            continue;
                        }
                        // Connecting can take seconds; keep draining adapter and disconnect events meanwhile
                        let handler = this.clone();
                        tokio::spawn(async move { handler.on_peripheral_discovered(peripheral).await });
                    }
                    TransportEvent::Disconnected(peripheral) => {
                        this.on_peer_disconnected(&peripheral).await
                    }
                }
            }
            debug!("Transport event stream ended");
        })
    }

    #[instrument(skip(self))]
    pub async fn on_adapter_powered_on(&self) {
        info!("Bluetooth adapter powered on");
        {
            let mut link = self.inner.link.lock();
            link.radio_ready = true;
            self.publish(&link);
        }
        self.start_scanning().await;
    }

    #[instrument(skip(self))]
    pub async fn on_adapter_powered_off(&self) {
        info!("Bluetooth adapter powered off");
        let peripheral = {
            let mut link = self.inner.link.lock();
            link.radio_ready = false;
            link.power_cycles += 1;
            link.forget_channel();
            self.publish(&link);
            link.peripheral.clone()
        };

        self.stop_scanning().await;

        if let Some(peripheral) = peripheral {
            if let Err(err) = self.inner.transport.disconnect(&peripheral).await {
                debug!("Ignoring disconnect error: {}", err);
            }
        }
    }

    /// Handles an advertisement. Only the configured strip is considered and
    /// only while the adapter is on and no connection exists or is being made.
    #[instrument(skip(self), fields(id = %discovered.id))]
    pub async fn on_peripheral_discovered(&self, discovered: DiscoveredPeripheral) {
        if !self.inner.identity.matches(&discovered) {
            trace!("Ignoring unrelated peripheral");
            return;
        }

        let attempt = {
            let mut link = self.inner.link.lock();
            if !link.radio_ready {
                trace!("Adapter off, ignoring advertisement");
                return;
            }
            if link.connected() || link.connect_attempt.is_some() {
                return;
            }
            info!("Discovered target device: {}", discovered.id);
            link.peripheral = Some(discovered.id.clone());
            link.disconnect_watch = Some(discovered.id.clone());
            self.attempt(&mut link)
        };

        let Ok(attempt) = attempt else {
            return;
        };

        if let Err(err) = attempt.await {
            warn!("Connect failed after discovery: {}", err);
            {
                let mut link = self.inner.link.lock();
                // a later attempt may already own the peripheral
                if link.connect_attempt.is_none() && !link.connected() {
                    link.peripheral = None;
                    link.forget_channel();
                    self.publish(&link);
                }
            }
            self.start_scanning().await;
        }
    }

    /// Peer dropped the link
    #[instrument(skip(self))]
    pub async fn on_peer_disconnected(&self, peripheral: &PeripheralId) {
        {
            let mut link = self.inner.link.lock();
            if link.disconnect_watch.as_ref() != Some(peripheral) {
                trace!("Ignoring disconnect of unwatched peripheral");
                return;
            }
            link.disconnect_watch = None;
            link.peripheral = None;
            link.forget_channel();
            self.publish(&link);
        }
        info!("Device {} disconnected", peripheral);
        self.start_scanning().await;
    }

    /// Drops the write characteristic after a failed command and goes back to scanning
    pub async fn mark_link_lost(&self) {
        {
            let mut link = self.inner.link.lock();
            link.forget_channel();
            self.publish(&link);
        }
        self.start_scanning().await;
    }

    /// Starts scanning unless already scanning, the adapter is off, or a
    /// connection exists or is being made
    pub async fn start_scanning(&self) {
        {
            let mut link = self.inner.link.lock();
            if link.scanning
                || !link.radio_ready
                || link.connected()
                || link.connect_attempt.is_some()
            {
                return;
            }
            link.scanning = true;
            self.publish(&link);
        }

        debug!("Starting scan");
        if let Err(err) = self.inner.transport.start_scan().await {
            warn!("Scan start error: {}", err);
            let mut link = self.inner.link.lock();
            link.scanning = false;
            self.publish(&link);
        }
    }

    pub async fn stop_scanning(&self) {
        {
            let mut link = self.inner.link.lock();
            if !link.scanning {
                return;
            }
            link.scanning = false;
            self.publish(&link);
        }

        debug!("Stopping scan");
        if let Err(err) = self.inner.transport.stop_scan().await {
            warn!("Scan stop error: {}", err);
        }
    }

    /// Connects to the discovered peripheral, or joins the attempt already
    /// running. Resolves immediately when the link is ready.
    pub async fn ensure_connected(&self) -> Result<()> {
        let attempt = {
            let mut link = self.inner.link.lock();
            if link.connected() {
                return Ok(());
            }
            self.attempt(&mut link)?
        };

        attempt.await
    }

    /// Returns the running attempt or starts one. Must be called with the
    /// link locked so checking and registering the attempt is atomic.
    fn attempt(&self, link: &mut Link) -> Result<Attempt> {
        if let Some((_, attempt)) = &link.connect_attempt {
            return Ok(attempt.clone());
        }
        if !link.radio_ready {
            return Err(Error::ConnectFailure("adapter is powered off".into()));
        }
        let peripheral = link
            .peripheral
            .clone()
            .ok_or_else(|| Error::ConnectFailure("no peripheral discovered yet".into()))?;

        link.attempts_started += 1;
        let id = link.attempts_started;
        let power_cycle = link.power_cycles;
        let this = self.clone();
        let task = tokio::spawn(async move { this.establish(id, power_cycle, peripheral).await });
        let attempt = async move {
            task.await
                .unwrap_or_else(|err| Err(Error::ConnectFailure(err.to_string())))
        }
        .boxed()
        .shared();

        link.connect_attempt = Some((id, attempt.clone()));
        self.publish(link);
        Ok(attempt)
    }

    async fn establish(&self, attempt: u64, power_cycle: u64, peripheral: PeripheralId) -> Result<()> {
        self.stop_scanning().await;
        let resolved = self.connect_and_resolve(&peripheral).await;

        let mut link = self.inner.link.lock();
        if matches!(&link.connect_attempt, Some((id, _)) if *id == attempt) {
            link.connect_attempt = None;
        }

        let result = resolved.and_then(|channel| {
            if !link.radio_ready || link.power_cycles != power_cycle {
                return Err(Error::ConnectFailure(
                    "adapter powered off while connecting".into(),
                ));
            }
            if link.peripheral.as_ref() != Some(&peripheral) {
                return Err(Error::ConnectFailure(format!(
                    "{} went away while connecting",
                    peripheral
                )));
            }
            link.write_channel = Some(channel);
            Ok(())
        });

        match &result {
            Ok(()) => info!("Device {} ready", peripheral),
            Err(err) => {
                link.forget_channel();
                warn!("Connection error: {}", err);
            }
        }
        self.publish(&link);
        result
    }

    async fn connect_and_resolve(&self, peripheral: &PeripheralId) -> Result<WriteChannel> {
        let transport = &self.inner.transport;

        if !transport.is_connected(peripheral).await.map_err(connect_failure)? {
            info!("Connecting to {}...", peripheral);
            transport.connect(peripheral).await.map_err(connect_failure)?;
            info!("Connected");
        }

        debug!("Discovering write characteristic");
        transport
            .discover_characteristic(peripheral, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID)
            .await
            .map_err(connect_failure)
    }

    /// Waits until the link is ready and returns its write characteristic.
    ///
    /// Kicks off scanning and connection attempts along the way; their
    /// failures are swallowed and the wait continues until `timeout`.
    #[instrument(skip(self))]
    pub async fn wait_for_ready(&self, timeout: Duration) -> Result<WriteChannel> {
        self.start_scanning().await;
        time::timeout(timeout, self.poll_ready())
            .await
            .map_err(|_| Error::ReadinessTimeout(timeout))
    }

    async fn poll_ready(&self) -> WriteChannel {
        loop {
            let (channel, running, known) = {
                let link = self.inner.link.lock();
                (
                    link.write_channel.clone(),
                    link.connect_attempt.as_ref().map(|(_, attempt)| attempt.clone()),
                    link.peripheral.is_some(),
                )
            };
            if let Some(channel) = channel {
                return channel;
            }

            let outcome = match running {
                Some(attempt) => Some(attempt.await),
                None if known => Some(self.ensure_connected().await),
                None => None,
            };
            if let Some(Err(err)) = outcome {
                debug!("Still waiting for device: {}", err);
            }

            time::sleep(self.inner.settings.poll_interval).await;
        }
    }

    /// Writes one frame with response
    pub async fn write(&self, channel: &WriteChannel, frame: &[u8]) -> Result<()> {
        self.inner
            .transport
            .write(channel, frame, true)
            .await
            .map_err(|err| match err {
                Error::WriteFailure(_) => err,
                other => Error::WriteFailure(other.to_string()),
            })
    }
}

fn connect_failure(err: Error) -> Error {
    match err {
        Error::ConnectFailure(_) => err,
        other => Error::ConnectFailure(other.to_string()),
    }
}
