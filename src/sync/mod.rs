//! Sync coordinator
//!
//! [`SyncEngine`] wires the change detector to the transport in both
//! directions. Local changes are forwarded to the peer; remote updates are
//! applied to the local clipboard with the detector's fingerprint cursor
//! moved under the same lock the poll tick holds, so an applied item is
//! never seen as a new local change and echoed back to where it came from.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::classify;
use crate::clipboard::{ClipboardContent, ClipboardError, ClipboardItem, ClipboardProvider};
use crate::config::Config;
use crate::detector::{fingerprint, ChangeDetector, DetectorConfig};
use crate::device::DeviceIdentity;
use crate::pairing::PeerAddress;
use crate::transport::{
    self, ConnectionState, DeviceInfo, ReconnectionConfig, ReconnectionPolicy, SyncListener,
    SyncTransport, TransportConfig, TransportError, TransportEvent,
};

/// Capacity of the host-facing event channel
const EVENT_CAPACITY: usize = 100;

/// Events published to hosts of the engine
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Local clipboard changed and was offered to the peer
    LocalChange(ClipboardItem),

    /// Remote content was written to the local clipboard
    RemoteApplied(ClipboardItem),

    /// Peer described itself
    PeerInfo(DeviceInfo),

    Connected { peer: String },

    /// Connection was lost without a local disconnect request
    Disconnected { peer: String, reason: String },

    Error(String),
}

/// What [`SyncEngine::apply`] did with a remote item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Written to the local clipboard
    Applied,

    /// Same content as the last seen fingerprint
    Duplicate,

    /// Item carries this device's own id
    OwnEcho,

    /// File or image reference, not written locally
    NotMaterialized,
}

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    pub detector: DetectorConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectionConfig,
}

impl SyncConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            detector: config.detector_config(),
            transport: config.transport_config(),
            reconnect: config.reconnection_config(),
        }
    }
}

struct Channels {
    local: mpsc::UnboundedReceiver<ClipboardItem>,
    remote: mpsc::UnboundedReceiver<TransportEvent>,
}

struct Pumps {
    shutdown: watch::Sender<bool>,
    local: JoinHandle<mpsc::UnboundedReceiver<ClipboardItem>>,
    remote: JoinHandle<mpsc::UnboundedReceiver<TransportEvent>>,
}

#[derive(Default)]
struct Lifecycle {
    idle: Option<Channels>,
    running: Option<Pumps>,
}

pub struct SyncEngine {
    identity: DeviceIdentity,
    clipboard: Arc<dyn ClipboardProvider>,
    detector: Arc<ChangeDetector>,
    transport: Arc<SyncTransport>,
    reconnect: ReconnectionConfig,
    event_sender: broadcast::Sender<SyncEvent>,
    lifecycle: Mutex<Lifecycle>,
    /// Connection string of the peer we dialed, retried after a loss
    dialed_peer: Mutex<Option<String>>,
    reconnector: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(
        identity: DeviceIdentity,
        clipboard: Arc<dyn ClipboardProvider>,
        config: SyncConfig,
    ) -> Self {
        let (detector, local) = ChangeDetector::new(Arc::clone(&clipboard), config.detector);
        let (transport, remote) = SyncTransport::new(identity.clone(), config.transport);
        let (event_sender, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            identity,
            clipboard,
            detector: Arc::new(detector),
            transport: Arc::new(transport),
            reconnect: config.reconnect,
            event_sender,
            lifecycle: Mutex::new(Lifecycle {
                idle: Some(Channels { local, remote }),
                running: None,
            }),
            dialed_peer: Mutex::new(None),
            reconnector: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// Engine for `config` with a freshly generated device identity
    pub fn from_config(config: &Config, clipboard: Arc<dyn ClipboardProvider>) -> Self {
        Self::new(
            DeviceIdentity::from_config(config),
            clipboard,
            SyncConfig::from_config(config),
        )
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    pub fn transport(&self) -> &Arc<SyncTransport> {
        &self.transport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_sender.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.transport.state().await
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running.is_some()
    }

    /// Start the clipboard monitor and the event forwarders. No-op when
    /// already running.
    pub async fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running.is_some() {
            debug!("Sync engine already running");
            return;
        }
        let Some(channels) = lifecycle.idle.take() else {
            error!("Sync engine event channels were lost, cannot start");
            return;
        };

        info!(
            "Starting sync engine as '{}' ({}) on the {} clipboard",
            self.identity.device_name,
            self.identity.device_id,
            self.clipboard.name()
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let local = tokio::spawn(Arc::clone(self).pump_local(channels.local, shutdown_rx.clone()));
        let remote = tokio::spawn(Arc::clone(self).pump_remote(channels.remote, shutdown_rx));
        lifecycle.running = Some(Pumps {
            shutdown,
            local,
            remote,
        });
        drop(lifecycle);

        self.detector.start().await;
    }

    /// Stop monitoring, stop listening and close the connection. The engine
    /// can be started again afterwards.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(pumps) = lifecycle.running.take() else {
            return;
        };

        info!("Stopping sync engine");
        self.detector.stop().await;

        if let Some(listener) = self.listener.lock().await.take() {
            listener.abort();
        }
        if let Some(reconnector) = self.reconnector.lock().await.take() {
            reconnector.abort();
        }

        let _ = pumps.shutdown.send(true);
        match (pumps.local.await, pumps.remote.await) {
            (Ok(local), Ok(remote)) => lifecycle.idle = Some(Channels { local, remote }),
            (Err(e), _) | (_, Err(e)) => error!("Sync event forwarder failed: {}", e),
        }
        drop(lifecycle);

        self.dialed_peer.lock().await.take();
        self.transport.disconnect().await;
    }

    /// Dial a peer (`ws://host:port`). No-op when a connection is already
    /// open; the peer is only remembered for reconnects once it is the one
    /// actually connected.
    pub async fn connect(&self, address: &str) -> transport::Result<()> {
        let peer = address.parse::<PeerAddress>()?.to_string();
        self.transport.connect(address).await?;

        match self.transport.peer().await {
            Some(connected) if connected == peer => {
                *self.dialed_peer.lock().await = Some(peer);
            }
            connected => debug!(
                "Not dialing {}, already connected to {}",
                peer,
                connected.as_deref().unwrap_or("nobody")
            ),
        }
        Ok(())
    }

    /// Drop the connection without reconnecting
    pub async fn disconnect(&self) {
        self.dialed_peer.lock().await.take();
        if let Some(reconnector) = self.reconnector.lock().await.take() {
            reconnector.abort();
        }
        self.transport.disconnect().await;
    }

    /// Accept inbound peer connections on `addr`. Returns the bound address.
    pub async fn listen(&self, addr: &str) -> transport::Result<SocketAddr> {
        let listener = SyncListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let task = tokio::spawn(listener.serve(Arc::clone(&self.transport)));
        if let Some(previous) = self.listener.lock().await.replace(task) {
            previous.abort();
        }
        Ok(local_addr)
    }

    /// Offer the current clipboard content to the peer even if it has not
    /// changed since the last tick.
    pub async fn force_sync(&self) -> Result<Option<ClipboardItem>, ClipboardError> {
        info!("Forcing clipboard sync");

        let cursor = self.detector.cursor();
        let mut last_seen = cursor.lock().await;
        let Some(content) = self.clipboard.get_content().await? else {
            debug!("Clipboard is empty, nothing to sync");
            return Ok(None);
        };
        let item = classify::build_item(content);
        *last_seen = Some(item.hash.clone());
        drop(last_seen);

        self.publish_local(&item).await;
        Ok(Some(item))
    }

    /// Write a remote item to the local clipboard, moving the detector's
    /// cursor to its fingerprint in the same critical section. On a failed
    /// write the previous cursor is put back.
    pub async fn apply(&self, item: &ClipboardItem) -> Result<ApplyOutcome, ClipboardError> {
        if item.source_device == self.identity.device_id {
            debug!("Dropping update that originated on this device");
            return Ok(ApplyOutcome::OwnEcho);
        }

        if item.content_type.is_reference() {
            info!(
                "Received {} reference from {}, not materialized locally: {}",
                item.content_type,
                item.source_device,
                item.content.canonical()
            );
            return Ok(ApplyOutcome::NotMaterialized);
        }

        let content = ClipboardContent::text(item.content.canonical());
        let hash = fingerprint(&content);

        let cursor = self.detector.cursor();
        let mut last_seen = cursor.lock().await;
        if last_seen.as_deref() == Some(hash.as_str()) {
            debug!("Remote content already on the clipboard");
            return Ok(ApplyOutcome::Duplicate);
        }

        let previous = last_seen.replace(hash);
        if let Err(e) = self.clipboard.set_content(&content).await {
            *last_seen = previous;
            return Err(e);
        }
        drop(last_seen);

        debug!(
            "Applied {} update from {} ({} bytes)",
            item.content_type, item.source_device, item.size
        );
        Ok(ApplyOutcome::Applied)
    }

    fn emit(&self, event: SyncEvent) {
        if self.event_sender.send(event).is_err() {
            debug!("No subscribers for sync events");
        }
    }

    async fn publish_local(&self, item: &ClipboardItem) {
        self.emit(SyncEvent::LocalChange(item.clone()));
        if !self.transport.send(item).await {
            debug!("Local change not sent, no open connection");
        }
    }

    async fn pump_local(
        self: Arc<Self>,
        mut changes: mpsc::UnboundedReceiver<ClipboardItem>,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::UnboundedReceiver<ClipboardItem> {
        loop {
            tokio::select! {
                item = changes.recv() => match item {
                    Some(item) => self.publish_local(&item).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        changes
    }

    async fn pump_remote(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::UnboundedReceiver<TransportEvent> {
        let reconnect_shutdown = shutdown.clone();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_transport_event(event, &reconnect_shutdown).await,
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        events
    }

    async fn handle_transport_event(
        self: &Arc<Self>,
        event: TransportEvent,
        shutdown: &watch::Receiver<bool>,
    ) {
        match event {
            TransportEvent::Update(item) => match self.apply(&item).await {
                Ok(ApplyOutcome::Applied) => self.emit(SyncEvent::RemoteApplied(item)),
                Ok(_) => {}
                Err(e) => {
                    error!("Failed to update local clipboard: {}", e);
                    self.emit(SyncEvent::Error(e.to_string()));
                }
            },
            TransportEvent::PeerInfo(info) => self.emit(SyncEvent::PeerInfo(info)),
            TransportEvent::Connected { peer } => self.emit(SyncEvent::Connected { peer }),
            TransportEvent::Disconnected { peer, reason } => {
                let dialed = self.dialed_peer.lock().await.clone();
                self.emit(SyncEvent::Disconnected {
                    peer: peer.clone(),
                    reason,
                });
                if self.reconnect.enabled && dialed.as_deref() == Some(peer.as_str()) {
                    self.spawn_reconnect(peer, shutdown.clone()).await;
                }
            }
            TransportEvent::Error(message) => self.emit(SyncEvent::Error(message)),
        }
    }

    async fn spawn_reconnect(self: &Arc<Self>, peer: String, mut shutdown: watch::Receiver<bool>) {
        let mut reconnector = self.reconnector.lock().await;
        if reconnector.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        // checked under the reconnector lock: a finished attempt that gave up
        // has already forgotten the peer
        if self.dialed_peer.lock().await.as_deref() != Some(peer.as_str()) {
            return;
        }

        let engine = Arc::clone(self);
        *reconnector = Some(tokio::spawn(async move {
            let mut policy = ReconnectionPolicy::new(engine.reconnect.clone());
            match policy.reconnect(&engine.transport, &peer, &mut shutdown).await {
                Ok(()) => info!("Reconnected to {}", peer),
                Err(TransportError::Closed) => debug!("Reconnection to {} cancelled", peer),
                Err(e) => {
                    warn!("Could not reconnect to {}: {}", peer, e);
                    let _reconnector = engine.reconnector.lock().await;
                    let mut dialed = engine.dialed_peer.lock().await;
                    if dialed.as_deref() == Some(peer.as_str()) {
                        dialed.take();
                    }
                    drop(dialed);
                    engine.emit(SyncEvent::Error(e.to_string()));
                }
            }
        }));
    }
}
