//! WebSocket transport implementation

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, connect_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::protocol::{now_millis, Envelope};
use super::{
    ConnectionId, ConnectionInfo, ConnectionState, Result, TransportConfig, TransportError,
    TransportEvent,
};
use crate::clipboard::ClipboardItem;
use crate::device::DeviceIdentity;
use crate::pairing::PeerAddress;

/// Pause after a failed `accept` before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Traffic and keepalive counters of one connection
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_ping_sent: Option<i64>,
    pub last_pong_received: Option<i64>,
    pub latency: Option<Duration>,
}

impl LinkStats {
    /// Whether the last ping has gone unanswered for longer than `limit`
    pub fn ping_overdue(&self, now_ms: i64, limit: Duration) -> bool {
        let Some(sent) = self.last_ping_sent else {
            return false;
        };
        let answered = self.last_pong_received.is_some_and(|pong| pong >= sent);
        !answered && now_ms.saturating_sub(sent) > limit.as_millis() as i64
    }
}

struct Connection {
    id: ConnectionId,
    peer: String,
    established_at: chrono::DateTime<Utc>,
    outbound: mpsc::UnboundedSender<Envelope>,
    close_tx: oneshot::Sender<()>,
    reader: JoinHandle<()>,
    keepalive: JoinHandle<()>,
    stats: Arc<StdMutex<LinkStats>>,
}

impl Connection {
    /// Ask the writer to send a close frame and stop the other tasks
    fn close(self) {
        let _ = self.close_tx.send(());
        self.keepalive.abort();
        self.reader.abort();
    }
}

struct Link {
    state: ConnectionState,
    connection: Option<Connection>,
}

/// State shared by the tasks serving one connection
struct Session {
    id: ConnectionId,
    peer: String,
    device_id: String,
    config: TransportConfig,
    link: Arc<Mutex<Link>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedSender<Envelope>,
    stats: Arc<StdMutex<LinkStats>>,
}

impl Session {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscriber for transport events");
        }
    }

    fn record<F: FnOnce(&mut LinkStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Handle one inbound text frame. Nothing in here ends the connection.
    fn dispatch(&self, text: &str) {
        if text.len() > self.config.max_message_size {
            warn!(
                "Discarding {} byte message from {} (limit {})",
                text.len(),
                self.peer,
                self.config.max_message_size
            );
            return;
        }

        self.record(|stats| stats.messages_received += 1);

        match Envelope::decode(text) {
            Ok(Envelope::ClipboardUpdate(update)) => {
                debug!(
                    "Received {} update from {}",
                    update.data.content_type, update.device_id
                );
                match update.into_item(now_millis()) {
                    Ok(item) => self.emit(TransportEvent::Update(item)),
                    Err(e) => {
                        warn!("Discarding update from {}: {}", self.peer, e);
                        self.emit(TransportEvent::Error(e.to_string()));
                    }
                }
            }
            Ok(Envelope::DeviceInfo(info)) => {
                info!(
                    "Peer identified as '{}' ({}, {})",
                    info.device_name, info.device_type, info.device_id
                );
                self.emit(TransportEvent::PeerInfo(info));
            }
            Ok(Envelope::Ping(ping)) => {
                if self.outbound.send(Envelope::pong(ping.timestamp)).is_err() {
                    debug!("Connection closing, pong not sent");
                }
            }
            Ok(Envelope::Pong(pong)) => {
                let now = now_millis();
                let latency = pong.latency(now);
                debug!("Keepalive round trip {:?}", latency);
                self.record(|stats| {
                    stats.last_pong_received = Some(now);
                    stats.latency = Some(latency);
                });
            }
            Err(e) if e.is_unknown_type() => {
                debug!("Ignoring message from {}: {}", self.peer, e);
            }
            Err(e) => {
                warn!("Failed to parse message from {}: {}", self.peer, e);
                self.emit(TransportEvent::Error(e.to_string()));
            }
        }
    }

    /// Drop the connection after an unexpected loss. Does nothing when the
    /// connection was already replaced or closed locally.
    async fn teardown(&self, reason: &str) {
        let mut link = self.link.lock().await;
        if link.connection.as_ref().map(|c| c.id) != Some(self.id) {
            return;
        }
        if let Some(connection) = link.connection.take() {
            connection.close();
        }
        link.state = ConnectionState::Disconnected;
        drop(link);

        warn!("Connection to {} lost: {}", self.peer, reason);
        self.emit(TransportEvent::Disconnected {
            peer: self.peer.clone(),
            reason: reason.to_string(),
        });
    }
}

/// WebSocket transport holding at most one peer connection
pub struct SyncTransport {
    identity: DeviceIdentity,
    config: TransportConfig,
    link: Arc<Mutex<Link>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SyncTransport {
    /// Create a transport and the receiver its events are delivered on
    pub fn new(
        identity: DeviceIdentity,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();

        let transport = Self {
            identity,
            config,
            link: Arc::new(Mutex::new(Link {
                state: ConnectionState::Disconnected,
                connection: None,
            })),
            events,
        };

        (transport, event_rx)
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a connection to `address` (`ws://host:port`). No-op when a
    /// connection is already open.
    #[instrument(skip(self), fields(device = %self.identity.device_name))]
    pub async fn connect(&self, address: &str) -> Result<()> {
        let peer: PeerAddress = address.parse()?;

        {
            let mut link = self.link.lock().await;
            match link.state {
                ConnectionState::Closed => return Err(TransportError::Closed),
                ConnectionState::Open => {
                    debug!("Already connected, ignoring connect to {}", peer);
                    return Ok(());
                }
                ConnectionState::Connecting | ConnectionState::Handshaking => {
                    return Err(TransportError::Connection {
                        message: "another connection attempt is in progress".to_string(),
                    });
                }
                ConnectionState::Disconnected | ConnectionState::Closing => {}
            }
            link.state = ConnectionState::Connecting;
        }

        info!("Connecting to peer at {}", peer);

        let ws_stream = match timeout(self.config.connect_timeout, connect_async(peer.url())).await
        {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                let error = TransportError::WebSocket {
                    message: format!("failed to open {}: {}", peer, e),
                };
                return Err(self.abort_connect(&peer, error).await);
            }
            Err(_) => return Err(self.abort_connect(&peer, TransportError::Timeout).await),
        };

        self.establish(ws_stream, peer.to_string(), ConnectionState::Connecting)
            .await
    }

    /// Serve an already upgraded socket, typically one accepted by
    /// [`SyncListener`]. Rejected when a connection already exists.
    pub async fn attach<S>(&self, ws_stream: WebSocketStream<S>, peer: String) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.establish(ws_stream, peer, ConnectionState::Disconnected)
            .await
    }

    /// Close the current connection. Idempotent, and no `Disconnected` event
    /// is emitted for a locally requested close.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        let Some(connection) = link.connection.take() else {
            if link.state != ConnectionState::Closed {
                link.state = ConnectionState::Disconnected;
            }
            return;
        };

        link.state = ConnectionState::Closing;
        info!("Disconnecting from {}", connection.peer);
        connection.close();
        link.state = ConnectionState::Disconnected;
    }

    /// Disconnect and refuse any further connections
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.link.lock().await.state = ConnectionState::Closed;
        debug!("Transport shut down");
    }

    /// Send a clipboard item to the peer. At most once: returns `false` and
    /// drops the item when no connection is open.
    pub async fn send(&self, item: &ClipboardItem) -> bool {
        let link = self.link.lock().await;
        let connection = match (link.state, link.connection.as_ref()) {
            (ConnectionState::Open, Some(connection)) => connection,
            (state, _) => {
                warn!("Cannot send clipboard update, connection is {}", state);
                return false;
            }
        };

        let envelope = Envelope::clipboard_update(item, &self.identity.device_id);
        match envelope.encode() {
            Ok(text) if text.len() > self.config.max_message_size => {
                warn!(
                    "Clipboard update of {} bytes exceeds the {} byte limit",
                    text.len(),
                    self.config.max_message_size
                );
                return false;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to encode clipboard update: {}", e);
                return false;
            }
        }

        connection.outbound.send(envelope).is_ok()
    }

    pub async fn state(&self) -> ConnectionState {
        self.link.lock().await.state
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Open
    }

    /// Last measured keepalive round trip
    pub async fn latency(&self) -> Option<Duration> {
        self.connection_info().await.and_then(|info| info.stats.latency)
    }

    /// Address of the current peer, if a connection exists
    pub async fn peer(&self) -> Option<String> {
        let link = self.link.lock().await;
        link.connection.as_ref().map(|connection| connection.peer.clone())
    }

    pub async fn connection_info(&self) -> Option<ConnectionInfo> {
        let link = self.link.lock().await;
        let connection = link.connection.as_ref()?;
        let stats = connection
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default();

        Some(ConnectionInfo {
            id: connection.id,
            peer: connection.peer.clone(),
            established_at: connection.established_at,
            state: link.state,
            stats,
        })
    }

    /// Fall back to `Disconnected` after a failed dial and report it
    async fn abort_connect(&self, peer: &PeerAddress, error: TransportError) -> TransportError {
        let mut link = self.link.lock().await;
        if link.state == ConnectionState::Connecting {
            link.state = ConnectionState::Disconnected;
        }
        drop(link);

        warn!("{}", error);
        let _ = self.events.send(TransportEvent::Error(error.to_string()));
        let _ = self.events.send(TransportEvent::Disconnected {
            peer: peer.to_string(),
            reason: error.to_string(),
        });
        error
    }

    /// Spawn the tasks serving `ws_stream`, queue our `device_info` and mark
    /// the connection open. `expected` is the state the link must still be in.
    async fn establish<S>(
        &self,
        mut ws_stream: WebSocketStream<S>,
        peer: String,
        expected: ConnectionState,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut link = self.link.lock().await;
        if link.state != expected {
            let error = match link.state {
                ConnectionState::Closed => TransportError::Closed,
                ConnectionState::Open
                | ConnectionState::Connecting
                | ConnectionState::Handshaking => TransportError::AlreadyConnected,
                ConnectionState::Disconnected | ConnectionState::Closing => {
                    TransportError::ConnectionClosed
                }
            };
            drop(link);
            debug!("Dropping socket from {}: {}", peer, error);
            let _ = ws_stream.close(None).await;
            return Err(error);
        }

        link.state = ConnectionState::Handshaking;

        let id = Uuid::new_v4();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let stats = Arc::new(StdMutex::new(LinkStats::default()));

        let session = Arc::new(Session {
            id,
            peer: peer.clone(),
            device_id: self.identity.device_id.clone(),
            config: self.config.clone(),
            link: Arc::clone(&self.link),
            events: self.events.clone(),
            outbound: outbound.clone(),
            stats: Arc::clone(&stats),
        });

        let (ws_sink, ws_source) = ws_stream.split();
        tokio::spawn(write_loop(ws_sink, outbound_rx, close_rx, Arc::clone(&session)));
        let reader = tokio::spawn(read_loop(ws_source, Arc::clone(&session)));
        let keepalive = tokio::spawn(keepalive_loop(session));

        let _ = outbound.send(Envelope::device_info(&self.identity));

        link.connection = Some(Connection {
            id,
            peer: peer.clone(),
            established_at: Utc::now(),
            outbound,
            close_tx,
            reader,
            keepalive,
            stats,
        });
        link.state = ConnectionState::Open;
        drop(link);

        info!("Connected to {}", peer);
        let _ = self.events.send(TransportEvent::Connected { peer });
        Ok(())
    }
}

async fn write_loop<S>(
    mut ws_sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
    mut close_rx: oneshot::Receiver<()>,
    session: Arc<Session>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            biased;

            _ = &mut close_rx => {
                let _ = ws_sink.send(WsMessage::Close(None)).await;
                break;
            }
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };

                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode {} message: {}", envelope.message_type(), e);
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(WsMessage::text(text)).await {
                    error!("Failed to send message to {}: {}", session.peer, e);
                    session.teardown(&format!("send failed: {}", e)).await;
                    break;
                }

                session.record(|stats| stats.messages_sent += 1);
                debug!("Sent {} message", envelope.message_type());
            }
        }
    }
}

async fn read_loop<S>(mut ws_source: SplitStream<WebSocketStream<S>>, session: Arc<Session>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let reason = loop {
        match ws_source.next().await {
            Some(Ok(WsMessage::Text(text))) => session.dispatch(text.as_str()),
            Some(Ok(WsMessage::Binary(data))) => {
                warn!("Ignoring {} byte binary frame", data.len());
            }
            Some(Ok(WsMessage::Close(_))) => break "closed by peer".to_string(),
            Some(Ok(_)) => {
                // control frames are answered by tungstenite
            }
            Some(Err(e)) => break format!("socket error: {}", e),
            None => break "connection ended".to_string(),
        }
    };

    session.teardown(&reason).await;
}

async fn keepalive_loop(session: Arc<Session>) {
    let mut ticker = interval(session.config.keepalive_interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if let Some(limit) = session.config.pong_timeout {
            let overdue = session
                .stats
                .lock()
                .map(|stats| stats.ping_overdue(now_millis(), limit))
                .unwrap_or(false);
            if overdue {
                session.teardown("keepalive timed out").await;
                return;
            }
        }

        let ping = Envelope::ping(&session.device_id);
        if let Envelope::Ping(ref p) = ping {
            let sent = p.timestamp;
            session.record(|stats| stats.last_ping_sent = Some(sent));
        }
        if session.outbound.send(ping).is_err() {
            return;
        }
    }
}

/// Accepts inbound peer connections and hands them to a transport
pub struct SyncListener {
    tcp_listener: TcpListener,
}

impl SyncListener {
    pub async fn bind(addr: &str) -> Result<Self> {
        let tcp_listener = TcpListener::bind(addr).await?;
        info!("Listening for peers on {}", tcp_listener.local_addr()?);
        Ok(Self { tcp_listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp_listener.local_addr()?)
    }

    /// Accept one socket, complete the WebSocket upgrade and attach it
    pub async fn accept(&self, transport: &SyncTransport) -> Result<()> {
        let (tcp_stream, remote_addr) = self.tcp_listener.accept().await?;
        upgrade(transport, tcp_stream, remote_addr).await
    }

    /// Accept peers until the transport is shut down or the task is dropped.
    /// Every upgrade runs on its own task.
    pub async fn serve(self, transport: Arc<SyncTransport>) {
        loop {
            let (tcp_stream, remote_addr) = match self.tcp_listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };

            if transport.state().await == ConnectionState::Closed {
                debug!("Transport closed, listener exiting");
                break;
            }

            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                if let Err(e) = upgrade(&transport, tcp_stream, remote_addr).await {
                    warn!("Rejected inbound connection: {}", e);
                }
            });
        }
    }
}

/// Complete the WebSocket upgrade of an accepted socket and attach it
async fn upgrade(
    transport: &SyncTransport,
    tcp_stream: TcpStream,
    remote_addr: SocketAddr,
) -> Result<()> {
    debug!("Accepted TCP connection from {}", remote_addr);

    let ws_stream = timeout(transport.config().connect_timeout, accept_async(tcp_stream))
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::WebSocket {
            message: format!("upgrade from {} failed: {}", remote_addr, e),
        })?;

    transport.attach(ws_stream, remote_addr.to_string()).await
}
