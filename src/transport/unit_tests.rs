//! Tests for the transport layer
//!
//! Connection tests run two endpoints over loopback: either two
//! `SyncTransport`s, or one transport and a raw tungstenite socket standing
//! in for a peer that speaks the wire format by hand.

use super::*;
use crate::classify::build_item;
use crate::clipboard::ClipboardContent;
use crate::device::DeviceIdentity;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

const WAIT: Duration = Duration::from_secs(5);

fn transport(name: &str, config: TransportConfig) -> (SyncTransport, mpsc::UnboundedReceiver<TransportEvent>) {
    SyncTransport::new(DeviceIdentity::generate(name, "desktop"), config)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport event channel closed")
}

/// Wait for the first event matching `pred`, skipping others
async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<TransportEvent>, mut pred: F) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Start a listening transport and return it with its connection string
async fn listening(
    name: &str,
    config: TransportConfig,
) -> (Arc<SyncTransport>, mpsc::UnboundedReceiver<TransportEvent>, String) {
    let (server, rx) = transport(name, config);
    let server = Arc::new(server);
    let listener = SyncListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(listener.serve(Arc::clone(&server)));
    (server, rx, url)
}

mod websocket_tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_and_update_round_trip() {
        let (server, mut server_rx, url) = listening("server", TransportConfig::default()).await;
        let (client, mut client_rx) = transport("client", TransportConfig::default());

        assert_eq!(client.peer().await, None);
        client.connect(&url).await.unwrap();
        assert_eq!(client.state().await, ConnectionState::Open);
        assert_eq!(client.peer().await.as_deref(), Some(url.as_str()));

        assert!(matches!(next_event(&mut client_rx).await, TransportEvent::Connected { .. }));
        let TransportEvent::PeerInfo(info) =
            wait_for(&mut client_rx, |e| matches!(e, TransportEvent::PeerInfo(_))).await
        else {
            unreachable!()
        };
        assert_eq!(info.device_id, server.identity().device_id);
        assert_eq!(info.device_name, "server");

        let TransportEvent::PeerInfo(info) =
            wait_for(&mut server_rx, |e| matches!(e, TransportEvent::PeerInfo(_))).await
        else {
            unreachable!()
        };
        assert_eq!(info.device_id, client.identity().device_id);

        let item = build_item(ClipboardContent::text("hello over the wire"));
        assert!(client.send(&item).await);

        let TransportEvent::Update(received) =
            wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Update(_))).await
        else {
            unreachable!()
        };
        assert_eq!(received.content, item.content);
        assert_eq!(received.content_type, item.content_type);
        assert_eq!(received.hash, item.hash);
        assert_eq!(received.source_device, client.identity().device_id);
        assert_ne!(received.id, item.id);

        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped() {
        let (client, _rx) = transport("client", TransportConfig::default());
        let item = build_item(ClipboardContent::text("nobody listening"));

        assert!(!client.send(&item).await);
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_address_leaves_state_unchanged() {
        let (client, mut rx) = transport("client", TransportConfig::default());

        for bad in ["localhost:8484", "http://localhost:8484", "ws://localhost:0"] {
            let err = client.connect(bad).await.unwrap_err();
            assert!(matches!(err, TransportError::InvalidAddress(_)), "{}", bad);
        }
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        // bind and drop to get a port nothing listens on
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let (client, mut rx) = transport("client", TransportConfig::default());

        let address = format!("ws://127.0.0.1:{}", port);
        assert!(client.connect(&address).await.is_err());
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));

        let TransportEvent::Disconnected { peer, .. } = next_event(&mut rx).await else {
            panic!("failed dial not reported as a disconnect");
        };
        assert_eq!(peer, address);
    }

    #[tokio::test]
    async fn test_failed_upgrade_reports_disconnect() {
        // a TCP server that hangs up before the WebSocket upgrade
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("ws://{}", socket.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((stream, _)) = socket.accept().await {
                drop(stream);
            }
        });
        let (client, mut rx) = transport("client", TransportConfig::default());

        assert!(client.connect(&address).await.is_err());
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        wait_for(&mut rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await;
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_messages_keep_connection() {
        let (server, mut server_rx, url) = listening("server", TransportConfig::default()).await;
        let (mut raw, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        raw.send(WsMessage::text(r#"{"type": "file_chunk", "data": "..."}"#))
            .await
            .unwrap();
        raw.send(WsMessage::text("not json")).await.unwrap();
        raw.send(WsMessage::text(
            r#"{"type":"clipboard_update","device_id":"raw-peer","timestamp":1,
                "data":{"type":"text","data":"still here","size":10,"hash":"h"}}"#,
        ))
        .await
        .unwrap();

        let mut errors = 0;
        let update = loop {
            match next_event(&mut server_rx).await {
                TransportEvent::Error(_) => errors += 1,
                TransportEvent::Update(item) => break item,
                _ => {}
            }
        };

        // only the malformed frame is reported, the unknown type is silent
        assert_eq!(errors, 1);
        assert_eq!(update.content, ClipboardContent::text("still here"));
        assert_eq!(update.source_device, "raw-peer");
        assert!(server.is_connected().await);
    }

    #[tokio::test]
    async fn test_update_claiming_local_origin_is_rejected() {
        let (server, mut server_rx, url) = listening("server", TransportConfig::default()).await;
        let (mut raw, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        for sender in ["local", ""] {
            let frame = format!(
                r#"{{"type":"clipboard_update","device_id":"{}","timestamp":1,
                    "data":{{"type":"text","data":"spoofed","size":7,"hash":"h"}}}}"#,
                sender
            );
            raw.send(WsMessage::text(frame)).await.unwrap();
        }
        raw.send(WsMessage::text(
            r#"{"type":"clipboard_update","device_id":"raw-peer","timestamp":1,
                "data":{"type":"text","data":"genuine","size":7,"hash":"h"}}"#,
        ))
        .await
        .unwrap();

        let mut errors = 0;
        let update = loop {
            match next_event(&mut server_rx).await {
                TransportEvent::Error(_) => errors += 1,
                TransportEvent::Update(item) => break item,
                _ => {}
            }
        };

        assert_eq!(errors, 2);
        assert_eq!(update.content, ClipboardContent::text("genuine"));
        assert!(!update.is_local());
        assert!(server.is_connected().await);
    }

    #[tokio::test]
    async fn test_stalled_client_does_not_block_listener() {
        let (server, mut server_rx, url) = listening("server", TransportConfig::default()).await;

        // open TCP but never send the upgrade request
        let addr = url.trim_start_matches("ws://").to_string();
        let _stalled = tokio::net::TcpStream::connect(&addr).await.unwrap();
        sleep(Duration::from_millis(50)).await;

        let (client, _client_rx) = transport("client", TransportConfig::default());
        timeout(Duration::from_secs(2), client.connect(&url))
            .await
            .expect("listener blocked by a stalled socket")
            .unwrap();

        wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Connected { .. })).await;
        assert!(server.is_connected().await);
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let (_server, _server_rx, url) = listening("server", TransportConfig::default()).await;
        let (mut raw, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

        raw.send(WsMessage::text(r#"{"type":"ping","device_id":"raw","timestamp":123}"#))
            .await
            .unwrap();

        let pong = timeout(WAIT, async {
            while let Some(Ok(frame)) = raw.next().await {
                if let WsMessage::Text(text) = frame {
                    if let Ok(Envelope::Pong(pong)) = Envelope::decode(text.as_str()) {
                        return Some(pong);
                    }
                }
            }
            None
        })
        .await
        .unwrap()
        .expect("no pong received");

        assert_eq!(pong.timestamp, 123);
    }

    #[tokio::test]
    async fn test_keepalive_measures_latency() {
        let config = TransportConfig {
            keepalive_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let (_server, _server_rx, url) = listening("server", config.clone()).await;
        let (client, _rx) = transport("client", config);

        client.connect(&url).await.unwrap();
        sleep(Duration::from_millis(400)).await;

        let info = client.connection_info().await.unwrap();
        assert!(info.stats.last_ping_sent.is_some());
        assert!(info.stats.last_pong_received.is_some());
        assert!(client.latency().await.is_some());
    }

    #[tokio::test]
    async fn test_pong_timeout_drops_connection() {
        // a peer that accepts the socket but never answers pings
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let config = TransportConfig {
            keepalive_interval: Duration::from_millis(50),
            pong_timeout: Some(Duration::from_millis(120)),
            ..Default::default()
        };
        let (client, mut rx) = transport("client", config);
        client.connect(&url).await.unwrap();

        let TransportEvent::Disconnected { reason, .. } =
            wait_for(&mut rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await
        else {
            unreachable!()
        };
        assert_eq!(reason, "keepalive timed out");
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_local_disconnect_is_silent() {
        let (_server, mut server_rx, url) = listening("server", TransportConfig::default()).await;
        let (client, mut client_rx) = transport("client", TransportConfig::default());

        client.connect(&url).await.unwrap();
        wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Connected { .. })).await;

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert_eq!(client.peer().await, None);

        // the peer sees the close
        wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await;

        sleep(Duration::from_millis(100)).await;
        while let Ok(event) = client_rx.try_recv() {
            assert!(
                !matches!(event, TransportEvent::Disconnected { .. }),
                "local disconnect reported as a loss"
            );
        }
    }

    #[tokio::test]
    async fn test_second_peer_is_rejected() {
        let (server, mut server_rx, url) = listening("server", TransportConfig::default()).await;
        let (first, _first_rx) = transport("first", TransportConfig::default());
        let (second, mut second_rx) = transport("second", TransportConfig::default());

        first.connect(&url).await.unwrap();
        wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Connected { .. })).await;

        let _ = second.connect(&url).await;
        wait_for(&mut second_rx, |e| matches!(e, TransportEvent::Disconnected { .. })).await;

        assert!(server.is_connected().await);
        let item = build_item(ClipboardContent::text("first peer still works"));
        assert!(first.send(&item).await);
        let TransportEvent::Update(received) =
            wait_for(&mut server_rx, |e| matches!(e, TransportEvent::Update(_))).await
        else {
            unreachable!()
        };
        assert_eq!(received.source_device, first.identity().device_id);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_connect() {
        let (client, _rx) = transport("client", TransportConfig::default());

        client.shutdown().await;
        assert_eq!(client.state().await, ConnectionState::Closed);
        assert!(matches!(
            client.connect("ws://127.0.0.1:8484").await,
            Err(TransportError::Closed)
        ));
        assert!(!client.send(&build_item(ClipboardContent::text("x"))).await);
    }

    #[tokio::test]
    async fn test_oversized_update_is_not_sent() {
        let config = TransportConfig {
            max_message_size: 1024,
            ..Default::default()
        };
        let (_server, _server_rx, url) = listening("server", config.clone()).await;
        let (client, _rx) = transport("client", config);
        client.connect(&url).await.unwrap();

        let item = build_item(ClipboardContent::text("x".repeat(4096)));
        assert!(!client.send(&item).await);
        assert!(client.is_connected().await);
    }
}

mod link_stats_tests {
    use super::*;

    #[test]
    fn test_ping_overdue() {
        let limit = Duration::from_millis(100);
        let mut stats = LinkStats::default();
        assert!(!stats.ping_overdue(1_000, limit));

        stats.last_ping_sent = Some(1_000);
        assert!(!stats.ping_overdue(1_050, limit));
        assert!(stats.ping_overdue(1_200, limit));

        stats.last_pong_received = Some(1_010);
        assert!(!stats.ping_overdue(1_200, limit));

        // an answer to an older ping does not count
        stats.last_ping_sent = Some(2_000);
        assert!(stats.ping_overdue(2_500, limit));
    }
}

mod transport_config_tests {
    use super::*;

    #[test]
    fn test_transport_config_default() {
        let config = TransportConfig::default();
        assert_eq!(config.keepalive_interval, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.pong_timeout.is_none());
        assert_eq!(config.max_message_size, crate::MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Open.to_string(), "open");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }
}

mod transport_error_tests {
    use super::*;

    #[test]
    fn test_transport_error_codes() {
        assert!(TransportError::Timeout.to_string().starts_with("CW006"));
        assert!(TransportError::Closed.to_string().starts_with("CW009"));

        let err: TransportError = "bogus".parse::<crate::pairing::PeerAddress>().unwrap_err().into();
        assert!(err.to_string().starts_with("CW005"));
    }
}
