//! Role session behavior over real control channels: the sender timeout
//! path and a full loopback sender/receiver convergence run with a real UDP
//! beacon (unicast to loopback so the test does not depend on the host
//! network honoring broadcast).

use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use swift::{Node, NodeConfig};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a node with an initialized pool and a running control server on an
/// ephemeral loopback port.
async fn start_node(hostname: &str, config: NodeConfig) -> (Arc<Node>, u16) {
    let node = Arc::new(Node::with_hostname(config, hostname.to_string()));

    let (chunk_tx, mut chunk_rx) = mpsc::channel(16);
    node.init_pool(chunk_tx).await.expect("pool init");
    tokio::spawn(async move { while chunk_rx.recv().await.is_some() {} });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let serving = node.clone();
    tokio::spawn(async move {
        let _ = serving.serve_control(listener).await;
    });
    (node, port)
}

/// Next JSON control event, skipping any non-text frames.
async fn next_json(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(15), ws.next())
            .await
            .expect("timed out waiting for a control event")
            .expect("control channel ended unexpectedly")
            .expect("control channel error");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).expect("control events are JSON");
        }
    }
}

#[tokio::test]
async fn sender_times_out_with_exactly_one_status_event() {
    let config = NodeConfig {
        broadcast_addr: "127.0.0.1".to_string(),
        // nothing listens here; the beacons go nowhere
        discovery_port: 48161,
        discovery_timeout_secs: 1,
        ..NodeConfig::default()
    };
    let (_node, port) = start_node("timeout-node", config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/sender"))
        .await
        .expect("control upgrade");

    let announce = next_json(&mut ws).await;
    assert_eq!(announce["status"], "sender");

    let timed_out = next_json(&mut ws).await;
    assert_eq!(timed_out["status"], "server timed out; no connections made");
    assert!(
        timed_out.get("hostname").is_none(),
        "timeout event must not be an introduction"
    );

    // no further event follows the terminal status
    let extra = tokio::time::timeout(Duration::from_millis(500), ws.next()).await;
    assert!(extra.is_err(), "unexpected event after timeout: {extra:?}");
}

#[tokio::test]
async fn sender_and_receiver_converge_over_loopback() {
    let discovery_port = 48177;
    let config = NodeConfig {
        broadcast_addr: "127.0.0.1".to_string(),
        discovery_port,
        discovery_timeout_secs: 10,
        ..NodeConfig::default()
    };

    let (sender_node, sender_port) = start_node("alpha-node", config.clone()).await;
    let (receiver_node, receiver_port) = start_node("bravo-node", config).await;

    // receiver first, so its discovery listener owns the UDP port before
    // the sender starts announcing
    let (mut receiver_ws, _) = connect_async(format!("ws://127.0.0.1:{receiver_port}/receiver"))
        .await
        .expect("receiver control upgrade");
    assert_eq!(next_json(&mut receiver_ws).await["status"], "receiver");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (mut sender_ws, _) = connect_async(format!("ws://127.0.0.1:{sender_port}/sender"))
        .await
        .expect("sender control upgrade");
    assert_eq!(next_json(&mut sender_ws).await["status"], "sender");

    // the receiver's control channel sees the sender's introduction
    let sender_intro = next_json(&mut receiver_ws).await;
    assert_eq!(sender_intro["status"], "sender");
    assert_eq!(sender_intro["hostname"], "alpha-node");
    assert_eq!(sender_intro["connectedIP"], "127.0.0.1");
    let advertised: Vec<u64> = sender_intro["connectionPool"]
        .as_array()
        .expect("introduction carries the pool ports")
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    let expected: Vec<u64> = sender_node.pool_ports().iter().map(|&p| p as u64).collect();
    assert_eq!(advertised, expected);

    // and the sender's control channel sees the receiver's introduction
    let receiver_intro = next_json(&mut sender_ws).await;
    assert_eq!(receiver_intro["status"], "receiver");
    assert_eq!(receiver_intro["hostname"], "bravo-node");
    assert_eq!(receiver_intro["connectedIP"], "127.0.0.1");
    assert_eq!(
        receiver_intro["connectionPool"].as_array().unwrap().len(),
        receiver_node.pool_ports().len()
    );

    // closing one control channel tears down its session, which closes the
    // data connection and through it ends the peer session too
    drop(sender_ws);
    expect_close(&mut receiver_ws).await;
}

/// The control channel must actually close once a session has failed, not
/// leave the browser waiting on a half-open socket.
async fn expect_close(ws: &mut WsClient) {
    let end = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .expect("control channel should close after the session ends");
    match end {
        None => {}
        Some(Ok(msg)) => assert!(msg.is_close(), "expected close, got {msg:?}"),
        // a reset instead of a close handshake still counts as closed
        Some(Err(_)) => {}
    }
}

#[tokio::test]
async fn receiver_reports_failed_introduction_exchange() {
    let discovery_port = 48201;
    let config = NodeConfig {
        broadcast_addr: "127.0.0.1".to_string(),
        discovery_port,
        discovery_timeout_secs: 5,
        ..NodeConfig::default()
    };
    let (_node, port) = start_node("handshake-node", config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/receiver"))
        .await
        .expect("control upgrade");
    assert_eq!(next_json(&mut ws).await["status"], "receiver");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // a sender that beacons a live port, accepts, then hangs up without
    // ever introducing itself
    let backend = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend_port = backend.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (conn, _) = backend.accept().await.unwrap();
        drop(conn);
    });

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    udp.send_to(
        format!("fake-sender:{backend_port}").as_bytes(),
        format!("127.0.0.1:{discovery_port}"),
    )
    .await
    .unwrap();

    let failed = next_json(&mut ws).await;
    assert_eq!(failed["status"], "introduction exchange failed");
    expect_close(&mut ws).await;
}

#[tokio::test]
async fn receiver_reports_connect_failure() {
    let discovery_port = 48207;
    let config = NodeConfig {
        broadcast_addr: "127.0.0.1".to_string(),
        discovery_port,
        discovery_timeout_secs: 5,
        ..NodeConfig::default()
    };
    let (_node, port) = start_node("refused-node", config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/receiver"))
        .await
        .expect("control upgrade");
    assert_eq!(next_json(&mut ws).await["status"], "receiver");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // reserve a port, then free it so the receiver's dial is refused
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_port = reserved.local_addr().unwrap().port();
    drop(reserved);

    let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    udp.send_to(
        format!("gone-sender:{dead_port}").as_bytes(),
        format!("127.0.0.1:{discovery_port}"),
    )
    .await
    .unwrap();

    let failed = next_json(&mut ws).await;
    assert_eq!(failed["status"], "connect to sender failed");
    expect_close(&mut ws).await;
}

#[tokio::test]
async fn receiver_reports_discovery_timeout() {
    let config = NodeConfig {
        broadcast_addr: "127.0.0.1".to_string(),
        // nobody announces on this port
        discovery_port: 48191,
        discovery_timeout_secs: 1,
        ..NodeConfig::default()
    };
    let (_node, port) = start_node("lonely-node", config).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/receiver"))
        .await
        .expect("control upgrade");

    assert_eq!(next_json(&mut ws).await["status"], "receiver");
    let failed = next_json(&mut ws).await;
    assert_eq!(failed["status"], "discovery timed out; no sender found");
}
