//! Receiver role session.
//!
//! Sequence: announce on the control channel, listen for a sender beacon
//! under the discovery deadline, dial the discovered address with a bounded
//! connect, then exchange introductions (receive first, send second) and
//! settle into forwarding. Every failure is reported to the control channel
//! as well as the log.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time;

use super::{ControlChannel, ReceiverState};
use crate::discovery;
use crate::forward::{self, ControlFrames, DataFrames};
use crate::node::Node;
use crate::protocol::{self, STATUS_RECEIVER, Status};

/// Bound on the TCP dial to a discovered sender; an unbounded dial can hang
/// the session on a peer that vanished after its last beacon.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one receiver session over a freshly upgraded control channel.
pub async fn run(socket: WebSocket, node: Arc<Node>) {
    let _gate = node.session_gate().lock().await;
    if let Err(e) = run_session(socket, &node).await {
        tracing::error!("receiver session ended with error: {}", e);
    }
}

async fn run_session(socket: WebSocket, node: &Node) -> anyhow::Result<()> {
    let (sink, stream) = socket.split();
    let mut control = ControlChannel::new(sink);

    let mut state = ReceiverState::Announced;
    control.send_event(&Status::new(STATUS_RECEIVER)).await?;
    tracing::debug!(?state, "role announced");
    let mut control_forward = tokio::spawn(forward::forward_frames(ControlFrames(stream)));

    state = ReceiverState::Discovering;
    tracing::debug!(?state, "listening for sender beacons");
    let target = match discovery::listen(
        node.config().discovery_port,
        node.config().discovery_timeout(),
    )
    .await
    {
        Err(e) => {
            let _ = control
                .send_event(&Status::new("discovery failed"))
                .await;
            control_forward.abort();
            return Err(e.context("discovery listen"));
        }
        Ok(None) => {
            state = ReceiverState::DiscoveryFailed;
            tracing::error!(?state, "discovery timed out; no sender found");
            control
                .send_event(&Status::new("discovery timed out; no sender found"))
                .await?;
            let _ = control_forward.await;
            return Ok(());
        }
        Ok(Some(addr)) => addr,
    };

    state = ReceiverState::Connecting;
    tracing::info!(?state, "sender located at {}", target);
    let conn = match time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&target)).await {
        Err(_elapsed) => {
            state = ReceiverState::ConnectFailed;
            tracing::error!(?state, "connect to {} timed out", target);
            control
                .send_event(&Status::new("connect to sender timed out"))
                .await?;
            let _ = control_forward.await;
            return Ok(());
        }
        Ok(Err(e)) => {
            let _ = control
                .send_event(&Status::new("connect to sender failed"))
                .await;
            control_forward.abort();
            return Err(anyhow::Error::new(e).context(format!("connecting to {target}")));
        }
        Ok(Ok(conn)) => conn,
    };
    state = ReceiverState::Connected;
    let peer_addr = conn.peer_addr()?;
    tracing::info!(?state, "connected to sender at {}", peer_addr);

    // reversed ordering relative to the sender: receive first, send second
    let (mut read_half, mut write_half) = conn.into_split();
    let exchange = async {
        let peer_intro = protocol::receive_introduction(&mut read_half).await?;
        protocol::send_introduction(
            &mut write_half,
            &node.introduction(STATUS_RECEIVER, peer_addr.ip()),
        )
        .await?;
        Ok::<_, protocol::ProtocolError>(peer_intro)
    };
    let peer_intro = match exchange.await {
        Ok(intro) => intro,
        Err(e) => {
            // either direction failing aborts the session, but the UI still
            // hears about it and the channel closes
            let _ = control
                .send_event(&Status::new("introduction exchange failed"))
                .await;
            control_forward.abort();
            return Err(anyhow::Error::new(e).context("introduction exchange"));
        }
    };
    state = ReceiverState::Introduced;
    tracing::info!(
        ?state,
        "received intro from {} with pool {:?}",
        peer_intro.hostname,
        peer_intro.connection_pool
    );
    control.send_event(&peer_intro).await?;

    let mut data_forward = tokio::spawn(forward::forward_frames(DataFrames(read_half)));
    state = ReceiverState::Forwarding;
    tracing::debug!(?state, "receiver session in steady state");

    // the session ends when either channel closes; aborting the surviving
    // forwarding task releases its read half right away instead of waiting
    // on the peer to notice
    tokio::select! {
        _ = &mut control_forward => data_forward.abort(),
        _ = &mut data_forward => control_forward.abort(),
    }
    drop(write_half);
    Ok(())
}
