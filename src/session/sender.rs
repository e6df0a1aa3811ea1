//! Sender role session.
//!
//! Sequence: announce on the control channel, open a per-session backend
//! listener, beacon its port until a receiver connects or the accept window
//! expires, then exchange introductions (send first, receive second) and
//! settle into forwarding.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures_util::StreamExt;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::{ControlChannel, SenderState};
use crate::discovery::Beacon;
use crate::forward::{self, ControlFrames, DataFrames};
use crate::node::Node;
use crate::pool;
use crate::protocol::{self, STATUS_SENDER, STATUS_TIMED_OUT, Status};

/// Drive one sender session over a freshly upgraded control channel.
pub async fn run(socket: WebSocket, node: Arc<Node>) {
    // one active role session per node; later upgrades wait their turn
    let _gate = node.session_gate().lock().await;
    if let Err(e) = run_session(socket, &node).await {
        tracing::error!("sender session ended with error: {}", e);
    }
}

async fn run_session(socket: WebSocket, node: &Node) -> anyhow::Result<()> {
    let (sink, stream) = socket.split();
    let mut control = ControlChannel::new(sink);

    let mut state = SenderState::Announced;
    control.send_event(&Status::new(STATUS_SENDER)).await?;
    tracing::debug!(?state, "role announced");
    let mut control_forward = tokio::spawn(forward::forward_frames(ControlFrames(stream)));

    // backend endpoint for this session, bound before it is advertised
    let (backend_port, listener) = pool::acquire_listener().await?;
    tracing::info!("backend listener started on port {}", backend_port);

    let beacon = Beacon::announcer(
        &node.config().broadcast_addr,
        node.config().discovery_port,
    )
    .await?;
    let cancel = CancellationToken::new();
    beacon.start_announcing(node.hostname().to_string(), backend_port, cancel.clone());

    state = SenderState::AwaitingConnection;
    tracing::debug!(?state, "awaiting inbound connection");
    let accepted = time::timeout(node.config().discovery_timeout(), listener.accept()).await;
    cancel.cancel();
    drop(listener);

    let (conn, peer_addr) = match accepted {
        Err(_elapsed) => {
            state = SenderState::TimedOut;
            tracing::info!(?state, "server timeout, backend listener closed");
            control.send_event(&Status::new(STATUS_TIMED_OUT)).await?;
            // terminal; keep the control channel until the UI goes away
            let _ = control_forward.await;
            return Ok(());
        }
        Ok(Err(e)) => {
            control_forward.abort();
            return Err(anyhow::Error::new(e).context("accepting connection"));
        }
        Ok(Ok(conn)) => conn,
    };
    state = SenderState::Connected;
    tracing::info!(?state, "connection accepted from {}", peer_addr);

    let (mut read_half, mut write_half) = conn.into_split();
    let exchange = async {
        protocol::send_introduction(
            &mut write_half,
            &node.introduction(STATUS_SENDER, peer_addr.ip()),
        )
        .await?;
        protocol::receive_introduction(&mut read_half).await
    };
    let peer_intro = match exchange.await {
        Ok(intro) => intro,
        Err(e) => {
            control_forward.abort();
            return Err(anyhow::Error::new(e).context("introduction exchange"));
        }
    };
    state = SenderState::Introduced;
    tracing::info!(
        ?state,
        "received intro from {} with pool {:?}",
        peer_intro.hostname,
        peer_intro.connection_pool
    );
    control.send_event(&peer_intro).await?;

    let mut data_forward = tokio::spawn(forward::forward_frames(DataFrames(read_half)));
    state = SenderState::Forwarding;
    tracing::debug!(?state, "sender session in steady state");

    // the session ends when either channel closes; aborting the surviving
    // forwarding task releases its read half right away, and dropping the
    // retained write halves closes both connections
    tokio::select! {
        _ = &mut control_forward => data_forward.abort(),
        _ = &mut data_forward => control_forward.abort(),
    }
    drop(write_half);
    Ok(())
}
