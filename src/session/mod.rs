//! Role sessions.
//!
//! One session runs per control-channel connection and owns its control
//! channel and data connection outright; the node itself keeps no
//! per-session state. The control upgrade itself happens in the axum layer,
//! so a session starts life already past `AwaitingControlUpgrade`.

pub mod receiver;
pub mod sender;

use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use futures_util::stream::SplitSink;
use serde::Serialize;

/// Sender-side protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Announced,
    AwaitingConnection,
    TimedOut,
    Connected,
    Introduced,
    Forwarding,
}

/// Receiver-side protocol states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Announced,
    Discovering,
    DiscoveryFailed,
    Connecting,
    ConnectFailed,
    Connected,
    Introduced,
    Forwarding,
}

/// Write side of the browser control channel. Everything the UI sees goes
/// through here, one JSON text frame per event, mirrored to the log.
pub struct ControlChannel {
    sink: SplitSink<WebSocket, Message>,
}

impl ControlChannel {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }

    pub async fn send_event<T: Serialize>(&mut self, event: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string(event)?;
        tracing::info!("control event: {}", json);
        self.sink.send(Message::Text(json.into())).await?;
        Ok(())
    }
}
