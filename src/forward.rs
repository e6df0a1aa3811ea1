//! Read-forwarding tasks.
//!
//! One forwarding task runs per live channel: it reads frames and hands
//! their content to the log sink until the channel errors or closes, then
//! ends. It carries no back-pressure; a slow observer only affects the log,
//! never the connection.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::SplitStream;
use tokio::net::tcp::OwnedReadHalf;

use crate::protocol;

/// Anything the forwarding loop can read one frame at a time.
pub trait FrameSource {
    fn label(&self) -> &'static str;

    /// Next frame's content, `None` once the channel has closed cleanly.
    async fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>>;
}

/// Read half of the backend data connection.
pub struct DataFrames(pub OwnedReadHalf);

impl FrameSource for DataFrames {
    fn label(&self) -> &'static str {
        "data connection"
    }

    async fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        Ok(protocol::recv_frame(&mut self.0).await?)
    }
}

/// Read half of the browser control channel.
pub struct ControlFrames(pub SplitStream<WebSocket>);

impl FrameSource for ControlFrames {
    fn label(&self) -> &'static str {
        "control channel"
    }

    async fn next_frame(&mut self) -> anyhow::Result<Option<Bytes>> {
        while let Some(msg) = self.0.next().await {
            match msg? {
                Message::Text(text) => return Ok(Some(Bytes::from(text.to_string()))),
                Message::Binary(data) => return Ok(Some(data)),
                Message::Close(_) => return Ok(None),
                // keepalive traffic is not content
                Message::Ping(_) | Message::Pong(_) => continue,
            }
        }
        Ok(None)
    }
}

/// Forward frames to the log sink until the source closes or errors. Ends
/// only this task; the owning session decides what a closed channel means.
pub async fn forward_frames<S: FrameSource>(mut source: S) {
    loop {
        match source.next_frame().await {
            Ok(Some(frame)) => {
                if !frame.is_empty() {
                    tracing::info!("{}: {}", source.label(), String::from_utf8_lossy(&frame));
                }
            }
            Ok(None) => {
                tracing::info!("{} closed", source.label());
                break;
            }
            Err(e) => {
                tracing::error!("{} read failed: {}", source.label(), e);
                break;
            }
        }
    }
}
