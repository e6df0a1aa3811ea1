//! Wire types for the control channel and the backend data connection.
//!
//! Control events are plain JSON objects sent as WebSocket text frames.
//! The data connection carries u32-length-prefixed JSON frames; the
//! introduction is exactly one frame in each direction per session, and the
//! sender always writes first so the two sides never deadlock on a
//! simultaneous write.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Role announcements sent on a fresh control channel.
pub const STATUS_SENDER: &str = "sender";
pub const STATUS_RECEIVER: &str = "receiver";
/// Emitted when a sender's accept wait expires with no peer.
pub const STATUS_TIMED_OUT: &str = "server timed out; no connections made";

/// Upper bound for a single data-connection frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("data connection i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized(usize),
}

/// Bare status event for the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub status: String,
}

impl Status {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Identity message exchanged once per session over the data connection,
/// then forwarded verbatim to the control channel.
///
/// The serialized field names are the wire contract with the browser UI and
/// with remote nodes; do not rename them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Introduction {
    pub status: String,
    pub hostname: String,
    #[serde(rename = "connectionPool")]
    pub connection_pool: Vec<u16>,
    #[serde(rename = "connectedIP")]
    pub connected_ip: String,
}

/// Write one length-prefixed frame.
pub async fn send_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(payload.len()));
    }
    let len = (payload.len() as u32).to_be_bytes();
    w.write_all(&len).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean EOF at a frame
/// boundary.
pub async fn recv_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Bytes>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::Oversized(len));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

/// Serialize and send this node's introduction.
pub async fn send_introduction<W: AsyncWrite + Unpin>(
    w: &mut W,
    intro: &Introduction,
) -> Result<(), ProtocolError> {
    let json = serde_json::to_vec(intro)?;
    send_frame(w, &json).await
}

/// Block until the peer's introduction arrives.
pub async fn receive_introduction<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Introduction, ProtocolError> {
    match recv_frame(r).await? {
        Some(frame) => Ok(serde_json::from_slice(&frame)?),
        None => Err(ProtocolError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before introduction",
        ))),
    }
}
