//! Connection Pool Manager.
//!
//! A fixed set of TCP listeners opened once at startup and kept open for the
//! process lifetime. Every pooled listener serves the identical chunk
//! reception endpoint `/{chunkSize}-{totalChunks}-{fileName}`; parsed chunk
//! deliveries are handed to an external sink, the pool only owns the path
//! contract.

use anyhow::{Context, Result, bail};
use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::StatusCode,
    routing::any,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Number of parallel chunk-receiving listeners every node opens.
pub const POOL_SIZE: usize = 5;

/// One parsed chunk reception path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPath {
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub file_name: String,
}

/// Parse `{chunkSize}-{totalChunks}-{fileName}`. The first two fields are
/// numeric; the file name keeps any further dashes.
pub fn parse_chunk_path(path: &str) -> Option<ChunkPath> {
    let mut parts = path.splitn(3, '-');
    let chunk_size = parts.next()?.parse().ok()?;
    let total_chunks = parts.next()?.parse().ok()?;
    let file_name = parts.next()?;
    if file_name.is_empty() {
        return None;
    }
    Some(ChunkPath {
        chunk_size,
        total_chunks,
        file_name: file_name.to_string(),
    })
}

/// A chunk delivery observed by a pooled listener. Reassembly and storage
/// are the file handler's job, not the pool's.
#[derive(Debug)]
pub struct ChunkRequest {
    pub path: ChunkPath,
    pub body: Bytes,
    pub peer: SocketAddr,
}

/// The fixed listener pool. Ports are OS-assigned at init and never change;
/// they are exactly the ports advertised in the introduction message.
pub struct ConnectionPool {
    ports: Vec<u16>,
}

impl ConnectionPool {
    /// Bind `size` listeners on OS-assigned ports and start the chunk
    /// endpoint on each. Any bind failure is fatal: the node does not start
    /// with a partial pool.
    pub async fn init(size: usize, chunk_tx: mpsc::Sender<ChunkRequest>) -> Result<Self> {
        if size == 0 {
            bail!("connection pool size must be at least 1");
        }
        let mut ports = Vec::with_capacity(size);
        for _ in 0..size {
            let listener = TcpListener::bind("0.0.0.0:0")
                .await
                .context("binding pooled listener")?;
            let port = listener.local_addr()?.port();
            ports.push(port);

            let router = chunk_router(chunk_tx.clone());
            tokio::spawn(async move {
                if let Err(e) = axum::serve(
                    listener,
                    router.into_make_service_with_connect_info::<SocketAddr>(),
                )
                .await
                {
                    tracing::error!("pooled listener on port {} stopped: {}", port, e);
                }
            });
        }
        tracing::info!("connection pool ready on ports {:?}", ports);
        Ok(Self { ports })
    }

    /// The ports advertised to peers in the introduction message.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

/// Bind a fresh listener on an OS-assigned port, used for the sender's
/// per-session backend. Returning the bound listener rather than a bare port
/// number leaves no window for another process to take it.
pub async fn acquire_listener() -> Result<(u16, TcpListener)> {
    let listener = TcpListener::bind("0.0.0.0:0")
        .await
        .context("binding backend listener")?;
    let port = listener.local_addr()?.port();
    Ok((port, listener))
}

/// Every pooled listener gets an identical router: one chunk-addressed
/// route, any method.
fn chunk_router(chunk_tx: mpsc::Sender<ChunkRequest>) -> Router {
    Router::new()
        .route("/{chunk_spec}", any(chunk_handler))
        .with_state(chunk_tx)
}

async fn chunk_handler(
    Path(chunk_spec): Path<String>,
    State(chunk_tx): State<mpsc::Sender<ChunkRequest>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> StatusCode {
    let Some(path) = parse_chunk_path(&chunk_spec) else {
        tracing::warn!("rejecting malformed chunk path from {}: {}", peer, chunk_spec);
        return StatusCode::BAD_REQUEST;
    };
    tracing::info!(
        "chunk for {} ({} bytes, {} chunks of {} expected) from {}",
        path.file_name,
        body.len(),
        path.total_chunks,
        path.chunk_size,
        peer
    );
    if chunk_tx.send(ChunkRequest { path, body, peer }).await.is_err() {
        // sink is gone; the external file handler has shut down
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_path_parses_three_ordered_fields() {
        assert_eq!(
            parse_chunk_path("4096-10-report.pdf"),
            Some(ChunkPath {
                chunk_size: 4096,
                total_chunks: 10,
                file_name: "report.pdf".to_string(),
            })
        );
    }

    #[test]
    fn chunk_path_keeps_dashes_in_the_file_name() {
        assert_eq!(
            parse_chunk_path("1024-3-report-final-v2.pdf"),
            Some(ChunkPath {
                chunk_size: 1024,
                total_chunks: 3,
                file_name: "report-final-v2.pdf".to_string(),
            })
        );
    }

    #[test]
    fn chunk_path_rejects_malformed_specs() {
        assert_eq!(parse_chunk_path("abc-10-x.pdf"), None);
        assert_eq!(parse_chunk_path("4096-x-x.pdf"), None);
        assert_eq!(parse_chunk_path("4096-10-"), None);
        assert_eq!(parse_chunk_path("4096-10"), None);
        assert_eq!(parse_chunk_path("4096"), None);
        assert_eq!(parse_chunk_path(""), None);
    }
}
