//! Node identity and the control-plane server.
//!
//! A `Node` is created once per process: hostname, configuration, and the
//! fixed listener pool. Role sessions are spawned from the `/sender` and
//! `/receiver` WebSocket routes and own their connections themselves; the
//! node only serializes them through a session gate.

use anyhow::{Context, Result, bail};
use axum::{
    Router,
    extract::{ConnectInfo, State, ws::WebSocketUpgrade},
    response::Response,
    routing::get,
};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OnceCell, mpsc};

use crate::config::NodeConfig;
use crate::pool::{ChunkRequest, ConnectionPool};
use crate::protocol::Introduction;
use crate::session;

pub struct Node {
    hostname: String,
    config: NodeConfig,
    pool: OnceCell<ConnectionPool>,
    session_gate: Mutex<()>,
}

impl Node {
    /// Node identity from the OS hostname, falling back to a randomized
    /// `swift<N>` placeholder when that is unavailable.
    pub fn new(config: NodeConfig) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| format!("swift{}", rand::rng().random_range(0..500)));
        Self::with_hostname(config, hostname)
    }

    pub fn with_hostname(config: NodeConfig, hostname: String) -> Self {
        Self {
            hostname,
            config,
            pool: OnceCell::new(),
            session_gate: Mutex::new(()),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub(crate) fn session_gate(&self) -> &Mutex<()> {
        &self.session_gate
    }

    /// Open the fixed listener pool, exactly once per node. A second call is
    /// rejected rather than double-binding.
    pub async fn init_pool(&self, chunk_tx: mpsc::Sender<ChunkRequest>) -> Result<()> {
        if self.pool.initialized() {
            bail!("connection pool already initialized");
        }
        let pool = ConnectionPool::init(self.config.pool_size, chunk_tx).await?;
        self.pool
            .set(pool)
            .map_err(|_| anyhow::anyhow!("connection pool already initialized"))?;
        Ok(())
    }

    /// Ports advertised in the introduction message. Empty until the pool is
    /// initialized.
    pub fn pool_ports(&self) -> Vec<u16> {
        self.pool
            .get()
            .map(|p| p.ports().to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn introduction(&self, status: &str, peer_ip: IpAddr) -> Introduction {
        Introduction {
            status: status.to_string(),
            hostname: self.hostname.clone(),
            connection_pool: self.pool_ports(),
            connected_ip: peer_ip.to_string(),
        }
    }

    /// Control router: `/sender` and `/receiver` WebSocket upgrades.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/sender", get(sender_upgrade))
            .route("/receiver", get(receiver_upgrade))
            .with_state(self.clone())
    }

    /// Serve the control plane on an already-bound listener until it stops.
    pub async fn serve_control(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let router = self.router();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("control server")?;
        Ok(())
    }

    /// Full node startup: listener pool, default chunk sink, control server
    /// on an OS-assigned port. Runs for the life of the process.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
        self.init_pool(chunk_tx).await?;

        // default observer sink: chunk arrivals go to the log; an external
        // file handler replaces this by calling init_pool with its own sink
        tokio::spawn(async move {
            while let Some(req) = chunk_rx.recv().await {
                tracing::info!(
                    "chunk received: {} bytes of {} from {}",
                    req.body.len(),
                    req.path.file_name,
                    req.peer
                );
            }
        });

        let listener = TcpListener::bind("0.0.0.0:0").await?;
        let port = listener.local_addr()?.port();
        tracing::info!(
            "control surface for '{}' at http://{}:{}/",
            self.hostname,
            local_display_ip(),
            port
        );
        self.serve_control(listener).await
    }
}

async fn sender_upgrade(
    ws: WebSocketUpgrade,
    State(node): State<Arc<Node>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    tracing::info!("sender control upgrade from {}", addr);
    ws.on_upgrade(move |socket| session::sender::run(socket, node))
}

async fn receiver_upgrade(
    ws: WebSocketUpgrade,
    State(node): State<Arc<Node>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    tracing::info!("receiver control upgrade from {}", addr);
    ws.on_upgrade(move |socket| session::receiver::run(socket, node))
}

/// Best display address for the startup banner, preferring private LAN
/// ranges over anything else.
fn local_display_ip() -> String {
    local_ip_address::list_afinet_netifas()
        .ok()
        .and_then(|ifas| {
            let mut best = None;
            for (_name, ip) in ifas {
                if ip.is_loopback() || !ip.is_ipv4() {
                    continue;
                }
                let ip = ip.to_string();
                if ip.starts_with("192.168.") {
                    return Some(ip);
                }
                if best.is_none() || ip.starts_with("10.") {
                    best = Some(ip);
                }
            }
            best
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}
