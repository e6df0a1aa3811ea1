//! UDP discovery beacon.
//!
//! A sender broadcasts `"<hostname>:<backendPort>"` to the well-known
//! discovery port until told to stop; a receiver listens on that port with a
//! deadline and yields the first well-formed sender address. The sender's IP
//! comes from the UDP source address, the port from the text after the last
//! colon of the payload.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Well-known UDP port beacons are exchanged on.
pub const DISCOVERY_PORT: u16 = 8829;

/// Cadence of re-broadcasts while a sender waits for a connection. A single
/// lost datagram must not strand the session for the whole accept window.
pub const BROADCAST_INTERVAL: Duration = Duration::from_secs(2);

/// Broadcast side of the discovery protocol.
pub struct Beacon {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl Beacon {
    /// Open a broadcast-capable socket aimed at `broadcast_addr:port`.
    pub async fn announcer(broadcast_addr: &str, port: u16) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;
        let target: SocketAddr = format!("{broadcast_addr}:{port}").parse()?;
        Ok(Self {
            socket: Arc::new(socket),
            target,
        })
    }

    /// Send the beacon now and then every [`BROADCAST_INTERVAL`] until
    /// cancelled. Best effort: send errors are logged, never surfaced to the
    /// session.
    pub fn start_announcing(&self, hostname: String, backend_port: u16, cancel: CancellationToken) {
        let socket = self.socket.clone();
        let target = self.target;
        tokio::spawn(async move {
            let payload = format!("{hostname}:{backend_port}");
            let mut interval = time::interval(BROADCAST_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match socket.send_to(payload.as_bytes(), target).await {
                            Ok(_) => tracing::debug!("beacon sent to {}: {}", target, payload),
                            Err(e) => tracing::warn!("beacon send to {} failed: {}", target, e),
                        }
                    }
                }
            }
            tracing::debug!("beacon announcer stopped");
        });
    }
}

/// Listen on the discovery port until a well-formed beacon arrives or the
/// deadline passes. Malformed datagrams are skipped, not fatal. Returns the
/// sender's `"ip:port"`, or `None` on timeout.
pub async fn listen(port: u16, timeout: Duration) -> anyhow::Result<Option<String>> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    tracing::info!("now listening for beacons on udp port {}", port);

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 256];
    loop {
        match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok((len, addr))) => match parse_beacon(&buf[..len]) {
                Some(sender_port) => {
                    tracing::info!("beacon received from {}", addr);
                    return Ok(Some(format!("{}:{}", addr.ip(), sender_port)));
                }
                None => tracing::debug!("skipping malformed beacon from {}", addr),
            },
        }
    }
}

/// The backend port is whatever follows the last colon of the payload;
/// everything before it is an opaque marker.
pub fn parse_beacon(payload: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_takes_text_after_last_colon() {
        assert_eq!(parse_beacon(b"host-marker:51423"), Some(51423));
        assert_eq!(parse_beacon(b"some:nested:marker:4242"), Some(4242));
        assert_eq!(parse_beacon(b"alpha-node:4010\n"), Some(4010));
    }

    #[test]
    fn parse_rejects_malformed_payloads() {
        assert_eq!(parse_beacon(b"host-marker:notaport"), None);
        assert_eq!(parse_beacon(b"host-marker:"), None);
        assert_eq!(parse_beacon(b""), None);
        assert_eq!(parse_beacon(b"host:99999"), None);
        assert_eq!(parse_beacon(&[0xff, 0xfe, 0x3a]), None);
    }

    #[tokio::test]
    async fn listen_returns_none_on_timeout() {
        let result = listen(48954, Duration::from_millis(200))
            .await
            .expect("Should not error on timeout");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn listen_skips_junk_and_returns_first_valid_beacon() {
        let port = 48955;
        let listener = tokio::spawn(listen(port, Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = format!("127.0.0.1:{port}");
        sender.send_to(&[0xff, 0xfe], &target).await.unwrap();
        sender.send_to(b"not a beacon", &target).await.unwrap();
        sender.send_to(b"peer-marker:4242", &target).await.unwrap();

        let found = listener
            .await
            .unwrap()
            .expect("Should not error")
            .expect("Should find the valid beacon");
        assert_eq!(found, "127.0.0.1:4242");
    }
}
