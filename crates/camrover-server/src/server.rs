//! [`RelayServer`] – HTTP + WebSocket front door of the rover relay.
//!
//! Listens on `0.0.0.0:3000` by default (configurable through
//! [`ServerConfig`]).
//!
//! * WebSocket upgrades (any path) → peer of the [`Relay`].
//! * `GET /video`, `GET /video/` → [`VideoProxy`] session.
//! * `GET /health`, `GET /status` → JSON reports.
//! * Anything else → 404.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camrover_relay::{BandwidthReporter, Relay, RelayLimits};
use camrover_types::RelayError;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{self, RequestHead};
use crate::status::{HealthReport, StatusReport};
use crate::video::VideoProxy;
use crate::ws;

/// Default TCP port for the relay.
pub const DEFAULT_PORT: u16 = 3000;

/// Default camera stream endpoint (ESP32-CAM access-point mode).
pub const DEFAULT_CAMERA_URL: &str = "http://192.168.4.1:81/stream";

/// Largest request head the router will look at.
const MAX_HEAD_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime settings for [`RelayServer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub camera_url: String,
    pub video_connect_timeout: Duration,
    pub video_read_timeout: Duration,
    /// Upper bound for writing one queued item to a peer.
    pub send_timeout: Duration,
    pub bandwidth_period: Duration,
    pub limits: RelayLimits,
}

impl ServerConfig {
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_camera_url(mut self, url: impl Into<String>) -> Self {
        self.camera_url = url.into();
        self
    }

    pub fn with_video_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.video_connect_timeout = connect;
        self.video_read_timeout = read;
        self
    }

    pub fn with_limits(mut self, limits: RelayLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            camera_url: DEFAULT_CAMERA_URL.to_string(),
            video_connect_timeout: Duration::from_secs(5),
            video_read_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(2),
            bandwidth_period: Duration::from_secs(5),
            limits: RelayLimits::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared by every connection task.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) relay: Relay,
    pub(crate) video: VideoProxy,
    pub(crate) send_timeout: Duration,
    started: Instant,
}

// ---------------------------------------------------------------------------
// RelayServer
// ---------------------------------------------------------------------------

/// The rover relay server.
///
/// # Example
///
/// ```rust,no_run
/// use camrover_server::{RelayServer, ServerConfig};
///
/// #[tokio::main]
/// async fn main() {
///     RelayServer::new(ServerConfig::default().with_port(3000))
///         .run()
///         .await
///         .expect("relay server failed");
/// }
/// ```
pub struct RelayServer {
    config: ServerConfig,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener without accepting yet.
    ///
    /// # Errors
    ///
    /// * [`RelayError::Bind`] if the listener cannot bind.
    /// * [`RelayError::Config`] if the video proxy client cannot be built.
    pub async fn bind(self) -> Result<BoundServer, RelayError> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| RelayError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let video = VideoProxy::new(
            self.config.camera_url.clone(),
            self.config.video_connect_timeout,
            self.config.video_read_timeout,
        )?;
        let state = Arc::new(ServerState {
            relay: Relay::new(self.config.limits.clone()),
            video,
            send_timeout: self.config.send_timeout,
            started: Instant::now(),
        });

        Ok(BoundServer {
            listener,
            local_addr,
            state,
            bandwidth_period: self.config.bandwidth_period,
        })
    }

    /// Bind and serve forever.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub async fn run(self) -> Result<(), RelayError> {
        self.bind().await?.serve().await;
        Ok(())
    }
}

/// A server whose listener is bound and ready to accept.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    bandwidth_period: Duration,
}

impl BoundServer {
    /// The address actually bound (useful with port `0`).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The relay core behind this server.
    pub fn relay(&self) -> &Relay {
        &self.state.relay
    }

    /// Accept connections forever.
    pub async fn serve(self) {
        self.serve_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            addr = %self.local_addr,
            camera = %self.state.video.upstream_url(),
            "rover relay listening"
        );

        let reporter = BandwidthReporter::new(
            self.state.relay.registry().clone(),
            self.bandwidth_period,
        )
        .spawn();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, state).await {
                                warn!(peer = %peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }

        reporter.abort();
    }
}

// ---------------------------------------------------------------------------
// Per-connection routing
// ---------------------------------------------------------------------------

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    // `peek` leaves the bytes in the socket so tungstenite's handshaker still
    // sees the full upgrade request.
    let mut buf = [0u8; MAX_HEAD_BYTES];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| RelayError::Transport(format!("peek error from {peer}: {e}")))?;
    if n == 0 {
        return Ok(());
    }

    let Some(head) = RequestHead::parse(&buf[..n]) else {
        return http::write_text(&mut stream, 400, "malformed request").await;
    };

    if head.upgrade_websocket {
        return ws::handle_ws(stream, peer, state).await;
    }

    // Consume the head we already looked at before answering.
    stream
        .read(&mut buf[..n])
        .await
        .map_err(|e| RelayError::Transport(format!("read error from {peer}: {e}")))?;
    debug!(peer = %peer, method = %head.method, path = %head.path(), "http request");

    match (head.method.as_str(), head.path()) {
        ("GET", "/video" | "/video/") => {
            state.video.handle_stream_request(stream, peer).await?;
            Ok(())
        }
        ("GET", "/health") => http::write_json(&mut stream, 200, &HealthReport::ok()).await,
        ("GET", "/status") => {
            let report = StatusReport::collect(
                state.started,
                state.relay.registry().len(),
                state.video.upstream_url(),
            );
            http::write_json(&mut stream, 200, &report).await
        }
        ("OPTIONS", _) => http::write_response(&mut stream, 204, "text/plain", b"").await,
        (_, "/video" | "/video/" | "/health" | "/status") => {
            http::write_text(&mut stream, 405, "method not allowed").await
        }
        _ => http::write_text(&mut stream, 404, "not found").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_3000() {
        let server = RelayServer::new(ServerConfig::default());
        assert_eq!(server.port(), DEFAULT_PORT);
    }

    #[test]
    fn with_port_overrides_default() {
        let server = RelayServer::new(ServerConfig::default()).with_port(9999);
        assert_eq!(server.port(), 9999);
    }

    #[test]
    fn config_builders() {
        let config = ServerConfig::default()
            .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .with_port(0)
            .with_camera_url("http://cam/stream");
        assert_eq!(config.socket_addr(), SocketAddr::from(([127, 0, 0, 1], 0)));
        assert_eq!(config.camera_url, "http://cam/stream");
    }

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let bound = RelayServer::new(
            ServerConfig::default()
                .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(0),
        )
        .bind()
        .await
        .unwrap();
        assert_ne!(bound.local_addr().port(), 0);
        assert!(bound.relay().registry().is_empty());
    }

    #[tokio::test]
    async fn bind_conflict_is_a_bind_error() {
        let first = RelayServer::new(
            ServerConfig::default()
                .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(0),
        )
        .bind()
        .await
        .unwrap();
        let taken = first.local_addr().port();

        let second = RelayServer::new(
            ServerConfig::default()
                .with_bind_addr(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .with_port(taken),
        )
        .bind()
        .await;
        assert!(matches!(second, Err(RelayError::Bind { .. })));
    }
}
