//! `camrover-server` – The Rover Relay Front Door
//!
//! Boots a lightweight HTTP + WebSocket server (default port `3000`) that:
//!
//! 1. **Relays** control records and audio telemetry between every connected
//!    operator console and the rover over persistent WebSocket connections,
//!    using the [`Relay`] core.
//!
//! 2. **Proxies** the rover camera's MJPEG stream at `GET /video/`, one
//!    upstream connection per HTTP client, independent of the relay tasks.
//!
//! 3. **Reports** liveness at `GET /health` and the connection count plus
//!    camera endpoint at `GET /status`.
//!
//! # Usage
//!
//! ```rust,no_run
//! use camrover_server::{RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().with_camera_url("http://192.168.4.1:81/stream");
//!     RelayServer::new(config)
//!         .run()
//!         .await
//!         .expect("relay server failed");
//! }
//! ```
//!
//! [`Relay`]: camrover_relay::Relay

pub mod http;
pub mod server;
pub mod status;
pub mod video;
mod ws;

pub use server::{BoundServer, DEFAULT_CAMERA_URL, DEFAULT_PORT, RelayServer, ServerConfig};
pub use status::{HealthReport, StatusReport};
pub use video::{ProxyOutcome, VideoProxy};
