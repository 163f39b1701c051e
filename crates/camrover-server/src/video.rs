//! [`VideoProxy`] – re-exposes the rover camera's MJPEG stream over HTTP.
//!
//! Every request opens its own upstream connection; there is no shared
//! fan-out. The copy loop watches the client half of the socket so that a
//! browser closing the tab drops the upstream response (and its socket)
//! straight away instead of on the next failed write.

use std::net::SocketAddr;
use std::time::Duration;

use camrover_types::RelayError;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::http;

const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace";

/// How a proxy session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// Upstream ended the stream cleanly.
    Completed { bytes: u64 },
    /// The HTTP client went away.
    ClientClosed { bytes: u64 },
    /// Upstream failed or stalled after the headers were sent.
    Aborted { bytes: u64 },
    /// Upstream could not be opened; an error response was sent.
    Unavailable { status: u16 },
}

/// HTTP status reported to the client for an upstream failure.
pub fn status_for(error: &RelayError) -> u16 {
    match error {
        RelayError::UpstreamTimeout(_) => 504,
        _ => 502,
    }
}

/// Pulls the camera stream on behalf of HTTP clients.
#[derive(Debug, Clone)]
pub struct VideoProxy {
    client: reqwest::Client,
    upstream_url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl VideoProxy {
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the HTTP client cannot be built.
    pub fn new(
        upstream_url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            // A finished stream must not hand its socket to the next request.
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| RelayError::Config(format!("video proxy client: {e}")))?;
        Ok(Self {
            client,
            upstream_url: upstream_url.into(),
            connect_timeout,
            read_timeout,
        })
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    /// Open the upstream stream and wait for its response head. On success
    /// the second value is the upstream's multipart content type, boundary
    /// included.
    ///
    /// # Errors
    ///
    /// * [`RelayError::UpstreamTimeout`] – no response head within the
    ///   connect timeout.
    /// * [`RelayError::UpstreamStatus`] – upstream answered with a non-2xx.
    /// * [`RelayError::Upstream`] – the body is not a multipart replace
    ///   stream, or anything else (refused, DNS, bad URL).
    pub async fn open_upstream(&self) -> Result<(reqwest::Response, String), RelayError> {
        let request = self
            .client
            .get(&self.upstream_url)
            .header(ACCEPT, "multipart/x-mixed-replace, */*")
            .send();

        let response = match tokio::time::timeout(self.connect_timeout, request).await {
            Err(_) => return Err(RelayError::UpstreamTimeout(self.connect_timeout)),
            Ok(Err(e)) if e.is_timeout() => {
                return Err(RelayError::UpstreamTimeout(self.connect_timeout));
            }
            Ok(Err(e)) => return Err(RelayError::Upstream(e.to_string())),
            Ok(Ok(response)) => response,
        };

        if !response.status().is_success() {
            return Err(RelayError::UpstreamStatus(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_multipart_stream(&content_type) {
            return Err(RelayError::Upstream(format!(
                "camera answered with content type {content_type:?}, expected {STREAM_CONTENT_TYPE}"
            )));
        }
        Ok((response, content_type))
    }

    /// Serve one proxy session on `client`, whose request head has already
    /// been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] only when writing the response head
    /// (or the error response) to the client fails.
    pub async fn handle_stream_request<S>(
        &self,
        client: S,
        peer: SocketAddr,
    ) -> Result<ProxyOutcome, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_rx, mut client_tx) = tokio::io::split(client);

        let (upstream, content_type) = match self.open_upstream().await {
            Ok(opened) => opened,
            Err(e) => {
                let status = status_for(&e);
                warn!(peer = %peer, upstream = %self.upstream_url, error = %e, "video upstream unavailable");
                http::write_text(&mut client_tx, status, &e.to_string()).await?;
                return Ok(ProxyOutcome::Unavailable { status });
            }
        };

        client_tx
            .write_all(http::stream_head(&content_type).as_bytes())
            .await
            .map_err(|e| RelayError::Transport(format!("video head write to {peer}: {e}")))?;
        info!(peer = %peer, upstream = %self.upstream_url, "video stream opened");

        let mut body = Box::pin(upstream.bytes_stream());
        let mut probe = [0u8; 256];
        let mut bytes = 0u64;

        let outcome = loop {
            tokio::select! {
                chunk = tokio::time::timeout(self.read_timeout, body.next()) => match chunk {
                    Err(_) => {
                        warn!(peer = %peer, timeout = ?self.read_timeout, "video upstream stalled");
                        break ProxyOutcome::Aborted { bytes };
                    }
                    Ok(None) => break ProxyOutcome::Completed { bytes },
                    Ok(Some(Err(e))) => {
                        warn!(peer = %peer, error = %e, "video upstream failed mid-stream");
                        break ProxyOutcome::Aborted { bytes };
                    }
                    Ok(Some(Ok(chunk))) => {
                        if client_tx.write_all(&chunk).await.is_err() {
                            break ProxyOutcome::ClientClosed { bytes };
                        }
                        bytes += chunk.len() as u64;
                    }
                },
                read = client_rx.read(&mut probe) => match read {
                    Ok(0) | Err(_) => break ProxyOutcome::ClientClosed { bytes },
                    Ok(_) => {}
                },
            }
        };

        // Dropping the body closes the upstream socket.
        drop(body);
        let _ = client_tx.shutdown().await;
        debug!(peer = %peer, ?outcome, "video stream closed");
        Ok(outcome)
    }
}

/// `true` for a `multipart/x-mixed-replace` type that names its boundary.
fn is_multipart_stream(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with(STREAM_CONTENT_TYPE) && lower.contains("boundary=")
}
