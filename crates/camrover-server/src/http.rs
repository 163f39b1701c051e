//! Minimal HTTP/1.1 plumbing: request-line parsing and response writing.

use camrover_types::RelayError;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Headers attached to every plain HTTP response.
pub const CORS_HEADERS: &str = "Access-Control-Allow-Origin: *\r\n\
     Access-Control-Allow-Headers: Origin, X-Requested-With, Content-Type, Accept\r\n";

/// The parts of a request head the router cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub upgrade_websocket: bool,
}

impl RequestHead {
    /// Parse the request line and scan the headers of a (possibly partial)
    /// request head.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(raw);
        let mut lines = text.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let target = request_line.next()?.to_string();

        let upgrade_websocket = lines.take_while(|l| !l.is_empty()).any(|line| {
            let line = line.to_ascii_lowercase();
            line.starts_with("upgrade:") && line.contains("websocket")
        });

        Some(Self {
            method,
            target,
            upgrade_websocket,
        })
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }
}

/// Canonical reason phrase for the status codes this server emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Write a complete response with a `Content-Length` body.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-cache\r\n\
         {CORS_HEADERS}\
         Connection: close\r\n\
         \r\n",
        reason_phrase(status),
        body.len(),
    );
    writer
        .write_all(head.as_bytes())
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP write error: {e}")))?;
    writer
        .write_all(body)
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP write error: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| RelayError::Transport(format!("HTTP flush error: {e}")))
}

/// Plain-text response, used for errors.
pub async fn write_text<W>(writer: &mut W, status: u16, body: &str) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
{
    write_response(writer, status, "text/plain; charset=utf-8", body.as_bytes()).await
}

/// JSON response.
pub async fn write_json<W, T>(writer: &mut W, status: u16, value: &T) -> Result<(), RelayError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body =
        serde_json::to_vec(value).map_err(|e| RelayError::Serialization(e.to_string()))?;
    write_response(writer, status, "application/json", &body).await
}

/// Response head for an open-ended multipart stream with caching disabled.
pub fn stream_head(content_type: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: {content_type}\r\n\
         Cache-Control: no-cache, no-store, must-revalidate, private\r\n\
         Pragma: no-cache\r\n\
         Expires: 0\r\n\
         {CORS_HEADERS}\
         Connection: close\r\n\
         \r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_get() {
        let head = RequestHead::parse(b"GET /status?verbose=1 HTTP/1.1\r\nHost: rover\r\n\r\n").unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.path(), "/status");
        assert!(!head.upgrade_websocket);
    }

    #[test]
    fn detects_websocket_upgrade_case_insensitively() {
        let raw = b"GET / HTTP/1.1\r\nHost: rover\r\nUPGRADE: WebSocket\r\nConnection: Upgrade\r\n\r\n";
        assert!(RequestHead::parse(raw).unwrap().upgrade_websocket);
    }

    #[test]
    fn upgrade_in_body_is_ignored() {
        let raw = b"POST / HTTP/1.1\r\nHost: rover\r\n\r\nupgrade: websocket";
        assert!(!RequestHead::parse(raw).unwrap().upgrade_websocket);
    }

    #[test]
    fn rejects_garbage() {
        assert!(RequestHead::parse(b"").is_none());
        assert!(RequestHead::parse(b"GET\r\n").is_none());
    }

    #[tokio::test]
    async fn write_text_emits_status_and_cors() {
        let mut out = Vec::new();
        write_text(&mut out, 502, "camera offline").await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *"));
        assert!(text.contains("Content-Length: 14"));
        assert!(text.ends_with("camera offline"));
    }

    #[test]
    fn stream_head_disables_caching() {
        let head = stream_head("multipart/x-mixed-replace; boundary=frame");
        assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
        assert!(head.contains("no-store"));
        assert!(head.ends_with("\r\n\r\n"));
    }
}
