//! WebSocket peer driver: one task per peer feeding the [`Relay`].
//!
//! Inbound frames are handed to the relay in arrival order on this task.
//! Outbound items are drained by a separate writer task so a slow socket
//! only ever backs up its own bounded queue.
//!
//! [`Relay`]: camrover_relay::Relay

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use camrover_relay::{InboundFrame, Outbound};
use camrover_types::{ConnectionId, RelayError};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, protocol::WebSocketConfig};
use tokio_tungstenite::{WebSocketStream, accept_async_with_config};
use tracing::{debug, warn};

use crate::server::ServerState;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub(crate) async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    // Oversize frames below this ceiling are dropped by the relay; above it
    // tungstenite refuses them before buffering the whole message.
    let limit = state.relay.limits().transport_message_limit();
    let config = WebSocketConfig::default()
        .max_message_size(Some(limit))
        .max_frame_size(Some(limit));
    let ws_stream = accept_async_with_config(stream, Some(config))
        .await
        .map_err(|e| RelayError::Handshake(format!("from {peer}: {e}")))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (mut connection, outbound) = state.relay.open(peer);
    let mut writer = tokio::spawn(write_outbound(
        ws_tx,
        outbound,
        state.send_timeout,
        connection.id(),
    ));

    let result = loop {
        let frame = tokio::select! {
            // Writer gave up: the peer is gone or stalled past the send timeout.
            _ = &mut writer => break Ok(()),
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => InboundFrame::Text(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => InboundFrame::Binary(data),
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(RelayError::Transport(format!("{peer}: {e}"))),
            },
        };

        if let Err(e) = state.relay.handle(&mut connection, frame) {
            warn!(connection = %connection.id(), error = %e, "failed to relay frame");
        }
    };

    state.relay.close(&mut connection);
    writer.abort();
    result
}

/// Drain `outbound` into the socket until the queue closes or a send fails
/// or exceeds `send_timeout`.
async fn write_outbound(
    mut ws_tx: WsSink,
    mut outbound: mpsc::Receiver<Outbound>,
    send_timeout: Duration,
    id: ConnectionId,
) {
    while let Some(item) = outbound.recv().await {
        let messages = match item {
            Outbound::Text(text) => vec![Message::Text(text.into())],
            Outbound::Telemetry { metadata, payload } => {
                vec![Message::Text(metadata.into()), Message::Binary(payload)]
            }
        };

        let send = async {
            for message in messages {
                ws_tx.feed(message).await?;
            }
            ws_tx.flush().await
        };
        match tokio::time::timeout(send_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = %id, error = %e, "send failed");
                return;
            }
            Err(_) => {
                warn!(connection = %id, timeout = ?send_timeout, "send timed out, dropping peer");
                return;
            }
        }
    }
    let _ = ws_tx.close().await;
}
