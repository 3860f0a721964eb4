//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use switchboard_core::{Connection, ConnectionRef};
use switchboard_runtime::Dispatcher;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::WsConnection;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// Heartbeat parameters for a session.
#[derive(Clone, Copy, Debug)]
pub struct SessionLimits {
    /// Interval between server-initiated Ping frames.
    pub heartbeat_interval: Duration,
    /// Disconnect after this long without any inbound frame.
    pub heartbeat_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Spawns the writer, which drains the outbound queue and sends pings
/// 2. Calls `on_open`; a rejected connection skips straight to cleanup
/// 3. Dispatches inbound frames one at a time, in arrival order
/// 4. Stops on client close, connection close, transport error, or shutdown
/// 5. Flushes queued frames, closes the socket, and calls `on_close`
#[instrument(skip_all, fields(conn_id = %conn.id()))]
pub async fn run_session(
    socket: WebSocket,
    conn: Arc<WsConnection>,
    outbound: mpsc::Receiver<Bytes>,
    dispatcher: Arc<Dispatcher>,
    limits: SessionLimits,
    shutdown: CancellationToken,
) {
    let (sink, mut stream) = socket.split();
    let conn_ref: ConnectionRef = conn.clone();

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    debug!("websocket session started");

    let writer = tokio::spawn(write_loop(sink, outbound, conn.clone(), limits));

    if dispatcher.on_open(&conn_ref).await.is_ok() {
        let closed = conn.close_token();
        loop {
            let msg = tokio::select! {
                msg = stream.next() => msg,
                () = closed.cancelled() => break,
                () = shutdown.cancelled() => {
                    debug!("server shutting down, closing session");
                    break;
                }
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    conn.mark_alive();
                    let raw = Bytes::copy_from_slice(text.as_str().as_bytes());
                    let _ = dispatcher.on_message(&conn_ref, raw).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    conn.mark_alive();
                    let _ = dispatcher.on_message(&conn_ref, data).await;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => conn.mark_alive(),
                Some(Ok(Message::Close(_))) => {
                    debug!("client sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    dispatcher.on_error(&conn_ref, &e);
                    break;
                }
                None => break,
            }
        }
    }

    conn.close();
    let _ = writer.await;
    dispatcher.on_close(&conn_ref);

    info!(age_secs = conn.age().as_secs(), "websocket session ended");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Bytes>,
    conn: Arc<WsConnection>,
    limits: SessionLimits,
) {
    let closed = conn.close_token();
    let mut ping = tokio::time::interval(limits.heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if sink.send(to_message(frame)).await.is_err() {
                    conn.close();
                    return;
                }
            }
            _ = ping.tick() => {
                if conn.idle() > limits.heartbeat_timeout {
                    warn!(idle_secs = conn.idle().as_secs(), "client unresponsive, disconnecting");
                    conn.close();
                    break;
                }
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    conn.close();
                    return;
                }
            }
            () = closed.cancelled() => break,
        }
    }

    // Frames queued before the close still go out, then the close frame.
    while let Ok(frame) = outbound.try_recv() {
        if sink.send(to_message(frame)).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

/// UTF-8 frames go out as text, anything else as binary.
fn to_message(frame: Bytes) -> Message {
    match String::from_utf8(frame.to_vec()) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(frame),
    }
}
