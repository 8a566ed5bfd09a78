//! `WebSocket` session lifecycle: handles a single connected client from
//! upgrade through disconnect.
//!
//! The session task runs the inbound pump and spawns the outbound pump.
//! Either side ending tears the connection down: the session unregisters
//! from its group (closing the delivery queue), the outbound pump turns the
//! closed queue into a Close frame, and the socket is dropped.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use freemial_hub::{Connection, Group, Registry};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, record_route,
};

/// Transport timing for one session.
#[derive(Clone, Copy, Debug)]
pub struct SessionTiming {
    /// Bound on each frame write.
    pub write_wait: Duration,
    /// Read deadline, extended by each Pong.
    pub pong_wait: Duration,
    /// Interval between Pings.
    pub ping_period: Duration,
}

impl From<&ServerConfig> for SessionTiming {
    fn from(config: &ServerConfig) -> Self {
        Self {
            write_wait: config.write_wait,
            pong_wait: config.pong_wait,
            ping_period: config.ping_period,
        }
    }
}

/// Why the session ended.
#[derive(Debug)]
enum Disconnect {
    ClientClosed,
    StreamEnded,
    Transport(SessionError),
    OutboundExited,
    Shutdown,
}

impl Disconnect {
    fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::StreamEnded => "stream_ended",
            Self::Transport(SessionError::ReadTimeout) => "read_timeout",
            Self::Transport(_) => "transport_error",
            Self::OutboundExited => "outbound_exited",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Why the outbound pump stopped.
#[derive(Debug)]
enum OutboundExit {
    /// The delivery queue was closed (unregistered or evicted).
    QueueClosed,
    /// A write failed or timed out.
    WriteFailed,
}

/// Run a `WebSocket` session for a connected client.
///
/// 1. Joins the connection's group
/// 2. Spawns the outbound pump (queued payloads plus periodic Pings)
/// 3. Routes inbound text through the group until the client leaves, the
///    read deadline passes, the outbound pump exits, or shutdown begins
/// 4. Unregisters and lets the outbound pump flush a Close frame
#[instrument(skip_all, fields(group_id = %connection.group_id(), conn_id = %connection.id(), role = %connection.role()))]
pub async fn run_ws_session(
    ws: WebSocket,
    registry: Arc<Registry>,
    connection: Arc<Connection>,
    queue: mpsc::Receiver<Arc<str>>,
    timing: SessionTiming,
    shutdown: CancellationToken,
) {
    let (ws_tx, ws_rx) = ws.split();

    let group = registry.join(&connection);
    info!(members = group.len(), "client connected");
    counter!(WS_CONNECTIONS_TOTAL, "role" => connection.role().as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut outbound = tokio::spawn(outbound_pump(ws_tx, queue, timing));
    let reason = inbound_pump(ws_rx, &group, &connection, timing, &mut outbound, &shutdown).await;

    group.unregister(&connection);

    match &reason {
        Disconnect::Transport(error) => warn!(%error, "client disconnected"),
        other => info!(reason = other.as_str(), "client disconnected"),
    }

    if !matches!(reason, Disconnect::OutboundExited) {
        match tokio::time::timeout(timing.write_wait, &mut outbound).await {
            Ok(Ok(exit)) => debug!(?exit, "outbound pump finished"),
            Ok(Err(e)) => warn!(error = %e, "outbound pump panicked"),
            Err(_) => {
                debug!("outbound pump did not flush in time, aborting");
                outbound.abort();
            }
        }
    }

    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
}

async fn inbound_pump(
    mut ws_rx: SplitStream<WebSocket>,
    group: &Group,
    connection: &Arc<Connection>,
    timing: SessionTiming,
    outbound: &mut JoinHandle<OutboundExit>,
    shutdown: &CancellationToken,
) -> Disconnect {
    let mut deadline = Instant::now() + timing.pong_wait;

    loop {
        tokio::select! {
            frame = tokio::time::timeout_at(deadline, ws_rx.next()) => {
                let msg = match frame {
                    Err(_) => return Disconnect::Transport(SessionError::ReadTimeout),
                    Ok(None) => return Disconnect::StreamEnded,
                    Ok(Some(Err(e))) => return Disconnect::Transport(e.into()),
                    Ok(Some(Ok(msg))) => msg,
                };
                match msg {
                    Message::Text(text) => route_frame(group, connection, text.as_str()),
                    // Some firmware sends JSON in binary frames.
                    Message::Binary(data) => match std::str::from_utf8(&data) {
                        Ok(text) => route_frame(group, connection, text),
                        Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                    },
                    Message::Pong(_) => deadline = Instant::now() + timing.pong_wait,
                    Message::Ping(_) => {}
                    Message::Close(_) => return Disconnect::ClientClosed,
                }
            }
            exit = &mut *outbound => {
                match exit {
                    Ok(exit) => debug!(?exit, "outbound pump exited"),
                    Err(e) => warn!(error = %e, "outbound pump panicked"),
                }
                return Disconnect::OutboundExited;
            }
            () = shutdown.cancelled() => return Disconnect::Shutdown,
        }
    }
}

fn route_frame(group: &Group, connection: &Arc<Connection>, text: &str) {
    let payload = normalize_frame(text);
    let outcome = group.route(connection, &payload);
    record_route(outcome);
}

async fn outbound_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Arc<str>>,
    timing: SessionTiming,
) -> OutboundExit {
    let mut ping = tokio::time::interval_at(Instant::now() + timing.ping_period, timing.ping_period);

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(first) = next else {
                    let _ = write_frame(&mut ws_tx, Message::Close(None), timing.write_wait).await;
                    return OutboundExit::QueueClosed;
                };
                let frame = coalesce(first, &mut queue);
                if let Err(error) = write_frame(&mut ws_tx, Message::Text(frame.into()), timing.write_wait).await {
                    debug!(%error, "text write failed");
                    return OutboundExit::WriteFailed;
                }
            }
            _ = ping.tick() => {
                if let Err(error) = write_frame(&mut ws_tx, Message::Ping(Bytes::new()), timing.write_wait).await {
                    debug!(%error, "ping write failed");
                    return OutboundExit::WriteFailed;
                }
            }
        }
    }
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    write_wait: Duration,
) -> Result<(), SessionError> {
    match tokio::time::timeout(write_wait, ws_tx.send(msg)).await {
        Ok(result) => result.map_err(SessionError::from),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

/// Flatten a frame to one line: newlines become spaces, then trim.
pub(crate) fn normalize_frame(text: &str) -> String {
    text.replace('\n', " ").trim().to_owned()
}

/// Join `first` with everything already waiting in `queue`, newline separated.
pub(crate) fn coalesce(first: Arc<str>, queue: &mut mpsc::Receiver<Arc<str>>) -> String {
    let mut frame = String::from(&*first);
    while let Ok(next) = queue.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}
