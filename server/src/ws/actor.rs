use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::state::AppState;
use crate::ws::dispatch::NotificationKind;
use crate::ws::protocol::{self, ClientMessage};
use crate::ws::{Connection, DuplicatePolicy, Identity, CLOSE_GOING_AWAY, CLOSE_SUPERSEDED};

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    ClientClosed,
    ReceiveError,
    StreamEnded,
    LocalClose,
}

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Keepalive task: pings periodically, closes the connection on a missing pong
/// - Reader loop (this task): acknowledges inbound messages and watches for close
///
/// The registry entry lives exactly as long as the reader loop.
pub async fn run_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let connection = Connection::new(tx.clone());
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));
    connection.mark_open();

    register_connection(&state, &identity, &connection);

    tracing::info!(
        identity = %identity,
        connection_id = %connection.id(),
        "WebSocket actor started"
    );

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = tokio::spawn(keepalive_task(
        connection.clone(),
        pong_rx,
        state.settings.ping_interval,
        state.settings.pong_timeout,
    ));

    let exit = loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(msg)) => match msg {
                    Message::Text(text) => {
                        let parsed = protocol::parse_text_message(text.as_str());
                        acknowledge(&state, &identity, &parsed);
                    }
                    Message::Binary(_) => {
                        acknowledge(&state, &identity, &ClientMessage::Binary);
                    }
                    Message::Pong(_) => {
                        let _ = pong_tx.send(());
                    }
                    Message::Ping(data) => {
                        let _ = tx.send(Message::Pong(data));
                    }
                    Message::Close(frame) => {
                        let (code, reason) = frame
                            .map(|f| (f.code, f.reason.as_str().to_string()))
                            .unwrap_or((1005, String::new()));
                        tracing::info!(
                            identity = %identity,
                            code,
                            reason = %reason,
                            "Socket closed by client"
                        );
                        connection.mark_closing();
                        break Exit::ClientClosed;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        identity = %identity,
                        error = %e,
                        "WebSocket receive error"
                    );
                    break Exit::ReceiveError;
                }
                None => {
                    tracing::info!(identity = %identity, "WebSocket stream ended");
                    break Exit::StreamEnded;
                }
            },
            _ = connection.closing() => {
                await_peer_close(&mut ws_receiver, state.settings.close_timeout).await;
                break Exit::LocalClose;
            }
        }
    };

    connection.mark_closed();
    ping_handle.abort();

    let removed = state.registry.delete_if_current(&identity, &connection);
    let connection_id = connection.id();
    state.superseded.remove(&connection_id);

    // The writer drains whatever is queued and exits once every sender is gone
    drop(tx);
    drop(connection);
    let mut writer_handle = writer_handle;
    if timeout(state.settings.close_timeout, &mut writer_handle)
        .await
        .is_err()
    {
        writer_handle.abort();
    }

    tracing::info!(
        identity = %identity,
        connection_id = %connection_id,
        exit = ?exit,
        deregistered = removed,
        "WebSocket actor stopped"
    );
}

/// Register the connection and queue its confirmation, then apply the
/// duplicate-registration policy to whatever connection it displaced.
///
/// The confirmation is queued while the registry entry is still locked, so no
/// `MessageReceived` routed by identity can overtake it.
fn register_connection(state: &AppState, identity: &Identity, connection: &Connection) {
    let displaced = state
        .registry
        .set_with(identity.clone(), connection.clone(), |current| {
            state
                .dispatcher
                .deliver(identity, current, NotificationKind::ConnectionEstablished);
        });
    let Some(previous) = displaced else {
        return;
    };

    tracing::info!(
        identity = %identity,
        previous = %previous.id(),
        current = %connection.id(),
        policy = ?state.settings.duplicate_policy,
        "Identity reconnected, replacing registered connection"
    );

    match state.settings.duplicate_policy {
        DuplicatePolicy::CloseSuperseded => {
            previous.close(CLOSE_SUPERSEDED, "Superseded by a newer connection");
        }
        DuplicatePolicy::Replace => {
            if previous.is_open() {
                state
                    .superseded
                    .insert(previous.id(), (identity.clone(), previous));
            }
        }
    }
}

fn acknowledge(state: &AppState, identity: &Identity, message: &ClientMessage) {
    protocol::handle_client_message(identity, message);
    state
        .dispatcher
        .notify(identity, NotificationKind::MessageReceived);
}

/// Wait a bounded time for the peer to answer a server-initiated close.
async fn await_peer_close(ws_receiver: &mut SplitStream<WebSocket>, limit: Duration) {
    let waited = timeout(limit, async {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    })
    .await;

    if waited.is_err() {
        tracing::debug!("Peer did not acknowledge close in time, dropping transport");
    }
}

/// Keepalive: sends periodic pings and closes the connection if a pong does
/// not arrive in time.
async fn keepalive_task(
    connection: Connection,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping_timer = interval(ping_interval);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        // Only a pong that arrives after this ping answers it
        while pong_rx.try_recv().is_ok() {}

        if connection.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            // Connection is closing or the writer is gone
            break;
        }

        match timeout(pong_timeout, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!(connection_id = %connection.id(), "Pong timeout, closing connection");
                connection.close(CLOSE_GOING_AWAY, "Pong timeout");
                break;
            }
        }
    }
}

/// Writer task: receives messages from mpsc channel and forwards them to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let is_close = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed, connection is broken
            break;
        }
        if is_close {
            break;
        }
    }
}
