//! Websocket hub.
//!
//! Accept loop plus per-connection handling: each socket gets a writer task
//! fed by an unbounded channel, so pushing events to one connection never
//! waits on another connection's socket. The first inbound frame must be a
//! `hello` within the auth deadline or the socket is closed; identity inside
//! the frame is trusted, the session provider upstream already verified it.

use std::net::SocketAddr;

use anyhow::Result;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};

use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::protocol::{
    ClientCommand, ConnectedEvent, ErrorCode, ErrorEvent, ServerEvent,
};
use parley_shared::ConnectionId;

use crate::router;
use crate::state::CoreState;

/// Run the accept loop. Blocks until the listener fails.
pub async fn run(state: CoreState) -> Result<()> {
    let listener = TcpListener::bind(state.config.ws_addr).await?;
    info!(addr = %state.config.ws_addr, "Websocket hub listening");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(state, stream, peer_addr).await {
                debug!(peer = %peer_addr, error = %e, "Connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    state: CoreState,
    stream: TcpStream,
    peer_addr: SocketAddr,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection_id = ConnectionId::new();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_close = matches!(&msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                break;
            }
            if is_close {
                let _ = ws_sender.close().await;
                break;
            }
        }
    });

    // The socket must identify itself before anything else happens.
    let auth_deadline = std::time::Duration::from_millis(state.config.auth_deadline_ms);
    let user = match tokio::time::timeout(auth_deadline, ws_receiver.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => match ClientCommand::from_json(&text) {
            Ok(ClientCommand::Hello(hello)) => hello.user_id,
            _ => {
                warn!(peer = %peer_addr, "First frame was not hello, closing");
                let _ = tx.send(WsMessage::Close(None));
                send_task.await.ok();
                return Ok(());
            }
        },
        Ok(_) => {
            let _ = tx.send(WsMessage::Close(None));
            send_task.await.ok();
            return Ok(());
        }
        Err(_) => {
            warn!(peer = %peer_addr, "Auth deadline elapsed, closing");
            let _ = tx.send(WsMessage::Close(None));
            send_task.await.ok();
            return Ok(());
        }
    };

    state.registry.register(connection_id, user, tx.clone());
    info!(user = %user, connection = %connection_id, peer = %peer_addr, "Client connected");

    let connected = ServerEvent::Connected(ConnectedEvent {
        connection_id,
        server_time: Utc::now(),
        protocol_version: PROTOCOL_VERSION.to_string(),
    });
    state.registry.send_to_connection(connection_id, &connected);

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match ClientCommand::from_json(&text) {
                Ok(command) => {
                    router::handle_command(&state, user, connection_id, command).await;
                }
                Err(e) => {
                    let event = ServerEvent::Error(ErrorEvent {
                        code: ErrorCode::Protocol,
                        message: format!("malformed command: {e}"),
                    });
                    state.registry.send_to_connection(connection_id, &event);
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(WsMessage::Ping(payload)) => {
                let _ = tx.send(WsMessage::Pong(payload));
            }
            Ok(_) => {}
            Err(e) => {
                error!(user = %user, connection = %connection_id, error = %e, "Websocket error");
                break;
            }
        }
    }

    state.registry.unregister(connection_id);
    send_task.abort();
    info!(user = %user, connection = %connection_id, "Client disconnected");
    Ok(())
}
