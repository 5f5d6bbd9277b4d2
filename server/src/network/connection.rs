//! WebSocket listener and per-connection reader/writer tasks.
//!
//! Nothing here touches the world. Readers forward raw text frames to the
//! tick loop as [`NetEvent`]s; writers drain a per-connection channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;

use crate::persistence::PlayerRecord;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Something for the writer task to put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// A successful login, ready to become a player
#[derive(Debug, Clone)]
pub struct Login {
    pub record: PlayerRecord,
    pub guest: bool,
}

/// Events delivered to the tick loop, in arrival order
#[derive(Debug)]
pub enum NetEvent {
    Connected {
        id: ConnectionId,
        addr: SocketAddr,
        sender: UnboundedSender<Outbound>,
    },
    Message {
        id: ConnectionId,
        text: String,
    },
    /// Result of a background authentication; `Err` carries the reason
    /// string the client gets before being closed
    LoginResult {
        id: ConnectionId,
        result: Result<Login, realm_shared::Notice>,
    },
    Disconnected {
        id: ConnectionId,
    },
}

/// Accepts connections forever, spawning a session per socket
pub async fn listen(listener: TcpListener, events: UnboundedSender<NetEvent>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let events = events.clone();

        tokio::spawn(async move {
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws_stream) => handle_session(ws_stream, id, addr, events).await,
                Err(e) => warn!("WebSocket handshake with {} failed: {}", addr, e),
            }
        });
    }
}

async fn handle_session(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    id: ConnectionId,
    addr: SocketAddr,
    events: UnboundedSender<NetEvent>,
) {
    let (mut ws_writer, mut ws_reader) = ws_stream.split();
    let (sender, mut outbound) = mpsc::unbounded_channel();

    if events.send(NetEvent::Connected { id, addr, sender }).is_err() {
        return;
    }
    info!("Connection {} opened from {}", id, addr);

    // Ends once the tick loop drops the sender or asks for a close
    tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            let message = match item {
                Outbound::Text(text) => Message::Text(text),
                Outbound::Close => {
                    let _ = ws_writer.send(Message::Close(None)).await;
                    break;
                }
            };
            if ws_writer.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_writer.close().await;
    });

    while let Some(result) = ws_reader.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if events.send(NetEvent::Message { id, text }).is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            // Pings are answered by tungstenite itself
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on connection {}: {}", id, e);
                break;
            }
        }
    }

    let _ = events.send(NetEvent::Disconnected { id });
    info!("Connection {} from {} closed", id, addr);
}
