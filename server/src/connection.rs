//! Per-connection read/write lifecycle
//!
//! Each authenticated websocket gets a bounded outbound queue and two
//! tasks: the write task drains the queue into the socket and emits
//! keep-alive pings; the read task (the connection's own task) parses
//! inbound frames and feeds the session's command pipeline.
//!
//! Timeouts follow the classic pump shape: the read deadline is pushed by
//! every inbound frame (pongs included) and pings go out at 90% of the
//! pong deadline. A full outbound queue drops the message with a warning;
//! producers never block on a slow client.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use shared::protocol::{error_codes, ClientMessage, ServerMessage};

use crate::player::Player;
use crate::session::{Session, SessionCommand};

/// Time allowed to write one message to the peer.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Read deadline; any inbound frame (pong included) extends it.
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Keep-alive ping period (must be less than [`PONG_WAIT`]).
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Maximum inbound frame size in bytes.
pub const MAX_FRAME_SIZE: usize = 8192;

/// Outbound queue capacity per connection.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    TimedOut,
    TransportError,
    FrameTooLarge,
    Shutdown,
}

/// Cloneable handle to a connection's outbound queue. Sends are
/// non-blocking; overflow drops the frame.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<String>,
    label: String,
}

impl OutboundQueue {
    pub fn new(label: impl Into<String>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        (
            OutboundQueue {
                tx,
                label: label.into(),
            },
            rx,
        )
    }

    /// Serializes and enqueues a message. Returns false when the frame was
    /// dropped (queue full or connection gone).
    pub fn send(&self, msg: &ServerMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(frame) => self.send_frame(frame),
            Err(e) => {
                warn!("Failed to serialize message for {}: {}", self.label, e);
                false
            }
        }
    }

    /// Enqueues an already-serialized frame.
    pub fn send_frame(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping message", self.label);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drains the outbound queue into the websocket sink and keeps the peer
/// alive with pings. Ends when the queue closes, a write fails, or the
/// server shuts down.
async fn write_task(
    mut rx: mpsc::Receiver<String>,
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut shutdown: broadcast::Receiver<()>,
    label: String,
) {
    let mut ping = tokio::time::interval(PING_PERIOD);
    ping.tick().await; // the first tick fires immediately
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    match timeout(WRITE_WAIT, sink.send(Message::Text(frame))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!("Write error for {}: {}", label, e);
                            break;
                        }
                        Err(_) => {
                            debug!("Write deadline exceeded for {}", label);
                            break;
                        }
                    }
                }
                None => {
                    // Session dropped the queue; close politely.
                    let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await.is_err() {
                    debug!("Ping write deadline exceeded for {}", label);
                    break;
                }
            }
            _ = shutdown.recv() => {
                // Best-effort drain, then close.
                while let Ok(frame) = rx.try_recv() {
                    if timeout(WRITE_WAIT, sink.send(Message::Text(frame))).await.is_err() {
                        break;
                    }
                }
                let _ = timeout(WRITE_WAIT, sink.send(Message::Close(None))).await;
                break;
            }
        }
    }
}

/// Runs an authenticated connection until it closes. This is the read
/// pump; the write pump is spawned internally.
pub async fn run(
    ws: WebSocketStream<TcpStream>,
    player: Player,
    addr: SocketAddr,
    session: std::sync::Arc<Session>,
    shutdown: broadcast::Sender<()>,
) {
    let label = format!("{} ({})", player.username, addr);
    let (queue, rx) = OutboundQueue::new(label.clone());
    let (sink, mut stream) = ws.split();
    let writer = tokio::spawn(write_task(rx, sink, shutdown.subscribe(), label.clone()));

    let subject = player.id;
    let mut joined = false;
    let reason = loop {
        let message = match timeout(PONG_WAIT, stream.next()).await {
            Err(_) => break CloseReason::TimedOut,
            Ok(None) => break CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                use tokio_tungstenite::tungstenite::error::{CapacityError, Error};
                match e {
                    Error::Capacity(CapacityError::MessageTooLong { .. }) => {
                        break CloseReason::FrameTooLarge
                    }
                    Error::ConnectionClosed | Error::AlreadyClosed => break CloseReason::PeerClosed,
                    other => {
                        debug!("Read error from {}: {}", label, other);
                        break CloseReason::TransportError;
                    }
                }
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                handle_frame(&text, &player, &queue, &session, &mut joined).await;
            }
            Message::Binary(_) => {
                queue.send(&ServerMessage::error(
                    error_codes::INVALID_MESSAGE,
                    "Expected a JSON text frame",
                ));
            }
            Message::Close(_) => break CloseReason::PeerClosed,
            // Pings are answered by the protocol layer; both directions
            // already extended the read deadline by arriving.
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    };

    if joined {
        let _ = session.submit(SessionCommand::Leave { subject }).await;
    }
    info!("Connection closed: {} ({:?})", label, reason);
    writer.abort();
}

/// Parses and dispatches one inbound frame. Malformed frames get a
/// best-effort error reply and do not close the connection.
async fn handle_frame(
    text: &str,
    player: &Player,
    queue: &OutboundQueue,
    session: &std::sync::Arc<Session>,
    joined: &mut bool,
) {
    let message = match parse_client_message(text) {
        Ok(message) => message,
        Err(reply) => {
            debug!("Bad frame from {}: {}", player.username, reply.1);
            queue.send(&ServerMessage::error(reply.0, reply.1));
            return;
        }
    };

    match message {
        ClientMessage::Join {} => {
            let cache_record = session.load_cache_record(player.id).await;
            let mut player = player.clone();
            player.connected_at = Some(SystemTime::now());
            let command = SessionCommand::Join {
                player,
                queue: queue.clone(),
                cache_record,
            };
            if session.submit(command).await {
                *joined = true;
            } else {
                queue.send(&ServerMessage::error(
                    error_codes::JOIN_FAILED,
                    "Session is not accepting players",
                ));
            }
        }
        ClientMessage::Leave {} => {
            let _ = session.submit(SessionCommand::Leave { subject: player.id }).await;
            *joined = false;
        }
        ClientMessage::Chat { message } => {
            if !*joined {
                queue.send(&ServerMessage::error(
                    error_codes::NOT_AUTHENTICATED,
                    "Join the session before chatting",
                ));
                return;
            }
            let _ = session
                .submit(SessionCommand::Chat {
                    subject: player.id,
                    message,
                })
                .await;
        }
        ClientMessage::Ping {} => {
            queue.send(&ServerMessage::Pong {
                timestamp: unix_now(),
            });
        }
    }
}

/// Splits parse failures into "unknown type" and "malformed frame".
fn parse_client_message(text: &str) -> Result<ClientMessage, (&'static str, String)> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| (error_codes::INVALID_MESSAGE, format!("Failed to parse message: {}", e)))?;
    match serde_json::from_value::<ClientMessage>(value.clone()) {
        Ok(message) => Ok(message),
        Err(e) => {
            let known_shape = value.get("type").and_then(|t| t.as_str()).is_some();
            if known_shape && e.to_string().contains("unknown variant") {
                Err((
                    error_codes::UNKNOWN_MESSAGE_TYPE,
                    format!("Unknown message type: {}", value["type"]),
                ))
            } else {
                Err((error_codes::INVALID_MESSAGE, format!("Failed to parse message: {}", e)))
            }
        }
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
