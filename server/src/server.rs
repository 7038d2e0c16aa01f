//! Listener, health endpoint and authenticated websocket upgrade
//!
//! One TCP listener serves both surfaces: plain `GET /health` requests are
//! answered directly (detected by peeking the request line), everything
//! else goes through the websocket handshake. Credential validation runs
//! inside the handshake callback, so a bad token is refused with an HTTP
//! 401 before the upgrade completes and never reaches the session.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, error, info};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::auth::{extract_token, AuthError, KeyRefreshError, TokenValidator};
use crate::config::Config;
use crate::connection::{self, MAX_FRAME_SIZE};
use crate::player::Player;
use crate::session::Session;

/// Fatal failures while bringing the process up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
    #[error("initial public key fetch failed: {0}")]
    KeyFetch(#[from] KeyRefreshError),
}

const HEALTH_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: application/json\r\n\
Content-Length: 15\r\n\
Connection: close\r\n\
\r\n\
{\"status\":\"ok\"}";

/// Accepts client transports for one session.
pub struct GameServer {
    config: Arc<Config>,
    validator: Arc<TokenValidator>,
    session: Arc<Session>,
    shutdown: broadcast::Sender<()>,
}

impl GameServer {
    pub fn new(
        config: Arc<Config>,
        validator: Arc<TokenValidator>,
        session: Arc<Session>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            config,
            validator,
            session,
            shutdown,
        }
    }

    /// Binds the configured listener and reports the local address (which
    /// matters when the port is 0).
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), StartupError> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await.map_err(StartupError::Bind)?;
        let local = listener.local_addr().map_err(StartupError::Bind)?;
        info!("Listening on {} (websocket + /health)", local);
        Ok((listener, local))
    }

    /// Accept loop; ends on shutdown.
    pub async fn run(self, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let validator = self.validator.clone();
                        let session = self.session.clone();
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            handle_socket(stream, addr, validator, session, shutdown).await;
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                _ = shutdown.recv() => {
                    info!("Listener stopped");
                    break;
                }
            }
        }
    }
}

/// Routes one accepted socket: health probe or authenticated upgrade.
async fn handle_socket(
    stream: TcpStream,
    addr: SocketAddr,
    validator: Arc<TokenValidator>,
    session: Arc<Session>,
    shutdown: broadcast::Sender<()>,
) {
    // Peek the request line; /health is answered without an upgrade.
    let mut head = [0u8; 12];
    if let Ok(n) = stream.peek(&mut head).await {
        if head[..n].starts_with(b"GET /health") {
            let mut stream = stream;
            let _ = stream.write_all(HEALTH_RESPONSE).await;
            let _ = stream.shutdown().await;
            return;
        }
    }

    let ws_config = WebSocketConfig {
        max_message_size: Some(MAX_FRAME_SIZE),
        max_frame_size: Some(MAX_FRAME_SIZE),
        ..WebSocketConfig::default()
    };

    let mut auth: Option<Result<Player, AuthError>> = None;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let protocols = request
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let query = request.uri().query();

        let (token, via_protocol) = match extract_token(protocols, authorization, query) {
            Some(found) => found,
            None => {
                auth = Some(Err(AuthError::MissingToken));
                return Err(reject("Missing authentication token"));
            }
        };
        match validator.validate(&token) {
            Ok(player) => {
                if via_protocol {
                    response.headers_mut().insert(
                        header::SEC_WEBSOCKET_PROTOCOL,
                        HeaderValue::from_static("access_token"),
                    );
                }
                auth = Some(Ok(player));
                Ok(response)
            }
            Err(e) => {
                let body = format!("Invalid token: {}", e);
                auth = Some(Err(e));
                Err(reject(&body))
            }
        }
    };

    match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
        Ok(ws) => {
            let player = match auth {
                Some(Ok(player)) => player,
                // The callback admits only validated players.
                _ => return,
            };
            info!(
                "Authenticated user: {} ({}) from {}",
                player.username, player.id, addr
            );
            connection::run(ws, player, addr, session, shutdown).await;
        }
        Err(e) => match auth {
            Some(Err(auth_error)) => {
                info!("Rejected connection from {}: {}", addr, auth_error);
            }
            _ => {
                debug!("Websocket handshake failed from {}: {}", addr, e);
            }
        },
    }
}

fn reject(body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}
