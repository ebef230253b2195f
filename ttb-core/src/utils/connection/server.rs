//! WebSocket Server Module
//!
//! This module defines the WebSocket server implementation using the
//! `picoserve` framework. It accepts JSON-encoded [`SystemCommand`]s, applies
//! the validation that must happen synchronously (LED color bounds), and
//! forwards everything else over the command channels so the hardware loops
//! stay the only writers to their buses.

extern crate alloc;

use alloc::{string::String, vec::Vec};

use embassy_net::Stack;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embassy_time::Duration;
use embedded_io_async::Read;
use hashbrown::HashMap;
use lazy_static::lazy_static;
use picoserve::{
    extract::FromRequest,
    io::embedded_io_async as embedded_aio,
    request::{RequestBody, RequestParts},
    response::{
        ws::{Message, ReadMessageError, SocketRx, SocketTx, WebSocketCallback, WebSocketUpgrade},
        StatusCode,
    },
    url_encoded::deserialize_form,
    Router,
};
use serde::Deserialize;

use crate::utils::controllers::{
    leds::LedRequest, MotionCommand, SystemCommand, LED_CHANNEL, MOTION_CHANNEL,
};

/// Minimal control page served at `/`; the real UI lives outside this crate.
const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>Tank-Tread Bot</title></head>
<body>
<h1>Tank-Tread Bot</h1>
<p>Connect a WebSocket to <code>/ws?session=&lt;id&gt;</code> and send JSON commands, e.g.</p>
<pre>{"ct":"m","mc":"drive","l":50,"r":50}
{"ct":"v","vc":"set","name":"base_joint","deg":45}
{"ct":"l","lc":"solid","r":0,"g":128,"b":255}
{"ct":"r","rc":"measure","timeout_ms":30}</pre>
</body>
</html>
"#;

pub struct ServerTimer;
pub struct WebSocket;
#[derive(Clone, Debug)]
pub struct SessionState {
    pub last_seen: u64,
}
pub struct SessionManager;

lazy_static! {
    pub static ref SESSION_STORE: Mutex<CriticalSectionRawMutex, HashMap<String, SessionState>> =
        Mutex::new(HashMap::new());
}

/// Manages timeouts for the WebSocket server.
#[allow(unused_qualifications)]
impl picoserve::Timer for ServerTimer {
    type Duration = embassy_time::Duration;
    type TimeoutError = embassy_time::TimeoutError;

    /// Runs a future with a timeout.
    async fn run_with_timeout<F: core::future::Future>(
        &mut self,
        duration: Self::Duration,
        future: F,
    ) -> Result<F::Output, Self::TimeoutError> {
        embassy_time::with_timeout(duration, future).await
    }
}

/// Validate a command where needed and forward it to its hardware channel.
///
/// Returns the acknowledgement text, or an error string when validation
/// rejected the command without enqueueing anything.
async fn dispatch(command: SystemCommand) -> Result<&'static str, &'static str> {
    match command {
        SystemCommand::L(led) => match LedRequest::try_from(led) {
            Ok(request) => {
                LED_CHANNEL.send(request).await;
                Ok("LED command received and forwarded")
            }
            Err(error) => {
                tracing::error!(%error, "LED command rejected");
                Err("Color channel outside [0, 255]")
            }
        },
        SystemCommand::V(servo) => {
            MOTION_CHANNEL.send(MotionCommand::Servo(servo)).await;
            Ok("Servo command received and forwarded")
        }
        SystemCommand::M(motor) => {
            MOTION_CHANNEL.send(MotionCommand::Motor(motor)).await;
            Ok("Motor command received and forwarded")
        }
        SystemCommand::R(range) => {
            MOTION_CHANNEL.send(MotionCommand::Range(range)).await;
            Ok("Range command received and forwarded")
        }
    }
}

/// Handles incoming WebSocket connections.
impl WebSocketCallback for WebSocket {
    async fn run<Reader, Writer>(
        self,
        mut rx: SocketRx<Reader>,
        mut tx: SocketTx<Writer>,
    ) -> Result<(), Writer::Error>
    where
        Reader: embedded_aio::Read,
        Writer: embedded_aio::Write<Error = Reader::Error>,
    {
        let mut buffer = [0; 1024];

        tx.send_text("Connected").await?;

        let close_reason = loop {
            match rx.next_message(&mut buffer).await {
                Ok(Message::Pong(_)) => continue,
                Ok(Message::Ping(data)) => tx.send_pong(data).await?,
                Ok(Message::Close(reason)) => {
                    tracing::info!(?reason, "websocket closed");
                    break None;
                }
                Ok(Message::Text(data)) => match serde_json::from_str::<SystemCommand>(data) {
                    Ok(command) => match dispatch(command).await {
                        Ok(ack) => tx.send_text(ack).await?,
                        Err(rejection) => tx.send_text(rejection).await?,
                    },
                    Err(error) => {
                        tracing::error!(?error, "error deserializing SystemCommand");
                        tx.send_text("Invalid command format").await?
                    }
                },
                Ok(Message::Binary(data)) => match serde_json::from_slice::<SystemCommand>(data) {
                    Ok(command) => match dispatch(command).await {
                        Ok(ack) => tx.send_binary(ack.as_bytes()).await?,
                        Err(rejection) => tx.send_binary(rejection.as_bytes()).await?,
                    },
                    Err(error) => {
                        tracing::error!(?error, "error deserializing incoming message");
                        tx.send_binary(b"Invalid command format").await?
                    }
                },
                Err(error) => {
                    tracing::error!(?error, "websocket error");
                    let code = match error {
                        ReadMessageError::TextIsNotUtf8 => 1007,
                        ReadMessageError::ReservedOpcode(_) => 1003,
                        ReadMessageError::ReadFrameError(_)
                        | ReadMessageError::UnexpectedMessageStart
                        | ReadMessageError::MessageStartsWithContinuation => 1002,
                        ReadMessageError::Io(err) => return Err(err),
                    };
                    break Some((code, "Websocket Error"));
                }
            };
        };

        tx.close(close_reason).await
    }
}

#[allow(dead_code)]
impl SessionManager {
    /// Creates a new session with the given session ID and timestamp.
    pub async fn create_session(session_id: String, timestamp: u64) {
        SESSION_STORE.lock().await.insert(
            session_id,
            SessionState {
                last_seen: timestamp,
            },
        );
    }

    /// Retrieves a copy of the session state for the given session ID.
    /// Returns None if the session does not exist.
    pub async fn get_session(session_id: &str) -> Option<SessionState> {
        SESSION_STORE.lock().await.get(session_id).cloned()
    }

    /// Updates the last seen timestamp of the session identified by session_id.
    /// Returns true if the session was found and updated.
    pub async fn update_session(session_id: &str, timestamp: u64) -> bool {
        if let Some(session) = SESSION_STORE.lock().await.get_mut(session_id) {
            session.last_seen = timestamp;
            true
        } else {
            false
        }
    }

    /// Removes the session identified by session_id.
    /// Returns true if a session was removed.
    pub async fn remove_session(session_id: &str) -> bool {
        SESSION_STORE.lock().await.remove(session_id).is_some()
    }

    /// Purges sessions that have not been updated since the provided threshold.
    pub async fn purge_stale_sessions(threshold: u64) {
        SESSION_STORE
            .lock()
            .await
            .retain(|_id, session| session.last_seen >= threshold);
    }

    /// Returns a list of active session IDs.
    pub async fn list_sessions() -> Vec<String> {
        SESSION_STORE.lock().await.keys().cloned().collect()
    }
}

/// Creates WS Server
pub async fn run(
    id: usize,
    port: u16,
    stack: Stack<'static>,
    config: Option<&'static picoserve::Config<Duration>>,
) -> ! {
    let default_config = picoserve::Config::new(picoserve::Timeouts {
        start_read_request: Some(Duration::from_secs(5)),
        persistent_start_read_request: None,
        read_request: Some(Duration::from_secs(1)),
        write: Some(Duration::from_secs(5)),
    });

    let config = config.unwrap_or(&default_config);

    let router = Router::new()
        // Serve the control page at "/"
        .route(
            "/",
            picoserve::routing::get(|| async {
                picoserve::response::Response::new(StatusCode::OK, INDEX_HTML)
                    .with_headers([("Content-Type", "text/html; charset=utf-8")])
            }),
        )
        // WebSocket communication on "/ws"
        .route(
            "/ws",
            picoserve::routing::get(|params: WsConnectionParams| async move {
                let session_id = params.query.session;
                tracing::info!("New WebSocket connection with session id: {}", session_id);
                let now = embassy_time::Instant::now().as_secs();
                SessionManager::create_session(session_id.clone(), now).await;
                params
                    .upgrade
                    .on_upgrade(WebSocket)
                    .with_protocol("messages")
            }),
        );

    // Print out the IP and port before starting the server.
    if let Some(ip_cfg) = stack.config_v4() {
        tracing::info!("Starting server at {}:{}", ip_cfg.address, port);
    } else {
        tracing::warn!(
            "Starting WebSocket server on port {port}, but no IPv4 address is assigned yet!"
        );
    }

    let (mut rx_buffer, mut tx_buffer, mut http_buffer) = ([0; 1024], [0; 1024], [0; 4096]);

    picoserve::listen_and_serve_with_state(
        id,
        &router,
        config,
        stack,
        port,
        &mut rx_buffer,
        &mut tx_buffer,
        &mut http_buffer,
        &(),
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    session: String,
}

pub struct WsConnectionParams {
    pub upgrade: WebSocketUpgrade,
    pub query: QueryParams,
}

impl<'r, S> FromRequest<'r, S> for WsConnectionParams {
    type Rejection = &'static str;

    async fn from_request<R: Read>(
        state: &'r S,
        parts: RequestParts<'r>,
        body: RequestBody<'r, R>,
    ) -> Result<Self, Self::Rejection> {
        // First extract the WebSocketUpgrade as usual.
        let upgrade = WebSocketUpgrade::from_request(state, parts.clone(), body)
            .await
            .map_err(|_| "Failed to extract WebSocketUpgrade")?;

        // Then extract the query string for QueryParams.
        let query_str = parts.query().ok_or("Missing query parameters")?;
        let query =
            deserialize_form::<QueryParams>(query_str).map_err(|_| "Invalid query parameters")?;

        if query.session.is_empty() {
            return Err("Session ID is required");
        }

        Ok(WsConnectionParams { upgrade, query })
    }
}
