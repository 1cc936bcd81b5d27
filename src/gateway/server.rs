//! axum WebSocket gateway: one dialogue session per connection.

use super::protocol::{ClientMessage, ServerMessage};
use crate::config::{ColloquyConfig, ListenConfig};
use crate::conversation::{SessionId, SessionRegistry, SessionSettings};
use crate::error::{DialogueError, Result};
use crate::llm::CompletionClient;
use crate::pipeline::{
    ChannelTranscriptSource, ClientInput, ControlCommand, DialogueScript, OutputSink,
    SessionNotice, TurnCoordinator,
};
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTBOUND_CHANNEL_SIZE: usize = 32;
const INBOUND_CHANNEL_SIZE: usize = 16;

/// Shared state for all connections.
#[derive(Clone)]
pub struct GatewayState {
    registry: SessionRegistry,
    client: Arc<dyn CompletionClient>,
    script: DialogueScript,
    cancel: CancellationToken,
}

impl GatewayState {
    /// Build gateway state from config.
    ///
    /// Networked sessions are always continuous and speak no greeting.
    pub fn new(
        config: &ColloquyConfig,
        client: Arc<dyn CompletionClient>,
        cancel: CancellationToken,
    ) -> Self {
        let settings = SessionSettings {
            continuous: true,
            ..SessionSettings::from(&config.conversation)
        };
        Self {
            registry: SessionRegistry::new(settings),
            client,
            script: DialogueScript::networked(config.conversation.fallback_message.clone()),
            cancel,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// Routes: `GET /ws` (upgrade) and `GET /health`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve on an already bound listener until the state's token is cancelled.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<()> {
    let cancel = state.cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

/// Bind `gateway.host:gateway.port` and serve.
///
/// # Errors
///
/// Returns [`DialogueError::Gateway`] if the address cannot be bound.
pub async fn run_gateway(
    config: &ColloquyConfig,
    client: Arc<dyn CompletionClient>,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = config.gateway.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DialogueError::Gateway(format!("failed to bind {addr}: {e}")))?;
    let local_addr = listener.local_addr()?;

    info!("dialogue gateway listening on ws://{local_addr}/ws");
    serve(listener, GatewayState::new(config, client, cancel)).await
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len().await,
    }))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let id = state.registry.create().await;
    let Some(session) = state.registry.get(&id).await else {
        return;
    };

    let (mut ws_tx, ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CHANNEL_SIZE);

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode frame: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    if out_tx
        .send(ServerMessage::Connected {
            session_id: id.clone(),
        })
        .await
        .is_err()
    {
        state.registry.destroy(&id).await;
        return;
    }

    let (input, source, control_rx) = ChannelTranscriptSource::with_controls(INBOUND_CHANNEL_SIZE);
    let reader = tokio::spawn(read_frames(ws_rx, input, id.clone()));

    // Typed text needs no listen timeout.
    let listen = ListenConfig {
        timeout_secs: None,
        ..ListenConfig::default()
    };
    let coordinator = TurnCoordinator::new(
        id.clone(),
        session,
        Arc::clone(&state.client),
        source,
        SocketSink { tx: out_tx },
        control_rx,
    )
    .with_listen(listen)
    .with_script(state.script.clone())
    .with_cancel(state.cancel.child_token());

    if let Err(e) = coordinator.run().await {
        debug!(session = %id, "session ended with error: {e}");
    }

    reader.abort();
    state.registry.destroy(&id).await;
    let _ = writer.await;
    info!(session = %id, "client disconnected");
}

/// Route inbound frames, in arrival order, until the socket closes.
async fn read_frames(mut ws_rx: SplitStream<WebSocket>, mut input: ClientInput, id: SessionId) {
    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(session = %id, "websocket read failed: {e}");
                break;
            }
        };

        let delivered = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::Text { text }) => input.utterance(text).await.is_ok(),
            Ok(ClientMessage::Clear) => input.control(ControlCommand::ClearHistory).await.is_ok(),
            Ok(ClientMessage::Stop) => input.control(ControlCommand::StopSpeaking).await.is_ok(),
            Err(e) => {
                warn!(session = %id, "ignoring malformed frame: {e}");
                true
            }
        };
        if !delivered {
            break;
        }
    }
}

/// Sends replies and notices to the connection's writer task.
///
/// Replies are played client-side, so emission completes once queued.
struct SocketSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl SocketSink {
    async fn send(&self, msg: ServerMessage) {
        // A closed writer means the client is gone; the reader ends the session.
        if self.tx.send(msg).await.is_err() {
            debug!("dropping frame for disconnected client");
        }
    }
}

#[async_trait]
impl OutputSink for SocketSink {
    async fn emit(&mut self, text: &str) -> Result<()> {
        self.send(ServerMessage::Response {
            text: text.to_owned(),
        })
        .await;
        Ok(())
    }

    async fn notify(&mut self, notice: SessionNotice) -> Result<()> {
        match notice {
            SessionNotice::HistoryCleared => self.send(ServerMessage::HistoryCleared).await,
        }
        Ok(())
    }
}
