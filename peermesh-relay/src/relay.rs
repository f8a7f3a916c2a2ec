//! Relay server core: shared state, WebSocket handler, connection registry,
//! and signaling fan-out.
//!
//! The relay accepts WebSocket connections, assigns each a connection id,
//! and brokers two things: discovery (who shares a room with whom, via
//! paired `add-peer`/`remove-peer` introductions and the broadcast room
//! directory) and relay (opaque SDP/ICE payloads forwarded to exactly one
//! target connection). Handshake payloads pass through unmodified.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use peermesh_proto::signal::{self, ClientEvent, ServerEvent};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::rooms::{JoinOutcome, RoomRegistry};

/// Shared relay server state holding the connection registry and room
/// membership store.
pub struct RelayState {
    /// Maps connection id to a channel sender for delivering WebSocket
    /// messages. Relay routing and broadcasts only ever read this map.
    connections: RwLock<HashMap<String, mpsc::UnboundedSender<Message>>>,
    /// Room membership tables; all mutations serialize on its lock.
    pub rooms: RoomRegistry,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a new relay state with no connections and no rooms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RoomRegistry::new(),
        }
    }

    /// Registers a connection, storing the sender half of its message
    /// channel. Connection ids are freshly generated per socket, so an
    /// insert never displaces a live entry.
    pub async fn register(&self, conn_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let mut conns = self.connections.write().await;
        conns.insert(conn_id.to_string(), sender);
    }

    /// Removes a connection from the registry.
    pub async fn unregister(&self, conn_id: &str) {
        let mut conns = self.connections.write().await;
        conns.remove(conn_id);
    }

    /// Returns a clone of the sender for the given connection, if live.
    pub async fn get_sender(&self, conn_id: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(conn_id).cloned()
    }

    /// Sends an event to every live connection. Sends to connections that
    /// are mid-teardown fail silently.
    pub async fn broadcast(&self, event: &ServerEvent) {
        let text = match signal::encode(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode broadcast event");
                return;
            }
        };
        let conns = self.connections.read().await;
        for sender in conns.values() {
            let _ = sender.send(Message::Text(text.clone().into()));
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Assign a fresh connection id and register the send channel.
/// 2. Broadcast the room directory (the new connection gets its first copy).
/// 3. Run reader and writer tasks until either side ends.
/// 4. On teardown, cascade a leave for every joined room, then unregister.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.register(&conn_id, tx).await;
    tracing::info!(conn_id = %conn_id, "connection opened");

    broadcast_directory(&state).await;

    // Writer task: forwards queued events to the socket.
    let writer_conn_id = conn_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn_id = %writer_conn_id, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader task: dispatches incoming client events.
    let reader_conn_id = conn_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(&reader_conn_id, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn_id = %reader_conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    // Cascading teardown must run before the connection record is dropped,
    // whether the close was clean or not.
    handle_leave(&state, &conn_id).await;
    state.unregister(&conn_id).await;
    tracing::info!(conn_id = %conn_id, "connection closed and cleaned up");
}

/// Decodes and dispatches one text frame from a connection.
///
/// Undecodable frames are a client bug, not a server error: log and move on.
async fn handle_text_frame(conn_id: &str, text: &str, state: &Arc<RelayState>) {
    let event = match signal::decode::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "failed to decode client event");
            return;
        }
    };

    match event {
        ClientEvent::Join { room } => handle_join(state, conn_id, &room).await,
        ClientEvent::Leave => handle_leave(state, conn_id).await,
        ClientEvent::RelaySdp {
            peer_id,
            session_description,
        } => {
            // Origin-tag with the registered connection id, never with
            // anything the sender claims.
            let forwarded = ServerEvent::SessionDescription {
                peer_id: conn_id.to_string(),
                session_description,
            };
            forward(state, conn_id, &peer_id, &forwarded).await;
        }
        ClientEvent::RelayIce {
            peer_id,
            ice_candidate,
        } => {
            let forwarded = ServerEvent::IceCandidate {
                peer_id: conn_id.to_string(),
                ice_candidate,
            };
            forward(state, conn_id, &peer_id, &forwarded).await;
        }
    }
}

/// Adds a connection to a room and runs the introduction protocol.
async fn handle_join(state: &Arc<RelayState>, conn_id: &str, room_id: &str) {
    match state.rooms.join(conn_id, room_id).await {
        JoinOutcome::AlreadyJoined => {
            tracing::warn!(conn_id = %conn_id, room_id = %room_id, "already joined, ignoring");
        }
        JoinOutcome::Joined { existing } => {
            tracing::info!(
                conn_id = %conn_id,
                room_id = %room_id,
                peers = existing.len(),
                "joined room"
            );
            notify_existing_members(state, &existing, conn_id).await;
            notify_new_member(state, conn_id, &existing).await;
            broadcast_directory(state).await;
        }
    }
}

/// Introduces the joiner to each existing member as their responder:
/// existing members wait for the offer.
async fn notify_existing_members(state: &Arc<RelayState>, existing: &[String], joiner: &str) {
    for member in existing {
        send_to(
            state,
            member,
            &ServerEvent::AddPeer {
                peer_id: joiner.to_string(),
                create_offer: false,
            },
        )
        .await;
    }
}

/// Introduces each existing member to the joiner as its initiator: the
/// joiner creates the offer toward every peer already in the room.
async fn notify_new_member(state: &Arc<RelayState>, joiner: &str, existing: &[String]) {
    for member in existing {
        send_to(
            state,
            joiner,
            &ServerEvent::AddPeer {
                peer_id: member.clone(),
                create_offer: true,
            },
        )
        .await;
    }
}

/// Removes a connection from every joined room with symmetric teardown
/// notifications, then re-broadcasts the directory once.
///
/// Also the disconnect path, so it must tolerate a connection that never
/// joined anything.
async fn handle_leave(state: &Arc<RelayState>, conn_id: &str) {
    let departures = state.rooms.leave(conn_id, None).await;
    for departure in &departures {
        tracing::info!(
            conn_id = %conn_id,
            room_id = %departure.room_id,
            peers = departure.remaining.len(),
            "left room"
        );
        for member in &departure.remaining {
            send_to(
                state,
                member,
                &ServerEvent::RemovePeer {
                    peer_id: conn_id.to_string(),
                },
            )
            .await;
            send_to(
                state,
                conn_id,
                &ServerEvent::RemovePeer {
                    peer_id: member.clone(),
                },
            )
            .await;
        }
    }
    broadcast_directory(state).await;
}

/// Forwards an addressed handshake event to its target connection.
///
/// The target not being live is expected churn, not an error: the message
/// is dropped and the clients' own renegotiation flow covers the loss.
async fn forward(state: &Arc<RelayState>, from: &str, target: &str, event: &ServerEvent) {
    if let Some(sender) = state.get_sender(target).await {
        if let Ok(text) = signal::encode(event) {
            let _ = sender.send(Message::Text(text.into()));
        }
    } else {
        tracing::debug!(from = %from, target = %target, "relay target not connected, dropping");
    }
}

/// Recomputes the discoverable room list and shares it with everyone.
async fn broadcast_directory(state: &Arc<RelayState>) {
    let rooms = state.rooms.directory().await;
    state.broadcast(&ServerEvent::ShareRooms { rooms }).await;
}

/// Sends an event to a single connection via its channel, fire-and-forget.
async fn send_to(state: &Arc<RelayState>, conn_id: &str, event: &ServerEvent) {
    if let Some(sender) = state.get_sender(conn_id).await
        && let Ok(text) = signal::encode(event)
    {
        let _ = sender.send(Message::Text(text.into()));
    }
}

/// Starts the relay server on the given address and returns the bound
/// address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-built [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
