//! Canvas Sync Reference Authority
//!
//! Owns the canonical canvas of each room, applies client intents and
//! broadcasts a full, sequenced snapshot to every client after each change.
//!
//! ## Protocol
//!
//! Clients send:
//! ```json
//! { "type": "CURSOR_UPDATE", "x": 100, "y": 200 }
//! { "type": "TEXT_ELEMENT_UPDATE", "id": "optional", "x": 10, "y": 20, "text": "hi" }
//! ```
//! and receive:
//! ```json
//! { "cursors": { "<userId>": { "userId": "...", "x": 1, "y": 2 } }, "textElements": [], "seq": 3 }
//! ```

mod authority;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use canvas_sync_core::codec::decode_intent;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::{collections::HashSet, net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use authority::Authority;

/// Server configuration
const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ROOM: &str = "default";
const DEFAULT_ADDR: &str = "0.0.0.0:3030";
const ADDR_ENV: &str = "CANVAS_SYNC_ADDR";

/// Room state
struct Room {
    /// Broadcast channel for snapshots
    tx: broadcast::Sender<String>,
    /// Connected user IDs
    peers: HashSet<String>,
    /// Canonical canvas
    authority: Authority,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashSet::new(),
            authority: Authority::new(),
        }
    }

    /// Send the next snapshot to every member. Called with the room locked,
    /// so broadcasts leave in sequence order.
    fn broadcast(&mut self) {
        match self.authority.next_snapshot() {
            Ok(json) => {
                let _ = self.tx.send(json);
            }
            Err(e) => error!("Failed to encode snapshot: {}", e),
        }
    }
}

/// Shared application state
struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
}

impl AppState {
    fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Add a user to a room; returns their broadcast receiver and the
    /// snapshot they start from.
    fn join_room(&self, room_id: &str, user_id: &str) -> (broadcast::Receiver<String>, Option<String>) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        room.peers.insert(user_id.to_string());
        let rx = room.tx.subscribe();
        let initial = match room.authority.current_snapshot() {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to encode snapshot: {}", e);
                None
            }
        };
        (rx, initial)
    }

    /// Remove a user from a room, dropping their cursor.
    fn leave_room(&self, room_id: &str, user_id: &str) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(user_id);
            // Clean up empty rooms
            if room.peers.is_empty() {
                drop(room);
                self.rooms.remove_if(room_id, |_, room| room.peers.is_empty());
                return;
            }
            if room.authority.remove_user(user_id) {
                room.broadcast();
            }
        }
    }

    /// Apply an intent frame from a user and broadcast the result.
    fn handle_intent(&self, room_id: &str, user_id: &str, text: &str) {
        let intent = match decode_intent(text) {
            Ok(intent) => intent,
            Err(e) => {
                warn!("Invalid message from {}: {}", user_id, e);
                return;
            }
        };
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            match room.authority.apply(user_id, intent) {
                Ok(()) => room.broadcast(),
                Err(rejection) => warn!("Rejected intent from {}: {}", user_id, rejection),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canvas_sync_server=info,tower_http=info".into()),
        )
        .init();

    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/ws/{room}", get(room_ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = std::env::var(ADDR_ENV)
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    info!("Canvas sync authority listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Index page
async fn index() -> &'static str {
    "Canvas Sync Authority - Connect via WebSocket at /ws or /ws/{room}"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler for the default room
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, DEFAULT_ROOM.to_string()))
}

/// WebSocket upgrade handler for a named room
async fn room_ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, room_id: String) {
    let user_id = Uuid::new_v4().to_string();
    info!("New connection: {} in room {}", user_id, room_id);

    let (mut sender, mut receiver) = socket.split();
    let (mut room_rx, initial) = state.join_room(&room_id, &user_id);

    if let Some(json) = initial {
        if sender.send(Message::Text(json.into())).await.is_err() {
            state.leave_room(&room_id, &user_id);
            return;
        }
    }

    loop {
        tokio::select! {
            // Handle incoming intents from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.handle_intent(&room_id, &user_id, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore binary, ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", user_id, e);
                        break;
                    }
                }
            }

            // Forward room snapshots to the client
            msg = room_rx.recv() => {
                match msg {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Snapshots are complete; the next one catches the client up.
                        debug!("{} skipped {} snapshots", user_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    // Cleanup on disconnect
    state.leave_room(&room_id, &user_id);
    info!("Connection closed: {}", user_id);
}
