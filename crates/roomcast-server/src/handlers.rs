//! HTTP and WebSocket handlers for the Roomcast server.
//!
//! Every websocket request is admitted before the upgrade. HTTP sends persist
//! first and only then ask the hub to fan out.

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::store::MemoryStore;
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, Path, Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use roomcast_core::{
    AdmissionController, AdmissionError, AdmittedIdentity, Hub, HubConfig, HubHandle, HubStats,
    InMemoryPresence, MessageStore, PresenceGateway, PresenceNotifier, StoredGroupMessage,
    StoredPrivateMessage,
};
use roomcast_protocol::{RoomId, UserId};
use roomcast_transport::{websocket, ConnectionAdapter};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 100;

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Handle to the hub event loop.
    pub hub: HubHandle,
    /// Admission checks for websocket requests.
    pub admission: AdmissionController,
    /// Directory and message storage.
    pub store: Arc<MemoryStore>,
    /// Presence hints.
    pub presence: Arc<InMemoryPresence>,
}

impl AppState {
    /// Create the state and start the hub and presence worker.
    #[must_use]
    pub fn new(config: Config) -> (Arc<Self>, JoinHandle<()>) {
        let store = Arc::new(MemoryStore::from_config(&config.directory));
        let presence = Arc::new(InMemoryPresence::new(Duration::from_secs(
            config.presence.online_ttl_secs,
        )));

        let (notifier, _presence_worker) = PresenceNotifier::spawn(presence.clone());
        let (hub, hub_task) = Hub::spawn(
            HubConfig {
                inbound_capacity: config.hub.inbound_capacity,
            },
            notifier,
        );

        let state = Arc::new(Self {
            admission: AdmissionController::new(store.clone()),
            config,
            hub,
            store,
            presence,
        });

        (state, hub_task)
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/group-messages/send", post(send_group_message))
        .route("/api/private-messages/send", post(send_private_message))
        .route("/api/private-messages/with/:user_id", get(private_history))
        .route("/api/rooms/:room_id/messages", get(group_history))
        .route("/api/rooms/:room_id/online", get(room_online))
        .route("/api/users/:user_id/online", get(user_online))
        .route("/api/hub/stats", get(hub_stats))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let (state, hub_task) = AppState::new(config.clone());

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let background = spawn_maintenance(&state);
    let app = router(state.clone());

    let listener = TcpListener::bind(addr).await?;

    info!("Roomcast server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for task in background {
        task.abort();
    }
    state.hub.shutdown();
    hub_task.await?;
    info!("Roomcast server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Periodic hub gauge refresh and presence pruning.
fn spawn_maintenance(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
    let stats_every = Duration::from_secs(state.config.hub.stats_interval_secs.max(1));
    let hub = state.hub.clone();
    let stats_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_every);
        loop {
            interval.tick().await;
            match hub.stats().await {
                Ok(stats) => metrics::set_hub_stats(&stats),
                Err(_) => break,
            }
        }
    });

    let prune_every = Duration::from_secs(state.config.presence.prune_interval_secs.max(1));
    let presence = state.presence.clone();
    let prune_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        loop {
            interval.tick().await;
            let pruned = presence.prune_expired();
            if !pruned.is_empty() {
                debug!(count = pruned.len(), "Pruned expired presence");
                metrics::record_presence_pruned(pruned.len());
            }
        }
    });

    vec![stats_task, prune_task]
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    user_id: UserId,
    room_id: Option<RoomId>,
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let identity = state
        .admission
        .admit(params.user_id, params.room_id)
        .await
        .map_err(|e| {
            metrics::record_admission_rejected(rejection_reason(&e));
            warn!(user = %params.user_id, error = %e, "Connection rejected");
            ApiError::from(e)
        })?;

    let max_message_size = state.config.transport.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, identity, state))
        .into_response())
}

fn rejection_reason(err: &AdmissionError) -> &'static str {
    match err {
        AdmissionError::UnknownUser(_) => "unknown_user",
        AdmissionError::UnknownRoom(_) => "unknown_room",
        AdmissionError::NotAMember { .. } => "not_a_member",
        AdmissionError::Directory(_) => "directory",
    }
}

/// Drive an admitted WebSocket until it closes.
async fn handle_websocket(socket: WebSocket, identity: AdmittedIdentity, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let user_id = identity.user_id;

    let (reader, writer) = websocket::split(socket, state.config.transport.max_message_size);
    let adapter = match ConnectionAdapter::attach(identity, reader, writer, state.hub.clone()) {
        Ok(adapter) => adapter,
        Err(e) => {
            warn!(user = %user_id, error = %e, "Could not register connection");
            return;
        }
    };

    debug!(connection = %adapter.id(), user = %user_id, "WebSocket connected");
    let summary = adapter.run().await;
    metrics::record_frames(summary);
    debug!(user = %user_id, "WebSocket disconnected");
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendGroupMessage {
    chat_room_id: RoomId,
    user_id: UserId,
    content: String,
}

/// Persist a room message, then broadcast it to the room.
async fn send_group_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendGroupMessage>,
) -> ApiResult<Json<Value>> {
    let message = state
        .store
        .persist_group_message(req.chat_room_id, req.user_id, &req.content)
        .await?;

    let payload = encode(&json!({
        "type": "group_message",
        "message": message,
    }))?;
    state.hub.broadcast_to_room(req.chat_room_id, payload)?;
    metrics::record_fanout("group");

    Ok(Json(json!({
        "message": "group message sent",
        "data": message,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendPrivateMessage {
    sender_id: UserId,
    receiver_id: UserId,
    content: String,
}

/// Persist a direct message, then push it to the receiver if online.
async fn send_private_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendPrivateMessage>,
) -> ApiResult<Json<Value>> {
    let message = state
        .store
        .persist_private_message(req.sender_id, req.receiver_id, &req.content)
        .await?;

    let payload = encode(&json!({
        "type": "private_message",
        "content": message.content,
        "createdAt": message.created_at,
        "senderId": message.sender_id,
    }))?;
    state.hub.send_to_user(req.receiver_id, payload)?;
    metrics::record_fanout("private");

    Ok(Json(json!({
        "message": "private message sent",
        "createdAt": message.created_at,
    })))
}

fn encode(value: &Value) -> ApiResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ApiError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

impl HistoryParams {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT)
    }
}

/// Recent messages of a room.
async fn group_history(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<StoredGroupMessage>>> {
    if state.store.room_name(room_id).is_none() {
        return Err(ApiError::NotFound(format!("room {room_id}")));
    }
    Ok(Json(state.store.recent_group_messages(room_id, params.limit())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationParams {
    user_id: UserId,
    limit: Option<usize>,
}

/// Recent messages between the requesting user and another user.
async fn private_history(
    State(state): State<Arc<AppState>>,
    Path(other_id): Path<UserId>,
    Query(params): Query<ConversationParams>,
) -> ApiResult<Json<Vec<StoredPrivateMessage>>> {
    let limit = HistoryParams {
        limit: params.limit,
    }
    .limit();
    Ok(Json(state.store.recent_private_messages(
        params.user_id,
        other_id,
        limit,
    )))
}

/// Whether a user is online.
async fn user_online(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Json<Value>> {
    let online = state.presence.is_online(user_id).await?;
    Ok(Json(json!({ "userId": user_id, "online": online })))
}

/// Users present in a room.
async fn room_online(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
) -> ApiResult<Json<Value>> {
    let name = state
        .store
        .room_name(room_id)
        .ok_or_else(|| ApiError::NotFound(format!("room {room_id}")))?;
    let users = state.presence.room_users(room_id).await?;
    Ok(Json(json!({
        "roomId": room_id,
        "name": name,
        "users": users,
        "count": users.len(),
    })))
}

/// Hub counters.
async fn hub_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<HubStats>> {
    Ok(Json(state.hub.stats().await?))
}
