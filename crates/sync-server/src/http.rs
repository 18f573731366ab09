//! The HTTP dashboard/init surface and the `/sync` + `/ui` websocket
//! upgrade routes, all mounted on one axum router. HTTP endpoints are
//! specified only by their request/response contract; nothing here is
//! part of the wire protocol core.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use sync_core::wire::Message;
use sync_transport::server::source_addr;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatch::{handle_connection, ServerContext};
use crate::hub::HubPush;

/// Process start time, used to compute `GET /health`'s `uptime` field.
struct StartedAt(std::time::Instant);

#[derive(Clone)]
struct AppState {
    ctx: Arc<ServerContext>,
    started_at: Arc<StartedAt>,
}

/// Build the full router: `/sync`, `/ui`, and the HTTP dashboard/init
/// surface, wrapped in request tracing and permissive CORS (the
/// dashboard is typically served from a different origin/port).
#[must_use]
pub fn router(ctx: Arc<ServerContext>) -> Router {
    let state = AppState { ctx, started_at: Arc::new(StartedAt(std::time::Instant::now())) };
    Router::new()
        .route("/sync", get(sync_upgrade))
        .route("/ui", get(ui_upgrade))
        .route("/health", get(health))
        .route("/api/init", post(init))
        .route("/api/ui-auth", post(ui_auth))
        .route("/api/stats", get(stats))
        .route("/api/clients", get(clients))
        .route("/api/sessions", get(sessions))
        .route("/api/reset", post(reset))
        .route("/api/sessions/:id/revoke", post(revoke_session))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn sync_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let ip = source_addr(&headers, peer);
    ws.max_message_size(sync_core::wire::MAX_FRAME_BYTES).on_upgrade(move |socket| async move {
        let socket = sync_transport::server::ServerSocket::new(socket);
        handle_connection(socket, ip, state.ctx).await;
    })
}

/// The dashboard's read-only websocket: it never sends `AUTH` and never
/// reaches [`handle_connection`]'s core dispatch. It registers under a
/// synthetic client ID purely to receive `CLIENT_LIST` broadcasts.
async fn ui_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let mut socket = sync_transport::server::ServerSocket::new(socket);
        let synthetic_id = format!("ui-{}", sync_core::crypto::new_session_token());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.ctx.hub.register(synthetic_id.clone(), tx.clone());
        if let Ok(sessions) = state.ctx.store.list_client_sessions() {
            let clients = state.ctx.hub.client_list(&sessions);
            let _ = socket.send_text(&Message::ClientList { clients }).await;
        }
        loop {
            tokio::select! {
                push = rx.recv() => {
                    match push {
                        Some(HubPush::Send(msg)) => {
                            if socket.send_text(&msg).await.is_err() {
                                break;
                            }
                        }
                        Some(HubPush::Kick | HubPush::Reset) | None => break,
                    }
                }
                frame = socket.recv() => {
                    if frame.is_none() {
                        break;
                    }
                }
            }
        }
        state.ctx.hub.unregister(&synthetic_id, &tx);
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthBody {
    status: &'static str,
    uptime: u64,
    initialized: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let initialized = state.ctx.store.get_meta(change_log::meta_key::PASSWORD_HASH).ok().flatten().is_some();
    Json(HealthBody { status: "ok", uptime: state.started_at.0.elapsed().as_secs(), initialized })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordHashBody {
    password_hash: String,
}

async fn init(State(state): State<AppState>, Json(body): Json<PasswordHashBody>) -> impl IntoResponse {
    let auth = auth::Auth::new(&state.ctx.store);
    match auth.initialize(&body.password_hash) {
        Ok(()) => {
            if state.ctx.store.get_meta(change_log::meta_key::VAULT_SALT).ok().flatten().is_none() {
                let salt = sync_core::crypto::new_vault_salt();
                let _ = state.ctx.store.set_meta(change_log::meta_key::VAULT_SALT, &salt);
            }
            StatusCode::OK.into_response()
        }
        Err(auth::AuthError::AlreadyInitialized) => StatusCode::CONFLICT.into_response(),
        Err(auth::AuthError::InvalidHashFormat) => StatusCode::BAD_REQUEST.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn ui_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(body): Json<PasswordHashBody>,
) -> impl IntoResponse {
    let auth = auth::Auth::new(&state.ctx.store);
    let now = sync_core::ids::now_ms();
    match auth.verify_password(&body.password_hash, peer.ip(), now) {
        Ok(()) => StatusCode::OK,
        Err(auth::AuthError::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        Err(_) => StatusCode::UNAUTHORIZED,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsBody {
    current_sequence: u64,
    online_clients: usize,
    files_uploaded: u64,
    files_downloaded: u64,
    files_deleted: u64,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
    download_failures: u64,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.ctx.metrics.snapshot();
    Json(StatsBody {
        current_sequence: state.ctx.store.get_current_sequence().unwrap_or(0),
        online_clients: state.ctx.hub.online_count(),
        files_uploaded: snapshot.files_uploaded,
        files_downloaded: snapshot.files_downloaded,
        files_deleted: snapshot.files_deleted,
        bytes_uploaded: snapshot.bytes_uploaded,
        bytes_downloaded: snapshot.bytes_downloaded,
        download_failures: snapshot.download_failures,
    })
}

async fn clients(State(state): State<AppState>) -> impl IntoResponse {
    match state.ctx.store.list_client_sessions() {
        Ok(sessions) => Json(state.ctx.hub.client_list(&sessions)).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.ctx.store.list_client_sessions() {
        Ok(sessions) => Json(state.ctx.hub.client_list(&sessions)).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn reset(State(state): State<AppState>) -> impl IntoResponse {
    match state.ctx.store.reset() {
        Ok(()) => {
            state.ctx.hub.reset_all();
            StatusCode::OK
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn revoke_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let auth = auth::Auth::new(&state.ctx.store);
    match auth.revoke_by_client_id(&id) {
        Ok(()) => {
            state.ctx.hub.push_to(&id, HubPush::Kick);
            StatusCode::OK
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
