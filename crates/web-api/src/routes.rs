use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use application::{PageRequest, PaginatedMessages};
use domain::{RoomId, ThreadId, UserId};

use crate::{
    auth::bearer_token,
    error::ApiError,
    state::AppState,
    ws_connection::{split_socket, WebSocketConnection},
};

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// 分页参数按字符串接收，无法解析的值回落到默认值
#[derive(Debug, Deserialize)]
struct HistoryQuery {
    page: Option<String>,
    page_size: Option<String>,
}

fn lenient_u32(value: Option<&str>) -> Option<u32> {
    value.and_then(|value| value.trim().parse::<u32>().ok())
}

impl From<HistoryQuery> for PageRequest {
    fn from(query: HistoryQuery) -> Self {
        Self {
            page: lenient_u32(query.page.as_deref()),
            page_size: lenient_u32(query.page_size.as_deref()),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    message: &'static str,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/rooms/{room_id}/messages", get(room_history))
        .route("/threads/{thread_id}/messages", get(thread_history))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(origin = %origin, error = %err, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { message: "OK" })
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.session_validator.resolve(token).await?)
}

async fn room_history(
    State(state): State<AppState>,
    Path(room_id): Path<RoomId>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<PaginatedMessages>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    tracing::debug!(user_id = %user_id, room_id = %room_id, "room history requested");

    let page = state.history.room_history(&room_id, query.into()).await?;
    Ok(Json(page))
}

async fn thread_history(
    State(state): State<AppState>,
    Path(thread_id): Path<ThreadId>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<PaginatedMessages>, ApiError> {
    let user_id = authenticate(&state, &headers).await?;
    tracing::debug!(user_id = %user_id, thread_id = %thread_id, "thread history requested");

    let page = state.history.thread_history(&thread_id, query.into()).await?;
    Ok(Json(page))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.origin_allowed(origin) {
        tracing::warn!(origin = ?origin, "WebSocket upgrade from disallowed origin");
        return Err(ApiError::forbidden("Origin not allowed"));
    }

    let token = query
        .token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Token is required as query parameter"))?;

    let user_id = state
        .session_validator
        .resolve(&token)
        .await
        .map_err(|err| {
            tracing::debug!(error = %err, "WebSocket credential rejected");
            ApiError::unauthorized("Invalid or expired token")
        })?;

    let settings = state.connection_settings;
    Ok(ws
        .max_message_size(settings.max_message_size)
        .on_upgrade(move |socket| async move {
            let (reader, writer) = split_socket(socket);
            WebSocketConnection::new(
                user_id,
                reader,
                writer,
                state.hub.clone(),
                state.router.clone(),
                settings,
            )
            .run()
            .await;
        }))
}
