//! HTTP API: health, history pages, unread counters, the offline sync pull,
//! and roster maintenance for the group collaborator.
//!
//! Identity comes from the `X-User-Id` header; the upstream session provider
//! is trusted to have authenticated it, mirroring the websocket hello.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_shared::protocol::{HistoryPageEvent, HistoryRequest};
use parley_shared::{
    Conversation, GroupId, Message, MessageId, MessageStatus, ReadReceipt, UserId,
};

use crate::error::ServerError;
use crate::history;
use crate::lifecycle::not_found_message;
use crate::state::CoreState;

pub fn build_router(state: CoreState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/history/private/:peer", get(history_private))
        .route("/history/group/:group", get(history_group))
        .route("/unread", get(unread))
        .route("/messages/:id/read-status", get(read_status))
        .route("/sync", get(sync_since))
        .route("/groups/:group/members/:user", post(add_member))
        .route("/groups/:group/members/:user", delete(remove_member))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
    online_users: usize,
}

#[derive(Deserialize)]
struct PageParams {
    page_token: Option<String>,
    page_size: Option<u32>,
}

#[derive(Deserialize)]
struct UnreadParams {
    peer: Option<Uuid>,
    group: Option<Uuid>,
}

#[derive(Deserialize)]
struct SyncParams {
    /// RFC-3339 watermark of the last message the client has seen.
    since: String,
}

#[derive(Serialize)]
struct UnreadResponse {
    count: u64,
}

#[derive(Serialize)]
struct SyncResponse {
    messages: Vec<Message>,
}

#[derive(Serialize, Debug)]
struct ReadStatusResponse {
    message_id: MessageId,
    status: MessageStatus,
    /// Per-member receipts; empty for private messages, whose read state is
    /// the row status itself.
    read_by: Vec<ReadReceipt>,
}

async fn health_check(State(state): State<CoreState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.connection_count(),
        online_users: state.registry.online_user_count(),
    })
}

async fn history_private(
    State(state): State<CoreState>,
    Path(peer): Path<Uuid>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<HistoryPageEvent>, ServerError> {
    let viewer = user_from_headers(&headers)?;
    let page = history::history_page(
        &state,
        viewer,
        HistoryRequest {
            conversation: Conversation::Private { peer: UserId(peer) },
            page_token: params.page_token,
            page_size: params.page_size,
        },
    )
    .await?;
    Ok(Json(page))
}

async fn history_group(
    State(state): State<CoreState>,
    Path(group): Path<Uuid>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<HistoryPageEvent>, ServerError> {
    let viewer = user_from_headers(&headers)?;
    let page = history::history_page(
        &state,
        viewer,
        HistoryRequest {
            conversation: Conversation::Group { group: GroupId(group) },
            page_token: params.page_token,
            page_size: params.page_size,
        },
    )
    .await?;
    Ok(Json(page))
}

async fn unread(
    State(state): State<CoreState>,
    Query(params): Query<UnreadParams>,
    headers: HeaderMap,
) -> Result<Json<UnreadResponse>, ServerError> {
    let user = user_from_headers(&headers)?;
    let conversation = match (params.peer, params.group) {
        (Some(_), Some(_)) => {
            return Err(ServerError::Validation(
                "peer and group are mutually exclusive".into(),
            ));
        }
        (Some(peer), None) => Some(Conversation::Private { peer: UserId(peer) }),
        (None, Some(group)) => Some(Conversation::Group { group: GroupId(group) }),
        (None, None) => None,
    };

    let count = history::unread_count(&state, user, conversation).await?;
    Ok(Json(UnreadResponse { count }))
}

/// Read status of one message, visible to conversation participants only.
async fn read_status(
    State(state): State<CoreState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ReadStatusResponse>, ServerError> {
    let viewer = user_from_headers(&headers)?;
    let db = state.db.lock().await;
    let message = db.message_by_id(MessageId(id)).map_err(not_found_message)?;

    let allowed = match message.conversation {
        Conversation::Private { peer } => viewer == message.sender || viewer == peer,
        Conversation::Group { group } => db.is_group_member(group, viewer)?,
    };
    if !allowed {
        return Err(ServerError::PolicyViolation(
            "user is not part of this conversation".into(),
        ));
    }

    let read_by = match message.conversation {
        Conversation::Private { .. } => Vec::new(),
        Conversation::Group { .. } => db.receipts_for_message(message.id)?,
    };

    Ok(Json(ReadStatusResponse {
        message_id: message.id,
        status: message.status,
        read_by,
    }))
}

/// Offline pull: everything addressed to the caller since the watermark.
/// Recalled rows are included as markers so the client can drop its copies,
/// but their content is scrubbed.
async fn sync_since(
    State(state): State<CoreState>,
    Query(params): Query<SyncParams>,
    headers: HeaderMap,
) -> Result<Json<SyncResponse>, ServerError> {
    let user = user_from_headers(&headers)?;
    let since = DateTime::parse_from_rfc3339(&params.since)
        .map_err(|_| ServerError::Validation("since must be an RFC-3339 timestamp".into()))?
        .with_timezone(&Utc);

    let db = state.db.lock().await;
    let messages = db
        .messages_after(user, since)?
        .into_iter()
        .map(Message::scrub_if_recalled)
        .collect();

    Ok(Json(SyncResponse { messages }))
}

async fn add_member(
    State(state): State<CoreState>,
    Path((group, user)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServerError> {
    let db = state.db.lock().await;
    let created = db.add_group_member(GroupId(group), UserId(user), Utc::now())?;
    info!(group = %group, user = %user, created, "Roster member added");
    Ok(if created { StatusCode::CREATED } else { StatusCode::OK })
}

async fn remove_member(
    State(state): State<CoreState>,
    Path((group, user)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ServerError> {
    let db = state.db.lock().await;
    if db.remove_group_member(GroupId(group), UserId(user))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::NotFound("membership"))
    }
}

fn user_from_headers(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::Validation("missing X-User-Id header".into()))?;
    let id = Uuid::parse_str(raw)
        .map_err(|_| ServerError::Validation("X-User-Id must be a UUID".into()))?;
    Ok(UserId(id))
}

pub async fn serve(state: CoreState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
