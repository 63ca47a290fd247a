use crate::{
    error::AppError,
    middleware::guards::User,
    services::SendMessage,
    state::AppState,
};
use actix_web::{get, post, web, HttpResponse};
use chrono::{DateTime, Utc};
use event_schema::{AttachmentUpload, MessageType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    /// The other side: a vendor id when a couple calls, a couple id when a
    /// vendor calls.
    pub counterpart_id: Uuid,
    #[serde(default)]
    pub lead_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SyncQuery {
    pub since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

#[derive(Serialize)]
struct MarkedRead {
    conversation_id: Uuid,
    marked: Vec<Uuid>,
}

const DEFAULT_PAGE: i64 = 50;
const DEFAULT_SEARCH_LIMIT: usize = 20;

/// POST /conversations
/// Start (or return the existing) conversation with a counterpart
#[post("/conversations")]
pub async fn create_conversation(
    state: web::Data<AppState>,
    user: User,
    body: web::Json<CreateConversationRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let conversation = state
        .service
        .create_conversation(user.actor(), body.counterpart_id, body.lead_id)
        .await?;
    Ok(HttpResponse::Ok().json(conversation))
}

/// GET /conversations
#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let summaries = state.service.list_conversations(user.actor()).await?;
    Ok(HttpResponse::Ok().json(summaries))
}

/// POST /conversations/{id}/archive
#[post("/conversations/{id}/archive")]
pub async fn archive_conversation(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let archived = state
        .service
        .archive_conversation(user.actor(), conversation_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "archived": archived })))
}

/// GET /conversations/{id}/messages?limit&offset
#[get("/conversations/{id}/messages")]
pub async fn list_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, AppError> {
    let page = state
        .service
        .list_messages(
            user.actor(),
            conversation_id.into_inner(),
            query.limit.unwrap_or(DEFAULT_PAGE),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// POST /conversations/{id}/messages
/// Store and fan out a message; live subscribers see it as `message:new`
#[post("/conversations/{id}/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    body: web::Json<PostMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let request = SendMessage {
        conversation_id: conversation_id.into_inner(),
        content: body.content,
        message_type: body.message_type,
        attachments: body.attachments,
    };
    let sent = state.service.send_message(user.actor(), request).await?;
    state.gateway.broadcast_new_message(&sent).await;
    Ok(HttpResponse::Created().json(sent.message))
}

/// POST /conversations/{id}/read
#[post("/conversations/{id}/read")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let conversation_id = conversation_id.into_inner();
    let marked = state
        .gateway
        .mark_conversation_read(user.actor(), conversation_id)
        .await?;
    Ok(HttpResponse::Ok().json(MarkedRead {
        conversation_id,
        marked,
    }))
}

/// GET /conversations/{id}/search?q&limit
#[get("/conversations/{id}/search")]
pub async fn search_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let hits = state
        .service
        .search_messages(
            user.actor(),
            conversation_id.into_inner(),
            &query.q,
            query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
        )
        .await?;
    Ok(HttpResponse::Ok().json(hits))
}

/// GET /conversations/{id}/sync?since
/// Catch-up for clients that were offline; omitting `since` returns everything
#[get("/conversations/{id}/sync")]
pub async fn sync_messages(
    state: web::Data<AppState>,
    conversation_id: web::Path<Uuid>,
    user: User,
    query: web::Query<SyncQuery>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .service
        .sync_since(
            user.actor(),
            conversation_id.into_inner(),
            query.since.unwrap_or_default(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(messages))
}
