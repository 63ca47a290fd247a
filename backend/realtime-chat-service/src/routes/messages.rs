use crate::{error::AppError, middleware::guards::User, state::AppState};
use actix_web::{delete, post, web, HttpResponse};
use uuid::Uuid;

/// POST /messages/{id}/read
#[post("/messages/{id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    state
        .gateway
        .mark_read(user.actor(), message_id.into_inner())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /messages/{id}
/// Soft delete; only the sender may do this and repeating it is a no-op
#[delete("/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    user: User,
) -> Result<HttpResponse, AppError> {
    let deleted = state
        .service
        .delete_message(user.actor(), message_id.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "deleted": deleted })))
}
