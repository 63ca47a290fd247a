use crate::{error::AppError, middleware::guards::User, state::AppState};
use actix_web::{get, web, HttpResponse};
use uuid::Uuid;

/// GET /presence/{user_id}
#[get("/presence/{user_id}")]
pub async fn get_presence(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
    _user: User,
) -> Result<HttpResponse, AppError> {
    Ok(HttpResponse::Ok().json(state.gateway.presence_of(user_id.into_inner())))
}
