use crate::{middleware::guards::bearer_token, state::AppState, websocket::WsSession};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Optional shortcut for `authenticate`; the handshake event works too.
    pub token: Option<String>,
}

/// GET /ws
///
/// The upgrade itself is anonymous. A token in the query string or the
/// `Authorization` header is applied as the first `authenticate` event.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let token = query
        .into_inner()
        .token
        .or_else(|| bearer_token(&req).map(str::to_string));

    let (conn, outbound) = state.gateway.connect().await;
    let session = WsSession::new(conn, outbound, state.gateway.clone(), token);
    let resp = ws::start(session, &req, stream);
    if resp.is_err() {
        // upgrade failed, the actor never started
        state.gateway.disconnect(conn).await;
    }
    resp
}
