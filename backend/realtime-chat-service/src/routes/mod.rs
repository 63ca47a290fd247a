pub mod conversations;
pub mod messages;
pub mod presence;
pub mod wsroute;

use actix_web::web;

pub const API_PREFIX: &str = "/api/v1";

async fn health() -> &'static str {
    "OK"
}

/// Register every route. Shared by the binary and the HTTP tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope(API_PREFIX)
            .service(conversations::create_conversation)
            .service(conversations::list_conversations)
            .service(conversations::archive_conversation)
            .service(conversations::list_messages)
            .service(conversations::send_message)
            .service(conversations::mark_conversation_read)
            .service(conversations::search_messages)
            .service(conversations::sync_messages)
            .service(messages::mark_read)
            .service(messages::delete_message)
            .service(presence::get_presence),
    )
    .service(wsroute::ws_handler)
    .route("/health", web::get().to(health));
}
