mod common;

use actix_web::{http::StatusCode, test, web, App};
use common::Harness;
use error_types::ErrorResponse;
use event_schema::MessagePayload;
use realtime_chat_service::{models::Conversation, routes};
use serde_json::json;

macro_rules! app {
    ($h:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($h.state.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn health_is_public() {
    let h = Harness::new();
    let app = app!(h);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn api_requires_a_bearer_token() {
    let h = Harness::new();
    let app = app!(h);
    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/v1/conversations").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn create_send_list_round_trip() {
    let h = Harness::new();
    let app = app!(h);
    let couple = format!("Bearer {}", h.token_for(h.couple));
    let vendor = format!("Bearer {}", h.token_for(h.vendor));

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations")
        .insert_header(("Authorization", couple.as_str()))
        .set_json(json!({ "counterpart_id": h.vendor.user_id }))
        .to_request();
    let conv: Conversation = test::call_and_read_body_json(&app, req).await;
    assert_eq!(conv.couple_id, h.couple.user_id);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/messages", conv.id))
        .insert_header(("Authorization", couple.as_str()))
        .set_json(json!({ "content": "Do you cover travel?" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: MessagePayload = test::read_body_json(resp).await;

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/messages?limit=10", conv.id))
        .insert_header(("Authorization", vendor.as_str()))
        .to_request();
    let page: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["messages"][0]["content"], "Do you cover travel?");

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/messages/{}/read", sent.id))
        .insert_header(("Authorization", vendor.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}

#[actix_rt::test]
async fn denials_use_the_shared_error_body() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let sent = h
        .state
        .service
        .send_message(
            &h.couple,
            realtime_chat_service::services::SendMessage {
                conversation_id: conv.id,
                content: "mine".into(),
                message_type: Default::default(),
                attachments: Vec::new(),
            },
        )
        .await
        .unwrap();
    let app = app!(h);
    let vendor = format!("Bearer {}", h.token_for(h.vendor));

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/messages/{}", sent.message.id))
        .insert_header(("Authorization", vendor.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.message, "not the message sender");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/search?q=", conv.id))
        .insert_header(("Authorization", vendor.as_str()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
