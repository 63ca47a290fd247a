// Live transport behaviour driven straight through the gateway, with the
// registry channels standing in for sockets.

mod common;

use common::{assert_quiet, expect_event, next_event, Harness};
use event_schema::{
    ClientEvent, MessageStatus, MessageType, ParticipantRole, PresenceStatus, SendMessageRequest,
    ServerEvent,
};
use realtime_chat_service::{models::Actor, websocket::ConnectionId};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

async fn connect_as(h: &Harness, actor: Actor) -> (ConnectionId, UnboundedReceiver<String>) {
    let (conn, mut rx) = h.state.gateway.connect().await;
    h.state
        .gateway
        .handle_event(
            conn,
            ClientEvent::Authenticate {
                token: h.token_for(actor),
            },
        )
        .await;
    match next_event(&mut rx).await {
        ServerEvent::Authenticated { actor_id, role } => {
            assert_eq!(actor_id, actor.user_id);
            assert_eq!(role, actor.role);
        }
        other => panic!("expected authenticated, got {other:?}"),
    }
    (conn, rx)
}

async fn join(h: &Harness, conn: ConnectionId, rx: &mut UnboundedReceiver<String>, conversation_id: Uuid) {
    h.state
        .gateway
        .handle_event(conn, ClientEvent::JoinThread { conversation_id })
        .await;
    let joined = expect_event(rx, |e| matches!(e, ServerEvent::ThreadJoined { .. })).await;
    assert_eq!(joined, ServerEvent::ThreadJoined { conversation_id });
}

fn send_request(conversation_id: Uuid, content: &str, request_id: Option<&str>) -> SendMessageRequest {
    SendMessageRequest {
        request_id: request_id.map(str::to_string),
        conversation_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        attachments: Vec::new(),
    }
}

#[tokio::test]
async fn events_before_authentication_are_refused() {
    let h = Harness::new();
    let (conn, mut rx) = h.state.gateway.connect().await;

    h.state
        .gateway
        .handle_event(
            conn,
            ClientEvent::JoinThread {
                conversation_id: Uuid::new_v4(),
            },
        )
        .await;
    assert!(matches!(next_event(&mut rx).await, ServerEvent::AuthError { .. }));

    h.state
        .gateway
        .handle_event(
            conn,
            ClientEvent::Authenticate {
                token: "not-a-jwt".into(),
            },
        )
        .await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::AuthError {
            reason: "unauthorized".into()
        }
    );
}

#[tokio::test]
async fn malformed_frames_get_an_error_event() {
    let h = Harness::new();
    let (conn, mut rx) = h.state.gateway.connect().await;
    h.state.gateway.handle_text(conn, "{\"event\":\"nope\"}").await;
    assert!(matches!(next_event(&mut rx).await, ServerEvent::Error { .. }));
}

#[tokio::test]
async fn outsider_cannot_join_a_thread() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let outsider = Actor::new(Uuid::new_v4(), ParticipantRole::Couple);
    let (conn, mut rx) = connect_as(&h, outsider).await;

    h.state
        .gateway
        .handle_event(conn, ClientEvent::JoinThread { conversation_id: conv.id })
        .await;
    assert_eq!(
        next_event(&mut rx).await,
        ServerEvent::ThreadJoinError {
            conversation_id: conv.id,
            reason: "not a participant".into(),
        }
    );
}

#[tokio::test]
async fn acknowledged_send_fans_out_to_the_thread() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (couple_conn, mut couple_rx) = connect_as(&h, h.couple).await;
    let (vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;
    join(&h, couple_conn, &mut couple_rx, conv.id).await;
    join(&h, vendor_conn, &mut vendor_rx, conv.id).await;

    h.state
        .gateway
        .handle_event(
            couple_conn,
            ClientEvent::SendMessage(send_request(conv.id, "Is the barn free in May?", Some("r-1"))),
        )
        .await;

    let ack = expect_event(&mut couple_rx, |e| matches!(e, ServerEvent::MessageAck(_))).await;
    let ServerEvent::MessageAck(ack) = ack else {
        unreachable!()
    };
    assert!(ack.ok);
    assert_eq!(ack.request_id.as_deref(), Some("r-1"));
    let stored = ack.message.expect("ack carries the message");

    // the vendor is in the thread room and in their personal room; one copy
    let received = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::MessageNew { .. })).await;
    assert_eq!(
        received,
        ServerEvent::MessageNew {
            message: stored.clone()
        }
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_quiet(&mut vendor_rx);
}

#[tokio::test]
async fn recipient_outside_the_room_still_gets_the_message() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (_vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;

    let ack = h
        .state
        .gateway
        .send_message(&h.couple, send_request(conv.id, "hello", None))
        .await;
    assert!(ack.ok);

    let received = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::MessageNew { .. })).await;
    let ServerEvent::MessageNew { message } = received else {
        unreachable!()
    };
    assert_eq!(message.content, "hello");
}

#[tokio::test]
async fn rejected_send_is_reported() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (conn, mut rx) = connect_as(&h, h.couple).await;

    h.state
        .gateway
        .handle_event(conn, ClientEvent::SendMessage(send_request(conv.id, "   ", Some("r-2"))))
        .await;
    let ack = expect_event(&mut rx, |e| matches!(e, ServerEvent::MessageAck(_))).await;
    let ServerEvent::MessageAck(ack) = ack else {
        unreachable!()
    };
    assert!(!ack.ok);
    assert!(ack.message.is_none());
    assert_eq!(ack.error.as_deref(), Some("message content is empty"));

    // fire-and-forget rejection arrives as an error event
    h.state
        .gateway
        .handle_event(conn, ClientEvent::SendMessage(send_request(conv.id, "", None)))
        .await;
    let err = expect_event(&mut rx, |e| matches!(e, ServerEvent::Error { .. })).await;
    assert_eq!(
        err,
        ServerEvent::Error {
            reason: "message content is empty".into()
        }
    );
}

#[tokio::test]
async fn typing_requires_membership_and_skips_the_typist() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (couple_conn, mut couple_rx) = connect_as(&h, h.couple).await;
    let (vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;

    h.state
        .gateway
        .handle_event(couple_conn, ClientEvent::TypingStart { conversation_id: conv.id })
        .await;
    assert!(matches!(next_event(&mut couple_rx).await, ServerEvent::Error { .. }));

    join(&h, couple_conn, &mut couple_rx, conv.id).await;
    join(&h, vendor_conn, &mut vendor_rx, conv.id).await;

    h.state
        .gateway
        .handle_event(couple_conn, ClientEvent::TypingStart { conversation_id: conv.id })
        .await;
    let typing = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::TypingIndicator { .. })).await;
    assert_eq!(
        typing,
        ServerEvent::TypingIndicator {
            conversation_id: conv.id,
            actor_id: h.couple.user_id,
            is_typing: true,
        }
    );

    h.state
        .gateway
        .handle_event(couple_conn, ClientEvent::TypingStop { conversation_id: conv.id })
        .await;
    let stopped = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::TypingIndicator { .. })).await;
    assert_eq!(
        stopped,
        ServerEvent::TypingIndicator {
            conversation_id: conv.id,
            actor_id: h.couple.user_id,
            is_typing: false,
        }
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    while let Ok(frame) = couple_rx.try_recv() {
        let event = ServerEvent::from_json(&frame).unwrap();
        assert!(!matches!(event, ServerEvent::TypingIndicator { .. }));
    }
}

#[tokio::test]
async fn typing_indicator_expires_on_its_own() {
    let mut config = common::test_config();
    config.typing_timeout = Duration::from_millis(50);
    let h = Harness::with_config(config);
    let conv = h.conversation().await;
    let (couple_conn, mut couple_rx) = connect_as(&h, h.couple).await;
    let (vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;
    join(&h, couple_conn, &mut couple_rx, conv.id).await;
    join(&h, vendor_conn, &mut vendor_rx, conv.id).await;

    h.state
        .gateway
        .handle_event(couple_conn, ClientEvent::TypingStart { conversation_id: conv.id })
        .await;
    let started = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::TypingIndicator { .. })).await;
    assert!(matches!(started, ServerEvent::TypingIndicator { is_typing: true, .. }));

    let expired = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::TypingIndicator { .. })).await;
    assert!(matches!(expired, ServerEvent::TypingIndicator { is_typing: false, .. }));
}

#[tokio::test]
async fn read_and_delivered_receipts_are_broadcast() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (couple_conn, mut couple_rx) = connect_as(&h, h.couple).await;
    let (vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;
    join(&h, couple_conn, &mut couple_rx, conv.id).await;
    join(&h, vendor_conn, &mut vendor_rx, conv.id).await;

    let ack = h
        .state
        .gateway
        .send_message(&h.couple, send_request(conv.id, "contract attached", Some("r")))
        .await;
    let message_id = ack.message.unwrap().id;

    h.state
        .gateway
        .handle_event(vendor_conn, ClientEvent::MessageDelivered { message_id })
        .await;
    let delivered =
        expect_event(&mut couple_rx, |e| matches!(e, ServerEvent::MessageStatusUpdate { .. })).await;
    assert_eq!(
        delivered,
        ServerEvent::MessageStatusUpdate {
            message_id,
            conversation_id: conv.id,
            status: MessageStatus::Delivered,
            actor_id: h.vendor.user_id,
        }
    );

    h.state
        .gateway
        .handle_event(vendor_conn, ClientEvent::MessageRead { message_id })
        .await;
    let read = expect_event(&mut couple_rx, |e| matches!(e, ServerEvent::MessageStatusUpdate { .. })).await;
    assert!(matches!(
        read,
        ServerEvent::MessageStatusUpdate {
            status: MessageStatus::Read,
            ..
        }
    ));

    // a repeat read is accepted silently
    h.state
        .gateway
        .handle_event(vendor_conn, ClientEvent::MessageRead { message_id })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    while let Ok(frame) = couple_rx.try_recv() {
        let event = ServerEvent::from_json(&frame).unwrap();
        assert!(!matches!(event, ServerEvent::MessageStatusUpdate { .. }));
    }
}

#[tokio::test]
async fn sync_request_returns_missed_messages() {
    let h = Harness::new();
    let conv = h.conversation().await;
    h.state
        .gateway
        .send_message(&h.vendor, send_request(conv.id, "missed one", None))
        .await;

    let (conn, mut rx) = connect_as(&h, h.couple).await;
    h.state
        .gateway
        .handle_event(
            conn,
            ClientEvent::SyncRequest {
                conversation_id: conv.id,
                since: None,
            },
        )
        .await;
    let synced = expect_event(&mut rx, |e| matches!(e, ServerEvent::SyncMessages { .. })).await;
    let ServerEvent::SyncMessages {
        conversation_id,
        messages,
    } = synced
    else {
        unreachable!()
    };
    assert_eq!(conversation_id, conv.id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "missed one");
}

#[tokio::test]
async fn presence_follows_the_last_connection() {
    let h = Harness::new();
    let conv = h.conversation().await;
    let (vendor_conn, mut vendor_rx) = connect_as(&h, h.vendor).await;
    join(&h, vendor_conn, &mut vendor_rx, conv.id).await;

    let (first, _first_rx) = connect_as(&h, h.couple).await;
    let online = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::UserStatusChange { .. })).await;
    assert!(matches!(
        online,
        ServerEvent::UserStatusChange {
            status: PresenceStatus::Online,
            ..
        }
    ));

    let (second, _second_rx) = connect_as(&h, h.couple).await;
    h.state.gateway.disconnect(first).await;
    assert_eq!(
        h.state.gateway.presence_of(h.couple.user_id).status,
        PresenceStatus::Online
    );

    h.state.gateway.disconnect(second).await;
    let offline = expect_event(&mut vendor_rx, |e| matches!(e, ServerEvent::UserStatusChange { .. })).await;
    let ServerEvent::UserStatusChange {
        actor_id,
        status,
        last_seen,
    } = offline
    else {
        unreachable!()
    };
    assert_eq!(actor_id, h.couple.user_id);
    assert_eq!(status, PresenceStatus::Offline);
    assert!(last_seen.is_some());
    assert_eq!(h.state.gateway.registry().connection_count().await, 1);
}
