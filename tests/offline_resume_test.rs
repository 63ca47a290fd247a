// Offline queueing, reconnect catch-up and persisted client state, against
// the real gateway.

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{collect, eventually, recv, GatewayTransport, Stack};
use wedlink::client::{ConnectionSession, OfflineSyncStore, SendOutcome};
use wedlink::protocol::MessageType;
use wedlink::server::{services::SendMessage, storage::MessageStore};

#[tokio::test]
async fn message_sent_offline_is_delivered_once_and_dequeued_on_ack() {
    let stack = Stack::new();
    let conv = stack.conversation().await;
    let (couple, transport) = stack.session(stack.couple, "couple-phone");
    transport.set_online(false);
    couple.connect();

    let queued = match couple
        .send_message(conv.id, "See you at the tasting", MessageType::Text)
        .await
        .unwrap()
    {
        SendOutcome::Queued(entry) => entry,
        other => panic!("expected the message to queue, got {other:?}"),
    };
    assert_eq!(couple.store().pending()[0].local_id, queued.local_id);

    transport.set_online(true);
    couple
        .wait_until_connected(Duration::from_secs(5))
        .await
        .unwrap();
    let client_store = couple.store().clone();
    eventually("queue drained", || client_store.pending_len() == 0).await;

    // Give a duplicate flush every chance to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (rows, total) = stack.store.list_messages(conv.id, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(rows.len(), 1);

    let page = stack
        .state
        .service
        .list_messages(&stack.vendor, conv.id, 10, 0)
        .await
        .unwrap();
    assert_eq!(page.messages[0].content, "See you at the tasting");

    couple.disconnect().await;
}

#[tokio::test]
async fn queued_messages_flush_in_the_order_they_were_written() {
    let stack = Stack::new();
    let conv = stack.conversation().await;
    let (couple, transport) = stack.session(stack.couple, "couple-phone");
    transport.set_online(false);

    for content in ["first", "second", "third"] {
        couple
            .send_message(conv.id, content, MessageType::Text)
            .await
            .unwrap();
    }
    assert_eq!(couple.store().pending_len(), 3);

    transport.set_online(true);
    couple.connect();
    let client_store = couple.store().clone();
    eventually("queue drained", || client_store.pending_len() == 0).await;

    let page = stack
        .state
        .service
        .list_messages(&stack.vendor, conv.id, 10, 0)
        .await
        .unwrap();
    let mut contents: Vec<_> = page
        .messages
        .iter()
        .map(|m| (m.created_at, m.content.clone()))
        .collect();
    contents.sort();
    let ordered: Vec<_> = contents.into_iter().map(|(_, c)| c).collect();
    assert_eq!(ordered, vec!["first", "second", "third"]);

    couple.disconnect().await;
}

#[tokio::test]
async fn reconnecting_session_catches_up_on_missed_messages() {
    let stack = Stack::new();
    let conv = stack.conversation().await;
    let (vendor, transport) = stack.session(stack.vendor, "vendor-laptop");
    let (_m, mut messages) = collect(&vendor.events().message);

    vendor.join_thread(conv.id).unwrap();
    vendor.connect();
    vendor
        .wait_until_connected(Duration::from_secs(5))
        .await
        .unwrap();
    stack.wait_for_room(conv.id, 1).await;

    let live = stack
        .state
        .service
        .send_message(&stack.couple, text(conv.id, "before the outage"))
        .await
        .unwrap();
    stack.state.gateway.broadcast_new_message(&live).await;
    assert_eq!(recv(&mut messages).await.id, live.message.id);

    transport.cut().await;
    eventually("session noticed the outage", || !vendor.is_connected()).await;

    let mut missed = Vec::new();
    for content in ["during the outage", "still out"] {
        let sent = stack
            .state
            .service
            .send_message(&stack.couple, text(conv.id, content))
            .await
            .unwrap();
        stack.state.gateway.broadcast_new_message(&sent).await;
        missed.push(sent.message.id);
    }

    transport.set_online(true);
    vendor
        .wait_until_connected(Duration::from_secs(5))
        .await
        .unwrap();

    let replayed = vec![recv(&mut messages).await.id, recv(&mut messages).await.id];
    assert_eq!(replayed, missed);
    // Nothing already seen comes back.
    assert!(tokio::time::timeout(Duration::from_millis(200), messages.recv())
        .await
        .is_err());
    assert_eq!(vendor.state().rooms, vec![conv.id]);
    assert_eq!(vendor.store().conversation(conv.id).unwrap().unread_count, 3);

    vendor.disconnect().await;
}

#[tokio::test]
async fn queue_written_before_a_restart_is_sent_by_the_next_session() {
    let stack = Stack::new();
    let conv = stack.conversation().await;
    let dir = tempfile::tempdir().unwrap();

    {
        let config = stack
            .session_config(stack.couple, "couple-phone")
            .with_state_dir(dir.path());
        let store = Arc::new(OfflineSyncStore::open(dir.path(), "couple-phone").unwrap());
        let transport = Arc::new(GatewayTransport::new(stack.state.gateway.clone()));
        transport.set_online(false);
        let session = ConnectionSession::new(config, transport, store);
        let outcome = session
            .send_message(conv.id, "written on the train", MessageType::Text)
            .await
            .unwrap();
        assert!(matches!(outcome, SendOutcome::Queued(_)));
    }

    let config = stack
        .session_config(stack.couple, "couple-phone")
        .with_state_dir(dir.path());
    let store = Arc::new(OfflineSyncStore::open(dir.path(), "couple-phone").unwrap());
    assert_eq!(store.pending_len(), 1);

    let transport = Arc::new(GatewayTransport::new(stack.state.gateway.clone()));
    let session = ConnectionSession::new(config, transport, store.clone());
    session.connect();
    eventually("restored queue drained", || store.pending_len() == 0).await;

    let (_, total) = stack.store.list_messages(conv.id, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert!(OfflineSyncStore::open(dir.path(), "couple-phone")
        .unwrap()
        .pending()
        .is_empty());

    session.disconnect().await;
}

#[tokio::test]
async fn rejected_queued_message_is_dropped_not_retried() {
    let stack = Stack::new();
    let conv = stack.conversation().await;
    let (couple, transport) = stack.session(stack.couple, "couple-phone");
    let (_e, mut errors) = collect(&couple.events().error);
    transport.set_online(false);

    couple
        .send_message(conv.id, "   ", MessageType::Text)
        .await
        .unwrap();
    transport.set_online(true);
    couple.connect();

    let client_store = couple.store().clone();
    eventually("rejected message removed", || client_store.pending_len() == 0).await;
    loop {
        if let wedlink::client::ClientError::Rejected(_) = recv(&mut errors).await {
            break;
        }
    }
    let (_, total) = stack.store.list_messages(conv.id, 10, 0).await.unwrap();
    assert_eq!(total, 0);

    couple.disconnect().await;
}

fn text(conversation_id: uuid::Uuid, content: &str) -> SendMessage {
    SendMessage {
        conversation_id,
        content: content.to_string(),
        message_type: MessageType::Text,
        attachments: Vec::new(),
    }
}
