use warelay::binary::node::Node;
use warelay::binary::NodeBuilder;
use warelay::proto;
use warelay::send::pad_message_v2;
use warelay::store::namespace;
use warelay::testutil::{EventCollector, TestHarness};
use warelay::types::events::Event;
use prost::Message as ProtoMessage;

/// Builds an inbound `message` stanza whose single `enc` child carries
/// the padded plaintext (the mock repository decrypts to identity).
fn inbound_message(from: &str, id: &str, notify: Option<&str>, message: &proto::Message) -> Node {
    let mut builder = NodeBuilder::new("message")
        .attr("from", from)
        .attr("id", id)
        .attr("t", "1700000000");
    if let Some(name) = notify {
        builder = builder.attr("notify", name);
    }
    builder
        .children([NodeBuilder::new("enc")
            .attr("v", "2")
            .attr("type", "msg")
            .bytes(pad_message_v2(message.encode_to_vec()))
            .build()])
        .build()
}

fn key_share_message(key_id: &[u8], key_data: &[u8]) -> proto::Message {
    proto::Message {
        protocol_message: Some(proto::message::ProtocolMessage {
            r#type: Some(proto::message::protocol_message::Type::AppStateSyncKeyShare as i32),
            app_state_sync_key_share: Some(proto::AppStateSyncKeyShare {
                keys: vec![proto::AppStateSyncKey {
                    key_id: Some(proto::AppStateSyncKeyId {
                        key_id: Some(key_id.to_vec()),
                    }),
                    key_data: Some(proto::AppStateSyncKeyData {
                        key_data: Some(key_data.to_vec()),
                        fingerprint: None,
                        timestamp: Some(1_700_000_000),
                    }),
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn history_notification_message() -> proto::Message {
    proto::Message {
        protocol_message: Some(proto::message::ProtocolMessage {
            r#type: Some(
                proto::message::protocol_message::Type::HistorySyncNotification as i32,
            ),
            history_sync_notification: Some(proto::HistorySyncNotification {
                file_length: Some(1024),
                sync_type: Some(
                    proto::history_sync_notification::HistorySyncType::InitialBootstrap as i32,
                ),
                chunk_order: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Answers one pending app-state sync IQ with empty collections.
async fn answer_sync_query(harness: &mut TestHarness) {
    let mut iq = None;
    for _ in 0..200 {
        if let Some(found) = harness.sent_stanzas().await.into_iter().find(|n| {
            n.tag == "iq" && n.attrs.get("xmlns").map(String::as_str) == Some("w:sync:app:state")
        }) {
            iq = Some(found);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let iq = iq.expect("app state sync iq");
    let req_id = iq.attrs.get("id").unwrap().clone();

    let collections: Vec<Node> = iq
        .get_optional_child("sync")
        .map(|sync| {
            sync.get_children_by_tag("collection")
                .iter()
                .map(|c| {
                    NodeBuilder::new("collection")
                        .attr("name", c.attrs.get("name").unwrap().clone())
                        .attr("has_more_patches", "false")
                        .build()
                })
                .collect()
        })
        .unwrap_or_default();

    harness
        .inject(
            NodeBuilder::new("iq")
                .attr("id", req_id)
                .attr("type", "result")
                .children([NodeBuilder::new("sync").children(collections).build()])
                .build(),
        )
        .await;
}

#[tokio::test]
async fn upsert_emits_message_and_push_name_updates() {
    let mut harness = TestHarness::new().await;
    let collector = EventCollector::install(&harness.client);

    let message = proto::Message {
        conversation: Some("hello there".into()),
        ..Default::default()
    };
    harness
        .inject(inbound_message(
            "888@s.whatsapp.net",
            "3EB0AAAA01",
            Some("Some Person"),
            &message,
        ))
        .await;
    harness.settle().await;

    let events = collector.snapshot();
    let upsert = events
        .iter()
        .find_map(|e| match e {
            Event::MessagesUpsert(u) => Some(u.clone()),
            _ => None,
        })
        .expect("messages.upsert");
    assert_eq!(upsert.messages.len(), 1);
    assert_eq!(upsert.messages[0].key.id, "3EB0AAAA01");
    assert_eq!(
        upsert.messages[0]
            .message
            .as_ref()
            .unwrap()
            .conversation
            .as_deref(),
        Some("hello there")
    );

    let contact = events
        .iter()
        .find_map(|e| match e {
            Event::ContactsUpdate(c) => Some(c.clone()),
            _ => None,
        })
        .expect("contacts.update from push name");
    assert_eq!(contact.push_name.as_deref(), Some("Some Person"));
    assert_eq!(contact.id.user, "888");

    // The stanza is acked.
    let sent = harness.wait_for_stanzas().await;
    let ack = sent.iter().find(|n| n.tag == "ack").expect("ack sent");
    assert_eq!(ack.attrs.get("class").map(String::as_str), Some("message"));
    assert_eq!(ack.attrs.get("id").map(String::as_str), Some("3EB0AAAA01"));
}

#[tokio::test]
async fn key_share_stores_keys_and_updates_creds() {
    let mut harness = TestHarness::new().await;
    let collector = EventCollector::install(&harness.client);

    harness
        .inject(inbound_message(
            "5550001111@s.whatsapp.net",
            "3EB0KEY001",
            None,
            &key_share_message(&[0, 9], &[3u8; 32]),
        ))
        .await;
    harness.settle().await;

    let creds = harness.client.creds_snapshot().await;
    assert_eq!(creds.my_app_state_key_id, Some(vec![0, 9]));

    let tx = harness.client.keys.transaction().await;
    let stored = tx.get_app_state_sync_key(&[0, 9]).await.unwrap().unwrap();
    assert_eq!(stored.key_data, vec![3u8; 32]);

    assert!(collector.snapshot().iter().any(|e| matches!(
        e,
        Event::CredsUpdate(u) if u.my_app_state_key_id.is_some()
    )));
}

#[tokio::test]
async fn deferred_history_sync_runs_once_key_share_arrives() {
    let mut harness = TestHarness::new().await;
    let collector = EventCollector::install(&harness.client);

    // Offline preview opens the event buffer while the key is missing.
    harness
        .inject(
            NodeBuilder::new("ib")
                .children([NodeBuilder::new("offline").attr("count", "3").build()])
                .build(),
        )
        .await;
    harness.settle().await;
    assert!(
        collector.snapshot().is_empty(),
        "events are buffered until the initial resync"
    );

    // History arrives before the key: the sync is deferred.
    harness
        .inject(inbound_message(
            "5550001111@s.whatsapp.net",
            "3EB0HIST01",
            None,
            &history_notification_message(),
        ))
        .await;
    harness.settle().await;
    assert!(collector.snapshot().is_empty());

    // The key share triggers the initial resync retroactively.
    harness
        .inject(inbound_message(
            "5550001111@s.whatsapp.net",
            "3EB0KEY002",
            None,
            &key_share_message(&[0, 7], &[5u8; 32]),
        ))
        .await;

    answer_sync_query(&mut harness).await;
    harness.settle().await;

    let events = collector.snapshot();
    assert!(!events.is_empty(), "buffer flushed after the initial resync");
    let counter_bump = events.iter().any(|e| matches!(
        e,
        Event::CredsUpdate(u) if u.account_sync_counter == Some(1)
    ));
    assert!(counter_bump, "account sync counter increments once");

    // A second identical history notification does not resync again.
    harness
        .inject(inbound_message(
            "5550001111@s.whatsapp.net",
            "3EB0HIST02",
            None,
            &history_notification_message(),
        ))
        .await;
    harness.settle().await;
    let sync_iqs = harness
        .sent_stanzas()
        .await
        .into_iter()
        .filter(|n| {
            n.attrs.get("xmlns").map(String::as_str) == Some("w:sync:app:state")
        })
        .count();
    assert_eq!(sync_iqs, 0, "initial resync runs exactly once");
}

#[tokio::test]
async fn device_list_notification_invalidates_cache() {
    let mut harness = TestHarness::new().await;
    let jid: warelay::types::jid::Jid = "444:1@s.whatsapp.net".parse().unwrap();
    harness
        .client
        .device_cache
        .insert("444", vec![jid], std::time::Instant::now());

    harness
        .inject(
            NodeBuilder::new("notification")
                .attr("from", "444@s.whatsapp.net")
                .attr("id", "n-1")
                .attr("type", "account_sync")
                .children([NodeBuilder::new("device-list").build()])
                .build(),
        )
        .await;
    harness.settle().await;

    assert!(harness
        .client
        .device_cache
        .get("444", std::time::Instant::now())
        .is_none());
}

#[tokio::test]
async fn retry_receipt_triggers_single_device_resend() {
    let mut creds = warelay::Creds::generate();
    creds.me = Some("5550001111:1@s.whatsapp.net".parse().unwrap());
    let mut config = warelay::SocketConfig::default();
    // The caller keeps the original message available for retries.
    config.get_message = std::sync::Arc::new(|key| {
        assert_eq!(key.id, "3EB0ORIG01");
        Some(proto::Message {
            conversation: Some("original".into()),
            ..Default::default()
        })
    });
    let mut harness = TestHarness::with_creds_and_config(creds, config).await;

    // The retrying device already has a session.
    let tx = harness.client.keys.transaction().await;
    tx.set(namespace::SESSION, "999.2", Some(Vec::new()))
        .await
        .unwrap();
    drop(tx);

    harness
        .inject(
            NodeBuilder::new("receipt")
                .attr("from", "999@s.whatsapp.net")
                .attr("participant", "999:2@s.whatsapp.net")
                .attr("id", "3EB0ORIG01")
                .attr("type", "retry")
                .attr("t", "1700000001")
                .build(),
        )
        .await;
    harness.settle().await;

    let mut resend = None;
    for _ in 0..200 {
        if let Some(found) = harness
            .sent_stanzas()
            .await
            .into_iter()
            .find(|n| n.tag == "message")
        {
            resend = Some(found);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let resend = resend.expect("retry resend stanza");
    let resend = &resend;
    assert_eq!(
        warelay::send::stanza_recipients(resend),
        std::collections::HashSet::from(["999:2@s.whatsapp.net".to_string()])
    );
    assert_eq!(
        resend.attrs.get("device_fanout").map(String::as_str),
        Some("false")
    );
    assert_eq!(resend.attrs.get("id").map(String::as_str), Some("3EB0ORIG01"));
}
