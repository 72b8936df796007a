use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use warelay::externals::GroupMetadataResolver;
use warelay::proto;
use warelay::send::{stanza_enc_types, stanza_recipients, SendOpts};
use warelay::store::namespace;
use warelay::testutil::TestHarness;
use warelay::types::jid::Jid;
use warelay::types::message::EditAttribute;

struct FixedGroup(Vec<Jid>);

#[async_trait]
impl GroupMetadataResolver for FixedGroup {
    async fn participants(&self, _group: &Jid) -> anyhow::Result<Vec<Jid>> {
        Ok(self.0.clone())
    }
}

fn text_message(text: &str) -> proto::Message {
    proto::Message {
        conversation: Some(text.to_string()),
        ..Default::default()
    }
}

/// Marks sessions as established so no bundle fetch round-trips happen.
async fn mark_sessions(harness: &TestHarness, devices: &[Jid]) {
    let tx = harness.client.keys.transaction().await;
    for device in devices {
        tx.set(namespace::SESSION, &device.signal_address(), Some(Vec::new()))
            .await
            .unwrap();
    }
}

fn devices_of(user: &str, ids: &[u16]) -> Vec<Jid> {
    ids.iter()
        .map(|id| format!("{user}:{id}@s.whatsapp.net").parse().unwrap())
        .collect()
}

async fn warm_cache(harness: &TestHarness, user: &str, devices: &[Jid]) {
    harness.client.device_cache.insert(
        user,
        devices.to_vec(),
        std::time::Instant::now(),
    );
}

async fn group_harness() -> (TestHarness, Jid, Vec<Jid>) {
    let mut harness = TestHarness::new().await;
    let group: Jid = "12036300000000@g.us".parse().unwrap();

    let participants: Vec<Jid> = ["111", "222", "333"]
        .iter()
        .map(|u| format!("{u}@s.whatsapp.net").parse().unwrap())
        .collect();
    harness
        .client
        .set_group_resolver(Arc::new(FixedGroup(participants)));

    let mut all_devices = Vec::new();
    for user in ["111", "222", "333"] {
        let devices = devices_of(user, &[0, 1]);
        warm_cache(&harness, user, &devices).await;
        all_devices.extend(devices);
    }
    // Our own user only runs the sending device.
    warm_cache(&harness, "5550001111", &devices_of("5550001111", &[1])).await;

    mark_sessions(&harness, &all_devices).await;
    harness.sent_stanzas().await; // discard nothing, reset counter
    (harness, group, all_devices)
}

#[tokio::test]
async fn first_group_send_distributes_sender_key_to_every_device() {
    let (mut harness, group, all_devices) = group_harness().await;

    harness
        .client
        .relay_message(group.clone(), text_message("hello group"), SendOpts::default())
        .await
        .unwrap();

    let sent = harness.wait_for_stanzas().await;
    let stanza = &sent[0];
    assert_eq!(stanza.tag, "message");

    // Six per-device distribution envelopes plus one skmsg payload.
    let recipients = stanza_recipients(stanza);
    let expected: HashSet<String> = all_devices.iter().map(|d| d.to_string()).collect();
    assert_eq!(recipients, expected);

    let enc_types = stanza_enc_types(stanza);
    let skmsg_count = enc_types.iter().filter(|(_, t)| t == "skmsg").count();
    assert_eq!(skmsg_count, 1);
    assert_eq!(enc_types.len(), 7);

    assert!(stanza.attrs.contains_key("phash"));

    // The memory now covers all six devices.
    let tx = harness.client.keys.transaction().await;
    let memory = tx.get_sender_key_memory(&group.to_string()).await.unwrap();
    assert_eq!(memory, expected);
}

#[tokio::test]
async fn second_group_send_skips_redistribution() {
    let (mut harness, group, _) = group_harness().await;

    harness
        .client
        .relay_message(group.clone(), text_message("one"), SendOpts::default())
        .await
        .unwrap();
    harness.wait_for_stanzas().await;

    harness
        .client
        .relay_message(group.clone(), text_message("two"), SendOpts::default())
        .await
        .unwrap();
    let sent = harness.wait_for_stanzas().await;
    let stanza = &sent[0];

    // No per-device nodes, just the single group payload.
    assert!(stanza_recipients(stanza).is_empty());
    let enc_types = stanza_enc_types(stanza);
    assert_eq!(enc_types, vec![(None, "skmsg".to_string())]);
}

#[tokio::test]
async fn new_device_gets_exactly_one_distribution() {
    let (mut harness, group, _) = group_harness().await;

    harness
        .client
        .relay_message(group.clone(), text_message("one"), SendOpts::default())
        .await
        .unwrap();
    harness.wait_for_stanzas().await;

    // User 111 registers a third device.
    let grown = devices_of("111", &[0, 1, 2]);
    warm_cache(&harness, "111", &grown).await;
    mark_sessions(&harness, &grown).await;

    harness
        .client
        .relay_message(group.clone(), text_message("two"), SendOpts::default())
        .await
        .unwrap();
    let sent = harness.wait_for_stanzas().await;

    let recipients = stanza_recipients(&sent[0]);
    assert_eq!(
        recipients,
        HashSet::from(["111:2@s.whatsapp.net".to_string()]),
        "only the new device receives the sender key"
    );
}

#[tokio::test]
async fn dm_fanout_covers_own_and_peer_devices_minus_sender() {
    let mut harness = TestHarness::new().await;
    let peer: Jid = "777@s.whatsapp.net".parse().unwrap();

    let own_devices = devices_of("5550001111", &[1, 2]);
    let peer_devices = devices_of("777", &[0, 1]);
    warm_cache(&harness, "5550001111", &own_devices).await;
    warm_cache(&harness, "777", &peer_devices).await;
    mark_sessions(&harness, &own_devices).await;
    mark_sessions(&harness, &peer_devices).await;

    harness
        .client
        .relay_message(peer.clone(), text_message("hi"), SendOpts::default())
        .await
        .unwrap();

    let sent = harness.wait_for_stanzas().await;
    let recipients = stanza_recipients(&sent[0]);
    let expected: HashSet<String> = [
        "5550001111:2@s.whatsapp.net",
        "777@s.whatsapp.net",
        "777:1@s.whatsapp.net",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(recipients, expected, "sender's own device is excluded");
}

#[tokio::test]
async fn retry_relay_targets_only_the_named_participant() {
    let mut harness = TestHarness::new().await;
    let peer: Jid = "777@s.whatsapp.net".parse().unwrap();
    let retry_device: Jid = "777:2@s.whatsapp.net".parse().unwrap();
    mark_sessions(&harness, std::slice::from_ref(&retry_device)).await;

    harness
        .client
        .relay_message(
            peer,
            text_message("again"),
            SendOpts {
                message_id: Some("3EB0RETRY01".into()),
                participant: Some(retry_device.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let sent = harness.wait_for_stanzas().await;
    let stanza = &sent[0];
    assert_eq!(
        stanza_recipients(stanza),
        HashSet::from([retry_device.to_string()])
    );
    assert_eq!(
        stanza.attrs.get("device_fanout").map(String::as_str),
        Some("false")
    );
    assert_eq!(stanza.attrs.get("id").map(String::as_str), Some("3EB0RETRY01"));
}

#[tokio::test]
async fn edit_attribute_and_biz_child_travel_with_the_stanza() {
    let mut harness = TestHarness::new().await;
    let peer: Jid = "777@s.whatsapp.net".parse().unwrap();
    let peer_devices = devices_of("777", &[0]);
    warm_cache(&harness, "5550001111", &devices_of("5550001111", &[1])).await;
    warm_cache(&harness, "777", &peer_devices).await;
    mark_sessions(&harness, &peer_devices).await;

    let message = proto::Message {
        list_message: Some(proto::message::ListMessage::default()),
        ..Default::default()
    };
    harness
        .client
        .relay_message(
            peer,
            message,
            SendOpts {
                edit: EditAttribute::MessageEdit,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let sent = harness.wait_for_stanzas().await;
    let stanza = &sent[0];
    assert_eq!(stanza.attrs.get("edit").map(String::as_str), Some("7"));
    let biz = stanza.get_optional_child("biz").expect("biz child");
    assert!(biz.get_optional_child("list").is_some());
}
