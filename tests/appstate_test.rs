use std::sync::Arc;
use warelay::appstate::encode::{
    chat_modification_to_patch, encode_syncd_patch, ChatModification,
};
use warelay::appstate::errors::AppStateError;
use warelay::appstate::hash::HashState;
use warelay::appstate::keys::expand_app_state_keys;
use warelay::appstate::processor::{decode_patches, decode_syncd_snapshot};
use warelay::config::AppStateMacVerification;
use warelay::proto;
use warelay::proto::syncd_mutation::SyncdOperation;
use warelay::store::keystore::AppStateSyncKeyRecord;
use warelay::store::{KeyStore, KeyTransaction, MemoryBackend};

const KEY_ID: &[u8] = &[0, 1];
const MASTER_KEY: [u8; 32] = [7u8; 32];

async fn store_with_key() -> KeyStore {
    let store = KeyStore::new(Arc::new(MemoryBackend::new()));
    {
        let tx = store.transaction().await;
        tx.set_app_state_sync_key(
            KEY_ID,
            &AppStateSyncKeyRecord {
                key_data: MASTER_KEY.to_vec(),
                fingerprint: Vec::new(),
                timestamp: 1_700_000_000,
            },
        )
        .await
        .unwrap();
    }
    store
}

fn archive_patch(jid: &str, archived: bool) -> warelay::appstate::encode::PatchCreate {
    chat_modification_to_patch(
        ChatModification::Archive {
            jid: jid.parse().unwrap(),
            archived,
        },
        1_700_000_000,
    )
}

/// Builds a snapshot at `version` whose records reflect `state` after the
/// given patches were created from a fresh state.
fn build_snapshot(
    name: &str,
    state: &HashState,
    records: Vec<proto::SyncdRecord>,
) -> proto::SyncdSnapshot {
    let keys = expand_app_state_keys(&MASTER_KEY);
    proto::SyncdSnapshot {
        version: Some(proto::SyncdVersion {
            version: Some(state.version),
        }),
        records,
        mac: Some(state.generate_snapshot_mac(name, &keys.snapshot_mac)),
        key_id: Some(proto::KeyId {
            id: Some(KEY_ID.to_vec()),
        }),
    }
}

async fn decode_tx(store: &KeyStore) -> KeyTransaction {
    store.transaction().await
}

#[tokio::test]
async fn snapshot_then_patches_reach_final_version() {
    let store = store_with_key().await;
    let keys = expand_app_state_keys(&MASTER_KEY);
    let name = "regular_low";

    // Server side: a snapshot at version 123 with two records...
    let mut server_state = HashState::default();
    let mut records = Vec::new();
    for (jid, archived) in [("100@s.whatsapp.net", true), ("200@s.whatsapp.net", false)] {
        let patch = archive_patch(jid, archived);
        let syncd = encode_syncd_patch(&patch, KEY_ID, &keys, &mut server_state).unwrap();
        records.push(syncd.mutations[0].record.clone().unwrap());
    }
    server_state.version = 123;
    let snapshot = build_snapshot(name, &server_state, records);

    // ...followed by five incremental patches, versions 124..=128.
    let mut patches = Vec::new();
    for i in 0..5 {
        let patch = archive_patch(&format!("30{i}@s.whatsapp.net"), i % 2 == 0);
        patches.push(encode_syncd_patch(&patch, KEY_ID, &keys, &mut server_state).unwrap());
    }
    assert_eq!(server_state.version, 128);

    // Client side.
    let tx = decode_tx(&store).await;
    let mac = AppStateMacVerification::default();
    let (state, snapshot_mutations) = decode_syncd_snapshot(name, &snapshot, &tx, mac)
        .await
        .unwrap();
    assert_eq!(state.version, 123);
    assert_eq!(snapshot_mutations.len(), 2);

    let (state, patch_mutations) = decode_patches(name, &patches, state, &tx, mac)
        .await
        .unwrap();
    assert_eq!(state.version, 128);
    assert_eq!(patch_mutations.len(), 5);
    assert_eq!(state.index_value_map.len(), 7);
    assert_eq!(state.hash, server_state.hash);

    // Mutations surface in patch order.
    let indices: Vec<&str> = patch_mutations
        .iter()
        .map(|m| m.index[1].as_str())
        .collect();
    assert_eq!(
        indices,
        vec![
            "300@s.whatsapp.net",
            "301@s.whatsapp.net",
            "302@s.whatsapp.net",
            "303@s.whatsapp.net",
            "304@s.whatsapp.net"
        ]
    );
}

#[tokio::test]
async fn reapplying_stale_patches_is_a_no_op() {
    let store = store_with_key().await;
    let keys = expand_app_state_keys(&MASTER_KEY);
    let mut server_state = HashState::default();
    let patches = vec![
        encode_syncd_patch(
            &archive_patch("1@s.whatsapp.net", true),
            KEY_ID,
            &keys,
            &mut server_state,
        )
        .unwrap(),
    ];

    let tx = decode_tx(&store).await;
    let mac = AppStateMacVerification::default();
    let (state, first) = decode_patches("regular_low", &patches, HashState::default(), &tx, mac)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(state.version, 1);

    let (state, second) = decode_patches("regular_low", &patches, state, &tx, mac)
        .await
        .unwrap();
    assert!(second.is_empty(), "stale patches must not re-emit mutations");
    assert_eq!(state.version, 1);
}

#[tokio::test]
async fn remove_operation_subtracts_previous_value_from_hash() {
    let store = store_with_key().await;
    let keys = expand_app_state_keys(&MASTER_KEY);
    let name = "regular_low";

    let mut server_state = HashState::default();
    let set_patch = encode_syncd_patch(
        &archive_patch("5@s.whatsapp.net", true),
        KEY_ID,
        &keys,
        &mut server_state,
    )
    .unwrap();

    let mut remove = archive_patch("5@s.whatsapp.net", true);
    remove.operation = SyncdOperation::Remove;
    let remove_patch =
        encode_syncd_patch(&remove, KEY_ID, &keys, &mut server_state).unwrap();

    let tx = decode_tx(&store).await;
    let mac = AppStateMacVerification::default();
    let (state, _) = decode_patches(
        name,
        &[set_patch, remove_patch],
        HashState::default(),
        &tx,
        mac,
    )
    .await
    .unwrap();

    assert_eq!(state.version, 2);
    assert!(state.index_value_map.is_empty());
    assert_eq!(state.hash, [0u8; 128], "hash returns to the empty accumulator");
}

#[tokio::test]
async fn tampered_patch_mac_is_rejected_when_verification_is_on() {
    let store = store_with_key().await;
    let keys = expand_app_state_keys(&MASTER_KEY);
    let mut server_state = HashState::default();
    let mut patch = encode_syncd_patch(
        &archive_patch("9@s.whatsapp.net", true),
        KEY_ID,
        &keys,
        &mut server_state,
    )
    .unwrap();
    patch.patch_mac = Some(vec![0xAA; 32]);

    let tx = decode_tx(&store).await;
    let err = decode_patches(
        "regular_low",
        std::slice::from_ref(&patch),
        HashState::default(),
        &tx,
        AppStateMacVerification::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppStateError::MismatchingPatchMac));

    // Disabling only the patch check lets the same payload through.
    let relaxed = AppStateMacVerification {
        patch: false,
        snapshot: true,
    };
    let (state, mutations) = decode_patches(
        "regular_low",
        std::slice::from_ref(&patch),
        HashState::default(),
        &tx,
        relaxed,
    )
    .await
    .unwrap();
    assert_eq!(mutations.len(), 1);
    assert_eq!(state.version, 1);
}

#[tokio::test]
async fn tampered_snapshot_mac_is_rejected_when_verification_is_on() {
    let store = store_with_key().await;
    let keys = expand_app_state_keys(&MASTER_KEY);
    let name = "critical_block";

    let mut server_state = HashState::default();
    let patch = encode_syncd_patch(
        &archive_patch("4@s.whatsapp.net", true),
        KEY_ID,
        &keys,
        &mut server_state,
    )
    .unwrap();
    server_state.version = 50;
    let mut snapshot =
        build_snapshot(name, &server_state, vec![patch.mutations[0].record.clone().unwrap()]);
    snapshot.mac = Some(vec![0x55; 32]);

    let tx = decode_tx(&store).await;
    let mac = AppStateMacVerification::default();
    let err = decode_syncd_snapshot(name, &snapshot, &tx, mac)
        .await
        .unwrap_err();
    assert!(matches!(err, AppStateError::MismatchingSnapshotMac));

    let relaxed = AppStateMacVerification {
        patch: true,
        snapshot: false,
    };
    let (state, mutations) = decode_syncd_snapshot(name, &snapshot, &tx, relaxed)
        .await
        .unwrap();
    assert_eq!(state.version, 50);
    assert_eq!(mutations.len(), 1);
}

#[tokio::test]
async fn missing_sync_key_is_reported_with_its_id() {
    let store = KeyStore::new(Arc::new(MemoryBackend::new()));
    let keys = expand_app_state_keys(&MASTER_KEY);
    let mut server_state = HashState::default();
    let patch = encode_syncd_patch(
        &archive_patch("2@s.whatsapp.net", true),
        KEY_ID,
        &keys,
        &mut server_state,
    )
    .unwrap();

    let tx = store.transaction().await;
    let err = decode_patches(
        "regular_low",
        &[patch],
        HashState::default(),
        &tx,
        AppStateMacVerification::default(),
    )
    .await
    .unwrap_err();
    match err {
        AppStateError::KeyNotFound(id) => assert_eq!(id, KEY_ID.to_vec()),
        other => panic!("expected KeyNotFound, got {other}"),
    }
}
