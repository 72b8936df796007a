//! Mutation encoding for locally-created patches.

use crate::appstate::errors::{AppStateError, Result};
use crate::appstate::hash::{generate_content_mac, generate_patch_mac, HashState};
use crate::appstate::keys::ExpandedAppStateKeys;
use crate::appstate::lthash::WA_PATCH_INTEGRITY;
use crate::crypto::cbc;
use crate::proto::sync_action_value as action;
use crate::proto::syncd_mutation::SyncdOperation;
use crate::proto::{self, SyncActionValue};
use crate::types::jid::Jid;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use prost::Message;
use rand::RngCore;
use sha2::Sha256;

/// A patch the caller wants pushed to the server.
#[derive(Debug, Clone)]
pub struct PatchCreate {
    pub collection: String,
    pub index: Vec<String>,
    pub value: SyncActionValue,
    pub operation: SyncdOperation,
    pub api_version: i32,
}

/// High-level chat modifications exposed through `chat_modify`.
#[derive(Debug, Clone)]
pub enum ChatModification {
    Archive { jid: Jid, archived: bool },
    Mute { jid: Jid, mute_end_timestamp: Option<i64> },
    Pin { jid: Jid, pinned: bool },
    Star { jid: Jid, message_id: String, from_me: bool, starred: bool },
    MarkRead { jid: Jid, read: bool },
    ClearChat { jid: Jid },
    DeleteChat { jid: Jid },
    PushNameSetting { name: String },
    Contact { jid: Jid, full_name: String },
}

/// Maps a modification to its collection, index and action payload.
pub fn chat_modification_to_patch(modification: ChatModification, timestamp: i64) -> PatchCreate {
    let value = |v: SyncActionValue| SyncActionValue {
        timestamp: Some(timestamp),
        ..v
    };

    match modification {
        ChatModification::Archive { jid, archived } => PatchCreate {
            collection: "regular_low".into(),
            index: vec!["archive".into(), jid.to_string()],
            value: value(SyncActionValue {
                archive_chat_action: Some(action::ArchiveChatAction {
                    archived: Some(archived),
                    message_range: Some(action::SyncActionMessageRange {
                        last_message_timestamp: Some(timestamp),
                        last_system_message_timestamp: None,
                    }),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 3,
        },
        ChatModification::Mute {
            jid,
            mute_end_timestamp,
        } => PatchCreate {
            collection: "regular_high".into(),
            index: vec!["mute".into(), jid.to_string()],
            value: value(SyncActionValue {
                mute_action: Some(action::MuteAction {
                    muted: Some(mute_end_timestamp.is_some()),
                    mute_end_timestamp,
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 2,
        },
        ChatModification::Pin { jid, pinned } => PatchCreate {
            collection: "regular_low".into(),
            index: vec!["pin_v1".into(), jid.to_string()],
            value: value(SyncActionValue {
                pin_action: Some(action::PinAction {
                    pinned: Some(pinned),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 5,
        },
        ChatModification::Star {
            jid,
            message_id,
            from_me,
            starred,
        } => PatchCreate {
            collection: "regular_high".into(),
            index: vec![
                "star".into(),
                jid.to_string(),
                message_id,
                if from_me { "1".into() } else { "0".into() },
                "0".into(),
            ],
            value: value(SyncActionValue {
                star_action: Some(action::StarAction {
                    starred: Some(starred),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 2,
        },
        ChatModification::MarkRead { jid, read } => PatchCreate {
            collection: "regular_low".into(),
            index: vec!["markChatAsRead".into(), jid.to_string()],
            value: value(SyncActionValue {
                mark_chat_as_read_action: Some(action::MarkChatAsReadAction {
                    read: Some(read),
                    message_range: Some(action::SyncActionMessageRange {
                        last_message_timestamp: Some(timestamp),
                        last_system_message_timestamp: None,
                    }),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 3,
        },
        ChatModification::ClearChat { jid } => PatchCreate {
            collection: "regular_high".into(),
            index: vec!["clearChat".into(), jid.to_string()],
            value: value(SyncActionValue {
                clear_chat_action: Some(action::ClearChatAction {
                    message_range: Some(action::SyncActionMessageRange {
                        last_message_timestamp: Some(timestamp),
                        last_system_message_timestamp: None,
                    }),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 6,
        },
        ChatModification::DeleteChat { jid } => PatchCreate {
            collection: "regular_high".into(),
            index: vec!["deleteChat".into(), jid.to_string()],
            value: value(SyncActionValue {
                delete_chat_action: Some(action::DeleteChatAction {
                    message_range: Some(action::SyncActionMessageRange {
                        last_message_timestamp: Some(timestamp),
                        last_system_message_timestamp: None,
                    }),
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 6,
        },
        ChatModification::PushNameSetting { name } => PatchCreate {
            collection: "critical_block".into(),
            index: vec!["setting_pushName".into()],
            value: value(SyncActionValue {
                push_name_setting: Some(action::PushNameSetting { name: Some(name) }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 1,
        },
        ChatModification::Contact { jid, full_name } => PatchCreate {
            collection: "critical_unblock_low".into(),
            index: vec!["contact".into(), jid.to_string()],
            value: value(SyncActionValue {
                contact_action: Some(action::ContactAction {
                    full_name: Some(full_name),
                    first_name: None,
                }),
                ..Default::default()
            }),
            operation: SyncdOperation::Set,
            api_version: 2,
        },
    }
}

/// Encrypted mutation ready to be embedded in a patch: the index MAC and
/// the `IV || ciphertext || valueMac` blob.
#[derive(Debug, Clone)]
pub struct EncryptedMutation {
    pub index_mac: Vec<u8>,
    pub value_blob: Vec<u8>,
    pub value_mac: Vec<u8>,
}

pub fn encrypt_mutation(
    index: &[String],
    value: &SyncActionValue,
    keys: &ExpandedAppStateKeys,
    key_id: &[u8],
    operation: SyncdOperation,
    api_version: i32,
) -> Result<EncryptedMutation> {
    let index_json = serde_json::to_vec(index)?;

    let mut index_hasher =
        Hmac::<Sha256>::new_from_slice(&keys.index).expect("HMAC accepts any key size");
    index_hasher.update(&index_json);
    let index_mac = index_hasher.finalize().into_bytes().to_vec();

    let action_data = proto::SyncActionData {
        index: Some(index_json),
        value: Some(value.clone()),
        padding: Some(Vec::new()),
        version: Some(api_version),
    };
    let plaintext = action_data.encode_to_vec();

    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = cbc::encrypt(&keys.value_encryption, &iv, &plaintext)
        .map_err(|e| AppStateError::Encrypt(e.to_string()))?;

    let mut value_blob = iv.to_vec();
    value_blob.extend_from_slice(&ciphertext);
    let value_mac = generate_content_mac(operation, &value_blob, key_id, &keys.value_mac);
    value_blob.extend_from_slice(&value_mac);

    Ok(EncryptedMutation {
        index_mac,
        value_blob,
        value_mac,
    })
}

/// Builds the signed patch and advances the local state pre-emptively:
/// the LT-hash gains the new value MAC, the version bumps by one, and the
/// index map takes the entry.
pub fn encode_syncd_patch(
    patch: &PatchCreate,
    key_id: &[u8],
    keys: &ExpandedAppStateKeys,
    state: &mut HashState,
) -> Result<proto::SyncdPatch> {
    let encrypted = encrypt_mutation(
        &patch.index,
        &patch.value,
        keys,
        key_id,
        patch.operation,
        patch.api_version,
    )?;

    let index_mac_b64 = BASE64_STANDARD.encode(&encrypted.index_mac);
    let previous_value_mac = state.index_value_map.get(&index_mac_b64).cloned();

    let subtract: Vec<Vec<u8>> = match (&patch.operation, previous_value_mac) {
        // Replacing or removing an existing entry subtracts its old MAC.
        (_, Some(prev)) => vec![prev],
        (_, None) => Vec::new(),
    };
    let add: Vec<Vec<u8>> = match patch.operation {
        SyncdOperation::Set => vec![encrypted.value_mac.clone()],
        SyncdOperation::Remove => Vec::new(),
    };
    WA_PATCH_INTEGRITY.subtract_then_add_in_place(&mut state.hash, &subtract, &add);

    state.version += 1;
    match patch.operation {
        SyncdOperation::Set => {
            state
                .index_value_map
                .insert(index_mac_b64, encrypted.value_mac.clone());
        }
        SyncdOperation::Remove => {
            state.index_value_map.remove(&index_mac_b64);
        }
    }

    let syncd_mutation = proto::SyncdMutation {
        operation: Some(patch.operation as i32),
        record: Some(proto::SyncdRecord {
            index: Some(proto::SyncdIndex {
                blob: Some(encrypted.index_mac),
            }),
            value: Some(proto::SyncdValue {
                blob: Some(encrypted.value_blob),
            }),
            key_id: Some(proto::KeyId {
                id: Some(key_id.to_vec()),
            }),
        }),
    };

    let snapshot_mac = state.generate_snapshot_mac(&patch.collection, &keys.snapshot_mac);

    let mut syncd_patch = proto::SyncdPatch {
        version: Some(proto::SyncdVersion {
            version: Some(state.version),
        }),
        mutations: vec![syncd_mutation],
        snapshot_mac: Some(snapshot_mac),
        patch_mac: None,
        key_id: Some(proto::KeyId {
            id: Some(key_id.to_vec()),
        }),
        external_mutations: None,
        exit_code: Some(0),
        device_index: Some(0),
    };
    syncd_patch.patch_mac = Some(generate_patch_mac(
        &syncd_patch,
        &patch.collection,
        &keys.patch_mac,
        state.version,
    ));

    Ok(syncd_patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstate::keys::expand_app_state_keys;
    use crate::appstate::processor::decode_mutation;

    #[test]
    fn encrypted_mutation_decodes_back() {
        let keys = expand_app_state_keys(&[9u8; 32]);
        let patch = chat_modification_to_patch(
            ChatModification::Archive {
                jid: "123@s.whatsapp.net".parse().unwrap(),
                archived: true,
            },
            1_700_000_000,
        );
        let encrypted = encrypt_mutation(
            &patch.index,
            &patch.value,
            &keys,
            b"\x00\x01",
            patch.operation,
            patch.api_version,
        )
        .unwrap();

        let record = proto::SyncdRecord {
            index: Some(proto::SyncdIndex {
                blob: Some(encrypted.index_mac.clone()),
            }),
            value: Some(proto::SyncdValue {
                blob: Some(encrypted.value_blob.clone()),
            }),
            key_id: Some(proto::KeyId {
                id: Some(b"\x00\x01".to_vec()),
            }),
        };

        let mut out = Vec::new();
        decode_mutation(&keys, SyncdOperation::Set, &record, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, patch.index);
        assert_eq!(
            out[0]
                .action
                .archive_chat_action
                .as_ref()
                .unwrap()
                .archived,
            Some(true)
        );
    }

    #[test]
    fn encoded_patch_is_self_consistent() {
        let keys = expand_app_state_keys(&[4u8; 32]);
        let mut state = HashState::default();
        let patch = chat_modification_to_patch(
            ChatModification::Mute {
                jid: "123@s.whatsapp.net".parse().unwrap(),
                mute_end_timestamp: Some(1_800_000_000),
            },
            1_700_000_000,
        );

        let syncd = encode_syncd_patch(&patch, b"\x00\x07", &keys, &mut state).unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(
            syncd.version.as_ref().unwrap().version,
            Some(state.version)
        );

        // The self-signed patch passes its own verification path.
        let expected_patch_mac =
            generate_patch_mac(&syncd, &patch.collection, &keys.patch_mac, state.version);
        assert_eq!(syncd.patch_mac.as_deref(), Some(expected_patch_mac.as_slice()));
        let expected_snapshot_mac =
            state.generate_snapshot_mac(&patch.collection, &keys.snapshot_mac);
        assert_eq!(
            syncd.snapshot_mac.as_deref(),
            Some(expected_snapshot_mac.as_slice())
        );
    }
}
