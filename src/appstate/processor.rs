use crate::appstate::errors::{AppStateError, Result};
use crate::appstate::hash::{generate_content_mac, generate_patch_mac, HashState};
use crate::appstate::keys::{expand_app_state_keys, ExpandedAppStateKeys};
use crate::appstate::lthash::WA_PATCH_INTEGRITY;
use crate::config::AppStateMacVerification;
use crate::crypto::cbc;
use crate::proto::syncd_mutation::SyncdOperation;
use crate::proto::{self, SyncActionValue};
use crate::store::KeyTransaction;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use log::warn;
use prost::Message;
use sha2::Sha256;
use std::collections::HashMap;

/// One decoded, verified mutation ready for action dispatch.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub operation: SyncdOperation,
    pub action: SyncActionValue,
    pub index: Vec<String>,
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}

/// Per-collection slice of one sync IQ response.
#[derive(Debug, Default)]
pub struct PatchList {
    pub name: String,
    pub has_more_patches: bool,
    pub patches: Vec<proto::SyncdPatch>,
    pub snapshot: Option<proto::SyncdSnapshot>,
}

async fn get_expanded_keys(
    tx: &KeyTransaction,
    key_id: &[u8],
) -> Result<ExpandedAppStateKeys> {
    match tx.get_app_state_sync_key(key_id).await? {
        Some(record) => Ok(expand_app_state_keys(&record.key_data)),
        None => Err(AppStateError::KeyNotFound(key_id.to_vec())),
    }
}

/// Rebuilds a collection from a full snapshot. Local state is discarded
/// first; the result carries exactly the snapshot's records.
pub async fn decode_syncd_snapshot(
    name: &str,
    snapshot: &proto::SyncdSnapshot,
    tx: &KeyTransaction,
    mac: AppStateMacVerification,
) -> Result<(HashState, Vec<Mutation>)> {
    let snapshot_version = snapshot.version.as_ref().and_then(|v| v.version).unwrap_or(0);
    let mut state = HashState {
        version: snapshot_version,
        ..Default::default()
    };

    let key_id = snapshot
        .key_id
        .as_ref()
        .and_then(|k| k.id.as_deref())
        .ok_or(AppStateError::MissingField("snapshot key id"))?;
    let keys = get_expanded_keys(tx, key_id).await?;

    let mut mutations = Vec::with_capacity(snapshot.records.len());
    for record in &snapshot.records {
        decode_mutation(&keys, SyncdOperation::Set, record, &mut mutations)?;
    }

    let add_macs: Vec<&[u8]> = mutations.iter().map(|m| m.value_mac.as_slice()).collect();
    WA_PATCH_INTEGRITY.subtract_then_add_in_place(&mut state.hash, &[] as &[&[u8]], &add_macs);
    for mutation in &mutations {
        state.index_value_map.insert(
            BASE64_STANDARD.encode(&mutation.index_mac),
            mutation.value_mac.clone(),
        );
    }

    if mac.snapshot {
        let expected = state.generate_snapshot_mac(name, &keys.snapshot_mac);
        if snapshot.mac.as_deref() != Some(expected.as_slice()) {
            return Err(AppStateError::MismatchingSnapshotMac);
        }
    }

    Ok((state, mutations))
}

/// Applies incremental patches on top of `state`. Version only moves
/// forward; stale patches are skipped.
pub async fn decode_patches(
    name: &str,
    patches: &[proto::SyncdPatch],
    mut state: HashState,
    tx: &KeyTransaction,
    mac: AppStateMacVerification,
) -> Result<(HashState, Vec<Mutation>)> {
    let mut new_mutations = Vec::new();

    for patch in patches {
        let version = patch.version.as_ref().and_then(|v| v.version).unwrap_or(0);
        if version <= state.version {
            warn!(
                target: "AppState",
                "skipping patch v{version} for '{name}', already at v{}",
                state.version
            );
            continue;
        }
        state.version = version;

        let key_id = patch
            .key_id
            .as_ref()
            .and_then(|k| k.id.as_deref())
            .ok_or(AppStateError::MissingField("patch key id"))?;
        let keys = get_expanded_keys(tx, key_id).await?;

        if mac.patch {
            let expected = generate_patch_mac(patch, name, &keys.patch_mac, version);
            if patch.patch_mac.as_deref() != Some(expected.as_slice()) {
                return Err(AppStateError::MismatchingPatchMac);
            }
        }

        let mut patch_mutations: Vec<Mutation> = Vec::with_capacity(patch.mutations.len());
        for mutation in &patch.mutations {
            let operation = mutation.operation();
            let record = mutation
                .record
                .as_ref()
                .ok_or(AppStateError::MissingField("mutation record"))?;
            decode_mutation(&keys, operation, record, &mut patch_mutations)?;
        }

        // LT-hash progression: removals subtract the previous value MAC,
        // found either earlier in this patch or in the live map.
        let mut subtract_macs: Vec<Vec<u8>> = Vec::new();
        let mut add_macs: Vec<Vec<u8>> = Vec::new();
        for (i, mutation) in patch_mutations.iter().enumerate() {
            match mutation.operation {
                SyncdOperation::Set => add_macs.push(mutation.value_mac.clone()),
                SyncdOperation::Remove => {
                    let prev_in_patch = patch_mutations[..i]
                        .iter()
                        .rev()
                        .find(|m| {
                            m.operation == SyncdOperation::Set
                                && m.index_mac == mutation.index_mac
                        })
                        .map(|m| m.value_mac.clone());
                    let index_mac_b64 = BASE64_STANDARD.encode(&mutation.index_mac);
                    match prev_in_patch
                        .or_else(|| state.index_value_map.get(&index_mac_b64).cloned())
                    {
                        Some(prev) => subtract_macs.push(prev),
                        None => warn!(
                            target: "AppState",
                            "no previous value for REMOVE with index MAC {index_mac_b64}"
                        ),
                    }
                }
            }
        }
        WA_PATCH_INTEGRITY.subtract_then_add_in_place(&mut state.hash, &subtract_macs, &add_macs);

        for mutation in &patch_mutations {
            let index_mac_b64 = BASE64_STANDARD.encode(&mutation.index_mac);
            match mutation.operation {
                SyncdOperation::Set => {
                    state
                        .index_value_map
                        .insert(index_mac_b64, mutation.value_mac.clone());
                }
                SyncdOperation::Remove => {
                    state.index_value_map.remove(&index_mac_b64);
                }
            }
        }

        // The patch's snapshot MAC must describe the state after this
        // patch is applied.
        if mac.patch {
            let expected = state.generate_snapshot_mac(name, &keys.snapshot_mac);
            if patch.snapshot_mac.as_deref() != Some(expected.as_slice()) {
                return Err(AppStateError::MismatchingLtHash);
            }
        }

        new_mutations.extend(patch_mutations);
    }

    Ok((state, new_mutations))
}

/// Verifies and decrypts one record into a [`Mutation`].
pub fn decode_mutation(
    keys: &ExpandedAppStateKeys,
    operation: SyncdOperation,
    record: &proto::SyncdRecord,
    out: &mut Vec<Mutation>,
) -> Result<()> {
    let key_id = record
        .key_id
        .as_ref()
        .and_then(|k| k.id.as_deref())
        .ok_or(AppStateError::MissingField("record key id"))?;
    let value_blob = record
        .value
        .as_ref()
        .and_then(|v| v.blob.as_deref())
        .ok_or(AppStateError::MissingField("record value blob"))?;

    if value_blob.len() < 48 {
        return Err(AppStateError::ValueBlobTooShort(value_blob.len()));
    }
    let (content, value_mac) = value_blob.split_at(value_blob.len() - 32);

    let expected_value_mac = generate_content_mac(operation, content, key_id, &keys.value_mac);
    if expected_value_mac != value_mac {
        return Err(AppStateError::MismatchingContentMac(format!(
            "operation {operation:?}"
        )));
    }

    let (iv, ciphertext) = content.split_at(16);
    let plaintext = cbc::decrypt(&keys.value_encryption, iv, ciphertext)?;
    let mut sync_action = proto::SyncActionData::decode(plaintext.as_slice())?;

    let index_mac = record
        .index
        .as_ref()
        .and_then(|i| i.blob.as_deref())
        .ok_or(AppStateError::MissingField("record index MAC"))?;
    let index_json = sync_action
        .index
        .as_deref()
        .ok_or(AppStateError::MissingField("action index"))?;

    let mut index_hasher =
        Hmac::<Sha256>::new_from_slice(&keys.index).expect("HMAC accepts any key size");
    index_hasher.update(index_json);
    if index_hasher.finalize().into_bytes().as_slice() != index_mac {
        return Err(AppStateError::MismatchingIndexMac);
    }

    let index: Vec<String> = serde_json::from_slice(index_json)?;

    out.push(Mutation {
        operation,
        action: sync_action.value.take().unwrap_or_default(),
        index,
        index_mac: index_mac.to_vec(),
        value_mac: value_mac.to_vec(),
    });
    Ok(())
}

/// Live entries by index MAC, as a plain map for diff-style assertions.
pub fn index_snapshot(state: &HashState) -> HashMap<String, Vec<u8>> {
    state.index_value_map.clone()
}
