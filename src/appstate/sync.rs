//! Collection resync and patch push, driven over the `w:sync:app:state`
//! IQ namespace.

use crate::appstate::encode::{chat_modification_to_patch, encode_syncd_patch, ChatModification};
use crate::appstate::errors::AppStateError;
use crate::appstate::keys::expand_app_state_keys;
use crate::appstate::processor::{decode_patches, decode_syncd_snapshot, Mutation, PatchList};
use crate::appstate::MAX_SYNC_ATTEMPTS;
use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::proto;
use crate::request::{InfoQuery, InfoQueryType};
use crate::store::KeyTransaction;
use crate::types::events::{ChatUpdate, ContactUpdate, CredsUpdate, Event, MessageStarred};
use crate::types::jid::Jid;
use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use prost::Message as ProtoMessage;
use std::collections::HashMap;
use std::sync::Arc;

impl Client {
    /// Brings the named collections up to date with the server and emits
    /// their mutations. Serialized against message processing and run in
    /// a single key-store transaction.
    pub async fn resync_app_state(
        self: &Arc<Self>,
        collections: &[&str],
        is_initial: bool,
    ) -> anyhow::Result<()> {
        let _processing = self.processing_mutex.lock().await;
        let tx = self.keys.transaction().await;
        self.resync_app_state_inner(&tx, collections, is_initial)
            .await
    }

    /// Caller holds the processing mutex and the transaction.
    pub(crate) async fn resync_app_state_inner(
        self: &Arc<Self>,
        tx: &KeyTransaction,
        collections: &[&str],
        is_initial: bool,
    ) -> anyhow::Result<()> {
        let mut to_handle: Vec<String> = collections.iter().map(|s| s.to_string()).collect();
        let mut attempts: HashMap<String, u32> = HashMap::new();
        let mut all_mutations: Vec<Mutation> = Vec::new();

        while !to_handle.is_empty() {
            let mut states = HashMap::new();
            let mut collection_nodes = Vec::new();
            for name in &to_handle {
                let state = tx.get_app_state_version(name).await?;
                debug!(
                    target: "AppState",
                    "requesting '{name}' from version {}",
                    state.version
                );
                collection_nodes.push(
                    NodeBuilder::new("collection")
                        .attr("name", name.clone())
                        .attr("version", state.version.to_string())
                        .attr(
                            "return_snapshot",
                            if state.version == 0 { "true" } else { "false" },
                        )
                        .build(),
                );
                states.insert(name.clone(), state);
            }

            let resp = self
                .send_iq(InfoQuery {
                    namespace: "w:sync:app:state",
                    query_type: InfoQueryType::Set,
                    to: Jid::server_jid(),
                    target: None,
                    id: None,
                    content: Some(NodeContent::Nodes(vec![NodeBuilder::new("sync")
                        .children(collection_nodes)
                        .build()])),
                    timeout: None,
                })
                .await
                .context("app state sync query failed")?;

            let patch_lists = parse_sync_response(&resp);
            let mut still_pending = Vec::new();

            for name in to_handle {
                let Some(list) = patch_lists.get(&name) else {
                    warn!(target: "AppState", "server returned nothing for '{name}'");
                    continue;
                };
                let state = states.remove(&name).unwrap_or_default();

                match self.apply_patch_list(tx, &name, list, state).await {
                    Ok(mutations) => {
                        all_mutations.extend(mutations);
                        if list.has_more_patches {
                            still_pending.push(name);
                        }
                    }
                    Err(e) => {
                        let attempt = attempts.entry(name.clone()).or_insert(0);
                        *attempt += 1;
                        let unrecoverable =
                            *attempt >= MAX_SYNC_ATTEMPTS || e.is_unrecoverable();
                        warn!(
                            target: "AppState",
                            "sync of '{name}' failed (attempt {attempt}): {e}; {}",
                            if unrecoverable { "abandoning" } else { "wiping and retrying" }
                        );
                        // Local state is suspect either way.
                        tx.wipe_app_state_version(&name).await?;
                        if !unrecoverable {
                            still_pending.push(name);
                        }
                    }
                }
            }
            to_handle = still_pending;
        }

        info!(
            target: "AppState",
            "resync complete: {} mutations{}",
            all_mutations.len(),
            if is_initial { " (initial)" } else { "" }
        );
        for mutation in &all_mutations {
            self.process_sync_action(mutation).await;
        }
        Ok(())
    }

    async fn apply_patch_list(
        self: &Arc<Self>,
        tx: &KeyTransaction,
        name: &str,
        list: &PatchList,
        mut state: crate::appstate::hash::HashState,
    ) -> Result<Vec<Mutation>, AppStateError> {
        let mac = self.config.app_state_mac_verification;
        let mut mutations = Vec::new();

        if let Some(snapshot) = &list.snapshot {
            let (new_state, snapshot_mutations) =
                decode_syncd_snapshot(name, snapshot, tx, mac).await?;
            state = new_state;
            tx.set_app_state_version(name, &state).await?;
            mutations.extend(snapshot_mutations);
        }

        if !list.patches.is_empty() {
            let (new_state, patch_mutations) =
                decode_patches(name, &list.patches, state, tx, mac).await?;
            tx.set_app_state_version(name, &new_state).await?;
            mutations.extend(patch_mutations);
        }

        Ok(mutations)
    }

    /// Translates one decoded mutation into its public events.
    pub(crate) async fn process_sync_action(self: &Arc<Self>, mutation: &Mutation) {
        let action = &mutation.action;
        let chat_jid = || -> Option<Jid> {
            mutation.index.get(1).and_then(|raw| raw.parse().ok())
        };

        if let Some(setting) = &action.push_name_setting {
            if let Some(name) = &setting.name {
                self.update_creds(CredsUpdate {
                    push_name: Some(name.clone()),
                    ..Default::default()
                })
                .await;
            }
        } else if let Some(archive) = &action.archive_chat_action {
            if let Some(id) = chat_jid() {
                self.events.emit(Event::ChatsUpdate(ChatUpdate {
                    id,
                    archived: archive.archived,
                    ..Default::default()
                }));
            }
        } else if let Some(mute) = &action.mute_action {
            if let Some(id) = chat_jid() {
                self.events.emit(Event::ChatsUpdate(ChatUpdate {
                    id,
                    mute_end_timestamp: if mute.muted == Some(true) {
                        mute.mute_end_timestamp
                    } else {
                        Some(0)
                    },
                    ..Default::default()
                }));
            }
        } else if let Some(pin) = &action.pin_action {
            if let Some(id) = chat_jid() {
                self.events.emit(Event::ChatsUpdate(ChatUpdate {
                    id,
                    pinned: pin.pinned,
                    ..Default::default()
                }));
            }
        } else if let Some(star) = &action.star_action {
            if let (Some(chat), Some(message_id)) = (chat_jid(), mutation.index.get(2)) {
                self.events.emit(Event::MessagesStar(MessageStarred {
                    chat,
                    message_id: message_id.clone(),
                    starred: star.starred.unwrap_or(false),
                }));
            }
        } else if let Some(contact) = &action.contact_action {
            if let Some(id) = chat_jid() {
                self.events.emit(Event::ContactsUpdate(ContactUpdate {
                    id,
                    full_name: contact.full_name.clone(),
                    first_name: contact.first_name.clone(),
                    ..Default::default()
                }));
            }
        } else if let Some(mark_read) = &action.mark_chat_as_read_action {
            if let Some(id) = chat_jid() {
                self.events.emit(Event::ChatsUpdate(ChatUpdate {
                    id,
                    marked_read: mark_read.read,
                    ..Default::default()
                }));
            }
        } else if action.clear_chat_action.is_some() {
            if let Some(chat) = chat_jid() {
                self.events.emit(Event::MessagesDelete {
                    chat,
                    ids: Vec::new(),
                });
            }
        } else if action.delete_chat_action.is_some() {
            if let Some(chat) = chat_jid() {
                self.events.emit(Event::ChatsDelete(vec![chat]));
            }
        } else if action.delete_message_for_me_action.is_some() {
            if let (Some(chat), Some(message_id)) = (chat_jid(), mutation.index.get(2)) {
                self.events.emit(Event::MessagesDelete {
                    chat,
                    ids: vec![message_id.clone()],
                });
            }
        } else {
            debug!(
                target: "AppState",
                "unhandled sync action at index {:?}",
                mutation.index
            );
        }
    }

    /// Creates, pushes and persists one local app-state patch.
    pub async fn chat_modify(
        self: &Arc<Self>,
        modification: ChatModification,
    ) -> anyhow::Result<()> {
        let patch = chat_modification_to_patch(modification, self.clock.now_unix());
        self.app_patch(patch).await
    }

    pub async fn app_patch(
        self: &Arc<Self>,
        patch: crate::appstate::encode::PatchCreate,
    ) -> anyhow::Result<()> {
        let _processing = self.processing_mutex.lock().await;
        let tx = self.keys.transaction().await;
        let name = patch.collection.clone();

        // The local state must be current before stacking a new patch.
        self.resync_app_state_inner(&tx, &[&name], false).await?;

        let key_id = self
            .creds_snapshot()
            .await
            .my_app_state_key_id
            .ok_or_else(|| anyhow!("no app state sync key id"))?;
        let key_record = tx
            .get_app_state_sync_key(&key_id)
            .await?
            .ok_or_else(|| anyhow!("own app state sync key missing from store"))?;
        let keys = expand_app_state_keys(&key_record.key_data);

        let mut state = tx.get_app_state_version(&name).await?;
        let syncd_patch = encode_syncd_patch(&patch, &key_id, &keys, &mut state)?;

        // The server expects the predecessor version on the wire.
        let sync_node = NodeBuilder::new("sync")
            .children([NodeBuilder::new("collection")
                .attr("name", name.clone())
                .attr("version", (state.version - 1).to_string())
                .attr("return_snapshot", "false")
                .children([NodeBuilder::new("patch")
                    .bytes(syncd_patch.encode_to_vec())
                    .build()])
                .build()])
            .build();

        self.send_iq(InfoQuery {
            namespace: "w:sync:app:state",
            query_type: InfoQueryType::Set,
            to: Jid::server_jid(),
            target: None,
            id: None,
            content: Some(NodeContent::Nodes(vec![sync_node])),
            timeout: None,
        })
        .await
        .context("app state patch push failed")?;

        tx.set_app_state_version(&name, &state).await?;
        debug!(target: "AppState", "pushed patch to '{name}', now at v{}", state.version);

        if self.config.emit_own_events {
            let mutation = Mutation {
                operation: patch.operation,
                action: patch.value.clone(),
                index: patch.index.clone(),
                index_mac: Vec::new(),
                value_mac: Vec::new(),
            };
            self.process_sync_action(&mutation).await;
        }
        Ok(())
    }

    /// Stores keys delivered via `appStateSyncKeyShare` and remembers the
    /// newest one as ours.
    pub(crate) async fn handle_app_state_key_share(
        self: &Arc<Self>,
        tx: &KeyTransaction,
        share: &proto::AppStateSyncKeyShare,
    ) -> anyhow::Result<()> {
        let mut latest: Option<Vec<u8>> = None;
        for key in &share.keys {
            let (Some(id), Some(data)) = (
                key.key_id.as_ref().and_then(|k| k.key_id.as_deref()),
                key.key_data.as_ref(),
            ) else {
                continue;
            };
            let record = crate::store::keystore::AppStateSyncKeyRecord {
                key_data: data.key_data().to_vec(),
                fingerprint: data
                    .fingerprint
                    .as_ref()
                    .map(|f| f.encode_to_vec())
                    .unwrap_or_default(),
                timestamp: data.timestamp(),
            };
            tx.set_app_state_sync_key(id, &record).await?;
            latest = Some(id.to_vec());
        }

        if let Some(key_id) = latest {
            info!(target: "AppState", "received app state sync keys");
            self.update_creds(CredsUpdate {
                my_app_state_key_id: Some(key_id),
                ..Default::default()
            })
            .await;
        }
        Ok(())
    }
}

/// Splits a sync IQ response into per-collection patch lists. Snapshots
/// arrive inline as encoded `SyncdSnapshot` payloads; externally-hosted
/// snapshot blobs are a media-layer concern and surface as absent here.
pub fn parse_sync_response(resp: &Node) -> HashMap<String, PatchList> {
    let mut out = HashMap::new();

    let Some(sync_node) = resp.get_optional_child("sync") else {
        return out;
    };
    for collection in sync_node.get_children_by_tag("collection") {
        let mut attrs = collection.attrs();
        let name = match attrs.optional_string("name") {
            Some(name) => name.to_string(),
            None => continue,
        };
        let has_more_patches = attrs.optional_bool("has_more_patches");

        let snapshot = collection
            .get_optional_child("snapshot")
            .and_then(|n| n.content_bytes())
            .and_then(|b| proto::SyncdSnapshot::decode(b).ok());

        let mut patches = Vec::new();
        if let Some(patches_node) = collection.get_optional_child("patches") {
            for patch_node in patches_node.get_children_by_tag("patch") {
                if let Some(bytes) = patch_node.content_bytes() {
                    match proto::SyncdPatch::decode(bytes) {
                        Ok(patch) => patches.push(patch),
                        Err(e) => {
                            warn!(target: "AppState", "undecodable patch in '{name}': {e}")
                        }
                    }
                }
            }
        }

        out.insert(
            name.clone(),
            PatchList {
                name,
                has_more_patches,
                patches,
                snapshot,
            },
        );
    }
    out
}
