//! Pre-key lifecycle and session prefetch.
//!
//! Identifiers are dense integers. `first_unuploaded_pre_key_id` trails
//! `next_pre_key_id`; uploads advance the former, generation the latter.

use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::crypto::key_pair::PreKey;
use crate::request::{InfoQuery, InfoQueryType};
use crate::signal::PreKeyBundle;
use crate::store::{namespace, KeyTransaction};
use crate::types::events::CredsUpdate;
use crate::types::jid::Jid;
use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use std::collections::HashMap;

/// Below this server-side count the client tops pre-keys up.
pub const MIN_PREKEY_COUNT: u32 = 5;
/// How many keys an upload aims to have outstanding.
pub const WANTED_PREKEY_COUNT: u32 = 50;

fn prekey_store_key(id: u32) -> String {
    id.to_string()
}

/// Encodes a pre-key id as the 3-byte big-endian wire form.
fn prekey_id_bytes(id: u32) -> Vec<u8> {
    id.to_be_bytes()[1..].to_vec()
}

fn prekey_to_node(prekey: &PreKey) -> Node {
    NodeBuilder::new("key")
        .children([
            NodeBuilder::new("id").bytes(prekey_id_bytes(prekey.key_id)).build(),
            NodeBuilder::new("value")
                .bytes(prekey.key_pair.public_key.to_vec())
                .build(),
        ])
        .build()
}

impl Client {
    /// Ensures `count` unuploaded pre-keys exist, generating the missing
    /// tail from `next_pre_key_id`. Returns them in id order together
    /// with the last id of the range.
    pub async fn generate_or_get_prekeys(
        &self,
        tx: &KeyTransaction,
        count: u32,
    ) -> anyhow::Result<(Vec<PreKey>, u32)> {
        let creds = self.creds_snapshot().await;
        let first = creds.first_unuploaded_pre_key_id;
        let last = first + count - 1;

        if creds.next_pre_key_id <= last {
            debug!(
                target: "Client/PreKeys",
                "generating pre-keys {}..={last}",
                creds.next_pre_key_id
            );
            for id in creds.next_pre_key_id..=last {
                let prekey = PreKey::new(id);
                tx.set(
                    namespace::PRE_KEY,
                    &prekey_store_key(id),
                    Some(serde_json::to_vec(&prekey)?),
                )
                .await?;
            }
            self.update_creds(CredsUpdate {
                next_pre_key_id: Some(last + 1),
                ..Default::default()
            })
            .await;
        }

        let mut prekeys = Vec::with_capacity(count as usize);
        for id in first..=last {
            let raw = tx
                .get(namespace::PRE_KEY, &prekey_store_key(id))
                .await?
                .ok_or_else(|| anyhow!("pre-key {id} missing from store"))?;
            prekeys.push(serde_json::from_slice(&raw)?);
        }
        Ok((prekeys, last))
    }

    /// Queries the server-side count and uploads a fresh batch when it
    /// has run low.
    pub async fn upload_prekeys_if_needed(self: &std::sync::Arc<Self>) -> anyhow::Result<()> {
        let resp = self
            .send_iq(InfoQuery {
                namespace: "encrypt",
                query_type: InfoQueryType::Get,
                to: Jid::server_jid(),
                target: None,
                id: None,
                content: Some(NodeContent::Nodes(vec![NodeBuilder::new("count").build()])),
                timeout: None,
            })
            .await
            .context("pre-key count query failed")?;

        let count = resp
            .get_optional_child("count")
            .and_then(|n| n.attrs.get("value").cloned())
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        debug!(target: "Client/PreKeys", "server holds {count} pre-keys");

        if count > MIN_PREKEY_COUNT {
            return Ok(());
        }
        self.upload_prekeys().await
    }

    pub async fn upload_prekeys(self: &std::sync::Arc<Self>) -> anyhow::Result<()> {
        let tx = self.keys.transaction().await;
        let (prekeys, last_prekey_id) =
            self.generate_or_get_prekeys(&tx, WANTED_PREKEY_COUNT).await?;
        let creds = self.creds_snapshot().await;

        let key_nodes: Vec<Node> = prekeys.iter().map(prekey_to_node).collect();
        let signed = &creds.signed_pre_key;
        let skey_node = NodeBuilder::new("skey")
            .children([
                NodeBuilder::new("id").bytes(prekey_id_bytes(signed.key_id)).build(),
                NodeBuilder::new("value")
                    .bytes(signed.key_pair.public_key.to_vec())
                    .build(),
                NodeBuilder::new("signature")
                    .bytes(signed.signature.clone().unwrap_or_default())
                    .build(),
            ])
            .build();

        info!(target: "Client/PreKeys", "uploading {} pre-keys", key_nodes.len());
        self.send_iq(InfoQuery {
            namespace: "encrypt",
            query_type: InfoQueryType::Set,
            to: Jid::server_jid(),
            target: None,
            id: None,
            content: Some(NodeContent::Nodes(vec![
                NodeBuilder::new("registration")
                    .bytes(creds.registration_id.to_be_bytes().to_vec())
                    .build(),
                NodeBuilder::new("type").bytes(vec![5]).build(),
                NodeBuilder::new("identity")
                    .bytes(creds.signed_identity_key.public_key.to_vec())
                    .build(),
                NodeBuilder::new("list").children(key_nodes).build(),
                skey_node,
            ])),
            timeout: None,
        })
        .await
        .context("pre-key upload failed")?;

        let first = creds.first_unuploaded_pre_key_id;
        self.update_creds(CredsUpdate {
            first_unuploaded_pre_key_id: Some(first.max(last_prekey_id + 1)),
            ..Default::default()
        })
        .await;
        Ok(())
    }

    /// Makes sure a Signal session exists for every listed device,
    /// fetching and injecting bundles for the missing ones. Returns
    /// whether anything new was fetched.
    pub async fn assert_sessions(
        self: &std::sync::Arc<Self>,
        tx: &KeyTransaction,
        jids: &[Jid],
        force: bool,
    ) -> anyhow::Result<bool> {
        let mut to_fetch = Vec::new();
        for jid in jids {
            if force || !tx.has_session(&jid.signal_address()).await? {
                to_fetch.push(jid.clone());
            }
        }
        if to_fetch.is_empty() {
            return Ok(false);
        }

        debug!(target: "Client/PreKeys", "fetching bundles for {} devices", to_fetch.len());
        let bundles = self.fetch_prekey_bundles(&to_fetch).await?;
        for jid in &to_fetch {
            match bundles.get(jid) {
                Some(bundle) => {
                    self.signal.inject_e2e_session(jid, bundle).await?;
                    // The repository owns the record; the namespace entry
                    // marks the session as established.
                    tx.set(
                        namespace::SESSION,
                        &jid.signal_address(),
                        Some(Vec::new()),
                    )
                    .await?;
                }
                None => warn!(target: "Client/PreKeys", "no bundle returned for {jid}"),
            }
        }
        Ok(true)
    }

    pub async fn fetch_prekey_bundles(
        self: &std::sync::Arc<Self>,
        jids: &[Jid],
    ) -> anyhow::Result<HashMap<Jid, PreKeyBundle>> {
        let user_nodes: Vec<Node> = jids
            .iter()
            .map(|jid| NodeBuilder::new("user").attr("jid", jid.to_string()).build())
            .collect();

        let resp = self
            .send_iq(InfoQuery {
                namespace: "encrypt",
                query_type: InfoQueryType::Get,
                to: Jid::server_jid(),
                target: None,
                id: None,
                content: Some(NodeContent::Nodes(vec![
                    NodeBuilder::new("key").children(user_nodes).build(),
                ])),
                timeout: None,
            })
            .await
            .context("pre-key fetch failed")?;

        parse_prekeys_response(&resp)
    }
}

pub fn parse_prekeys_response(resp: &Node) -> anyhow::Result<HashMap<Jid, PreKeyBundle>> {
    let list_node = resp
        .get_optional_child("list")
        .ok_or_else(|| anyhow!("<list> not found in pre-key response"))?;

    let mut bundles = HashMap::new();
    for user_node in list_node.get_children_by_tag("user") {
        let mut attrs = user_node.attrs();
        let jid = attrs.jid("jid");
        match node_to_prekey_bundle(&jid, user_node) {
            Ok(bundle) => {
                bundles.insert(jid, bundle);
            }
            Err(e) => warn!(target: "Client/PreKeys", "skipping bundle for {jid}: {e}"),
        }
    }
    Ok(bundles)
}

fn node_to_prekey_bundle(jid: &Jid, node: &Node) -> anyhow::Result<PreKeyBundle> {
    if let Some(error_node) = node.get_optional_child("error") {
        return Err(anyhow!("error fetching pre-keys: {error_node}"));
    }

    let registration_bytes = child_bytes(node, "registration")?;
    if registration_bytes.len() != 4 {
        return Err(anyhow!("invalid registration id length"));
    }
    let registration_id = u32::from_be_bytes(registration_bytes.try_into().unwrap());

    let keys_node = node.get_optional_child("keys").unwrap_or(node);

    let identity_key: [u8; 32] = child_bytes(keys_node, "identity")?
        .try_into()
        .map_err(|v: Vec<u8>| anyhow!("invalid identity key length {}", v.len()))?;

    let pre_key = match keys_node.get_optional_child("key") {
        Some(pre_key_node) => node_to_prekey(pre_key_node)?,
        None => None,
    };

    let skey_node = keys_node
        .get_optional_child("skey")
        .ok_or_else(|| anyhow!("missing signed pre-key"))?;
    let (signed_pre_key_id, signed_pre_key) =
        node_to_prekey(skey_node)?.ok_or_else(|| anyhow!("signed pre-key missing id"))?;
    let signature = child_bytes(skey_node, "signature")?;
    if signature.len() != 64 {
        return Err(anyhow!("invalid signed pre-key signature length"));
    }

    Ok(PreKeyBundle {
        jid: jid.clone(),
        registration_id,
        identity_key,
        signed_pre_key_id,
        signed_pre_key,
        signed_pre_key_signature: signature,
        pre_key,
    })
}

fn child_bytes(node: &Node, tag: &str) -> anyhow::Result<Vec<u8>> {
    node.get_optional_child(tag)
        .and_then(|n| n.content_bytes())
        .map(|b| b.to_vec())
        .ok_or_else(|| anyhow!("expected bytes in <{tag}>"))
}

fn node_to_prekey(node: &Node) -> anyhow::Result<Option<(u32, [u8; 32])>> {
    let id_bytes = match node
        .get_optional_child("id")
        .and_then(|n| n.content_bytes())
    {
        Some(b) if !b.is_empty() => b,
        _ => return Ok(None),
    };
    let id = if id_bytes.len() == 3 {
        u32::from_be_bytes([0, id_bytes[0], id_bytes[1], id_bytes[2]])
    } else if let Ok(s) = std::str::from_utf8(id_bytes) {
        u32::from_str_radix(s.trim(), 16)?
    } else {
        return Err(anyhow!("pre-key id is neither 3-byte int nor hex"));
    };

    let value: [u8; 32] = child_bytes(node, "value")?
        .try_into()
        .map_err(|v: Vec<u8>| anyhow!("invalid pre-key value length {}", v.len()))?;
    Ok(Some((id, value)))
}
