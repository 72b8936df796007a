//! Message relay: device fanout, per-device Signal encryption, group
//! sender-key economy and retry isolation.

use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::proto;
use crate::signal::CiphertextKind;
use crate::store::KeyTransaction;
use crate::types::jid::Jid;
use crate::types::message::EditAttribute;
use anyhow::{anyhow, Context};
use base64::prelude::*;
use log::{debug, info};
use prost::Message as ProtoMessage;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

/// Options for one relay call.
#[derive(Debug, Clone, Default)]
pub struct SendOpts {
    pub message_id: Option<String>,
    /// Retry receipt case: re-encrypt for exactly this device.
    pub participant: Option<Jid>,
    pub edit: EditAttribute,
    pub additional_attrs: Vec<(String, String)>,
}

/// Signal v2 message padding: 1..=15 copies of the pad length byte.
pub fn pad_message_v2(mut plaintext: Vec<u8>) -> Vec<u8> {
    let mut pad = rand::thread_rng().gen::<u8>() & 0x0F;
    if pad == 0 {
        pad = 0x0F;
    }
    plaintext.extend(std::iter::repeat(pad).take(pad as usize));
    plaintext
}

pub fn unpad_message_v2(padded: &[u8]) -> anyhow::Result<&[u8]> {
    let pad = *padded.last().ok_or_else(|| anyhow!("empty padded message"))? as usize;
    if pad == 0 || pad > padded.len() {
        return Err(anyhow!("invalid message padding"));
    }
    Ok(&padded[..padded.len() - pad])
}

/// Hash over the sorted participant device list, sent as `phash` when a
/// group stanza includes key distribution.
pub fn participant_list_hash(devices: &[Jid]) -> String {
    let mut strings: Vec<String> = devices.iter().map(|j| j.to_string()).collect();
    strings.sort();
    let digest = Sha256::digest(strings.join("").as_bytes());
    format!("2:{}", BASE64_STANDARD.encode(&digest[..6]))
}

struct EncryptedRecipient {
    node: Node,
    used_prekey: bool,
}

impl Client {
    /// Relays a message to a chat, fanning out to every target device.
    /// Delivery is reported later through receipts; this returns as soon
    /// as the stanza is on the wire.
    pub async fn relay_message(
        self: &Arc<Self>,
        to: Jid,
        message: proto::Message,
        opts: SendOpts,
    ) -> anyhow::Result<String> {
        let to = to.normalized();
        let is_group = to.is_group();
        let message_id = match &opts.message_id {
            Some(id) => id.clone(),
            None => self.generate_message_id().await,
        };

        let me = self
            .creds_snapshot()
            .await
            .me
            .ok_or_else(|| anyhow!("not logged in"))?;

        let message = (self.config.patch_message_before_sending)(message, &[to.clone()]);

        let tx = self.keys.transaction().await;
        let stanza = if is_group {
            self.prepare_group_stanza(&tx, &me, &to, &message, &message_id, &opts)
                .await?
        } else {
            self.prepare_dm_stanza(&tx, &me, &to, &message, &message_id, &opts)
                .await?
        };
        drop(tx);

        self.send_node(&stanza).await?;
        Ok(message_id)
    }

    async fn prepare_dm_stanza(
        self: &Arc<Self>,
        tx: &KeyTransaction,
        me: &Jid,
        to: &Jid,
        message: &proto::Message,
        message_id: &str,
        opts: &SendOpts,
    ) -> anyhow::Result<Node> {
        let mut stanza_attrs: Vec<(String, String)> = vec![
            ("id".into(), message_id.to_string()),
            ("to".into(), to.to_string()),
            ("type".into(), "text".into()),
        ];

        let all_devices = match &opts.participant {
            Some(participant) => {
                // Retry: one device, no fanout.
                stanza_attrs.push(("device_fanout".into(), "false".into()));
                vec![participant.clone()]
            }
            None => {
                let targets = [to.to_non_ad(), me.to_non_ad()];
                self.get_user_devices(&targets).await?
            }
        };

        // Never encrypt to the device doing the sending.
        let own_address = me.signal_address();
        let recipients: Vec<Jid> = all_devices
            .into_iter()
            .filter(|d| d.signal_address() != own_address)
            .collect();

        self.assert_sessions(tx, &recipients, false).await?;

        // Own sibling devices see the message wrapped as self-sent.
        let dsm = proto::Message {
            device_sent_message: Some(Box::new(proto::message::DeviceSentMessage {
                destination_jid: Some(to.to_string()),
                message: Some(Box::new(message.clone())),
                phash: Some(String::new()),
            })),
            ..Default::default()
        };
        let peer_plaintext = pad_message_v2(message.encode_to_vec());
        let own_plaintext = pad_message_v2(dsm.encode_to_vec());

        let encrypt_tasks = recipients.iter().map(|device| {
            let plaintext = if device.is_same_user_as(me) {
                own_plaintext.clone()
            } else {
                peer_plaintext.clone()
            };
            self.encrypt_for_device(device.clone(), plaintext)
        });
        let encrypted = futures_util::future::try_join_all(encrypt_tasks).await?;

        let includes_prekey = encrypted.iter().any(|r| r.used_prekey);
        let participant_nodes: Vec<Node> = encrypted.into_iter().map(|r| r.node).collect();

        let mut children = vec![NodeBuilder::new("participants")
            .children(participant_nodes)
            .build()];
        self.append_common_children(&mut children, message, includes_prekey)
            .await;
        append_edit_attr(&mut stanza_attrs, opts);
        for (k, v) in &opts.additional_attrs {
            stanza_attrs.push((k.clone(), v.clone()));
        }

        debug!(target: "Client/Send", "relaying dm {message_id} to {to}");
        Ok(NodeBuilder::new("message")
            .attrs(stanza_attrs)
            .children(children)
            .build())
    }

    async fn prepare_group_stanza(
        self: &Arc<Self>,
        tx: &KeyTransaction,
        me: &Jid,
        group: &Jid,
        message: &proto::Message,
        message_id: &str,
        opts: &SendOpts,
    ) -> anyhow::Result<Node> {
        let participants = self
            .group_participants(group)
            .await
            .context("group metadata unavailable")?;

        let mut fanout_targets: Vec<Jid> = participants;
        let own_base = me.to_non_ad();
        if !fanout_targets.iter().any(|p| p.is_same_user_as(&own_base)) {
            fanout_targets.push(own_base.clone());
        }

        let all_devices = match &opts.participant {
            Some(participant) => vec![participant.clone()],
            None => self.get_user_devices(&fanout_targets).await?,
        };
        let own_address = me.signal_address();
        let devices: Vec<Jid> = all_devices
            .into_iter()
            .filter(|d| d.signal_address() != own_address)
            .collect();

        // Encrypt the payload with the group sender key first; the
        // repository mints a fresh key when none exists yet.
        let plaintext = pad_message_v2(message.encode_to_vec());
        let group_payload = self
            .signal
            .encrypt_group_message(group, me, &plaintext)
            .await?;

        // Distribute the sender key only to devices that do not have the
        // current one. A retry re-targets its single device regardless.
        let is_retry = opts.participant.is_some();
        let mut memory = tx.get_sender_key_memory(&group.to_string()).await?;
        let skdm_targets: Vec<Jid> = devices
            .iter()
            .filter(|d| is_retry || !memory.contains(&d.to_string()))
            .cloned()
            .collect();

        let mut includes_prekey = false;
        let mut children = Vec::new();

        if !skdm_targets.is_empty() {
            self.assert_sessions(tx, &skdm_targets, false).await?;

            let skdm_wrapper = proto::Message {
                sender_key_distribution_message: Some(
                    proto::message::SenderKeyDistributionMessage {
                        group_id: Some(group.to_string()),
                        axolotl_sender_key_distribution_message: Some(
                            group_payload.distribution_message.clone(),
                        ),
                    },
                ),
                ..Default::default()
            };
            let skdm_plaintext = pad_message_v2(skdm_wrapper.encode_to_vec());

            let encrypt_tasks = skdm_targets
                .iter()
                .map(|device| self.encrypt_for_device(device.clone(), skdm_plaintext.clone()));
            let encrypted = futures_util::future::try_join_all(encrypt_tasks).await?;

            includes_prekey = encrypted.iter().any(|r| r.used_prekey);
            let participant_nodes: Vec<Node> = encrypted.into_iter().map(|r| r.node).collect();
            children.push(
                NodeBuilder::new("participants")
                    .children(participant_nodes)
                    .build(),
            );

            for target in &skdm_targets {
                memory.insert(target.to_string());
            }
            tx.set_sender_key_memory(&group.to_string(), &memory).await?;
            info!(
                target: "Client/Send",
                "distributed sender key for {group} to {} devices",
                skdm_targets.len()
            );
        }

        // The single group payload envelope.
        children.push(
            NodeBuilder::new("enc")
                .attr("v", "2")
                .attr("type", CiphertextKind::Skmsg.as_str())
                .bytes(group_payload.ciphertext)
                .build(),
        );
        self.append_common_children(&mut children, message, includes_prekey)
            .await;

        let mut stanza_attrs: Vec<(String, String)> = vec![
            ("id".into(), message_id.to_string()),
            ("to".into(), group.to_string()),
            ("type".into(), "text".into()),
        ];
        if !skdm_targets.is_empty() {
            stanza_attrs.push(("phash".into(), participant_list_hash(&devices)));
        }
        append_edit_attr(&mut stanza_attrs, opts);
        for (k, v) in &opts.additional_attrs {
            stanza_attrs.push((k.clone(), v.clone()));
        }

        debug!(target: "Client/Send", "relaying group message {message_id} to {group}");
        Ok(NodeBuilder::new("message")
            .attrs(stanza_attrs)
            .children(children)
            .build())
    }

    async fn encrypt_for_device(
        self: &Arc<Self>,
        device: Jid,
        plaintext: Vec<u8>,
    ) -> anyhow::Result<EncryptedRecipient> {
        let payload = self.signal.encrypt_message(&device, &plaintext).await?;
        let used_prekey = payload.kind == CiphertextKind::Pkmsg;

        let enc_node = NodeBuilder::new("enc")
            .attr("v", "2")
            .attr("type", payload.kind.as_str())
            .bytes(payload.ciphertext)
            .build();
        let node = NodeBuilder::new("to")
            .attr("jid", device.to_string())
            .children([enc_node])
            .build();
        Ok(EncryptedRecipient { node, used_prekey })
    }

    /// `device-identity` travels whenever any recipient got a pkmsg;
    /// templated content additionally needs its `biz` marker.
    async fn append_common_children(
        self: &Arc<Self>,
        children: &mut Vec<Node>,
        message: &proto::Message,
        includes_prekey: bool,
    ) {
        if includes_prekey {
            if let Some(account) = self.creds_snapshot().await.account {
                children.push(NodeBuilder::new("device-identity").bytes(account).build());
            }
        }
        if let Some(button_type) = message.button_type() {
            children.push(
                NodeBuilder::new("biz")
                    .children([NodeBuilder::new(button_type).build()])
                    .build(),
            );
        }
    }

    async fn group_participants(self: &Arc<Self>, group: &Jid) -> anyhow::Result<Vec<Jid>> {
        let resolver = self
            .group_resolver()
            .ok_or_else(|| anyhow!("no group metadata resolver configured"))?;
        resolver.participants(group).await
    }
}

fn append_edit_attr(attrs: &mut Vec<(String, String)>, opts: &SendOpts) {
    if opts.edit != EditAttribute::Empty {
        attrs.push(("edit".into(), opts.edit.as_str().into()));
    }
}

/// Extracts the set of recipient device JIDs from an assembled stanza,
/// used by tests and retry accounting.
pub fn stanza_recipients(stanza: &Node) -> HashSet<String> {
    let mut out = HashSet::new();
    if let Some(participants) = stanza.get_optional_child("participants") {
        for to_node in participants.get_children_by_tag("to") {
            if let Some(jid) = to_node.attrs.get("jid") {
                out.insert(jid.clone());
            }
        }
    }
    out
}

/// Ciphertext kinds present in a stanza, mapped per recipient.
pub fn stanza_enc_types(stanza: &Node) -> Vec<(Option<String>, String)> {
    let mut out = Vec::new();
    let empty = Vec::new();
    let children = match &stanza.content {
        Some(NodeContent::Nodes(nodes)) => nodes,
        _ => &empty,
    };
    for child in children {
        match child.tag.as_str() {
            "enc" => {
                if let Some(t) = child.attrs.get("type") {
                    out.push((None, t.clone()));
                }
            }
            "participants" => {
                for to_node in child.get_children_by_tag("to") {
                    let jid = to_node.attrs.get("jid").cloned();
                    if let Some(enc) = to_node.get_optional_child("enc") {
                        if let Some(t) = enc.attrs.get("type") {
                            out.push((jid.clone(), t.clone()));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_roundtrip() {
        for _ in 0..50 {
            let padded = pad_message_v2(b"payload".to_vec());
            assert!(padded.len() > 7 && padded.len() <= 7 + 15);
            assert_eq!(unpad_message_v2(&padded).unwrap(), b"payload");
        }
    }

    #[test]
    fn participant_hash_is_order_invariant() {
        let a: Jid = "1:1@s.whatsapp.net".parse().unwrap();
        let b: Jid = "2:0@s.whatsapp.net".parse().unwrap();
        let h1 = participant_list_hash(&[a.clone(), b.clone()]);
        let h2 = participant_list_hash(&[b, a]);
        assert_eq!(h1, h2);
        assert!(h1.starts_with("2:"));
    }

    #[test]
    fn stanza_helpers_read_recipients() {
        let stanza = NodeBuilder::new("message")
            .children([
                NodeBuilder::new("participants")
                    .children([NodeBuilder::new("to")
                        .attr("jid", "1:2@s.whatsapp.net")
                        .children([NodeBuilder::new("enc")
                            .attr("type", "pkmsg")
                            .bytes(vec![1])
                            .build()])
                        .build()])
                    .build(),
                NodeBuilder::new("enc")
                    .attr("type", "skmsg")
                    .bytes(vec![2])
                    .build(),
            ])
            .build();

        assert!(stanza_recipients(&stanza).contains("1:2@s.whatsapp.net"));
        let types = stanza_enc_types(&stanza);
        assert!(types.contains(&(Some("1:2@s.whatsapp.net".into()), "pkmsg".into())));
        assert!(types.contains(&(None, "skmsg".into())));
    }
}
