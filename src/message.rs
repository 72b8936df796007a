//! Inbound message handling: decryption, the upsert pipeline and the
//! history-sync bridge into app-state.

use crate::appstate::ALL_COLLECTIONS;
use crate::binary::node::Node;
use crate::client::Client;
use crate::proto;
use crate::proto::history_sync_notification::HistorySyncType;
use crate::send::{unpad_message_v2, SendOpts};
use crate::signal::CiphertextKind;
use crate::types::events::{
    ContactUpdate, CredsUpdate, Event, MessageReceipt, MessagesUpsert, PresenceUpdate,
};
use crate::types::jid::Jid;
use crate::types::message::{MessageInfo, MessageKey, ReceiptType, UpsertType};
use log::{debug, info, warn};
use prost::Message as ProtoMessage;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// History sync kinds the bridge processes; the rest are acked and
/// dropped.
pub const PROCESSABLE_HISTORY_TYPES: [HistorySyncType; 4] = [
    HistorySyncType::InitialBootstrap,
    HistorySyncType::PushName,
    HistorySyncType::Recent,
    HistorySyncType::Full,
];

/// Inbound `message` stanza: decrypt every `enc` child, then run the
/// upsert pipeline.
pub async fn handle_message_stanza(client: &Arc<Client>, node: &Node) -> bool {
    let mut attrs = node.attrs();
    let chat = attrs.non_ad_jid("from");
    let id = attrs.string("id");
    let timestamp = attrs.unix_time("t");
    let push_name = attrs.optional_string("notify").map(|s| s.to_string());
    let participant = attrs.optional_jid("participant");

    if (client.config.should_ignore_jid)(&chat) {
        debug!(target: "Client/Message", "ignoring message from {chat}");
        return true;
    }

    let me = client.creds_snapshot().await.me;
    let sender = participant.clone().unwrap_or_else(|| {
        attrs.optional_jid("from").unwrap_or_else(|| chat.clone())
    });
    let from_me = me
        .as_ref()
        .map(|me| me.is_same_user_as(&sender))
        .unwrap_or(false);

    let mut decrypted: Option<proto::Message> = None;
    if let Some(children) = node.children() {
        for enc in children.iter().filter(|c| c.tag == "enc") {
            let Some(ciphertext) = enc.content_bytes() else {
                continue;
            };
            let kind = match enc.attrs.get("type").map(String::as_str) {
                Some("pkmsg") => CiphertextKind::Pkmsg,
                Some("msg") => CiphertextKind::Msg,
                Some("skmsg") => CiphertextKind::Skmsg,
                other => {
                    debug!(target: "Client/Message", "unknown enc type {other:?}");
                    continue;
                }
            };

            let decrypt_from = if kind == CiphertextKind::Skmsg {
                participant.clone().unwrap_or_else(|| sender.clone())
            } else {
                sender.clone()
            };
            match client
                .signal
                .decrypt_message(&decrypt_from, kind, ciphertext)
                .await
            {
                Ok(padded) => match unpad_message_v2(&padded)
                    .and_then(|p| proto::Message::decode(p).map_err(Into::into))
                {
                    Ok(message) => {
                        if let Some(skdm) = &message.sender_key_distribution_message {
                            let group = skdm
                                .group_id
                                .as_deref()
                                .and_then(|g| g.parse::<Jid>().ok())
                                .unwrap_or_else(|| chat.clone());
                            if let Some(bytes) =
                                &skdm.axolotl_sender_key_distribution_message
                            {
                                if let Err(e) = client
                                    .signal
                                    .process_sender_key_distribution(&group, &sender, bytes)
                                    .await
                                {
                                    warn!(
                                        target: "Client/Message",
                                        "failed to process sender key from {sender}: {e}"
                                    );
                                }
                            }
                        }
                        decrypted = Some(message);
                    }
                    Err(e) => {
                        warn!(target: "Client/Message", "undecodable plaintext from {sender}: {e}")
                    }
                },
                Err(e) => {
                    warn!(target: "Client/Message", "decryption failed from {sender}: {e}")
                }
            }
        }
    }

    client.send_ack(node).await;

    let info = MessageInfo {
        key: MessageKey {
            remote_jid: chat,
            from_me,
            id,
            participant,
        },
        push_name,
        timestamp,
        message: decrypted,
    };
    if let Err(e) = upsert_message(client, info, UpsertType::Notify).await {
        warn!(target: "Client/Message", "upsert failed: {e:?}");
    }
    true
}

/// The upsert pipeline. Holds the processing mutex for the full cycle so
/// messages and receipts are observed in wire order.
pub async fn upsert_message(
    client: &Arc<Client>,
    info: MessageInfo,
    kind: UpsertType,
) -> anyhow::Result<()> {
    let _processing = client.processing_mutex.lock().await;

    client.events.emit(Event::MessagesUpsert(MessagesUpsert {
        messages: vec![info.clone()],
        kind,
    }));

    // Push-name propagation.
    if let Some(push_name) = &info.push_name {
        let creds = client.creds_snapshot().await;
        if info.key.from_me {
            if creds.push_name.as_deref() != Some(push_name) {
                client
                    .update_creds(CredsUpdate {
                        push_name: Some(push_name.clone()),
                        ..Default::default()
                    })
                    .await;
            }
        } else {
            let sender = info
                .key
                .participant
                .clone()
                .unwrap_or_else(|| info.key.remote_jid.clone());
            client.events.emit(Event::ContactsUpdate(ContactUpdate {
                id: sender.to_non_ad(),
                push_name: Some(push_name.clone()),
                ..Default::default()
            }));
        }
    }

    let protocol = info.message.as_ref().and_then(|m| m.protocol_message.as_ref());

    // History-sync bridge.
    let history = protocol.and_then(|p| p.history_sync_notification.as_ref());
    let history_pending = match history {
        Some(notification) => {
            let sync_type = notification.sync_type();
            let processable = PROCESSABLE_HISTORY_TYPES.contains(&sync_type)
                && (client.config.should_sync_history_message)(notification);
            if processable {
                info!(
                    target: "Client/History",
                    "history sync notification ({sync_type:?}, chunk {})",
                    notification.chunk_order()
                );
            }
            processable
        }
        None => false,
    };

    let creds = client.creds_snapshot().await;
    if history_pending && creds.my_app_state_key_id.is_none() {
        // The key has not arrived yet; remember to run the initial sync
        // as soon as it does.
        client
            .pending_app_state_sync
            .store(true, Ordering::SeqCst);
        debug!(target: "Client/History", "deferring app state sync until key share arrives");
    }

    // Key share deliveries are handled before any resync decision below.
    let mut received_key_share = false;
    if let Some(share) = protocol.and_then(|p| p.app_state_sync_key_share.as_ref()) {
        let tx = client.keys.transaction().await;
        client.handle_app_state_key_share(&tx, share).await?;
        received_key_share = true;
    }

    let creds = client.creds_snapshot().await;
    let should_initial_sync = creds.my_app_state_key_id.is_some()
        && (history_pending
            || (received_key_share && client.pending_app_state_sync.load(Ordering::SeqCst)));

    if should_initial_sync && !client.initial_resync_done.swap(true, Ordering::SeqCst) {
        let tx = client.keys.transaction().await;
        client
            .resync_app_state_inner(&tx, &ALL_COLLECTIONS, true)
            .await?;
        drop(tx);

        client.pending_app_state_sync.store(false, Ordering::SeqCst);
        client
            .update_creds(CredsUpdate {
                account_sync_counter: Some(creds.account_sync_counter + 1),
                ..Default::default()
            })
            .await;

        // Release events held since the offline preview, as one batch.
        if client.initial_flush_pending.swap(false, Ordering::SeqCst) {
            client.events.flush();
        }
    }

    Ok(())
}

/// Inbound `receipt`: surface to consumers, replay for retries, ack.
pub async fn handle_receipt(client: &Arc<Client>, node: &Node) -> bool {
    let mut attrs = node.attrs();
    let chat = attrs.non_ad_jid("from");
    let id = attrs.string("id");
    let receipt_type = ReceiptType::from_attr(attrs.optional_string("type").unwrap_or(""));
    let participant = attrs.optional_jid("participant");
    let timestamp = attrs.unix_time("t");

    {
        let _processing = client.processing_mutex.lock().await;
        client
            .events
            .emit(Event::MessageReceiptUpdate(MessageReceipt {
                chat: chat.clone(),
                sender: participant.clone(),
                message_ids: vec![id.clone()],
                receipt_type,
                timestamp,
            }));
    }

    if receipt_type == ReceiptType::Retry {
        let retry_client = client.clone();
        let retry_chat = chat.clone();
        let retry_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) =
                handle_retry_receipt(&retry_client, retry_chat, retry_id, participant).await
            {
                warn!(target: "Client/Retry", "retry resend failed: {e:?}");
            }
        });
    }

    client.send_ack(node).await;
    true
}

/// Re-encrypts the original message for exactly the device that failed
/// to decrypt it.
async fn handle_retry_receipt(
    client: &Arc<Client>,
    chat: Jid,
    message_id: String,
    participant: Option<Jid>,
) -> anyhow::Result<()> {
    let target = participant.ok_or_else(|| anyhow::anyhow!("retry receipt without participant"))?;

    let key = MessageKey {
        remote_jid: chat.clone(),
        from_me: true,
        id: message_id.clone(),
        participant: None,
    };
    let Some(original) = (client.config.get_message)(&key) else {
        warn!(
            target: "Client/Retry",
            "no stored copy of {message_id}, cannot satisfy retry"
        );
        return Ok(());
    };

    info!(target: "Client/Retry", "re-sending {message_id} to {target} only");
    client
        .relay_message(
            chat,
            original,
            SendOpts {
                message_id: Some(message_id),
                participant: Some(target),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

/// Inbound `notification`: cache invalidation and pre-key maintenance.
pub async fn handle_notification(client: &Arc<Client>, node: &Node) -> bool {
    let mut attrs = node.attrs();
    let notif_type = attrs.optional_string("type").unwrap_or("").to_string();

    if notif_type == "encrypt" {
        // Server-side pre-key pool ran low.
        let upload_client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = upload_client.upload_prekeys().await {
                warn!(target: "Client/PreKeys", "re-upload after depletion failed: {e:?}");
            }
        });
    }

    // Any device-list change makes the cached fanout sets stale.
    if node.get_optional_child("device-list").is_some() {
        let from = attrs.non_ad_jid("from");
        debug!(target: "Client/USync", "device list changed for {from}, dropping cache");
        client.device_cache.invalidate(&from.user);
    }

    client.send_ack(node).await;
    true
}

/// `presence` and `chatstate` stanzas.
pub async fn handle_presence(client: &Arc<Client>, node: &Node) -> bool {
    let mut attrs = node.attrs();
    let from = attrs.non_ad_jid("from");
    let unavailable = attrs.optional_string("type") == Some("unavailable");
    let last_seen = attrs.optional_i64("last");

    client.events.emit(Event::PresenceUpdate(PresenceUpdate {
        from,
        unavailable,
        last_seen,
    }));
    true
}
