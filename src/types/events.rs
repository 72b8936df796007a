use crate::error::DisconnectReason;
use crate::types::jid::Jid;
use crate::types::message::{MessageInfo, ReceiptType, UpsertType};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection lifecycle as surfaced to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastDisconnect {
    pub reason: DisconnectReason,
    pub date: DateTime<Utc>,
}

/// Partial connection status. Fields left `None` mean "unchanged";
/// buffered updates merge field-wise.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    pub qr: Option<String>,
    pub is_new_login: Option<bool>,
    pub is_online: Option<bool>,
    pub received_pending_notifications: Option<bool>,
    pub last_disconnect: Option<LastDisconnect>,
}

/// Partial credential mutation. The core is the only writer; consumers
/// persist whatever arrives here. Shallow-merged when buffered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CredsUpdate {
    pub me: Option<Jid>,
    pub push_name: Option<String>,
    pub platform: Option<String>,
    pub account: Option<Vec<u8>>,
    pub my_app_state_key_id: Option<Vec<u8>>,
    pub next_pre_key_id: Option<u32>,
    pub first_unuploaded_pre_key_id: Option<u32>,
    pub account_sync_counter: Option<u64>,
    pub last_account_sync_timestamp: Option<i64>,
}

impl CredsUpdate {
    /// Field-wise shallow merge: later values win.
    pub fn merge(&mut self, other: CredsUpdate) {
        macro_rules! take {
            ($f:ident) => {
                if other.$f.is_some() {
                    self.$f = other.$f;
                }
            };
        }
        take!(me);
        take!(push_name);
        take!(platform);
        take!(account);
        take!(my_app_state_key_id);
        take!(next_pre_key_id);
        take!(first_unuploaded_pre_key_id);
        take!(account_sync_counter);
        take!(last_account_sync_timestamp);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesUpsert {
    pub messages: Vec<MessageInfo>,
    pub kind: UpsertType,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatUpdate {
    pub id: Jid,
    pub archived: Option<bool>,
    pub pinned: Option<bool>,
    pub mute_end_timestamp: Option<i64>,
    pub name: Option<String>,
    pub marked_read: Option<bool>,
}

impl ChatUpdate {
    pub fn merge(&mut self, other: ChatUpdate) {
        macro_rules! take {
            ($f:ident) => {
                if other.$f.is_some() {
                    self.$f = other.$f;
                }
            };
        }
        take!(archived);
        take!(pinned);
        take!(mute_end_timestamp);
        take!(name);
        take!(marked_read);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ContactUpdate {
    pub id: Jid,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub push_name: Option<String>,
}

impl ContactUpdate {
    pub fn merge(&mut self, other: ContactUpdate) {
        macro_rules! take {
            ($f:ident) => {
                if other.$f.is_some() {
                    self.$f = other.$f;
                }
            };
        }
        take!(full_name);
        take!(first_name);
        take!(push_name);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReceipt {
    pub chat: Jid,
    pub sender: Option<Jid>,
    pub message_ids: Vec<String>,
    pub receipt_type: ReceiptType,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStarred {
    pub chat: Jid,
    pub message_id: String,
    pub starred: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceUpdate {
    pub from: Jid,
    pub unavailable: bool,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageMediaUpdate {
    pub chat: Jid,
    pub message_id: String,
    /// Re-uploaded media ciphertext location, when the retry succeeded.
    pub direct_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReaction {
    pub chat: Jid,
    pub message_id: String,
    pub sender: Jid,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupUpdate {
    pub id: Jid,
    pub subject: Option<String>,
    pub participants: Option<Vec<Jid>>,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(CredsUpdate),
    MessagesUpsert(MessagesUpsert),
    MessagesUpdate { chat: Jid, ids: Vec<String> },
    MessagesDelete { chat: Jid, ids: Vec<String> },
    MessagesStar(MessageStarred),
    MessagesMediaUpdate(MessageMediaUpdate),
    MessagesReaction(MessageReaction),
    MessageReceiptUpdate(MessageReceipt),
    ChatsUpsert(Vec<ChatUpdate>),
    ChatsUpdate(ChatUpdate),
    ChatsDelete(Vec<Jid>),
    ContactsUpsert(Vec<ContactUpdate>),
    ContactsUpdate(ContactUpdate),
    GroupsUpsert(Vec<GroupUpdate>),
    GroupsUpdate(GroupUpdate),
    PresenceUpdate(PresenceUpdate),
    BlocklistSet { jids: Vec<Jid> },
    BlocklistUpdate { jid: Jid, blocked: bool },
}

impl Event {
    /// Channel key used for buffering order and coalescing.
    pub fn channel(&self) -> &'static str {
        match self {
            Event::ConnectionUpdate(_) => "connection.update",
            Event::CredsUpdate(_) => "creds.update",
            Event::MessagesUpsert(_) => "messages.upsert",
            Event::MessagesUpdate { .. } => "messages.update",
            Event::MessagesDelete { .. } => "messages.delete",
            Event::MessagesStar(_) => "messages.star",
            Event::MessagesMediaUpdate(_) => "messages.media-update",
            Event::MessagesReaction(_) => "messages.reaction",
            Event::MessageReceiptUpdate(_) => "message-receipt.update",
            Event::ChatsUpsert(_) => "chats.upsert",
            Event::ChatsUpdate(_) => "chats.update",
            Event::ChatsDelete(_) => "chats.delete",
            Event::ContactsUpsert(_) => "contacts.upsert",
            Event::ContactsUpdate(_) => "contacts.update",
            Event::GroupsUpsert(_) => "groups.upsert",
            Event::GroupsUpdate(_) => "groups.update",
            Event::PresenceUpdate(_) => "presence.update",
            Event::BlocklistSet { .. } => "blocklist.set",
            Event::BlocklistUpdate { .. } => "blocklist.update",
        }
    }
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}
