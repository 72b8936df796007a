use crate::types::jid::{Jid, MessageId};
use serde::Serialize;

/// Addressing metadata of one message, carried alongside the decoded
/// protobuf payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageKey {
    pub remote_jid: Jid,
    pub from_me: bool,
    pub id: MessageId,
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageInfo {
    pub key: MessageKey,
    pub push_name: Option<String>,
    pub timestamp: i64,
    #[serde(skip)]
    pub message: Option<crate::proto::Message>,
}

/// How a message entered the store; mirrors the wire-side distinction
/// between live traffic and history backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpsertType {
    Notify,
    Append,
}

/// The `edit` stanza attribute on relayed messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EditAttribute {
    #[default]
    Empty,
    /// Sender-side delete of a 1-1 or own group message.
    MessageEdit,
    /// Admin delete of another participant's group message.
    AdminEdit,
}

impl EditAttribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditAttribute::Empty => "",
            EditAttribute::MessageEdit => "7",
            EditAttribute::AdminEdit => "8",
        }
    }
}

/// Receipt classification from the `type` attribute of `receipt` stanzas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReceiptType {
    Delivered,
    Read,
    ReadSelf,
    Played,
    Retry,
    ServerError,
}

impl ReceiptType {
    pub fn from_attr(value: &str) -> Self {
        match value {
            "read" => ReceiptType::Read,
            "read-self" => ReceiptType::ReadSelf,
            "played" => ReceiptType::Played,
            "retry" => ReceiptType::Retry,
            "server-error" => ReceiptType::ServerError,
            _ => ReceiptType::Delivered,
        }
    }
}
