//! Static token dictionaries for tag/attribute compression.
//!
//! Index positions are wire protocol; entries must never be reordered
//! within a dictionary version. Indices outside the tables are reserved.

use std::collections::HashMap;
use std::sync::LazyLock;

pub const DICT_VERSION: u8 = 3;

// Special tags sharing the single-byte token space.
pub const LIST_EMPTY: u8 = 0;
pub const DICTIONARY_0: u8 = 236;
pub const DICTIONARY_1: u8 = 237;
pub const DICTIONARY_2: u8 = 238;
pub const DICTIONARY_3: u8 = 239;
pub const AD_JID: u8 = 247;
pub const LIST_8: u8 = 248;
pub const LIST_16: u8 = 249;
pub const JID_PAIR: u8 = 250;
pub const HEX_8: u8 = 251;
pub const BINARY_8: u8 = 252;
pub const BINARY_20: u8 = 253;
pub const BINARY_32: u8 = 254;
pub const NIBBLE_8: u8 = 255;

pub const PACKED_MAX: u8 = 127;

/// Primary token table. Index 0 is the empty string; the tail of the
/// byte space (236..=255) is claimed by the special tags above.
pub const SINGLE_BYTE_TOKENS: &[&str] = &[
    "",
    "xmlstreamstart",
    "xmlstreamend",
    "s.whatsapp.net",
    "type",
    "participant",
    "from",
    "receipt",
    "id",
    "broadcast",
    "status",
    "message",
    "notification",
    "notify",
    "to",
    "jid",
    "user",
    "class",
    "offline",
    "g.us",
    "result",
    "mediatype",
    "enc",
    "skmsg",
    "off_cnt",
    "xmlns",
    "presence",
    "participant2",
    "ack",
    "t",
    "iq",
    "device_hash",
    "read",
    "value",
    "media",
    "picture",
    "chatstate",
    "unavailable",
    "text",
    "urn:xmpp:whatsapp:push",
    "devices",
    "verified_name",
    "contact",
    "composing",
    "edge_routing",
    "routing_info",
    "item",
    "image",
    "verified_level",
    "get",
    "fallback_hostname",
    "2",
    "media_conn",
    "1",
    "v",
    "handshake",
    "fallback_class",
    "count",
    "config",
    "offline_preview",
    "download_buckets",
    "w:profile:picture",
    "set",
    "creation",
    "location",
    "fallback_ip4",
    "msg",
    "urn:xmpp:ping",
    "fallback_ip6",
    "call-creator",
    "relaylatency",
    "success",
    "subscribe",
    "video",
    "business_hours_config",
    "platform",
    "hostname",
    "version",
    "unknown",
    "0",
    "ping",
    "hash",
    "edit",
    "subject",
    "max_buckets",
    "download",
    "delivery",
    "props",
    "sticker",
    "mode",
    "vertical",
    "auth_ttl",
    "day_of_week",
    "w:m",
    "resource",
    "call-id",
    "specific_hours",
    "available",
    "relay",
    "w:gp2",
    "mute",
    "fail",
    "uuid",
    "contacts",
    "upload",
    "w:p",
    "open_time",
    "3",
    "close_time",
    "day",
    "business",
    "delete",
    "feature",
    "add",
    "encrypt",
    "w",
    "pkmsg",
    "error",
    "ip4",
    "update",
    "category",
    "ip6",
    "invite",
    "gcm",
    "retry",
    "latency",
    "remove",
    "5",
    "audio",
    "4",
    "te2",
    "groups",
    "appointment_only",
    "url",
    "gif",
    "code",
    "urn:xmpp:whatsapp:dirty",
    "w:sync:app:state",
    "key",
    "last",
    "device",
    "usync",
    "regular",
    "registration",
    "offer",
    "name",
    "context",
    "document",
    "prop",
    "6",
    "true",
    "sidelist",
    "apns",
    "deny",
    "pn",
    "collection",
    "state",
    "patch",
    "index",
    "contact_merged",
    "device-list",
    "snapshot",
    "7",
    "web",
    "token",
    "pair-success",
    "dirty",
    "ref",
    "query",
    "key-index",
    "identity",
    "skey",
    "list",
    "background",
    "chat",
    "false",
    "accept",
    "pair-device",
    "device-identity",
    "fbns",
    "address",
    "expiration",
    "keygen",
    "attribute_padding",
    "passive",
    "active",
    "vote",
    "return_snapshot",
    "order",
    "host",
    "priority",
    "md-app-state",
    "8",
    "primary",
    "9",
    "md-msg-hist",
    "side_list",
    "tctoken",
    "default",
    "group",
    "remove-companion-device",
    "admin",
    "companion",
    "stream:error",
    "critical_block",
    "critical_unblock_low",
    "regular_high",
    "regular_low",
    "blocklist",
    "privacy",
    "polls",
    "reaction",
    "multicast",
    "w:stats",
    "creator",
    "paused",
    "recording",
    "w:biz",
];

/// Secondary dictionaries, selected by DICTIONARY_0..=DICTIONARY_3.
pub const DOUBLE_BYTE_TOKENS: &[&[&str]] = &[
    &[
        "media-gig2-1.cdn.whatsapp.net",
        "device_orientation",
        "fbid:devices",
        "account_sync",
        "pair-device-sign",
        "biz-cover-photo",
        "received_pending_notifications",
        "history_sync_notification",
        "w:auth:backup:token",
        "w:biz:directory",
        "smax-invalid",
        "businessProfile",
        "signed_prekey",
        "w:g2",
        "terminate",
        "sender-key-memory",
        "single_select_reply",
        "unarchive_chats",
        "preview",
    ],
    &[
        "app_state_sync_key_share",
        "app_state_sync_key_request",
        "app_state_fatal_exception_notification",
        "initial_security_notification_setting_sync",
        "w:sync:app:state;fatal",
        "sync_full_history",
        "link_preview",
        "recent_sticker",
        "pushname_setting",
        "archive_setting",
        "w:service:ib",
    ],
    &[
        "payment_transaction",
        "keep_in_chat",
        "requested_disappearing_mode",
        "sticker_pack",
        "quick_reply",
    ],
    &[
        "community_announce",
        "default_sub_group",
        "membership_approval_request",
        "allow_non_admin_sub_group_creation",
    ],
];

static SINGLE_BYTE_MAP: LazyLock<HashMap<&'static str, u8>> = LazyLock::new(|| {
    SINGLE_BYTE_TOKENS
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, t)| (*t, i as u8))
        .collect()
});

static DOUBLE_BYTE_MAP: LazyLock<HashMap<&'static str, (u8, u8)>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for (dict, tokens) in DOUBLE_BYTE_TOKENS.iter().enumerate() {
        for (index, token) in tokens.iter().enumerate() {
            map.insert(*token, (dict as u8, index as u8));
        }
    }
    map
});

pub fn index_of_single_token(token: &str) -> Option<u8> {
    SINGLE_BYTE_MAP.get(token).copied()
}

pub fn index_of_double_byte_token(token: &str) -> Option<(u8, u8)> {
    DOUBLE_BYTE_MAP.get(token).copied()
}

pub fn get_single_token(index: u8) -> Option<&'static str> {
    SINGLE_BYTE_TOKENS.get(index as usize).copied()
}

pub fn get_double_token(dict: u8, index: u8) -> Option<&'static str> {
    DOUBLE_BYTE_TOKENS
        .get(dict as usize)
        .and_then(|d| d.get(index as usize))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_token_roundtrip() {
        for i in 1u8..=235 {
            if let Some(token) = get_single_token(i) {
                assert_eq!(
                    index_of_single_token(token),
                    Some(i),
                    "token '{token}' at index {i} does not round-trip"
                );
            }
        }
    }

    #[test]
    fn double_byte_token_roundtrip() {
        for dict in 0..4u8 {
            for idx in 0..255u8 {
                if let Some(token) = get_double_token(dict, idx) {
                    assert_eq!(index_of_double_byte_token(token), Some((dict, idx)));
                }
            }
        }
    }

    #[test]
    fn special_tags_are_not_tokens() {
        assert!(get_single_token(LIST_8).is_none());
        assert!(get_single_token(JID_PAIR).is_none());
        assert!(get_single_token(NIBBLE_8).is_none());
        assert!(index_of_single_token("definitely_not_a_token").is_none());
    }

    #[test]
    fn token_table_fits_byte_space() {
        assert!(SINGLE_BYTE_TOKENS.len() <= DICTIONARY_0 as usize);
    }
}
