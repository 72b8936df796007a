//! Wire protobuf definitions.
//!
//! Hand-maintained `prost` structs for the subset of the multi-device
//! protocol the core speaks: the Noise handshake envelope, the client
//! payload, device identity binding, server-synced app state, and the
//! message container. Field numbers match the production schema; unknown
//! fields are skipped by prost on decode.

/// Noise handshake envelope exchanged before the transport is encrypted.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HandshakeMessage {
    #[prost(message, optional, tag = "2")]
    pub client_hello: Option<handshake_message::ClientHello>,
    #[prost(message, optional, tag = "3")]
    pub server_hello: Option<handshake_message::ServerHello>,
    #[prost(message, optional, tag = "4")]
    pub client_finish: Option<handshake_message::ClientFinish>,
}

pub mod handshake_message {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientHello {
        #[prost(bytes, optional, tag = "1")]
        pub ephemeral: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "2")]
        pub r#static: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "3")]
        pub payload: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ServerHello {
        #[prost(bytes, optional, tag = "1")]
        pub ephemeral: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "2")]
        pub r#static: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "3")]
        pub payload: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClientFinish {
        #[prost(bytes, optional, tag = "1")]
        pub r#static: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "2")]
        pub payload: Option<Vec<u8>>,
    }
}

/// Payload carried inside the final handshake message: a login node when
/// credentials exist, a registration node otherwise.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientPayload {
    #[prost(uint64, optional, tag = "1")]
    pub username: Option<u64>,
    #[prost(bool, optional, tag = "3")]
    pub passive: Option<bool>,
    #[prost(message, optional, tag = "5")]
    pub user_agent: Option<client_payload::UserAgent>,
    #[prost(message, optional, tag = "6")]
    pub web_info: Option<client_payload::WebInfo>,
    #[prost(string, optional, tag = "7")]
    pub push_name: Option<String>,
    #[prost(sfixed32, optional, tag = "9")]
    pub session_id: Option<i32>,
    #[prost(bool, optional, tag = "10")]
    pub short_connect: Option<bool>,
    #[prost(enumeration = "client_payload::ConnectType", optional, tag = "12")]
    pub connect_type: Option<i32>,
    #[prost(enumeration = "client_payload::ConnectReason", optional, tag = "13")]
    pub connect_reason: Option<i32>,
    #[prost(uint32, optional, tag = "18")]
    pub device: Option<u32>,
    #[prost(message, optional, tag = "19")]
    pub device_pairing_data: Option<client_payload::DevicePairingRegistrationData>,
    #[prost(bool, optional, tag = "24")]
    pub pull: Option<bool>,
}

pub mod client_payload {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ConnectType {
        CellularUnknown = 0,
        WifiUnknown = 1,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum ConnectReason {
        Push = 0,
        UserActivated = 1,
        Scheduled = 2,
        ErrorReconnect = 3,
        NetworkSwitch = 4,
        PingReconnect = 5,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct UserAgent {
        #[prost(enumeration = "user_agent::Platform", optional, tag = "1")]
        pub platform: Option<i32>,
        #[prost(message, optional, tag = "2")]
        pub app_version: Option<user_agent::AppVersion>,
        #[prost(string, optional, tag = "3")]
        pub mcc: Option<String>,
        #[prost(string, optional, tag = "4")]
        pub mnc: Option<String>,
        #[prost(string, optional, tag = "5")]
        pub os_version: Option<String>,
        #[prost(string, optional, tag = "6")]
        pub manufacturer: Option<String>,
        #[prost(string, optional, tag = "7")]
        pub device: Option<String>,
        #[prost(string, optional, tag = "8")]
        pub os_build_number: Option<String>,
        #[prost(enumeration = "user_agent::ReleaseChannel", optional, tag = "13")]
        pub release_channel: Option<i32>,
    }

    pub mod user_agent {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Platform {
            Android = 0,
            Ios = 1,
            Web = 14,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum ReleaseChannel {
            Release = 0,
            Beta = 1,
            Alpha = 2,
            Debug = 3,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct AppVersion {
            #[prost(uint32, optional, tag = "1")]
            pub primary: Option<u32>,
            #[prost(uint32, optional, tag = "2")]
            pub secondary: Option<u32>,
            #[prost(uint32, optional, tag = "3")]
            pub tertiary: Option<u32>,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct WebInfo {
        #[prost(string, optional, tag = "1")]
        pub ref_token: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub version: Option<String>,
        #[prost(enumeration = "web_info::WebSubPlatform", optional, tag = "4")]
        pub web_sub_platform: Option<i32>,
    }

    pub mod web_info {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum WebSubPlatform {
            WebBrowser = 0,
            AppStore = 1,
            WinStore = 2,
            Darwin = 3,
            Win32 = 4,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DevicePairingRegistrationData {
        #[prost(bytes, optional, tag = "1")]
        pub e_regid: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "2")]
        pub e_keytype: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "3")]
        pub e_ident: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "4")]
        pub e_skey_id: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "5")]
        pub e_skey_val: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "6")]
        pub e_skey_sig: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "7")]
        pub build_hash: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "8")]
        pub device_props: Option<Vec<u8>>,
    }
}

/// Companion device properties embedded in the registration payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceProps {
    #[prost(string, optional, tag = "1")]
    pub os: Option<String>,
    #[prost(enumeration = "device_props::PlatformType", optional, tag = "3")]
    pub platform_type: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub require_full_sync: Option<bool>,
}

pub mod device_props {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum PlatformType {
        Unknown = 0,
        Chrome = 1,
        Firefox = 2,
        Ie = 3,
        Opera = 4,
        Safari = 5,
        Edge = 6,
        Desktop = 7,
    }
}

/// Server certificate chain decrypted during the handshake.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CertChain {
    #[prost(message, optional, tag = "1")]
    pub leaf: Option<cert_chain::NoiseCertificate>,
    #[prost(message, optional, tag = "2")]
    pub intermediate: Option<cert_chain::NoiseCertificate>,
}

pub mod cert_chain {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct NoiseCertificate {
        #[prost(bytes, optional, tag = "1")]
        pub details: Option<Vec<u8>>,
        #[prost(bytes, optional, tag = "2")]
        pub signature: Option<Vec<u8>>,
    }

    pub mod noise_certificate {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Details {
            #[prost(uint32, optional, tag = "1")]
            pub serial: Option<u32>,
            #[prost(uint32, optional, tag = "2")]
            pub issuer_serial: Option<u32>,
            #[prost(bytes, optional, tag = "3")]
            pub key: Option<Vec<u8>>,
            #[prost(int64, optional, tag = "4")]
            pub not_before: Option<i64>,
            #[prost(int64, optional, tag = "5")]
            pub not_after: Option<i64>,
        }
    }
}

/// Signed device identity container, HMAC'd with the ADV secret.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvSignedDeviceIdentityHmac {
    #[prost(bytes, optional, tag = "1")]
    pub details: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub hmac: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvSignedDeviceIdentity {
    #[prost(bytes, optional, tag = "1")]
    pub details: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "2")]
    pub account_signature_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "3")]
    pub account_signature: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub device_signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AdvDeviceIdentity {
    #[prost(uint32, optional, tag = "1")]
    pub raw_id: Option<u32>,
    #[prost(uint64, optional, tag = "2")]
    pub timestamp: Option<u64>,
    #[prost(uint32, optional, tag = "3")]
    pub key_index: Option<u32>,
}

// ---------------------------------------------------------------------------
// Message container
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageKey {
    #[prost(string, optional, tag = "1")]
    pub remote_jid: Option<String>,
    #[prost(bool, optional, tag = "2")]
    pub from_me: Option<bool>,
    #[prost(string, optional, tag = "3")]
    pub id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub participant: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(string, optional, tag = "1")]
    pub conversation: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub sender_key_distribution_message: Option<message::SenderKeyDistributionMessage>,
    #[prost(message, optional, tag = "12")]
    pub protocol_message: Option<message::ProtocolMessage>,
    #[prost(message, optional, boxed, tag = "31")]
    pub device_sent_message: Option<Box<message::DeviceSentMessage>>,
    #[prost(message, optional, tag = "36")]
    pub list_message: Option<message::ListMessage>,
    #[prost(message, optional, tag = "42")]
    pub buttons_message: Option<message::ButtonsMessage>,
    #[prost(message, optional, tag = "45")]
    pub interactive_message: Option<message::InteractiveMessage>,
}

impl Message {
    /// The `biz` child tag required for templated content, if any.
    pub fn button_type(&self) -> Option<&'static str> {
        if self.buttons_message.is_some() {
            Some("buttons")
        } else if self.list_message.is_some() {
            Some("list")
        } else if self.interactive_message.is_some() {
            Some("interactive")
        } else {
            None
        }
    }
}

pub mod message {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SenderKeyDistributionMessage {
        #[prost(string, optional, tag = "1")]
        pub group_id: Option<String>,
        #[prost(bytes, optional, tag = "2")]
        pub axolotl_sender_key_distribution_message: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeviceSentMessage {
        #[prost(string, optional, tag = "1")]
        pub destination_jid: Option<String>,
        #[prost(message, optional, boxed, tag = "2")]
        pub message: Option<Box<super::Message>>,
        #[prost(string, optional, tag = "3")]
        pub phash: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ProtocolMessage {
        #[prost(message, optional, tag = "1")]
        pub key: Option<super::MessageKey>,
        #[prost(enumeration = "protocol_message::Type", optional, tag = "2")]
        pub r#type: Option<i32>,
        #[prost(message, optional, tag = "6")]
        pub history_sync_notification: Option<super::HistorySyncNotification>,
        #[prost(message, optional, tag = "7")]
        pub app_state_sync_key_share: Option<super::AppStateSyncKeyShare>,
        #[prost(message, optional, tag = "8")]
        pub app_state_sync_key_request: Option<super::AppStateSyncKeyRequest>,
    }

    pub mod protocol_message {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
        #[repr(i32)]
        pub enum Type {
            Revoke = 0,
            EphemeralSetting = 3,
            HistorySyncNotification = 5,
            AppStateSyncKeyShare = 6,
            AppStateSyncKeyRequest = 7,
            AppStateFatalExceptionNotification = 9,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ButtonsMessage {
        #[prost(string, optional, tag = "6")]
        pub content_text: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ListMessage {
        #[prost(string, optional, tag = "1")]
        pub title: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub description: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct InteractiveMessage {
        #[prost(string, optional, tag = "3")]
        pub content_text: Option<String>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistorySyncNotification {
    #[prost(bytes, optional, tag = "1")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(uint64, optional, tag = "2")]
    pub file_length: Option<u64>,
    #[prost(bytes, optional, tag = "3")]
    pub media_key: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "4")]
    pub file_enc_sha256: Option<Vec<u8>>,
    #[prost(string, optional, tag = "5")]
    pub direct_path: Option<String>,
    #[prost(
        enumeration = "history_sync_notification::HistorySyncType",
        optional,
        tag = "6"
    )]
    pub sync_type: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub chunk_order: Option<u32>,
    #[prost(string, optional, tag = "8")]
    pub original_message_id: Option<String>,
}

pub mod history_sync_notification {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum HistorySyncType {
        InitialBootstrap = 0,
        InitialStatusV3 = 1,
        Full = 2,
        Recent = 3,
        PushName = 4,
        NonBlockingData = 5,
        OnDemand = 6,
    }
}

// ---------------------------------------------------------------------------
// App state sync keys
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyShare {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<AppStateSyncKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyRequest {
    #[prost(message, repeated, tag = "1")]
    pub key_ids: Vec<AppStateSyncKeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKey {
    #[prost(message, optional, tag = "1")]
    pub key_id: Option<AppStateSyncKeyId>,
    #[prost(message, optional, tag = "2")]
    pub key_data: Option<AppStateSyncKeyData>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyId {
    #[prost(bytes, optional, tag = "1")]
    pub key_id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyData {
    #[prost(bytes, optional, tag = "1")]
    pub key_data: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[prost(int64, optional, tag = "3")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppStateSyncKeyFingerprint {
    #[prost(uint32, optional, tag = "1")]
    pub raw_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub current_index: Option<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "3")]
    pub device_indexes: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Server-synced state (syncd)
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdPatch {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub mutations: Vec<SyncdMutation>,
    #[prost(message, optional, tag = "3")]
    pub external_mutations: Option<ExternalBlobReference>,
    #[prost(bytes, optional, tag = "4")]
    pub snapshot_mac: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "5")]
    pub patch_mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "6")]
    pub key_id: Option<KeyId>,
    #[prost(uint32, optional, tag = "7")]
    pub exit_code: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub device_index: Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdVersion {
    #[prost(uint64, optional, tag = "1")]
    pub version: Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutation {
    #[prost(enumeration = "syncd_mutation::SyncdOperation", optional, tag = "1")]
    pub operation: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub record: Option<SyncdRecord>,
}

pub mod syncd_mutation {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum SyncdOperation {
        Set = 0,
        Remove = 1,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdMutations {
    #[prost(message, repeated, tag = "1")]
    pub mutations: Vec<SyncdMutation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdSnapshot {
    #[prost(message, optional, tag = "1")]
    pub version: Option<SyncdVersion>,
    #[prost(message, repeated, tag = "2")]
    pub records: Vec<SyncdRecord>,
    #[prost(bytes, optional, tag = "3")]
    pub mac: Option<Vec<u8>>,
    #[prost(message, optional, tag = "4")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdRecord {
    #[prost(message, optional, tag = "1")]
    pub index: Option<SyncdIndex>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncdValue>,
    #[prost(message, optional, tag = "3")]
    pub key_id: Option<KeyId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdIndex {
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncdValue {
    #[prost(bytes, optional, tag = "1")]
    pub blob: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyId {
    #[prost(bytes, optional, tag = "1")]
    pub id: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExternalBlobReference {
    #[prost(bytes, optional, tag = "1")]
    pub media_key: Option<Vec<u8>>,
    #[prost(string, optional, tag = "2")]
    pub direct_path: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub handle: Option<String>,
    #[prost(uint64, optional, tag = "4")]
    pub file_size_bytes: Option<u64>,
    #[prost(bytes, optional, tag = "5")]
    pub file_sha256: Option<Vec<u8>>,
    #[prost(bytes, optional, tag = "6")]
    pub file_enc_sha256: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// App state actions
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionData {
    #[prost(bytes, optional, tag = "1")]
    pub index: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub value: Option<SyncActionValue>,
    #[prost(bytes, optional, tag = "3")]
    pub padding: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "4")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncActionValue {
    #[prost(int64, optional, tag = "1")]
    pub timestamp: Option<i64>,
    #[prost(message, optional, tag = "2")]
    pub star_action: Option<sync_action_value::StarAction>,
    #[prost(message, optional, tag = "3")]
    pub contact_action: Option<sync_action_value::ContactAction>,
    #[prost(message, optional, tag = "4")]
    pub mute_action: Option<sync_action_value::MuteAction>,
    #[prost(message, optional, tag = "5")]
    pub pin_action: Option<sync_action_value::PinAction>,
    #[prost(message, optional, tag = "6")]
    pub security_notification_setting: Option<sync_action_value::SecurityNotificationSetting>,
    #[prost(message, optional, tag = "7")]
    pub push_name_setting: Option<sync_action_value::PushNameSetting>,
    #[prost(message, optional, tag = "17")]
    pub archive_chat_action: Option<sync_action_value::ArchiveChatAction>,
    #[prost(message, optional, tag = "18")]
    pub delete_message_for_me_action: Option<sync_action_value::DeleteMessageForMeAction>,
    #[prost(message, optional, tag = "20")]
    pub mark_chat_as_read_action: Option<sync_action_value::MarkChatAsReadAction>,
    #[prost(message, optional, tag = "21")]
    pub clear_chat_action: Option<sync_action_value::ClearChatAction>,
    #[prost(message, optional, tag = "22")]
    pub delete_chat_action: Option<sync_action_value::DeleteChatAction>,
}

pub mod sync_action_value {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct StarAction {
        #[prost(bool, optional, tag = "1")]
        pub starred: Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ContactAction {
        #[prost(string, optional, tag = "1")]
        pub full_name: Option<String>,
        #[prost(string, optional, tag = "2")]
        pub first_name: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MuteAction {
        #[prost(bool, optional, tag = "1")]
        pub muted: Option<bool>,
        #[prost(int64, optional, tag = "2")]
        pub mute_end_timestamp: Option<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PinAction {
        #[prost(bool, optional, tag = "1")]
        pub pinned: Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SecurityNotificationSetting {
        #[prost(bool, optional, tag = "1")]
        pub show_notification: Option<bool>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PushNameSetting {
        #[prost(string, optional, tag = "1")]
        pub name: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SyncActionMessageRange {
        #[prost(int64, optional, tag = "1")]
        pub last_message_timestamp: Option<i64>,
        #[prost(int64, optional, tag = "2")]
        pub last_system_message_timestamp: Option<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ArchiveChatAction {
        #[prost(bool, optional, tag = "1")]
        pub archived: Option<bool>,
        #[prost(message, optional, tag = "2")]
        pub message_range: Option<SyncActionMessageRange>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeleteMessageForMeAction {
        #[prost(bool, optional, tag = "1")]
        pub delete_media: Option<bool>,
        #[prost(int64, optional, tag = "2")]
        pub message_timestamp: Option<i64>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MarkChatAsReadAction {
        #[prost(bool, optional, tag = "1")]
        pub read: Option<bool>,
        #[prost(message, optional, tag = "2")]
        pub message_range: Option<SyncActionMessageRange>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ClearChatAction {
        #[prost(message, optional, tag = "1")]
        pub message_range: Option<SyncActionMessageRange>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct DeleteChatAction {
        #[prost(message, optional, tag = "1")]
        pub message_range: Option<SyncActionMessageRange>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn handshake_message_roundtrip() {
        let msg = HandshakeMessage {
            client_hello: Some(handshake_message::ClientHello {
                ephemeral: Some(vec![1u8; 32]),
                r#static: None,
                payload: None,
            }),
            ..Default::default()
        };
        let bytes = msg.encode_to_vec();
        assert_eq!(HandshakeMessage::decode(bytes.as_slice()).unwrap(), msg);
    }

    #[test]
    fn syncd_patch_roundtrip() {
        let patch = SyncdPatch {
            version: Some(SyncdVersion { version: Some(17) }),
            mutations: vec![SyncdMutation {
                operation: Some(syncd_mutation::SyncdOperation::Set as i32),
                record: Some(SyncdRecord {
                    index: Some(SyncdIndex {
                        blob: Some(vec![2; 32]),
                    }),
                    value: Some(SyncdValue {
                        blob: Some(vec![3; 64]),
                    }),
                    key_id: Some(KeyId {
                        id: Some(vec![0, 1]),
                    }),
                }),
            }],
            snapshot_mac: Some(vec![4; 32]),
            patch_mac: Some(vec![5; 32]),
            key_id: Some(KeyId {
                id: Some(vec![0, 1]),
            }),
            ..Default::default()
        };
        let bytes = patch.encode_to_vec();
        assert_eq!(SyncdPatch::decode(bytes.as_slice()).unwrap(), patch);
    }

    #[test]
    fn button_type_detection() {
        let mut msg = Message::default();
        assert_eq!(msg.button_type(), None);
        msg.list_message = Some(message::ListMessage::default());
        assert_eq!(msg.button_type(), Some("list"));
    }
}
