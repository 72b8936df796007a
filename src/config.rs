use crate::types::jid::Jid;
use std::sync::Arc;
use std::time::Duration;

/// MAC verification toggles for app-state decoding. Both default to on;
/// disabling one only skips that check, the other still runs.
#[derive(Debug, Clone, Copy)]
pub struct AppStateMacVerification {
    pub patch: bool,
    pub snapshot: bool,
}

impl Default for AppStateMacVerification {
    fn default() -> Self {
        Self {
            patch: true,
            snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionOpts {
    pub max_commit_retries: u32,
    pub delay_between_tries: Duration,
}

impl Default for TransactionOpts {
    fn default() -> Self {
        Self {
            max_commit_retries: 5,
            delay_between_tries: Duration::from_millis(200),
        }
    }
}

pub type HistorySyncFilter =
    Arc<dyn Fn(&crate::proto::HistorySyncNotification) -> bool + Send + Sync>;
pub type JidFilter = Arc<dyn Fn(&Jid) -> bool + Send + Sync>;
pub type GetMessageFn = Arc<
    dyn Fn(&crate::types::message::MessageKey) -> Option<crate::proto::Message> + Send + Sync,
>;
pub type PatchMessageFn =
    Arc<dyn Fn(crate::proto::Message, &[Jid]) -> crate::proto::Message + Send + Sync>;

/// Connection configuration. Defaults mirror the reference web client.
#[derive(Clone)]
pub struct SocketConfig {
    pub ws_url: String,
    pub connect_timeout: Duration,
    pub default_query_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub qr_timeout: Duration,

    /// Client version triple advertised in the handshake payload.
    pub version: (u32, u32, u32),
    /// `(os, browser, release)` triple for the pairing payload.
    pub browser: (String, String, String),

    pub sync_full_history: bool,
    pub mark_online_on_connect: bool,
    /// Read by the outer wrapper layers (profile, privacy, blocklist
    /// fetches) that sit above this core; recognized here so one config
    /// value travels the whole stack.
    pub fire_init_queries: bool,
    pub emit_own_events: bool,

    pub app_state_mac_verification: AppStateMacVerification,
    pub transaction_opts: TransactionOpts,
    pub device_cache_ttl: Duration,

    pub should_sync_history_message: HistorySyncFilter,
    pub should_ignore_jid: JidFilter,
    /// Source of original message content for retry re-encryption.
    pub get_message: GetMessageFn,
    /// Hook applied to every outbound message before encryption.
    pub patch_message_before_sending: PatchMessageFn,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://web.whatsapp.com/ws/chat".to_string(),
            connect_timeout: Duration::from_secs(20),
            default_query_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(30),
            qr_timeout: Duration::from_secs(60),
            version: (2, 3000, 0),
            browser: (
                "Linux".to_string(),
                "Chrome".to_string(),
                "110.0".to_string(),
            ),
            sync_full_history: false,
            mark_online_on_connect: true,
            fire_init_queries: true,
            emit_own_events: true,
            app_state_mac_verification: AppStateMacVerification::default(),
            transaction_opts: TransactionOpts::default(),
            device_cache_ttl: Duration::from_secs(300),
            should_sync_history_message: Arc::new(|_| true),
            should_ignore_jid: Arc::new(|_| false),
            get_message: Arc::new(|_| None),
            patch_message_before_sending: Arc::new(|m, _| m),
        }
    }
}

impl std::fmt::Debug for SocketConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketConfig")
            .field("ws_url", &self.ws_url)
            .field("keep_alive_interval", &self.keep_alive_interval)
            .field("qr_timeout", &self.qr_timeout)
            .field("version", &self.version)
            .field("sync_full_history", &self.sync_full_history)
            .finish_non_exhaustive()
    }
}
