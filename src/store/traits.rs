use crate::store::error::Result;
use async_trait::async_trait;

/// Logical key namespaces. The backend treats them as opaque prefixes;
/// the core never mixes values across namespaces.
pub mod namespace {
    pub const PRE_KEY: &str = "pre-key";
    pub const SESSION: &str = "session";
    pub const SENDER_KEY: &str = "sender-key";
    pub const SENDER_KEY_MEMORY: &str = "sender-key-memory";
    pub const APP_STATE_SYNC_KEY: &str = "app-state-sync-key";
    pub const APP_STATE_SYNC_VERSION: &str = "app-state-sync-version";
}

/// Persistence seam: a namespaced byte-string KV store. Implementations
/// must make each call atomic; cross-call atomicity comes from
/// [`crate::store::KeyStore`] transactions.
#[async_trait]
pub trait KeyStoreBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    /// `None` deletes the entry.
    async fn set(&self, namespace: &str, key: &str, value: Option<Vec<u8>>) -> Result<()>;
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;
}
