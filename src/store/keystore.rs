use crate::appstate::hash::HashState;
use crate::store::error::Result;
use crate::store::traits::{namespace, KeyStoreBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// App-state sync key material delivered through `appStateSyncKeyShare`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStateSyncKeyRecord {
    pub key_data: Vec<u8>,
    pub fingerprint: Vec<u8>,
    pub timestamp: i64,
}

/// Namespaced KV store with single-holder transactions.
///
/// A [`KeyTransaction`] is the only way to touch data; holding one
/// guarantees read-modify-write atomicity across every namespace. Nested
/// work reuses the outer transaction by reference — never call
/// [`KeyStore::transaction`] while already holding one on the same task.
#[derive(Clone)]
pub struct KeyStore {
    backend: Arc<dyn KeyStoreBackend>,
    lock: Arc<Mutex<()>>,
}

impl KeyStore {
    pub fn new(backend: Arc<dyn KeyStoreBackend>) -> Self {
        Self {
            backend,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn transaction(&self) -> KeyTransaction {
        KeyTransaction {
            backend: self.backend.clone(),
            _guard: Arc::new(self.lock.clone().lock_owned().await),
        }
    }
}

/// Live transaction handle. Cheap to clone; the store lock is released
/// when the last clone drops.
#[derive(Clone)]
pub struct KeyTransaction {
    backend: Arc<dyn KeyStoreBackend>,
    _guard: Arc<OwnedMutexGuard<()>>,
}

impl KeyTransaction {
    pub async fn get(&self, ns: &str, key: &str) -> Result<Option<Vec<u8>>> {
        self.backend.get(ns, key).await
    }

    pub async fn set(&self, ns: &str, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        self.backend.set(ns, key, value).await
    }

    pub async fn has(&self, ns: &str, key: &str) -> Result<bool> {
        Ok(self.backend.get(ns, key).await?.is_some())
    }

    // -- typed helpers over the fixed namespaces --

    pub async fn get_app_state_version(&self, name: &str) -> Result<HashState> {
        match self.get(namespace::APP_STATE_SYNC_VERSION, name).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(HashState::default()),
        }
    }

    pub async fn set_app_state_version(&self, name: &str, state: &HashState) -> Result<()> {
        let raw = serde_json::to_vec(state)?;
        self.set(namespace::APP_STATE_SYNC_VERSION, name, Some(raw))
            .await
    }

    /// Discards a collection's local state after decode failure.
    pub async fn wipe_app_state_version(&self, name: &str) -> Result<()> {
        self.set(namespace::APP_STATE_SYNC_VERSION, name, None).await
    }

    pub async fn get_app_state_sync_key(
        &self,
        key_id: &[u8],
    ) -> Result<Option<AppStateSyncKeyRecord>> {
        let key = hex::encode(key_id);
        match self.get(namespace::APP_STATE_SYNC_KEY, &key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_app_state_sync_key(
        &self,
        key_id: &[u8],
        record: &AppStateSyncKeyRecord,
    ) -> Result<()> {
        let key = hex::encode(key_id);
        let raw = serde_json::to_vec(record)?;
        self.set(namespace::APP_STATE_SYNC_KEY, &key, Some(raw))
            .await
    }

    /// Set of device JIDs the current sender key for `group` has reached.
    pub async fn get_sender_key_memory(&self, group: &str) -> Result<HashSet<String>> {
        match self.get(namespace::SENDER_KEY_MEMORY, group).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(HashSet::new()),
        }
    }

    pub async fn set_sender_key_memory(
        &self,
        group: &str,
        devices: &HashSet<String>,
    ) -> Result<()> {
        let raw = serde_json::to_vec(devices)?;
        self.set(namespace::SENDER_KEY_MEMORY, group, Some(raw))
            .await
    }

    pub async fn has_session(&self, address: &str) -> Result<bool> {
        self.has(namespace::SESSION, address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    #[tokio::test]
    async fn transactions_serialize_writers() {
        let store = KeyStore::new(Arc::new(MemoryBackend::new()));

        let tx = store.transaction().await;
        tx.set("pre-key", "1", Some(vec![1])).await.unwrap();

        // A second transaction cannot start while the first is live.
        let store2 = store.clone();
        let pending = tokio::spawn(async move {
            let tx2 = store2.transaction().await;
            tx2.set("pre-key", "1", Some(vec![2])).await.unwrap();
        });
        tokio::task::yield_now().await;
        assert_eq!(tx.get("pre-key", "1").await.unwrap(), Some(vec![1]));

        drop(tx);
        pending.await.unwrap();

        let tx = store.transaction().await;
        assert_eq!(tx.get("pre-key", "1").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn app_state_version_roundtrip_and_wipe() {
        let store = KeyStore::new(Arc::new(MemoryBackend::new()));
        let tx = store.transaction().await;

        let mut state = HashState::default();
        state.version = 12;
        state.hash[0] = 0xAB;
        tx.set_app_state_version("regular", &state).await.unwrap();

        let loaded = tx.get_app_state_version("regular").await.unwrap();
        assert_eq!(loaded.version, 12);
        assert_eq!(loaded.hash[0], 0xAB);

        tx.wipe_app_state_version("regular").await.unwrap();
        let wiped = tx.get_app_state_version("regular").await.unwrap();
        assert_eq!(wiped.version, 0);
    }

    #[tokio::test]
    async fn sender_key_memory_roundtrip() {
        let store = KeyStore::new(Arc::new(MemoryBackend::new()));
        let tx = store.transaction().await;

        let mut devices = HashSet::new();
        devices.insert("111:1@s.whatsapp.net".to_string());
        devices.insert("222:0@s.whatsapp.net".to_string());
        tx.set_sender_key_memory("g@g.us", &devices).await.unwrap();
        assert_eq!(tx.get_sender_key_memory("g@g.us").await.unwrap(), devices);
    }
}
