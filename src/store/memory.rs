use crate::store::error::Result;
use crate::store::traits::KeyStoreBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Reference backend used by tests and examples.
#[derive(Default)]
pub struct MemoryBackend {
    map: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStoreBackend for MemoryBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, namespace: &str, key: &str, value: Option<Vec<u8>>) -> Result<()> {
        let mut map = self.map.lock().unwrap();
        let map_key = (namespace.to_string(), key.to_string());
        match value {
            Some(v) => {
                map.insert(map_key, v);
            }
            None => {
                map.remove(&map_key);
            }
        }
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        Ok(self
            .map
            .lock()
            .unwrap()
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, k)| k.clone())
            .collect())
    }
}
