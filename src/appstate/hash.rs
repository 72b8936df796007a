use crate::proto::syncd_mutation::SyncdOperation;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;

/// Per-collection LT-hash state: the monotone version, the 128-byte
/// accumulator and the live `indexMac -> valueMac` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashState {
    pub version: u64,
    #[serde(with = "BigArray")]
    pub hash: [u8; 128],
    /// Keyed by base64 of the index MAC.
    pub index_value_map: HashMap<String, Vec<u8>>,
}

impl Default for HashState {
    fn default() -> Self {
        Self {
            version: 0,
            hash: [0; 128],
            index_value_map: HashMap::new(),
        }
    }
}

impl HashState {
    /// Snapshot MAC over the accumulator, version and collection name.
    pub fn generate_snapshot_mac(&self, name: &str, key: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");
        mac.update(&self.hash);
        mac.update(&self.version.to_be_bytes());
        mac.update(name.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

/// Value MAC of one mutation: HMAC-SHA512 truncated to 32 bytes, framed
/// with the operation discriminator and key id.
pub fn generate_content_mac(
    operation: SyncdOperation,
    data: &[u8],
    key_id: &[u8],
    key: &[u8],
) -> Vec<u8> {
    let mut mac = Hmac::<Sha512>::new_from_slice(key).expect("HMAC accepts any key size");

    let operation_byte = (operation as i32 + 1) as u8;
    mac.update(&[operation_byte]);
    mac.update(key_id);
    mac.update(data);
    mac.update(&((key_id.len() + 1) as u64).to_be_bytes());

    mac.finalize().into_bytes()[..32].to_vec()
}

/// Patch MAC: snapshot MAC, then each mutation's value MAC, then version
/// and collection name.
pub fn generate_patch_mac(
    patch: &crate::proto::SyncdPatch,
    name: &str,
    key: &[u8],
    version: u64,
) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");

    if let Some(snapshot_mac) = &patch.snapshot_mac {
        mac.update(snapshot_mac);
    }

    for mutation in &patch.mutations {
        let value_mac = mutation
            .record
            .as_ref()
            .and_then(|r| r.value.as_ref())
            .and_then(|v| v.blob.as_deref())
            .filter(|blob| blob.len() >= 32)
            .map(|blob| &blob[blob.len() - 32..]);
        if let Some(value_mac) = value_mac {
            mac.update(value_mac);
        }
    }

    mac.update(&version.to_be_bytes());
    mac.update(name.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_mac_distinguishes_operations() {
        let key = [1u8; 32];
        let set = generate_content_mac(SyncdOperation::Set, b"data", b"kid", &key);
        let remove = generate_content_mac(SyncdOperation::Remove, b"data", b"kid", &key);
        assert_eq!(set.len(), 32);
        assert_ne!(set, remove);
    }

    #[test]
    fn snapshot_mac_depends_on_version_and_name() {
        let key = [2u8; 32];
        let mut state = HashState::default();
        let a = state.generate_snapshot_mac("regular", &key);
        state.version = 1;
        let b = state.generate_snapshot_mac("regular", &key);
        let c = state.generate_snapshot_mac("regular_high", &key);
        assert_ne!(a, b);
        assert_ne!(b, c);
    }
}
