use hkdf::Hkdf;
use sha2::Sha256;

/// Per-collection sub-keys expanded from one 32-byte master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedAppStateKeys {
    pub index: [u8; 32],
    pub value_encryption: [u8; 32],
    pub value_mac: [u8; 32],
    pub snapshot_mac: [u8; 32],
    pub patch_mac: [u8; 32],
}

/// HKDF-SHA256 expansion of the master key into 160 bytes of sub-keys.
pub fn expand_app_state_keys(key_data: &[u8]) -> ExpandedAppStateKeys {
    const INFO: &[u8] = b"WhatsApp Mutation Keys";
    let hk = Hkdf::<Sha256>::new(None, key_data);
    let mut okm = [0u8; 160];
    hk.expand(INFO, &mut okm).expect("hkdf expand");
    let take32 = |start: usize| {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&okm[start..start + 32]);
        arr
    };
    ExpandedAppStateKeys {
        index: take32(0),
        value_encryption: take32(32),
        value_mac: take32(64),
        snapshot_mac: take32(96),
        patch_mac: take32(128),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expansion_is_deterministic_and_distinct() {
        let a = expand_app_state_keys(&[7u8; 32]);
        let b = expand_app_state_keys(&[7u8; 32]);
        assert_eq!(a, b);
        assert_ne!(a.index, a.value_encryption);
        assert_ne!(a.snapshot_mac, a.patch_mac);
    }
}
