use crate::crypto::key_pair::{KeyPair, PreKey};
use crate::types::jid::Jid;
use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Persistent connection identity. One blob; the caller durably stores it
/// whenever a `creds.update` event fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creds {
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: PreKey,
    pub registration_id: u32,
    /// Base64 seed binding QR pairing to this device.
    pub adv_secret_key: String,

    pub me: Option<Jid>,
    pub push_name: Option<String>,
    pub platform: Option<String>,
    /// Signed device identity proto, set by `pair-success`.
    pub account: Option<Vec<u8>>,
    pub my_app_state_key_id: Option<Vec<u8>>,

    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u64,
    pub last_account_sync_timestamp: Option<i64>,
}

impl Creds {
    /// Fresh registration credentials for a device that has never paired.
    pub fn generate() -> Self {
        let identity = KeyPair::new();
        let signed_pre_key = identity.create_signed_prekey(1);
        let mut adv_secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut adv_secret);

        Self {
            noise_key: KeyPair::new(),
            signed_identity_key: identity,
            signed_pre_key,
            registration_id: rand::thread_rng().next_u32() & 0x3fff,
            adv_secret_key: BASE64_STANDARD.encode(adv_secret),
            me: None,
            push_name: None,
            platform: None,
            account: None,
            my_app_state_key_id: None,
            next_pre_key_id: 1,
            first_unuploaded_pre_key_id: 1,
            account_sync_counter: 0,
            last_account_sync_timestamp: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.me.is_some()
    }

    pub fn adv_secret_bytes(&self) -> anyhow::Result<[u8; 32]> {
        let raw = BASE64_STANDARD.decode(&self.adv_secret_key)?;
        raw.try_into()
            .map_err(|_| anyhow::anyhow!("adv secret key is not 32 bytes"))
    }

    /// Applies a partial update in place. Counter invariants hold by
    /// construction: uploads only ever move `first_unuploaded_pre_key_id`
    /// forward, generation only moves `next_pre_key_id` forward.
    pub fn apply(&mut self, update: &crate::types::events::CredsUpdate) {
        if let Some(me) = &update.me {
            self.me = Some(me.clone());
        }
        if let Some(name) = &update.push_name {
            self.push_name = Some(name.clone());
        }
        if let Some(platform) = &update.platform {
            self.platform = Some(platform.clone());
        }
        if let Some(account) = &update.account {
            self.account = Some(account.clone());
        }
        if let Some(key_id) = &update.my_app_state_key_id {
            self.my_app_state_key_id = Some(key_id.clone());
        }
        if let Some(id) = update.next_pre_key_id {
            self.next_pre_key_id = id;
        }
        if let Some(id) = update.first_unuploaded_pre_key_id {
            self.first_unuploaded_pre_key_id = id;
        }
        if let Some(counter) = update.account_sync_counter {
            self.account_sync_counter = counter;
        }
        if let Some(ts) = update.last_account_sync_timestamp {
            self.last_account_sync_timestamp = Some(ts);
        }
        debug_assert!(self.first_unuploaded_pre_key_id <= self.next_pre_key_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_creds_are_unregistered() {
        let creds = Creds::generate();
        assert!(!creds.is_registered());
        assert!(creds.first_unuploaded_pre_key_id <= creds.next_pre_key_id);
        assert_eq!(creds.adv_secret_bytes().unwrap().len(), 32);
    }

    #[test]
    fn apply_merges_partial_updates() {
        let mut creds = Creds::generate();
        let mut update = crate::types::events::CredsUpdate::default();
        update.push_name = Some("someone".into());
        update.next_pre_key_id = Some(42);
        update.first_unuploaded_pre_key_id = Some(12);
        creds.apply(&update);
        assert_eq!(creds.push_name.as_deref(), Some("someone"));
        assert_eq!(creds.next_pre_key_id, 42);
        assert_eq!(creds.first_unuploaded_pre_key_id, 12);
    }
}
