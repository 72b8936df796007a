use crate::crypto::xed25519;
use ed25519_dalek::Signature;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};

/// The DJB key-type prefix byte used by the Signal wire encoding.
const DJB_TYPE: u8 = 5;

/// An X25519 key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
}

impl KeyPair {
    pub fn new() -> Self {
        let mut p_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut p_bytes);
        Self::from_private_key(p_bytes)
    }

    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let private = StaticSecret::from(private_key);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// X25519 agreement with a raw peer public key.
    pub fn agree(&self, their_public: &[u8; 32]) -> [u8; 32] {
        x25519_dalek::x25519(self.private_key, *their_public)
    }

    /// Signs another key pair's public key, prefixed with the DJB type
    /// byte as the Signal protocol requires.
    pub fn sign_key(&self, key_to_sign: &KeyPair) -> Signature {
        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&key_to_sign.public_key);
        self.sign_message(&message)
    }

    /// Signs an arbitrary byte slice via XEd25519.
    pub fn sign_message(&self, message: &[u8]) -> Signature {
        let signature_bytes = xed25519::sign(&self.private_key, message);
        Signature::from_bytes(&signature_bytes)
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}

/// A pre-key with an optional signature from the identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKey {
    pub key_pair: KeyPair,
    pub key_id: u32,
    pub signature: Option<Vec<u8>>,
}

impl PreKey {
    pub fn new(key_id: u32) -> Self {
        Self {
            key_pair: KeyPair::new(),
            key_id,
            signature: None,
        }
    }
}

impl KeyPair {
    pub fn create_signed_prekey(&self, key_id: u32) -> PreKey {
        let new_key = PreKey::new(key_id);
        let signature = self.sign_key(&new_key.key_pair);
        PreKey {
            signature: Some(signature.to_bytes().to_vec()),
            ..new_key
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agreement_is_symmetric() {
        let a = KeyPair::new();
        let b = KeyPair::new();
        assert_eq!(a.agree(&b.public_key), b.agree(&a.public_key));
    }

    #[test]
    fn signed_prekey_verifies() {
        let identity = KeyPair::new();
        let prekey = identity.create_signed_prekey(1);
        let mut message = [0u8; 33];
        message[0] = 5;
        message[1..].copy_from_slice(&prekey.key_pair.public_key);
        let sig: [u8; 64] = prekey.signature.unwrap().try_into().unwrap();
        assert!(xed25519::verify(&identity.public_key, &message, &sig));
    }
}
