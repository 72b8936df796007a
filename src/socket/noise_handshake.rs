use crate::crypto::{gcm, hkdf, key_pair::KeyPair};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NoiseError {
    #[error("crypto operation failed: {0}")]
    Crypto(String),
}

pub type Result<T> = std::result::Result<T, NoiseError>;

/// Builds the 12-byte GCM IV whose trailing 4 bytes are the message
/// counter, big-endian.
pub fn generate_iv(counter: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[8..].copy_from_slice(&counter.to_be_bytes());
    iv
}

pub fn sha256_slice(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Symmetric handshake state: transcript hash, chaining salt and the
/// current message key. Counter resets on every key mix.
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    key: Aes256Gcm,
    counter: u32,
}

impl NoiseHandshake {
    pub fn new(pattern: &str, header: &[u8]) -> Result<Self> {
        let h: [u8; 32] = if pattern.len() == 32 {
            pattern.as_bytes().try_into().unwrap()
        } else {
            sha256_slice(pattern.as_bytes())
        };

        let mut state = Self {
            hash: h,
            salt: h,
            key: gcm::prepare(&h).map_err(|e| NoiseError::Crypto(e.to_string()))?,
            counter: 0,
        };
        state.authenticate(header);
        Ok(state)
    }

    /// Mixes data into the transcript hash without encrypting it.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn post_increment_counter(&mut self) -> u32 {
        let count = self.counter;
        self.counter += 1;
        count
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: plaintext,
            aad: &self.hash,
        };
        let ciphertext = self
            .key
            .encrypt(iv.as_ref().into(), payload)
            .map_err(|e| NoiseError::Crypto(e.to_string()))?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let aad = self.hash;
        let iv = generate_iv(self.post_increment_counter());
        let payload = Payload {
            msg: ciphertext,
            aad: &aad,
        };
        let plaintext = self
            .key
            .decrypt(iv.as_ref().into(), payload)
            .map_err(|e| NoiseError::Crypto(format!("noise decrypt failed: {e}")))?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    pub fn mix_into_key(&mut self, data: &[u8]) -> Result<()> {
        self.counter = 0;
        let (write, read) = self.extract_and_expand(Some(data))?;
        self.salt = write;
        self.key = gcm::prepare(&read).map_err(|e| NoiseError::Crypto(e.to_string()))?;
        Ok(())
    }

    /// X25519 agreement folded into the chaining key.
    pub fn mix_shared_secret(&mut self, own: &KeyPair, their_pub: &[u8; 32]) -> Result<()> {
        let shared_secret = own.agree(their_pub);
        self.mix_into_key(&shared_secret)
    }

    fn extract_and_expand(&self, data: Option<&[u8]>) -> Result<([u8; 32], [u8; 32])> {
        let okm = hkdf::sha256(data.unwrap_or(&[]), Some(&self.salt), &[], 64)
            .map_err(|e| NoiseError::Crypto(e.to_string()))?;

        let mut write = [0u8; 32];
        let mut read = [0u8; 32];
        write.copy_from_slice(&okm[..32]);
        read.copy_from_slice(&okm[32..]);
        Ok((write, read))
    }

    /// Final key split: independent AEAD keys for each direction.
    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        let (write_bytes, read_bytes) = self.extract_and_expand(None)?;
        let write_key =
            gcm::prepare(&write_bytes).map_err(|e| NoiseError::Crypto(e.to_string()))?;
        let read_key =
            gcm::prepare(&read_bytes).map_err(|e| NoiseError::Crypto(e.to_string()))?;
        Ok((write_key, read_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};

    #[test]
    fn iv_counter_occupies_trailing_bytes() {
        assert_eq!(generate_iv(0), [0u8; 12]);
        let iv = generate_iv(0x01020304);
        assert_eq!(&iv[..8], &[0u8; 8]);
        assert_eq!(&iv[8..], &[1, 2, 3, 4]);
    }

    #[test]
    fn symmetric_handshake_transcripts_agree() {
        // Drive both sides of one encrypt step with mirrored state.
        let mut a = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
        let mut b = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();

        let kp_a = crate::crypto::key_pair::KeyPair::new();
        let kp_b = crate::crypto::key_pair::KeyPair::new();

        a.authenticate(&kp_a.public_key);
        b.authenticate(&kp_a.public_key);
        a.mix_shared_secret(&kp_a, &kp_b.public_key).unwrap();
        b.mix_shared_secret(&kp_b, &kp_a.public_key).unwrap();

        let ct = a.encrypt(b"handshake payload").unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), b"handshake payload");

        // Both transcripts advanced identically.
        let ct2 = b.encrypt(b"reply").unwrap();
        assert_eq!(a.decrypt(&ct2).unwrap(), b"reply");
    }
}
