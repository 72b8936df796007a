//! Seam to the Signal protocol engine. The double ratchet itself is a
//! collaborator; the core only decides *who* to encrypt for and carries
//! the resulting ciphertext kinds onto the wire.

use crate::types::jid::Jid;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("no usable session for {0}")]
    BadSession(String),
    #[error("pre-key processing failed: {0}")]
    PreKeyError(String),
    #[error("sender key missing for group {0}")]
    NoSenderKey(String),
    #[error("{0}")]
    Other(String),
}

/// Ciphertext kind of a per-device envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiphertextKind {
    /// `PreKeySignalMessage`: built a fresh session; requires the
    /// signed device identity alongside.
    Pkmsg,
    /// `SignalMessage`: an existing session ratcheted forward.
    Msg,
    /// `SenderKeyMessage`: group payload.
    Skmsg,
}

impl CiphertextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiphertextKind::Pkmsg => "pkmsg",
            CiphertextKind::Msg => "msg",
            CiphertextKind::Skmsg => "skmsg",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub kind: CiphertextKind,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GroupEncryptedPayload {
    /// The skmsg ciphertext for the group payload.
    pub ciphertext: Vec<u8>,
    /// Serialized sender-key distribution message for devices that have
    /// not yet received the current key.
    pub distribution_message: Vec<u8>,
}

/// A parsed pre-key bundle fetched from the server.
#[derive(Debug, Clone)]
pub struct PreKeyBundle {
    pub jid: Jid,
    pub registration_id: u32,
    pub identity_key: [u8; 32],
    pub signed_pre_key_id: u32,
    pub signed_pre_key: [u8; 32],
    pub signed_pre_key_signature: Vec<u8>,
    pub pre_key: Option<(u32, [u8; 32])>,
}

/// Opaque double-ratchet engine.
#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Establishes an outgoing session from a fetched bundle.
    async fn inject_e2e_session(
        &self,
        jid: &Jid,
        bundle: &PreKeyBundle,
    ) -> Result<(), SignalError>;

    async fn encrypt_message(
        &self,
        jid: &Jid,
        plaintext: &[u8],
    ) -> Result<EncryptedPayload, SignalError>;

    /// Encrypts a group payload with the own sender key, creating it if
    /// needed, and returns the current distribution message.
    async fn encrypt_group_message(
        &self,
        group: &Jid,
        own_jid: &Jid,
        plaintext: &[u8],
    ) -> Result<GroupEncryptedPayload, SignalError>;

    async fn decrypt_message(
        &self,
        from: &Jid,
        kind: CiphertextKind,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SignalError>;

    /// Installs a peer's sender key from a distribution message.
    async fn process_sender_key_distribution(
        &self,
        group: &Jid,
        sender: &Jid,
        distribution_message: &[u8],
    ) -> Result<(), SignalError>;
}

pub mod mock {
    //! Deterministic repository used by unit and integration tests.

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockSignalRepository {
        /// Devices with an established session; encryption for anyone
        /// else yields a pkmsg and establishes one.
        pub sessions: Mutex<HashSet<String>>,
        pub injected: Mutex<Vec<String>>,
    }

    impl MockSignalRepository {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_sessions(addresses: &[&str]) -> Self {
            Self {
                sessions: Mutex::new(addresses.iter().map(|s| s.to_string()).collect()),
                injected: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SignalRepository for MockSignalRepository {
        async fn inject_e2e_session(
            &self,
            jid: &Jid,
            _bundle: &PreKeyBundle,
        ) -> Result<(), SignalError> {
            self.injected.lock().unwrap().push(jid.signal_address());
            self.sessions.lock().unwrap().insert(jid.signal_address());
            Ok(())
        }

        async fn encrypt_message(
            &self,
            jid: &Jid,
            plaintext: &[u8],
        ) -> Result<EncryptedPayload, SignalError> {
            let address = jid.signal_address();
            let mut sessions = self.sessions.lock().unwrap();
            let kind = if sessions.contains(&address) {
                CiphertextKind::Msg
            } else {
                sessions.insert(address);
                CiphertextKind::Pkmsg
            };
            Ok(EncryptedPayload {
                kind,
                ciphertext: plaintext.to_vec(),
            })
        }

        async fn encrypt_group_message(
            &self,
            group: &Jid,
            _own_jid: &Jid,
            plaintext: &[u8],
        ) -> Result<GroupEncryptedPayload, SignalError> {
            Ok(GroupEncryptedPayload {
                ciphertext: plaintext.to_vec(),
                distribution_message: format!("skdm:{group}").into_bytes(),
            })
        }

        async fn decrypt_message(
            &self,
            _from: &Jid,
            _kind: CiphertextKind,
            ciphertext: &[u8],
        ) -> Result<Vec<u8>, SignalError> {
            Ok(ciphertext.to_vec())
        }

        async fn process_sender_key_distribution(
            &self,
            _group: &Jid,
            _sender: &Jid,
            _distribution_message: &[u8],
        ) -> Result<(), SignalError> {
            Ok(())
        }
    }
}
