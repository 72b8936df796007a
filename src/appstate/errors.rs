use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("mismatching LT-hash after patch application")]
    MismatchingLtHash,
    #[error("mismatching patch MAC")]
    MismatchingPatchMac,
    #[error("mismatching snapshot MAC")]
    MismatchingSnapshotMac,
    #[error("mismatching content MAC for {0}")]
    MismatchingContentMac(String),
    #[error("mismatching index MAC")]
    MismatchingIndexMac,
    #[error("app state sync key not found: {}", hex::encode(.0))]
    KeyNotFound(Vec<u8>),
    #[error("record is missing a required field: {0}")]
    MissingField(&'static str),
    #[error("value blob too short: {0} bytes")]
    ValueBlobTooShort(usize),
    #[error("failed to decrypt mutation value: {0}")]
    Decrypt(#[from] crate::crypto::cbc::CbcError),
    #[error("failed to decode protobuf: {0}")]
    Unmarshal(#[from] prost::DecodeError),
    #[error("failed to decode index JSON: {0}")]
    IndexJson(#[from] serde_json::Error),
    #[error("key store failure: {0}")]
    Store(#[from] crate::store::error::StoreError),
    #[error("failed to encrypt mutation: {0}")]
    Encrypt(String),
}

impl AppStateError {
    /// Structural decode failures cannot be healed by wiping local state
    /// and retrying; the sync loop abandons the collection immediately.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(
            self,
            AppStateError::Unmarshal(_)
                | AppStateError::IndexJson(_)
                | AppStateError::MissingField(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppStateError>;
