use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("failed to decode stored record: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
