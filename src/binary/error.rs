use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum BinaryError {
    #[error("unexpected end of data")]
    Eof,
    #[error("invalid or reserved token: {0}")]
    InvalidToken(u8),
    #[error("invalid node structure")]
    InvalidNode,
    #[error("attribute key is not a string")]
    NonStringKey,
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,
    #[error("failed to parse attribute: {0}")]
    AttrParse(String),
    #[error("missing required attribute: {0}")]
    MissingAttr(String),
    #[error("multiple attribute errors: {0:?}")]
    AttrList(Vec<BinaryError>),
    #[error("i/o error while encoding: {0}")]
    Io(String),
    #[error("failed to inflate compressed frame: {0}")]
    Inflate(String),
}

impl From<std::io::Error> for BinaryError {
    fn from(e: std::io::Error) -> Self {
        BinaryError::Io(e.to_string())
    }
}

impl From<std::str::Utf8Error> for BinaryError {
    fn from(_: std::str::Utf8Error) -> Self {
        BinaryError::InvalidUtf8
    }
}

pub type Result<T> = std::result::Result<T, BinaryError>;
