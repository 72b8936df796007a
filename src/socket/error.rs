use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is closed")]
    SocketClosed,
    #[error("socket is already open")]
    SocketAlreadyOpen,
    #[error("frame too large: got {got} bytes, max {max}")]
    FrameTooLarge { max: usize, got: usize },
    #[error("crypto failure in noise socket: {0}")]
    Crypto(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, SocketError>;
