use crate::binary::node::Node;
use thiserror::Error;

/// Why a connection ended. Every reason maps to a stable status code so
/// callers can decide whether to re-pair, reconnect or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DisconnectReason {
    ConnectionClosed,
    ConnectionLost,
    TimedOut,
    LoggedOut,
    Unpaired,
    MultideviceMismatch,
    Forbidden,
    BadSession,
    PreKeyError,
    StreamError,
    AppStateError,
    MediaError,
    InternalError,
}

impl DisconnectReason {
    pub fn status_code(&self) -> u16 {
        match self {
            DisconnectReason::ConnectionClosed => 428,
            DisconnectReason::ConnectionLost => 408,
            DisconnectReason::TimedOut => 408,
            DisconnectReason::LoggedOut => 401,
            DisconnectReason::Unpaired => 401,
            DisconnectReason::MultideviceMismatch => 411,
            DisconnectReason::Forbidden => 403,
            DisconnectReason::BadSession => 500,
            DisconnectReason::PreKeyError => 500,
            DisconnectReason::StreamError => 515,
            DisconnectReason::AppStateError => 500,
            DisconnectReason::MediaError => 500,
            DisconnectReason::InternalError => 500,
        }
    }

    /// Maps a `stream:error` code attribute to a reason.
    pub fn from_stream_error_code(code: &str) -> Self {
        match code {
            "401" => DisconnectReason::LoggedOut,
            "403" => DisconnectReason::Forbidden,
            "408" => DisconnectReason::ConnectionLost,
            "411" => DisconnectReason::MultideviceMismatch,
            "515" => DisconnectReason::StreamError,
            _ => DisconnectReason::StreamError,
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} (status {})", self, self.status_code())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection closed: {0}")]
    Disconnected(DisconnectReason),
    #[error("socket error: {0}")]
    Socket(#[from] crate::socket::error::SocketError),
    #[error("handshake error: {0}")]
    Handshake(#[from] crate::handshake::HandshakeError),
    #[error("iq error: {0}")]
    Iq(#[from] crate::request::IqError),
    #[error("binary codec error: {0}")]
    Binary(#[from] crate::binary::error::BinaryError),
    #[error("app state error: {0}")]
    AppState(#[from] crate::appstate::errors::AppStateError),
    #[error("key store error: {0}")]
    Store(#[from] crate::store::error::StoreError),
    #[error("signal error: {0}")]
    Signal(#[from] crate::signal::SignalError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("received stream:error node: {0:?}")]
    StreamError(Node),
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}
