//! Multi-device WhatsApp-compatible client core.
//!
//! The crate is organised around one logical task per connection: bytes
//! arrive over the [`transport`], are unframed and decrypted by the
//! [`socket`] layer, decoded by the [`binary`] codec and dispatched by the
//! [`router`]. Outbound messages flow through [`send`] (device fanout and
//! Signal encryption) back down the same stack. Server-held application
//! state is reconciled by the [`appstate`] engine.
//!
//! Persistence, double-ratchet primitives, media transfer and message
//! construction are collaborator seams ([`store`], [`signal`],
//! [`externals`]) — the core never defines their storage or wire formats.

pub mod appstate;
pub mod binary;
pub mod bus;
pub mod client;
pub mod config;
pub mod creds;
pub mod crypto;
pub mod error;
pub mod externals;
pub mod handshake;
pub mod message;
pub mod pair;
pub mod prekeys;
pub mod proto;
pub mod request;
pub mod router;
pub mod send;
pub mod signal;
pub mod socket;
pub mod store;
pub mod testutil;
pub mod transport;
pub mod types;
pub mod usync;

pub use client::Client;
pub use config::SocketConfig;
pub use creds::Creds;
pub use error::{ClientError, DisconnectReason};
pub use types::events::Event;
pub use types::jid::Jid;
