//! Binary stanza codec: a length-discriminated, token-compressed tree
//! format carrying the XMPP-like wire protocol.

pub mod attrs;
pub mod builder;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod marshal;
pub mod node;
pub mod token;

pub use builder::NodeBuilder;
pub use marshal::{marshal, unmarshal};
pub use node::{Attrs, Node, NodeContent};
