//! Server-synced application state: LT-hash digests, snapshot and patch
//! decoding, MAC verification and patch creation.

pub mod encode;
pub mod errors;
pub mod hash;
pub mod keys;
pub mod lthash;
pub mod processor;
pub mod sync;

/// The fixed collection set, in the order initial sync requests them.
pub const ALL_COLLECTIONS: [&str; 5] = [
    "critical_block",
    "critical_unblock_low",
    "regular_high",
    "regular_low",
    "regular",
];

/// Retries per collection before a sync cycle abandons it.
pub const MAX_SYNC_ATTEMPTS: u32 = 2;
