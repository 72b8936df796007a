//! Collaborator seams the core consumes but does not implement.

use crate::types::jid::Jid;
use async_trait::async_trait;

/// Time source, injectable so tests can drive QR rotation and cache
/// expiry deterministically.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
    fn now_instant(&self) -> std::time::Instant;
}

/// Wall clock used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
    fn now_instant(&self) -> std::time::Instant {
        // Sourced through the runtime so paused-clock tests advance it
        // together with the timers.
        tokio::time::Instant::now().into_std()
    }
}

/// Uploads encrypted media bytes and returns the resulting URL; retries
/// and CDN routing live behind this seam.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, bytes: &[u8], media_type: &str) -> anyhow::Result<String>;
}

/// Builds protobuf message payloads from high-level content. The core
/// only ever relays what this produces.
pub trait MessageBuilder: Send + Sync {
    fn build_text(&self, text: &str) -> crate::proto::Message;
}

/// Group metadata lookup, typically backed by a `w:g2` IQ wrapper
/// outside the core.
#[async_trait]
pub trait GroupMetadataResolver: Send + Sync {
    async fn participants(&self, group: &Jid) -> anyhow::Result<Vec<Jid>>;
}
