use async_trait::async_trait;

use super::Result;

pub mod go_channel;
pub mod sqs;

pub use self::go_channel::GoChannelSource;
pub use self::sqs::SqsSource;

/// Opaque token handed back by a source alongside a received message.
///
/// Acking a token is irreversible and idempotent on repeat; sources that
/// have no concept of acknowledgement (e.g. `GoChannelSource`) treat it as
/// a no-op.
#[derive(Clone)]
pub struct AckToken(pub(crate) AckTokenInner);

#[derive(Clone)]
pub(crate) enum AckTokenInner {
    None,
    Sqs { receipt_handle: String },
    Mock { id: u64 },
}

/// A single message pulled from a source, paired with its ack token.
pub struct ReceivedMessage {
    pub bytes: Vec<u8>,
    pub ack_token: AckToken,
}

/// The pull-based ingress capability a `Worker` consumes.
///
/// Implementations must be safe to call `receive` from a single reader per
/// queue; `send`, `ack`, and `close` may be called from any task.
#[async_trait]
pub trait Source: Send + Sync {
    /// Block until at least one message is available or the source closes.
    ///
    /// Returns a non-empty batch, or `Ok(vec![])` only when the source has
    /// been closed (callers should treat an empty batch as end-of-stream).
    async fn receive(&self) -> Result<Vec<ReceivedMessage>>;

    /// Irreversibly remove a message from the source. Idempotent on repeat.
    async fn ack(&self, token: AckToken) -> Result<()>;

    /// Ingress used by producers and tests.
    async fn send(&self, bytes: Vec<u8>) -> Result<()>;

    /// Signal end-of-stream; subsequent `receive` calls return immediately
    /// with `Ok(vec![])` (after any already in-flight receive settles).
    async fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
