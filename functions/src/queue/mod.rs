// functions/src/queue/mod.rs

use std::future::Future;

pub mod memory;
pub mod service_bus;

pub use self::memory::MemoryQueue;
pub use self::service_bus::ServiceBusSource;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("service bus: {0}")]
    ServiceBus(#[from] azure_core::Error),
    #[error("service bus returned status {0}")]
    Status(azure_core::StatusCode),
    #[error("queue closed")]
    Closed,
}

/// An at-least-once channel of notifications.
pub trait MessageSource {
    type Delivery: Delivery + Send + Sync + 'static;

    /// Claim the next message, or `None` when nothing is available right now.
    fn receive(&self) -> impl Future<Output = Result<Option<Self::Delivery>, QueueError>> + Send;
}

/// A claimed message. It stays invisible to other consumers until it is
/// settled or its lock expires.
pub trait Delivery {
    fn data(&self) -> &[u8];

    /// Remove the message from the queue.
    fn ack(self) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Release the message for redelivery.
    fn nack(self) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Push back the redelivery deadline.
    fn renew(&self) -> impl Future<Output = Result<(), QueueError>> + Send;
}
