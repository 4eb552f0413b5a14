//! # Broker Transport
//!
//! Provider-agnostic interface to the message broker, with a RabbitMQ implementation
//! over `lapin` and an in-memory implementation for tests and local development.
//!
//! ## Subscription discipline
//!
//! Every `subscribe` call owns an independent consumer with at most one unacknowledged
//! message. A delivery is acknowledged when its handler returns `Ok`, and rejected
//! without requeue when the handler fails or panics. The next delivery on the same
//! queue is never handed to the handler before the previous one has settled, so a slow
//! handler stalls only its own queue.

pub mod in_memory;
pub mod rabbitmq;
pub mod retry;

pub use in_memory::{InMemoryBroker, InMemoryConnector};
pub use rabbitmq::{RabbitMqClient, RabbitMqConnector};
pub use retry::{connect_with_retry, RetryPolicy};

use crate::error::BoticaResult;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Handler invoked once per delivered message body
pub type MessageHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Operations the runtime needs from a connected broker
#[async_trait]
pub trait BrokerClient: Send + Sync + fmt::Debug {
    /// Declare a queue; declaring an existing queue is a no-op
    async fn create_queue(&self, queue: &str) -> BoticaResult<()>;

    /// Route messages published to `exchange` under `routing_key` into `queue`
    async fn bind(&self, exchange: &str, routing_key: &str, queue: &str) -> BoticaResult<()>;

    /// Fire-and-forget publish
    async fn publish(&self, exchange: &str, routing_key: &str, payload: Vec<u8>)
        -> BoticaResult<()>;

    /// Start consuming `queue` with an independent prefetch-one consumer
    async fn subscribe(&self, queue: &str, handler: MessageHandler) -> BoticaResult<()>;

    /// Live connection state, updated asynchronously on close or transport error
    fn is_connected(&self) -> bool;

    async fn close(&self) -> BoticaResult<()>;
}

/// Produces connected broker clients
#[async_trait]
pub trait BrokerConnector: Send + Sync + fmt::Debug {
    async fn connect(&self) -> BoticaResult<Arc<dyn BrokerClient>>;
}
