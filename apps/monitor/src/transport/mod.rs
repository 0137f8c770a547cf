/// Message transport abstraction
///
/// The orchestrator only sees [`Broker`] and [`BrokerSession`]: a broker
/// hands out sessions, a session declares durable queues, consumes with
/// manual acknowledgement and publishes. Sessions must be closed explicitly
/// with [`BrokerSession::close`] on every exit path.
pub mod amqp;

pub use amqp::AmqpBroker;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("session closed by the broker")]
    Closed,
    #[error("broker refused the published message")]
    Nacked,
}

/// Stream of deliveries from one consumer. Ends or yields an error when the
/// underlying session is lost.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, TransportError>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh session.
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, TransportError>;
}

#[async_trait]
pub trait BrokerSession: Send {
    /// Declare a durable queue, creating it if needed.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), TransportError>;

    /// Start consuming `queue` with manual acknowledgement.
    async fn consume(&mut self, queue: &str) -> Result<DeliveryStream, TransportError>;

    /// Publish a persistent JSON message to `queue`.
    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Release the session. Idempotent, errors are logged and swallowed.
    async fn close(&mut self);
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;

    /// Negative acknowledgement without requeue.
    async fn reject(&self) -> Result<(), TransportError>;
}

/// A consumed message awaiting acknowledgement.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Self { body, acker }
    }

    pub async fn ack(self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    pub async fn reject(self) -> Result<(), TransportError> {
        self.acker.reject().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("body_len", &self.body.len()).finish_non_exhaustive()
    }
}
