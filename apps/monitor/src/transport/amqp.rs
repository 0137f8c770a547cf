//! AMQP 0-9-1 transport on top of `lapin`.
//!
//! Every session owns one connection and one channel. Queues are declared
//! durable, consumers use manual acknowledgement with a prefetch of one so
//! commands are applied strictly in delivery order, and results are
//! published as persistent messages on the default exchange. Channels run in
//! confirm mode, so a publish only succeeds once the broker has acked it.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::debug;
use uuid::Uuid;

use super::{Acknowledger, Broker, BrokerSession, Delivery, DeliveryStream, TransportError};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerSession>, TransportError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;

        let channel = match open_channel(&connection).await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel setup failed").await {
                    debug!("Failed to close AMQP connection: {}", close_err);
                }
                return Err(e.into());
            }
        };

        debug!("Opened AMQP session");
        Ok(Box::new(AmqpSession { connection, channel, closed: false }))
    }
}

async fn open_channel(connection: &Connection) -> Result<Channel, lapin::Error> {
    let channel = connection.create_channel().await?;
    channel.confirm_select(ConfirmSelectOptions::default()).await?;
    Ok(channel)
}

struct AmqpSession {
    connection: Connection,
    channel: Channel,
    closed: bool,
}

#[async_trait]
impl BrokerSession for AmqpSession {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), TransportError> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<DeliveryStream, TransportError> {
        self.channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer_tag = format!("uplert-monitor-{}", Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(queue, &consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await?;

        Ok(consumer
            .map(|delivery| {
                delivery
                    .map(|delivery| Delivery::new(delivery.data, Box::new(AmqpAcker(delivery.acker))))
                    .map_err(TransportError::from)
            })
            .boxed())
    }

    async fn publish(&mut self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        let confirmation = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(TransportError::Nacked);
        }
        Ok(())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.channel.close(REPLY_SUCCESS, "closing").await {
            debug!("Failed to close AMQP channel: {}", e);
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "closing").await {
            debug!("Failed to close AMQP connection: {}", e);
        }
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> Result<(), TransportError> {
        self.0.nack(BasicNackOptions { multiple: false, requeue: false }).await?;
        Ok(())
    }
}
