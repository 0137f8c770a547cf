//! Config intake: consumes commands from the request queue and applies them.
//!
//! A command is acknowledged only after the store write succeeded. Malformed
//! commands and store failures are rejected without requeue. Any transport
//! failure tears the session down and a fresh one is opened after the fixed
//! reconnect delay.

use futures::StreamExt;
use thiserror::Error;
use tracing::{error, info, warn};

use super::Orchestrator;
use crate::command::{CommandError, ConfigCommand};
use crate::database::StoreError;
use crate::transport::{BrokerSession, Delivery, TransportError};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Malformed(#[from] CommandError),
    #[error("failed to persist command: {0}")]
    Store(#[from] StoreError),
}

impl Orchestrator {
    /// Consume until shutdown, reconnecting after every session loss.
    pub(crate) async fn consume_commands(&self) {
        loop {
            let outcome = self.consume_session().await;
            if self.shutdown.is_cancelled() {
                break;
            }

            match outcome {
                Ok(()) => warn!("Command stream ended, reconnecting in {:?}", self.settings.reconnect_delay),
                Err(e) => warn!(
                    "Command consumer failed, reconnecting in {:?}: {}",
                    self.settings.reconnect_delay, e
                ),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
        info!("Command intake stopped");
    }

    /// One broker session, released on every exit path.
    async fn consume_session(&self) -> Result<(), TransportError> {
        let mut session = self.broker.connect().await?;
        let outcome = self.consume_deliveries(session.as_mut()).await;
        session.close().await;
        outcome
    }

    async fn consume_deliveries(&self, session: &mut dyn BrokerSession) -> Result<(), TransportError> {
        let queue = &self.settings.request_queue;
        session.declare_queue(queue).await?;
        let mut deliveries = session.consume(queue).await?;
        info!(queue = %queue, "Waiting for config commands");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = deliveries.next() => next,
            };

            match next {
                Some(delivery) => self.process_delivery(delivery?).await?,
                None => return Ok(()),
            }
        }
    }

    /// Apply one delivery and settle it with the broker.
    pub(crate) async fn process_delivery(&self, delivery: Delivery) -> Result<(), TransportError> {
        match self.apply_payload(&delivery.body).await {
            Ok(()) => delivery.ack().await,
            Err(IntakeError::Malformed(e)) => {
                warn!("Rejecting config command: {}", e);
                delivery.reject().await
            }
            Err(IntakeError::Store(e)) => {
                error!("Rejecting config command, store write failed: {}", e);
                delivery.reject().await
            }
        }
    }

    /// Parse and apply a raw command body.
    pub async fn apply_payload(&self, body: &[u8]) -> Result<(), IntakeError> {
        let command = ConfigCommand::from_json(body)?;
        self.apply_command(command).await?;
        Ok(())
    }
}
