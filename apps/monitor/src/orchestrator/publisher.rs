use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitoring::ProbeResult;
use crate::transport::{Broker, BrokerSession, TransportError};

/// Single consumer of the probe result channel.
///
/// Keeps one broker session open across results. A result that cannot be
/// published is dropped, and the session is released so the next result
/// starts from a fresh connection.
pub struct ResultPublisher {
    broker: Arc<dyn Broker>,
    queue: String,
    results: mpsc::Receiver<ProbeResult>,
    session: Option<Box<dyn BrokerSession>>,
}

impl ResultPublisher {
    pub fn new(broker: Arc<dyn Broker>, queue: String, results: mpsc::Receiver<ProbeResult>) -> Self {
        Self { broker, queue, results, session: None }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.results.recv() => next,
            };
            match next {
                Some(result) => self.publish(result).await,
                None => break,
            }
        }

        // Flush what the probe tasks already handed over.
        self.results.close();
        while let Some(result) = self.results.recv().await {
            self.publish(result).await;
        }

        self.release().await;
        info!("Result publisher stopped");
    }

    pub(crate) async fn publish(&mut self, result: ProbeResult) {
        let payload = match serde_json::to_vec(&result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(url = %result.url, "Failed to encode probe result: {}", e);
                return;
            }
        };

        if let Err(e) = self.try_publish(&payload).await {
            warn!(url = %result.url, "Dropping probe result, publish failed: {}", e);
            self.release().await;
        }
    }

    async fn try_publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                let mut session = self.broker.connect().await?;
                if let Err(e) = session.declare_queue(&self.queue).await {
                    session.close().await;
                    return Err(e);
                }
                debug!(queue = %self.queue, "Opened result publisher session");
                session
            }
        };
        let published = session.publish(&self.queue, payload).await;
        self.session = Some(session);
        published
    }

    async fn release(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
