use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};

use crate::command::ConfigCommand;
use crate::config::Config;
use crate::monitoring::ProbeResult;
use crate::transport::{AmqpBroker, Broker, BrokerSession};

#[derive(Parser, Debug)]
#[command(name = "uplert-monitor", author, version, about = "Probe HTTP targets configured over AMQP")]
pub struct Cli {
    /// Config file, created with defaults when missing
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the monitor (default)
    Run,
    /// Publish one config command to the request queue
    Send {
        url: String,
        /// Probe interval in seconds, or "delete"
        interval: String,
    },
    /// Print probe results from the result queue until ctrl-c
    Tail,
}

/// Validate and publish a single config command.
pub async fn send(config: &Config, url: &str, interval: &str) -> Result<()> {
    let command = ConfigCommand::parse(url, interval)?;
    let payload = command.to_json().context("failed to encode command")?;

    let broker = AmqpBroker::new(config.amqp.url.clone());
    let mut session = broker.connect().await.with_context(|| {
        format!("failed to connect to {}", config.amqp.redacted_url())
    })?;
    let published = publish_command(session.as_mut(), &config.amqp.request_queue, &payload).await;
    session.close().await;
    published?;

    info!(url = %command.url(), interval, "Sent config command");
    Ok(())
}

async fn publish_command(session: &mut dyn BrokerSession, queue: &str, payload: &[u8]) -> Result<()> {
    session.declare_queue(queue).await?;
    session.publish(queue, payload).await?;
    Ok(())
}

/// Log every result published by the monitor until interrupted.
pub async fn tail(config: &Config) -> Result<()> {
    let broker = AmqpBroker::new(config.amqp.url.clone());
    let mut session = broker.connect().await.with_context(|| {
        format!("failed to connect to {}", config.amqp.redacted_url())
    })?;
    let tailed = tail_results(session.as_mut(), &config.amqp.result_queue).await;
    session.close().await;
    tailed
}

async fn tail_results(session: &mut dyn BrokerSession, queue: &str) -> Result<()> {
    session.declare_queue(queue).await?;
    let mut deliveries = session.consume(queue).await?;
    info!(queue = %queue, "Waiting for probe results, press ctrl-c to stop");

    loop {
        let delivery = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = deliveries.next() => match next {
                Some(delivery) => delivery?,
                None => return Ok(()),
            },
        };

        match serde_json::from_slice::<ProbeResult>(&delivery.body) {
            Ok(result) if result.is_error() => warn!(
                url = %result.url,
                status = %result.status,
                response_time = ?result.response_time,
                "Probe failed"
            ),
            Ok(result) => info!(
                url = %result.url,
                status = %result.status,
                response_time = ?result.response_time,
                "Probe result"
            ),
            Err(e) => warn!("Skipping unreadable result: {}", e),
        }
        delivery.ack().await?;
    }
}
