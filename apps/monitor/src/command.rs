//! Configuration commands consumed from the request queue.
//!
//! Wire shape: `{"url": "<absolute URL>", "interval": "<seconds>" | "delete"}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DELETE: &str = "delete";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("invalid target url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid interval {0:?}: expected a positive number of seconds or \"delete\"")]
    InvalidInterval(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct WireCommand {
    url: String,
    interval: String,
}

/// A validated configuration change for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    Upsert { url: String, interval_seconds: u64 },
    Delete { url: String },
}

impl ConfigCommand {
    /// Validate a url/interval pair as it appears on the wire.
    pub fn parse(url: &str, interval: &str) -> Result<Self, CommandError> {
        validate_target_url(url)?;

        if interval == DELETE {
            return Ok(Self::Delete { url: url.to_string() });
        }

        // Stored as a signed INTEGER column, so the upper bound is i64::MAX.
        match interval.parse::<i64>() {
            Ok(seconds) if seconds > 0 && !interval.starts_with('+') => {
                Ok(Self::Upsert { url: url.to_string(), interval_seconds: seconds.unsigned_abs() })
            }
            _ => Err(CommandError::InvalidInterval(interval.to_string())),
        }
    }

    pub fn from_json(body: &[u8]) -> Result<Self, CommandError> {
        let wire: WireCommand = serde_json::from_slice(body)?;
        Self::parse(&wire.url, &wire.interval)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let wire = match self {
            Self::Upsert { url, interval_seconds } => {
                WireCommand { url: url.clone(), interval: interval_seconds.to_string() }
            }
            Self::Delete { url } => WireCommand { url: url.clone(), interval: DELETE.to_string() },
        };
        serde_json::to_vec(&wire)
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Upsert { url, .. } | Self::Delete { url } => url,
        }
    }
}

/// The url is used verbatim as the target identity; it only has to be an
/// absolute http(s) url with a host.
fn validate_target_url(target: &str) -> Result<(), CommandError> {
    let invalid = |reason: String| CommandError::InvalidUrl { url: target.to_string(), reason };

    if target.trim().is_empty() {
        return Err(invalid("url cannot be empty".into()));
    }

    let url = Url::parse(target).map_err(|e| {
        if target.contains("://") { invalid(e.to_string()) } else { invalid("missing scheme".into()) }
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    }

    if url.host_str().is_none() {
        return Err(invalid("url must have a host".into()));
    }

    Ok(())
}
