use std::error::Error as _;
use std::time::Duration;

use thiserror::Error;

/// Why a probe produced no HTTP response.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Request(String),
}

/// Performs a single request against a target.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Return the response's status line, e.g. `200 OK`. Any HTTP response
    /// counts, whatever its code; only the absence of a response is an error.
    async fn probe(&self, url: &str) -> Result<String, ProbeError>;
}

/// HTTP/HTTPS prober sharing one connection pool across all targets
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).user_agent(user_agent).build()?;

        Ok(Self { client, timeout })
    }

    fn classify(&self, error: reqwest::Error) -> ProbeError {
        if error.is_timeout() {
            return ProbeError::Timeout(self.timeout);
        }

        // The cause (refused, dns, tls) is in the source chain.
        let mut description = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            description.push_str(": ");
            description.push_str(&cause.to_string());
            source = cause.source();
        }
        ProbeError::Request(description)
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> Result<String, ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| self.classify(e))?;
        Ok(response.status().to_string())
    }
}
