use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the status string of a probe that got no HTTP response.
pub const ERROR_STATUS_PREFIX: &str = "Error: ";

/// Outcome of one probe cycle, as published on the result queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,

    /// HTTP status line (`200 OK`) or `Error: <description>`
    pub status: String,

    /// Time from sending the request until the response or the failure,
    /// serialized as integer nanoseconds
    #[serde(with = "duration_nanos")]
    pub response_time: Duration,
}

impl ProbeResult {
    pub fn response(url: impl Into<String>, status_line: impl Into<String>, response_time: Duration) -> Self {
        Self { url: url.into(), status: status_line.into(), response_time }
    }

    pub fn failure(url: impl Into<String>, description: impl std::fmt::Display, response_time: Duration) -> Self {
        Self { url: url.into(), status: format!("{ERROR_STATUS_PREFIX}{description}"), response_time }
    }

    pub fn is_error(&self) -> bool {
        self.status.starts_with(ERROR_STATUS_PREFIX)
    }
}

mod duration_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_nanos)
    }
}
