use std::time::Duration;

/// A monitored endpoint and how often to probe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Identity of the target, kept exactly as received.
    pub url: String,
    pub interval_seconds: u64,
}

impl Target {
    pub fn new(url: impl Into<String>, interval_seconds: u64) -> Self {
        Self { url: url.into(), interval_seconds }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}
