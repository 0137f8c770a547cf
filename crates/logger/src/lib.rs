//! Tracing setup shared by the uplert binaries.
//!
//! The level defaults to whatever the caller passes and can be overridden with
//! `RUST_LOG`. `RUST_LOG_FORMAT=json` switches the output to JSON lines, which
//! is what the container deployments ship to the log collector.

use std::env::var;

pub use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, Registry,
    filter::EnvFilter,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Reads the format from `RUST_LOG_FORMAT`, defaulting to compact output.
    pub fn from_env() -> Self {
        var("RUST_LOG_FORMAT").map(|value| Self::parse(&value)).unwrap_or_default()
    }

    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") { Self::Json } else { Self::Compact }
    }
}

/// Install the global subscriber. Panics if one is already installed.
pub fn init_tracing(level: LevelFilter) {
    tracing_subscriber::registry().with(log_layer(level, LogFormat::from_env())).init();
}

/// Like [`init_tracing`] but tolerates an already installed subscriber, which
/// is the normal case when several tests in one binary ask for logging.
pub fn try_init_tracing(level: LevelFilter) -> Result<(), TryInitError> {
    tracing_subscriber::registry().with(log_layer(level, LogFormat::from_env())).try_init()
}

fn log_layer(level: LevelFilter, format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_filter(env_filter)
            .boxed(),
    }
}
