//! Global tracing subscriber setup.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;

/// Configuration for [`init_tracing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_directive: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            json: false,
        }
    }
}

impl TracingConfig {
    /// Creates a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_default_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Error raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TracingInitError {
    /// The filter directive could not be parsed.
    #[error("invalid filter directive: {0}")]
    Filter(#[from] ParseError),

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    Init(#[from] TryInitError),
}

/// Builds the filter: `RUST_LOG` when set, the configured default otherwise.
fn build_filter(env_directive: Option<&str>, default_directive: &str) -> Result<EnvFilter, ParseError> {
    match env_directive {
        Some(directive) if !directive.trim().is_empty() => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(default_directive),
    }
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the directive is invalid or a subscriber is already set.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TracingInitError> {
    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(env_directive.as_deref(), &config.default_directive)?;
    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}
