//! Error types for the reposter.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Moderation error: {0}")]
    Moderation(#[from] ModerationError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dedup ledger errors. An unreadable ledger stops the process.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Ledger {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Failed to persist ledger {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport errors from the feed, publish and moderator surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download media on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether this failure is a per-item network hiccup rather than a hard rejection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Http(_)
        )
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Rewrite engine errors.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Transformer failed: {0}")]
    Transformer(String),

    #[error("Regeneration limit reached ({max}/{max})")]
    RegenerationLimitExceeded { max: u32 },
}

/// Moderation queue errors.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("Post already processed or expired (token {token})")]
    Stale { token: String },

    #[error("Post {key} has no rewritten text")]
    NotRewritten { key: String },

    #[error("Post {key} is already pending moderation")]
    AlreadyPending { key: String },

    #[error("Failed to notify moderator: {0}")]
    Notify(#[source] ChannelError),

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Regeneration failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ModerationError {
    /// Ledger persistence failures stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}

/// Delivery dispatcher errors. Only the final text-only step escalates.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Text delivery to {target} failed: {source}")]
    Text {
        target: String,
        #[source]
        source: ChannelError,
    },

    #[error("Post has neither text nor deliverable media")]
    Empty,
}

/// Pipeline orchestration errors. Reported per source, except ledger
/// failures which end the run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Feed fetch failed for {source_id}: {reason}")]
    Fetch { source_id: String, reason: String },

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Moderation error: {0}")]
    Moderation(#[from] ModerationError),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Ledger(_) => true,
            Self::Moderation(e) => e.is_fatal(),
            Self::Fetch { .. } => false,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
