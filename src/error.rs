//! Error types for the FleetCron agent.

use thiserror::Error;

/// Configuration-related errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found next to the executable or in {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Store Gateway errors. Transient errors let the tick continue; fatal ones
/// abort startup.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient store error: {0}")]
    Transient(String),

    #[error("fatal store error: {0}")]
    Fatal(String),
}

/// HTTP Step Runner errors, surfaced after retry exhaustion.
#[derive(Error, Debug, Clone)]
pub enum HttpStepError {
    #[error("http {status_code}: {body}")]
    BadStatus { status_code: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("curl transport unavailable: {0}")]
    CurlUnavailable(String),
}

/// Action-chain level error: a non-`continue_on_failure` step errored.
#[derive(Error, Debug)]
#[error("action chain aborted at step {step_index} ({step_name}): {source}")]
pub struct ActionChainAborted {
    pub step_index: usize,
    pub step_name: String,
    #[source]
    pub source: HttpStepError,
}

/// Telegram notification errors. Never fatal, always logged.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("telegram send failed: {0}")]
    SendFailed(String),

    #[error("telegram not configured")]
    NotConfigured,
}

/// Top-level error type used at the binary boundary.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("no available slot for this machine")]
    NoAvailableSlot,
}
