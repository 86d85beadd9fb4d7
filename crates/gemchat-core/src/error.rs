//! Error kinds for the chat core
//!
//! Each kind has its own recovery action: configuration errors stop startup in live mode,
//! upstream errors end the current turn, persistence errors are logged and swallowed.

use thiserror::Error;

/// Startup configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no Gemini API key found; set GOOGLE_API_KEY or add api_key to {0}")]
    MissingApiKey(String),

    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the model client while producing a reply
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gemini API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream interrupted: {0}")]
    Stream(String),

    #[error("could not decode response chunk: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Gemini blocked the reply ({0})")]
    Blocked(String),

    #[error("Gemini returned an empty reply")]
    EmptyReply,
}

/// Failures reading or writing the history file
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("history file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("history file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why the controller refused an event. No state changes when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("message is empty")]
    EmptyInput,

    #[error("a reply is still being generated")]
    Busy,

    #[error("live mode needs an API key")]
    LiveUnavailable,
}
