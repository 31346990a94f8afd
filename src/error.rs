//! Error types for the survey bot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration errors — all fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unrecognized item kind: {kind} (item {index})")]
    UnknownItemKind { index: usize, kind: String },

    #[error("Choice item {index} has no options")]
    EmptyChoices { index: usize },

    #[error("Item definitions are empty")]
    EmptyForm,

    #[error("Failed to parse item definitions: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Traversal errors surfaced back to the user as toasts.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The event references a prompt other than the session anchor —
    /// a duplicate tap or a tap on an outdated message.
    #[error("Stale prompt {got}, current anchor is {want}")]
    StaleEvent { got: i64, want: i64 },

    #[error("No more items to answer")]
    SequenceExhausted,

    #[error("Event {event} does not apply to item {index}")]
    InvalidEvent { index: usize, event: &'static str },
}

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send message: {reason}")]
    SendFailed { reason: String },

    #[error("Failed to edit message {message_id}: {reason}")]
    EditFailed { message_id: i64, reason: String },

    #[error("Unexpected API response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(String),
}

/// Results sink errors. A failed finalize write must leave the session
/// intact so the answer set can be delivered on retry.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Results sink write failed: {0}")]
    Write(String),

    #[error("Results sink authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected sink response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
