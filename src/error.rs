//! Error types for the stream client.

use thiserror::Error;

/// Classification of a failed publish attempt.
///
/// Retrying is the caller's responsibility; the kind tells the caller
/// whether a retry can possibly help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFailure {
    /// The broker did not confirm persistence in time.
    Timeout,
    /// No stream captures the published subject.
    NoStreamMatched,
    /// The broker rejected the message.
    Rejected,
}

impl std::fmt::Display for PublishFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishFailure::Timeout => write!(f, "timeout"),
            PublishFailure::NoStreamMatched => write!(f, "no stream matched"),
            PublishFailure::Rejected => write!(f, "rejected"),
        }
    }
}

/// Stream client error types.
///
/// Variants hold rendered messages rather than source errors so the type
/// stays `Clone` and can travel through the facade status channel.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Credentials or client certificate were not accepted.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// TLS handshake or certificate validation failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Transient transport failure; the connector retries with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// Invalid or inconsistent client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Stream re-declared with an incompatible shape.
    #[error("stream '{stream}' already exists with a different {field}")]
    Conflict { stream: String, field: &'static str },

    /// Broker-side failure outside the other categories.
    #[error("broker error: {0}")]
    Broker(String),

    /// Publish was not confirmed by the broker.
    #[error("publish failed ({kind}): {message}")]
    Publish {
        kind: PublishFailure,
        message: String,
    },

    /// Acknowledgment could not be confirmed after bounded retries.
    /// The message stays redeliverable; handlers must tolerate duplicates.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Payload serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The client was closed or hit a fatal error; rebuild to continue.
    #[error("client is closed")]
    Closed,
}

impl ClientError {
    /// Fatal errors indicate a misconfiguration no retry resolves.
    /// They are funneled into the facade status channel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Auth(_)
                | ClientError::Tls(_)
                | ClientError::Config(_)
                | ClientError::Conflict { .. }
        )
    }

    pub(crate) fn broker(err: impl std::fmt::Display) -> Self {
        ClientError::Broker(err.to_string())
    }

    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        ClientError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

/// Result type alias for stream client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
