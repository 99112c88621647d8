use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Misconfiguration detected before the ramp starts. The only error class
/// that aborts a run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target url '{url}' is not a valid url: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("target url '{0}' must use the ws:// or wss:// scheme")]
    UnsupportedScheme(String),

    #[error("target url '{0}' has no host")]
    MissingHost(String),

    #[error("target url '{0}' still contains the placeholder host, set --target-url or TARGET_URL")]
    PlaceholderEndpoint(String),

    #[error("max connections must be at least 1")]
    EmptyPopulation,

    #[error("ramp rate must be a positive number of connections per second, got {0}")]
    InvalidRampRate(f64),

    #[error("invalid signing configuration: {0}")]
    Credential(#[from] CredentialError),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("signing secret is empty, set --jwt-secret or JWT_SECRET")]
    EmptySecret,

    #[error("signing key rejected by {algorithm}")]
    InvalidKey { algorithm: &'static str },

    #[error("failed to encode token segment: {0}")]
    Encode(#[from] sonic_rs::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] tungstenite::Error),
}

/// Why a worker left its lifecycle through the failure path. Each variant
/// is counted once in `Stats::errors`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Connect(TransportError),

    #[error("credential issuance failed: {0}")]
    Credential(#[from] CredentialError),

    #[error("handshake rejected: {reason}")]
    AuthRejected { reason: String },

    #[error("no handshake reply within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer closed the connection before replying to the handshake")]
    ClosedDuringHandshake,

    #[error(transparent)]
    Transport(TransportError),

    #[error("no inbound message for {0:?}")]
    IdleTimeout(Duration),
}
