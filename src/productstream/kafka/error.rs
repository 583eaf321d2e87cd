//! Broker error classification.

use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::error::Error;
use std::fmt;

/// True for authentication failures, which are fatal on both sides of the
/// pipeline: retrying with the same bad credentials cannot succeed, so the
/// process terminates and credentials are fixed externally.
pub fn is_fatal_auth(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(RDKafkaErrorCode::Authentication)
            | Some(RDKafkaErrorCode::SaslAuthenticationFailed)
    )
}

/// Producer-side failures surfaced to the producer loop.
#[derive(Debug)]
pub enum PublishError {
    /// The outbound queue stayed full through the bounded retry; the cycle
    /// fails and the same range is re-extracted later.
    QueueFull,
    /// Fatal: terminate the process.
    Authentication(String),
    /// Any other broker error; transient at the cycle level.
    Broker(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::QueueFull => write!(f, "producer queue full after retry"),
            PublishError::Authentication(msg) => {
                write!(f, "broker authentication failed: {}", msg)
            }
            PublishError::Broker(msg) => write!(f, "broker error: {}", msg),
        }
    }
}

impl Error for PublishError {}

/// Consumer-side failures surfaced to the consumer loop.
#[derive(Debug)]
pub enum ConsumeError {
    /// Fatal: terminate the process.
    Authentication(String),
    /// Any other broker error; the iteration is skipped.
    Broker(String),
}

impl fmt::Display for ConsumeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumeError::Authentication(msg) => {
                write!(f, "broker authentication failed: {}", msg)
            }
            ConsumeError::Broker(msg) => write!(f, "broker error: {}", msg),
        }
    }
}

impl Error for ConsumeError {}
