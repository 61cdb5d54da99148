use thiserror::Error;

use crate::{Body, OptionKey};

/// Errors that can occur while addressing, encoding or correlating messages.
#[derive(Error, Debug)]
pub enum MessagingError {
    /// A required option was not supplied.
    ///
    /// Raised before any transport interaction takes place.
    #[error("options must contain key {0}")]
    MissingOption(OptionKey),

    /// The transport failed to publish, subscribe, ack or unsubscribe.
    ///
    /// Propagated unchanged; this layer never retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// A structured body could not be serialized.
    #[error("failed to encode body: {0}")]
    Encode(#[source] serde_yaml::Error),

    /// A payload flagged as structured could not be parsed.
    #[error("failed to decode body: {0}")]
    Decode(#[source] serde_yaml::Error),

    /// A structured body did not match the requested type.
    #[error("body does not match the requested type: {0}")]
    Conversion(#[source] serde_yaml::Error),

    /// No reply arrived within the configured reply timeout.
    #[error("timed out waiting for reply")]
    Timeout,

    /// The subscription inbox closed before a message arrived.
    #[error("subscription to {0} closed before a reply arrived")]
    SubscriptionClosed(String),

    /// More than one message arrived on a one-shot reply destination.
    ///
    /// `first` is the decoded reply that was received first.
    #[error("protocol violation: {extra} unexpected message(s) on reply destination {destination}")]
    DuplicateReply {
        destination: String,
        extra: usize,
        first: Box<Body>,
    },

    /// A reply carried a correlation id other than the one awaited.
    #[error("protocol violation: expected correlation id {expected}, got {actual}")]
    CorrelationMismatch { expected: String, actual: String },
}

/// Result type alias for messaging operations
pub type Result<T> = std::result::Result<T, MessagingError>;
