//! Error types for the broker core and its transport.
//!
//! The routing errors (`MalformedEnvelope`, `EmptyBody`, `QueueEmpty`) are
//! recoverable: the dispatcher drops the offending message and keeps going.
//! `Interrupted` is not a fault at all, it is how the transport reports that
//! its [`Context`](crate::Context) is shutting down.

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the broker.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A message arrived without the leading address frame its channel
    /// requires.
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: &'static str },

    /// The message carries an address but no body frame to inspect.
    #[error("Message has no body frame")]
    EmptyBody,

    /// A dispatch was attempted while no worker was ready.
    #[error("No ready worker available")]
    QueueEmpty,

    /// The transport context was interrupted.
    #[error("Transport interrupted")]
    Interrupted,

    /// Stream I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire frame could not be encoded or decoded.
    #[error("Codec error: {reason}")]
    Codec { reason: String },

    /// The endpoint string could not be parsed.
    #[error("Invalid endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        endpoint: String,
        reason: &'static str,
    },

    /// Another socket in the same context is already bound to the endpoint.
    #[error("Address already in use: {endpoint}")]
    AddressInUse { endpoint: String },

    /// Nothing is bound at the endpoint.
    #[error("Connection refused: {endpoint}")]
    ConnectionRefused { endpoint: String },

    /// The other end of a connection is gone.
    #[error("Peer disconnected")]
    Disconnected,

    /// A socket operation was called out of its allowed order.
    #[error("Invalid socket state: {reason}")]
    InvalidState { reason: &'static str },

    /// Unknown dispatcher mode name.
    #[error("Invalid mode `{value}` (expected `poll` or `reactor`)")]
    InvalidMode { value: String },
}

impl Error {
    /// Returns `true` if this error is the transport's shutdown signal.
    ///
    /// Event loops treat this as a normal exit path rather than a failure.
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Returns `true` if the error concerns a single message and the loop
    /// should drop it and continue.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::MalformedEnvelope { .. } | Self::EmptyBody | Self::QueueEmpty
        )
    }
}
