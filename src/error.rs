//! Error types shared across the engine.
//!
//! Every failure an exchange can produce is ultimately folded into a
//! [`Status`](crate::Status) variant and delivered through the outcome
//! callback; nothing here escapes to the caller's execution context as a
//! panic or stray `Err`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The outgoing request body failed to encode. Terminal and pre-network:
    /// no transport task is created for a request whose body cannot encode.
    #[error("failed to encode request body: {0}")]
    Serialization(#[source] serde_json::Error),

    /// The response body failed to decode into the expected payload schema.
    /// The raw bytes and response metadata are still attached to the outcome.
    #[error("failed to decode response body: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// Low-level transport failure carrying the transport's error code.
    /// Well-known codes are mapped onto dedicated status variants; anything
    /// else surfaces as `Status::OtherError` wrapping this.
    #[error("transport error {code}: {message}")]
    Transport { code: i32, message: String },
}
