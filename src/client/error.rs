//! Error types for the compute API client.

use thiserror::Error;

/// Errors raised by [`super::Client`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// Raised when the request cannot be sent or the response cannot be read.
    #[error("{context}: transport error: {message}")]
    Transport {
        /// Operation being attempted.
        context: String,
        /// Message returned by the HTTP stack.
        message: String,
    },
    /// Raised when the provider answers with a non-success status.
    #[error("{context}: {status} {body}")]
    Status {
        /// Operation being attempted.
        context: String,
        /// HTTP status line (for example `404 Not Found`).
        status: String,
        /// Response body returned by the provider.
        body: String,
    },
    /// Raised when a success response does not match the expected shape.
    #[error("{context}: unexpected response body: {message}")]
    Decode {
        /// Operation being attempted.
        context: String,
        /// Parser error message.
        message: String,
    },
}

impl ClientError {
    /// Builds a status error from the operation and the provider response.
    #[must_use]
    pub fn status(
        context: impl Into<String>,
        status: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Status {
            context: context.into(),
            status: status.into(),
            body: body.into(),
        }
    }
}
