//! Error types for the NVR client.
//!
//! All failures surface through one structured [`NvrError`] enum. The
//! taxonomy follows how far a fault can be contained:
//!
//! - **Frame errors**: malformed wire frames. Payload-scoped corruption
//!   drops a single packet; header-level corruption poisons the whole
//!   byte stream and forces a connection reset.
//! - **Content errors**: well-formed frames whose JSON is missing required
//!   fields. Always scoped to one packet.
//! - **Auth errors**: rejected credentials. Surfaced to the caller and
//!   trigger a forced refresh before the next connect attempt.
//! - **Transport errors**: the push channel dropped. Absorbed by the
//!   reconnect state machine, never surfaced to stream subscribers.
//! - **Request errors**: non-2xx outbound responses, classified against
//!   [`RetryPolicy`](crate::limits::RetryPolicy)'s retryable status set.
//!
//! ```rust
//! use nvrsync::NvrError;
//!
//! let error = NvrError::request(503, None, "gateway unavailable");
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for NVR client operations.
pub type Result<T, E = NvrError> = std::result::Result<T, E>;

/// Main error type for NVR client operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NvrError {
    #[error("Frame decode error in {context}: {details}")]
    FrameDecode {
        context: &'static str,
        details: String,
        /// True when the surrounding byte stream can no longer be trusted
        /// (header-level unpack failure) and the connection must be reset.
        stream_corrupt: bool,
    },

    #[error("Content decode error in {context}: {details}")]
    ContentDecode { context: &'static str, details: String },

    #[error("Authentication failed: {reason}")]
    Auth {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Transport error: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Request failed with status {status}: {reason}")]
    Request {
        status: u16,
        /// Server-supplied Retry-After, in seconds, when present.
        retry_after: Option<f64>,
        reason: String,
    },

    #[error("Invalid configuration for '{parameter}': {reason}")]
    InvalidConfig { parameter: &'static str, reason: String },

    #[error("Unknown model key '{key}'")]
    UnknownModel { key: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl NvrError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Request errors are classified here against the default retryable
    /// status set; a configured [`RetryPolicy`](crate::limits::RetryPolicy)
    /// may widen or narrow that set.
    pub fn is_retryable(&self) -> bool {
        match self {
            NvrError::Transport { .. } => true,
            NvrError::Timeout { .. } => true,
            NvrError::Request { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            NvrError::FrameDecode { .. } => false,
            NvrError::ContentDecode { .. } => false,
            NvrError::Auth { .. } => false,
            NvrError::InvalidConfig { .. } => false,
            NvrError::UnknownModel { .. } => false,
        }
    }

    /// Returns whether this error poisons the whole byte stream, forcing
    /// a connection reset rather than a single dropped packet.
    pub fn is_stream_corrupt(&self) -> bool {
        matches!(self, NvrError::FrameDecode { stream_corrupt: true, .. })
    }

    /// Helper constructor for packet-scoped frame decode errors.
    pub fn frame_decode(context: &'static str, details: impl Into<String>) -> Self {
        NvrError::FrameDecode { context, details: details.into(), stream_corrupt: false }
    }

    /// Helper constructor for frame decode errors that invalidate the
    /// surrounding byte stream.
    pub fn frame_corrupt(context: &'static str, details: impl Into<String>) -> Self {
        NvrError::FrameDecode { context, details: details.into(), stream_corrupt: true }
    }

    /// Helper constructor for content decode errors.
    pub fn content_decode(context: &'static str, details: impl Into<String>) -> Self {
        NvrError::ContentDecode { context, details: details.into() }
    }

    /// Helper constructor for authentication failures.
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        NvrError::Auth { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport failures.
    pub fn transport(reason: impl Into<String>) -> Self {
        NvrError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport failures with a source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        NvrError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for outbound request failures.
    pub fn request(status: u16, retry_after: Option<f64>, reason: impl Into<String>) -> Self {
        NvrError::Request { status, retry_after, reason: reason.into() }
    }

    /// Helper constructor for configuration validation failures.
    pub fn invalid_config(parameter: &'static str, reason: impl Into<String>) -> Self {
        NvrError::InvalidConfig { parameter, reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn error_messages_contain_their_context(
                details in ".*",
                reason in ".*",
                key in "\\w+",
                status in 100u16..600u16
            ) {
                let frame_err = NvrError::frame_decode("frame header", details.clone());
                prop_assert!(frame_err.to_string().contains(&details));

                let auth_err = NvrError::auth_failed(reason.clone());
                prop_assert!(auth_err.to_string().contains(&reason));

                let model_err = NvrError::UnknownModel { key: key.clone() };
                prop_assert!(model_err.to_string().contains(&key));

                let req_err = NvrError::request(status, None, reason.clone());
                prop_assert!(req_err.to_string().contains(&status.to_string()));
            }

            #[test]
            fn request_retryability_matches_default_status_set(status in 100u16..600u16) {
                let err = NvrError::request(status, None, "test");
                let expected = matches!(status, 429 | 502 | 503 | 504);
                prop_assert_eq!(err.is_retryable(), expected);
            }

            #[test]
            fn stream_corruption_is_confined_to_corrupt_frame_errors(details in ".*") {
                prop_assert!(NvrError::frame_corrupt("frame header", details.clone())
                    .is_stream_corrupt());
                prop_assert!(!NvrError::frame_decode("frame payload", details.clone())
                    .is_stream_corrupt());
                prop_assert!(!NvrError::content_decode("action", details).is_stream_corrupt());
            }
        }
    }

    #[test]
    fn error_traits_validation() {
        // Compile-time check: NvrError must be Send + Sync + 'static
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<NvrError>();

        let error = NvrError::transport("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retryability_classification() {
        assert!(NvrError::transport("dropped").is_retryable());
        assert!(NvrError::Timeout { duration: Duration::from_secs(1) }.is_retryable());
        assert!(NvrError::request(429, Some(2.0), "throttled").is_retryable());
        assert!(!NvrError::request(404, None, "missing").is_retryable());
        assert!(!NvrError::auth_failed("bad cookie").is_retryable());
        assert!(!NvrError::frame_decode("frame payload", "bad deflate").is_retryable());
    }

    #[test]
    fn source_chaining_preserved() {
        let io_err = std::io::Error::other("socket closed");
        let err = NvrError::transport_with_source("receive failed", Box::new(io_err));

        let source = std::error::Error::source(&err).expect("source present");
        assert!(source.to_string().contains("socket closed"));
    }
}
