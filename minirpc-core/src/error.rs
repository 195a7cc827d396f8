//! Error types for minirpc
//!
//! Variants carry strings so the error stays `Clone`; one connection failure
//! is delivered to every call in flight on it.

/// Standard error type for minirpc operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Frame did not start with the protocol magic number
    #[error("Magic number mismatch: {0:?}")]
    MagicMismatch([u8; 4]),

    /// Frame carried a protocol version this implementation does not speak
    #[error("Incompatible protocol version: {0}")]
    VersionMismatch(u8),

    /// Frame length field exceeded the configured bound
    #[error("Frame of {length} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    /// Any other malformed frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Body (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Body (de)compression failed
    #[error("Compression error: {0}")]
    Compression(String),

    /// Could not establish a connection to the target address
    #[error("Unable to connect to {0}")]
    ConnectUnreachable(String),

    /// Connection exists but is closed or not accepting writes
    #[error("Channel not active: {0}")]
    ChannelNotActive(String),

    /// Connection was lost while a call was pending
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing a frame to the socket failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Caller-imposed deadline elapsed
    #[error("Call {0} timed out")]
    Timeout(String),

    /// Address string could not be parsed or resolved
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// No provider is known for the service
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No method on the service matches name and parameter types
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Arguments did not match the method signature
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Target implementation raised an error
    #[error("Invocation failed: {0}")]
    Invocation(String),

    /// Server answered with a FAIL status
    #[error("Remote call failed: {0}")]
    RemoteFailure(String),

    /// Response correlation id does not belong to the request
    #[error("Response {actual} does not match request {expected}")]
    ResponseMismatch { expected: String, actual: String },

    /// A live pending call already uses this correlation id
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelation(String),

    /// Capability missing or misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No catalog entry for the requested name
    #[error("No {capability} extension named '{name}'")]
    UnknownExtension { capability: String, name: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal framework error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => Error::ConnectionClosed(error.to_string()),
            _ => Error::Io(error.to_string()),
        }
    }
}

/// Result type for minirpc operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classes, each with its own propagation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fatal to the connection, never resynchronised
    Protocol,
    /// Surfaced to the caller, offending connection discarded
    Transport,
    /// Surfaced synchronously before any network attempt
    Lookup,
    /// Contained at the server as a FAIL response
    Dispatch,
    /// Logged and dropped
    Correlation,
    /// Programmer or deployment mistake, fail fast
    Configuration,
    Serialization,
    Io,
    Internal,
}

impl Error {
    /// Get the category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MagicMismatch(_)
            | Error::VersionMismatch(_)
            | Error::FrameTooLarge { .. }
            | Error::Protocol(_) => ErrorCategory::Protocol,
            Error::ConnectUnreachable(_)
            | Error::ChannelNotActive(_)
            | Error::ConnectionClosed(_)
            | Error::SendFailed(_)
            | Error::Timeout(_) => ErrorCategory::Transport,
            Error::InvalidAddress(_) | Error::ServiceNotFound(_) => ErrorCategory::Lookup,
            Error::MethodNotFound(_)
            | Error::InvalidArguments(_)
            | Error::Invocation(_)
            | Error::RemoteFailure(_) => ErrorCategory::Dispatch,
            Error::ResponseMismatch { .. } | Error::DuplicateCorrelation(_) => {
                ErrorCategory::Correlation
            }
            Error::Configuration(_) | Error::UnknownExtension { .. } => {
                ErrorCategory::Configuration
            }
            Error::Serialization(_) | Error::Compression(_) => ErrorCategory::Serialization,
            Error::Io(_) => ErrorCategory::Io,
            Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Protocol errors close the connection they were read from
    pub fn is_fatal_to_connection(&self) -> bool {
        self.category() == ErrorCategory::Protocol
    }

    /// Check if a fresh attempt may succeed
    ///
    /// Nothing in this workspace retries on its own; the flag is for callers
    /// that layer a retry policy on top.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectUnreachable(_)
                | Error::ChannelNotActive(_)
                | Error::ConnectionClosed(_)
                | Error::SendFailed(_)
                | Error::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_fatal() {
        assert!(Error::MagicMismatch(*b"http").is_fatal_to_connection());
        assert!(Error::VersionMismatch(9).is_fatal_to_connection());
        assert!(Error::FrameTooLarge { length: 10, max: 1 }.is_fatal_to_connection());
        assert!(!Error::MethodNotFound("hello".into()).is_fatal_to_connection());
    }

    #[test]
    fn test_categories() {
        assert_eq!(Error::ServiceNotFound("x".into()).category(), ErrorCategory::Lookup);
        assert_eq!(Error::Invocation("x".into()).category(), ErrorCategory::Dispatch);
        assert_eq!(
            Error::UnknownExtension { capability: "serializer".into(), name: "kryo".into() }.category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::ResponseMismatch { expected: "a".into(), actual: "b".into() }.category(),
            ErrorCategory::Correlation
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::ConnectUnreachable("127.0.0.1:1".into()).is_retryable());
        assert!(Error::Timeout("r1".into()).is_retryable());
        assert!(!Error::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(Error::from(refused), Error::ConnectionClosed(_)));

        let other = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert!(matches!(Error::from(other), Error::Io(_)));
    }
}
