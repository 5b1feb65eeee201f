//! Error types for h1x-core.

use thiserror::Error;

/// Main error type for connection and stream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed HTTP on the wire, reported by the codec.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// Response carried a protocol version other than 1.0 or 1.1.
    #[error("unsupported HTTP version: {version}")]
    UnsupportedVersion { version: String },

    /// An unexpected frame arrived outside tunnel/WebSocket contexts.
    #[error("invalid message: {message}")]
    InvalidMessage { message: String },

    /// The connection was closed.
    #[error("connection was closed")]
    Closed,

    /// `shutdown` was called on a connection that is already shutting down.
    #[error("already shutdown")]
    ShutdownInProgress,

    /// Transport layer failure.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// WebSocket handshake was rejected or produced an invalid response.
    #[error("websocket handshake failed: {message}")]
    WebSocketHandshake { message: String },
}

impl Error {
    /// Returns true if this error poisons the whole connection.
    ///
    /// Fatal errors are surfaced to every pending stream and the pool is
    /// told to evict the connection. Non-fatal errors stay local to the
    /// operation that produced them.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Decode { .. }
                | Error::UnsupportedVersion { .. }
                | Error::InvalidMessage { .. }
                | Error::Transport { .. }
        )
    }
}

/// Convenience result type for h1x operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_decode() {
        let err = Error::Decode {
            message: "bad chunk size".into(),
        };
        assert_eq!(err.to_string(), "decode error: bad chunk size");
    }

    #[test]
    fn error_display_unsupported_version() {
        let err = Error::UnsupportedVersion {
            version: "HTTP/0.9".into(),
        };
        assert_eq!(err.to_string(), "unsupported HTTP version: HTTP/0.9");
    }

    #[test]
    fn error_display_shutdown() {
        assert_eq!(Error::ShutdownInProgress.to_string(), "already shutdown");
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn connection_fatal_errors() {
        assert!(Error::Decode { message: "x".into() }.is_connection_fatal());
        assert!(Error::UnsupportedVersion { version: "h9".into() }.is_connection_fatal());
        assert!(Error::InvalidMessage { message: "x".into() }.is_connection_fatal());
        assert!(Error::Transport { message: "x".into() }.is_connection_fatal());

        assert!(!Error::Closed.is_connection_fatal());
        assert!(!Error::ShutdownInProgress.is_connection_fatal());
        assert!(!Error::WebSocketHandshake { message: "x".into() }.is_connection_fatal());
    }
}
