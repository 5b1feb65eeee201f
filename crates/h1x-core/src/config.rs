//! Connection configuration.
//!
//! A [`ConnectionOptions`] value is captured once at connection construction
//! and never changes afterwards; the only negotiated field is the keep-alive
//! timeout, which lives on the connection itself so a `Keep-Alive: timeout=N`
//! response header can replace it.

use std::time::Duration;

use crate::constants::DEFAULT_KEEP_ALIVE_TIMEOUT;

/// Configuration snapshot for a single client connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Whether the connection should be kept alive between exchanges.
    ///
    /// When false, HTTP/1.1 requests carry `Connection: close` and the
    /// connection is closed after each exchange.
    pub keep_alive: bool,
    /// Initial idle lifetime of a recycled connection.
    ///
    /// `Duration::ZERO` means the connection never expires while idle.
    pub keep_alive_timeout: Duration,
    /// Offer `Accept-Encoding: deflate, gzip` when the caller set none.
    pub accept_compression: bool,
    /// Offer the `deflate-frame` WebSocket extension during handshakes.
    pub ws_deflate_frame: bool,
    /// Offer the `permessage-deflate` WebSocket extension during handshakes.
    pub ws_per_message_deflate: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            keep_alive: true,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            accept_compression: false,
            ws_deflate_frame: false,
            ws_per_message_deflate: false,
        }
    }
}

impl ConnectionOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the connection is kept alive between exchanges.
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the initial idle lifetime of a recycled connection.
    pub fn with_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Set whether to offer compression in `Accept-Encoding`.
    pub fn with_accept_compression(mut self, accept: bool) -> Self {
        self.accept_compression = accept;
        self
    }

    /// Set whether to offer the `deflate-frame` WebSocket extension.
    pub fn with_ws_deflate_frame(mut self, offer: bool) -> Self {
        self.ws_deflate_frame = offer;
        self
    }

    /// Set whether to offer the `permessage-deflate` WebSocket extension.
    pub fn with_ws_per_message_deflate(mut self, offer: bool) -> Self {
        self.ws_per_message_deflate = offer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let options = ConnectionOptions::default();
        assert!(options.keep_alive);
        assert_eq!(options.keep_alive_timeout, DEFAULT_KEEP_ALIVE_TIMEOUT);
        assert!(!options.accept_compression);
        assert!(!options.ws_deflate_frame);
        assert!(!options.ws_per_message_deflate);
    }

    #[test]
    fn options_builder() {
        let options = ConnectionOptions::new()
            .with_keep_alive(false)
            .with_keep_alive_timeout(Duration::from_secs(5))
            .with_accept_compression(true)
            .with_ws_per_message_deflate(true);

        assert!(!options.keep_alive);
        assert_eq!(options.keep_alive_timeout, Duration::from_secs(5));
        assert!(options.accept_compression);
        assert!(options.ws_per_message_deflate);
        assert!(!options.ws_deflate_frame);
    }
}
