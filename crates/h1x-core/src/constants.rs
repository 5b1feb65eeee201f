//! Protocol and configuration constants for h1x.

use std::time::Duration;

// =============================================================================
// Pipeline Constants
// =============================================================================

/// High-water mark of a stream's inbound chunk queue.
///
/// When a stream's queue reaches this many undelivered items the dispatcher
/// pauses transport reads until the consumer drains.
pub const INBOUND_QUEUE_HIGH_WATER: usize = 5;

/// First stream id allocated on a fresh connection.
pub const FIRST_STREAM_ID: u64 = 1;

// =============================================================================
// Keep-Alive Constants
// =============================================================================

/// Default idle lifetime of a recycled connection.
///
/// `Duration::ZERO` means "no expiration". A `Keep-Alive: timeout=N`
/// response header replaces this value for the rest of the connection.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// `Accept-Encoding` value offered when compression-accept is enabled and
/// the caller did not set one.
pub const DEFLATE_GZIP: &str = "deflate, gzip";

// =============================================================================
// WebSocket Constants
// =============================================================================

/// WebSocket protocol version offered by default.
pub const DEFAULT_WEBSOCKET_VERSION: u16 = 13;

/// Fixed GUID appended to the client key when computing
/// `Sec-WebSocket-Accept` (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
