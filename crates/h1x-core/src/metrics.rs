//! Metrics sink contract.
//!
//! The connection reports per-exchange events to an optional
//! [`ClientMetrics`] sink. Handles returned by `request_begin` /
//! `websocket_connected` are opaque to the connection; it stores them on the
//! stream and passes them back with every later event for that exchange.
//!
//! Per-stream event order is guaranteed: `request_begin`, `response_begin`,
//! then `response_end` / `request_reset`; `request_end` fires when the
//! request side finishes writing.

use std::any::Any;

use crate::proto::{RequestHead, ResponseHead};

/// Opaque per-exchange token minted by the metrics sink.
pub type MetricHandle = Box<dyn Any + Send + Sync>;

/// Sink for connection and exchange metrics.
pub trait ClientMetrics: Send + Sync {
    /// A request head is about to be written.
    fn request_begin(&self, uri: &str, request: &RequestHead) -> Option<MetricHandle>;

    /// The request body finished writing.
    fn request_end(&self, metric: Option<&MetricHandle>, bytes_written: u64);

    /// A response head arrived for the exchange.
    fn response_begin(&self, metric: Option<&MetricHandle>, response: &ResponseHead);

    /// The response body terminator arrived.
    fn response_end(&self, metric: Option<&MetricHandle>, bytes_read: u64);

    /// The exchange was abandoned (stream reset or connection closed with
    /// the exchange still pending).
    fn request_reset(&self, metric: Option<&MetricHandle>);

    /// The transport closed.
    fn endpoint_disconnected(&self);

    /// A WebSocket handshake completed on this connection.
    fn websocket_connected(&self) -> Option<MetricHandle> {
        None
    }
}
