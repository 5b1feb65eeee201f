//! Tracer contract.

use std::any::Any;

use crate::Error;
use crate::proto::{RequestHead, ResponseHead};

/// Opaque per-exchange span handle minted by the tracer.
pub type TraceHandle = Box<dyn Any + Send + Sync>;

/// Sink for distributed-tracing events.
///
/// Implementations derive their tags from the request head; the request URI
/// is the URL tag source. `header_sink` lets the tracer inject propagation
/// headers into the outgoing request.
pub trait Tracer: Send + Sync {
    /// A request is about to be written. Returns the span handle stored on
    /// the stream.
    fn send_request(
        &self,
        request: &RequestHead,
        operation: &str,
        header_sink: &mut dyn FnMut(&str, &str),
    ) -> Option<TraceHandle>;

    /// The exchange finished: either a response terminator arrived
    /// (`response` set, `failure` empty) or the exchange failed
    /// (`response` empty, `failure` set).
    fn receive_response(
        &self,
        response: Option<&ResponseHead>,
        trace: Option<&TraceHandle>,
        failure: Option<&Error>,
    );
}
