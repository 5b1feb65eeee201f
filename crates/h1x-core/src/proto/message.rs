//! Decoded-message contract between the external codec and the connection.
//!
//! The byte-level HTTP codec lives outside this crate. Inbound, it hands the
//! connection already-decoded [`InboundMessage`] values; outbound, the
//! connection hands it [`OutboundMessage`] values to frame and flush.

use bytes::Bytes;

use super::types::{Headers, HttpVersion, RequestHead, ResponseHead};

/// A decoded message arriving from the transport.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Status line and headers of the next pipelined response.
    Head(ResponseHead),
    /// A piece of response content.
    Chunk(Bytes),
    /// The response terminator, possibly carrying final content and
    /// trailing headers.
    Last {
        chunk: Option<Bytes>,
        trailers: Headers,
    },
    /// Raw bytes, seen once the HTTP codec has been removed (tunnel /
    /// NetSocket mode).
    Raw(Bytes),
    /// A WebSocket frame, seen after a completed WebSocket handshake.
    WsFrame(WsFrame),
    /// The codec failed to decode the wire bytes.
    Malformed { cause: String },
}

/// A message for the codec to frame and write to the transport.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// A request head, optionally with an initial body slice.
    ///
    /// `end` marks a full request (head + body + terminator); otherwise the
    /// request stays open and content follows as [`OutboundMessage::Chunk`].
    Request {
        head: RequestHead,
        version: HttpVersion,
        chunked: bool,
        body: Option<Bytes>,
        end: bool,
    },
    /// A piece of request content; `last` closes the message body.
    Chunk { data: Option<Bytes>, last: bool },
    /// Raw bytes written past the HTTP framing (tunnel / WebSocket mode).
    Raw(Bytes),
}

/// An opaque WebSocket frame.
///
/// Frame semantics belong to the external WebSocket processor; the
/// connection only routes frames to the installed [`crate::WebSocket`].
#[derive(Debug, Clone)]
pub struct WsFrame {
    /// Frame opcode as defined by RFC 6455.
    pub opcode: u8,
    /// Whether this frame ends its message.
    pub fin: bool,
    /// Frame payload.
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::types::Method;

    #[test]
    fn inbound_message_is_cloneable() {
        let head = InboundMessage::Head(ResponseHead::new(HttpVersion::Http11, 200, "OK"));
        let copy = head.clone();
        assert!(matches!(copy, InboundMessage::Head(h) if h.status == 200));
    }

    #[test]
    fn outbound_request_carries_framing_choice() {
        let msg = OutboundMessage::Request {
            head: RequestHead::new(Method::Post, "/upload", "example.com"),
            version: HttpVersion::Http11,
            chunked: true,
            body: Some(Bytes::from_static(b"part")),
            end: false,
        };
        match msg {
            OutboundMessage::Request { chunked, end, .. } => {
                assert!(chunked);
                assert!(!end);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
