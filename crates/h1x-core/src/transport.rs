//! Transport abstraction.
//!
//! The byte transport (TCP/TLS socket plus the HTTP codec sitting on it)
//! lives outside this crate. The connection drives it through the
//! [`Transport`] trait; the glue that owns the socket feeds decoded messages
//! back through [`crate::Connection::handle_message`] and reports
//! writability changes, close, exceptions and idle events through the
//! matching `Connection` entry points.
//!
//! All trait methods are invoked on the connection's I/O executor.

use crate::Result;
use crate::proto::OutboundMessage;

/// Completion callback for a transport write, invoked once the message has
/// been flushed (or has failed).
pub type WriteDone = Box<dyn FnOnce(Result<()>) + Send>;

/// Contract the connection requires from its byte transport.
pub trait Transport: Send + Sync {
    /// Enqueue a message for framing and flushing.
    ///
    /// Writes never block; backpressure surfaces through
    /// [`Transport::is_writable`] flips instead.
    fn write(&self, msg: OutboundMessage, done: Option<WriteDone>);

    /// Current writability of the transport.
    fn is_writable(&self) -> bool;

    /// Stop delivering inbound messages until [`Transport::resume_reads`].
    fn pause_reads(&self);

    /// Resume inbound message delivery.
    fn resume_reads(&self);

    /// Close the transport. The glue eventually reports back through
    /// `Connection::handle_closed`.
    fn close(&self);

    /// Remove the response decompressor, if one is installed.
    fn remove_decompressor(&self);

    /// Remove the HTTP codec so subsequent bytes flow raw.
    ///
    /// Removal may synchronously flush decoded-but-undelivered messages back
    /// into `Connection::handle_message`; the connection captures those via
    /// its invalid-message sink.
    fn remove_http_codec(&self);
}
