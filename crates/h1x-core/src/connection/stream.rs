//! Per-exchange stream state.
//!
//! A [`Stream`] is one request/response exchange on a pipelined connection.
//! The connection owns the stream through its pipeline queues; the stream
//! holds a non-owning handle back to the connection, so dropping the
//! connection after close breaks the cycle.
//!
//! User handlers run on the stream's context, never on the connection's I/O
//! executor; write entry points trampoline the other way.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::inbound::{InboundBuffer, InboundItem};
use crate::metrics::MetricHandle;
use crate::proto::{Headers, HttpVersion, RequestHead, ResponseHead};
use crate::trace::TraceHandle;
use crate::transport::WriteDone;

use super::ConnectionInner;

pub(crate) type AdmissionCallback = Box<dyn FnOnce(Result<Stream>) + Send>;

type UnitHandler = Arc<dyn Fn() + Send + Sync>;
type HeadHandler = Arc<dyn Fn(ResponseHead) + Send + Sync>;
type ChunkHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
type EndHandler = Arc<dyn Fn(Headers) + Send + Sync>;
type ExceptionHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// One pipelined request/response exchange.
///
/// Cheap to clone; all clones observe the same exchange.
#[derive(Clone)]
pub struct Stream {
    pub(crate) inner: Arc<StreamInner>,
}

pub(crate) struct StreamInner {
    pub(crate) id: u64,
    pub(crate) context: Executor,
    pub(crate) conn: Weak<ConnectionInner>,
    pub(crate) version: HttpVersion,
    pub(crate) queue: InboundBuffer,
    pub(crate) bytes_read: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
    pub(crate) reset: AtomicBool,
    pub(crate) response_ended: AtomicBool,
    writable: AtomicBool,
    pub(crate) state: Mutex<StreamState>,
    handlers: Mutex<StreamHandlers>,
}

#[derive(Default)]
pub(crate) struct StreamState {
    pub(crate) request: Option<RequestHead>,
    pub(crate) response: Option<ResponseHead>,
    pub(crate) admission: Option<AdmissionCallback>,
    pub(crate) metric: Option<MetricHandle>,
    pub(crate) trace: Option<TraceHandle>,
}

#[derive(Default)]
struct StreamHandlers {
    continue_: Option<UnitHandler>,
    head: Option<HeadHandler>,
    chunk: Option<ChunkHandler>,
    end: Option<EndHandler>,
    drain: Option<UnitHandler>,
    exception: Option<ExceptionHandler>,
}

/// Pipeline-queue entry comparing by identity.
#[derive(Clone)]
pub(crate) struct StreamRef(pub(crate) Arc<StreamInner>);

impl PartialEq for StreamRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl StreamInner {
    pub(crate) fn new(
        id: u64,
        context: Executor,
        conn: Weak<ConnectionInner>,
        version: HttpVersion,
        high_water: usize,
        writable: bool,
    ) -> Arc<Self> {
        let queue = InboundBuffer::new(context.clone(), high_water);
        let stream = Arc::new(Self {
            id,
            context,
            conn,
            version,
            queue,
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            reset: AtomicBool::new(false),
            response_ended: AtomicBool::new(false),
            writable: AtomicBool::new(writable),
            state: Mutex::new(StreamState::default()),
            handlers: Mutex::new(StreamHandlers::default()),
        });

        let weak = Arc::downgrade(&stream);
        stream.queue.set_handler(move |item| {
            if let Some(stream) = weak.upgrade() {
                stream.on_queue_item(item);
            }
        });
        let weak = Arc::downgrade(&stream);
        stream.queue.set_drain_handler(move || {
            if let Some(stream) = weak.upgrade() {
                stream.on_queue_drained();
            }
        });

        stream
    }

    fn on_queue_item(&self, item: InboundItem) {
        if self.reset.load(Ordering::SeqCst) {
            return;
        }
        match item {
            InboundItem::Chunk(data) => {
                let handler = self.handlers.lock().unwrap().chunk.clone();
                if let Some(handler) = handler {
                    handler(data);
                }
            }
            InboundItem::Trailers(trailers) => {
                let handler = self.handlers.lock().unwrap().end.clone();
                if let Some(handler) = handler {
                    handler(trailers);
                }
            }
        }
    }

    fn on_queue_drained(&self) {
        if self.response_ended.load(Ordering::SeqCst) {
            return;
        }
        if let Some(conn) = self.conn.upgrade() {
            let transport = conn.transport.clone();
            conn.executor.execute(move || transport.resume_reads());
        }
    }

    /// Park response content; ask the connection to pause reads when the
    /// queue hits its high-water mark. Runs on the stream's context.
    pub(crate) fn deliver_chunk(&self, data: Bytes) {
        if self.reset.load(Ordering::SeqCst) {
            return;
        }
        if !self.queue.write(InboundItem::Chunk(data)) {
            if let Some(conn) = self.conn.upgrade() {
                let transport = conn.transport.clone();
                conn.executor.execute(move || transport.pause_reads());
            }
        }
    }

    /// Park the end-of-response sentinel. Runs on the stream's context.
    pub(crate) fn deliver_end(&self, trailers: Headers) {
        if self.reset.load(Ordering::SeqCst) {
            return;
        }
        self.queue.write(InboundItem::Trailers(trailers));
    }

    pub(crate) fn deliver_continue(&self) {
        let handler = self.handlers.lock().unwrap().continue_.clone();
        if let Some(handler) = handler {
            self.context.execute(move || handler());
        }
    }

    pub(crate) fn deliver_head(&self, head: ResponseHead) {
        let handler = self.handlers.lock().unwrap().head.clone();
        if let Some(handler) = handler {
            self.context.execute(move || handler(head));
        }
    }

    pub(crate) fn deliver_exception(&self, err: Arc<Error>) {
        let handler = self.handlers.lock().unwrap().exception.clone();
        if let Some(handler) = handler {
            self.context.execute(move || handler(&err));
        }
    }

    /// Record the transport writability mirror; fire the drain handler on
    /// the false-to-true edge.
    pub(crate) fn deliver_writability(&self, writable: bool) {
        let was_writable = self.writable.swap(writable, Ordering::SeqCst);
        if !was_writable && writable {
            let handler = self.handlers.lock().unwrap().drain.clone();
            if let Some(handler) = handler {
                self.context.execute(move || handler());
            }
        }
    }

    /// Complete the pending-admission promise, if still pending.
    pub(crate) fn complete_admission(&self, result: Result<Stream>) {
        let callback = self.state.lock().unwrap().admission.take();
        if let Some(callback) = callback {
            self.context.execute(move || callback(result));
        }
    }
}

impl Stream {
    /// Stream id, unique per connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Protocol version of the owning connection.
    pub fn version(&self) -> HttpVersion {
        self.inner.version
    }

    /// The context this stream dispatches user handlers on.
    pub fn context(&self) -> &Executor {
        &self.inner.context
    }

    /// Total response-content bytes delivered so far.
    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read.load(Ordering::SeqCst)
    }

    /// Total request bytes handed to the transport so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::SeqCst)
    }

    /// Whether writes would currently be accepted: the transport is
    /// writable and the stream has not been reset.
    pub fn is_writable(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst) && !self.inner.reset.load(Ordering::SeqCst)
    }

    /// Install the 100-continue handler.
    pub fn on_continue(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().continue_ = Some(Arc::new(handler));
    }

    /// Install the response-head handler.
    pub fn on_head(&self, handler: impl Fn(ResponseHead) + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().head = Some(Arc::new(handler));
    }

    /// Install the response-content handler.
    pub fn on_chunk(&self, handler: impl Fn(Bytes) + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().chunk = Some(Arc::new(handler));
    }

    /// Install the end-of-response handler, invoked with trailing headers.
    pub fn on_end(&self, handler: impl Fn(Headers) + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().end = Some(Arc::new(handler));
    }

    /// Install the drain handler, fired when the transport becomes writable
    /// again.
    pub fn on_drain(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().drain = Some(Arc::new(handler));
    }

    /// Install the exception handler.
    pub fn on_exception(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.handlers.lock().unwrap().exception = Some(Arc::new(handler));
    }

    /// Write the request head, optionally with an initial body slice.
    ///
    /// `chunked` selects chunked framing; `end` completes the request in one
    /// message; `connect` marks the exchange as a tunnel establishment
    /// (CONNECT or Upgrade). Must only be called once the admission promise
    /// has resolved. No-op after reset.
    pub fn write_head(
        &self,
        head: RequestHead,
        chunked: bool,
        body: Option<Bytes>,
        end: bool,
        connect: bool,
        done: Option<WriteDone>,
    ) {
        if self.inner.reset.load(Ordering::SeqCst) {
            return;
        }
        let Some(conn) = self.inner.conn.upgrade() else {
            if let Some(done) = done {
                done(Err(Error::Closed));
            }
            return;
        };
        let stream = self.inner.clone();
        conn.executor.clone().execute(move || {
            conn.begin_request(&stream, head, chunked, body, end, connect, done);
        });
    }

    /// Write a piece of request body; `end` terminates the message.
    ///
    /// In tunnel mode the bytes bypass HTTP framing, and an ending write
    /// closes the connection once flushed. No-op after reset.
    pub fn write_body(&self, data: Option<Bytes>, end: bool, done: Option<WriteDone>) {
        if data.is_none() && !end {
            return;
        }
        if self.inner.reset.load(Ordering::SeqCst) {
            return;
        }
        let Some(conn) = self.inner.conn.upgrade() else {
            if let Some(done) = done {
                done(Err(Error::Closed));
            }
            return;
        };
        let stream = self.inner.clone();
        conn.executor.clone().execute(move || {
            conn.write_buffer(&stream, data, end, done);
        });
    }

    /// Abort the exchange. Idempotent.
    ///
    /// The cause is delivered to the exception handler. If the request head
    /// is already on the wire the whole connection must close; an unsent
    /// stream just leaves the pipeline.
    pub fn reset(&self, cause: Error) {
        if self.inner.reset.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.deliver_exception(Arc::new(cause));
        if let Some(conn) = self.inner.conn.upgrade() {
            let stream = self.inner.clone();
            conn.executor.clone().execute(move || conn.reset_stream(&stream));
        }
    }

    /// Stop delivering inbound items until [`Stream::fetch`].
    pub fn pause(&self) {
        self.inner.queue.pause();
    }

    /// Allow `n` more inbound items to flow.
    pub fn fetch(&self, n: u64) {
        self.inner.queue.fetch(n);
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("bytes_read", &self.bytes_read())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}
