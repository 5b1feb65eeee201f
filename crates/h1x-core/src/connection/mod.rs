//! The HTTP/1.x client connection.
//!
//! One [`Connection`] multiplexes a pipelined sequence of request/response
//! exchanges over a single transport. Two FIFOs track the pipeline: streams
//! whose request side is still writing, and streams awaiting their response.
//! Inbound messages always belong to the front of the response queue;
//! writes only ever come from the front of the request queue.
//!
//! All state transitions run on the connection's single I/O executor.
//! Public entry points trampoline onto it; the connection mutex protects
//! only the queues and flags and is never held across handler dispatch or
//! transport writes.

mod queues;
mod stream;
mod upgrade;

pub use stream::Stream;
pub use upgrade::NetSocket;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::ConnectionOptions;
use crate::constants::{DEFLATE_GZIP, FIRST_STREAM_ID, INBOUND_QUEUE_HIGH_WATER};
use crate::error::{Error, Result};
use crate::executor::{Executor, TimerHandle};
use crate::metrics::ClientMetrics;
use crate::pool::PoolListener;
use crate::proto::{
    Headers, HttpVersion, InboundMessage, Method, OutboundMessage, RequestHead, ResponseHead,
    types::parse_keep_alive_timeout,
};
use crate::trace::Tracer;
use crate::transport::{Transport, WriteDone};
use crate::websocket::WebSocket;

use queues::PipelineQueues;
use stream::{StreamInner, StreamRef};

type InvalidMessageSink = Arc<dyn Fn(InboundMessage) + Send + Sync>;
type ShutdownCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Everything needed to assemble a connection around an established
/// transport.
pub struct ConnectionParams {
    /// The I/O executor the connection belongs to.
    pub executor: Executor,
    /// The byte transport plus codec, already connected.
    pub transport: Arc<dyn Transport>,
    /// Protocol version announced on every request.
    pub version: HttpVersion,
    /// Server host, used for the default `Host` header and handshake URIs.
    pub server_host: String,
    /// Server port.
    pub server_port: u16,
    /// Whether the transport is TLS.
    pub ssl: bool,
    /// Configuration snapshot.
    pub options: ConnectionOptions,
    /// Pool listener receiving recycle/evict events.
    pub listener: Arc<dyn PoolListener>,
    /// Optional metrics sink.
    pub metrics: Option<Arc<dyn ClientMetrics>>,
    /// Optional tracer.
    pub tracer: Option<Arc<dyn Tracer>>,
}

/// A pipelined HTTP/1.x client connection.
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

pub(crate) struct ConnectionInner {
    /// Self-reference handed to streams and timer closures.
    weak: Weak<ConnectionInner>,
    pub(crate) executor: Executor,
    pub(crate) transport: Arc<dyn Transport>,
    version: HttpVersion,
    pub(crate) server_host: String,
    pub(crate) server_port: u16,
    pub(crate) ssl: bool,
    pub(crate) options: ConnectionOptions,
    pub(crate) listener: Arc<dyn PoolListener>,
    metrics: Option<Arc<dyn ClientMetrics>>,
    tracer: Option<Arc<dyn Tracer>>,
    /// Ensures the transport-close request happens at most once.
    close_requested: AtomicBool,
    /// Ensures the pool sees at most one evict notification.
    evicted: AtomicBool,
    pub(crate) state: Mutex<ConnState>,
}

pub(crate) struct ConnState {
    queues: PipelineQueues<StreamRef>,
    closed: bool,
    shutdown: bool,
    /// Monotonic: once set the connection will not outlive the current
    /// exchange.
    close_after_current: bool,
    is_tunnel: bool,
    keep_alive_timeout: Duration,
    /// Idle deadline; `None` means the connection never expires.
    expiration: Option<Instant>,
    next_stream_id: u64,
    shutdown_timer: Option<TimerHandle>,
    shutdown_callbacks: Vec<ShutdownCallback>,
    /// Pluggable sink for unexpected frames; `None` is the fail-fast
    /// default.
    pub(crate) invalid_sink: Option<InvalidMessageSink>,
    pub(crate) web_socket: Option<WebSocket>,
    pub(crate) net_socket: Option<NetSocket>,
}

impl Connection {
    /// Assemble a connection around an established transport.
    pub fn new(params: ConnectionParams) -> Self {
        let keep_alive_timeout = params.options.keep_alive_timeout;
        Self {
            inner: Arc::new_cyclic(|weak| ConnectionInner {
                weak: weak.clone(),
                executor: params.executor,
                transport: params.transport,
                version: params.version,
                server_host: params.server_host,
                server_port: params.server_port,
                ssl: params.ssl,
                options: params.options,
                listener: params.listener,
                metrics: params.metrics,
                tracer: params.tracer,
                close_requested: AtomicBool::new(false),
                evicted: AtomicBool::new(false),
                state: Mutex::new(ConnState {
                    queues: PipelineQueues::default(),
                    closed: false,
                    shutdown: false,
                    close_after_current: false,
                    is_tunnel: false,
                    keep_alive_timeout,
                    expiration: None,
                    next_stream_id: FIRST_STREAM_ID,
                    shutdown_timer: None,
                    shutdown_callbacks: Vec::new(),
                    invalid_sink: None,
                    web_socket: None,
                    net_socket: None,
                }),
            }),
        }
    }

    /// Protocol version of the connection.
    pub fn version(&self) -> HttpVersion {
        self.inner.version
    }

    /// Whether the transport is TLS.
    pub fn is_ssl(&self) -> bool {
        self.inner.ssl
    }

    /// Server host this connection talks to.
    pub fn server_host(&self) -> &str {
        &self.inner.server_host
    }

    /// Server port this connection talks to.
    pub fn server_port(&self) -> u16 {
        self.inner.server_port
    }

    /// The connection's I/O executor.
    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    /// Whether the connection is still within its idle lifetime.
    pub fn is_valid(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        match state.expiration {
            Some(deadline) => Instant::now() <= deadline,
            None => true,
        }
    }

    /// Admit a new stream.
    ///
    /// `completion` fires on `context` once the stream reaches the head of
    /// the write queue and may emit its request head; with an empty pipeline
    /// that is immediate. Fails with [`Error::Closed`] on a closed
    /// connection.
    pub fn create_stream(
        &self,
        context: Executor,
        completion: impl FnOnce(Result<Stream>) + Send + 'static,
    ) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            conn.do_create_stream(context, Box::new(completion));
        });
    }

    /// Route a decoded inbound message into the pipeline.
    ///
    /// Called by the codec glue for every decoded object.
    pub fn handle_message(&self, msg: InboundMessage) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || conn.dispatch(msg));
    }

    /// Report a transport writability flip.
    pub fn writability_changed(&self) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            let writable = conn.transport.is_writable();
            enum Target {
                Stream(Arc<StreamInner>),
                Ws(WebSocket),
            }
            let target = {
                let state = conn.state.lock().unwrap();
                match state.queues.front_request() {
                    Some(stream) => Some(Target::Stream(stream.0.clone())),
                    None => state.web_socket.clone().map(Target::Ws),
                }
            };
            match target {
                Some(Target::Stream(stream)) => stream.deliver_writability(writable),
                Some(Target::Ws(ws)) => ws.deliver_writability(writable),
                None => {}
            }
        });
    }

    /// Report that the transport has closed.
    ///
    /// Fails every pending stream with [`Error::Closed`], closes the
    /// WebSocket and fires shutdown completions.
    pub fn handle_closed(&self) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || conn.do_handle_closed());
    }

    /// Propagate a transport-level failure to every pending stream and the
    /// WebSocket. The transport is expected to close afterwards.
    pub fn handle_exception(&self, err: Error) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            conn.propagate_exception(Arc::new(err));
        });
    }

    /// Report a transport idle timeout.
    ///
    /// Acted on only while the connection has no WebSocket and no pending
    /// exchange; a busy connection ignores the event and lets the in-flight
    /// exchange govern its fate.
    pub fn handle_idle(&self) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            let idle = {
                let state = conn.state.lock().unwrap();
                state.web_socket.is_none() && state.queues.is_empty()
            };
            if idle {
                debug!("idle timeout on parked connection");
                conn.close_conn();
            }
        });
    }

    /// Begin shutting the connection down.
    ///
    /// The pool is told to stop handing the connection out. With a non-zero
    /// `timeout` a timer enforces a hard close deadline; with a zero
    /// timeout in-flight exchanges drain naturally. `completion` fires once
    /// the connection has closed, or immediately with
    /// [`Error::ShutdownInProgress`] when shutdown was already requested.
    pub fn shutdown(
        &self,
        timeout: Duration,
        completion: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            conn.do_shutdown(timeout, Box::new(completion));
        });
    }

    /// Close the connection now.
    pub fn close(&self) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || conn.close_conn());
    }

    /// Replace the sink receiving unexpected inbound frames.
    ///
    /// The default (fail-fast) behavior treats an unexpected frame as a
    /// connection failure.
    pub fn set_invalid_message_sink(
        &self,
        sink: impl Fn(InboundMessage) + Send + Sync + 'static,
    ) {
        self.inner.state.lock().unwrap().invalid_sink = Some(Arc::new(sink));
    }
}

// =============================================================================
// Stream admission
// =============================================================================

impl ConnectionInner {
    fn do_create_stream(
        &self,
        context: Executor,
        completion: stream::AdmissionCallback,
    ) {
        let writable = self.transport.is_writable();
        let admitted = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                None
            } else {
                let id = state.next_stream_id;
                state.next_stream_id += 1;
                let stream = StreamInner::new(
                    id,
                    context,
                    self.weak.clone(),
                    self.version,
                    INBOUND_QUEUE_HIGH_WATER,
                    writable,
                );
                state.queues.push_request(StreamRef(stream.clone()));
                let sole = state.queues.request_count() == 1;
                Some((stream, sole))
            }
        };
        match admitted {
            None => completion(Err(Error::Closed)),
            Some((stream, sole)) => {
                trace!(stream = stream.id, sole, "stream admitted");
                stream.state.lock().unwrap().admission = Some(completion);
                if sole {
                    let handle = Stream { inner: stream.clone() };
                    stream.complete_admission(Ok(handle));
                }
            }
        }
    }
}

// =============================================================================
// Request writing
// =============================================================================

impl ConnectionInner {
    /// Compute the request head actually written to the wire.
    fn finalize_request_head(&self, req: &RequestHead, chunked: bool) -> RequestHead {
        let mut head = req.clone();
        if !head.headers.contains("host") {
            let authority = head.authority.clone();
            head.headers.set("Host", authority);
        } else {
            // A caller who set Host is assumed to manage framing.
            head.headers.remove("transfer-encoding");
        }
        if chunked {
            head.headers.set("Transfer-Encoding", "chunked");
            head.headers.remove("content-length");
        }
        if self.options.accept_compression && !head.headers.contains("accept-encoding") {
            head.headers.set("Accept-Encoding", DEFLATE_GZIP);
        }
        if !self.options.keep_alive && self.version == HttpVersion::Http11 {
            head.headers.set("Connection", "close");
        } else if self.options.keep_alive && self.version == HttpVersion::Http10 {
            head.headers.set("Connection", "keep-alive");
        }
        head
    }

    pub(crate) fn begin_request(
        &self,
        stream: &Arc<StreamInner>,
        req: RequestHead,
        chunked: bool,
        body: Option<Bytes>,
        end: bool,
        connect: bool,
        done: Option<WriteDone>,
    ) {
        stream.state.lock().unwrap().request = Some(req.clone());
        if let Some(body) = &body {
            stream
                .bytes_written
                .fetch_add(body.len() as u64, Ordering::SeqCst);
        }
        let mut head = self.finalize_request_head(&req, chunked);
        {
            let mut state = self.state.lock().unwrap();
            state.queues.push_response(StreamRef(stream.clone()));
            state.is_tunnel = connect;
        }
        if let Some(metrics) = &self.metrics {
            let metric = metrics.request_begin(&req.uri, &req);
            stream.state.lock().unwrap().metric = metric;
        }
        if let Some(tracer) = &self.tracer {
            let trace = {
                let headers = &mut head.headers;
                tracer.send_request(&req, req.method.as_str(), &mut |name, value| {
                    headers.add(name, value);
                })
            };
            stream.state.lock().unwrap().trace = trace;
        }
        debug!(stream = stream.id, method = %req.method, uri = %req.uri, end, "request begin");
        self.transport.write(
            OutboundMessage::Request {
                head,
                version: self.version,
                chunked,
                body,
                end,
            },
            done,
        );
        if end {
            self.end_request(stream);
        }
    }

    pub(crate) fn write_buffer(
        &self,
        stream: &Arc<StreamInner>,
        data: Option<Bytes>,
        end: bool,
        done: Option<WriteDone>,
    ) {
        if stream.reset.load(Ordering::SeqCst) {
            return;
        }
        if let Some(data) = &data {
            stream
                .bytes_written
                .fetch_add(data.len() as u64, Ordering::SeqCst);
        }
        let tunnel = self.state.lock().unwrap().is_tunnel;
        if tunnel {
            let payload = data.unwrap_or_default();
            if end {
                // The raw write's flush completion tears the tunnel down.
                let conn = self.shared();
                let done: WriteDone = Box::new(move |result| {
                    if let Some(done) = done {
                        done(result);
                    }
                    conn.close_conn();
                });
                self.transport.write(OutboundMessage::Raw(payload), Some(done));
            } else {
                self.transport.write(OutboundMessage::Raw(payload), done);
            }
        } else {
            self.transport
                .write(OutboundMessage::Chunk { data, last: end }, done);
            if end {
                self.end_request(stream);
            }
        }
    }

    /// The stream's request side is fully written: advance the write queue,
    /// clear the successor to write, and run the lifecycle check when the
    /// response side already finished.
    fn end_request(&self, stream: &Arc<StreamInner>) {
        let (next, response_ended) = {
            let mut state = self.state.lock().unwrap();
            let front = state.queues.pop_request();
            debug_assert!(
                front.is_some_and(|s| Arc::ptr_eq(&s.0, stream)),
                "end_request for a stream that is not at the front of the write queue"
            );
            (
                state.queues.front_request().cloned(),
                stream.response_ended.load(Ordering::SeqCst),
            )
        };
        if let Some(metrics) = &self.metrics {
            let stream_state = stream.state.lock().unwrap();
            metrics.request_end(
                stream_state.metric.as_ref(),
                stream.bytes_written.load(Ordering::SeqCst),
            );
        }
        trace!(stream = stream.id, "request end");
        if let Some(next) = next {
            let handle = Stream { inner: next.0.clone() };
            next.0.complete_admission(Ok(handle));
        }
        if response_ended {
            self.check_lifecycle();
        }
    }

    /// Abort a single exchange. Mid-response resets poison the connection;
    /// unsent streams just leave the pipeline.
    pub(crate) fn reset_stream(&self, stream: &Arc<StreamInner>) {
        enum Verdict {
            Close,
            Recycle(Option<StreamRef>),
            Done,
        }
        let verdict = {
            let mut state = self.state.lock().unwrap();
            let stream_ref = StreamRef(stream.clone());
            let was_front = state
                .queues
                .front_request()
                .is_some_and(|front| Arc::ptr_eq(&front.0, stream));
            if state.queues.remove_response(&stream_ref) {
                // Bytes already on the wire; the pipeline cannot recover.
                Verdict::Close
            } else if state.queues.remove_request(&stream_ref) {
                let next = if was_front {
                    state.queues.front_request().cloned()
                } else {
                    None
                };
                Verdict::Recycle(next)
            } else {
                // Response already fully received.
                Verdict::Done
            }
        };
        match verdict {
            Verdict::Close => {
                debug!(stream = stream.id, "reset after send, closing connection");
                self.close_conn();
            }
            Verdict::Recycle(next) => {
                debug!(stream = stream.id, "reset before send");
                if let Some(next) = next {
                    let handle = Stream { inner: next.0.clone() };
                    next.0.complete_admission(Ok(handle));
                }
                self.recycle();
            }
            Verdict::Done => {}
        }
    }
}

// =============================================================================
// Response dispatch
// =============================================================================

impl ConnectionInner {
    fn dispatch(&self, msg: InboundMessage) {
        match msg {
            InboundMessage::Malformed { cause } => {
                self.fail(Error::Decode { message: cause });
            }
            InboundMessage::Head(head) if head.version == HttpVersion::Other => {
                self.fail(Error::UnsupportedVersion {
                    version: head.version.to_string(),
                });
            }
            InboundMessage::Head(head) => self.handle_response_begin(head),
            InboundMessage::Chunk(data) => {
                if let Some(stream) = self.front_response() {
                    if !data.is_empty() {
                        self.handle_response_chunk(&stream, data);
                    }
                }
            }
            InboundMessage::Last { chunk, trailers } => {
                self.handle_response_last(chunk, trailers)
            }
            InboundMessage::Raw(data) => self.handle_raw(data),
            InboundMessage::WsFrame(frame) => {
                let ws = self.state.lock().unwrap().web_socket.clone();
                match ws {
                    Some(ws) => ws.handle_frame(frame),
                    None => self.invalid_message(InboundMessage::WsFrame(frame)),
                }
            }
        }
    }

    fn front_response(&self) -> Option<Arc<StreamInner>> {
        self.state
            .lock()
            .unwrap()
            .queues
            .front_response()
            .map(|s| s.0.clone())
    }

    fn handle_response_begin(&self, head: ResponseHead) {
        // No stream awaiting a response: spurious data, drop it.
        let Some(stream) = self.front_response() else {
            return;
        };
        if head.status == 100 {
            stream.deliver_continue();
            return;
        }
        trace!(stream = stream.id, status = head.status, "response begin");
        let request = stream.state.lock().unwrap().request.clone();
        let connect_request = matches!(
            request.as_ref().map(|r| &r.method),
            Some(Method::Connect)
        );
        if let Some(metrics) = &self.metrics {
            let stream_state = stream.state.lock().unwrap();
            metrics.response_begin(stream_state.metric.as_ref(), &head);
        }
        if !connect_request {
            let mut state = self.state.lock().unwrap();
            let response_connection = head.headers.get("connection");
            let request_connection = request
                .as_ref()
                .and_then(|r| r.headers.get("connection"));
            let says_close =
                |value: Option<&str>| value.is_some_and(|v| v.eq_ignore_ascii_case("close"));
            let says_keep_alive =
                |value: Option<&str>| value.is_some_and(|v| v.eq_ignore_ascii_case("keep-alive"));
            if says_close(response_connection) || says_close(request_connection) {
                // RFC 7230 §6.3: a close option wins over any keep-alive.
                state.close_after_current = true;
            } else if head.version == HttpVersion::Http10 && !says_keep_alive(response_connection)
            {
                // HTTP/1.0 persists only with an explicit keep-alive.
                state.close_after_current = true;
            }
            if let Some(keep_alive) = head.headers.get("keep-alive") {
                if let Some(secs) = parse_keep_alive_timeout(keep_alive) {
                    state.keep_alive_timeout = Duration::from_secs(secs);
                }
            }
        }
        stream.state.lock().unwrap().response = Some(head.clone());
        stream.deliver_head(head.clone());

        let tunnel = self.state.lock().unwrap().is_tunnel;
        if tunnel {
            let upgraded = request.as_ref().is_some_and(|req| {
                (req.method == Method::Connect && head.status == 200)
                    || (req.method == Method::Get
                        && req.headers.contains_value("connection", "Upgrade")
                        && head.status == 101)
            });
            if upgraded {
                debug!(status = head.status, "upgrade matched, removing http codec");
                let pending = self.remove_channel_handlers();
                for msg in pending {
                    if let Some(data) = upgrade::raw_payload(msg) {
                        if !data.is_empty() {
                            self.handle_response_chunk(&stream, data);
                        }
                    }
                }
            }
        }
    }

    fn handle_response_chunk(&self, stream: &Arc<StreamInner>, data: Bytes) {
        stream
            .bytes_read
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        let target = stream.clone();
        stream.context.execute(move || target.deliver_chunk(data));
    }

    fn handle_response_last(&self, chunk: Option<Bytes>, trailers: Headers) {
        let Some(stream) = self.front_response() else {
            return;
        };
        if let Some(data) = chunk {
            if !data.is_empty() {
                self.handle_response_chunk(&stream, data);
            }
        }
        if self.state.lock().unwrap().is_tunnel {
            // Tunnel bytes have no HTTP message boundary.
            return;
        }
        // A 100-continue interim never stored a response head; the real
        // terminator is still to come.
        if stream.state.lock().unwrap().response.is_none() {
            return;
        }
        let check = {
            let mut state = self.state.lock().unwrap();
            state.queues.pop_response();
            if !self.options.keep_alive {
                state.close_after_current = true;
            }
            stream.response_ended.store(true, Ordering::SeqCst);
            match state.queues.front_request() {
                Some(front) => !Arc::ptr_eq(&front.0, &stream),
                None => true,
            }
        };
        trace!(stream = stream.id, deferred = !check, "response end");
        if let Some(tracer) = &self.tracer {
            let stream_state = stream.state.lock().unwrap();
            tracer.receive_response(
                stream_state.response.as_ref(),
                stream_state.trace.as_ref(),
                None,
            );
        }
        if let Some(metrics) = &self.metrics {
            let stream_state = stream.state.lock().unwrap();
            metrics.response_end(
                stream_state.metric.as_ref(),
                stream.bytes_read.load(Ordering::SeqCst),
            );
        }
        {
            let target = stream.clone();
            stream.context.execute(move || target.deliver_end(trailers));
        }
        self.transport.resume_reads();
        if check {
            self.check_lifecycle();
        }
    }

    fn handle_raw(&self, data: Bytes) {
        let (tunnel, net_socket) = {
            let state = self.state.lock().unwrap();
            (state.is_tunnel, state.net_socket.clone())
        };
        if let Some(net_socket) = net_socket {
            net_socket.deliver(data);
            return;
        }
        if tunnel {
            if let Some(stream) = self.front_response() {
                if !data.is_empty() {
                    self.handle_response_chunk(&stream, data);
                }
            }
            return;
        }
        self.invalid_message(InboundMessage::Raw(data));
    }

    pub(crate) fn invalid_message(&self, msg: InboundMessage) {
        let sink = self.state.lock().unwrap().invalid_sink.clone();
        match sink {
            Some(sink) => sink(msg),
            None => self.fail(Error::InvalidMessage {
                message: format!("unexpected frame: {:?}", msg),
            }),
        }
    }

    /// Connection-level failure: every pending stream and the WebSocket see
    /// the error, then the transport is closed.
    fn fail(&self, err: Error) {
        debug!(error = %err, "connection failed");
        self.propagate_exception(Arc::new(err));
        self.close_conn();
    }

    pub(crate) fn propagate_exception(&self, err: Arc<Error>) {
        let (ws, streams) = {
            let state = self.state.lock().unwrap();
            (state.web_socket.clone(), state.queues.pending_streams())
        };
        if let Some(ws) = ws {
            ws.handle_exception(err.clone());
        }
        for stream in streams {
            stream.0.deliver_exception(err.clone());
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

impl ConnectionInner {
    fn check_lifecycle(&self) {
        let close = self.state.lock().unwrap().close_after_current;
        if close {
            self.close_conn();
        } else {
            self.recycle();
        }
    }

    fn recycle(&self) {
        enum Action {
            Close,
            Notify,
            None,
        }
        let action = {
            let mut state = self.state.lock().unwrap();
            if state.shutdown {
                if state.queues.is_empty() {
                    Action::Close
                } else {
                    Action::None
                }
            } else if state.is_tunnel {
                // The pool already evicted a tunneled connection.
                Action::None
            } else {
                state.expiration = if state.keep_alive_timeout.is_zero() {
                    None
                } else {
                    Some(Instant::now() + state.keep_alive_timeout)
                };
                Action::Notify
            }
        };
        match action {
            Action::Close => self.close_conn(),
            Action::Notify => {
                trace!("recycling connection");
                self.listener.on_recycle();
            }
            Action::None => {}
        }
    }

    /// Owned handle to this inner; the connection is alive whenever `self`
    /// is reachable.
    fn shared(&self) -> Arc<ConnectionInner> {
        self.weak.upgrade().expect("connection inner is alive")
    }

    /// Tell the pool to stop handing this connection out. Idempotent.
    pub(crate) fn notify_evict(&self) {
        if !self.evicted.swap(true, Ordering::SeqCst) {
            self.listener.on_evict();
        }
    }

    pub(crate) fn close_conn(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing connection");
        self.transport.close();
    }

    fn do_shutdown(&self, timeout: Duration, completion: ShutdownCallback) {
        {
            let mut state = self.state.lock().unwrap();
            if state.shutdown {
                drop(state);
                completion(Err(Error::ShutdownInProgress));
                return;
            }
            state.shutdown = true;
            if state.closed {
                drop(state);
                self.notify_evict();
                completion(Ok(()));
                return;
            }
            state.shutdown_callbacks.push(completion);
        }
        debug!(timeout_ms = timeout.as_millis() as u64, "shutdown requested");
        self.notify_evict();
        let idle = {
            let mut state = self.state.lock().unwrap();
            if !state.closed {
                if timeout > Duration::ZERO {
                    let conn = self.shared();
                    state.shutdown_timer =
                        Some(self.executor.set_timer(timeout, move || conn.shutdown_now()));
                } else {
                    state.close_after_current = true;
                }
            }
            state.queues.is_empty()
        };
        // Close now only when nothing is in flight; otherwise the exchange
        // completion path or the timer finishes the job.
        if idle {
            self.close_conn();
        }
    }

    fn shutdown_now(&self) {
        debug!("shutdown grace period expired");
        self.state.lock().unwrap().shutdown_timer = None;
        self.close_conn();
    }

    fn do_handle_closed(&self) {
        let (timer, ws, streams, callbacks) = {
            let mut state = self.state.lock().unwrap();
            let timer = state.shutdown_timer.take();
            state.closed = true;
            let ws = state.web_socket.take();
            let streams = state.queues.pending_streams();
            // Drop the connection's strong references; survivors are the
            // handles users still hold.
            state.queues.clear();
            let callbacks = std::mem::take(&mut state.shutdown_callbacks);
            (timer, ws, streams, callbacks)
        };
        if let Some(timer) = timer {
            timer.cancel();
        }
        debug!(pending = streams.len(), "transport closed");
        self.notify_evict();
        if let Some(metrics) = &self.metrics {
            metrics.endpoint_disconnected();
        }
        if let Some(ws) = ws {
            ws.handle_closed();
        }
        let closed = Arc::new(Error::Closed);
        for stream_ref in streams {
            let stream = stream_ref.0;
            if let Some(metrics) = &self.metrics {
                let stream_state = stream.state.lock().unwrap();
                metrics.request_reset(stream_state.metric.as_ref());
            }
            if let Some(tracer) = &self.tracer {
                let stream_state = stream.state.lock().unwrap();
                tracer.receive_response(None, stream_state.trace.as_ref(), Some(closed.as_ref()));
            }
            stream.complete_admission(Err(Error::Closed));
            stream.deliver_exception(closed.clone());
        }
        for callback in callbacks {
            callback(Ok(()));
        }
    }
}
