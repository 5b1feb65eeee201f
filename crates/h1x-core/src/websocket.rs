//! WebSocket session handle.
//!
//! Installed on a connection once an upgrade handshake completes. Frame
//! encoding/decoding belongs to the external WebSocket processor; this
//! handle only routes inbound frames to the registered handler and raw
//! outbound bytes to the transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::executor::Executor;
use crate::metrics::MetricHandle;
use crate::proto::{OutboundMessage, WsFrame};
use crate::transport::{Transport, WriteDone};

type FrameHandler = Arc<dyn Fn(WsFrame) + Send + Sync>;
type UnitHandler = Arc<dyn Fn() + Send + Sync>;
type ExceptionHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// A WebSocket session riding an upgraded connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<WebSocketInner>,
}

struct WebSocketInner {
    context: Executor,
    transport: Arc<dyn Transport>,
    sub_protocol: Option<String>,
    writable: AtomicBool,
    state: Mutex<WebSocketState>,
}

#[derive(Default)]
struct WebSocketState {
    frame: Option<FrameHandler>,
    drain: Option<UnitHandler>,
    closed: Option<UnitHandler>,
    exception: Option<ExceptionHandler>,
    metric: Option<MetricHandle>,
}

impl WebSocket {
    pub(crate) fn new(
        context: Executor,
        transport: Arc<dyn Transport>,
        sub_protocol: Option<String>,
        writable: bool,
    ) -> Self {
        Self {
            inner: Arc::new(WebSocketInner {
                context,
                transport,
                sub_protocol,
                writable: AtomicBool::new(writable),
                state: Mutex::new(WebSocketState::default()),
            }),
        }
    }

    /// Sub-protocol the server accepted, if any.
    pub fn sub_protocol(&self) -> Option<&str> {
        self.inner.sub_protocol.as_deref()
    }

    /// Whether the transport currently accepts writes.
    pub fn is_writable(&self) -> bool {
        self.inner.writable.load(Ordering::SeqCst)
    }

    /// Install the inbound frame handler.
    pub fn on_frame(&self, handler: impl Fn(WsFrame) + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().frame = Some(Arc::new(handler));
    }

    /// Install the drain handler, fired when the transport becomes writable
    /// again.
    pub fn on_drain(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().drain = Some(Arc::new(handler));
    }

    /// Install the session-closed handler.
    pub fn on_closed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().closed = Some(Arc::new(handler));
    }

    /// Install the exception handler.
    pub fn on_exception(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().exception = Some(Arc::new(handler));
    }

    /// Write an already-encoded frame to the transport.
    pub fn write_frame(&self, frame: WsFrame, done: Option<WriteDone>) {
        self.inner
            .transport
            .write(OutboundMessage::Raw(frame.payload), done);
    }

    /// Close the underlying transport.
    pub fn close(&self) {
        self.inner.transport.close();
    }

    pub(crate) fn set_metric(&self, metric: Option<MetricHandle>) {
        self.inner.state.lock().unwrap().metric = metric;
    }

    pub(crate) fn handle_frame(&self, frame: WsFrame) {
        let inner = self.inner.clone();
        self.inner.context.execute(move || {
            let handler = inner.state.lock().unwrap().frame.clone();
            if let Some(handler) = handler {
                handler(frame);
            }
        });
    }

    pub(crate) fn handle_exception(&self, err: Arc<Error>) {
        let inner = self.inner.clone();
        self.inner.context.execute(move || {
            let handler = inner.state.lock().unwrap().exception.clone();
            if let Some(handler) = handler {
                handler(&err);
            }
        });
    }

    pub(crate) fn handle_closed(&self) {
        let inner = self.inner.clone();
        self.inner.context.execute(move || {
            let handler = inner.state.lock().unwrap().closed.clone();
            if let Some(handler) = handler {
                handler();
            }
        });
    }

    pub(crate) fn deliver_writability(&self, writable: bool) {
        let inner = self.inner.clone();
        self.inner.context.execute(move || {
            let was_writable = inner.writable.swap(writable, Ordering::SeqCst);
            if !was_writable && writable {
                let handler = inner.state.lock().unwrap().drain.clone();
                if let Some(handler) = handler {
                    handler();
                }
            }
        });
    }
}
