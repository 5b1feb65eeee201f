//! Recording doubles for the pool, metrics and tracer contracts.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use h1x_core::error::Error;
use h1x_core::metrics::{ClientMetrics, MetricHandle};
use h1x_core::pool::PoolListener;
use h1x_core::proto::{RequestHead, ResponseHead};
use h1x_core::trace::{TraceHandle, Tracer};

/// Pool listener counting recycle/evict notifications.
#[derive(Debug, Default)]
pub struct RecordingListener {
    recycles: AtomicUsize,
    evicts: AtomicUsize,
}

impl RecordingListener {
    pub fn recycles(&self) -> usize {
        self.recycles.load(Ordering::SeqCst)
    }

    pub fn evicts(&self) -> usize {
        self.evicts.load(Ordering::SeqCst)
    }
}

impl PoolListener for RecordingListener {
    fn on_recycle(&self) {
        self.recycles.fetch_add(1, Ordering::SeqCst);
    }

    fn on_evict(&self) {
        self.evicts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Metrics sink recording one line per event.
///
/// Handles carry the request URI so later events can be correlated.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<String>>,
}

impl RecordingMetrics {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

fn handle_uri(metric: Option<&MetricHandle>) -> &str {
    metric
        .and_then(|m| m.downcast_ref::<String>())
        .map_or("?", String::as_str)
}

impl ClientMetrics for RecordingMetrics {
    fn request_begin(&self, uri: &str, _request: &RequestHead) -> Option<MetricHandle> {
        self.push(format!("request_begin {}", uri));
        Some(Box::new(uri.to_string()))
    }

    fn request_end(&self, metric: Option<&MetricHandle>, bytes_written: u64) {
        self.push(format!(
            "request_end {} bytes={}",
            handle_uri(metric),
            bytes_written
        ));
    }

    fn response_begin(&self, metric: Option<&MetricHandle>, response: &ResponseHead) {
        self.push(format!(
            "response_begin {} status={}",
            handle_uri(metric),
            response.status
        ));
    }

    fn response_end(&self, metric: Option<&MetricHandle>, bytes_read: u64) {
        self.push(format!(
            "response_end {} bytes={}",
            handle_uri(metric),
            bytes_read
        ));
    }

    fn request_reset(&self, metric: Option<&MetricHandle>) {
        self.push(format!("request_reset {}", handle_uri(metric)));
    }

    fn endpoint_disconnected(&self) {
        self.push("endpoint_disconnected".to_string());
    }

    fn websocket_connected(&self) -> Option<MetricHandle> {
        self.push("websocket_connected".to_string());
        Some(Box::new("websocket".to_string()))
    }
}

/// Tracer recording send/receive events and injecting a propagation header.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Mutex<Vec<String>>,
}

impl RecordingTracer {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Tracer for RecordingTracer {
    fn send_request(
        &self,
        request: &RequestHead,
        operation: &str,
        header_sink: &mut dyn FnMut(&str, &str),
    ) -> Option<TraceHandle> {
        self.events
            .lock()
            .unwrap()
            .push(format!("send_request {} {}", operation, request.uri));
        header_sink("x-trace-id", "00000001");
        Some(Box::new(request.uri.clone()))
    }

    fn receive_response(
        &self,
        response: Option<&ResponseHead>,
        trace: Option<&TraceHandle>,
        failure: Option<&Error>,
    ) {
        let uri = trace
            .and_then(|t| t.downcast_ref::<String>())
            .map_or("?", String::as_str);
        let outcome = match (response, failure) {
            (Some(response), _) => format!("status={}", response.status),
            (None, Some(err)) => format!("error={}", err),
            (None, None) => "empty".to_string(),
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("receive_response {} {}", uri, outcome));
    }
}
