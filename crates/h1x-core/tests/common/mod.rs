//! Shared helpers for connection integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use h1x_core::Result;
use h1x_core::connection::Stream;
use h1x_core::proto::{Headers, HttpVersion, InboundMessage, Method, RequestHead, ResponseHead};
use h1x_test_utils::{TestConnection, settle};

pub type Slot<T> = Arc<Mutex<Option<T>>>;
pub type Log = Arc<Mutex<Vec<String>>>;

/// Admit a stream, leaving the completion result in the returned slot.
pub fn admit_pending(tc: &TestConnection) -> Slot<Result<Stream>> {
    let slot: Slot<Result<Stream>> = Arc::new(Mutex::new(None));
    let sink = slot.clone();
    tc.conn.create_stream(tc.executor.clone(), move |result| {
        *sink.lock().unwrap() = Some(result);
    });
    slot
}

/// Admit a stream and wait for its admission promise.
pub async fn admit(tc: &TestConnection) -> Stream {
    let slot = admit_pending(tc);
    settle().await;
    let admitted = slot.lock().unwrap().take();
    admitted.expect("admission pending").expect("admission failed")
}

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn push(log: &Log, event: impl Into<String>) {
    log.lock().unwrap().push(event.into());
}

pub fn snapshot(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Wire head/end handlers that log `<name>:head` / `<name>:end`.
pub fn log_exchange(stream: &Stream, log: &Log, name: &str) {
    let (sink, tag) = (log.clone(), name.to_string());
    stream.on_head(move |_| sink.lock().unwrap().push(format!("{}:head", tag)));
    let (sink, tag) = (log.clone(), name.to_string());
    stream.on_end(move |_| sink.lock().unwrap().push(format!("{}:end", tag)));
}

pub fn get_request(uri: &str) -> RequestHead {
    RequestHead::new(Method::Get, uri, "example.com")
}

pub fn headers(entries: &[(&str, &str)]) -> Headers {
    entries.iter().map(|(n, v)| (*n, *v)).collect()
}

pub fn response_head(status: u16) -> ResponseHead {
    ResponseHead::new(HttpVersion::Http11, status, "OK")
}

pub fn response_head_with(status: u16, entries: &[(&str, &str)]) -> ResponseHead {
    response_head(status).with_headers(headers(entries))
}

pub fn last(body: Option<&'static [u8]>) -> InboundMessage {
    InboundMessage::Last {
        chunk: body.map(Bytes::from_static),
        trailers: Headers::new(),
    }
}

/// Feed a complete fixed-length response.
pub fn feed_response(tc: &TestConnection, head: ResponseHead, body: Option<&'static [u8]>) {
    tc.transport.feed(InboundMessage::Head(head));
    tc.transport.feed(last(body));
}
