//! Pipelined exchange ordering, admission, flow control.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use h1x_core::config::ConnectionOptions;
use h1x_core::proto::{HttpVersion, InboundMessage, Method, OutboundMessage, RequestHead};
use h1x_test_utils::{settle, test_connection};

use common::*;

#[tokio::test]
async fn pipeline_of_two_gets_preserves_order() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());
    let log = new_log();

    let a = admit(&tc).await;
    let b_slot = admit_pending(&tc);
    settle().await;
    // B waits behind A's unwritten request.
    assert!(b_slot.lock().unwrap().is_none());

    log_exchange(&a, &log, "a");
    a.write_head(get_request("/a"), false, None, true, false, None);
    settle().await;

    let b = b_slot.lock().unwrap().take().unwrap().unwrap();
    log_exchange(&b, &log, "b");
    b.write_head(get_request("/b"), false, None, true, false, None);
    settle().await;

    feed_response(&tc, response_head(200), Some(b"foo"));
    feed_response(&tc, response_head(200), Some(b"bar"));
    settle().await;

    assert_eq!(snapshot(&log), vec!["a:head", "a:end", "b:head", "b:end"]);
    assert_eq!(tc.listener.recycles(), 2);
    assert!(tc.conn.is_valid());
    assert!(!tc.transport.is_closed());

    // Metric events for /a arrive in protocol order.
    let events = tc.metrics.events();
    let order: Vec<usize> = [
        "request_begin /a",
        "request_end /a bytes=0",
        "response_begin /a status=200",
        "response_end /a bytes=3",
    ]
    .iter()
    .map(|needle| events.iter().position(|e| e == needle).expect(needle))
    .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "events: {:?}", events);
}

#[tokio::test]
async fn admission_resolves_when_predecessor_request_ends() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    a.write_head(get_request("/a"), true, None, false, false, None);
    settle().await;

    let b_slot = admit_pending(&tc);
    settle().await;
    assert!(b_slot.lock().unwrap().is_none());

    a.write_body(Some(Bytes::from_static(b"part")), false, None);
    settle().await;
    assert!(b_slot.lock().unwrap().is_none());

    a.write_body(None, true, None);
    settle().await;
    assert!(b_slot.lock().unwrap().is_some());
}

#[tokio::test]
async fn byte_counters_match_handler_observations() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    a.on_chunk(move |chunk| {
        counter.fetch_add(chunk.len(), Ordering::SeqCst);
    });

    let head = RequestHead::new(Method::Post, "/upload", "example.com");
    a.write_head(head, true, Some(Bytes::from_static(b"hel")), false, false, None);
    a.write_body(Some(Bytes::from_static(b"lo")), true, None);
    settle().await;
    assert_eq!(a.bytes_written(), 5);

    tc.transport.feed(InboundMessage::Head(response_head(200)));
    tc.transport.feed(InboundMessage::Chunk(Bytes::from_static(b"wor")));
    tc.transport.feed(last(Some(b"ld")));
    settle().await;

    assert_eq!(a.bytes_read(), 5);
    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn continue_does_not_advance_the_response_queue() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());
    let log = new_log();

    let a = admit(&tc).await;
    let sink = log.clone();
    a.on_continue(move || sink.lock().unwrap().push("continue".into()));
    log_exchange(&a, &log, "a");
    a.write_head(get_request("/a"), false, None, true, false, None);
    settle().await;

    tc.transport.feed(InboundMessage::Head(response_head(100)));
    settle().await;
    assert_eq!(snapshot(&log), vec!["continue"]);
    assert_eq!(tc.listener.recycles(), 0);

    feed_response(&tc, response_head(200), Some(b"ok"));
    settle().await;
    assert_eq!(snapshot(&log), vec!["continue", "a:head", "a:end"]);
    assert_eq!(tc.listener.recycles(), 1);
}

#[tokio::test]
async fn early_server_response_defers_recycle_until_request_ends() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    a.write_head(get_request("/slow-upload"), true, None, false, false, None);
    settle().await;

    // Server answers before the request body is finished.
    feed_response(&tc, response_head(200), Some(b"done"));
    settle().await;
    assert_eq!(tc.listener.recycles(), 0);
    assert!(!tc.transport.is_closed());

    a.write_body(None, true, None);
    settle().await;
    assert_eq!(tc.listener.recycles(), 1);
}

#[tokio::test]
async fn responses_without_a_pending_stream_are_dropped() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    feed_response(&tc, response_head(200), Some(b"stray"));
    settle().await;

    assert!(!tc.transport.is_closed());
    assert!(tc.metrics.events().is_empty());
}

#[tokio::test]
async fn inbound_overflow_pauses_reads_and_drain_resumes() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    a.on_chunk(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    a.pause();
    a.write_head(get_request("/big"), false, None, true, false, None);
    settle().await;

    tc.transport.feed(InboundMessage::Head(response_head(200)));
    for _ in 0..5 {
        tc.transport.feed(InboundMessage::Chunk(Bytes::from_static(b"x")));
    }
    settle().await;

    // Fifth chunk hit the high-water mark.
    assert_eq!(tc.transport.pause_count(), 1);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);

    a.fetch(u64::MAX);
    settle().await;
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert!(tc.transport.resume_count() >= 1);
    assert!(!tc.transport.is_paused());
}

#[tokio::test]
async fn writability_edge_fires_drain_handler() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    let drains = Arc::new(AtomicUsize::new(0));
    let counter = drains.clone();
    a.on_drain(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(a.is_writable());

    tc.transport.set_writable(false);
    settle().await;
    assert!(!a.is_writable());
    assert_eq!(drains.load(Ordering::SeqCst), 0);

    tc.transport.set_writable(true);
    settle().await;
    assert!(a.is_writable());
    assert_eq!(drains.load(Ordering::SeqCst), 1);

    // Same-state notification is not an edge.
    tc.transport.set_writable(true);
    settle().await;
    assert_eq!(drains.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_heads_carry_negotiated_headers() {
    let options = ConnectionOptions::default().with_accept_compression(true);
    let tc = test_connection(HttpVersion::Http11, options);

    let a = admit(&tc).await;
    a.write_head(get_request("/a"), false, None, true, false, None);
    settle().await;

    let written = tc.transport.written();
    let OutboundMessage::Request { head, chunked, end, .. } = &written[0] else {
        panic!("expected a request, got {:?}", written[0]);
    };
    assert!(!*chunked);
    assert!(*end);
    assert_eq!(head.headers.get("host"), Some("example.com"));
    assert_eq!(head.headers.get("accept-encoding"), Some("deflate, gzip"));
    // The recording tracer injects its propagation header.
    assert_eq!(head.headers.get("x-trace-id"), Some("00000001"));
}

#[tokio::test]
async fn chunked_framing_strips_content_length() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    let head = RequestHead::new(Method::Post, "/upload", "example.com")
        .with_headers(headers(&[("Content-Length", "999")]));
    a.write_head(head, true, None, false, false, None);
    settle().await;

    let written = tc.transport.written();
    let OutboundMessage::Request { head, chunked, .. } = &written[0] else {
        panic!("expected a request");
    };
    assert!(*chunked);
    assert_eq!(head.headers.get("transfer-encoding"), Some("chunked"));
    assert!(!head.headers.contains("content-length"));
}

#[tokio::test]
async fn caller_supplied_host_strips_transfer_encoding() {
    let tc = test_connection(HttpVersion::Http11, ConnectionOptions::default());

    let a = admit(&tc).await;
    let head = RequestHead::new(Method::Get, "/", "example.com")
        .with_headers(headers(&[("Host", "other.test"), ("Transfer-Encoding", "chunked")]));
    a.write_head(head, false, None, true, false, None);
    settle().await;

    let written = tc.transport.written();
    let OutboundMessage::Request { head, .. } = &written[0] else {
        panic!("expected a request");
    };
    assert_eq!(head.headers.get("host"), Some("other.test"));
    assert!(!head.headers.contains("transfer-encoding"));
}
