//! Protocol upgrade paths: codec removal, raw sockets, WebSocket handshake.
//!
//! Removing the HTTP codec is the point of no return for a connection: the
//! pool has evicted it and subsequent bytes flow raw. Codec removal may
//! flush decoded-but-undelivered messages back into the inbound path while
//! the handlers are being detached; those are captured through the
//! invalid-message sink and re-delivered by the caller.

use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::constants::{DEFAULT_WEBSOCKET_VERSION, WEBSOCKET_GUID};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::proto::{Headers, InboundMessage, Method, RequestHead};
use crate::transport::{Transport, WriteDone};
use crate::websocket::WebSocket;

use super::{Connection, ConnectionInner};

type WsCompletion = Box<dyn FnOnce(Result<WebSocket>) + Send>;

// =============================================================================
// Codec Removal
// =============================================================================

impl ConnectionInner {
    /// Strip the HTTP handlers from the transport.
    ///
    /// Returns the messages the codec flushed during its removal, for
    /// manual delivery as raw chunks.
    pub(crate) fn remove_channel_handlers(&self) -> Vec<InboundMessage> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let previous = {
            let mut state = self.state.lock().unwrap();
            let previous = state.invalid_sink.take();
            let sink = captured.clone();
            state.invalid_sink = Some(Arc::new(move |msg| sink.lock().unwrap().push(msg)));
            previous
        };
        self.transport.remove_decompressor();
        self.transport.remove_http_codec();
        self.state.lock().unwrap().invalid_sink = previous;
        let result = std::mem::take(&mut *captured.lock().unwrap());
        result
    }
}

/// The raw bytes of a message flushed during codec removal, if it carries
/// any.
pub(super) fn raw_payload(msg: InboundMessage) -> Option<Bytes> {
    match msg {
        InboundMessage::Raw(data) | InboundMessage::Chunk(data) => Some(data),
        InboundMessage::Last { chunk, .. } => chunk,
        _ => None,
    }
}

// =============================================================================
// NetSocket
// =============================================================================

/// Raw-byte adaptor over an upgraded connection.
///
/// Bytes that arrived before a data handler was installed are buffered and
/// replayed on installation.
#[derive(Clone)]
pub struct NetSocket {
    inner: Arc<NetSocketInner>,
}

struct NetSocketInner {
    context: Executor,
    transport: Arc<dyn Transport>,
    state: Mutex<NetSocketState>,
}

#[derive(Default)]
struct NetSocketState {
    handler: Option<Arc<dyn Fn(Bytes) + Send + Sync>>,
    buffered: Vec<Bytes>,
}

impl NetSocket {
    fn new(context: Executor, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(NetSocketInner {
                context,
                transport,
                state: Mutex::new(NetSocketState::default()),
            }),
        }
    }

    /// Write raw bytes to the transport.
    pub fn write(&self, data: Bytes, done: Option<WriteDone>) {
        self.inner
            .transport
            .write(crate::proto::OutboundMessage::Raw(data), done);
    }

    /// Install the inbound data handler, replaying any buffered bytes.
    pub fn on_data(&self, handler: impl Fn(Bytes) + Send + Sync + 'static) {
        let handler: Arc<dyn Fn(Bytes) + Send + Sync> = Arc::new(handler);
        let buffered = {
            let mut state = self.inner.state.lock().unwrap();
            state.handler = Some(handler.clone());
            std::mem::take(&mut state.buffered)
        };
        if !buffered.is_empty() {
            self.inner.context.execute(move || {
                for data in buffered {
                    handler(data);
                }
            });
        }
    }

    /// Close the underlying transport.
    pub fn close(&self) {
        self.inner.transport.close();
    }

    pub(crate) fn deliver(&self, data: Bytes) {
        let handler = {
            let mut state = self.inner.state.lock().unwrap();
            match &state.handler {
                Some(handler) => Some(handler.clone()),
                None => {
                    state.buffered.push(data.clone());
                    None
                }
            }
        };
        if let Some(handler) = handler {
            self.inner.context.execute(move || handler(data));
        }
    }
}

// =============================================================================
// Upgrade entry points
// =============================================================================

impl Connection {
    /// Convert the connection into a raw socket.
    ///
    /// Strips the HTTP handlers, evicts the connection from the pool and
    /// hands back a [`NetSocket`]; bytes flushed during codec removal are
    /// buffered on it.
    pub fn to_net_socket(&self, completion: impl FnOnce(Result<NetSocket>) + Send + 'static) {
        let conn = self.inner.clone();
        self.inner.executor.clone().execute(move || {
            if conn.state.lock().unwrap().closed {
                completion(Err(Error::Closed));
                return;
            }
            debug!("converting connection to raw socket");
            let pending = conn.remove_channel_handlers();
            let socket = NetSocket::new(conn.executor.clone(), conn.transport.clone());
            for msg in pending {
                if let Some(data) = raw_payload(msg) {
                    socket.deliver(data);
                }
            }
            conn.state.lock().unwrap().net_socket = Some(socket.clone());
            conn.notify_evict();
            completion(Ok(socket));
        });
    }

    /// Upgrade the connection to a WebSocket session.
    ///
    /// The handshake request rides the normal pipeline as
    /// `GET` + `Connection: Upgrade`; a `101` response with a valid
    /// `Sec-WebSocket-Accept` installs the returned [`WebSocket`] for frame
    /// routing. Any failure closes the connection and fails `completion`.
    pub fn to_web_socket(
        &self,
        request_uri: &str,
        headers: Headers,
        version: Option<u16>,
        sub_protocols: Vec<String>,
        completion: impl FnOnce(Result<WebSocket>) + Send + 'static,
    ) {
        let conn = self.inner.clone();
        let uri = request_uri.to_string();
        self.inner.executor.clone().execute(move || {
            do_to_web_socket(conn, uri, headers, version, sub_protocols, Box::new(completion));
        });
    }
}

fn do_to_web_socket(
    conn: Arc<ConnectionInner>,
    request_uri: String,
    headers: Headers,
    version: Option<u16>,
    sub_protocols: Vec<String>,
    completion: WsCompletion,
) {
    let scheme = if conn.ssl { "https" } else { "http" };
    let absolute = if request_uri.starts_with('/') {
        format!(
            "{}://{}:{}{}",
            scheme, conn.server_host, conn.server_port, request_uri
        )
    } else {
        request_uri.clone()
    };
    debug!(uri = %absolute, "starting websocket handshake");

    let key = handshake_key();
    let expected_accept = accept_key(&key);

    let mut handshake_headers = headers;
    handshake_headers.set("Upgrade", "websocket");
    handshake_headers.set("Connection", "Upgrade");
    handshake_headers.set("Sec-WebSocket-Key", key);
    handshake_headers.set(
        "Sec-WebSocket-Version",
        version.unwrap_or(DEFAULT_WEBSOCKET_VERSION).to_string(),
    );
    if !sub_protocols.is_empty() {
        handshake_headers.set("Sec-WebSocket-Protocol", sub_protocols.join(","));
    }
    let mut extension_offers: Vec<&str> = Vec::new();
    if conn.options.ws_per_message_deflate {
        extension_offers.push("permessage-deflate; client_max_window_bits");
    }
    if conn.options.ws_deflate_frame {
        extension_offers.push("deflate-frame");
    }
    if !extension_offers.is_empty() {
        handshake_headers.set("Sec-WebSocket-Extensions", extension_offers.join(", "));
    }

    let head = RequestHead {
        method: Method::Get,
        uri: request_uri,
        authority: format!("{}:{}", conn.server_host, conn.server_port),
        headers: handshake_headers,
    };

    // The head handler and the exception handler race for the completion.
    let completion = Arc::new(Mutex::new(Some(completion)));
    let admission_conn = conn.clone();
    conn.do_create_stream(
        conn.executor.clone(),
        Box::new(move |admitted| {
            let stream = match admitted {
                Ok(stream) => stream,
                Err(err) => {
                    if let Some(completion) = completion.lock().unwrap().take() {
                        completion(Err(err));
                    }
                    return;
                }
            };
            let conn = admission_conn;
            {
                let conn = conn.clone();
                let completion = completion.clone();
                stream.on_head(move |response| {
                    let Some(completion) = completion.lock().unwrap().take() else {
                        return;
                    };
                    let accept_valid = response.headers.get("sec-websocket-accept")
                        == Some(expected_accept.as_str());
                    if response.status == 101 && accept_valid {
                        let sub_protocol = response
                            .headers
                            .get("sec-websocket-protocol")
                            .map(str::to_owned);
                        let ws = WebSocket::new(
                            conn.executor.clone(),
                            conn.transport.clone(),
                            sub_protocol,
                            conn.transport.is_writable(),
                        );
                        if let Some(metrics) = &conn.metrics {
                            ws.set_metric(metrics.websocket_connected());
                        }
                        conn.state.lock().unwrap().web_socket = Some(ws.clone());
                        debug!("websocket handshake complete");
                        completion(Ok(ws));
                    } else {
                        let message = if response.status != 101 {
                            format!("unexpected handshake status {}", response.status)
                        } else {
                            "invalid Sec-WebSocket-Accept".to_string()
                        };
                        conn.close_conn();
                        completion(Err(Error::WebSocketHandshake { message }));
                    }
                });
            }
            {
                let completion = completion.clone();
                stream.on_exception(move |err| {
                    if let Some(completion) = completion.lock().unwrap().take() {
                        completion(Err(Error::WebSocketHandshake {
                            message: err.to_string(),
                        }));
                    }
                });
            }
            stream.write_head(head, false, None, true, true, None);
        }),
    );
}

// =============================================================================
// Handshake Keys
// =============================================================================

/// Fresh `Sec-WebSocket-Key`: base64 of 16 random bytes.
fn handshake_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// The `Sec-WebSocket-Accept` value a compliant server must answer `key`
/// with: base64 of SHA-1 over key + GUID.
fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 §1.3 sample handshake.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn handshake_key_is_16_random_bytes() {
        let key = handshake_key();
        let decoded = BASE64.decode(&key).unwrap();
        assert_eq!(decoded.len(), 16);
        assert_ne!(handshake_key(), handshake_key());
    }

    #[test]
    fn raw_payload_extracts_bytes() {
        assert!(raw_payload(InboundMessage::Raw(Bytes::from_static(b"x"))).is_some());
        assert!(raw_payload(InboundMessage::Chunk(Bytes::from_static(b"x"))).is_some());
        assert_eq!(
            raw_payload(InboundMessage::Last {
                chunk: Some(Bytes::from_static(b"x")),
                trailers: Headers::new()
            })
            .as_deref(),
            Some(&b"x"[..])
        );
        assert!(
            raw_payload(InboundMessage::Last { chunk: None, trailers: Headers::new() }).is_none()
        );
    }
}
