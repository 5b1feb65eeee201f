//! h1x-core: HTTP/1.x client connection multiplexing.
//!
//! This crate provides:
//! - A pipelined HTTP/1.0/1.1 client connection over a pluggable transport
//! - Per-exchange streams with flow-controlled inbound delivery
//! - Keep-alive negotiation, pool recycling and graceful shutdown
//! - CONNECT/Upgrade tunneling and WebSocket handshakes
//! - Pool-listener, metrics and tracer contracts
//! - Logging setup
//!
//! The byte-level HTTP codec and the socket itself live behind the
//! [`Transport`] trait; the glue owning them feeds decoded messages into
//! [`Connection::handle_message`] and forwards transport events to the
//! matching `Connection` entry points.

pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod executor;
pub mod inbound;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod proto;
pub mod trace;
pub mod transport;
pub mod websocket;

pub use config::ConnectionOptions;
pub use connection::{Connection, ConnectionParams, NetSocket, Stream};
pub use error::{Error, Result};
pub use executor::Executor;
pub use logging::{LogFormat, init_logging};
pub use metrics::ClientMetrics;
pub use pool::PoolListener;
pub use trace::Tracer;
pub use transport::Transport;
pub use websocket::WebSocket;
