//! Test utilities for h1x connections.
//!
//! Provides an in-memory transport plus recording pool/metrics/tracer sinks,
//! allowing protocol-logic tests without a real network.

pub mod mock_transport;
pub mod recording;

pub use mock_transport::MockTransport;
pub use recording::{RecordingListener, RecordingMetrics, RecordingTracer};

use std::sync::Arc;

use h1x_core::config::ConnectionOptions;
use h1x_core::connection::{Connection, ConnectionParams};
use h1x_core::executor::Executor;
use h1x_core::proto::HttpVersion;

/// A connection wired to a mock transport and recording sinks.
pub struct TestConnection {
    pub conn: Connection,
    pub executor: Executor,
    pub transport: Arc<MockTransport>,
    pub listener: Arc<RecordingListener>,
    pub metrics: Arc<RecordingMetrics>,
    pub tracer: Arc<RecordingTracer>,
}

/// Assemble a connection over a fresh [`MockTransport`].
pub fn test_connection(version: HttpVersion, options: ConnectionOptions) -> TestConnection {
    let executor = Executor::start();
    let transport = Arc::new(MockTransport::new());
    let listener = Arc::new(RecordingListener::default());
    let metrics = Arc::new(RecordingMetrics::default());
    let tracer = Arc::new(RecordingTracer::default());

    let conn = Connection::new(ConnectionParams {
        executor: executor.clone(),
        transport: transport.clone(),
        version,
        server_host: "example.com".to_string(),
        server_port: 8080,
        ssl: false,
        options,
        listener: listener.clone(),
        metrics: Some(metrics.clone()),
        tracer: Some(tracer.clone()),
    });
    transport.bind(&conn);

    TestConnection {
        conn,
        executor,
        transport,
        listener,
        metrics,
        tracer,
    }
}

/// Let the executors drain their queued work.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
