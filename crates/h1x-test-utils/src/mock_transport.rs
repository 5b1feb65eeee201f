//! Mock transport for testing without a real network.
//!
//! Records every outbound message, completes write callbacks synchronously,
//! and lets tests feed decoded inbound messages, flip writability, and
//! simulate the codec flushing leftovers during removal.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use h1x_core::connection::Connection;
use h1x_core::error::Error;
use h1x_core::proto::{InboundMessage, OutboundMessage};
use h1x_core::transport::{Transport, WriteDone};

/// In-memory [`Transport`] double.
#[derive(Default)]
pub struct MockTransport {
    written: Mutex<Vec<OutboundMessage>>,
    unwritable: AtomicBool,
    fail_writes: AtomicBool,
    paused: AtomicBool,
    pause_count: AtomicUsize,
    resume_count: AtomicUsize,
    closed: AtomicBool,
    codec_installed: AtomicBool,
    decompressor_installed: AtomicBool,
    flush_on_codec_removal: Mutex<Vec<InboundMessage>>,
    conn: Mutex<Option<Connection>>,
}

impl MockTransport {
    /// Fresh transport with the codec installed and writes flowing.
    pub fn new() -> Self {
        let transport = Self::default();
        transport.codec_installed.store(true, Ordering::SeqCst);
        transport.decompressor_installed.store(true, Ordering::SeqCst);
        transport
    }

    /// Wire the glue callbacks to `conn`; must be called before the
    /// transport is driven.
    pub fn bind(&self, conn: &Connection) {
        *self.conn.lock().unwrap() = Some(conn.clone());
    }

    /// Deliver a decoded inbound message to the connection.
    pub fn feed(&self, msg: InboundMessage) {
        let conn = self.conn.lock().unwrap().clone();
        conn.expect("transport not bound").handle_message(msg);
    }

    /// Flip writability and notify the connection.
    pub fn set_writable(&self, writable: bool) {
        self.unwritable.store(!writable, Ordering::SeqCst);
        let conn = self.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            conn.writability_changed();
        }
    }

    /// Make subsequent writes complete with a transport error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Queue a message the codec will flush back while being removed.
    pub fn flush_on_codec_removal(&self, msg: InboundMessage) {
        self.flush_on_codec_removal.lock().unwrap().push(msg);
    }

    /// Snapshot of everything written so far.
    pub fn written(&self) -> Vec<OutboundMessage> {
        self.written.lock().unwrap().clone()
    }

    /// Drain the write log.
    pub fn take_written(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.written.lock().unwrap())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pause_count(&self) -> usize {
        self.pause_count.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    pub fn codec_installed(&self) -> bool {
        self.codec_installed.load(Ordering::SeqCst)
    }

    pub fn decompressor_installed(&self) -> bool {
        self.decompressor_installed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn write(&self, msg: OutboundMessage, done: Option<WriteDone>) {
        if self.fail_writes.load(Ordering::SeqCst) {
            if let Some(done) = done {
                done(Err(Error::Transport {
                    message: "mock write failure".to_string(),
                }));
            }
            return;
        }
        self.written.lock().unwrap().push(msg);
        if let Some(done) = done {
            done(Ok(()));
        }
    }

    fn is_writable(&self) -> bool {
        !self.unwritable.load(Ordering::SeqCst)
    }

    fn pause_reads(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.pause_count.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_reads(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume_count.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let conn = self.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            conn.handle_closed();
        }
    }

    fn remove_decompressor(&self) {
        self.decompressor_installed.store(false, Ordering::SeqCst);
    }

    fn remove_http_codec(&self) {
        self.codec_installed.store(false, Ordering::SeqCst);
        let leftovers = std::mem::take(&mut *self.flush_on_codec_removal.lock().unwrap());
        if leftovers.is_empty() {
            return;
        }
        let conn = self.conn.lock().unwrap().clone();
        if let Some(conn) = conn {
            for msg in leftovers {
                conn.handle_message(msg);
            }
        }
    }
}
