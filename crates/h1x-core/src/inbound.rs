//! Bounded inbound queue feeding a stream's consumer.
//!
//! Decoded response items are parked here until the consumer's demand lets
//! them flow. Delivery happens on the stream's context, never on the caller
//! of [`InboundBuffer::write`]. When the queue reaches its high-water mark
//! the producer is told to stop reading the transport; once the consumer has
//! drained every parked item, the drain callback fires so reads can resume.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use crate::executor::Executor;
use crate::proto::Headers;

/// One parked inbound item.
#[derive(Debug, Clone)]
pub enum InboundItem {
    /// A piece of response content.
    Chunk(Bytes),
    /// End-of-response sentinel carrying trailing headers.
    Trailers(Headers),
}

type ItemHandler = Arc<dyn Fn(InboundItem) + Send + Sync>;
type DrainHandler = Arc<dyn Fn() + Send + Sync>;

/// Bounded queue of [`InboundItem`]s with demand-driven delivery.
#[derive(Clone)]
pub struct InboundBuffer {
    inner: Arc<BufferInner>,
}

struct BufferInner {
    context: Executor,
    state: Mutex<BufferState>,
}

struct BufferState {
    pending: VecDeque<InboundItem>,
    /// Items the consumer is willing to take; `u64::MAX` means unbounded.
    demand: u64,
    high_water: usize,
    emitting: bool,
    overflowed: bool,
    handler: Option<ItemHandler>,
    drain_handler: Option<DrainHandler>,
}

impl InboundBuffer {
    /// Create a buffer delivering on `context` with the given high-water
    /// mark.
    pub fn new(context: Executor, high_water: usize) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                context,
                state: Mutex::new(BufferState {
                    pending: VecDeque::new(),
                    demand: u64::MAX,
                    high_water,
                    emitting: false,
                    overflowed: false,
                    handler: None,
                    drain_handler: None,
                }),
            }),
        }
    }

    /// Install the item handler.
    pub fn set_handler(&self, handler: impl Fn(InboundItem) + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().handler = Some(Arc::new(handler));
        self.maybe_emit();
    }

    /// Install the drain callback, fired when the buffer empties after
    /// having reached its high-water mark.
    pub fn set_drain_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.inner.state.lock().unwrap().drain_handler = Some(Arc::new(handler));
    }

    /// Park an item for delivery.
    ///
    /// Returns whether the item was accepted without reaching the
    /// high-water mark; a `false` verdict asks the producer to pause
    /// transport reads.
    pub fn write(&self, item: InboundItem) -> bool {
        let accepted = {
            let mut state = self.inner.state.lock().unwrap();
            state.pending.push_back(item);
            let accepted = state.pending.len() < state.high_water;
            if !accepted {
                state.overflowed = true;
            }
            accepted
        };
        self.maybe_emit();
        accepted
    }

    /// Stop delivery until [`InboundBuffer::fetch`] grants demand again.
    pub fn pause(&self) {
        self.inner.state.lock().unwrap().demand = 0;
    }

    /// Grant demand for `n` more items and deliver what is already parked.
    pub fn fetch(&self, n: u64) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.demand = state.demand.saturating_add(n);
        }
        self.maybe_emit();
    }

    /// Number of parked, undelivered items.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }

    /// Schedule an emission pass on the context if one is warranted and not
    /// already running.
    fn maybe_emit(&self) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.emitting
                || state.demand == 0
                || state.pending.is_empty()
                || state.handler.is_none()
            {
                return;
            }
            state.emitting = true;
        }
        let inner = self.inner.clone();
        self.inner.context.execute(move || inner.emit());
    }
}

impl BufferInner {
    fn emit(&self) {
        loop {
            let (item, handler) = {
                let mut state = self.state.lock().unwrap();
                if state.demand == 0 || state.pending.is_empty() {
                    state.emitting = false;
                    break;
                }
                if state.demand != u64::MAX {
                    state.demand -= 1;
                }
                let item = state.pending.pop_front().expect("pending checked non-empty");
                let handler = state.handler.clone().expect("handler checked installed");
                (item, handler)
            };
            handler(item);
        }

        let drain = {
            let mut state = self.state.lock().unwrap();
            if state.pending.is_empty() && state.overflowed {
                state.overflowed = false;
                state.drain_handler.clone()
            } else {
                None
            }
        };
        if let Some(drain) = drain {
            drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(data: &'static [u8]) -> InboundItem {
        InboundItem::Chunk(Bytes::from_static(data))
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn collecting_buffer(high_water: usize) -> (InboundBuffer, Arc<Mutex<Vec<InboundItem>>>) {
        let buffer = InboundBuffer::new(Executor::start(), high_water);
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();
        buffer.set_handler(move |item| sink.lock().unwrap().push(item));
        (buffer, delivered)
    }

    #[tokio::test]
    async fn write_below_high_water_is_accepted() {
        let (buffer, delivered) = collecting_buffer(5);

        assert!(buffer.write(chunk(b"a")));
        assert!(buffer.write(chunk(b"b")));
        settle().await;

        assert_eq!(delivered.lock().unwrap().len(), 2);
        assert_eq!(buffer.pending_count(), 0);
    }

    #[tokio::test]
    async fn write_at_high_water_is_rejected() {
        let buffer = InboundBuffer::new(Executor::start(), 2);
        // No demand, no handler: items park.
        buffer.pause();

        assert!(buffer.write(chunk(b"a")));
        assert!(!buffer.write(chunk(b"b")));
        assert_eq!(buffer.pending_count(), 2);
    }

    #[tokio::test]
    async fn pause_parks_items_and_fetch_releases_them() {
        let (buffer, delivered) = collecting_buffer(5);
        buffer.pause();

        buffer.write(chunk(b"a"));
        buffer.write(chunk(b"b"));
        buffer.write(chunk(b"c"));
        settle().await;
        assert!(delivered.lock().unwrap().is_empty());

        buffer.fetch(2);
        settle().await;
        assert_eq!(delivered.lock().unwrap().len(), 2);
        assert_eq!(buffer.pending_count(), 1);

        buffer.fetch(1);
        settle().await;
        assert_eq!(delivered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn drain_fires_after_overflow_empties() {
        let buffer = InboundBuffer::new(Executor::start(), 2);
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        buffer.set_drain_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        buffer.set_handler(|_| {});
        buffer.pause();

        buffer.write(chunk(b"a"));
        assert!(!buffer.write(chunk(b"b")));

        buffer.fetch(u64::MAX);
        settle().await;

        assert_eq!(buffer.pending_count(), 0);
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_drain_without_overflow() {
        let buffer = InboundBuffer::new(Executor::start(), 5);
        let drains = Arc::new(AtomicUsize::new(0));
        let counter = drains.clone();
        buffer.set_drain_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        buffer.set_handler(|_| {});

        buffer.write(chunk(b"a"));
        settle().await;

        assert_eq!(drains.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn trailers_are_delivered_in_order() {
        let (buffer, delivered) = collecting_buffer(5);

        buffer.write(chunk(b"body"));
        buffer.write(InboundItem::Trailers(Headers::new()));
        settle().await;

        let delivered = delivered.lock().unwrap();
        assert!(matches!(delivered[0], InboundItem::Chunk(_)));
        assert!(matches!(delivered[1], InboundItem::Trailers(_)));
    }
}
