//! Single-threaded I/O executor.
//!
//! Every connection belongs to exactly one executor: a task queue drained by
//! one spawned driver task. All transport reads and writes happen on it.
//! Public entry points may be invoked from any thread; they submit
//! themselves through [`Executor::execute`], which runs the task inline when
//! the caller is already on the executor and enqueues it otherwise. Streams
//! carry their own executor (their "context") for user-handler dispatch, so
//! connection internals and user code never share a critical section.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the executor currently driving this thread, 0 when none.
    static CURRENT_EXECUTOR: Cell<u64> = const { Cell::new(0) };
}

/// Marks the current thread as running on an executor for the guard's
/// lifetime, restoring the previous marker on drop so nested executors
/// unwind correctly.
struct EnterGuard {
    prev: u64,
}

impl EnterGuard {
    fn enter(id: u64) -> Self {
        let prev = CURRENT_EXECUTOR.with(|c| c.replace(id));
        Self { prev }
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        CURRENT_EXECUTOR.with(|c| c.set(prev));
    }
}

/// Handle to a single-threaded task executor.
///
/// Cheap to clone; the driver task stops once every handle is dropped.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    id: u64,
    tx: mpsc::UnboundedSender<Task>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("id", &self.inner.id).finish()
    }
}

impl Executor {
    /// Spawn a new executor on the ambient tokio runtime.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let id = NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                let _entered = EnterGuard::enter(id);
                task();
            }
        });
        Self {
            inner: Arc::new(ExecutorInner { id, tx }),
        }
    }

    /// Whether the calling code is already running on this executor.
    pub fn is_current(&self) -> bool {
        CURRENT_EXECUTOR.with(|c| c.get()) == self.inner.id
    }

    /// Run `task` on this executor.
    ///
    /// Inline when the caller is already on the executor, enqueued
    /// otherwise. Tasks submitted from off the executor run in submission
    /// order. Submission to a stopped executor is a silent no-op.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_current() {
            task();
        } else {
            let _ = self.inner.tx.send(Box::new(task));
        }
    }

    /// Schedule `task` to run on this executor after `delay`.
    pub fn set_timer(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let executor = self.clone();
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if flag.load(Ordering::SeqCst) {
                return;
            }
            let inner_flag = flag.clone();
            executor.execute(move || {
                if !inner_flag.load(Ordering::SeqCst) {
                    task();
                }
            });
        });
        TimerHandle { cancelled, join }
    }
}

/// Cancellation handle for a timer created with [`Executor::set_timer`].
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    join: tokio::task::JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the timer. Harmless if it already fired.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn execute_runs_submitted_task() {
        let executor = Executor::start();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        executor.execute(move || flag.store(true, Ordering::SeqCst));
        settle().await;

        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let executor = Executor::start();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..8 {
            let order = order.clone();
            executor.execute(move || order.lock().unwrap().push(i));
        }
        settle().await;

        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn nested_execute_runs_inline() {
        let executor = Executor::start();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let inner_executor = executor.clone();
        let log = observed.clone();
        executor.execute(move || {
            assert!(inner_executor.is_current());
            log.lock().unwrap().push("outer");
            let inner_log = log.clone();
            // Already on the executor: must take effect before we return.
            inner_executor.execute(move || inner_log.lock().unwrap().push("inner"));
            log.lock().unwrap().push("after");
        });
        settle().await;

        assert_eq!(*observed.lock().unwrap(), vec!["outer", "inner", "after"]);
    }

    #[tokio::test]
    async fn is_current_false_off_executor() {
        let executor = Executor::start();
        assert!(!executor.is_current());
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let executor = Executor::start();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        let _timer = executor.set_timer(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst)
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        settle().await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let executor = Executor::start();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        let timer = executor.set_timer(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst)
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
