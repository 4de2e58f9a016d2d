//! Fixed-size worker pool draining a FIFO queue of closures
//!
//! Every background job in the engine (asset parsing, cache writes) runs on a
//! [`TaskManager`]. Tasks are dequeued in the order they were enqueued; once
//! several workers drain the queue there is no ordering between tasks.
//!
//! A panic inside a task is caught at the worker boundary and logged. The
//! worker keeps running and the task's result is lost, so anything that needs
//! to hear about failure must report it from inside the task.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors reported by the task pool.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task pool has been stopped")]
    Stopped,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

struct QueueState {
    tasks: VecDeque<Task>,
    /// Tasks dequeued and currently running.
    active: usize,
    stopping: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when a task is queued or the pool is stopping.
    available: Condvar,
    /// Signalled when the queue is empty and nothing is running.
    idle: Condvar,
}

impl Shared {
    fn notify_if_idle(&self, state: &QueueState) {
        if state.active == 0 && state.tasks.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Pool of worker threads consuming a shared task queue.
pub struct TaskManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl TaskManager {
    /// Start a pool with `worker_count` threads (at least one).
    pub fn new(worker_count: usize) -> Result<Self, TaskError> {
        let worker_count = worker_count.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                active: 0,
                stopping: false,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };

        for index in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let name = format!("kiln-worker-{index}");
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&shared, &name));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                // Dropping `pool` stops and joins the workers spawned so far.
                Err(e) => return Err(TaskError::Spawn(e)),
            }
        }

        info!("TaskManager started with {} workers", worker_count);
        Ok(pool)
    }

    /// Start a pool sized to the machine's available parallelism.
    pub fn with_default_workers() -> Result<Self, TaskError> {
        Self::new(default_worker_count())
    }

    /// Queue a task. Returns immediately; the task runs once on some worker.
    ///
    /// Safe to call from any thread, including from inside a running task.
    pub fn enqueue<F>(&self, task: F) -> Result<(), TaskError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.stopping {
            return Err(TaskError::Stopped);
        }
        state.tasks.push_back(Box::new(task));
        drop(state);

        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop accepting work, let the workers finish everything already queued,
    /// then join them.
    ///
    /// Calling this from inside a task skips joining the calling worker.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.stopping {
                debug!("TaskManager stopping with {} queued tasks", state.tasks.len());
            }
            state.stopping = true;
        }
        self.shared.available.notify_all();
        self.join_workers();
    }

    /// Stop accepting work, discard tasks that have not started yet, and join
    /// the workers. Returns the number of discarded tasks.
    pub fn abort(&self) -> usize {
        let dropped: Vec<Task> = {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            let dropped: Vec<Task> = state.tasks.drain(..).collect();
            self.shared.notify_if_idle(&state);
            dropped
        };
        let count = dropped.len();
        // Task destructors may touch the pool, so run them outside the lock.
        drop(dropped);

        if count > 0 {
            info!("TaskManager aborted, discarded {} queued tasks", count);
        }
        self.shared.available.notify_all();
        self.join_workers();
        count
    }

    /// Block until the queue is empty and no task is running.
    ///
    /// Must not be called from inside a task: the calling task counts as
    /// running, so the pool can never become idle.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !(state.tasks.is_empty() && state.active == 0) {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Number of tasks queued but not yet started.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Number of worker threads this pool was started with.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether `stop` or `abort` has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.state.lock().stopping
    }

    fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread exited abnormally");
            }
        }
        info!("TaskManager stopped");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hardware concurrency, or 1 if it cannot be determined.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn worker_loop(shared: &Shared, name: &str) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.tasks.pop_front() {
                    state.active += 1;
                    break task;
                }
                if state.stopping {
                    return;
                }
                shared.available.wait(&mut state);
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!("Task panicked on {}: {}", name, panic_message(payload.as_ref()));
        }

        let mut state = shared.state.lock();
        state.active -= 1;
        shared.notify_if_idle(&state);
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_every_task_once() {
        let pool = TaskManager::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn single_worker_is_fifo() {
        let pool = TaskManager::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = Arc::clone(&order);
            pool.enqueue(move || order.lock().push(i)).unwrap();
        }

        pool.wait_idle();
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn panic_does_not_kill_worker() {
        let pool = TaskManager::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.enqueue(|| panic!("boom")).unwrap();
        let c = Arc::clone(&counter);
        pool.enqueue(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_drains_queued_tasks() {
        let pool = TaskManager::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.stop();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.pending(), 0);
        assert!(pool.is_stopped());
    }

    #[test]
    fn enqueue_after_stop_is_rejected() {
        let pool = TaskManager::new(1).unwrap();
        pool.stop();
        assert!(matches!(pool.enqueue(|| {}), Err(TaskError::Stopped)));
    }

    #[test]
    fn stop_twice_is_harmless() {
        let pool = TaskManager::new(2).unwrap();
        pool.stop();
        pool.stop();
    }

    #[test]
    fn recursive_enqueue() {
        let pool = Arc::new(TaskManager::new(2).unwrap());
        let (tx, rx) = mpsc::channel();

        let inner_pool = Arc::clone(&pool);
        pool.enqueue(move || {
            inner_pool
                .enqueue(move || tx.send(42).unwrap())
                .unwrap();
        })
        .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn abort_discards_unstarted_tasks() {
        let pool = TaskManager::new(1).unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.enqueue(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        release_tx.send(()).unwrap();
        let dropped = pool.abort();
        // The worker may have picked up some of the queued tasks before abort
        // took the lock; whatever ran plus whatever was dropped covers all five.
        assert_eq!(dropped + counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn stop_from_inside_task_does_not_deadlock() {
        let pool = Arc::new(TaskManager::new(1).unwrap());
        let (tx, rx) = mpsc::channel();

        let inner = Arc::clone(&pool);
        pool.enqueue(move || {
            inner.stop();
            tx.send(()).unwrap();
        })
        .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(pool.is_stopped());
    }

    #[test]
    fn zero_workers_is_clamped() {
        let pool = TaskManager::new(0).unwrap();
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
    }
}
