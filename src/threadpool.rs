//! Thread pool: weight-encoder stage 1 runs one task per OFM, all
//! independent, so it's handed to a small worker pool instead of serial
//! encoding. A job submitted from inside a worker runs inline rather than
//! round-tripping through the queue, since the pool has no concept of
//! nested scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// `ETHOSN_SUPPORT_LIBRARY_NUM_THREADS`: overrides the worker count when
/// set to a positive integer.
const THREAD_COUNT_ENV_VAR: &str = "ETHOSN_SUPPORT_LIBRARY_NUM_THREADS";

fn default_thread_count() -> usize {
    if let Ok(value) = std::env::var(THREAD_COUNT_ENV_VAR) {
        if let Ok(n) = value.parse::<usize>() {
            if n > 0 {
                return n;
            }
        }
    }
    (thread::available_parallelism().map(|n| n.get()).unwrap_or(1) / 2).max(1)
}

thread_local! {
    static ON_WORKER_THREAD: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

/// A small MPMC worker pool over a bounded channel. Dropping the pool
/// signals shutdown; `join` blocks until every worker has drained the
/// queue and exited.
pub struct ThreadPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    shutting_down: Arc<AtomicBool>,
}

impl ThreadPool {
    pub fn new() -> Self {
        Self::with_thread_count(default_thread_count())
    }

    pub fn with_thread_count(thread_count: usize) -> Self {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = bounded(thread_count.max(1) * 4);
        let shutting_down = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(thread_count);

        for _ in 0..thread_count.max(1) {
            let receiver = receiver.clone();
            workers.push(thread::spawn(move || {
                ON_WORKER_THREAD.with(|flag| flag.set(true));
                while let Ok(job) = receiver.recv() {
                    job();
                }
            }));
        }

        ThreadPool {
            sender: Some(sender),
            workers,
            shutting_down,
        }
    }

    /// Submit `job`. If called from inside a worker thread, runs inline
    /// immediately instead of enqueuing — this pool has no work-stealing,
    /// so a nested submission would otherwise deadlock against a full
    /// queue.
    pub fn spawn<F: FnOnce() + Send + 'static>(&self, job: F) {
        if ON_WORKER_THREAD.with(|flag| flag.get()) {
            job();
            return;
        }
        if let Some(sender) = &self.sender {
            let _ = sender.send(Box::new(job));
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    /// Stop accepting new work and wait for every queued job to finish.
    pub fn join(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn runs_every_submitted_job() {
        let pool = ThreadPool::with_thread_count(2);
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn default_thread_count_is_at_least_one() {
        assert!(default_thread_count() >= 1);
    }

    #[test]
    fn env_var_override_is_respected() {
        std::env::set_var(THREAD_COUNT_ENV_VAR, "3");
        assert_eq!(default_thread_count(), 3);
        std::env::remove_var(THREAD_COUNT_ENV_VAR);
    }
}
