//! Background worker pool for snapshot compaction.
//!
//! Compaction is CPU-bound; running it here keeps interactive editing
//! responsive. The pool offers exactly one synchronization primitive:
//! [`CompactPool::drain`], which blocks until every submitted job has run to
//! completion. There is no per-job wait, no cancellation and no timeout;
//! once submitted, a job always runs.

use parking_lot::{Condvar, Mutex};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outstanding-job counter doubling as the drain barrier.
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn new() -> Self {
        Self {
            count: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn done(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Bounded pool of worker threads executing compaction jobs.
///
/// Jobs may complete in any order relative to submission. Dropping the pool
/// closes the queue and joins the workers, so any jobs already submitted
/// still finish.
pub struct CompactPool {
    tx: Option<Sender<Job>>,
    pending: Arc<Pending>,
    workers: Vec<JoinHandle<()>>,
}

impl CompactPool {
    /// Spawn a pool sized for background work.
    pub fn new() -> Self {
        let worker_count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(4);

        let (tx, rx) = channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(Pending::new());

        let workers = (0..worker_count)
            .map(|i| {
                let rx = Arc::clone(&rx);
                let pending = Arc::clone(&pending);
                thread::Builder::new()
                    .name(format!("undo-compact-{i}"))
                    .spawn(move || worker_loop(rx, pending))
                    .expect("failed to spawn compaction worker")
            })
            .collect();

        tracing::trace!(worker_count, "compaction pool started");

        Self {
            tx: Some(tx),
            pending,
            workers,
        }
    }

    /// Queue a job for execution on a worker thread.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.pending.add();
        if let Some(tx) = &self.tx {
            // The queue only closes on drop, after which nothing submits.
            let _ = tx.send(Box::new(job));
        }
    }

    /// Block until every outstanding job has completed.
    pub fn drain(&self) {
        self.pending.wait_idle();
    }
}

impl Default for CompactPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompactPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::trace!("compaction pool shut down");
    }
}

/// Main worker loop - runs in a background thread until the queue closes.
fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>, pending: Arc<Pending>) {
    loop {
        let job = {
            let rx = rx.lock();
            rx.recv()
        };
        match job {
            Ok(job) => {
                job();
                pending.done();
            }
            Err(_) => break, // Channel closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_drain_waits_for_jobs() {
        let pool = CompactPool::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn test_drain_without_jobs() {
        let pool = CompactPool::new();
        pool.drain();
    }

    #[test]
    fn test_drop_finishes_submitted_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = CompactPool::new();
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
