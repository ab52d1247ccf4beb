//! Persistent render threads synchronized by a per-period barrier

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

/// Work for one period. Called once per worker with `(worker_index, worker_count)`.
pub(crate) type Job = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Fixed set of threads that each run their share of a job, then report back.
///
/// `run` releases every worker and waits until all of them have completed, so
/// nothing the job touches is in use once it returns.
pub(crate) struct WorkerPool {
    jobs: Vec<Sender<Job>>,
    done: Receiver<()>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(count: usize) -> std::io::Result<Self> {
        let (done_tx, done) = unbounded();
        let mut jobs = Vec::with_capacity(count);
        let mut threads = Vec::with_capacity(count);

        for index in 0..count {
            let (tx, rx) = unbounded::<Job>();
            let done_tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("mixdown-worker-{index}"))
                .spawn(move || Self::worker_loop(index, count, rx, done_tx))?;
            jobs.push(tx);
            threads.push(handle);
        }

        debug!(workers = count, "Worker pool started");
        Ok(Self { jobs, done, threads })
    }

    fn worker_loop(index: usize, count: usize, rx: Receiver<Job>, done: Sender<()>) {
        while let Ok(job) = rx.recv() {
            if panic::catch_unwind(AssertUnwindSafe(|| job(index, count))).is_err() {
                warn!(worker = index, "Worker job panicked");
            }
            if done.send(()).is_err() {
                break;
            }
        }
    }

    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    /// Release every worker with `job` and block until all report completion
    pub fn run(&self, job: &Job) {
        let count = self.jobs.len();
        let mut released = 0;
        for (index, tx) in self.jobs.iter().enumerate() {
            if tx.send(job.clone()).is_ok() {
                released += 1;
            } else {
                // Worker is gone; do its share here
                warn!(worker = index, "Worker unavailable, rendering inline");
                job(index, count);
            }
        }
        for _ in 0..released {
            if self.done.recv().is_err() {
                break;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.jobs.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        debug!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn test_every_index_covered_once() {
        let pool = WorkerPool::new(3).unwrap();
        let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..10).map(|_| AtomicUsize::new(0)).collect());
        let shared = hits.clone();
        let job: Job = Arc::new(move |worker, count| {
            for i in (worker..shared.len()).step_by(count) {
                shared[i].fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..5 {
            pool.run(&job);
        }
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 5));
    }

    #[test]
    fn test_run_waits_for_all_workers() {
        let pool = WorkerPool::new(4).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = log.clone();
        let job: Job = Arc::new(move |worker, _| {
            thread::sleep(std::time::Duration::from_millis(5 * worker as u64));
            shared.lock().unwrap().push(worker);
        });
        pool.run(&job);
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_panicking_job_still_completes() {
        let pool = WorkerPool::new(2).unwrap();
        let job: Job = Arc::new(|worker, _| {
            if worker == 0 {
                panic!("boom");
            }
        });
        pool.run(&job);
        // Pool is still usable afterwards
        let count = Arc::new(AtomicUsize::new(0));
        let shared = count.clone();
        let job: Job = Arc::new(move |_, _| {
            shared.fetch_add(1, Ordering::SeqCst);
        });
        pool.run(&job);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(pool.size(), 2);
    }
}
