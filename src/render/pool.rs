use std::sync::mpsc;

use crate::foundation::error::{StrandError, StrandResult};

/// Bounded pool of render worker threads.
///
/// One render job is submitted per plan entry per frame; the frame thread
/// joins every handle before touching the frame again, so the pool's queue
/// is empty between frames. Shutdown lets in-flight jobs run to completion;
/// nothing is cancelled mid-flight.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

/// Completion handle for one submitted job.
///
/// `join` blocks until the job ran and yields its result. The job's error is
/// reported here; it never unwinds the pool.
pub struct JobHandle {
    rx: mpsc::Receiver<StrandResult<()>>,
}

impl JobHandle {
    pub fn join(self) -> StrandResult<()> {
        self.rx
            .recv()
            .map_err(|_| StrandError::render("render job dropped without completing"))?
    }
}

impl WorkerPool {
    /// Build a pool with exactly `threads` workers. A zero-thread pool would
    /// deadlock the frame loop, so it is rejected up front.
    pub fn new(threads: usize) -> StrandResult<Self> {
        if threads == 0 {
            return Err(StrandError::config("render pool needs at least 1 thread"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("render-worker-{i}"))
            .build()
            .map_err(|e| StrandError::config(format!("failed to build render pool: {e}")))?;
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Queue a job. Execution order across jobs is unspecified.
    pub fn submit<F>(&self, job: F) -> JobHandle
    where
        F: FnOnce() -> StrandResult<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        JobHandle { rx }
    }

    /// Shut the pool down. Outstanding jobs always run to completion;
    /// rayon's workers only exit once their queues are empty. With `drain`
    /// set this call additionally blocks until every worker has gone idle;
    /// otherwise teardown is left to the worker threads.
    pub fn stop(self, drain: bool) {
        if drain {
            let barrier = std::sync::Arc::new(std::sync::Barrier::new(self.threads));
            let handles: Vec<JobHandle> = (0..self.threads)
                .map(|_| {
                    let barrier = std::sync::Arc::clone(&barrier);
                    self.submit(move || {
                        barrier.wait();
                        Ok(())
                    })
                })
                .collect();
            for h in handles {
                let _ = h.join();
            }
        }
    }
}
