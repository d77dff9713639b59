use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Starts one worker thread from a named builder.
pub type SpawnWorker =
    Box<dyn FnMut(Builder, Box<dyn FnOnce() + Send + 'static>) -> io::Result<JoinHandle<()>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub thread_name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            thread_name: "tile_worker".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    ZeroWorkers,
}

impl fmt::Display for WorkerPoolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerPoolError::ZeroWorkers => write!(formatter, "worker pool needs at least one worker"),
        }
    }
}

impl std::error::Error for WorkerPoolError {}

/// A job the pool could not start. The job is handed back untouched.
pub enum DispatchError<J> {
    AtCapacity(J),
    SpawnFailed(J),
}

impl<J> DispatchError<J> {
    pub fn into_job(self) -> J {
        match self {
            DispatchError::AtCapacity(job) | DispatchError::SpawnFailed(job) => job,
        }
    }
}

impl<J> fmt::Debug for DispatchError<J> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::AtCapacity(_) => formatter.write_str("AtCapacity(..)"),
            DispatchError::SpawnFailed(_) => formatter.write_str("SpawnFailed(..)"),
        }
    }
}

impl<J> fmt::Display for DispatchError<J> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::AtCapacity(_) => write!(formatter, "all workers are busy"),
            DispatchError::SpawnFailed(_) => write!(formatter, "failed to spawn a worker thread"),
        }
    }
}

impl<J> std::error::Error for DispatchError<J> {}

#[derive(Debug, Default)]
struct PoolCounters {
    running: AtomicUsize,
    panicked_jobs: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub completed: usize,
    pub panicked: usize,
    pub ran_inline: usize,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    job_sender: Option<Sender<Job>>,
    job_receiver: Receiver<Job>,
    counters: Arc<PoolCounters>,
    workers: Vec<JoinHandle<()>>,
    spawn: SpawnWorker,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        Self::with_spawner(
            config,
            Box::new(|builder: Builder, body: Job| builder.spawn(body)),
        )
    }

    pub fn with_spawner(
        config: WorkerPoolConfig,
        spawn: SpawnWorker,
    ) -> Result<Self, WorkerPoolError> {
        if config.max_workers == 0 {
            return Err(WorkerPoolError::ZeroWorkers);
        }
        let (job_sender, job_receiver) = crossbeam_channel::unbounded();
        Ok(Self {
            workers: Vec::with_capacity(config.max_workers),
            config,
            job_sender: Some(job_sender),
            job_receiver,
            counters: Arc::new(PoolCounters::default()),
            spawn,
        })
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.running() < self.config.max_workers
    }

    pub fn spawned_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn panicked_jobs(&self) -> usize {
        self.counters.panicked_jobs.load(Ordering::Acquire)
    }

    /// Start `job` on a worker without blocking.
    ///
    /// The running counter is raised before the job is handed over and lowered
    /// by the worker once the job returns, so a caller polling `has_capacity`
    /// never overshoots the bound.
    pub fn try_dispatch<F>(&mut self, job: F) -> Result<(), DispatchError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.has_capacity() {
            return Err(DispatchError::AtCapacity(job));
        }
        let running = self.counters.running.fetch_add(1, Ordering::AcqRel) + 1;
        if self.workers.len() < running
            && let Err(error) = self.spawn_worker()
        {
            self.counters.running.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                target: "worker_pool",
                spawned = self.workers.len(),
                %error,
                "worker_spawn_failed"
            );
            return Err(DispatchError::SpawnFailed(job));
        }
        self.job_sender
            .as_ref()
            .expect("worker pool job sender lives until drop")
            .send(Box::new(job))
            .unwrap_or_else(|_| panic!("worker pool job channel disconnected"));
        Ok(())
    }

    pub fn run_batch<I, F>(&self, jobs: I) -> BatchReport
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() + Send,
    {
        let mut report = BatchReport::default();
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for job in jobs {
                let slot = Arc::new(Mutex::new(Some(job)));
                let thread_slot = Arc::clone(&slot);
                let spawned = Builder::new()
                    .name(format!("{}_batch", self.config.thread_name))
                    .spawn_scoped(scope, move || {
                        if let Some(job) = take_job(&thread_slot) {
                            job();
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(error) => {
                        tracing::warn!(
                            target: "worker_pool",
                            %error,
                            "batch_spawn_failed_running_inline"
                        );
                        report.ran_inline += 1;
                        if let Some(job) = take_job(&slot) {
                            match catch_unwind(AssertUnwindSafe(job)) {
                                Ok(()) => report.completed += 1,
                                Err(_) => report.panicked += 1,
                            }
                        }
                    }
                }
            }
            for handle in handles {
                match handle.join() {
                    Ok(()) => report.completed += 1,
                    Err(_) => report.panicked += 1,
                }
            }
        });
        if report.panicked > 0 {
            tracing::warn!(target: "worker_pool", panicked = report.panicked, "batch_jobs_panicked");
        }
        report
    }

    fn spawn_worker(&mut self) -> io::Result<()> {
        let receiver = self.job_receiver.clone();
        let counters = Arc::clone(&self.counters);
        let name = format!("{}_{}", self.config.thread_name, self.workers.len());
        let builder = Builder::new().name(name);
        let handle = (self.spawn)(builder, Box::new(move || worker_loop(receiver, counters)))?;
        self.workers.push(handle);
        Ok(())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        drop(self.job_sender.take());
        for handle in self.workers.drain(..) {
            handle.join().expect("join worker pool thread");
        }
    }
}

fn take_job<F>(slot: &Mutex<Option<F>>) -> Option<F> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
}

fn worker_loop(receiver: Receiver<Job>, counters: Arc<PoolCounters>) {
    for job in receiver.iter() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            let panicked = counters.panicked_jobs.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(target: "worker_pool", panicked, "job_panicked");
        }
        counters.running.fetch_sub(1, Ordering::AcqRel);
    }
}
