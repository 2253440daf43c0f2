//! Fixed-size pool of persistent compute workers.
//!
//! Every worker is an OS thread draining its own FIFO channel. Jobs are
//! assigned round-robin. Each worker owns a [`WorkerSlot`] that is set up on
//! its first job and reused afterwards; a failing or panicking job turns into
//! an error reply and leaves the slot usable.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::TileError;
use crate::kernel::{render_tile, terrain_rgb};
use crate::models::{JobInput, WorkerJob, WorkerReply};

/// Default number of workers.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Receives every reply, on the worker thread that produced it.
pub type ReplyHandler = Arc<dyn Fn(WorkerReply) + Send + Sync>;

/// Persistent per-worker compute context.
pub struct WorkerSlot {
    index: usize,
    threads: usize,
    pool: Option<rayon::ThreadPool>,
    initialized: bool,
    jobs_run: u64,
}

impl WorkerSlot {
    /// `threads == 0` runs the kernel on the global rayon pool.
    pub fn new(index: usize, threads: usize) -> Self {
        Self {
            index,
            threads,
            pool: None,
            initialized: false,
            jobs_run: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn jobs_run(&self) -> u64 {
        self.jobs_run
    }

    fn ensure_ready(&mut self) -> Result<(), TileError> {
        if self.initialized {
            return Ok(());
        }
        if self.threads > 0 {
            let index = self.index;
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.threads)
                .thread_name(move |i| format!("demlayer-worker-{}-{}", index, i))
                .build()
                .map_err(|e| TileError::Worker {
                    id: format!("slot-{}", index),
                    message: e.to_string(),
                })?;
            self.pool = Some(pool);
        }
        self.initialized = true;
        console_debug!("worker slot {} initialized", self.index);
        Ok(())
    }

    /// Renders one job. Nothing from the job outlives the call.
    pub fn run(&mut self, job: &WorkerJob) -> Result<Vec<u8>, TileError> {
        self.ensure_ready()?;
        self.jobs_run += 1;
        let work = || match &job.input {
            JobInput::Overlay(input) => render_tile(input),
            JobInput::Terrain { image, encoding } => terrain_rgb(image, *encoding),
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }
}

struct Worker {
    sender: Option<Sender<WorkerJob>>,
    handle: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    next: AtomicUsize,
    dispatched: AtomicUsize,
    initializations: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize, handler: ReplyHandler) -> Result<Self, TileError> {
        let size = size.max(1);
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let threads_per_slot = (cores / size).max(1);
        let initializations = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let (sender, receiver) = mpsc::channel::<WorkerJob>();
            let handler = handler.clone();
            let inits = initializations.clone();
            let handle = thread::Builder::new()
                .name(format!("demlayer-worker-{}", index))
                .spawn(move || {
                    let mut slot = WorkerSlot::new(index, threads_per_slot);
                    for job in receiver {
                        handler(process_job(&mut slot, job, &inits));
                    }
                })
                .map_err(|e| TileError::Config(format!("cannot spawn worker {}: {}", index, e)))?;
            workers.push(Worker {
                sender: Some(sender),
                handle: Some(handle),
            });
        }

        console_log!("worker pool started with {} workers", size);
        Ok(Self {
            workers,
            next: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
            initializations,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues `job` on the next worker in turn and returns that worker's index.
    pub fn dispatch(&self, job: WorkerJob) -> Result<usize, TileError> {
        let n = self.workers.len();
        let index = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % n))
            .unwrap_or(0);

        let sender = self.workers[index]
            .sender
            .as_ref()
            .ok_or(TileError::WorkerUnavailable(index))?;
        sender
            .send(job)
            .map_err(|_| TileError::WorkerUnavailable(index))?;
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        Ok(index)
    }

    pub fn dispatched_count(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// How many slots have completed their one-time setup.
    pub fn initialized_slots(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    console_error!("worker thread exited with a panic");
                }
            }
        }
    }
}

fn process_job(slot: &mut WorkerSlot, job: WorkerJob, inits: &AtomicUsize) -> WorkerReply {
    let id = job.tile_id.clone();
    let was_ready = slot.is_initialized();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| slot.run(&job)));
    if !was_ready && slot.is_initialized() {
        inits.fetch_add(1, Ordering::SeqCst);
    }

    match outcome {
        Ok(Ok(png)) => WorkerReply::ok(id, png),
        Ok(Err(err)) => {
            console_error!("Error processing tile {}: {}", id, err);
            WorkerReply::error(id, err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            console_error!("Worker panicked on tile {}: {}", id, message);
            WorkerReply::error(id, message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
