//! # Worker pool
//! Fixed number of long-lived workers draining one bounded queue.
//!
//! `submit` waits while the queue is full; that wait is the pool's only backpressure.
//! `stop` closes the queue and returns once every queued and running task has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_WORKERS: usize = 10;

/// A unit of work. Errors are logged by the pool; retrying is the task's own business.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    async fn execute(&self) -> anyhow::Result<()>;

    /// Shown in logs when the task fails.
    fn label(&self) -> String {
        "task".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Started,
    Stopping,
    Stopped,
}

type BoxedTask = Box<dyn Task>;
type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedTask>>>;

pub struct WorkerPool {
    worker_count: usize,
    queue_capacity: usize,
    sender: Mutex<Option<mpsc::Sender<BoxedTask>>>,
    receiver: SharedReceiver,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// `worker_count` workers over a queue of twice that many slots. Zero means the default.
    pub fn new(worker_count: usize) -> Self {
        let n = if worker_count == 0 {
            DEFAULT_WORKERS
        } else {
            worker_count
        };
        Self::with_capacity(n, n * 2)
    }

    pub fn with_capacity(worker_count: usize, queue_capacity: usize) -> Self {
        let worker_count = worker_count.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(queue_capacity);
        Self {
            worker_count,
            queue_capacity,
            sender: Mutex::new(Some(tx)),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            state: Mutex::new(PoolState::Created),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock().expect("pool state poisoned")
    }

    /// Spawn the workers. Only the first call does anything. Needs a Tokio runtime.
    pub fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let handles: Vec<_> = (0..self.worker_count)
            .map(|id| tokio::spawn(run_worker(id, Arc::clone(&self.receiver))))
            .collect();
        self.workers
            .lock()
            .expect("pool workers poisoned")
            .extend(handles);

        let mut state = self.state.lock().expect("pool state poisoned");
        if *state == PoolState::Created {
            *state = PoolState::Started;
        }
        info!(workers = self.worker_count, queue = self.queue_capacity, "worker pool started");
    }

    /// Enqueue `task`, waiting for a free slot if the queue is full.
    pub async fn submit<T: Task>(&self, task: T) -> Result<(), PoolError> {
        self.submit_boxed(Box::new(task)).await
    }

    pub async fn submit_boxed(&self, task: BoxedTask) -> Result<(), PoolError> {
        let tx = self
            .sender
            .lock()
            .expect("pool sender poisoned")
            .clone()
            .ok_or(PoolError::Closed)?;
        tx.send(task).await.map_err(|_| PoolError::Closed)
    }

    /// Close the queue and wait for every worker to finish. Starts the workers first if
    /// nobody did, so already-queued tasks still run. Later calls return immediately.
    pub async fn stop(&self) {
        let sender = self.sender.lock().expect("pool sender poisoned").take();
        if sender.is_none() {
            return;
        }
        self.start();
        drop(sender);
        *self.state.lock().expect("pool state poisoned") = PoolState::Stopping;

        let handles: Vec<_> = self
            .workers
            .lock()
            .expect("pool workers poisoned")
            .drain(..)
            .collect();
        for h in handles {
            if let Err(e) = h.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
        *self.state.lock().expect("pool state poisoned") = PoolState::Stopped;
        info!("worker pool stopped");
    }
}

async fn run_worker(id: usize, rx: SharedReceiver) {
    loop {
        let next = { rx.lock().await.recv().await };
        let Some(task) = next else { break };

        let label = task.label();
        // Own task so a panic stays contained to this unit of work.
        match tokio::spawn(async move { task.execute().await }).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                counter!("worker_task_failures_total").increment(1);
                warn!(worker = id, task = %label, error = %e, "task failed");
            }
            Err(e) => {
                counter!("worker_task_failures_total").increment(1);
                warn!(worker = id, task = %label, error = %e, "task panicked");
            }
        }
    }
    debug!(worker = id, "worker exiting");
}
