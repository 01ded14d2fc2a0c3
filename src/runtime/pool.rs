//! Fixed-size worker pool for the `ThreadPool` mode.
//!
//! Accepted connections are queued on a bounded channel; each worker pulls
//! one connection at a time and runs the dialogue to completion. When the
//! queue is full the connection is handed back to the caller.

use super::{serve, Connection, Dialogue};
use crate::error::ServerError;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Default number of queued connections waiting for a free worker.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Worker threads (at least 1).
    pub workers: usize,
    /// Connections allowed to wait for a worker before new ones are rejected.
    pub queue_depth: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

pub(crate) struct WorkerPool {
    sender: Option<Sender<Connection>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `config.workers` threads sharing `dialogue`.
    pub fn start<D: Dialogue>(config: PoolConfig, dialogue: Arc<D>) -> Result<Self, ServerError> {
        let size = config.workers.max(1);
        let (sender, receiver) = bounded::<Connection>(config.queue_depth);
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let receiver = receiver.clone();
            let dialogue = Arc::clone(&dialogue);

            let handle = thread::Builder::new()
                .name(format!("worker-{worker_id}"))
                .spawn(move || {
                    debug!(worker = worker_id, "Worker started");
                    while let Ok(conn) = receiver.recv() {
                        serve(&*dialogue, conn);
                    }
                    debug!(worker = worker_id, "Worker exited");
                })
                .map_err(ServerError::Spawn)?;

            workers.push(handle);
        }

        info!(workers = size, queue_depth = config.queue_depth, "Worker pool started");

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queue `conn` for a worker. Gives it back if the queue is full.
    pub fn submit(&self, conn: Connection) -> Result<(), Connection> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(conn);
        };
        match sender.try_send(conn) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(conn)) | Err(TrySendError::Disconnected(conn)) => Err(conn),
        }
    }

    /// Close the queue and wait for workers to drain it.
    pub fn join(mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
