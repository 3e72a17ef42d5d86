use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sealrpc_common::transport::BackendEndpoint;
use sealrpc_common::{Result, SealRpcError};
use tokio::sync::oneshot;
use tracing::info;

use crate::dispatch::{Dispatcher, WorkerState};
use crate::worker::Worker;

/// Fixed-size pool of worker threads attached to the backend.
///
/// Every worker owns its own socket and shares the dispatcher, so the
/// route table and object cache are common to all of them. Requests are
/// spread over the workers by the backend socket.
pub struct WorkerPool {
    workers: Vec<Worker>,
    stop: Arc<AtomicBool>,
}

impl WorkerPool {
    /// One worker per available CPU.
    pub fn default_size() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Starts `size` workers and waits until each is connected.
    ///
    /// # Errors
    ///
    /// Fails for a size of zero, or if any worker cannot start; workers
    /// already running are stopped again.
    pub async fn spawn(size: usize, endpoint: &BackendEndpoint, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        if size == 0 {
            return Err(SealRpcError::Config("worker pool size must be at least 1".to_string()));
        }

        let mut pool = Self {
            workers: Vec::with_capacity(size),
            stop: Arc::new(AtomicBool::new(false)),
        };

        for index in 0..size {
            let (ready_tx, ready_rx) = oneshot::channel();
            let worker = match Worker::spawn(index, endpoint.clone(), dispatcher.clone(), pool.stop.clone(), ready_tx) {
                Ok(worker) => worker,
                Err(e) => {
                    pool.stop_and_join();
                    return Err(e);
                }
            };
            pool.workers.push(worker);

            let ready = ready_rx
                .await
                .unwrap_or_else(|_| Err(SealRpcError::Transport(format!("worker {} exited during startup", index))));
            if let Err(e) = ready {
                pool.stop_and_join();
                return Err(e);
            }
        }

        info!("Started {} workers on {}", size, endpoint);
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Current state of each worker, by index.
    pub fn states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(|worker| worker.state.get()).collect()
    }

    /// Stops all workers and waits for them.
    ///
    /// A call in progress is never interrupted; each worker finishes its
    /// current message first. Blocks the calling thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
        info!("Worker pool stopped");
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Threads notice the flag within one poll interval.
        self.stop.store(true, Ordering::Release);
    }
}
