//! A single worker: one OS thread, one backend socket, one message at a time.
//!
//! Workers share the server process. Unwinding panics are contained by the
//! dispatcher; an abort in any callable ends every worker and the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use sealrpc_common::transport::BackendEndpoint;
use sealrpc_common::{Result, SealRpcError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use crate::dispatch::{Dispatcher, StateCell};

/// How long a receive waits before the stop flag is checked again.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct Worker {
    pub(crate) state: Arc<StateCell>,
    thread: JoinHandle<()>,
}

impl Worker {
    /// Starts worker `index`. `ready` resolves once its socket is connected.
    pub(crate) fn spawn(
        index: usize,
        endpoint: BackendEndpoint,
        dispatcher: Arc<Dispatcher>,
        stop: Arc<AtomicBool>,
        ready: oneshot::Sender<Result<()>>,
    ) -> Result<Self> {
        let state = Arc::new(StateCell::new());
        let worker_state = state.clone();
        let thread = std::thread::Builder::new()
            .name(format!("sealrpc-worker-{}", index))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(run(index, endpoint, dispatcher, worker_state, stop, ready));
            })?;
        Ok(Self { state, thread })
    }

    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            error!("Worker thread panicked");
        }
    }
}

async fn run(
    index: usize,
    endpoint: BackendEndpoint,
    dispatcher: Arc<Dispatcher>,
    state: Arc<StateCell>,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<()>>,
) {
    let mut socket = DealerSocket::new();
    if let Err(e) = socket.connect(&endpoint.address()).await {
        let _ = ready.send(Err(SealRpcError::Transport(format!(
            "worker {} failed to connect to {}: {}",
            index, endpoint, e
        ))));
        return;
    }
    let _ = ready.send(Ok(()));
    debug!("Worker {} connected to {}", index, endpoint);

    // The stop flag is only honoured once the socket has gone quiet, so a
    // request forwarded just before shutdown is still answered.
    loop {
        let message = match tokio::time::timeout(POLL_INTERVAL, socket.recv()).await {
            Err(_) if stop.load(Ordering::Acquire) => break,
            Err(_) => continue,
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                error!("Worker {} receive failed: {}", index, e);
                break;
            }
        };

        let mut frames = message.into_vecdeque();
        if frames.len() != 3 {
            warn!("Worker {} dropping message with {} frames", index, frames.len());
            continue;
        }
        let payload = frames.pop_back().unwrap_or_default();
        let reply = dispatcher.process(&payload, &state);
        frames.push_back(Bytes::from(reply));

        match ZmqMessage::try_from(frames) {
            Ok(reply) => {
                if let Err(e) = socket.send(reply).await {
                    warn!("Worker {} failed to send reply: {}", index, e);
                }
            }
            Err(e) => warn!("Worker {} failed to build reply: {:?}", index, e),
        }
    }

    let errors = socket.close().await;
    if !errors.is_empty() {
        debug!("Worker {} socket close reported {} errors", index, errors.len());
    }
    info!("Worker {} stopped", index);
}
