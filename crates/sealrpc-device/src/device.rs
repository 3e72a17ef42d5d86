use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sealrpc_common::auth::{AllowList, KeyPair};
use sealrpc_common::transport::{BackendEndpoint, MsgPackCodec};
use sealrpc_common::{FaultKind, Response, Result, SealRpcError};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv};

use crate::backend::{bind_backend, envelope, open_envelope, send_with_retry, Identity, RetryConfig};
use crate::frontend::{FrontDoor, Routes};

/// Default time a client gets to complete the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// After a stop, replies still arriving within this window are delivered.
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Authenticated queue device: a blind relay between client connections and
/// the worker pool.
///
/// # Design Philosophy
///
/// The device is intentionally "stupid". It never decodes a request; its
/// only responsibilities are:
///
/// 1. **Authentication**: refuse clients whose key is not on the allow-list
/// 2. **Relay**: hand each request to the backend socket, which picks the
///    next worker round-robin
/// 3. **Routing**: return each reply to the connection it came from
/// 4. **Refusal**: once shutdown starts, answer new requests with a fault
///    instead of forwarding them
///
/// # Example
///
/// ```no_run
/// # use sealrpc_device::QueueDevice;
/// # use sealrpc_common::auth::{AllowList, load_key_pair};
/// # use std::path::Path;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let keys = load_key_pair(Path::new("certificates/server.key_secret"))?;
/// let allow_list = AllowList::from_dir(Path::new("certificates/authorized"))?;
///
/// let device = QueueDevice::new(keys, allow_list).start("127.0.0.1:5555").await?;
/// println!("workers connect to {}", device.endpoint());
/// device.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct QueueDevice {
    keys: KeyPair,
    allow_list: AllowList,
    retry_config: RetryConfig,
    handshake_timeout: Duration,
}

impl QueueDevice {
    pub fn new(keys: KeyPair, allow_list: AllowList) -> Self {
        Self {
            keys,
            allow_list,
            retry_config: RetryConfig::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Binds the backend and the front door and starts relaying.
    ///
    /// # Errors
    ///
    /// Fails if either socket cannot be bound. A bound IPC file is removed
    /// again when the front door fails.
    pub async fn start(self, bind_addr: &str) -> Result<DeviceHandle> {
        let (backend, endpoint) = bind_backend().await?;

        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                endpoint.cleanup();
                return Err(SealRpcError::Transport(format!("Failed to bind {}: {}", bind_addr, e)));
            }
        };
        let local_addr = listener.local_addr()?;

        let routes: Routes = Arc::new(DashMap::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (stop_accepting, accept_rx) = watch::channel(false);
        let (stop_relay, relay_rx) = watch::channel(false);

        let front_door = Arc::new(FrontDoor::new(
            self.keys,
            self.allow_list,
            self.handshake_timeout,
            inbound_tx,
            routes.clone(),
        ));
        let accept_task = tokio::spawn(front_door.accept_loop(listener, accept_rx));
        let relay_task = tokio::spawn(relay(
            backend,
            inbound_rx,
            routes.clone(),
            self.retry_config,
            stop_accepting.subscribe(),
            relay_rx,
        ));

        info!("Queue device listening on {} (backend {})", local_addr, endpoint);

        Ok(DeviceHandle {
            local_addr,
            endpoint,
            routes,
            stop_accepting,
            stop_relay,
            accept_task: Some(accept_task),
            relay_task: Some(relay_task),
        })
    }
}

/// Relays requests to the backend and replies to their connections.
///
/// Once `refuse` is set, requests are no longer forwarded; each one is
/// answered with an `Unavailable` fault while replies keep flowing back.
async fn relay(
    mut backend: DealerSocket,
    mut inbound: mpsc::UnboundedReceiver<(Identity, Vec<u8>)>,
    routes: Routes,
    retry_config: RetryConfig,
    refuse: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) -> DealerSocket {
    let unavailable = shutting_down_fault();
    let mut inbound_open = true;
    loop {
        tokio::select! {
            _ = stop.changed() => {
                drain_replies(&mut backend, &routes).await;
                break;
            }

            request = inbound.recv(), if inbound_open => {
                let Some((identity, payload)) = request else {
                    // Front door and all connections are gone; keep draining replies.
                    inbound_open = false;
                    continue;
                };
                if *refuse.borrow() {
                    debug!("Refusing request from {} during shutdown", identity);
                    reply_to(&routes, identity, unavailable.clone());
                    continue;
                }
                let message = match envelope(identity, payload) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("Dropping request from {}: {}", identity, e);
                        continue;
                    }
                };
                if let Err(e) = send_with_retry(&mut backend, message, &retry_config).await {
                    warn!("Dropping request from {}: {}", identity, e);
                }
            }

            reply = backend.recv() => match reply {
                Ok(message) => route_reply(&routes, message),
                Err(e) => {
                    error!("Backend receive error: {}. Stopping relay.", e);
                    break;
                }
            }
        }
    }
    backend
}

async fn drain_replies(backend: &mut DealerSocket, routes: &Routes) {
    while let Ok(Ok(message)) = tokio::time::timeout(DRAIN_GRACE, backend.recv()).await {
        route_reply(routes, message);
    }
}

fn shutting_down_fault() -> Vec<u8> {
    let fault = Response::fault(FaultKind::Unavailable, "server is shutting down");
    MsgPackCodec::encode_response(&fault).unwrap_or_default()
}

fn route_reply(routes: &Routes, message: zeromq::ZmqMessage) {
    match open_envelope(message) {
        Ok((identity, payload)) => reply_to(routes, identity, payload),
        Err(e) => warn!("Dropping malformed reply: {}", e),
    }
}

fn reply_to(routes: &Routes, identity: Identity, payload: Vec<u8>) {
    match routes.get(&identity) {
        Some(sender) => {
            if sender.send(payload).is_err() {
                debug!("Connection {} closed before its reply was sent", identity);
            }
        }
        None => debug!("Dropping reply for unknown connection {}", identity),
    }
}

/// Handle to a running queue device.
pub struct DeviceHandle {
    local_addr: SocketAddr,
    endpoint: BackendEndpoint,
    routes: Routes,
    stop_accepting: watch::Sender<bool>,
    stop_relay: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
    relay_task: Option<JoinHandle<DealerSocket>>,
}

impl DeviceHandle {
    /// Front-door address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Backend endpoint workers connect to.
    pub fn endpoint(&self) -> &BackendEndpoint {
        &self.endpoint
    }

    /// Number of authenticated client connections.
    pub fn connection_count(&self) -> usize {
        self.routes.len()
    }

    /// Stops accepting new connections and new requests.
    ///
    /// Requests on established connections are answered with an
    /// `Unavailable` fault from now on. Replies to requests already handed
    /// to a worker are still delivered.
    pub async fn stop_accepting(&mut self) {
        let _ = self.stop_accepting.send(true);
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
    }

    /// Stops the relay, closes all connections and the backend socket, and
    /// removes the IPC file.
    ///
    /// Workers should be stopped first. Replies that reach the backend
    /// shortly after the stop are still delivered; later ones are lost.
    pub async fn shutdown(mut self) {
        self.stop_accepting().await;
        let _ = self.stop_relay.send(true);
        if let Some(task) = self.relay_task.take() {
            match task.await {
                Ok(backend) => {
                    let errors = backend.close().await;
                    if !errors.is_empty() {
                        debug!("Backend close reported {} errors", errors.len());
                    }
                }
                Err(e) => warn!("Relay task failed: {}", e),
            }
        }
        self.routes.clear();
        self.endpoint.cleanup();
        info!("Queue device stopped");
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if self.relay_task.is_some() {
            let _ = self.stop_accepting.send(true);
            let _ = self.stop_relay.send(true);
            self.routes.clear();
            self.endpoint.cleanup();
        }
    }
}
