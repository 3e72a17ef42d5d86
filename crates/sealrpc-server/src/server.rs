use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use sealrpc_common::auth::{load_key_pair, AllowList, KeyPair, PublicKey};
use sealrpc_common::transport::BackendEndpoint;
use sealrpc_common::Result;
use sealrpc_device::{DeviceHandle, QueueDevice};
use tracing::{info, warn};

use crate::cache::ObjectCache;
use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, WorkerState};
use crate::pool::WorkerPool;
use crate::routes::RouteTable;

/// A configured server, ready to start.
///
/// Key material is loaded on construction so a misconfigured deployment
/// fails before anything is bound.
///
/// # Example
///
/// ```no_run
/// use sealrpc_server::{Returned, RouteTable, Server, ServerConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut routes = RouteTable::new();
/// routes.register_function("add", |args| Ok(Returned::value(args.i64(0)? + args.i64(1)?)))?;
///
/// Server::new(ServerConfig::default(), routes)?.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    config: ServerConfig,
    keys: KeyPair,
    allow_list: AllowList,
    routes: Arc<RouteTable>,
}

impl Server {
    /// Loads the server key pair and the authorized client keys.
    ///
    /// # Errors
    ///
    /// `KeyFile` if the key file or the authorized-keys directory is
    /// missing or unreadable.
    pub fn new(config: ServerConfig, routes: RouteTable) -> Result<Self> {
        let keys = load_key_pair(&config.server_key)?;
        let allow_list = AllowList::from_dir(&config.authorized_keys)?;
        info!(
            "Loaded server key {} and {} authorized client keys",
            keys.public,
            allow_list.len()
        );
        Ok(Self::with_keys(config, keys, allow_list, routes))
    }

    /// Builds a server from key material already in memory.
    pub fn with_keys(config: ServerConfig, keys: KeyPair, allow_list: AllowList, routes: RouteTable) -> Self {
        Self {
            config,
            keys,
            allow_list,
            routes: Arc::new(routes),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keys.public
    }

    /// Starts the queue device and the worker pool.
    pub async fn start(self) -> Result<RunningServer> {
        let device = QueueDevice::new(self.keys, self.allow_list)
            .with_handshake_timeout(self.config.handshake_timeout())
            .start(&self.config.bind)
            .await?;

        let cache = Arc::new(ObjectCache::new());
        let dispatcher = Arc::new(Dispatcher::new(self.routes.clone(), cache.clone()));
        let pool = match WorkerPool::spawn(self.config.worker_count(), device.endpoint(), dispatcher).await {
            Ok(pool) => pool,
            Err(e) => {
                device.shutdown().await;
                return Err(e);
            }
        };

        info!(
            "Server listening on {} with {} workers ({} functions, {} classes)",
            device.local_addr(),
            pool.size(),
            self.routes.function_names().len(),
            self.routes.class_names().len()
        );

        Ok(RunningServer { device, pool, cache })
    }

    /// Starts the server and serves until SIGINT or SIGTERM, then shuts
    /// down gracefully.
    ///
    /// A second signal during shutdown exits the process at once with
    /// status 130 instead of waiting for busy workers.
    pub async fn run(self) -> Result<()> {
        let running = self.start().await?;
        let mut signals = ShutdownSignals::new()?;

        let name = signals.recv().await;
        info!("Received {}, initiating graceful shutdown", name);

        if running.shutdown_unless(signals.recv()).await == ShutdownOutcome::Interrupted {
            warn!("Received a second signal, exiting without waiting for workers");
            std::process::exit(130);
        }
        Ok(())
    }
}

/// SIGINT and SIGTERM listeners, kept for the lifetime of `run`.
struct ShutdownSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            Ok(Self {
                sigterm: signal(SignalKind::terminate())?,
                sigint: signal(SignalKind::interrupt())?,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next signal and returns its name.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.sigterm.recv() => "SIGTERM",
                _ = self.sigint.recv() => "SIGINT (Ctrl+C)",
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            "Ctrl+C"
        }
    }
}

/// How a shutdown ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every worker finished and all sockets were closed.
    Graceful,
    /// The interrupt fired first; workers may still be running.
    Interrupted,
}

/// Handle to a started server.
pub struct RunningServer {
    device: DeviceHandle,
    pool: WorkerPool,
    cache: Arc<ObjectCache>,
}

impl RunningServer {
    /// Address clients connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.device.local_addr()
    }

    pub fn endpoint(&self) -> &BackendEndpoint {
        self.device.endpoint()
    }

    pub fn cache(&self) -> &Arc<ObjectCache> {
        &self.cache
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.pool.states()
    }

    /// Stops the front door, lets workers finish their current message,
    /// then closes the backend and removes the IPC file.
    ///
    /// From the first step on, requests arriving on established
    /// connections are answered with an `Unavailable` fault.
    pub async fn shutdown(self) {
        self.shutdown_unless(std::future::pending::<()>()).await;
    }

    /// Like [`shutdown`](Self::shutdown), but gives up as soon as
    /// `interrupt` completes.
    ///
    /// An interrupted shutdown leaves busy worker threads running; the
    /// caller is expected to exit the process.
    pub async fn shutdown_unless<F: Future>(self, interrupt: F) -> ShutdownOutcome {
        tokio::select! {
            _ = self.graceful_shutdown() => ShutdownOutcome::Graceful,
            _ = interrupt => ShutdownOutcome::Interrupted,
        }
    }

    async fn graceful_shutdown(self) {
        info!("Shutting down");
        let RunningServer {
            mut device,
            pool,
            cache,
        } = self;

        device.stop_accepting().await;
        if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
            warn!("Worker pool shutdown failed: {}", e);
        }
        device.shutdown().await;

        if !cache.is_empty() {
            info!("Dropping {} cached objects", cache.len());
        }
        info!("Server stopped");
    }
}
