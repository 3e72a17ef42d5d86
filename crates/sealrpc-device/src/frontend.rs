//! Client-facing side of the queue device.
//!
//! Each accepted TCP connection completes the secure handshake before
//! anything else happens. Admitted connections get a process-unique identity
//! and a reply channel registered in the routing table, which gives the
//! front door ROUTER semantics: replies find their way back by identity.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sealrpc_common::auth::{AllowList, KeyPair};
use sealrpc_common::transport::noise::{read_frame_async, server_handshake};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::backend::Identity;

/// Identity → reply sender for every live client connection.
pub type Routes = Arc<DashMap<Identity, mpsc::UnboundedSender<Vec<u8>>>>;

/// Request payloads from clients, tagged with their connection identity.
pub type Inbound = mpsc::UnboundedSender<(Identity, Vec<u8>)>;

pub(crate) struct FrontDoor {
    keys: KeyPair,
    allow_list: AllowList,
    handshake_timeout: Duration,
    inbound: Inbound,
    routes: Routes,
    next_identity: AtomicU64,
}

impl FrontDoor {
    pub(crate) fn new(
        keys: KeyPair,
        allow_list: AllowList,
        handshake_timeout: Duration,
        inbound: Inbound,
        routes: Routes,
    ) -> Self {
        Self {
            keys,
            allow_list,
            handshake_timeout,
            inbound,
            routes,
            next_identity: AtomicU64::new(1),
        }
    }

    /// Accepts connections until told to stop.
    pub(crate) async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = stop.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let identity = self.next_identity.fetch_add(1, Ordering::Relaxed);
                        tokio::spawn(self.clone().serve_connection(stream, peer, identity));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                }
            }
        }
        info!("Front door closed");
    }

    async fn serve_connection(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr, identity: Identity) {
        let _ = stream.set_nodelay(true);

        let handshake = server_handshake(&mut stream, &self.keys, &self.allow_list);
        let mut channel = match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                warn!("Rejected connection from {}: {}", peer, e);
                return;
            }
            Err(_) => {
                warn!("Handshake with {} timed out", peer);
                return;
            }
        };
        debug!("Client {} authenticated as {} (identity {})", peer, channel.remote_key(), identity);

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        self.routes.insert(identity, reply_tx);

        // Frame reads are not cancel-safe, so they run in their own task.
        let (mut reader, mut writer) = stream.into_split();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            while let Ok(frame) = read_frame_async(&mut reader).await {
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("Client {} disconnected", peer);
                        break;
                    };
                    match channel.feed_frame(&frame) {
                        Ok(Some(message)) => {
                            if self.inbound.send((identity, message)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Dropping connection from {}: {}", peer, e);
                            break;
                        }
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else {
                        break;
                    };
                    let written = match channel.encrypt_message(&reply) {
                        Ok(bytes) => writer.write_all(&bytes).await.map_err(|e| e.to_string()),
                        Err(e) => Err(e.to_string()),
                    };
                    if let Err(e) = written {
                        warn!("Failed to reply to {}: {}", peer, e);
                        break;
                    }
                }
            }
        }

        self.routes.remove(&identity);
        reader_task.abort();
        let _ = writer.shutdown().await;
    }
}
