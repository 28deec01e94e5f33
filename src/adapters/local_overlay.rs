//! In-process overlay transport.
//!
//! Names live in a shared registry; dialing a bound name hands the listener one end of an
//! in-memory pipe. A TCP bridge makes bound names reachable from outside the process: a peer
//! connects, sends the target name on the first line, and the connection is spliced to that
//! name.
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use scc::HashMap;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::ports::overlay::{
    NETWORK_REGISTRY, NETWORK_TCP, OverlayListener, OverlayStream, OverlayTransport,
};

const PIPE_CAPACITY: usize = 64 * 1024;
const ACCEPT_BACKLOG: usize = 128;
const MAX_TARGET_LINE: u64 = 512;

type Incoming = (OverlayStream, String);

struct Registry {
    listeners: HashMap<String, mpsc::Sender<Incoming>>,
    bridges: HashMap<String, String>,
    next_peer: AtomicU64,
    shutdown: CancellationToken,
}

/// Overlay transport that keeps every peer inside the current process.
#[derive(Clone)]
pub struct LocalOverlay {
    registry: Arc<Registry>,
}

impl Default for LocalOverlay {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalOverlay {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: HashMap::new(),
                bridges: HashMap::new(),
                next_peer: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Bind the TCP bridge on `address` and return the bound socket address.
    pub async fn listen(&self, network: &str, address: &str) -> io::Result<SocketAddr> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        if self
            .registry
            .bridges
            .insert_async(local_addr.to_string(), network.to_string())
            .await
            .is_err()
        {
            tracing::debug!("Overlay bridge {local_addr} was already registered");
        }

        tracing::info!("Overlay bridge listening on {local_addr} ({network})");

        let overlay = self.clone();
        let shutdown = self.registry.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let overlay = overlay.clone();
                            tokio::spawn(async move {
                                if let Err(e) = overlay.bridge(stream).await {
                                    tracing::debug!("Overlay bridge for {peer} closed: {e}");
                                }
                            });
                        }
                        Err(e) => tracing::debug!("Accept error: {}", e),
                    },
                }
            }
            tracing::debug!("Overlay bridge on {local_addr} stopped");
        });

        Ok(local_addr)
    }

    /// Stop every bridge started by [`LocalOverlay::listen`].
    pub fn shutdown(&self) {
        self.registry.shutdown.cancel();
    }

    async fn bridge(&self, stream: TcpStream) -> io::Result<()> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        (&mut reader)
            .take(MAX_TARGET_LINE)
            .read_line(&mut line)
            .await?;
        let target = line.trim();
        if target.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing target line",
            ));
        }

        let mut upstream = match self.dial(NETWORK_TCP, target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                reader
                    .get_mut()
                    .write_all(format!("ERR {e}\n").as_bytes())
                    .await?;
                return Err(e);
            }
        };
        tokio::io::copy_bidirectional(&mut reader, &mut upstream).await?;
        Ok(())
    }

    fn next_peer(&self) -> String {
        format!(
            "local#{}",
            self.registry.next_peer.fetch_add(1, Ordering::Relaxed)
        )
    }
}

fn check_network(network: &str) -> io::Result<()> {
    match network {
        NETWORK_TCP | NETWORK_REGISTRY => Ok(()),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unknown overlay network '{other}'"),
        )),
    }
}

#[async_trait]
impl OverlayTransport for LocalOverlay {
    async fn dial(&self, network: &str, target: &str) -> io::Result<OverlayStream> {
        check_network(network)?;

        let sender = self
            .registry
            .listeners
            .get_async(&target.to_string())
            .await
            .map(|entry| entry.get().clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no listener bound to '{target}'"),
                )
            })?;

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        sender
            .send((Box::new(server), self.next_peer()))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("listener for '{target}' is closed"),
                )
            })?;
        Ok(Box::new(client))
    }

    async fn bind(&self, network: &str, name: &str) -> io::Result<Box<dyn OverlayListener>> {
        check_network(network)?;

        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        self.registry
            .listeners
            .insert_async(name.to_string(), tx)
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("overlay name '{name}' is already bound"),
                )
            })?;

        tracing::debug!("Bound overlay name {name}");
        Ok(Box::new(LocalListener {
            name: name.to_string(),
            incoming: rx,
        }))
    }

    async fn listen_and_serve(&self, network: &str, address: &str) -> io::Result<()> {
        self.listen(network, address).await.map(|_| ())
    }

    async fn services(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.registry
            .listeners
            .retain_async(|name, sender| {
                if !sender.is_closed() {
                    names.push(name.clone());
                }
                true
            })
            .await;
        names.sort();
        names
    }

    async fn routes(&self) -> Vec<String> {
        let mut routes = Vec::new();
        self.registry
            .bridges
            .retain_async(|address, network| {
                routes.push(format!("{network}://{address}"));
                true
            })
            .await;
        routes.sort();
        routes
    }
}

struct LocalListener {
    name: String,
    incoming: mpsc::Receiver<Incoming>,
}

#[async_trait]
impl OverlayListener for LocalListener {
    async fn accept(&mut self) -> io::Result<(OverlayStream, String)> {
        self.incoming.recv().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::ConnectionAborted,
                format!("overlay listener '{}' closed", self.name),
            )
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
