//! Port for the overlay transport collaborator.
//!
//! The gateway only relies on a dial/bind contract: dial a name, bind a name and accept
//! streams on it, and run the transport's own peer listener. How names are resolved and how
//! bytes travel between peers belongs to the implementation.
use std::{io, time::Duration};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Primary dial network: direct peer lookup.
pub const NETWORK_TCP: &str = "tcp";

/// Secondary dial network: lookup through the intermediary registry.
pub const NETWORK_REGISTRY: &str = "vport2registry";

/// Any duplex byte stream the overlay can hand out.
pub trait OverlayIo: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> OverlayIo for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A connection opened or accepted through the overlay.
pub type OverlayStream = Box<dyn OverlayIo>;

/// A listener bound to an overlay name.
#[async_trait]
pub trait OverlayListener: Send + 'static {
    /// Wait for the next inbound stream; returns it with a printable peer identifier.
    async fn accept(&mut self) -> io::Result<(OverlayStream, String)>;

    /// The name this listener is bound to.
    fn name(&self) -> &str;
}

/// OverlayTransport defines the port (interface) to the service-mesh style transport.
#[async_trait]
pub trait OverlayTransport: Send + Sync + 'static {
    /// Open a stream to `target` (`host` or `host:port`) on `network`.
    async fn dial(&self, network: &str, target: &str) -> io::Result<OverlayStream>;

    /// [`OverlayTransport::dial`] bounded by `timeout`; elapsing yields `ErrorKind::TimedOut`.
    async fn dial_timeout(
        &self,
        network: &str,
        target: &str,
        timeout: Duration,
    ) -> io::Result<OverlayStream> {
        match tokio::time::timeout(timeout, self.dial(network, target)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("dial {target} timed out after {timeout:?}"),
            )),
        }
    }

    /// Bind `name`. Binding a name that is already bound must fail with `AddrInUse`.
    async fn bind(&self, network: &str, name: &str) -> io::Result<Box<dyn OverlayListener>>;

    /// Start the transport's peer listener on `address`; returns once it is bound.
    async fn listen_and_serve(&self, network: &str, address: &str) -> io::Result<()>;

    /// Names currently served through this transport.
    async fn services(&self) -> Vec<String>;

    /// Peer routes known to this transport.
    async fn routes(&self) -> Vec<String>;
}
