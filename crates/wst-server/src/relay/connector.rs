//! Outbound connections to tunnel destinations.
//!
//! [`Connector`] is the seam between the relay session and the network.
//! [`TcpConnector`] is the production implementation; tests substitute
//! in-memory pipes.

use super::resolver::Destination;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;
use wst_core::{BoxFuture, RelayError, RelayResult};

/// An open outbound connection, split into its byte source and byte sink.
pub struct OutboundConnection {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    /// Resolved peer address, for logging.
    pub peer: String,
}

/// Opens outbound connections.
pub trait Connector: Send + Sync {
    /// Connect to `dest`. Failures of any kind map to
    /// [`RelayError::ConnectFailed`]; the caller does not retry.
    fn open<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RelayResult<OutboundConnection>>;
}

/// Plain TCP connector with a connect timeout. DNS resolution for domain
/// destinations happens inside the connect call.
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn open<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RelayResult<OutboundConnection>> {
        Box::pin(async move {
            let connect = TcpStream::connect((dest.host.as_str(), dest.port));
            let stream = match tokio::time::timeout(self.connect_timeout, connect).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(connect_failed(dest, e.to_string())),
                Err(_) => {
                    return Err(connect_failed(
                        dest,
                        format!("timed out after {:?}", self.connect_timeout),
                    ))
                }
            };
            let _ = stream.set_nodelay(true);

            let peer = stream
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_default();
            debug!(dest = %dest, peer = %peer, "outbound TCP connected");

            let (reader, writer) = stream.into_split();
            Ok(OutboundConnection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                peer,
            })
        })
    }
}

fn connect_failed(dest: &Destination, reason: String) -> RelayError {
    RelayError::ConnectFailed {
        target: dest.to_string(),
        reason,
    }
}
