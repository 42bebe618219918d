//! Core server: binds the WebSocket gateway and hands every accepted
//! connection to the session supervisor.

use crate::config::ServerConfig;
use crate::relay::{SessionSupervisor, TcpConnector};
use crate::transport::websocket;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use wst_core::RelayResult;

/// The wst server instance.
pub struct WstServer {
    supervisor: SessionSupervisor,
    bind_addr: SocketAddr,
}

impl WstServer {
    pub fn new(config: ServerConfig) -> Self {
        let connector = Arc::new(TcpConnector::new(config.connect_timeout));
        let supervisor = SessionSupervisor::new(config.relay, config.policy, connector);
        Self {
            supervisor,
            bind_addr: config.bind_addr,
        }
    }

    /// Bind the listener. Returns the bound address and the stream of
    /// accepted connections to pass to [`WstServer::serve`].
    pub async fn bind(
        &self,
    ) -> RelayResult<(SocketAddr, mpsc::Receiver<websocket::WebSocketConnection>)> {
        websocket::start_listener(self.bind_addr).await
    }

    /// Accept connections until the listener stops.
    pub async fn serve(&self, mut ws_rx: mpsc::Receiver<websocket::WebSocketConnection>) {
        while let Some(conn) = ws_rx.recv().await {
            let peer = conn.remote_addr;
            let (sink, source) = conn.into_channel();
            let handle = self.supervisor.accept(sink, source, Some(peer));
            debug!(
                session = handle.id,
                peer = %peer,
                phase = ?*handle.phase.borrow(),
                active = self.supervisor.active_sessions(),
                "connection handed to supervisor"
            );
        }
        info!("listener closed, shutting down");
    }

    /// Bind and serve.
    pub async fn run(self) -> RelayResult<()> {
        let (addr, ws_rx) = self.bind().await?;
        info!(addr = %addr, "wst-server ready");
        self.serve(ws_rx).await;
        Ok(())
    }
}
