//! WebSocket listener using tokio-tungstenite.
//!
//! Each accepted WebSocket becomes one frame channel: binary messages are
//! frames, a Close message (or the stream ending) closes the channel, text
//! messages are ignored.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use wst_core::{BoxFuture, FrameSink, FrameSource, RelayError, RelayResult};

/// Maximum frame size for WebSocket messages (1 MiB).
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// A handle to an accepted WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
}

impl WebSocketConnection {
    /// Split into the sink and source halves handed to a relay session.
    pub fn into_channel(self) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
        let (sink, stream) = self.ws_stream.split();
        (
            Box::new(WsFrameSink {
                sink,
                closed: false,
            }),
            Box::new(WsFrameSource { stream }),
        )
    }
}

/// Bind the WebSocket listener.
///
/// Returns the bound address (useful with port `0`) and a receiver that
/// yields accepted connections. Handshakes run in their own tasks so a slow
/// client cannot stall the accept loop.
pub async fn start_listener(
    bind_addr: SocketAddr,
) -> RelayResult<(SocketAddr, mpsc::Receiver<WebSocketConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| RelayError::Transport(format!("WS bind failed: {e}")))?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = stream.set_nodelay(true);
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
            if tx.is_closed() {
                debug!("WebSocket consumer gone, stopping listener");
                break;
            }
        }
    });

    Ok((local_addr, rx))
}

struct WsFrameSink {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    closed: bool,
}

impl FrameSink for WsFrameSink {
    fn send(&mut self, frame: Vec<u8>) -> BoxFuture<'_, RelayResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(RelayError::Transport("WS already closed".into()));
            }
            self.sink
                .send(Message::Binary(frame.into()))
                .await
                .map_err(|e| RelayError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, RelayResult<()>> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.sink
                .close()
                .await
                .map_err(|e| RelayError::Transport(format!("WS close failed: {e}")))
        })
    }
}

struct WsFrameSource {
    stream: SplitStream<WebSocketStream<TcpStream>>,
}

impl FrameSource for WsFrameSource {
    /// Returns `None` if the connection is closed. Text messages are ignored.
    /// Rejects frames larger than 1 MiB.
    fn recv(&mut self) -> BoxFuture<'_, RelayResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        if data.len() > MAX_WS_FRAME_SIZE {
                            return Err(RelayError::Transport(format!(
                                "WS frame too large: {} bytes (max {})",
                                data.len(),
                                MAX_WS_FRAME_SIZE
                            )));
                        }
                        return Ok(Some(data.to_vec()));
                    }
                    Some(Ok(Message::Close(_))) => return Ok(None),
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        return Err(RelayError::Transport(format!("WS recv failed: {e}")));
                    }
                    None => return Ok(None),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(
        addr: SocketAddr,
    ) -> WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>> {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
            .await
            .unwrap();
        ws
    }

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (addr, mut rx) = start_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut client = connect(addr).await;

        let conn = rx.recv().await.unwrap();
        let (mut sink, mut source) = conn.into_channel();

        client.send(Message::Text("ignored".into())).await.unwrap();
        client
            .send(Message::Binary(vec![1u8, 2, 3].into()))
            .await
            .unwrap();
        assert_eq!(source.recv().await.unwrap(), Some(vec![1, 2, 3]));

        sink.send(b"pong".to_vec()).await.unwrap();
        match client.next().await.unwrap().unwrap() {
            Message::Binary(data) => assert_eq!(data.to_vec(), b"pong".to_vec()),
            other => panic!("unexpected message: {other:?}"),
        }

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(sink.send(b"late".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_a_transport_error() {
        let (addr, mut rx) = start_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut client = connect(addr).await;
        let (_sink, mut source) = rx.recv().await.unwrap().into_channel();

        client
            .send(Message::Binary(vec![0u8; MAX_WS_FRAME_SIZE + 1].into()))
            .await
            .unwrap();
        assert!(matches!(source.recv().await, Err(RelayError::Transport(_))));
    }

    #[tokio::test]
    async fn client_close_ends_source() {
        let (addr, mut rx) = start_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut client = connect(addr).await;
        let (_sink, mut source) = rx.recv().await.unwrap().into_channel();

        client.close(None).await.unwrap();
        assert_eq!(source.recv().await.unwrap(), None);
    }
}
