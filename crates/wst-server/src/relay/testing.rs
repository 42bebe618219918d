//! In-memory frame channels and connectors for relay tests.

use super::connector::{Connector, OutboundConnection};
use super::resolver::Destination;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use wst_core::header::{self, ParsedHeader};
use wst_core::identity::USER_ID_LEN;
use wst_core::{
    Address, BoxFuture, Command, FrameSink, FrameSource, RelayError, RelayResult, UserId,
    DEFAULT_VERSION,
};

pub const USER: UserId = UserId::from_bytes([0x11; USER_ID_LEN]);

const WAIT: Duration = Duration::from_secs(5);

pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FrameSource for MemorySource {
    fn recv(&mut self) -> BoxFuture<'_, RelayResult<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.rx.recv().await) })
    }
}

pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl FrameSink for MemorySink {
    fn send(&mut self, frame: Vec<u8>) -> BoxFuture<'_, RelayResult<()>> {
        Box::pin(async move {
            match &self.tx {
                Some(tx) => tx
                    .send(frame)
                    .map_err(|_| RelayError::Transport("client went away".into())),
                None => Err(RelayError::Transport("channel closed".into())),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, RelayResult<()>> {
        Box::pin(async move {
            self.tx = None;
            Ok(())
        })
    }
}

/// The client's end of an in-memory channel.
pub struct Client {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Client {
    pub fn send(&self, frame: &[u8]) {
        self.tx
            .as_ref()
            .expect("client already closed")
            .send(frame.to_vec())
            .expect("session dropped its source");
    }

    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Next frame from the session, `None` once the session closed.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for the session")
    }
}

pub fn channel() -> (Client, Box<dyn FrameSink>, Box<dyn FrameSource>) {
    let (to_session, from_client) = mpsc::unbounded_channel();
    let (to_client, from_session) = mpsc::unbounded_channel();
    let client = Client {
        tx: Some(to_session),
        rx: from_session,
    };
    (
        client,
        Box::new(MemorySink { tx: Some(to_client) }),
        Box::new(MemorySource { rx: from_client }),
    )
}

/// Connector handing out in-memory pipes; the far end of each pipe is
/// delivered to the test through the receiver returned by [`PipeConnector::new`].
pub struct PipeConnector {
    opened: AtomicUsize,
    remotes: mpsc::UnboundedSender<(Destination, DuplexStream)>,
}

impl PipeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(Destination, DuplexStream)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                remotes: tx,
            }),
            rx,
        )
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Connector for PipeConnector {
    fn open<'a>(&'a self, dest: &'a Destination) -> BoxFuture<'a, RelayResult<OutboundConnection>> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (local, remote) = tokio::io::duplex(64 * 1024);
            let _ = self.remotes.send((dest.clone(), remote));
            let (reader, writer) = tokio::io::split(local);
            Ok(OutboundConnection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                peer: dest.to_string(),
            })
        })
    }
}

pub async fn next_remote(
    rx: &mut mpsc::UnboundedReceiver<(Destination, DuplexStream)>,
) -> (Destination, DuplexStream) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an outbound connection")
        .expect("connector dropped")
}

/// First frame for a TCP tunnel to `address:port` carrying `payload`.
pub fn first_frame(user: UserId, address: Address, port: u16, payload: &[u8]) -> Vec<u8> {
    frame_with_command(user, Command::Tcp, address, port, payload)
}

pub fn frame_with_command(
    user: UserId,
    command: Command,
    address: Address,
    port: u16,
    payload: &[u8],
) -> Vec<u8> {
    header::encode(&ParsedHeader {
        version: DEFAULT_VERSION,
        user_id: user,
        options: Vec::new(),
        command,
        port,
        address,
        inline_payload: payload.to_vec(),
    })
    .expect("valid test header")
}
