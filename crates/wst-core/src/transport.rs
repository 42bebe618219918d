//! Abstract duplex frame channel.
//!
//! The gateway that accepts client connections (a WebSocket listener, or an
//! in-memory pair in tests) hands each session one sink and one source.
//! Both halves are usable concurrently from different futures.

use crate::error::RelayResult;
use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receiving half of a frame channel.
pub trait FrameSource: Send {
    /// Receive the next binary frame. `Ok(None)` once the peer has closed.
    fn recv(&mut self) -> BoxFuture<'_, RelayResult<Option<Vec<u8>>>>;
}

/// Sending half of a frame channel.
pub trait FrameSink: Send {
    /// Send one binary frame.
    fn send(&mut self, frame: Vec<u8>) -> BoxFuture<'_, RelayResult<()>>;

    /// Close the channel. Calling this more than once is harmless.
    fn close(&mut self) -> BoxFuture<'_, RelayResult<()>>;
}
