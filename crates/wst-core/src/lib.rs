//! wst-core: Shared protocol library for the WebSocket tunnel.
//!
//! Provides the binary connection header codec, user identifiers and the
//! authorized set, the session error taxonomy, and the abstract frame
//! channel traits implemented by gateways.

pub mod error;
pub mod header;
pub mod identity;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{RelayError, RelayResult};
pub use header::{Address, AddressType, Command, ParsedHeader, DEFAULT_VERSION};
pub use identity::{AuthorizedIds, UserId};
pub use transport::{BoxFuture, FrameSink, FrameSource};
