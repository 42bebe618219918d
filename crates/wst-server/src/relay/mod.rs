//! Relay module: turns accepted frame channels into TCP tunnels.
//!
//! # Submodule Architecture
//!
//! - **[`resolver`]**: [`resolver::DestinationResolver`] maps the header address to a
//!   `(host, port)` [`resolver::Destination`], validating shape only.
//! - **[`connector`]**: the [`connector::Connector`] trait and [`TcpConnector`], which
//!   opens the outbound TCP connection (DNS included) with a timeout.
//! - **[`policy`]**: [`RelayPolicy`] and [`policy::PolicyEnforcer`]: destination
//!   allowlist and the concurrent session limit.
//! - **[`session`]**: [`session::RelaySession`], the per-channel state machine
//!   (`AwaitingHeader → Connecting → Streaming → Closed`).
//! - **[`supervisor`]**: [`SessionSupervisor`] spawns one task per session
//!   and contains failures at the session boundary.
//!
//! # Data Flow
//!
//! ```text
//! gateway (WebSocket)
//!   → SessionSupervisor::accept
//!     → spawn RelaySession::run
//!         → header::parse + AuthorizedIds::verify   (first frame)
//!         → DestinationResolver::resolve
//!         → PolicyEnforcer::check_destination
//!         → Connector::open
//!         → client→remote ∥ remote→client until close
//! ```

pub mod connector;
pub mod policy;
pub mod resolver;
pub mod session;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::TcpConnector;
pub use policy::RelayPolicy;
pub use supervisor::SessionSupervisor;

use std::time::Duration;
use wst_core::{AuthorizedIds, DEFAULT_VERSION};

/// Per-session protocol settings shared by all sessions of a server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// The only header version byte accepted.
    pub accepted_version: u8,
    /// Identifiers allowed to open tunnels.
    pub authorized: AuthorizedIds,
    /// How long to wait for the first frame.
    pub handshake_timeout: Duration,
    /// Close a streaming session after this long without traffic.
    pub idle_timeout: Option<Duration>,
    /// Prefix the first frame sent to the client with `[version, 0]`.
    pub send_response_header: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            accepted_version: DEFAULT_VERSION,
            authorized: AuthorizedIds::new(),
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            send_response_header: false,
        }
    }
}
