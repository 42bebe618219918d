//! Destination shape checks.
//!
//! Turns a decoded header address into the `(host, port)` pair handed to the
//! connector. No DNS happens here: domains stay literal and are looked up by
//! the connector when it opens the socket.

use std::fmt;
use wst_core::{Address, RelayError, RelayResult};

/// A connectable destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Stateless destination resolver.
pub struct DestinationResolver;

impl DestinationResolver {
    /// Map an address and port to a [`Destination`].
    ///
    /// # Errors
    ///
    /// [`RelayError::MalformedHeader`] for port `0` or a blank domain.
    pub fn resolve(address: &Address, port: u16) -> RelayResult<Destination> {
        if port == 0 {
            return Err(RelayError::MalformedHeader("destination port 0".into()));
        }
        let host = match address {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => ip.to_string(),
            Address::Domain(name) => {
                if name.trim().is_empty() {
                    return Err(RelayError::MalformedHeader("empty domain".into()));
                }
                name.clone()
            }
        };
        Ok(Destination { host, port })
    }
}
