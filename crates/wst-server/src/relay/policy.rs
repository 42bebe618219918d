//! Relay policy: which destinations sessions may reach and how many
//! sessions may run at once.
//!
//! The policy layer is split into two types:
//!
//! - [`RelayPolicy`]: a plain configuration struct holding the rules.
//! - [`PolicyEnforcer`]: the runtime counterpart that owns the policy plus
//!   an atomic session counter, performing all access-control checks.

use super::resolver::Destination;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wst_core::{RelayError, RelayResult};

/// Static relay access-control configuration.
///
/// # Destination Matching
///
/// | Pattern             | Matches                                |
/// |---------------------|----------------------------------------|
/// | `"*"`               | Any host and port (wildcard).          |
/// | `"example.com"`     | The exact host on **any** port.        |
/// | `"example.com:443"` | The exact host **and** port pair.      |
///
/// An empty list means **no** destinations are allowed.
#[derive(Debug, Clone)]
pub struct RelayPolicy {
    pub allowed_destinations: Vec<String>,
    /// Maximum number of concurrently running sessions.
    pub max_sessions: usize,
}

/// Default policy: allow all destinations, 1024 concurrent sessions.
impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            allowed_destinations: vec!["*".to_string()],
            max_sessions: 1024,
        }
    }
}

/// Runtime policy enforcer with atomic session tracking.
pub struct PolicyEnforcer {
    policy: RelayPolicy,
    active_sessions: Arc<AtomicUsize>,
    allowed_set: HashSet<String>,
    /// `true` when the wildcard `"*"` is present.
    allow_all: bool,
}

impl PolicyEnforcer {
    pub fn new(policy: RelayPolicy) -> Self {
        let allow_all = policy.allowed_destinations.iter().any(|d| d == "*");
        let allowed_set: HashSet<String> = policy
            .allowed_destinations
            .iter()
            .map(|d| d.to_ascii_lowercase())
            .collect();
        Self {
            policy,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            allowed_set,
            allow_all,
        }
    }

    /// Check whether a session may connect to `dest`.
    ///
    /// # Errors
    ///
    /// [`RelayError::PolicyDenied`] if the destination matches no allowlist
    /// entry.
    pub fn check_destination(&self, dest: &Destination) -> RelayResult<()> {
        if self.allow_all {
            return Ok(());
        }

        let host = dest.host.to_ascii_lowercase();
        let pair = format!("{}:{}", host, dest.port);
        if self.allowed_set.contains(&pair) || self.allowed_set.contains(&host) {
            return Ok(());
        }

        Err(RelayError::PolicyDenied(format!(
            "destination not allowed: {dest}"
        )))
    }

    /// Reserve a session slot. Returns a guard that releases the slot on
    /// drop, or [`RelayError::PolicyDenied`] when the limit is reached.
    pub fn try_acquire(&self) -> RelayResult<SessionGuard> {
        let max = self.policy.max_sessions;
        self.active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map_err(|current| {
                RelayError::PolicyDenied(format!("session limit reached ({current}/{max})"))
            })?;
        Ok(SessionGuard {
            counter: self.active_sessions.clone(),
        })
    }

    /// Current number of running sessions.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }
}

/// RAII guard that decrements the session count on drop.
/// Owns an `Arc<AtomicUsize>` so it can be moved into spawned tasks.
pub struct SessionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
