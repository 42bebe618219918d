//! Session supervisor: one spawned task per accepted channel.
//!
//! `accept` returns as soon as the task is spawned. Errors are reported by
//! the session itself; panics are caught here and turned into a `Closed`
//! phase so they never reach the accept loop or other sessions.

use super::connector::Connector;
use super::policy::{PolicyEnforcer, RelayPolicy};
use super::session::{Phase, RelaySession, SessionReport};
use super::RelayConfig;
use futures_util::FutureExt;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use wst_core::{FrameSink, FrameSource, RelayError};

/// Handle to a spawned session. The phase reaches `Closed` only after the
/// session's slot has been released.
pub struct SessionHandle {
    pub id: u64,
    pub phase: watch::Receiver<Phase>,
}

pub struct SessionSupervisor {
    config: Arc<RelayConfig>,
    connector: Arc<dyn Connector>,
    policy: Arc<PolicyEnforcer>,
    next_id: AtomicU64,
}

impl SessionSupervisor {
    pub fn new(config: RelayConfig, policy: RelayPolicy, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            policy: Arc::new(PolicyEnforcer::new(policy)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.policy.active_sessions()
    }

    /// Start a session for a freshly accepted channel. Must be called from
    /// within a Tokio runtime.
    pub fn accept(
        &self,
        mut sink: Box<dyn FrameSink>,
        source: Box<dyn FrameSource>,
        peer: Option<SocketAddr>,
    ) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let guard = match self.policy.try_acquire() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(session = id, peer = ?peer, error = %e, "refusing session");
                let (phase_tx, phase) = watch::channel(Phase::Closed);
                tokio::spawn(async move {
                    let _ = sink.close().await;
                    drop(source);
                    drop(phase_tx);
                });
                return SessionHandle { id, phase };
            }
        };

        let session = RelaySession::new(
            id,
            self.config.clone(),
            self.connector.clone(),
            self.policy.clone(),
        );
        let phase = session.subscribe();
        let phase_tx = session.phase_sender();
        debug!(session = id, peer = ?peer, "session accepted");

        tokio::spawn(async move {
            let result = AssertUnwindSafe(session.run(sink, source))
                .catch_unwind()
                .await;
            drop(guard);
            phase_tx.send_replace(Phase::Closed);
            match result {
                Ok(report) => log_report(&report, peer),
                Err(_) => error!(session = id, peer = ?peer, "session panicked"),
            }
        });

        SessionHandle { id, phase }
    }
}

fn log_report(report: &SessionReport, peer: Option<SocketAddr>) {
    let dest = report
        .destination
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_default();
    match &report.outcome {
        Ok(reason) => debug!(
            session = report.id,
            peer = ?peer,
            dest = %dest,
            reason = ?reason,
            phases = ?report.phases,
            up = report.bytes_up,
            down = report.bytes_down,
            "session closed"
        ),
        Err(e) if e.is_client_fault() => {
            warn!(session = report.id, peer = ?peer, error = %e, "session rejected")
        }
        Err(e @ RelayError::ConnectFailed { .. }) => {
            info!(session = report.id, peer = ?peer, error = %e, "session ended")
        }
        Err(e) => debug!(
            session = report.id,
            peer = ?peer,
            dest = %dest,
            error = %e,
            up = report.bytes_up,
            down = report.bytes_down,
            "session ended"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::super::connector::OutboundConnection;
    use super::super::resolver::Destination;
    use super::super::testing::*;
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use wst_core::{Address, AuthorizedIds, BoxFuture, RelayResult};

    fn config() -> RelayConfig {
        RelayConfig {
            authorized: [USER].into_iter().collect::<AuthorizedIds>(),
            ..RelayConfig::default()
        }
    }

    struct PanickingConnector;

    impl Connector for PanickingConnector {
        fn open<'a>(
            &'a self,
            _dest: &'a Destination,
        ) -> BoxFuture<'a, RelayResult<OutboundConnection>> {
            Box::pin(async { explode() })
        }
    }

    fn explode() -> RelayResult<OutboundConnection> {
        panic!("connector exploded")
    }

    async fn finish(mut handle: SessionHandle) -> Phase {
        tokio::time::timeout(
            Duration::from_secs(5),
            handle.phase.wait_for(|p| *p == Phase::Closed),
        )
        .await
        .expect("session did not finish")
        .unwrap();
        let phase = *handle.phase.borrow();
        phase
    }

    #[tokio::test]
    async fn accept_returns_before_the_session_runs() {
        let (connector, mut remotes) = PipeConnector::new();
        let supervisor = SessionSupervisor::new(config(), RelayPolicy::default(), connector);

        let (mut client, sink, source) = channel();
        let handle = supervisor.accept(sink, source, None);
        assert_eq!(*handle.phase.borrow(), Phase::AwaitingHeader);

        client.send(&first_frame(USER, Address::Ipv4(Ipv4Addr::LOCALHOST), 80, b"req"));
        let (_, mut remote) = next_remote(&mut remotes).await;
        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"req");

        remote.write_all(b"resp").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"resp");
        assert_eq!(supervisor.active_sessions(), 1);

        drop(remote);
        assert!(client.recv().await.is_none());
        assert_eq!(finish(handle).await, Phase::Closed);
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn session_limit_refuses_extra_channels() {
        let (connector, _remotes) = PipeConnector::new();
        let policy = RelayPolicy {
            allowed_destinations: vec!["*".into()],
            max_sessions: 1,
        };
        let supervisor = SessionSupervisor::new(config(), policy, connector);

        let (mut first, sink, source) = channel();
        let first_handle = supervisor.accept(sink, source, None);

        let (mut second, sink, source) = channel();
        let second_handle = supervisor.accept(sink, source, None);
        assert!(second.recv().await.is_none());
        assert_eq!(finish(second_handle).await, Phase::Closed);
        assert_eq!(supervisor.active_sessions(), 1);

        first.close();
        assert_eq!(finish(first_handle).await, Phase::Closed);
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn panicking_session_is_contained() {
        let supervisor =
            SessionSupervisor::new(config(), RelayPolicy::default(), Arc::new(PanickingConnector));

        let (mut client, sink, source) = channel();
        let handle = supervisor.accept(sink, source, None);
        client.send(&first_frame(USER, Address::Ipv4(Ipv4Addr::LOCALHOST), 80, b""));

        assert_eq!(finish(handle).await, Phase::Closed);
        assert!(client.recv().await.is_none());
        assert_eq!(supervisor.active_sessions(), 0);

        // The supervisor keeps accepting.
        let (mut other, sink, source) = channel();
        let handle = supervisor.accept(sink, source, None);
        other.close();
        assert_eq!(finish(handle).await, Phase::Closed);
    }

    #[tokio::test]
    async fn sessions_get_distinct_ids() {
        let (connector, _remotes) = PipeConnector::new();
        let supervisor = SessionSupervisor::new(config(), RelayPolicy::default(), connector);

        let (mut a, sink, source) = channel();
        let ha = supervisor.accept(sink, source, None);
        let (mut b, sink, source) = channel();
        let hb = supervisor.accept(sink, source, None);
        assert_ne!(ha.id, hb.id);

        a.close();
        b.close();
        finish(ha).await;
        finish(hb).await;
    }
}
