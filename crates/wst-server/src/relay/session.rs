//! Relay session: one client frame channel ↔ one outbound TCP connection.
//!
//! A session walks `AwaitingHeader → Connecting → Streaming → Closed`.
//! The first frame carries the connection header; every later frame is
//! payload. Once streaming, both directions are polled concurrently in the
//! session task and the first one to finish (or the idle watchdog) ends the
//! session. Both ends are closed on every exit path.

use super::connector::{Connector, OutboundConnection};
use super::policy::PolicyEnforcer;
use super::resolver::{Destination, DestinationResolver};
use super::RelayConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info};
use wst_core::header;
use wst_core::{FrameSink, FrameSource, RelayError, RelayResult};

/// Read buffer size for the remote→client direction.
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    Connecting,
    Streaming,
    Closed,
}

impl Phase {
    fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::AwaitingHeader, Phase::Connecting)
                | (Phase::Connecting, Phase::Streaming)
                | (_, Phase::Closed)
        )
    }
}

/// Which side ended a session that closed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    RemoteClosed,
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: u64,
    pub destination: Option<Destination>,
    /// Every phase entered, in order, starting with `AwaitingHeader`.
    pub phases: Vec<Phase>,
    /// Bytes written to the destination, inline payload included.
    pub bytes_up: u64,
    /// Bytes read from the destination.
    pub bytes_down: u64,
    pub outcome: RelayResult<CloseReason>,
}

/// Byte counters and last-activity clock shared by both directions.
struct Traffic {
    started: Instant,
    last_activity_ms: AtomicU64,
    up: AtomicU64,
    down: AtomicU64,
}

impl Traffic {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            up: AtomicU64::new(0),
            down: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(now, Ordering::Relaxed);
    }

    fn record_up(&self, n: usize) {
        self.up.fetch_add(n as u64, Ordering::Relaxed);
        self.touch();
    }

    fn record_down(&self, n: usize) {
        self.down.fetch_add(n as u64, Ordering::Relaxed);
        self.touch();
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }
}

/// State for one tunnel.
pub struct RelaySession {
    id: u64,
    config: Arc<RelayConfig>,
    connector: Arc<dyn Connector>,
    policy: Arc<PolicyEnforcer>,
    phase_tx: Arc<watch::Sender<Phase>>,
    phases: Vec<Phase>,
    destination: Option<Destination>,
    traffic: Traffic,
}

impl RelaySession {
    pub fn new(
        id: u64,
        config: Arc<RelayConfig>,
        connector: Arc<dyn Connector>,
        policy: Arc<PolicyEnforcer>,
    ) -> Self {
        let (phase_tx, _) = watch::channel(Phase::AwaitingHeader);
        Self {
            id,
            config,
            connector,
            policy,
            phase_tx: Arc::new(phase_tx),
            phases: vec![Phase::AwaitingHeader],
            destination: None,
            traffic: Traffic::new(),
        }
    }

    /// Watch the session's phase.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_tx.subscribe()
    }

    /// Sender half of the phase watch, so a supervisor can force `Closed`
    /// if the session task dies abnormally.
    pub fn phase_sender(&self) -> Arc<watch::Sender<Phase>> {
        self.phase_tx.clone()
    }

    /// Run the session to completion. Never fails: the outcome is part of
    /// the report, and both ends are closed before this returns.
    pub async fn run(
        mut self,
        mut sink: Box<dyn FrameSink>,
        mut source: Box<dyn FrameSource>,
    ) -> SessionReport {
        let outcome = self.drive(&mut sink, &mut source).await;

        if let Err(e) = sink.close().await {
            debug!(session = self.id, error = %e, "closing client channel failed");
        }
        drop(source);
        self.transition(Phase::Closed);

        SessionReport {
            id: self.id,
            destination: self.destination.take(),
            phases: std::mem::take(&mut self.phases),
            bytes_up: self.traffic.up.load(Ordering::Relaxed),
            bytes_down: self.traffic.down.load(Ordering::Relaxed),
            outcome,
        }
    }

    async fn drive(
        &mut self,
        sink: &mut Box<dyn FrameSink>,
        source: &mut Box<dyn FrameSource>,
    ) -> RelayResult<CloseReason> {
        let first = match tokio::time::timeout(self.config.handshake_timeout, source.recv()).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                debug!(session = self.id, "client closed before sending a header");
                return Ok(CloseReason::ClientClosed);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(RelayError::Timeout("handshake")),
        };

        let parsed = header::parse(&first, self.config.accepted_version)?;
        self.config.authorized.verify(&parsed.user_id)?;

        self.transition(Phase::Connecting);
        let dest = DestinationResolver::resolve(&parsed.address, parsed.port)?;
        self.policy.check_destination(&dest)?;
        self.destination = Some(dest.clone());

        info!(
            session = self.id,
            user = %parsed.user_id,
            dest = %dest,
            inline = parsed.inline_payload.len(),
            "connecting"
        );
        let OutboundConnection {
            reader,
            mut writer,
            peer,
        } = self.connector.open(&dest).await?;
        debug!(session = self.id, peer = %peer, "outbound connection open");

        if !parsed.inline_payload.is_empty() {
            if let Err(e) = writer.write_all(&parsed.inline_payload).await {
                let _ = writer.shutdown().await;
                return Err(transport("writing inline payload", e));
            }
            self.traffic.record_up(parsed.inline_payload.len());
        }

        self.transition(Phase::Streaming);
        self.stream(sink, source, reader, writer).await
    }

    async fn stream(
        &self,
        sink: &mut Box<dyn FrameSink>,
        source: &mut Box<dyn FrameSource>,
        mut reader: Reader,
        mut writer: Writer,
    ) -> RelayResult<CloseReason> {
        self.traffic.touch();

        let outcome = tokio::select! {
            r = self.client_to_remote(source, &mut writer) => r,
            r = self.remote_to_client(&mut reader, sink) => r,
            _ = self.idle_watchdog() => Err(RelayError::Timeout("idle")),
        };

        if let Err(e) = writer.shutdown().await {
            debug!(session = self.id, error = %e, "outbound shutdown failed");
        }
        outcome
    }

    /// Forward every later client frame, in arrival order, to the destination.
    async fn client_to_remote(
        &self,
        source: &mut Box<dyn FrameSource>,
        writer: &mut Writer,
    ) -> RelayResult<CloseReason> {
        while let Some(frame) = source.recv().await? {
            if frame.is_empty() {
                continue;
            }
            writer
                .write_all(&frame)
                .await
                .map_err(|e| transport("writing to destination", e))?;
            self.traffic.record_up(frame.len());
        }
        debug!(session = self.id, "client closed");
        Ok(CloseReason::ClientClosed)
    }

    /// Forward each chunk read from the destination as one frame.
    async fn remote_to_client(
        &self,
        reader: &mut Reader,
        sink: &mut Box<dyn FrameSink>,
    ) -> RelayResult<CloseReason> {
        let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
        let mut response_header = self
            .config
            .send_response_header
            .then(|| vec![self.config.accepted_version, 0]);

        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|e| transport("reading from destination", e))?;
            if n == 0 {
                debug!(session = self.id, "destination closed");
                return Ok(CloseReason::RemoteClosed);
            }
            let frame = match response_header.take() {
                Some(mut prefixed) => {
                    prefixed.extend_from_slice(&buf[..n]);
                    prefixed
                }
                None => buf[..n].to_vec(),
            };
            sink.send(frame).await?;
            self.traffic.record_down(n);
        }
    }

    /// Resolve once the session has been idle for the configured limit.
    async fn idle_watchdog(&self) {
        let Some(limit) = self.config.idle_timeout else {
            return std::future::pending().await;
        };
        loop {
            let idle = self.traffic.idle_for();
            if idle >= limit {
                debug!(session = self.id, ?limit, "idle timeout");
                return;
            }
            tokio::time::sleep(limit - idle).await;
        }
    }

    /// Move to `next`. `Closed` is terminal; entering it again is a no-op.
    fn transition(&mut self, next: Phase) {
        let current = *self.phase_tx.borrow();
        if current == Phase::Closed {
            return;
        }
        debug_assert!(
            current.can_transition_to(next),
            "invalid transition {current:?} -> {next:?}"
        );
        self.phases.push(next);
        self.phase_tx.send_replace(next);
        debug!(session = self.id, from = ?current, to = ?next, "phase");
    }
}

fn transport(context: &str, e: std::io::Error) -> RelayError {
    RelayError::Transport(format!("{context}: {e}"))
}
