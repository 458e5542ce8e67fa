use super::connect::connect_with_retry;
use super::{OpSuccess, Operation};
use crate::config::Config;
use crate::db::models::ServerStatus;
use crate::db::session::{Connector, Session};
use crate::error::ProbeError;
use crate::types::{ClusterNodes, ProbeKind, ProbeStats, Report};
use chrono::Local;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};
use tracing::{info, warn};

const ERROR_BRIEF_CHARS: usize = 80;

/// Loop pacing and per-step bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    /// Pause after a successful iteration.
    pub normal_interval: Duration,
    /// Pause after a failed iteration.
    pub retry_interval: Duration,
    pub connect_attempts: usize,
    pub connect_retry_delay: Duration,
    pub op_timeout: Duration,
}

impl From<&Config> for LoopSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            normal_interval: cfg.normal_interval,
            retry_interval: cfg.retry_interval,
            connect_attempts: cfg.connect_attempts,
            connect_retry_delay: cfg.connect_retry_delay,
            op_timeout: cfg.op_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectEvent {
    Connected { node: String, primary: bool },
    Reconnected { node: String, primary: bool },
}

impl fmt::Display for ConnectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (what, node, primary) = match self {
            ConnectEvent::Connected { node, primary } => ("connected", node, primary),
            ConnectEvent::Reconnected { node, primary } => ("reconnected", node, primary),
        };
        let role = if *primary { "primary" } else { "standby" };
        write!(f, "{what} to {node} ({role})")
    }
}

/// Everything that happened in one iteration. Emitted as exactly one log line.
#[derive(Debug)]
pub struct IterationRecord {
    pub kind: ProbeKind,
    /// Sequence the iteration worked on; for reads, the newest row seen.
    pub seq: Option<i64>,
    pub elapsed: Duration,
    pub connection: Option<ConnectEvent>,
    pub outcome: Result<OpSuccess, ProbeError>,
}

impl IterationRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn emit(&self) {
        let latency_ms = self.elapsed.as_secs_f64() * 1000.0;
        let connection = self.connection.as_ref().map(ToString::to_string);
        match &self.outcome {
            Ok(done) => {
                let seq = done
                    .seq
                    .map_or_else(|| "no rows".to_string(), |s| s.to_string());
                info!(
                    probe = %self.kind,
                    seq = %seq,
                    latency_ms = format_args!("{latency_ms:.1}"),
                    role = %done.view.role,
                    standby = %done.view.standby,
                    sync = %done.view.sync_state,
                    connection = connection.as_deref(),
                    "ok"
                );
            }
            Err(e) => {
                warn!(
                    probe = %self.kind,
                    seq = self.seq,
                    latency_ms = format_args!("{latency_ms:.1}"),
                    error = %e.brief(ERROR_BRIEF_CHARS),
                    connection = connection.as_deref(),
                    "failed"
                );
            }
        }
    }
}

/// Drives one operation against one connector until told to stop.
///
/// Holds at most one session. Any failed step drops it; the next step opens a
/// new one with a bounded round of attempts. Rounds themselves are unbounded.
pub struct ProbeLoop<C: Connector, O: Operation> {
    connector: C,
    op: O,
    settings: LoopSettings,
    cluster: ClusterNodes,
    session: Option<C::Session>,
    prepared: bool,
    connected_once: bool,
    stats: ProbeStats,
    started: Instant,
}

impl<C: Connector, O: Operation> ProbeLoop<C, O> {
    pub fn new(connector: C, op: O, settings: LoopSettings, cluster: ClusterNodes) -> Self {
        Self {
            connector,
            op,
            settings,
            cluster,
            session: None,
            prepared: false,
            connected_once: false,
            stats: ProbeStats::new(),
            started: Instant::now(),
        }
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    pub fn op(&self) -> &O {
        &self.op
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Run iterations until `shutdown` resolves. Never returns on its own.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        loop {
            let record = tokio::select! {
                _ = &mut shutdown => break,
                record = self.step() => record,
            };
            record.emit();

            let pause = if record.is_success() {
                self.settings.normal_interval
            } else {
                self.settings.retry_interval
            };
            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(pause) => {}
            }
        }
    }

    /// One iteration: connect if needed, run the operation once, update stats.
    pub async fn step(&mut self) -> IterationRecord {
        let started = Instant::now();
        let attempted_seq = self.op.current_seq();
        let mut connection = None;
        let outcome = self.attempt(&mut connection).await;

        self.stats.total += 1;
        let seq = match &outcome {
            Ok(done) => {
                self.stats.succeeded += 1;
                self.stats.last_view = Some(done.view.clone());
                done.seq
            }
            Err(_) => {
                self.stats.failed += 1;
                attempted_seq
            }
        };

        IterationRecord {
            kind: O::KIND,
            seq,
            elapsed: started.elapsed(),
            connection,
            outcome,
        }
    }

    async fn attempt(
        &mut self,
        connection: &mut Option<ConnectEvent>,
    ) -> Result<OpSuccess, ProbeError> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                let (session, status) = connect_with_retry(
                    &self.connector,
                    O::REQUIRES_PRIMARY,
                    self.settings.connect_attempts,
                    self.settings.connect_retry_delay,
                )
                .await?;
                *connection = Some(self.note_connected(&status));
                session
            }
        };

        let limit = self.settings.op_timeout;
        if !self.prepared {
            bounded("prepare", limit, self.op.prepare(&mut session)).await?;
            self.prepared = true;
        }

        let done = bounded(O::KIND.as_str(), limit, self.op.execute(&mut session, &self.cluster)).await?;
        self.session = Some(session);
        Ok(done)
    }

    fn note_connected(&mut self, status: &ServerStatus) -> ConnectEvent {
        let node = self.cluster.describe(status.addr_or_local());
        let primary = status.is_primary();
        if self.connected_once {
            self.stats.reconnects += 1;
            ConnectEvent::Reconnected { node, primary }
        } else {
            self.connected_once = true;
            ConnectEvent::Connected { node, primary }
        }
    }

    /// Gracefully close the held session, if any.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = timeout(self.settings.op_timeout, session.close()).await;
        }
    }

    pub fn report(&self) -> Report<'_> {
        Report {
            kind: O::KIND,
            stats: &self.stats,
            elapsed: self.started.elapsed(),
            ended_at: Local::now(),
        }
    }
}

/// Bound a database call; on expiry the in-flight call is dropped with its session.
async fn bounded<T>(
    op: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, ProbeError>>,
) -> Result<T, ProbeError> {
    timeout(limit, fut)
        .await
        .map_err(|_| ProbeError::Timeout { op, after: limit })?
}
