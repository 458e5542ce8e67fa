use failover_probe::db::{Connector, ReplicationInfo, ServerStatus, Session};
use failover_probe::error::ProbeError;
use failover_probe::service::{ConnectEvent, LoopSettings, ProbeLoop, ReadOp, WriteOp};
use failover_probe::types::{ClusterNodes, NodeRole};
use sqlx::error::{DatabaseError, ErrorKind};
use std::cell::{Ref, RefCell};
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PRIMARY_ADDR: &str = "172.16.0.231";
const STANDBY_ADDR: &str = "172.16.0.232";

#[derive(Default)]
struct NodeState {
    reachable: bool,
    in_recovery: bool,
    generation: u64,
    rows: Vec<i64>,
    connects: u32,
    truncates: u32,
    hang_inserts: bool,
    replication_broken: bool,
    ensure_table_fails: bool,
    /// Commit the next insert, then drop the connection before acknowledging it.
    lose_next_ack: bool,
}

/// In-memory stand-in for a database node reachable through one address.
#[derive(Clone, Default)]
struct FakeNode(Rc<RefCell<NodeState>>);

impl FakeNode {
    fn up() -> Self {
        let node = Self::default();
        node.0.borrow_mut().reachable = true;
        node
    }

    fn down() -> Self {
        Self::default()
    }

    fn set_reachable(&self, reachable: bool) {
        self.0.borrow_mut().reachable = reachable;
    }

    fn set_in_recovery(&self, in_recovery: bool) {
        self.0.borrow_mut().in_recovery = in_recovery;
    }

    /// Break every open session, as a failover does.
    fn sever(&self) {
        self.0.borrow_mut().generation += 1;
    }

    fn state(&self) -> Ref<'_, NodeState> {
        self.0.borrow()
    }
}

fn io_err(kind: io::ErrorKind, msg: &str) -> ProbeError {
    ProbeError::Io(io::Error::new(kind, msg.to_string()))
}

/// Primary-key conflict as the server reports it.
#[derive(Debug)]
struct DuplicateKey;

impl fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl StdError for DuplicateKey {}

impl DatabaseError for DuplicateKey {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint \"test_table_pkey\""
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::UniqueViolation
    }
}

struct FakeSession {
    node: FakeNode,
    generation: u64,
}

impl FakeSession {
    fn check(&self) -> Result<(), ProbeError> {
        let state = self.node.state();
        if !state.reachable || state.generation != self.generation {
            return Err(io_err(io::ErrorKind::BrokenPipe, "server closed the connection"));
        }
        Ok(())
    }
}

impl Session for FakeSession {
    async fn ping(&mut self) -> Result<(), ProbeError> {
        self.check()
    }

    async fn server_status(&mut self) -> Result<ServerStatus, ProbeError> {
        self.check()?;
        Ok(ServerStatus {
            in_recovery: self.node.state().in_recovery,
            server_addr: Some(PRIMARY_ADDR.to_string()),
        })
    }

    async fn replication(&mut self) -> Result<ReplicationInfo, ProbeError> {
        self.check()?;
        let state = self.node.state();
        if state.replication_broken {
            return Err(io_err(io::ErrorKind::PermissionDenied, "permission denied"));
        }
        Ok(ReplicationInfo {
            in_recovery: state.in_recovery,
            standby_count: 1,
            standby_addr: Some(STANDBY_ADDR.to_string()),
            sync_state: Some("streaming".to_string()),
        })
    }

    async fn ensure_table(&mut self) -> Result<(), ProbeError> {
        self.check()?;
        if self.node.state().ensure_table_fails {
            return Err(io_err(
                io::ErrorKind::PermissionDenied,
                "permission denied for schema public",
            ));
        }
        Ok(())
    }

    async fn truncate(&mut self) -> Result<(), ProbeError> {
        self.check()?;
        let mut state = self.node.0.borrow_mut();
        state.rows.clear();
        state.truncates += 1;
        Ok(())
    }

    async fn insert(&mut self, seq: i64) -> Result<(), ProbeError> {
        self.check()?;
        let (hang, read_only) = {
            let state = self.node.state();
            (state.hang_inserts, state.in_recovery)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if read_only {
            return Err(io_err(
                io::ErrorKind::Other,
                "cannot execute INSERT in a read-only transaction",
            ));
        }
        let mut state = self.node.0.borrow_mut();
        if state.rows.contains(&seq) {
            return Err(ProbeError::Database(sqlx::Error::Database(Box::new(
                DuplicateKey,
            ))));
        }
        state.rows.push(seq);
        if state.lose_next_ack {
            state.lose_next_ack = false;
            state.generation += 1;
            return Err(io_err(io::ErrorKind::ConnectionReset, "connection reset by peer"));
        }
        Ok(())
    }

    async fn latest_seq(&mut self) -> Result<Option<i64>, ProbeError> {
        self.check()?;
        Ok(self.node.state().rows.iter().max().copied())
    }

    async fn close(self) {}
}

impl Connector for FakeNode {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, ProbeError> {
        let mut state = self.0.borrow_mut();
        state.connects += 1;
        if !state.reachable {
            return Err(io_err(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        Ok(FakeSession {
            node: self.clone(),
            generation: state.generation,
        })
    }
}

fn settings() -> LoopSettings {
    LoopSettings {
        normal_interval: Duration::from_millis(100),
        retry_interval: Duration::from_secs(2),
        connect_attempts: 2,
        connect_retry_delay: Duration::from_millis(500),
        op_timeout: Duration::from_secs(2),
    }
}

fn cluster() -> ClusterNodes {
    ClusterNodes::parse("172.16.0.231,172.16.0.232")
}

#[tokio::test(start_paused = true)]
async fn unreachable_database_fails_every_iteration_without_stopping() {
    let node = FakeNode::down();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());

    for _ in 0..5 {
        let record = probe.step().await;
        assert!(!record.is_success());
        assert!(record.connection.is_none());
        assert_eq!(record.seq, Some(1));
        assert!(matches!(record.outcome, Err(ProbeError::Io(_))));
    }

    let stats = probe.stats();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.failed, 5);
    assert_eq!(stats.succeeded, 0);
    // Each iteration is one bounded round of two attempts.
    assert_eq!(node.state().connects, 10);
}

#[tokio::test(start_paused = true)]
async fn next_iteration_succeeds_once_database_is_reachable() {
    let node = FakeNode::down();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());

    for _ in 0..3 {
        assert!(!probe.step().await.is_success());
    }

    node.set_reachable(true);
    let record = probe.step().await;
    assert!(record.is_success());
    assert_eq!(record.seq, Some(1));
    assert_eq!(
        record.connection,
        Some(ConnectEvent::Connected {
            node: "231(172.16.0.231)".to_string(),
            primary: true,
        })
    );
    assert_eq!(probe.stats().reconnects, 0);
    assert_eq!(node.state().rows, vec![1]);
    assert_eq!(node.state().truncates, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_connection_is_reestablished_and_sequence_resumes() {
    let node = FakeNode::up();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());

    assert!(probe.step().await.is_success());
    let second = probe.step().await;
    assert!(second.is_success());
    assert!(second.connection.is_none());
    assert_eq!(node.state().connects, 1);

    node.sever();
    let broken = probe.step().await;
    assert!(!broken.is_success());
    assert_eq!(broken.seq, Some(3));
    assert!(!probe.is_connected());

    let resumed = probe.step().await;
    assert!(resumed.is_success());
    assert_eq!(resumed.seq, Some(3));
    assert!(matches!(resumed.connection, Some(ConnectEvent::Reconnected { .. })));

    assert_eq!(node.state().rows, vec![1, 2, 3]);
    assert_eq!(node.state().truncates, 1);
    let stats = probe.stats();
    assert_eq!(stats.reconnects, 1);
    assert_eq!((stats.total, stats.succeeded, stats.failed), (4, 3, 1));
}

#[tokio::test(start_paused = true)]
async fn writer_on_standby_reports_failure_and_keeps_sequence() {
    let node = FakeNode::up();
    node.set_in_recovery(true);
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());

    let record = probe.step().await;
    assert!(!record.is_success());
    assert_eq!(
        record.connection,
        Some(ConnectEvent::Connected {
            node: "231(172.16.0.231)".to_string(),
            primary: false,
        })
    );
    assert_eq!(probe.op().next_seq(), 1);

    node.set_in_recovery(false);
    let record = probe.step().await;
    assert!(record.is_success());
    assert_eq!(record.seq, Some(1));
}

#[tokio::test(start_paused = true)]
async fn writer_continues_after_existing_rows_without_truncate() {
    let node = FakeNode::up();
    node.0.borrow_mut().rows = vec![1, 2, 3, 4];
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(false), settings(), cluster());

    let record = probe.step().await;
    assert_eq!(record.seq, Some(5));
    assert_eq!(node.state().truncates, 0);
    assert_eq!(node.state().rows, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn reader_refuses_standby_until_promotion() {
    let node = FakeNode::up();
    node.set_in_recovery(true);
    let mut probe = ProbeLoop::new(node.clone(), ReadOp, settings(), cluster());

    let record = probe.step().await;
    assert!(matches!(record.outcome, Err(ProbeError::NotPrimary(_))));
    assert_eq!(node.state().connects, 2);

    node.set_in_recovery(false);
    let empty = probe.step().await;
    assert!(empty.is_success());
    assert_eq!(empty.seq, None);

    node.0.borrow_mut().rows = vec![5, 7, 6];
    let latest = probe.step().await;
    assert_eq!(latest.seq, Some(7));
    let view = &latest.outcome.as_ref().expect("read should succeed").view;
    assert_eq!(view.role.to_string(), "primary 231(172.16.0.231)");
    assert_eq!(view.standby, "232(172.16.0.232)");
}

#[tokio::test(start_paused = true)]
async fn hung_write_times_out_and_drops_the_session() {
    let node = FakeNode::up();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());
    assert!(probe.step().await.is_success());

    node.0.borrow_mut().hang_inserts = true;
    let record = probe.step().await;
    assert!(matches!(
        record.outcome,
        Err(ProbeError::Timeout { op: "write", .. })
    ));
    assert!(record.elapsed >= Duration::from_secs(2));
    assert!(!probe.is_connected());

    node.0.borrow_mut().hang_inserts = false;
    let record = probe.step().await;
    assert!(record.is_success());
    assert_eq!(record.seq, Some(2));
    assert!(matches!(record.connection, Some(ConnectEvent::Reconnected { .. })));
}

#[tokio::test(start_paused = true)]
async fn replication_query_failure_only_degrades_the_role() {
    let node = FakeNode::up();
    node.0.borrow_mut().replication_broken = true;
    let mut probe = ProbeLoop::new(node.clone(), ReadOp, settings(), cluster());

    let record = probe.step().await;
    let done = record.outcome.expect("read should still succeed");
    assert!(matches!(done.view.role, NodeRole::Unknown(_)));
    assert_eq!(done.view.standby, "-");
}

#[tokio::test(start_paused = true)]
async fn run_paces_successful_iterations_until_shutdown() {
    let node = FakeNode::up();
    let mut probe = ProbeLoop::new(node.clone(), ReadOp, settings(), cluster());

    probe.run(tokio::time::sleep(Duration::from_millis(1_050))).await;

    // Iterations start at 0, 100, ..., 1000 ms.
    assert_eq!(probe.stats().total, 11);
    assert_eq!(probe.stats().failed, 0);
    assert!(probe.report().to_string().contains("success rate  : 100.00%"));
}

#[tokio::test(start_paused = true)]
async fn run_backs_off_by_retry_interval_while_unreachable() {
    let node = FakeNode::down();
    let mut probe = ProbeLoop::new(node.clone(), ReadOp, settings(), cluster());

    probe.run(tokio::time::sleep(Duration::from_millis(4_900))).await;

    // Round of two attempts (500 ms apart), then a 2 s pause: starts at 0 and 2500 ms.
    let stats = probe.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(node.state().connects, 4);
}

#[tokio::test(start_paused = true)]
async fn committed_but_unacknowledged_write_skips_its_sequence() {
    let node = FakeNode::up();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());
    assert!(probe.step().await.is_success());

    node.0.borrow_mut().lose_next_ack = true;
    let lost = probe.step().await;
    assert!(matches!(lost.outcome, Err(ProbeError::Io(_))));
    assert_eq!(lost.seq, Some(2));
    assert_eq!(probe.op().next_seq(), 2);

    let duplicate = probe.step().await;
    assert_eq!(duplicate.seq, Some(2));
    match &duplicate.outcome {
        Err(ProbeError::Database(sqlx::Error::Database(db))) => {
            assert!(db.is_unique_violation());
        }
        other => panic!("expected a unique violation, got {other:?}"),
    }
    assert_eq!(probe.op().next_seq(), 3);

    let next = probe.step().await;
    assert!(next.is_success());
    assert_eq!(next.seq, Some(3));
    assert_eq!(node.state().rows, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn failed_preparation_is_retried_on_the_next_session_only_once() {
    let node = FakeNode::up();
    node.0.borrow_mut().ensure_table_fails = true;
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());

    let record = probe.step().await;
    assert!(!record.is_success());
    assert!(matches!(record.connection, Some(ConnectEvent::Connected { .. })));
    assert!(!probe.is_connected());
    assert_eq!(node.state().truncates, 0);
    assert!(node.state().rows.is_empty());

    node.0.borrow_mut().ensure_table_fails = false;
    let record = probe.step().await;
    assert!(record.is_success());
    assert_eq!(record.seq, Some(1));
    assert!(matches!(record.connection, Some(ConnectEvent::Reconnected { .. })));
    assert_eq!(node.state().truncates, 1);

    node.sever();
    assert!(!probe.step().await.is_success());
    assert!(probe.step().await.is_success());
    assert!(probe.step().await.is_success());
    assert_eq!(node.state().truncates, 1);
    assert_eq!(node.state().rows, vec![1, 2, 3]);
}

#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl CapturedLog {
    fn lines(&self) -> Vec<String> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf).lines().map(str::to_owned).collect()
    }
}

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn every_iteration_logs_exactly_one_line() {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let node = FakeNode::down();
    let mut probe = ProbeLoop::new(node.clone(), WriteOp::new(true), settings(), cluster());
    let flaky = node.clone();
    probe
        .run(async move {
            tokio::time::sleep(Duration::from_millis(2_700)).await;
            flaky.set_reachable(true);
            tokio::time::sleep(Duration::from_millis(650)).await;
        })
        .await;

    let stats = probe.stats();
    assert!(stats.failed >= 1);
    assert!(stats.succeeded >= 1);

    let lines = log.lines();
    assert_eq!(lines.len() as u64, stats.total);
    let warned = lines.iter().filter(|l| l.contains("WARN")).count() as u64;
    let ok = lines.iter().filter(|l| l.contains("INFO")).count() as u64;
    assert_eq!(warned, stats.failed);
    assert_eq!(ok, stats.succeeded);
}
