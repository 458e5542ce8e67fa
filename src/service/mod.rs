pub mod connect;
pub mod probe_loop;
pub mod read_ops;
pub mod write_ops;

pub use probe_loop::{ConnectEvent, IterationRecord, LoopSettings, ProbeLoop};
pub use read_ops::ReadOp;
pub use write_ops::WriteOp;

use crate::config::Config;
use crate::db::postgres::PgConnector;
use crate::db::session::Session;
use crate::error::ProbeError;
use crate::types::{ClusterNodes, NodeView, ProbeKind};
use tracing::info;

/// What a successful iteration observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpSuccess {
    /// Row written, or newest row read. `None` for a read of an empty table.
    pub seq: Option<i64>,
    pub view: NodeView,
}

/// The per-iteration work of a probe.
#[allow(async_fn_in_trait)]
pub trait Operation {
    const KIND: ProbeKind;
    /// Reject sessions that land on a standby while connecting.
    const REQUIRES_PRIMARY: bool;

    /// Runs once, on the first session that gets established.
    async fn prepare<S: Session>(&mut self, _session: &mut S) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn execute<S: Session>(
        &mut self,
        session: &mut S,
        cluster: &ClusterNodes,
    ) -> Result<OpSuccess, ProbeError>;

    /// Sequence number the next attempt will use, if the operation has one.
    fn current_seq(&self) -> Option<i64> {
        None
    }
}

/// Replication view for log lines. A failure here degrades the description
/// instead of failing the iteration.
pub async fn observe<S: Session>(session: &mut S, cluster: &ClusterNodes) -> NodeView {
    match session.replication().await {
        Ok(info) => NodeView::from_replication(&info, cluster),
        Err(e) => NodeView::unknown(error_tag(&e)),
    }
}

fn error_tag(e: &ProbeError) -> String {
    e.cause()
        .chars()
        .take(15)
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Run a probe against the configured Postgres target until Ctrl+C/SIGTERM,
/// then log the summary report.
pub async fn launch<O: Operation>(cfg: &Config, op: O) {
    info!(
        probe = %O::KIND,
        target = %cfg.target(),
        normal_interval = ?cfg.normal_interval,
        retry_interval = ?cfg.retry_interval,
        connect_attempts = cfg.connect_attempts,
        op_timeout = ?cfg.op_timeout,
        connect_timeout = ?cfg.connect_timeout,
        cluster = ?cfg.cluster,
        "probe starting, press Ctrl+C to stop"
    );

    let connector = PgConnector::from_config(cfg);
    let mut probe = ProbeLoop::new(connector, op, LoopSettings::from(cfg), cfg.cluster.clone());
    probe.run(crate::shutdown::signal()).await;
    probe.close().await;

    info!("probe stopped\n{}", probe.report());
}
