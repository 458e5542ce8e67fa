use super::models::{ReplicationInfo, ServerStatus};
use crate::error::ProbeError;

/// One open client connection to a cluster node.
///
/// Probes never share a session; a failed call means the session is dropped
/// and a fresh one is opened on the next iteration.
#[allow(async_fn_in_trait)]
pub trait Session: Sized {
    async fn ping(&mut self) -> Result<(), ProbeError>;

    async fn server_status(&mut self) -> Result<ServerStatus, ProbeError>;

    async fn replication(&mut self) -> Result<ReplicationInfo, ProbeError>;

    async fn ensure_table(&mut self) -> Result<(), ProbeError>;

    async fn truncate(&mut self) -> Result<(), ProbeError>;

    async fn insert(&mut self, seq: i64) -> Result<(), ProbeError>;

    async fn latest_seq(&mut self) -> Result<Option<i64>, ProbeError>;

    /// Graceful close. Only used on shutdown; broken sessions are just dropped.
    async fn close(self);
}

/// Opens sessions against a fixed target.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Session: Session;

    async fn connect(&self) -> Result<Self::Session, ProbeError>;
}
