use super::{OpSuccess, Operation, observe};
use crate::db::session::Session;
use crate::error::ProbeError;
use crate::types::{ClusterNodes, ProbeKind};

/// Reads the newest sequence number written by the write probe.
#[derive(Default)]
pub struct ReadOp;

impl Operation for ReadOp {
    const KIND: ProbeKind = ProbeKind::Read;
    const REQUIRES_PRIMARY: bool = true;

    async fn execute<S: Session>(
        &mut self,
        session: &mut S,
        cluster: &ClusterNodes,
    ) -> Result<OpSuccess, ProbeError> {
        let view = observe(session, cluster).await;
        let seq = session.latest_seq().await?;
        Ok(OpSuccess { seq, view })
    }
}
