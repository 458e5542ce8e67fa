use super::{OpSuccess, Operation, observe};
use crate::db::session::Session;
use crate::error::ProbeError;
use crate::types::{ClusterNodes, ProbeKind};
use tracing::debug;

/// Inserts one row per iteration with an increasing sequence number.
pub struct WriteOp {
    next_seq: i64,
    truncate_on_start: bool,
}

impl WriteOp {
    pub fn new(truncate_on_start: bool) -> Self {
        Self {
            next_seq: 1,
            truncate_on_start,
        }
    }

    pub fn next_seq(&self) -> i64 {
        self.next_seq
    }
}

impl Operation for WriteOp {
    const KIND: ProbeKind = ProbeKind::Write;
    // A standby rejects the insert itself, which is exactly what we want logged.
    const REQUIRES_PRIMARY: bool = false;

    async fn prepare<S: Session>(&mut self, session: &mut S) -> Result<(), ProbeError> {
        session.ensure_table().await?;
        if self.truncate_on_start {
            session.truncate().await?;
            self.next_seq = 1;
            debug!("test_table truncated");
        } else {
            let latest = session.latest_seq().await?;
            self.next_seq = latest.map_or(1, |seq| seq + 1);
            debug!(next_seq = self.next_seq, "continuing after existing rows");
        }
        Ok(())
    }

    async fn execute<S: Session>(
        &mut self,
        session: &mut S,
        cluster: &ClusterNodes,
    ) -> Result<OpSuccess, ProbeError> {
        let view = observe(session, cluster).await;
        let seq = self.next_seq;
        match session.insert(seq).await {
            Ok(()) => {
                self.next_seq += 1;
                Ok(OpSuccess {
                    seq: Some(seq),
                    view,
                })
            }
            Err(ProbeError::Database(sqlx::Error::Database(db))) if db.is_unique_violation() => {
                // An earlier attempt committed before its acknowledgement was lost.
                self.next_seq += 1;
                Err(ProbeError::Database(sqlx::Error::Database(db)))
            }
            Err(e) => Err(e),
        }
    }

    fn current_seq(&self) -> Option<i64> {
        Some(self.next_seq)
    }
}
