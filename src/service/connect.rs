use crate::db::models::ServerStatus;
use crate::db::session::{Connector, Session};
use crate::error::{IsRetryable, ProbeError};
use backon::{ConstantBuilder, Retryable};
use std::time::Duration;
use tracing::debug;

/// One reconnect round: `attempts` tries spaced by a constant delay.
fn round_policy(attempts: usize, delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1))
}

/// Open a session and, when `require_primary` is set, make sure it did not
/// land on a standby. Gives up after one round; the caller decides when to
/// start the next.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    require_primary: bool,
    attempts: usize,
    delay: Duration,
) -> Result<(C::Session, ServerStatus), ProbeError> {
    (|| open_verified(connector, require_primary))
        .retry(round_policy(attempts, delay))
        .when(|e: &ProbeError| e.is_retryable())
        .notify(|err: &ProbeError, dur: Duration| {
            debug!(error = %err, "connect attempt failed, retrying in {:?}", dur);
        })
        .await
}

async fn open_verified<C: Connector>(
    connector: &C,
    require_primary: bool,
) -> Result<(C::Session, ServerStatus), ProbeError> {
    let mut session = connector.connect().await?;
    let status = session.server_status().await?;
    if require_primary && !status.is_primary() {
        let addr = status.addr_or_local().to_string();
        session.close().await;
        return Err(ProbeError::NotPrimary(addr));
    }
    Ok((session, status))
}
