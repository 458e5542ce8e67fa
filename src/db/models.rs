use sqlx::FromRow;

/// Replication facts read from the connected node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationInfo {
    pub in_recovery: bool,
    pub standby_count: i64,
    pub standby_addr: Option<String>,
    pub sync_state: Option<String>,
}

/// First row of `pg_stat_replication`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StandbyRow {
    pub host: Option<String>,
    pub state: Option<String>,
}

/// What a fresh session reports about the node it landed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub in_recovery: bool,
    /// `None` when connected over a unix socket.
    pub server_addr: Option<String>,
}

impl ServerStatus {
    pub fn is_primary(&self) -> bool {
        !self.in_recovery
    }

    pub fn addr_or_local(&self) -> &str {
        self.server_addr.as_deref().unwrap_or("localhost")
    }
}
