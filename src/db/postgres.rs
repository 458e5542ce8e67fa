use crate::config::Config;
use crate::db::models::{ReplicationInfo, ServerStatus, StandbyRow};
use crate::db::schema;
use crate::db::session::{Connector, Session};
use crate::error::ProbeError;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use tokio::time::timeout;

pub const APPLICATION_NAME: &str = "failover-probe";

/// Opens single, unpooled Postgres connections.
#[derive(Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database)
            .ssl_mode(PgSslMode::Disable)
            .application_name(APPLICATION_NAME)
            .options([("synchronous_commit", "off")])
            .disable_statement_logging();
        Self::new(options, cfg.connect_timeout)
    }
}

impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, ProbeError> {
        let conn = timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
            .map_err(|_| ProbeError::Timeout {
                op: "connect",
                after: self.connect_timeout,
            })??;
        let mut session = PgSession { conn };
        session.ping().await?;
        Ok(session)
    }
}

pub struct PgSession {
    conn: PgConnection,
}

impl Session for PgSession {
    async fn ping(&mut self) -> Result<(), ProbeError> {
        sqlx::query(schema::PING).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn server_status(&mut self) -> Result<ServerStatus, ProbeError> {
        let in_recovery = sqlx::query_scalar::<_, bool>(schema::IN_RECOVERY)
            .fetch_one(&mut self.conn)
            .await?;
        let server_addr = sqlx::query_scalar::<_, Option<String>>(schema::SERVER_ADDR)
            .fetch_one(&mut self.conn)
            .await?;
        Ok(ServerStatus {
            in_recovery,
            server_addr,
        })
    }

    async fn replication(&mut self) -> Result<ReplicationInfo, ProbeError> {
        let in_recovery = sqlx::query_scalar::<_, bool>(schema::IN_RECOVERY)
            .fetch_one(&mut self.conn)
            .await?;
        let standby_count = sqlx::query_scalar::<_, i64>(schema::STANDBY_COUNT)
            .fetch_one(&mut self.conn)
            .await?;

        let mut info = ReplicationInfo {
            in_recovery,
            standby_count,
            ..Default::default()
        };
        if standby_count > 0 {
            let row = sqlx::query_as::<_, StandbyRow>(schema::FIRST_STANDBY)
                .fetch_optional(&mut self.conn)
                .await?;
            if let Some(row) = row {
                info.standby_addr = row.host;
                info.sync_state = row.state;
            }
        }
        Ok(info)
    }

    async fn ensure_table(&mut self) -> Result<(), ProbeError> {
        sqlx::query(schema::CREATE_TEST_TABLE)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn truncate(&mut self) -> Result<(), ProbeError> {
        sqlx::query(schema::TRUNCATE_TEST_TABLE)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn insert(&mut self, seq: i64) -> Result<(), ProbeError> {
        sqlx::query(schema::INSERT_ROW)
            .bind(seq)
            .execute(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn latest_seq(&mut self) -> Result<Option<i64>, ProbeError> {
        let seq = sqlx::query_scalar::<_, i64>(schema::LATEST_SEQ)
            .fetch_optional(&mut self.conn)
            .await?;
        Ok(seq)
    }

    async fn close(self) {
        let _ = self.conn.close().await;
    }
}
