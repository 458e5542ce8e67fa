//! SQL used by the probes. Plain PostgreSQL, which GBase8c speaks.

/// Probe table: one row per successful write, keyed by the writer's sequence.
pub const CREATE_TEST_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS test_table (
    insert_seq BIGINT PRIMARY KEY,
    insert_time TIMESTAMP NOT NULL DEFAULT now()
)
"#;

pub const TRUNCATE_TEST_TABLE: &str = "TRUNCATE TABLE test_table";

pub const INSERT_ROW: &str = "INSERT INTO test_table (insert_seq, insert_time) VALUES ($1, now())";

pub const LATEST_SEQ: &str = "SELECT insert_seq FROM test_table ORDER BY insert_seq DESC LIMIT 1";

pub const PING: &str = "SELECT 1";

pub const IN_RECOVERY: &str = "SELECT pg_is_in_recovery()";

/// `host()` strips the netmask and yields text, so no inet decoding is needed.
pub const SERVER_ADDR: &str = "SELECT host(inet_server_addr())";

pub const STANDBY_COUNT: &str = "SELECT count(*) FROM pg_stat_replication";

pub const FIRST_STANDBY: &str =
    "SELECT host(client_addr), state FROM pg_stat_replication LIMIT 1";
