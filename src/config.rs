//! Layered probe configuration.
//!
//! Sources, lowest to highest priority:
//! - built-in defaults
//! - `GB_*` process environment variables
//! - a dotenv-style file (`GB_ENV_FILE`, default `.env`)
//!
//! Every layer carries plain strings; typing and validation happen once in
//! [`Config::try_from`], so a bad value is reported with the key it came from.

use crate::error::ProbeError;
use crate::types::topology::ClusterNodes;
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::Serialized,
    value::{Dict, Map, Value},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

pub const ENV_PREFIX: &str = "GB_";
pub const ENV_FILE_VAR: &str = "GB_ENV_FILE";
pub const DEFAULT_ENV_FILE: &str = ".env";

const DEFAULT_PORT: u16 = 15400;
const DEFAULT_USER: &str = "testuser";
const DEFAULT_DATABASE: &str = "postgres";
const DEFAULT_NORMAL_INTERVAL_MS: u64 = 100;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 2_000;
const DEFAULT_CONNECT_ATTEMPTS: usize = 2;
const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_OP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_LOGLEVEL: &str = "info";

/// Raw, untyped view of the configuration as merged by figment.
/// Keys are the `GB_*` names with the prefix stripped and lowercased.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_interval_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_interval_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_attempts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_retry_delay_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op_timeout_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_nodes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncate_on_start: Option<String>,
}

impl RawConfig {
    /// Built-in defaults. Host has none.
    pub fn defaults() -> Self {
        Self {
            host: None,
            port: Some(DEFAULT_PORT.to_string()),
            user: Some(DEFAULT_USER.to_string()),
            pwd: Some(String::new()),
            db: Some(DEFAULT_DATABASE.to_string()),
            normal_interval_ms: Some(DEFAULT_NORMAL_INTERVAL_MS.to_string()),
            retry_interval_ms: Some(DEFAULT_RETRY_INTERVAL_MS.to_string()),
            connect_attempts: Some(DEFAULT_CONNECT_ATTEMPTS.to_string()),
            connect_retry_delay_ms: Some(DEFAULT_CONNECT_RETRY_DELAY_MS.to_string()),
            op_timeout_ms: Some(DEFAULT_OP_TIMEOUT_MS.to_string()),
            connect_timeout_ms: Some(DEFAULT_CONNECT_TIMEOUT_MS.to_string()),
            loglevel: Some(DEFAULT_LOGLEVEL.to_string()),
            cluster_nodes: Some(String::new()),
            truncate_on_start: Some("true".to_string()),
        }
    }
}

/// Resolved, validated configuration. Immutable for the process lifetime.
#[derive(Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub normal_interval: Duration,
    pub retry_interval: Duration,
    pub connect_attempts: usize,
    pub connect_retry_delay: Duration,
    pub op_timeout: Duration,
    pub connect_timeout: Duration,
    pub loglevel: String,
    pub cluster: ClusterNodes,
    pub truncate_on_start: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("normal_interval", &self.normal_interval)
            .field("retry_interval", &self.retry_interval)
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_retry_delay", &self.connect_retry_delay)
            .field("op_timeout", &self.op_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("loglevel", &self.loglevel)
            .field("cluster", &self.cluster)
            .field("truncate_on_start", &self.truncate_on_start)
            .finish()
    }
}

impl Config {
    /// Resolve the configuration from defaults, the process environment and
    /// the env file named by `GB_ENV_FILE` (or `.env`).
    pub fn load() -> Result<Self, ProbeError> {
        let env_file = std::env::var_os(ENV_FILE_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));
        Self::from_figment(Self::figment(&env_file))
    }

    pub fn figment(env_file: &Path) -> Figment {
        Figment::from(Serialized::defaults(RawConfig::defaults()))
            .merge(PrefixedEnv::new(ENV_PREFIX))
            .merge(DotenvFile::new(env_file, ENV_PREFIX))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ProbeError> {
        let raw: RawConfig = figment.extract()?;
        Self::try_from(raw)
    }

    /// Human-readable target, without credentials.
    pub fn target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.database)
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ProbeError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let host = required(raw.host, "GB_HOST")?;
        let port: u16 = parse_field(raw.port, "GB_PORT")?;
        if port == 0 {
            return Err(invalid("GB_PORT", "port must be non-zero"));
        }
        let user = required(raw.user, "GB_USER")?;
        let database = required(raw.db, "GB_DB")?;

        let connect_attempts: usize = parse_field(raw.connect_attempts, "GB_CONNECT_ATTEMPTS")?;
        if connect_attempts == 0 {
            return Err(invalid("GB_CONNECT_ATTEMPTS", "at least one attempt is required"));
        }

        Ok(Self {
            host,
            port,
            user,
            password: raw.pwd.unwrap_or_default(),
            database,
            normal_interval: millis(raw.normal_interval_ms, "GB_NORMAL_INTERVAL_MS")?,
            retry_interval: millis(raw.retry_interval_ms, "GB_RETRY_INTERVAL_MS")?,
            connect_attempts,
            connect_retry_delay: millis(raw.connect_retry_delay_ms, "GB_CONNECT_RETRY_DELAY_MS")?,
            op_timeout: millis(raw.op_timeout_ms, "GB_OP_TIMEOUT_MS")?,
            connect_timeout: millis(raw.connect_timeout_ms, "GB_CONNECT_TIMEOUT_MS")?,
            loglevel: log_level(raw.loglevel)?,
            cluster: ClusterNodes::parse(raw.cluster_nodes.as_deref().unwrap_or_default()),
            truncate_on_start: parse_bool(raw.truncate_on_start, "GB_TRUNCATE_ON_START")?,
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ProbeError {
    ProbeError::InvalidField {
        field,
        reason: reason.into(),
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ProbeError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ProbeError::MissingField(field))
}

fn parse_field<T>(value: Option<String>, field: &'static str) -> Result<T, ProbeError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let text = required(value, field)?;
    text.parse::<T>()
        .map_err(|e| invalid(field, format!("{text:?}: {e}")))
}

fn millis(value: Option<String>, field: &'static str) -> Result<Duration, ProbeError> {
    let ms: u64 = parse_field(value, field)?;
    if ms == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

/// A bare level name: `trace` through `error`, or `off`.
fn log_level(value: Option<String>) -> Result<String, ProbeError> {
    let text = value
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOGLEVEL.to_string());
    text.parse::<LevelFilter>()
        .map_err(|e| invalid("GB_LOGLEVEL", format!("{text:?}: {e}")))?;
    Ok(text)
}

fn parse_bool(value: Option<String>, field: &'static str) -> Result<bool, ProbeError> {
    let text = required(value, field)?;
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(field, format!("{other:?} is not a boolean"))),
    }
}

/// Turn `GB_FOO=bar` pairs into a figment dict keyed `foo`, values kept as strings.
fn prefixed_dict<I>(pairs: I, prefix: &str) -> Dict
where
    I: IntoIterator<Item = (String, String)>,
{
    pairs
        .into_iter()
        .filter_map(|(key, value)| {
            let stripped = key.strip_prefix(prefix)?;
            if stripped.is_empty() {
                return None;
            }
            Some((stripped.to_ascii_lowercase(), Value::from(value)))
        })
        .collect()
}

/// Process environment, restricted to one prefix.
pub struct PrefixedEnv {
    prefix: &'static str,
}

impl PrefixedEnv {
    pub fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl Provider for PrefixedEnv {
    fn metadata(&self) -> Metadata {
        Metadata::named(format!("`{}*` environment variables", self.prefix))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        let dict = prefixed_dict(std::env::vars(), self.prefix);
        Ok(Map::from([(Profile::Default, dict)]))
    }
}

/// `KEY=value` file parsed with dotenvy. A missing file contributes nothing.
pub struct DotenvFile {
    path: PathBuf,
    prefix: &'static str,
}

impl DotenvFile {
    pub fn new(path: impl Into<PathBuf>, prefix: &'static str) -> Self {
        Self {
            path: path.into(),
            prefix,
        }
    }
}

impl Provider for DotenvFile {
    fn metadata(&self) -> Metadata {
        Metadata::named(format!("env file {}", self.path.display()))
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        if !self.path.is_file() {
            return Ok(Map::new());
        }
        let pairs = dotenvy::from_path_iter(&self.path)
            .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
            .map_err(|e| {
                figment::Error::from(format!("failed to read {}: {e}", self.path.display()))
            })?;
        Ok(Map::from([(
            Profile::Default,
            prefixed_dict(pairs, self.prefix),
        )]))
    }
}
