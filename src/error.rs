use sqlx::Error as SqlxError;
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ProbeError {
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("missing required configuration field {0}")]
    MissingField(&'static str),

    #[error("invalid configuration field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] SqlxError),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("connected node {0} is a standby")]
    NotPrimary(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ProbeError {
    fn from(e: figment::Error) -> Self {
        ProbeError::Config(Box::new(e))
    }
}

impl ProbeError {
    /// Configuration problems abort the process; everything else is logged
    /// and the loop carries on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Config(_)
                | ProbeError::MissingField(_)
                | ProbeError::InvalidField { .. }
        )
    }

    /// The underlying failure, without variant prefixes.
    pub fn cause(&self) -> String {
        match self {
            ProbeError::Database(e) => match e {
                SqlxError::Database(db) => db.message().to_string(),
                SqlxError::Io(io) => io.to_string(),
                SqlxError::Tls(tls) => tls.to_string(),
                SqlxError::Protocol(msg) => msg.clone(),
                other => other.to_string(),
            },
            ProbeError::Io(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Short single-line form used in per-iteration log lines.
    pub fn brief(&self, max_chars: usize) -> String {
        let text = self.cause().replace('\n', " ");
        match text.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}...", &text[..idx]),
            None => text,
        }
    }
}

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ProbeError {
    fn is_retryable(&self) -> bool {
        match self {
            ProbeError::Database(e) => !matches!(
                e,
                SqlxError::Configuration(_) | SqlxError::ColumnNotFound(_) | SqlxError::TypeNotFound { .. }
            ),
            ProbeError::Timeout { .. } | ProbeError::NotPrimary(_) | ProbeError::Io(_) => true,
            _ => false,
        }
    }
}
