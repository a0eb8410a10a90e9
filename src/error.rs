use std::path::PathBuf;

use thiserror::Error;

/// Failures of the durable raw event store. All of them are fatal for a run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("sqlite error on {path}: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn sqlite(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        StoreError::Sqlite {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of one provider call for one collection unit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// Network errors, timeouts, 5xx and 429; worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// 4xx and malformed payloads; retrying cannot help.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status {
            408 | 429 | 500..=599 => FetchError::Transient(format!("http {status}: {snippet}")),
            _ => FetchError::Permanent(format!("http {status}: {snippet}")),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return FetchError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            return FetchError::Permanent(err.to_string());
        }
        FetchError::Transient(err.to_string())
    }
}

/// A model that could not be fitted for one split.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FitError {
    #[error("empty training set")]
    EmptyTrainingSet,

    #[error("training labels contain a single class ({0})")]
    SingleClass(f64),

    #[error("feature matrix is ragged: expected {expected} columns, row {row} has {actual}")]
    Ragged {
        expected: usize,
        row: usize,
        actual: usize,
    },

    #[error("non-finite value in training data")]
    NonFinite,

    #[error("normal equations are singular")]
    Singular,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConfigError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FetchError;

    #[test]
    fn status_classification() {
        assert!(FetchError::from_status(503, "").is_transient());
        assert!(FetchError::from_status(429, "slow down").is_transient());
        assert!(FetchError::from_status(408, "").is_transient());
        assert!(!FetchError::from_status(404, "not found").is_transient());
        assert!(!FetchError::from_status(400, "").is_transient());
    }
}
