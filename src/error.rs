//! Error taxonomy for the research pipeline.
//!
//! Provider errors are classified because the class decides retry/backoff.
//! Ledger and analyzer errors never escape their module: they are logged and
//! recovered locally (backup file, empty ledger, heuristic fallback).

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Coarse class of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Auth,
    RateLimit,
    Connection,
    Timeout,
    Other,
    CircuitOpen,
    Cancelled,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Auth => "auth",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Connection => "connection",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Other => "other",
            ErrorClass::CircuitOpen => "circuit_open",
            ErrorClass::Cancelled => "cancelled",
        }
    }
}

/// Typed failure of a single provider call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
    #[error("circuit open; call skipped")]
    CircuitOpen,
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Auth(_) => ErrorClass::Auth,
            ProviderError::RateLimit(_) => ErrorClass::RateLimit,
            ProviderError::Connection(_) => ErrorClass::Connection,
            ProviderError::Timeout => ErrorClass::Timeout,
            ProviderError::Other(_) => ErrorClass::Other,
            ProviderError::CircuitOpen => ErrorClass::CircuitOpen,
            ProviderError::Cancelled => ErrorClass::Cancelled,
        }
    }

    /// Transient failures (connection, rate limit, timeout) may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RateLimit | ErrorClass::Connection | ErrorClass::Timeout
        )
    }
}

/// Pre-condition failures of a whole fan-out call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FanoutError {
    #[error("research content is empty")]
    EmptyContent,
    #[error("no research providers configured")]
    NoProviders,
}

/// Internal ledger persistence failure.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Analyzer output could not be used; callers fall back to the heuristic.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analyzer provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("malformed analyzer output: {0}")]
    Malformed(String),
}
