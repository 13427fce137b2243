//! Unified error type for the cache and sync layer
//!
//! This module defines error types that:
//! - Separate transient remote failures from fatal local storage failures
//! - Keep the "state token unusable" condition distinguishable so the
//!   syncer can fall back to a full sync
//! - Carry a plain message so they can cross task boundaries as events

use thiserror::Error;

/// Application error type for the store, syncer and loader
#[derive(Debug, Clone, Error)]
pub enum AnnealError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Network error: {0}")]
    Network(String),

    /// The server refused the supplied state token (too old or unknown).
    #[error("Cannot calculate changes: {0}")]
    CannotCalculateChanges(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl AnnealError {
    /// Remote unreachable or timed out; the next trigger retries from the
    /// same stored token.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnnealError::Network(_))
    }

    /// The stored state token can no longer be replayed.
    pub fn is_stale_state(&self) -> bool {
        matches!(self, AnnealError::CannotCalculateChanges(_))
    }

    /// Local storage failures. Fatal for the operation that hit them.
    pub fn is_local(&self) -> bool {
        matches!(self, AnnealError::Database(_) | AnnealError::Io(_))
    }
}

// Implement From for common error types

impl From<rusqlite::Error> for AnnealError {
    fn from(err: rusqlite::Error) -> Self {
        AnnealError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for AnnealError {
    fn from(err: r2d2::Error) -> Self {
        AnnealError::Database(err.to_string())
    }
}

impl From<std::io::Error> for AnnealError {
    fn from(err: std::io::Error) -> Self {
        AnnealError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AnnealError {
    fn from(err: toml::de::Error) -> Self {
        AnnealError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AnnealError {
    fn from(err: serde_json::Error) -> Self {
        AnnealError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for AnnealError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AnnealError::Parse(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                AnnealError::Auth(err.to_string())
            }
            Some(status) if status.is_client_error() => AnnealError::Remote(err.to_string()),
            _ => AnnealError::Network(err.to_string()),
        }
    }
}

/// Result type alias using AnnealError
pub type Result<T> = std::result::Result<T, AnnealError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(AnnealError::Network("timeout".into()).is_transient());
        assert!(!AnnealError::Database("disk full".into()).is_transient());
        assert!(AnnealError::CannotCalculateChanges("s1".into()).is_stale_state());
        assert!(!AnnealError::CannotCalculateChanges("s1".into()).is_local());
        assert!(AnnealError::Database("locked".into()).is_local());
        assert!(!AnnealError::Parse("bad json".into()).is_local());
    }

    #[test]
    fn test_rusqlite_maps_to_database() {
        let err: AnnealError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, AnnealError::Database(_)));
    }
}
