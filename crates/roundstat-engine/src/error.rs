//! Error types for the ingest binary.
//!
//! [`EngineError`] wraps every failure mode of startup and feed handling.
//! Feed-level variants are logged and skipped; startup variants end the
//! process through `anyhow` in `main`.

/// Top-level error for the ingest binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: roundstat_core::config::ConfigError,
    },

    /// Database connection or migration failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying database error.
        #[from]
        source: roundstat_db::DbError,
    },

    /// A feed line was not valid JSON or had an unknown `type`.
    #[error("malformed feed line: {source}")]
    Parse {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// A join line named an invalid participant.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: roundstat_core::session::SessionError,
    },

    /// A fact failed validation.
    #[error("fact rejected: {source}")]
    Fact {
        /// The underlying validation error.
        #[from]
        source: roundstat_types::FactError,
    },

    /// Reading the feed failed.
    #[error("feed I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
