#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Tenant-scoped database access for the Umroh platform.
//!
//! The crate wraps a sea-orm connection so that module code can only reach
//! tenant-owned rows through an [`AccessScope`](secure::AccessScope):
//!
//! - [`secure`]: scopable entities, typestate queries, guarded writes and the
//!   [`Db`](secure::Db) handle with its unit-of-work binding
//! - [`migration_runner`]: per-module, reversible, history-tracked migrations
//! - [`config`]: connection settings loaded through figment
//!
//! # Features
//! - `sqlite` (default): `SQLite` backend, used for local runs and tests
//! - `pg`: `PostgreSQL` backend, where the unit-of-work binding also feeds
//!   row-level security policies
//!
//! ```ignore
//! use umroh_db::{DbConfig, connect_db};
//!
//! let db = connect_db(&DbConfig::in_memory()).await?;
//! let conn = db.conn()?;
//! ```

extern crate self as umroh_db;

pub mod config;
pub mod migration_runner;
pub mod secure;

pub use config::DbConfig;
pub use secure::{Db, DbConn, DbTx};

use sea_orm::{ConnectOptions, Database};
use thiserror::Error;
use tracing::info;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Typed error for the DB handle and helpers.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown DSN: {0}")]
    UnknownDsn(String),

    #[error("Unsupported database engine: {0}")]
    UnsupportedEngine(&'static str),

    #[error("Feature not enabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `Db::conn()` was called while a transaction is open on this task.
    #[error("non-transactional connection requested inside a transaction")]
    ConnRequestedInsideTx,

    #[error(transparent)]
    Security(#[from] umroh_security::SecurityError),

    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),
}

/// Supported engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbEngine {
    Postgres,
    Sqlite,
}

impl DbEngine {
    /// Detect engine by DSN scheme.
    ///
    /// # Errors
    /// - [`DbError::UnsupportedEngine`] for `mysql://`: partial indexes are part
    ///   of the schema and `MySQL` has none
    /// - [`DbError::UnknownDsn`] for anything else that is not recognized
    pub fn detect(dsn: &str) -> Result<Self> {
        let s = dsn.trim_start();
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if s.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else if s.starts_with("mysql://") {
            Err(DbError::UnsupportedEngine("mysql"))
        } else {
            Err(DbError::UnknownDsn(redact_dsn(dsn)))
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }
}

fn is_memory_dsn(dsn: &str) -> bool {
    dsn.contains(":memory:") || dsn.contains("mode=memory")
}

/// Strip the password out of a DSN before it reaches an error or a log line.
fn redact_dsn(dsn: &str) -> String {
    let Some((scheme, rest)) = dsn.split_once("://") else {
        return dsn.to_owned();
    };
    match rest.split_once('@') {
        Some((creds, host)) => {
            let user = creds.split(':').next().unwrap_or_default();
            format!("{scheme}://{user}:***@{host}")
        }
        None => dsn.to_owned(),
    }
}

/// Connect using `cfg` and wrap the connection in a [`Db`].
///
/// An in-memory `SQLite` database lives inside a single connection, so its pool
/// is pinned to one connection regardless of `max_conns`.
///
/// # Errors
/// Returns an error if the DSN is not supported by the enabled features or the
/// connection cannot be established.
pub async fn connect_db(cfg: &DbConfig) -> Result<Db> {
    let engine = DbEngine::detect(&cfg.dsn)?;
    match engine {
        DbEngine::Postgres if !cfg!(feature = "pg") => {
            return Err(DbError::FeatureDisabled("PostgreSQL feature not enabled"));
        }
        DbEngine::Sqlite if !cfg!(feature = "sqlite") => {
            return Err(DbError::FeatureDisabled("SQLite feature not enabled"));
        }
        _ => {}
    }
    if cfg.max_conns == 0 {
        return Err(DbError::InvalidConfig(
            "max_conns must be at least 1".to_owned(),
        ));
    }

    let max_conns = if engine == DbEngine::Sqlite && is_memory_dsn(&cfg.dsn) {
        1
    } else {
        cfg.max_conns
    };

    let mut opts = ConnectOptions::new(cfg.dsn.clone());
    opts.max_connections(max_conns)
        .acquire_timeout(cfg.acquire_timeout)
        .sqlx_logging(false);

    let conn = Database::connect(opts).await?;
    info!(
        engine = engine.as_str(),
        dsn = %redact_dsn(&cfg.dsn),
        max_conns,
        "database connected"
    );
    Ok(Db::new(conn, engine))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn detects_supported_engines() {
        assert_eq!(
            DbEngine::detect("postgres://u:p@localhost/db").ok(),
            Some(DbEngine::Postgres)
        );
        assert_eq!(
            DbEngine::detect("sqlite::memory:").ok(),
            Some(DbEngine::Sqlite)
        );
        assert!(matches!(
            DbEngine::detect("mysql://localhost/db"),
            Err(DbError::UnsupportedEngine("mysql"))
        ));
        assert!(matches!(
            DbEngine::detect("redis://localhost"),
            Err(DbError::UnknownDsn(_))
        ));
    }

    #[test]
    fn unknown_dsn_error_hides_password() {
        let Err(DbError::UnknownDsn(shown)) = DbEngine::detect("oracle://app:hunter2@db/x") else {
            panic!("expected UnknownDsn");
        };
        assert!(!shown.contains("hunter2"));
        assert_eq!(shown, "oracle://app:***@db/x");
    }

    #[test]
    fn memory_dsn_detection() {
        assert!(is_memory_dsn("sqlite::memory:"));
        assert!(is_memory_dsn("sqlite://file.db?mode=memory"));
        assert!(!is_memory_dsn("sqlite://data/umroh.db?mode=rwc"));
    }

    #[tokio::test]
    async fn zero_pool_size_is_rejected() {
        let cfg = DbConfig {
            max_conns: 0,
            ..DbConfig::in_memory()
        };
        assert!(matches!(
            connect_db(&cfg).await,
            Err(DbError::InvalidConfig(_))
        ));
    }
}
