//! Transaction settings that do not leak sea-orm types to module code.

use sea_orm::{AccessMode, IsolationLevel};

/// Transaction isolation level.
///
/// `SQLite` only knows serializable transactions; other levels are accepted
/// and behave as serializable there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxIsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Transaction access mode. Read-only is enforced by `PostgreSQL` and is a
/// hint elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxAccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Configuration for a unit of work. `None` keeps the database default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConfig {
    pub isolation: Option<TxIsolationLevel>,
    pub access_mode: Option<TxAccessMode>,
}

impl TxConfig {
    #[must_use]
    pub fn with_isolation(isolation: TxIsolationLevel) -> Self {
        Self {
            isolation: Some(isolation),
            access_mode: None,
        }
    }

    #[must_use]
    pub fn read_only() -> Self {
        Self {
            isolation: None,
            access_mode: Some(TxAccessMode::ReadOnly),
        }
    }

    /// Serializable isolation, for read-check-write sequences such as
    /// revoke-then-grant.
    #[must_use]
    pub fn serializable() -> Self {
        Self::with_isolation(TxIsolationLevel::Serializable)
    }
}

impl From<TxIsolationLevel> for IsolationLevel {
    fn from(level: TxIsolationLevel) -> Self {
        match level {
            TxIsolationLevel::ReadUncommitted => IsolationLevel::ReadUncommitted,
            TxIsolationLevel::ReadCommitted => IsolationLevel::ReadCommitted,
            TxIsolationLevel::RepeatableRead => IsolationLevel::RepeatableRead,
            TxIsolationLevel::Serializable => IsolationLevel::Serializable,
        }
    }
}

impl From<TxAccessMode> for AccessMode {
    fn from(mode: TxAccessMode) -> Self {
        match mode {
            TxAccessMode::ReadOnly => AccessMode::ReadOnly,
            TxAccessMode::ReadWrite => AccessMode::ReadWrite,
        }
    }
}
