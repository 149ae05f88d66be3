//! Database connection configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// `postgres://...` or `sqlite:...`. Passwords are redacted before logging.
    pub dsn: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_conns")]
    pub max_conns: u32,

    /// Timeout to acquire a connection from the pool.
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

fn default_dsn() -> String {
    "sqlite://data/umroh.db?mode=rwc".to_owned()
}

fn default_max_conns() -> u32 {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: default_dsn(),
            max_conns: default_max_conns(),
            acquire_timeout: default_acquire_timeout(),
        }
    }
}

impl DbConfig {
    /// A private in-memory `SQLite` database, used by tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            dsn: "sqlite::memory:".to_owned(),
            max_conns: 1,
            ..Self::default()
        }
    }
}
