//! Module configuration, loaded with figment.
//!
//! Sources, later ones win: built-in defaults, an optional YAML file, then
//! environment variables prefixed with `UMROH__` (`__` separates nesting
//! levels, e.g. `UMROH__TOKENS__ACCESS_TTL=10m`).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use umroh_db::DbConfig;

/// Minimum length of the HS256 signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Upper bound for token lifetimes and the lockout period (ten years).
pub const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TenancyConfig {
    pub database: DbConfig,
    pub tokens: TokenConfig,
    pub login: LoginPolicy,
}

/// Access and refresh token settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// HS256 key. Never logged; must be at least [`MIN_SECRET_LEN`] bytes.
    #[serde(deserialize_with = "deserialize_secret")]
    pub signing_secret: SecretString,

    #[serde(default = "default_access_ttl", with = "humantime_serde")]
    pub access_ttl: Duration,

    #[serde(default = "default_refresh_ttl", with = "humantime_serde")]
    pub refresh_ttl: Duration,

    /// Clock skew tolerated when checking `exp`.
    #[serde(default = "default_leeway_seconds")]
    pub leeway_seconds: u64,
}

/// Failed-login lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoginPolicy {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,

    #[serde(default = "default_lockout", with = "humantime_serde")]
    pub lockout: Duration,
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn default_issuer() -> String {
    "umroh".to_owned()
}

fn default_access_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_refresh_ttl() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_leeway_seconds() -> u64 {
    30
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            signing_secret: SecretString::from(String::new()),
            access_ttl: default_access_ttl(),
            refresh_ttl: default_refresh_ttl(),
            leeway_seconds: default_leeway_seconds(),
        }
    }
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            lockout: default_lockout(),
        }
    }
}

impl TenancyConfig {
    /// Load from an optional YAML file and the `UMROH__` environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] when a source cannot be parsed and
    /// [`ConfigError::Invalid`] when the result fails [`validate`](Self::validate).
    pub fn load(yaml: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = yaml {
            figment = figment.merge(Yaml::file(path));
        }
        let cfg: Self = figment
            .merge(Env::prefixed("UMROH__").split("__"))
            .extract()
            .map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    /// Returns [`ConfigError::Invalid`] for a short signing secret, a token
    /// lifetime that is zero or above [`MAX_LIFETIME`], a lockout above
    /// [`MAX_LIFETIME`] or a zero attempt limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.signing_secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "tokens.signing_secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.tokens.access_ttl.is_zero() || self.tokens.refresh_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "token lifetimes must be positive".to_owned(),
            ));
        }
        let longest = self.tokens.access_ttl.max(self.tokens.refresh_ttl).max(self.login.lockout);
        if longest > MAX_LIFETIME {
            return Err(ConfigError::Invalid(format!(
                "token lifetimes and login.lockout must not exceed {} days",
                MAX_LIFETIME.as_secs() / 86_400
            )));
        }
        if self.login.max_failed_attempts == 0 {
            return Err(ConfigError::Invalid(
                "login.max_failed_attempts must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
