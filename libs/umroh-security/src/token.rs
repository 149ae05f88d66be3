//! Access tokens carrying the authorization context.
//!
//! Tokens are HS256 JWTs. The claims name the session (`sid`) so the context
//! resolver can reject tokens whose session has been revoked.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{AuthorizationContext, Role};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid claim '{field}': {reason}")]
    InvalidClaim { field: &'static str, reason: String },

    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id.
    pub sub: Uuid,
    /// Tenant id.
    pub tid: Uuid,
    pub role: Role,
    /// Session id.
    pub sid: Uuid,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessClaims {
    /// The context these claims assert. Callers must still confirm the session
    /// and user are live before trusting it.
    #[must_use]
    pub fn context(&self) -> AuthorizationContext {
        AuthorizationContext::builder()
            .tenant_id(self.tid)
            .user_id(self.sub)
            .role(self.role)
            .build()
    }
}

/// Signs and verifies access tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    ttl: Duration,
    leeway_seconds: u64,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    #[must_use]
    pub fn new(issuer: &str, secret: &SecretString, ttl: Duration, leeway_seconds: u64) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        Self {
            issuer: issuer.to_owned(),
            ttl,
            leeway_seconds,
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token for `user_id` in `tenant_id` bound to `session_id`.
    ///
    /// # Errors
    /// Returns [`TokenError::InvalidClaim`] when `now` plus the lifetime is
    /// not a representable time, [`TokenError::Signing`] if encoding fails.
    pub fn issue(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: Role,
        session_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<(String, AccessClaims), TokenError> {
        let exp = time::Duration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| TokenError::InvalidClaim {
                field: "exp",
                reason: format!("lifetime {:?} from {now} is out of range", self.ttl),
            })?;
        let claims = AccessClaims {
            sub: user_id,
            tid: tenant_id,
            role,
            sid: session_id,
            iss: self.issuer.clone(),
            iat: now.unix_timestamp(),
            exp: exp.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        Ok((token, claims))
    }

    /// Verify signature, issuer and expiry, then sanity-check the ids.
    ///
    /// # Errors
    /// Returns a [`TokenError`] describing the first failed check.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = self.leeway_seconds;

        let data = decode::<AccessClaims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;

        let claims = data.claims;
        for (field, id) in [("sub", claims.sub), ("tid", claims.tid), ("sid", claims.sid)] {
            if id.is_nil() {
                return Err(TokenError::InvalidClaim {
                    field,
                    reason: "must not be the nil uuid".to_owned(),
                });
            }
        }
        Ok(claims)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn codec(secret: &str) -> TokenCodec {
        TokenCodec::new(
            "umroh-test",
            &SecretString::from(secret),
            Duration::from_secs(900),
            0,
        )
    }

    #[test]
    fn issued_token_verifies_and_carries_context() {
        let c = codec("s3cret-for-tests-only");
        let (tenant, user, session) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (token, issued) = c
            .issue(tenant, user, Role::Agent, session, OffsetDateTime::now_utc())
            .unwrap();

        let claims = c.verify(&token).unwrap();
        assert_eq!(claims, issued);
        let ctx = claims.context();
        assert_eq!(ctx.tenant_id(), tenant);
        assert_eq!(ctx.user_id(), user);
        assert_eq!(ctx.role(), Some(Role::Agent));
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let (token, _) = codec("first-secret")
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Role::Admin,
                Uuid::new_v4(),
                OffsetDateTime::now_utc(),
            )
            .unwrap();
        assert_eq!(
            codec("second-secret").verify(&token),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let c = codec("s3cret-for-tests-only");
        let issued_at = OffsetDateTime::now_utc() - time::Duration::hours(2);
        let (token, _) = c
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Role::Admin,
                Uuid::new_v4(),
                issued_at,
            )
            .unwrap();
        assert_eq!(c.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn nil_tenant_is_rejected() {
        let c = codec("s3cret-for-tests-only");
        let (token, _) = c
            .issue(
                Uuid::nil(),
                Uuid::new_v4(),
                Role::Admin,
                Uuid::new_v4(),
                OffsetDateTime::now_utc(),
            )
            .unwrap();
        assert!(matches!(
            c.verify(&token),
            Err(TokenError::InvalidClaim { field: "tid", .. })
        ));
    }

    #[test]
    fn lifetime_past_the_calendar_is_an_error() {
        let c = TokenCodec::new(
            "umroh-test",
            &SecretString::from("s3cret-for-tests-only"),
            Duration::from_secs(u64::MAX / 2),
            0,
        );
        let err = c
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                Role::Admin,
                Uuid::new_v4(),
                OffsetDateTime::now_utc(),
            )
            .unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaim { field: "exp", .. }));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            codec("x").verify("not-a-jwt"),
            Err(TokenError::Malformed(_))
        ));
    }
}
