//! Domain service layer - business logic and rules.
//!
//! One service per resource:
//! - `tenants` - tenant registry, lifecycle and domain verification
//! - `users` - identities inside a tenant and login lockout
//! - `sessions` - refresh-token sessions and access-token issuance
//! - `context` - turns an access token into an authorization context
//! - `assignments` - agent-to-pilgrim grants and the visibility they confer
//!
//! Every operation opens exactly one unit of work on [`Db`](umroh_db::Db)
//! and prepares its scope from the caller's context before touching a
//! repository.

use std::time::Duration;

use rand::Rng;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner};
use umroh_security::{AuthorizationContext, Role};

use crate::domain::error::DomainError;
use crate::domain::repos::AssignmentsRepository;

mod assignments;
mod context;
mod sessions;
mod tenants;
mod users;

pub use assignments::AssignmentService;
pub use context::ContextResolver;
pub use sessions::SessionService;
pub use tenants::TenantService;
pub use users::UserService;

/// Build the scope for `ctx`, resolving an agent's visible pilgrims inside
/// the same unit of work that will use it.
pub(crate) async fn scope_for<AR, C>(
    ctx: &AuthorizationContext,
    assignments: &AR,
    conn: &C,
) -> Result<AccessScope, DomainError>
where
    AR: AssignmentsRepository,
    C: DBRunner,
{
    let resolver = ctx.scope();
    if !resolver.needs_visible_jamaah() {
        return Ok(resolver.prepare());
    }
    // The agent's own scope already narrows assignments to its rows.
    let own = ctx.scope().prepare();
    let visible = assignments
        .visible_jamaah(conn, &own, ctx.user_id())
        .await?;
    Ok(resolver.include_visible_jamaah(visible).prepare())
}

/// The caller's role, provided it is one of the elevated ones.
pub(crate) fn require_elevated(
    ctx: &AuthorizationContext,
    action: &str,
) -> Result<Role, DomainError> {
    let role = ctx.ensure_bound()?;
    if role.is_elevated() {
        Ok(role)
    } else {
        Err(DomainError::forbidden(format!(
            "role '{role}' may not {action}"
        )))
    }
}

pub(crate) fn after(now: OffsetDateTime, d: Duration) -> Result<OffsetDateTime, DomainError> {
    time::Duration::try_from(d)
        .ok()
        .and_then(|d| now.checked_add(d))
        .ok_or_else(|| DomainError::validation("duration", "out of range"))
}

/// 32 random bytes, hex-encoded.
pub(crate) fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// SHA-256 of `raw`, hex-encoded. This is what gets stored.
pub(crate) fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

/// Compare two secrets without an early exit on the first differing byte.
pub(crate) fn tokens_match(expected: &str, presented: &str) -> bool {
    let a = Sha256::digest(expected.as_bytes());
    let b = Sha256::digest(presented.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn refresh_tokens_are_random_hex() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_is_stable_and_not_the_token() {
        let t = random_token();
        assert_eq!(hash_token(&t), hash_token(&t));
        assert_ne!(hash_token(&t), t);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "abcd"));
    }

    #[test]
    fn agent_is_not_elevated() {
        let ctx = AuthorizationContext::builder()
            .tenant_id(Uuid::new_v4())
            .user_id(Uuid::new_v4())
            .role(Role::Agent)
            .build();
        assert!(matches!(
            require_elevated(&ctx, "grant assignments"),
            Err(DomainError::Forbidden(_))
        ));
        assert!(matches!(
            require_elevated(&AuthorizationContext::anonymous(), "grant assignments"),
            Err(DomainError::IsolationViolation(_))
        ));
    }

    #[test]
    fn huge_durations_are_rejected() {
        let now = OffsetDateTime::now_utc();
        assert!(after(now, Duration::from_secs(60)).is_ok());
        assert!(after(now, Duration::from_secs(u64::MAX)).is_err());
    }
}
