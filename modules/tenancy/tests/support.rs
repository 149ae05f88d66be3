#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Test support for the tenancy integration tests.
//!
//! Builds the module over a fresh `SQLite` database and seeds agencies through
//! the public services, so every fixture row passed the same checks a real
//! caller's would.

#![allow(dead_code)] // Not every test file uses every helper

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use umroh_db::{Db, DbConfig, connect_db};
use umroh_security::{AuthorizationContext, Role};
use umroh_tenancy::domain::model::{NewTenant, NewUser, Tenant, TenantTier, User};
use umroh_tenancy::{LoginPolicy, Tenancy, TenancyConfig, TokenConfig};
use uuid::Uuid;

pub const SECRET: &str = "test-signing-secret-0123456789abcdef";

/// Config with a valid secret and a lockout after three failures.
#[must_use]
pub fn config() -> TenancyConfig {
    TenancyConfig {
        database: DbConfig::in_memory(),
        tokens: TokenConfig {
            signing_secret: SecretString::from(SECRET),
            leeway_seconds: 0,
            ..TokenConfig::default()
        },
        login: LoginPolicy {
            max_failed_attempts: 3,
            lockout: Duration::from_secs(15 * 60),
        },
    }
}

/// The module over a fresh in-memory database with migrations applied.
pub async fn setup() -> Tenancy {
    Tenancy::init(&config()).await.expect("tenancy init")
}

/// DSN of a file database at `path`, created on first connect.
#[must_use]
pub fn file_dsn(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

/// Connect to a file database without migrating it.
pub async fn file_db(path: &Path) -> Db {
    let cfg = DbConfig {
        dsn: file_dsn(path),
        max_conns: 1,
        ..DbConfig::default()
    };
    connect_db(&cfg).await.expect("connect file db")
}

#[must_use]
pub fn ctx(tenant_id: Uuid, user_id: Uuid, role: Role) -> AuthorizationContext {
    AuthorizationContext::builder()
        .tenant_id(tenant_id)
        .user_id(user_id)
        .role(role)
        .build()
}

#[must_use]
pub fn ctx_for(user: &User) -> AuthorizationContext {
    ctx(user.tenant_id, user.id, user.role)
}

/// A platform operator. Its home tenant does not need to exist.
#[must_use]
pub fn super_admin() -> AuthorizationContext {
    ctx(Uuid::new_v4(), Uuid::new_v4(), Role::SuperAdmin)
}

/// A registered tenant with its owner.
#[derive(Debug, Clone)]
pub struct Agency {
    pub tenant: Tenant,
    pub owner: User,
}

impl Agency {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.tenant.id
    }

    #[must_use]
    pub fn owner_ctx(&self) -> AuthorizationContext {
        ctx_for(&self.owner)
    }

    pub async fn add_user(&self, t: &Tenancy, role: Role, name: &str) -> User {
        t.users
            .create_user(
                &self.owner_ctx(),
                NewUser {
                    email: format!("{name}@{}.test", self.tenant.slug),
                    full_name: name.to_owned(),
                    phone: None,
                    role,
                },
            )
            .await
            .expect("create user")
    }
}

pub fn new_tenant(slug: &str) -> NewTenant {
    NewTenant {
        name: format!("{slug} travel"),
        slug: slug.to_owned(),
        tier: TenantTier::Basic,
        owner_email: Some(format!("owner@{slug}.test")),
        owner_phone: None,
        limits: None,
    }
}

/// Register a tenant and create its `agency_owner`.
pub async fn seed_agency(t: &Tenancy, slug: &str) -> Agency {
    let tenant = t
        .tenants
        .create(&super_admin(), new_tenant(slug))
        .await
        .expect("create tenant");

    // The first owner is created by a bootstrap context of the new tenant.
    let bootstrap = ctx(tenant.id, Uuid::new_v4(), Role::AgencyOwner);
    let owner = t
        .users
        .create_user(
            &bootstrap,
            NewUser {
                email: format!("owner@{slug}.test"),
                full_name: "Owner".to_owned(),
                phone: None,
                role: Role::AgencyOwner,
            },
        )
        .await
        .expect("create owner");

    Agency { tenant, owner }
}
