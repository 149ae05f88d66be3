#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Tenant isolation and fail-closed behavior of reads and writes.

mod support;

use support::{ctx, seed_agency, setup};
use umroh_db::secure::AccessScope;
use umroh_security::{AuthorizationContext, Role};
use umroh_tenancy::DomainError;
use umroh_tenancy::domain::model::{NewUser, UserStatus};
use umroh_tenancy::domain::repos::UsersRepository;
use umroh_tenancy::infra::storage::OrmUsersRepository;
use uuid::Uuid;

#[tokio::test]
async fn reading_another_tenants_row_returns_nothing() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let b = seed_agency(&t, "tenant-b").await;
    let p_b = b.add_user(&t, Role::Jamaah, "pilgrim").await;

    // Repository level: the row is simply absent.
    let repo = OrmUsersRepository::new();
    let scope = a.owner_ctx().scope().prepare();
    let found = t
        .db()
        .unit_of_work(&a.owner_ctx(), move |tx| {
            Box::pin(async move { repo.get(tx, &scope, p_b.id).await })
        })
        .await
        .unwrap();
    assert!(found.is_none());

    // Service level: absent and out of scope look the same.
    let err = t.users.get_user(&a.owner_ctx(), p_b.id).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { entity: "user", .. }));
}

#[tokio::test]
async fn listings_only_contain_the_bound_tenant() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let b = seed_agency(&t, "tenant-b").await;
    a.add_user(&t, Role::Agent, "ag1").await;
    a.add_user(&t, Role::Jamaah, "p1").await;
    b.add_user(&t, Role::Agent, "ag2").await;
    b.add_user(&t, Role::Jamaah, "p2").await;

    for agency in [&a, &b] {
        let users = t.users.list_users(&agency.owner_ctx(), None).await.unwrap();
        assert_eq!(users.len(), 3);
        assert!(users.iter().all(|u| u.tenant_id == agency.id()));
    }
}

#[tokio::test]
async fn unbound_context_is_rejected_before_touching_storage() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    a.add_user(&t, Role::Jamaah, "p1").await;

    let anon = AuthorizationContext::anonymous();
    let err = t.users.list_users(&anon, None).await.unwrap_err();
    assert!(matches!(err, DomainError::IsolationViolation(_)));

    // A context missing its user is just as unbound.
    let tenant_only = AuthorizationContext::builder()
        .tenant_id(a.id())
        .role(Role::AgencyOwner)
        .build();
    let err = t.users.list_jamaah(&tenant_only).await.unwrap_err();
    assert!(matches!(err, DomainError::IsolationViolation(_)));

    let err = t
        .users
        .create_user(
            &anon,
            NewUser {
                email: "ghost@tenant-a.test".to_owned(),
                full_name: "Ghost".to_owned(),
                phone: None,
                role: Role::Jamaah,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::IsolationViolation(_)));
}

#[tokio::test]
async fn deny_all_scope_reads_empty() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    a.add_user(&t, Role::Jamaah, "p1").await;

    let repo = OrmUsersRepository::new();
    let rows = t
        .db()
        .tenant_unit_of_work(a.id(), move |tx| {
            Box::pin(async move { repo.list(tx, &AccessScope::deny_all(), None).await })
        })
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn nil_tenant_unit_of_work_fails_closed() {
    let t = setup().await;
    let err = t
        .users
        .record_login_failure(Uuid::nil(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::IsolationViolation(_)));
}

#[tokio::test]
async fn writes_outside_the_bound_tenant_are_rejected() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let b = seed_agency(&t, "tenant-b").await;
    let p_b = b.add_user(&t, Role::Jamaah, "pilgrim").await;

    let err = t
        .users
        .set_status(&a.owner_ctx(), p_b.id, UserStatus::Suspended)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));

    let untouched = t.users.get_user(&b.owner_ctx(), p_b.id).await.unwrap();
    assert_eq!(untouched.status, UserStatus::Active);
}

#[tokio::test]
async fn non_elevated_roles_cannot_create_users() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let agent = a.add_user(&t, Role::Agent, "ag1").await;

    let err = t
        .users
        .create_user(
            &support::ctx_for(&agent),
            NewUser {
                email: "p9@tenant-a.test".to_owned(),
                full_name: "P9".to_owned(),
                phone: None,
                role: Role::Jamaah,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));

    let err = t
        .users
        .create_user(
            &a.owner_ctx(),
            NewUser {
                email: "root@tenant-a.test".to_owned(),
                full_name: "Root".to_owned(),
                phone: None,
                role: Role::SuperAdmin,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));
}

#[tokio::test]
async fn email_is_unique_per_tenant_only() {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let b = seed_agency(&t, "tenant-b").await;

    let new = |email: &str| NewUser {
        email: email.to_owned(),
        full_name: "Siti".to_owned(),
        phone: None,
        role: Role::Jamaah,
    };

    t.users
        .create_user(&a.owner_ctx(), new("siti@mail.test"))
        .await
        .unwrap();
    let err = t
        .users
        .create_user(&a.owner_ctx(), new("  SITI@mail.test"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    // Same address in another tenant is a different person.
    t.users
        .create_user(&b.owner_ctx(), new("siti@mail.test"))
        .await
        .unwrap();

    // A context claiming tenant B for a user of A cannot see A's rows either.
    let forged = ctx(b.id(), a.owner.id, Role::AgencyOwner);
    let seen = t.users.list_users(&forged, None).await.unwrap();
    assert!(seen.iter().all(|u| u.tenant_id == b.id()));
}
