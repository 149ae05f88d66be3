#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Assignment grants, revocation and the visibility they confer.

mod support;

use std::collections::BTreeSet;

use support::{Agency, ctx_for, seed_agency, setup};
use time::OffsetDateTime;
use tracing_test::traced_test;
use umroh_db::secure::AccessScope;
use umroh_security::Role;
use umroh_tenancy::domain::model::{AssignmentFilter, AssignmentState, GrantRequest, User};
use umroh_tenancy::domain::repos::AssignmentsRepository;
use umroh_tenancy::domain::validator::AssignmentReference;
use umroh_tenancy::infra::storage::OrmAssignmentsRepository;
use umroh_tenancy::{DomainError, Tenancy};
use uuid::Uuid;

struct World {
    t: Tenancy,
    a: Agency,
    ag1: User,
    p1: User,
    p2: User,
    b: Agency,
    ag2: User,
}

async fn world() -> World {
    let t = setup().await;
    let a = seed_agency(&t, "tenant-a").await;
    let b = seed_agency(&t, "tenant-b").await;
    let ag1 = a.add_user(&t, Role::Agent, "ag1").await;
    let p1 = a.add_user(&t, Role::Jamaah, "p1").await;
    let p2 = a.add_user(&t, Role::Jamaah, "p2").await;
    let ag2 = b.add_user(&t, Role::Agent, "ag2").await;
    World {
        t,
        a,
        ag1,
        p1,
        p2,
        b,
        ag2,
    }
}

fn grant(jamaah: &User, agent: &User) -> GrantRequest {
    GrantRequest {
        jamaah_id: jamaah.id,
        agent_id: agent.id,
    }
}

fn ids(users: &[User]) -> BTreeSet<Uuid> {
    users.iter().map(|u| u.id).collect()
}

#[tokio::test]
async fn cross_tenant_agent_is_rejected_without_a_row() {
    let w = world().await;

    let err = w
        .t
        .assignments
        .grant(&w.a.owner_ctx(), grant(&w.p1, &w.ag2))
        .await
        .unwrap_err();
    match err {
        DomainError::CrossTenantReference { reference, detail } => {
            assert_eq!(reference, AssignmentReference::Agent);
            assert!(detail.contains(&w.ag2.id.to_string()));
            assert!(detail.contains(&w.b.id().to_string()));
        }
        other => panic!("expected cross-tenant reference, got {other:?}"),
    }

    let all = w
        .t
        .assignments
        .list_assignments(
            &w.a.owner_ctx(),
            AssignmentFilter {
                include_revoked: true,
                ..AssignmentFilter::default()
            },
        )
        .await
        .unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn unknown_pilgrim_is_reported_first() {
    let w = world().await;
    let err = w
        .t
        .assignments
        .grant(
            &w.a.owner_ctx(),
            GrantRequest {
                jamaah_id: Uuid::new_v4(),
                agent_id: w.ag2.id,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::CrossTenantReference {
            reference: AssignmentReference::Jamaah,
            ..
        }
    ));
}

#[tokio::test]
async fn duplicate_live_grant_conflicts_until_revoked() {
    let w = world().await;
    let owner = w.a.owner_ctx();

    let first = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    assert_eq!(first.tenant_id, w.a.id());
    assert_eq!(first.assigned_by_id, w.a.owner.id);
    assert_eq!(first.state, AssignmentState::Active);

    let err = w
        .t
        .assignments
        .grant(&owner, grant(&w.p1, &w.ag1))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    let revoked = w.t.assignments.revoke(&owner, first.id).await.unwrap();
    assert!(matches!(
        revoked.state,
        AssignmentState::Revoked { by, .. } if by == w.a.owner.id
    ));

    let second = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    assert_ne!(second.id, first.id);
}

#[tokio::test]
async fn revoke_is_idempotent() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let granted = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();

    let once = w.t.assignments.revoke(&owner, granted.id).await.unwrap();
    let twice = w.t.assignments.revoke(&owner, granted.id).await.unwrap();
    assert_eq!(once.state, twice.state);
    assert!(!twice.is_active());
}

#[tokio::test]
async fn a_second_revocation_keeps_the_first_revoker() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let granted = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    let (tenant_id, id) = (w.a.id(), granted.id);
    let (first_by, second_by) = (w.a.owner.id, w.ag1.id);

    let (first, second) = w
        .t
        .db()
        .tenant_unit_of_work(tenant_id, move |tx| {
            Box::pin(async move {
                let repo = OrmAssignmentsRepository::new();
                let scope = AccessScope::tenant(tenant_id);
                let now = OffsetDateTime::now_utc();
                let first = repo.mark_revoked(tx, &scope, id, now, first_by).await?;
                let second = repo.mark_revoked(tx, &scope, id, now, second_by).await?;
                Ok::<_, DomainError>((first, second))
            })
        })
        .await
        .unwrap();
    assert!(first);
    assert!(!second);

    let audit = w
        .t
        .assignments
        .list_assignments(
            &owner,
            AssignmentFilter {
                include_revoked: true,
                ..AssignmentFilter::default()
            },
        )
        .await
        .unwrap();
    let row = audit.iter().find(|r| r.id == id).unwrap();
    assert!(matches!(row.state, AssignmentState::Revoked { by, .. } if by == first_by));

    let err = w.t.assignments.reassign(&owner, id, w.ag1.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
}

#[tokio::test]
async fn agent_sees_exactly_its_assigned_pilgrims() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();

    let agent = ctx_for(&w.ag1);
    let visible = w.t.assignments.visible_jamaah_for(&agent, w.ag1.id).await.unwrap();
    assert_eq!(visible, vec![w.p1.id]);

    let seen = w.t.users.list_jamaah(&agent).await.unwrap();
    assert_eq!(ids(&seen), BTreeSet::from([w.p1.id]));

    // The owner sees every pilgrim of the tenant, assigned or not.
    let all = w.t.users.list_jamaah(&owner).await.unwrap();
    assert_eq!(ids(&all), BTreeSet::from([w.p1.id, w.p2.id]));

    // Unassigned pilgrims are invisible to the agent, one by one too.
    let err = w.t.users.get_user(&agent, w.p2.id).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound { .. }));
    assert_eq!(w.t.users.get_user(&agent, w.p1.id).await.unwrap().id, w.p1.id);
}

#[tokio::test]
async fn revoked_grant_drops_out_of_visibility_but_stays_audited() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let granted = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    w.t.assignments.revoke(&owner, granted.id).await.unwrap();

    let agent = ctx_for(&w.ag1);
    assert!(
        w.t.assignments
            .visible_jamaah_for(&agent, w.ag1.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(w.t.users.list_jamaah(&agent).await.unwrap().is_empty());

    let live = w
        .t
        .assignments
        .list_assignments(&owner, AssignmentFilter::default())
        .await
        .unwrap();
    assert!(live.is_empty());

    let audit = w
        .t
        .assignments
        .list_assignments(
            &owner,
            AssignmentFilter {
                jamaah_id: Some(w.p1.id),
                include_revoked: true,
                ..AssignmentFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].id, granted.id);
    assert!(!audit[0].is_active());
}

#[tokio::test]
async fn visibility_queries_are_limited_to_self_or_elevated() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let ag3 = w.a.add_user(&w.t, Role::Agent, "ag3").await;
    w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();

    // Owner may ask about any agent of the tenant.
    assert_eq!(
        w.t.assignments.visible_jamaah_for(&owner, w.ag1.id).await.unwrap(),
        vec![w.p1.id]
    );
    // Another agent, or a pilgrim, gets nothing.
    assert!(
        w.t.assignments
            .visible_jamaah_for(&ctx_for(&ag3), w.ag1.id)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        w.t.assignments
            .visible_jamaah_for(&ctx_for(&w.p1), w.ag1.id)
            .await
            .unwrap()
            .is_empty()
    );
    // Tenant B cannot see tenant A's grants.
    assert!(
        w.t.assignments
            .visible_jamaah_for(&w.b.owner_ctx(), w.ag1.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn agents_list_only_their_own_grants() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let ag3 = w.a.add_user(&w.t, Role::Agent, "ag3").await;
    w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    w.t.assignments.grant(&owner, grant(&w.p2, &ag3)).await.unwrap();

    let mine = w
        .t
        .assignments
        .list_assignments(&ctx_for(&w.ag1), AssignmentFilter::default())
        .await
        .unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].agent_id, w.ag1.id);

    let all = w
        .t
        .assignments
        .list_assignments(&owner, AssignmentFilter::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn reassign_revokes_and_grants_together() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let ag3 = w.a.add_user(&w.t, Role::Agent, "ag3").await;
    let first = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();

    let moved = w.t.assignments.reassign(&owner, first.id, ag3.id).await.unwrap();
    assert_eq!(moved.jamaah_id, w.p1.id);
    assert_eq!(moved.agent_id, ag3.id);

    let history = w
        .t
        .assignments
        .list_assignments(
            &owner,
            AssignmentFilter {
                jamaah_id: Some(w.p1.id),
                include_revoked: true,
                ..AssignmentFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history.iter().filter(|a| a.is_active()).count(), 1);

    // Reassigning a revoked grant is refused.
    let err = w.t.assignments.reassign(&owner, first.id, w.ag1.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
}

#[tokio::test]
async fn failed_reassign_keeps_the_original_grant() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let first = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();

    let err = w.t.assignments.reassign(&owner, first.id, w.ag2.id).await.unwrap_err();
    assert!(matches!(err, DomainError::CrossTenantReference { .. }));

    let visible = w
        .t
        .assignments
        .visible_jamaah_for(&owner, w.ag1.id)
        .await
        .unwrap();
    assert_eq!(visible, vec![w.p1.id]);
}

#[tokio::test]
async fn grants_need_an_elevated_caller_and_matching_roles() {
    let w = world().await;

    let err = w
        .t
        .assignments
        .grant(&ctx_for(&w.ag1), grant(&w.p1, &w.ag1))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Forbidden(_)));

    // Pilgrim and agent swapped.
    let err = w
        .t
        .assignments
        .grant(
            &w.a.owner_ctx(),
            GrantRequest {
                jamaah_id: w.ag1.id,
                agent_id: w.p1.id,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation { .. }));
}

#[tokio::test]
#[traced_test]
async fn grants_and_revocations_are_audited() {
    let w = world().await;
    let owner = w.a.owner_ctx();
    let granted = w.t.assignments.grant(&owner, grant(&w.p1, &w.ag1)).await.unwrap();
    w.t.assignments.revoke(&owner, granted.id).await.unwrap();

    assert!(logs_contain("assignment granted"));
    assert!(logs_contain("assignment revoked"));
    assert!(logs_contain(&granted.id.to_string()));
}
