//! Referential integrity of assignments.
//!
//! An assignment names three users: the pilgrim, the agent and the assigner.
//! All three must live in the assignment's own tenant. The check is a pure
//! function over the owning tenant of each referenced id, so the service can
//! run it inside the same unit of work that performs the insert, before
//! anything is written.

use std::collections::HashMap;
use std::fmt;

use uuid::Uuid;

/// Which reference of an assignment failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentReference {
    Jamaah,
    Agent,
    AssignedBy,
    RevokedBy,
}

impl AssignmentReference {
    /// Column carrying the reference.
    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Jamaah => "jamaah_id",
            Self::Agent => "agent_id",
            Self::AssignedBy => "assigned_by_id",
            Self::RevokedBy => "revoked_by_id",
        }
    }

    /// Inverse of [`column`](Self::column).
    #[must_use]
    pub fn from_column(column: &str) -> Option<Self> {
        [Self::Jamaah, Self::Agent, Self::AssignedBy, Self::RevokedBy]
            .into_iter()
            .find(|r| r.column() == column)
    }
}

impl fmt::Display for AssignmentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceProblem {
    /// No such user is visible.
    Missing,
    /// The user belongs to `tenant_id`, not the assignment's tenant.
    OtherTenant { tenant_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reference} {id} {}", describe(.problem))]
pub struct ReferenceViolation {
    pub reference: AssignmentReference,
    pub id: Uuid,
    pub problem: ReferenceProblem,
}

fn describe(problem: &ReferenceProblem) -> String {
    match *problem {
        ReferenceProblem::Missing => "does not resolve to a user".to_owned(),
        ReferenceProblem::OtherTenant { tenant_id } => {
            format!("belongs to tenant {tenant_id}")
        }
    }
}

/// The references of an assignment about to be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposedAssignment {
    pub jamaah_id: Uuid,
    pub agent_id: Uuid,
    pub assigned_by_id: Uuid,
}

impl ProposedAssignment {
    #[must_use]
    pub fn referenced_ids(&self) -> [Uuid; 3] {
        [self.jamaah_id, self.agent_id, self.assigned_by_id]
    }
}

/// Owning tenant of each referenced user id, as read from storage.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTenants(HashMap<Uuid, Uuid>);

impl ReferenceTenants {
    #[must_use]
    pub fn new(owners: HashMap<Uuid, Uuid>) -> Self {
        Self(owners)
    }

    #[must_use]
    pub fn tenant_of(&self, id: Uuid) -> Option<Uuid> {
        self.0.get(&id).copied()
    }
}

/// An assignment whose references were checked against `tenant_id`.
///
/// Only [`validate_assignment_references`] creates one, so holding it is
/// proof the check ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedAssignment {
    tenant_id: Uuid,
    refs: ProposedAssignment,
}

impl ValidatedAssignment {
    #[must_use]
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    #[must_use]
    pub fn jamaah_id(&self) -> Uuid {
        self.refs.jamaah_id
    }

    #[must_use]
    pub fn agent_id(&self) -> Uuid {
        self.refs.agent_id
    }

    #[must_use]
    pub fn assigned_by_id(&self) -> Uuid {
        self.refs.assigned_by_id
    }
}

/// Check a single reference.
///
/// # Errors
/// Returns the violation when `id` is unknown or owned by another tenant.
pub fn check_reference(
    tenant_id: Uuid,
    reference: AssignmentReference,
    id: Uuid,
    tenants: &ReferenceTenants,
) -> Result<(), ReferenceViolation> {
    match tenants.tenant_of(id) {
        Some(owner) if owner == tenant_id => Ok(()),
        Some(owner) => Err(ReferenceViolation {
            reference,
            id,
            problem: ReferenceProblem::OtherTenant { tenant_id: owner },
        }),
        None => Err(ReferenceViolation {
            reference,
            id,
            problem: ReferenceProblem::Missing,
        }),
    }
}

/// Check jamaah, agent and assigner, in that order, against `tenant_id`.
///
/// # Errors
/// Returns the first failing reference.
pub fn validate_assignment_references(
    tenant_id: Uuid,
    proposal: &ProposedAssignment,
    tenants: &ReferenceTenants,
) -> Result<ValidatedAssignment, ReferenceViolation> {
    check_reference(tenant_id, AssignmentReference::Jamaah, proposal.jamaah_id, tenants)?;
    check_reference(tenant_id, AssignmentReference::Agent, proposal.agent_id, tenants)?;
    check_reference(
        tenant_id,
        AssignmentReference::AssignedBy,
        proposal.assigned_by_id,
        tenants,
    )?;
    Ok(ValidatedAssignment {
        tenant_id,
        refs: *proposal,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    struct Fixture {
        tenant_a: Uuid,
        tenant_b: Uuid,
        p1: Uuid,
        ag1: Uuid,
        ag2: Uuid,
        owner: Uuid,
        tenants: ReferenceTenants,
    }

    fn fixture() -> Fixture {
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (p1, ag1, ag2, owner) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let tenants = ReferenceTenants::new(HashMap::from([
            (p1, tenant_a),
            (ag1, tenant_a),
            (owner, tenant_a),
            (ag2, tenant_b),
        ]));
        Fixture {
            tenant_a,
            tenant_b,
            p1,
            ag1,
            ag2,
            owner,
            tenants,
        }
    }

    #[test]
    fn same_tenant_references_pass() {
        let f = fixture();
        let proposal = ProposedAssignment {
            jamaah_id: f.p1,
            agent_id: f.ag1,
            assigned_by_id: f.owner,
        };
        let v = validate_assignment_references(f.tenant_a, &proposal, &f.tenants).unwrap();
        assert_eq!(v.tenant_id(), f.tenant_a);
        assert_eq!(v.agent_id(), f.ag1);
    }

    #[test]
    fn cross_tenant_agent_is_named() {
        let f = fixture();
        let proposal = ProposedAssignment {
            jamaah_id: f.p1,
            agent_id: f.ag2,
            assigned_by_id: f.owner,
        };
        let err = validate_assignment_references(f.tenant_a, &proposal, &f.tenants).unwrap_err();
        assert_eq!(err.reference, AssignmentReference::Agent);
        assert_eq!(err.id, f.ag2);
        assert_eq!(
            err.problem,
            ReferenceProblem::OtherTenant {
                tenant_id: f.tenant_b
            }
        );
        assert!(err.to_string().starts_with("agent_id "));
    }

    #[test]
    fn jamaah_is_checked_first() {
        let f = fixture();
        let proposal = ProposedAssignment {
            jamaah_id: Uuid::new_v4(),
            agent_id: f.ag2,
            assigned_by_id: Uuid::new_v4(),
        };
        let err = validate_assignment_references(f.tenant_a, &proposal, &f.tenants).unwrap_err();
        assert_eq!(err.reference, AssignmentReference::Jamaah);
        assert_eq!(err.problem, ReferenceProblem::Missing);
    }

    #[test]
    fn assigner_from_other_tenant_is_rejected() {
        let f = fixture();
        let proposal = ProposedAssignment {
            jamaah_id: f.p1,
            agent_id: f.ag1,
            assigned_by_id: f.ag2,
        };
        let err = validate_assignment_references(f.tenant_a, &proposal, &f.tenants).unwrap_err();
        assert_eq!(err.reference, AssignmentReference::AssignedBy);
    }

    #[test]
    fn columns_round_trip() {
        for r in [
            AssignmentReference::Jamaah,
            AssignmentReference::Agent,
            AssignmentReference::AssignedBy,
            AssignmentReference::RevokedBy,
        ] {
            assert_eq!(AssignmentReference::from_column(r.column()), Some(r));
        }
        assert_eq!(AssignmentReference::from_column("tenant_id"), None);
    }
}
