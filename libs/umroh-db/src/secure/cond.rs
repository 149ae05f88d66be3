use sea_orm::{ColumnTrait, Condition, sea_query::Expr};

use crate::secure::{AccessScope, ScopableEntity};

/// Builds the isolation predicate of `E` for `scope`.
///
/// # Rules
/// 1. Empty scope → `false`.
/// 2. Root scope → no tenant predicate.
/// 3. Otherwise `tenant_col IN (tenants)`; an entity without a tenant column
///    → `false`.
/// 4. With a subject constraint, entities that declare `owner_col` and/or
///    `jamaah_col` additionally need `owner_col = owner OR jamaah_col IN (..)`.
///    An empty pilgrim set contributes no disjunct. When no disjunct remains
///    → `false`.
/// 5. Parts are ANDed.
#[must_use]
pub fn build_scope_condition<E>(scope: &AccessScope) -> Condition
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
{
    let deny_all = || Condition::all().add(Expr::value(false));

    if scope.is_empty() {
        return deny_all();
    }
    if E::IS_UNRESTRICTED {
        return Condition::all();
    }

    let mut cond = Condition::all();

    if !scope.is_root() {
        let Some(tenant_col) = E::tenant_col() else {
            return deny_all();
        };
        cond = cond.add(tenant_col.is_in(scope.tenant_ids().iter().copied()));
    }

    let Some(subject) = scope.subject() else {
        return cond;
    };
    let owner_col = E::owner_col();
    let jamaah_col = E::jamaah_col();
    if owner_col.is_none() && jamaah_col.is_none() {
        return cond;
    }

    let mut any = Condition::any();
    let mut disjuncts = 0usize;
    if let Some(col) = owner_col {
        any = any.add(col.eq(subject.owner_id()));
        disjuncts += 1;
    }
    if let Some(col) = jamaah_col
        && !subject.jamaah_ids().is_empty()
    {
        any = any.add(col.is_in(subject.jamaah_ids().iter().copied()));
        disjuncts += 1;
    }
    if disjuncts == 0 {
        return deny_all();
    }

    cond.add(any)
}
