use std::collections::HashMap;

use sea_orm::{ColumnTrait, QueryFilter, QuerySelect};
use uuid::Uuid;

use crate::secure::ScopableEntity;
use crate::secure::error::ScopeError;
use crate::secure::runner::{DBRunner, with_runner};

/// Look up the owning tenant of each id in `ids`.
///
/// Only `(id, tenant_id)` pairs are read, so the result reveals nothing about
/// rows beyond which tenant they belong to. Ids that do not exist are absent
/// from the map. This feeds write-time reference validation, where a row
/// of another tenant must be reported as such rather than as missing.
///
/// # Errors
/// - `ScopeError::Invalid` if `E` lacks a resource or tenant column
/// - `ScopeError::Db` if the query fails
pub async fn resolve_owning_tenants<E, C>(
    runner: &C,
    ids: &[Uuid],
) -> Result<HashMap<Uuid, Uuid>, ScopeError>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
    C: DBRunner,
{
    let (Some(id_col), Some(tenant_col)) = (E::resource_col(), E::tenant_col()) else {
        return Err(ScopeError::Invalid(
            "Entity must have resource_col and tenant_col to resolve ownership",
        ));
    };
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = E::find()
        .select_only()
        .column(id_col)
        .column(tenant_col)
        .filter(id_col.is_in(ids.iter().copied()));

    let rows: Vec<(Uuid, Uuid)> = with_runner!(runner, |c| query
        .into_tuple::<(Uuid, Uuid)>()
        .all(c)
        .await?);

    Ok(rows.into_iter().collect())
}
