use sea_orm::entity::prelude::*;
use time::OffsetDateTime;
use umroh_db::secure::Scopable;
use uuid::Uuid;

/// Agent-to-pilgrim grant. Narrowed scopes see the rows naming the caller
/// as agent, matching the row-level policy on the table.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Scopable)]
#[sea_orm(table_name = "jamaah_assignments")]
#[secure(
    tenant_col = "tenant_id",
    resource_col = "id",
    owner_col = "agent_id",
    no_jamaah
)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub jamaah_id: Uuid,
    pub agent_id: Uuid,
    pub assigned_by_id: Uuid,
    pub assigned_at: OffsetDateTime,
    /// Set together with `revoked_by_id`; a CHECK constraint keeps them paired.
    pub deleted_at: Option<OffsetDateTime>,
    pub revoked_by_id: Option<Uuid>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
