use sea_orm::entity::prelude::*;
use time::OffsetDateTime;
use umroh_db::secure::Scopable;
use uuid::Uuid;

/// The tenant row is its own scope: `id` doubles as the tenant column, so a
/// tenant-bound caller can see exactly one row.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Scopable)]
#[sea_orm(table_name = "tenants")]
#[secure(tenant_col = "id", resource_col = "id", no_owner, no_jamaah)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    pub status: String,
    pub tier: String,
    pub resource_limits: Json,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_verified_at: Option<OffsetDateTime>,
    #[sea_orm(unique)]
    pub custom_domain: Option<String>,
    pub domain_verification_token: Option<String>,
    pub domain_verified_at: Option<OffsetDateTime>,
    pub activated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
