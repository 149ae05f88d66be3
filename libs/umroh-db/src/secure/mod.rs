//! Secure ORM layer for tenant-scoped database access.
//!
//! Every read and write of a tenant-owned entity goes through an
//! [`AccessScope`]. Queries use the typestate pattern: a
//! [`SecureSelect`] in the [`Unscoped`] state has no execution methods, so a
//! query cannot run until `.scope_with(&scope)` has added the isolation
//! predicate.
//!
//! # Declaring an entity
//!
//! ```ignore
//! use umroh_db::secure::Scopable;
//! use sea_orm::entity::prelude::*;
//!
//! #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Scopable)]
//! #[sea_orm(table_name = "jamaah_assignments")]
//! #[secure(
//!     tenant_col = "tenant_id",
//!     resource_col = "id",
//!     owner_col = "agent_id",
//!     no_jamaah
//! )]
//! pub struct Model {
//!     #[sea_orm(primary_key, auto_increment = false)]
//!     pub id: Uuid,
//!     pub tenant_id: Uuid,
//!     pub agent_id: Uuid,
//!     pub jamaah_id: Uuid,
//! }
//! ```
//!
//! # Querying
//!
//! ```ignore
//! let scope = ctx.scope().include_visible_jamaah(visible).prepare();
//! let rows = Entity::find()
//!     .secure()
//!     .scope_with(&scope)
//!     .all(&conn)
//!     .await?;
//! ```
//!
//! # Policy
//!
//! | Scope | Predicate |
//! |-------|-----------|
//! | Empty (unbound context) | `false` |
//! | Tenant | `tenant_col IN (..)` |
//! | Tenant + subject | `tenant_col IN (..) AND (owner_col = me OR jamaah_col IN (..))` |
//! | Root (audited cross-tenant path) | none |

mod cond;
mod db;
mod db_ops;
mod entity_traits;
mod error;
mod ownership;
mod runner;
mod select;
mod tx_config;
mod tx_error;

pub use cond::build_scope_condition;
pub use db::{Db, DbConn, DbTx};
pub use db_ops::{
    SecureDeleteExt, SecureDeleteMany, SecureUpdateExt, SecureUpdateMany, secure_insert,
    secure_update_with_scope, validate_tenant_in_scope,
};
pub use entity_traits::ScopableEntity;
pub use error::ScopeError;
pub use ownership::resolve_owning_tenants;
pub use runner::DBRunner;
pub use select::{Scoped, SecureEntityExt, SecureSelect, Unscoped};
pub use tx_config::{TxAccessMode, TxConfig, TxIsolationLevel};
pub use tx_error::{InfraError, TxError};

pub use umroh_security::{AccessScope, AuthorizationContext, SubjectConstraint};

pub use umroh_db_macros::Scopable;
