//! # umroh-db-macros
//!
//! `#[derive(Scopable)]` implements `umroh_db::secure::ScopableEntity` for a
//! sea-orm entity from its `#[secure(...)]` attribute.
//!
//! Every isolation dimension must be declared explicitly:
//! - **Tenant**: `tenant_col = "column"` OR `no_tenant`
//! - **Resource**: `resource_col = "column"` OR `no_resource`
//! - **Owner**: `owner_col = "column"` OR `no_owner`
//! - **Pilgrim**: `jamaah_col = "column"` OR `no_jamaah`
//! - **Unrestricted**: `unrestricted` (forbids all other attributes)
//!
//! ```ignore
//! #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Scopable)]
//! #[sea_orm(table_name = "sessions")]
//! #[secure(tenant_col = "tenant_id", resource_col = "id", owner_col = "user_id", no_jamaah)]
//! pub struct Model {
//!     #[sea_orm(primary_key, auto_increment = false)]
//!     pub id: Uuid,
//!     pub tenant_id: Uuid,
//!     pub user_id: Uuid,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro_error2::proc_macro_error;
use syn::{DeriveInput, parse_macro_input};

mod scopable;

/// Derive `ScopableEntity` for the `Entity` generated next to this `Model`.
///
/// Owner and pilgrim columns form the role-conditioned layer: for a narrowed
/// scope a row is visible when `owner_col` equals the caller or `jamaah_col`
/// is one of the caller's visible pilgrims.
#[proc_macro_derive(Scopable, attributes(secure))]
#[proc_macro_error]
pub fn derive_scopable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    scopable::expand_derive_scopable(input).into()
}
