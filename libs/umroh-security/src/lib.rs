#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Security primitives shared by every tenant-scoped component.
//!
//! An [`AuthorizationContext`] (tenant, user, role) is derived from a verified
//! access token and turned into an [`AccessScope`] before any data access. A
//! scope that was never bound to a tenant denies everything.

pub mod access_scope;
pub mod constants;
pub mod context;
pub mod error;
pub mod role;
pub mod token;

pub use access_scope::{AccessScope, SubjectConstraint};
pub use context::{AccessScopeResolver, AuthorizationContext, AuthorizationContextBuilder};
pub use error::SecurityError;
pub use role::Role;
pub use token::{AccessClaims, TokenCodec, TokenError};
