//! Tenancy Module
//!
//! Tenant registry, users and sessions, and the agent-to-jamaah assignment
//! subsystem of the Umroh platform.
//!
//! Every operation takes an [`AuthorizationContext`](umroh_security::AuthorizationContext)
//! (or, before authentication, a tenant id) and runs in one unit of work whose
//! scope is derived from it. Rows of other tenants are never returned; a row
//! outside the caller's scope and a missing row are the same `NotFound`.
//!
//! The storage layer repeats the tenant checks as triggers and, on
//! `PostgreSQL`, row-level security policies.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

// === MODULE DEFINITION ===
pub mod module;
pub use module::Tenancy;

pub mod config;
pub use config::{ConfigError, LoginPolicy, TenancyConfig, TokenConfig};

pub mod domain;
pub use domain::error::DomainError;

pub mod infra;
