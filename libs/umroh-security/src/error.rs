use crate::Role;

/// Errors raised while turning an authorization context into a scope.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// The context has no tenant or no user bound to it.
    #[error("authorization context is not bound to a tenant and user")]
    Unbound,

    /// Only `super_admin` may leave its tenant.
    #[error("role '{role}' may not use the cross-tenant path")]
    CrossTenantDenied { role: Role },

    /// An audited path was requested without a reason.
    #[error("cross-tenant access requires a non-empty reason")]
    MissingReason,

    #[error("unknown role '{0}'")]
    UnknownRole(String),
}
