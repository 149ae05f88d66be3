/// Tracing target for audited operations (cross-tenant access, grants, revocations).
pub const AUDIT_TARGET: &str = "umroh::audit";

/// Name of the transaction-local setting carrying the bound tenant id.
pub const SESSION_TENANT_KEY: &str = "app.tenant_id";

/// Name of the transaction-local setting carrying the bound user id.
pub const SESSION_USER_KEY: &str = "app.user_id";

/// Name of the transaction-local setting carrying the bound role.
pub const SESSION_ROLE_KEY: &str = "app.role";

/// Set to `on` only inside an audited cross-tenant unit of work.
pub const SESSION_CROSS_TENANT_KEY: &str = "app.cross_tenant";
