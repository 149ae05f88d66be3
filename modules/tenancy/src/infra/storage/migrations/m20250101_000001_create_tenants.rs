use sea_orm_migration::prelude::*;

use super::run_for_backend;

#[derive(DeriveMigrationName)]
pub struct Migration;

const PG_UP: &str = r"
CREATE TABLE tenants (
    id UUID PRIMARY KEY,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CONSTRAINT ck_tenants_status
        CHECK (status IN ('pending', 'active', 'suspended', 'inactive', 'failed', 'deleted')),
    tier TEXT NOT NULL DEFAULT 'basic'
        CONSTRAINT ck_tenants_tier CHECK (tier IN ('basic', 'premium', 'enterprise')),
    resource_limits JSONB NOT NULL,
    owner_email TEXT,
    owner_phone TEXT,
    owner_verified_at TIMESTAMPTZ,
    custom_domain TEXT,
    domain_verification_token TEXT,
    domain_verified_at TIMESTAMPTZ,
    activated_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ
);

CREATE UNIQUE INDEX uk_tenants_slug ON tenants(slug);
CREATE UNIQUE INDEX uk_tenants_custom_domain ON tenants(custom_domain);

ALTER TABLE tenants ENABLE ROW LEVEL SECURITY;
ALTER TABLE tenants FORCE ROW LEVEL SECURITY;

CREATE POLICY tenants_isolation ON tenants
    USING (
        id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
        OR current_setting('app.cross_tenant', true) = 'on'
    )
    WITH CHECK (
        id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
        OR current_setting('app.cross_tenant', true) = 'on'
    );
";

const PG_DOWN: &str = r"
DROP POLICY IF EXISTS tenants_isolation ON tenants;
DROP INDEX IF EXISTS uk_tenants_custom_domain;
DROP INDEX IF EXISTS uk_tenants_slug;
DROP TABLE IF EXISTS tenants;
";

const SQLITE_UP: &str = r"
CREATE TABLE tenants (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    slug TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CONSTRAINT ck_tenants_status
        CHECK (status IN ('pending', 'active', 'suspended', 'inactive', 'failed', 'deleted')),
    tier TEXT NOT NULL DEFAULT 'basic'
        CONSTRAINT ck_tenants_tier CHECK (tier IN ('basic', 'premium', 'enterprise')),
    resource_limits TEXT NOT NULL,
    owner_email TEXT,
    owner_phone TEXT,
    owner_verified_at TEXT,
    custom_domain TEXT,
    domain_verification_token TEXT,
    domain_verified_at TEXT,
    activated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE UNIQUE INDEX uk_tenants_slug ON tenants(slug);
CREATE UNIQUE INDEX uk_tenants_custom_domain ON tenants(custom_domain);
";

const SQLITE_DOWN: &str = r"
DROP INDEX IF EXISTS uk_tenants_custom_domain;
DROP INDEX IF EXISTS uk_tenants_slug;
DROP TABLE IF EXISTS tenants;
";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        run_for_backend(manager, PG_UP, SQLITE_UP).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        run_for_backend(manager, PG_DOWN, SQLITE_DOWN).await
    }
}
