use sea_orm_migration::prelude::*;

use super::run_for_backend;

#[derive(DeriveMigrationName)]
pub struct Migration;

// `umroh_reject_tenant_change` is shared with the later tables, so it lives
// and dies with this migration.
const PG_UP: &str = r"
CREATE TABLE users (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES tenants(id),
    email TEXT NOT NULL,
    full_name TEXT NOT NULL,
    phone TEXT,
    role TEXT NOT NULL
        CONSTRAINT ck_users_role
        CHECK (role IN ('super_admin', 'agency_owner', 'agent', 'affiliate', 'admin', 'jamaah', 'family')),
    status TEXT NOT NULL DEFAULT 'active'
        CONSTRAINT ck_users_status
        CHECK (status IN ('active', 'inactive', 'suspended', 'pending_verification')),
    failed_login_attempts INTEGER NOT NULL DEFAULT 0
        CONSTRAINT ck_users_failed_login_attempts CHECK (failed_login_attempts >= 0),
    locked_until TIMESTAMPTZ,
    last_login_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX uk_users_tenant_email ON users(tenant_id, email);
CREATE INDEX idx_users_tenant_role ON users(tenant_id, role);

CREATE FUNCTION umroh_reject_tenant_change() RETURNS trigger
LANGUAGE plpgsql AS $$
BEGIN
    IF NEW.tenant_id IS DISTINCT FROM OLD.tenant_id THEN
        RAISE EXCEPTION 'tenant_id is immutable on %', TG_TABLE_NAME
            USING ERRCODE = '23514';
    END IF;
    RETURN NEW;
END;
$$;

CREATE TRIGGER trg_users_tenant_immutable
    BEFORE UPDATE OF tenant_id ON users
    FOR EACH ROW EXECUTE FUNCTION umroh_reject_tenant_change();

ALTER TABLE users ENABLE ROW LEVEL SECURITY;
ALTER TABLE users FORCE ROW LEVEL SECURITY;

CREATE POLICY users_isolation ON users
    USING (
        tenant_id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
        OR current_setting('app.cross_tenant', true) = 'on'
    )
    WITH CHECK (
        tenant_id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
        OR current_setting('app.cross_tenant', true) = 'on'
    );
";

const PG_DOWN: &str = r"
DROP POLICY IF EXISTS users_isolation ON users;
DROP TRIGGER IF EXISTS trg_users_tenant_immutable ON users;
DROP FUNCTION IF EXISTS umroh_reject_tenant_change();
DROP INDEX IF EXISTS idx_users_tenant_role;
DROP INDEX IF EXISTS uk_users_tenant_email;
DROP TABLE IF EXISTS users;
";

const SQLITE_UP: &str = r"
CREATE TABLE users (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    email TEXT NOT NULL,
    full_name TEXT NOT NULL,
    phone TEXT,
    role TEXT NOT NULL
        CONSTRAINT ck_users_role
        CHECK (role IN ('super_admin', 'agency_owner', 'agent', 'affiliate', 'admin', 'jamaah', 'family')),
    status TEXT NOT NULL DEFAULT 'active'
        CONSTRAINT ck_users_status
        CHECK (status IN ('active', 'inactive', 'suspended', 'pending_verification')),
    failed_login_attempts INTEGER NOT NULL DEFAULT 0
        CONSTRAINT ck_users_failed_login_attempts CHECK (failed_login_attempts >= 0),
    locked_until TEXT,
    last_login_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX uk_users_tenant_email ON users(tenant_id, email);
CREATE INDEX idx_users_tenant_role ON users(tenant_id, role);

CREATE TRIGGER trg_users_tenant_immutable
    BEFORE UPDATE OF tenant_id ON users
    FOR EACH ROW WHEN NEW.tenant_id IS NOT OLD.tenant_id
BEGIN
    SELECT RAISE(ABORT, 'tenant_id is immutable on users');
END;
";

const SQLITE_DOWN: &str = r"
DROP TRIGGER IF EXISTS trg_users_tenant_immutable;
DROP INDEX IF EXISTS idx_users_tenant_role;
DROP INDEX IF EXISTS uk_users_tenant_email;
DROP TABLE IF EXISTS users;
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
