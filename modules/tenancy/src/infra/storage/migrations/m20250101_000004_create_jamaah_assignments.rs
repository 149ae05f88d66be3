use sea_orm_migration::prelude::*;

use super::run_for_backend;

#[derive(DeriveMigrationName)]
pub struct Migration;

// Reference lookups run under the caller's users policy: a user of another
// tenant is invisible and is reported the same way as a foreign one.
const PG_UP: &str = r"
CREATE TABLE jamaah_assignments (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES tenants(id),
    jamaah_id UUID NOT NULL REFERENCES users(id),
    agent_id UUID NOT NULL REFERENCES users(id),
    assigned_by_id UUID NOT NULL REFERENCES users(id),
    assigned_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ,
    revoked_by_id UUID REFERENCES users(id),
    CONSTRAINT ck_jamaah_assignments_revocation
        CHECK ((deleted_at IS NULL) = (revoked_by_id IS NULL))
);

CREATE UNIQUE INDEX uk_jamaah_assignments_live
    ON jamaah_assignments(jamaah_id, agent_id, tenant_id)
    WHERE deleted_at IS NULL;
CREATE INDEX idx_jamaah_assignments_agent_live
    ON jamaah_assignments(tenant_id, agent_id)
    WHERE deleted_at IS NULL;

CREATE FUNCTION umroh_check_assignment_refs() RETURNS trigger
LANGUAGE plpgsql AS $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.jamaah_id AND tenant_id = NEW.tenant_id) THEN
        RAISE EXCEPTION 'cross-tenant reference: jamaah_id' USING ERRCODE = '23514';
    END IF;
    IF NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.agent_id AND tenant_id = NEW.tenant_id) THEN
        RAISE EXCEPTION 'cross-tenant reference: agent_id' USING ERRCODE = '23514';
    END IF;
    IF NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.assigned_by_id AND tenant_id = NEW.tenant_id) THEN
        RAISE EXCEPTION 'cross-tenant reference: assigned_by_id' USING ERRCODE = '23514';
    END IF;
    IF NEW.revoked_by_id IS NOT NULL
        AND NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.revoked_by_id AND tenant_id = NEW.tenant_id) THEN
        RAISE EXCEPTION 'cross-tenant reference: revoked_by_id' USING ERRCODE = '23514';
    END IF;
    RETURN NEW;
END;
$$;

CREATE TRIGGER trg_jamaah_assignments_refs
    BEFORE INSERT OR UPDATE ON jamaah_assignments
    FOR EACH ROW EXECUTE FUNCTION umroh_check_assignment_refs();

CREATE TRIGGER trg_jamaah_assignments_tenant_immutable
    BEFORE UPDATE OF tenant_id ON jamaah_assignments
    FOR EACH ROW EXECUTE FUNCTION umroh_reject_tenant_change();

ALTER TABLE jamaah_assignments ENABLE ROW LEVEL SECURITY;
ALTER TABLE jamaah_assignments FORCE ROW LEVEL SECURITY;

CREATE POLICY jamaah_assignments_isolation ON jamaah_assignments
    USING (
        (
            tenant_id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
            AND (
                current_setting('app.role', true) IN ('super_admin', 'agency_owner', 'admin')
                OR agent_id = NULLIF(current_setting('app.user_id', true), '')::uuid
            )
        )
        OR current_setting('app.cross_tenant', true) = 'on'
    )
    WITH CHECK (
        (
            tenant_id = NULLIF(current_setting('app.tenant_id', true), '')::uuid
            AND (
                current_setting('app.role', true) IN ('super_admin', 'agency_owner', 'admin')
                OR agent_id = NULLIF(current_setting('app.user_id', true), '')::uuid
            )
        )
        OR current_setting('app.cross_tenant', true) = 'on'
    );
";

const PG_DOWN: &str = r"
DROP POLICY IF EXISTS jamaah_assignments_isolation ON jamaah_assignments;
DROP TRIGGER IF EXISTS trg_jamaah_assignments_tenant_immutable ON jamaah_assignments;
DROP TRIGGER IF EXISTS trg_jamaah_assignments_refs ON jamaah_assignments;
DROP FUNCTION IF EXISTS umroh_check_assignment_refs();
DROP INDEX IF EXISTS idx_jamaah_assignments_agent_live;
DROP INDEX IF EXISTS uk_jamaah_assignments_live;
DROP TABLE IF EXISTS jamaah_assignments;
";

const SQLITE_UP: &str = r"
CREATE TABLE jamaah_assignments (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    jamaah_id TEXT NOT NULL REFERENCES users(id),
    agent_id TEXT NOT NULL REFERENCES users(id),
    assigned_by_id TEXT NOT NULL REFERENCES users(id),
    assigned_at TEXT NOT NULL,
    deleted_at TEXT,
    revoked_by_id TEXT REFERENCES users(id),
    CONSTRAINT ck_jamaah_assignments_revocation
        CHECK ((deleted_at IS NULL) = (revoked_by_id IS NULL))
);

CREATE UNIQUE INDEX uk_jamaah_assignments_live
    ON jamaah_assignments(jamaah_id, agent_id, tenant_id)
    WHERE deleted_at IS NULL;
CREATE INDEX idx_jamaah_assignments_agent_live
    ON jamaah_assignments(tenant_id, agent_id)
    WHERE deleted_at IS NULL;

CREATE TRIGGER trg_jamaah_assignments_refs_insert
    BEFORE INSERT ON jamaah_assignments
    FOR EACH ROW
BEGIN
    SELECT RAISE(ABORT, 'cross-tenant reference: jamaah_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.jamaah_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: agent_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.agent_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: assigned_by_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.assigned_by_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: revoked_by_id')
    WHERE NEW.revoked_by_id IS NOT NULL
        AND NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.revoked_by_id AND tenant_id = NEW.tenant_id);
END;

CREATE TRIGGER trg_jamaah_assignments_refs_update
    BEFORE UPDATE ON jamaah_assignments
    FOR EACH ROW
BEGIN
    SELECT RAISE(ABORT, 'tenant_id is immutable on jamaah_assignments')
    WHERE NEW.tenant_id IS NOT OLD.tenant_id;
    SELECT RAISE(ABORT, 'cross-tenant reference: jamaah_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.jamaah_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: agent_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.agent_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: assigned_by_id')
    WHERE NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.assigned_by_id AND tenant_id = NEW.tenant_id);
    SELECT RAISE(ABORT, 'cross-tenant reference: revoked_by_id')
    WHERE NEW.revoked_by_id IS NOT NULL
        AND NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.revoked_by_id AND tenant_id = NEW.tenant_id);
END;
";

const SQLITE_DOWN: &str = r"
DROP TRIGGER IF EXISTS trg_jamaah_assignments_refs_update;
DROP TRIGGER IF EXISTS trg_jamaah_assignments_refs_insert;
DROP INDEX IF EXISTS idx_jamaah_assignments_agent_live;
DROP INDEX IF EXISTS uk_jamaah_assignments_live;
DROP TABLE IF EXISTS jamaah_assignments;
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
