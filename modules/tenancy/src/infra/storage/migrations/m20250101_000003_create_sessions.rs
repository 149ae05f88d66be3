use sea_orm_migration::prelude::*;

use super::run_for_backend;

#[derive(DeriveMigrationName)]
pub struct Migration;

const PG_UP: &str = r"
CREATE TABLE sessions (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL REFERENCES tenants(id),
    user_id UUID NOT NULL REFERENCES users(id),
    refresh_token_hash TEXT NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    revoked_at TIMESTAMPTZ,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX uk_sessions_refresh_token_hash ON sessions(refresh_token_hash);
CREATE INDEX idx_sessions_tenant_user ON sessions(tenant_id, user_id);

CREATE FUNCTION umroh_check_session_tenant() RETURNS trigger
LANGUAGE plpgsql AS $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM users WHERE id = NEW.user_id AND tenant_id = NEW.tenant_id
    ) THEN
        RAISE EXCEPTION 'cross-tenant reference: user_id'
            USING ERRCODE = '23514';
    END IF;
    RETURN NEW;
END;
$$;

CREATE TRIGGER trg_sessions_user_tenant
    BEFORE INSERT OR UPDATE OF user_id ON sessions
    FOR EACH ROW EXECUTE FUNCTION umroh_check_session_tenant();

CREATE TRIGGER trg_sessions_tenant_immutable
    BEFORE UPDATE OF tenant_id ON sessions
    FOR EACH ROW EXECUTE FUNCTION umroh_reject_tenant_change();

ALTER TABLE sessions ENABLE ROW LEVEL SECURITY;
ALTER TABLE sessions FORCE ROW LEVEL SECURITY;

CREATE POLICY sessions_isolation ON sessions
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
DROP POLICY IF EXISTS sessions_isolation ON sessions;
DROP TRIGGER IF EXISTS trg_sessions_tenant_immutable ON sessions;
DROP TRIGGER IF EXISTS trg_sessions_user_tenant ON sessions;
DROP FUNCTION IF EXISTS umroh_check_session_tenant();
DROP INDEX IF EXISTS idx_sessions_tenant_user;
DROP INDEX IF EXISTS uk_sessions_refresh_token_hash;
DROP TABLE IF EXISTS sessions;
";

const SQLITE_UP: &str = r"
CREATE TABLE sessions (
    id TEXT PRIMARY KEY NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    user_id TEXT NOT NULL REFERENCES users(id),
    refresh_token_hash TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    revoked_at TEXT,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX uk_sessions_refresh_token_hash ON sessions(refresh_token_hash);
CREATE INDEX idx_sessions_tenant_user ON sessions(tenant_id, user_id);

CREATE TRIGGER trg_sessions_user_tenant_insert
    BEFORE INSERT ON sessions
    FOR EACH ROW
    WHEN NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id AND tenant_id = NEW.tenant_id)
BEGIN
    SELECT RAISE(ABORT, 'cross-tenant reference: user_id');
END;

CREATE TRIGGER trg_sessions_user_tenant_update
    BEFORE UPDATE OF user_id ON sessions
    FOR EACH ROW
    WHEN NOT EXISTS (SELECT 1 FROM users WHERE id = NEW.user_id AND tenant_id = NEW.tenant_id)
BEGIN
    SELECT RAISE(ABORT, 'cross-tenant reference: user_id');
END;

CREATE TRIGGER trg_sessions_tenant_immutable
    BEFORE UPDATE OF tenant_id ON sessions
    FOR EACH ROW WHEN NEW.tenant_id IS NOT OLD.tenant_id
BEGIN
    SELECT RAISE(ABORT, 'tenant_id is immutable on sessions');
END;
";

const SQLITE_DOWN: &str = r"
DROP TRIGGER IF EXISTS trg_sessions_tenant_immutable;
DROP TRIGGER IF EXISTS trg_sessions_user_tenant_update;
DROP TRIGGER IF EXISTS trg_sessions_user_tenant_insert;
DROP INDEX IF EXISTS idx_sessions_tenant_user;
DROP INDEX IF EXISTS uk_sessions_refresh_token_hash;
DROP TABLE IF EXISTS sessions;
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
