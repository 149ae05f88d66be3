//! Database handle, runners and the unit-of-work binding.
//!
//! - [`Db`]: the handle held by services.
//! - [`DbConn`]: non-transactional runner borrowed from `Db`.
//! - [`DbTx`]: transactional runner that only exists inside a closure.
//!
//! A unit of work is one transaction with the caller's tenant, user and role
//! bound to it. On `PostgreSQL` the binding is written with
//! `set_config(.., true)`, which is transaction-local, so it is re-established
//! for every unit of work and cannot survive the connection's return to the
//! pool. Row-level security policies read it; with no binding they match
//! nothing.
//!
//! A task-local guard makes `Db::conn()` and nested transactions fail while a
//! transaction is open on the current task, so code inside a unit of work
//! cannot escape it through a captured `Db`.

use std::{cell::Cell, future::Future, pin::Pin};

use sea_orm::{
    AccessMode, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend,
    IsolationLevel, Statement, TransactionTrait, Value,
};
use tracing::{debug, warn};
use umroh_security::constants::{
    AUDIT_TARGET, SESSION_CROSS_TENANT_KEY, SESSION_ROLE_KEY, SESSION_TENANT_KEY,
    SESSION_USER_KEY,
};
use umroh_security::{AccessScope, AuthorizationContext, Role};
use uuid::Uuid;

use super::tx_config::TxConfig;
use super::tx_error::{InfraError, TxError};
use crate::{DbEngine, DbError};

tokio::task_local! {
    static IN_TX: Cell<bool>;
}

fn is_in_transaction() -> bool {
    IN_TX.try_with(Cell::get).unwrap_or(false)
}

async fn with_tx_guard<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    IN_TX.scope(Cell::new(true), f).await
}

/// The values written into the transaction before any data access.
#[derive(Debug, Clone, Copy)]
struct SessionBinding {
    tenant_id: Uuid,
    user_id: Option<Uuid>,
    role: Option<Role>,
    cross_tenant: bool,
}

impl SessionBinding {
    fn from_context(ctx: &AuthorizationContext, cross_tenant: bool) -> Result<Self, DbError> {
        let role = ctx.ensure_bound()?;
        Ok(Self {
            tenant_id: ctx.tenant_id(),
            user_id: Some(ctx.user_id()),
            role: Some(role),
            cross_tenant,
        })
    }

    fn tenant_only(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            user_id: None,
            role: None,
            cross_tenant: false,
        }
    }
}

/// Write the binding into the open transaction. `SQLite` has no session
/// variables; isolation there rests on the application-layer scope alone.
async fn bind_session(
    txn: &DatabaseTransaction,
    engine: DbEngine,
    binding: SessionBinding,
) -> Result<(), DbError> {
    if engine != DbEngine::Postgres {
        return Ok(());
    }

    let sql = format!(
        "SELECT set_config('{SESSION_TENANT_KEY}', $1, true), \
                set_config('{SESSION_USER_KEY}', $2, true), \
                set_config('{SESSION_ROLE_KEY}', $3, true), \
                set_config('{SESSION_CROSS_TENANT_KEY}', $4, true)"
    );
    let values = [
        binding.tenant_id.to_string(),
        binding.user_id.map(|u| u.to_string()).unwrap_or_default(),
        binding.role.map(|r| r.as_str().to_owned()).unwrap_or_default(),
        if binding.cross_tenant { "on" } else { "off" }.to_owned(),
    ];
    txn.query_one(Statement::from_sql_and_values(
        DbBackend::Postgres,
        sql,
        values.map(Value::from),
    ))
    .await?;
    Ok(())
}

/// Database handle for secure operations.
///
/// Cheap to clone. Services keep one and open a unit of work per logical
/// operation; repositories receive `&impl DBRunner` instead.
#[derive(Clone)]
pub struct Db {
    conn: DatabaseConnection,
    engine: DbEngine,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Db {
    pub(crate) fn new(conn: DatabaseConnection, engine: DbEngine) -> Self {
        Self { conn, engine }
    }

    /// Privileged connection for infrastructure inside this crate (migrations).
    pub(crate) fn sea_internal(&self) -> &DatabaseConnection {
        &self.conn
    }

    #[must_use]
    pub fn engine(&self) -> DbEngine {
        self.engine
    }

    /// A non-transactional runner.
    ///
    /// On `PostgreSQL` no session binding exists outside a unit of work, so
    /// policy-guarded tables read as empty through it.
    ///
    /// # Errors
    /// Returns `DbError::ConnRequestedInsideTx` inside a transaction closure.
    pub fn conn(&self) -> Result<DbConn<'_>, DbError> {
        if is_in_transaction() {
            return Err(DbError::ConnRequestedInsideTx);
        }
        Ok(DbConn { conn: &self.conn })
    }

    async fn begin(&self, config: TxConfig) -> Result<DatabaseTransaction, DbError> {
        if is_in_transaction() {
            return Err(DbError::ConnRequestedInsideTx);
        }
        let isolation: Option<IsolationLevel> = config.isolation.map(Into::into);
        let access_mode: Option<AccessMode> = config.access_mode.map(Into::into);
        Ok(self.conn.begin_with_config(isolation, access_mode).await?)
    }

    async fn run_bound<F, T, E>(
        &self,
        binding: Option<SessionBinding>,
        config: TxConfig,
        f: F,
    ) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        let txn = self.begin(config).await.map_err(E::from)?;

        if let Some(binding) = binding
            && let Err(e) = bind_session(&txn, self.engine, binding).await
        {
            let _ = txn.rollback().await;
            return Err(E::from(e));
        }

        let tx = DbTx { tx: &txn };
        let res = with_tx_guard(f(&tx)).await;

        match res {
            Ok(v) => {
                txn.commit().await.map_err(DbError::from).map_err(E::from)?;
                Ok(v)
            }
            Err(e) => {
                let _ = txn.rollback().await;
                Err(e)
            }
        }
    }

    /// Run `f` as one unit of work bound to `ctx`.
    ///
    /// ```ignore
    /// let scope = ctx.scope().prepare();
    /// let user = db
    ///     .unit_of_work(&ctx, move |tx| {
    ///         Box::pin(async move { repo.get(tx, &scope, id).await })
    ///     })
    ///     .await?;
    /// ```
    ///
    /// # Errors
    /// - `DbError::Security` (mapped into `E`) when `ctx` is unbound; no
    ///   transaction is opened
    /// - begin, binding and commit failures mapped into `E`
    /// - whatever `f` returns, after rolling back
    pub async fn unit_of_work<F, T, E>(&self, ctx: &AuthorizationContext, f: F) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        self.unit_of_work_with_config(ctx, TxConfig::default(), f)
            .await
    }

    /// [`unit_of_work`](Self::unit_of_work) with explicit transaction settings.
    ///
    /// # Errors
    /// Same as [`unit_of_work`](Self::unit_of_work).
    pub async fn unit_of_work_with_config<F, T, E>(
        &self,
        ctx: &AuthorizationContext,
        config: TxConfig,
        f: F,
    ) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        let binding = SessionBinding::from_context(ctx, false).map_err(E::from)?;
        debug!(
            tenant_id = %binding.tenant_id,
            user_id = %ctx.user_id(),
            role = ?binding.role,
            "unit of work bound"
        );
        self.run_bound(Some(binding), config, f).await
    }

    /// A unit of work bound to a tenant but to no user.
    ///
    /// For lookups that have to happen before an authorization context exists:
    /// opening a session, rotating a refresh token, resolving an access token.
    ///
    /// # Errors
    /// Returns `DbError::Security` (mapped into `E`) for the nil tenant, plus
    /// the failure modes of [`unit_of_work`](Self::unit_of_work).
    pub async fn tenant_unit_of_work<F, T, E>(&self, tenant_id: Uuid, f: F) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        if tenant_id.is_nil() {
            return Err(E::from(DbError::Security(
                umroh_security::SecurityError::Unbound,
            )));
        }
        debug!(%tenant_id, "tenant-only unit of work bound");
        self.run_bound(
            Some(SessionBinding::tenant_only(tenant_id)),
            TxConfig::default(),
            f,
        )
        .await
    }

    /// The audited administrative path: a unit of work without a tenant
    /// predicate. `f` receives the root scope.
    ///
    /// Only `super_admin` may open it; the grant is logged on the audit target
    /// together with `reason`.
    ///
    /// # Errors
    /// - `DbError::Security` (mapped into `E`) when the context is unbound, not
    ///   `super_admin`, or `reason` is blank
    /// - the failure modes of [`unit_of_work`](Self::unit_of_work)
    pub async fn admin_unit_of_work<F, T, E>(
        &self,
        ctx: &AuthorizationContext,
        reason: &str,
        f: F,
    ) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(
                &'a DbTx<'a>,
                AccessScope,
            ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        let scope = ctx
            .cross_tenant_scope(reason)
            .map_err(DbError::from)
            .map_err(E::from)?;
        let binding = SessionBinding::from_context(ctx, true).map_err(E::from)?;
        warn!(
            target: AUDIT_TARGET,
            user_id = %ctx.user_id(),
            engine = self.engine.as_str(),
            reason,
            "cross-tenant unit of work opened"
        );
        self.run_bound(Some(binding), TxConfig::default(), move |tx| f(tx, scope))
            .await
    }

    /// Run `f` in a plain transaction with no session binding.
    ///
    /// For infrastructure that does not touch policy-guarded tables.
    ///
    /// # Errors
    /// Begin/commit failures mapped into `E`, or whatever `f` returns.
    pub async fn transaction_ref_mapped<F, T, E>(&self, f: F) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        self.run_bound(None, TxConfig::default(), f).await
    }

    /// Like [`transaction_ref_mapped`](Self::transaction_ref_mapped) with
    /// explicit settings.
    ///
    /// # Errors
    /// Begin/commit failures mapped into `E`, or whatever `f` returns.
    pub async fn transaction_with_config<F, T, E>(&self, config: TxConfig, f: F) -> Result<T, E>
    where
        E: From<DbError> + Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        self.run_bound(None, config, f).await
    }

    /// A bound unit of work that keeps domain and infrastructure failures
    /// apart instead of requiring `E: From<DbError>`.
    ///
    /// # Errors
    /// `TxError::Infra` for binding, begin and commit failures, `TxError::Domain`
    /// for errors returned by `f`.
    pub async fn in_transaction<F, T, E>(
        &self,
        ctx: &AuthorizationContext,
        f: F,
    ) -> Result<T, TxError<E>>
    where
        E: Send + 'static,
        F: for<'a> FnOnce(&'a DbTx<'a>) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>
            + Send,
        T: Send + 'static,
    {
        let infra = |e: DbError| TxError::Infra(InfraError::new(e.to_string()));
        let binding = SessionBinding::from_context(ctx, false).map_err(infra)?;
        let txn = self.begin(TxConfig::default()).await.map_err(infra)?;
        if let Err(e) = bind_session(&txn, self.engine, binding).await {
            let _ = txn.rollback().await;
            return Err(infra(e));
        }

        let tx = DbTx { tx: &txn };
        let res = with_tx_guard(f(&tx)).await;

        match res {
            Ok(v) => {
                txn.commit().await.map_err(|e| infra(DbError::from(e)))?;
                Ok(v)
            }
            Err(e) => {
                let _ = txn.rollback().await;
                Err(TxError::Domain(e))
            }
        }
    }
}

/// Non-transactional runner. Only [`Db::conn`] creates it.
pub struct DbConn<'a> {
    pub(crate) conn: &'a DatabaseConnection,
}

impl std::fmt::Debug for DbConn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConn").finish_non_exhaustive()
    }
}

/// Transactional runner, lifetime-bound to its unit-of-work closure.
pub struct DbTx<'a> {
    pub(crate) tx: &'a DatabaseTransaction,
}

impl std::fmt::Debug for DbTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTx").finish_non_exhaustive()
    }
}
