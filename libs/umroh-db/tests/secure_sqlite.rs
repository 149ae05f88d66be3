#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end checks of the secure layer on in-memory `SQLite`.

#[cfg(feature = "sqlite")]
mod secure_sqlite_tests {
    use sea_orm::{ActiveValue::Set, ColumnTrait, Condition, EntityTrait};
    use sea_orm_migration::prelude::*;
    use tracing_test::traced_test;
    use umroh_db::migration_runner::run_migrations_for_module;
    use umroh_db::secure::{
        AccessScope, AuthorizationContext, ScopeError, SecureEntityExt, SecureUpdateExt,
        SubjectConstraint, TxError, resolve_owning_tenants, secure_insert, secure_update_with_scope,
    };
    use umroh_db::{Db, DbConfig, DbError, connect_db};
    use umroh_security::{Role, SecurityError};
    use uuid::Uuid;

    mod note {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel, umroh_db::secure::Scopable)]
        #[sea_orm(table_name = "notes")]
        #[secure(
            tenant_col = "tenant_id",
            resource_col = "id",
            owner_col = "author_id",
            jamaah_col = "jamaah_id"
        )]
        pub struct Model {
            #[sea_orm(primary_key, auto_increment = false)]
            pub id: Uuid,
            pub tenant_id: Uuid,
            pub author_id: Uuid,
            pub jamaah_id: Uuid,
            pub body: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    #[derive(DeriveMigrationName)]
    struct CreateNotes;

    #[async_trait::async_trait]
    impl MigrationTrait for CreateNotes {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE TABLE notes (
                        id TEXT PRIMARY KEY NOT NULL,
                        tenant_id TEXT NOT NULL,
                        author_id TEXT NOT NULL,
                        jamaah_id TEXT NOT NULL,
                        body TEXT NOT NULL
                    )",
                )
                .await?;
            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .get_connection()
                .execute_unprepared("DROP TABLE notes")
                .await?;
            Ok(())
        }
    }

    fn ctx(tenant_id: Uuid, user_id: Uuid, role: Role) -> AuthorizationContext {
        AuthorizationContext::builder()
            .tenant_id(tenant_id)
            .user_id(user_id)
            .role(role)
            .build()
    }

    async fn setup() -> Db {
        let db = connect_db(&DbConfig::in_memory()).await.unwrap();
        run_migrations_for_module(&db, "secure-tests", vec![Box::new(CreateNotes)])
            .await
            .unwrap();
        db
    }

    fn new_note(tenant_id: Uuid, author_id: Uuid, jamaah_id: Uuid) -> note::ActiveModel {
        note::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            author_id: Set(author_id),
            jamaah_id: Set(jamaah_id),
            body: Set("visa copy received".to_owned()),
        }
    }

    async fn seed(db: &Db, tenant_id: Uuid, author_id: Uuid, jamaah_id: Uuid) -> note::Model {
        let owner = ctx(tenant_id, Uuid::new_v4(), Role::AgencyOwner);
        let scope = owner.scope().prepare();
        db.unit_of_work(&owner, move |tx| {
            Box::pin(async move {
                let m = secure_insert::<note::Entity, _>(
                    new_note(tenant_id, author_id, jamaah_id),
                    &scope,
                    tx,
                )
                .await?;
                Ok::<_, anyhow::Error>(m)
            })
        })
        .await
        .unwrap()
    }

    async fn visible_ids(db: &Db, scope: &AccessScope) -> Vec<Uuid> {
        let conn = db.conn().unwrap();
        let mut ids: Vec<Uuid> = note::Entity::find()
            .secure()
            .scope_with(scope)
            .all(&conn)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn tenant_scope_only_returns_own_tenant() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let a = seed(&db, tenant_a, Uuid::new_v4(), Uuid::new_v4()).await;
        let b = seed(&db, tenant_b, Uuid::new_v4(), Uuid::new_v4()).await;

        assert_eq!(visible_ids(&db, &AccessScope::tenant(tenant_a)).await, vec![a.id]);
        assert_eq!(visible_ids(&db, &AccessScope::tenant(tenant_b)).await, vec![b.id]);

        // Asking for B's row by id from A's scope yields nothing, not an error.
        let conn = db.conn().unwrap();
        let found = note::Entity::find()
            .secure()
            .scope_with(&AccessScope::tenant(tenant_a))
            .and_id(b.id)
            .unwrap()
            .one(&conn)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn unbound_scope_reads_nothing() {
        let db = setup().await;
        seed(&db, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()).await;

        let scope = AuthorizationContext::anonymous().scope().prepare();
        assert!(visible_ids(&db, &scope).await.is_empty());
        assert!(visible_ids(&db, &AccessScope::deny_all()).await.is_empty());
    }

    #[tokio::test]
    async fn unbound_context_cannot_open_unit_of_work() {
        let db = setup().await;
        let err = db
            .unit_of_work(&AuthorizationContext::anonymous(), |_tx| {
                Box::pin(async move { Ok::<_, DbError>(()) })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Security(SecurityError::Unbound)));

        let err = db
            .tenant_unit_of_work(Uuid::nil(), |_tx| {
                Box::pin(async move { Ok::<_, DbError>(()) })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Security(SecurityError::Unbound)));
    }

    #[tokio::test]
    async fn agent_sees_owned_rows_and_visible_jamaah_only() {
        let db = setup().await;
        let tenant = Uuid::new_v4();
        let agent = Uuid::new_v4();
        let (p1, p2) = (Uuid::new_v4(), Uuid::new_v4());

        let own = seed(&db, tenant, agent, p2).await;
        let assigned = seed(&db, tenant, Uuid::new_v4(), p1).await;
        let unrelated = seed(&db, tenant, Uuid::new_v4(), Uuid::new_v4()).await;

        let agent_ctx = ctx(tenant, agent, Role::Agent);
        let scope = agent_ctx.scope().include_visible_jamaah(vec![p1]).prepare();
        let mut expected = vec![own.id, assigned.id];
        expected.sort();
        assert_eq!(visible_ids(&db, &scope).await, expected);

        let owner_scope = ctx(tenant, Uuid::new_v4(), Role::AgencyOwner).scope().prepare();
        assert_eq!(visible_ids(&db, &owner_scope).await.len(), 3);
        assert!(visible_ids(&db, &owner_scope).await.contains(&unrelated.id));
    }

    #[tokio::test]
    async fn insert_outside_scope_is_rejected() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let admin = ctx(tenant_a, Uuid::new_v4(), Role::Admin);
        let scope = admin.scope().prepare();

        let err = db
            .unit_of_work(&admin, move |tx| {
                Box::pin(async move {
                    secure_insert::<note::Entity, _>(
                        new_note(tenant_b, Uuid::new_v4(), Uuid::new_v4()),
                        &scope,
                        tx,
                    )
                    .await
                    .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScopeError>(),
            Some(ScopeError::Denied(_))
        ));

        let missing_tenant = note::ActiveModel {
            tenant_id: sea_orm::ActiveValue::NotSet,
            ..new_note(tenant_a, Uuid::new_v4(), Uuid::new_v4())
        };
        let scope = admin.scope().prepare();
        let err = db
            .unit_of_work(&admin, move |tx| {
                Box::pin(async move {
                    secure_insert::<note::Entity, _>(missing_tenant, &scope, tx)
                        .await
                        .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScopeError>(),
            Some(ScopeError::Invalid(_))
        ));

        assert!(visible_ids(&db, &AccessScope::tenant(tenant_b)).await.is_empty());
    }

    #[tokio::test]
    async fn agent_cannot_insert_for_someone_else() {
        let db = setup().await;
        let tenant = Uuid::new_v4();
        let agent = ctx(tenant, Uuid::new_v4(), Role::Agent);
        let scope = agent.scope().prepare();

        let err = db
            .unit_of_work(&agent, move |tx| {
                Box::pin(async move {
                    secure_insert::<note::Entity, _>(
                        new_note(tenant, Uuid::new_v4(), Uuid::new_v4()),
                        &scope,
                        tx,
                    )
                    .await
                    .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScopeError>(),
            Some(ScopeError::Denied(_))
        ));
    }

    #[tokio::test]
    async fn update_cannot_reach_other_tenant_or_move_rows() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let row_a = seed(&db, tenant_a, Uuid::new_v4(), Uuid::new_v4()).await;
        let row_b = seed(&db, tenant_b, Uuid::new_v4(), Uuid::new_v4()).await;
        let admin = ctx(tenant_a, Uuid::new_v4(), Role::Admin);

        let scope = admin.scope().prepare();
        let foreign = note::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(row_b.id),
            body: Set("tampered".to_owned()),
            ..Default::default()
        };
        let err = db
            .unit_of_work(&admin, move |tx| {
                Box::pin(async move {
                    secure_update_with_scope::<note::Entity, _>(foreign, &scope, tx)
                        .await
                        .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScopeError>(),
            Some(ScopeError::Denied(_))
        ));

        let scope = admin.scope().prepare();
        let moved = note::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(row_a.id),
            tenant_id: Set(tenant_b),
            ..Default::default()
        };
        let err = db
            .unit_of_work(&admin, move |tx| {
                Box::pin(async move {
                    secure_update_with_scope::<note::Entity, _>(moved, &scope, tx)
                        .await
                        .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScopeError>(),
            Some(ScopeError::Invalid("tenant_id is immutable"))
        ));

        let scope = admin.scope().prepare();
        let edit = note::ActiveModel {
            id: sea_orm::ActiveValue::Unchanged(row_a.id),
            body: Set("passport scanned".to_owned()),
            ..Default::default()
        };
        let updated = db
            .unit_of_work(&admin, move |tx| {
                Box::pin(async move {
                    secure_update_with_scope::<note::Entity, _>(edit, &scope, tx)
                        .await
                        .map_err(anyhow::Error::from)
                })
            })
            .await
            .unwrap();
        assert_eq!(updated.body, "passport scanned");
        assert_eq!(updated.tenant_id, tenant_a);
    }

    #[tokio::test]
    async fn scoped_update_many_leaves_other_tenants_alone() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        seed(&db, tenant_a, Uuid::new_v4(), Uuid::new_v4()).await;
        let row_b = seed(&db, tenant_b, Uuid::new_v4(), Uuid::new_v4()).await;

        let conn = db.conn().unwrap();
        let result = note::Entity::update_many()
            .col_expr(note::Column::Body, Expr::value("archived"))
            .secure()
            .scope_with(&AccessScope::tenant(tenant_a))
            .exec(&conn)
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);

        let b = note::Entity::find()
            .secure()
            .scope_with(&AccessScope::tenant(tenant_b))
            .filter(Condition::all().add(note::Column::Id.eq(row_b.id)))
            .one(&conn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.body, "visa copy received");
    }

    #[tokio::test]
    async fn failing_unit_of_work_rolls_back() {
        let db = setup().await;
        let tenant = Uuid::new_v4();
        let owner = ctx(tenant, Uuid::new_v4(), Role::AgencyOwner);
        let scope = owner.scope().prepare();

        let res: Result<(), anyhow::Error> = db
            .unit_of_work(&owner, move |tx| {
                Box::pin(async move {
                    secure_insert::<note::Entity, _>(
                        new_note(tenant, Uuid::new_v4(), Uuid::new_v4()),
                        &scope,
                        tx,
                    )
                    .await?;
                    anyhow::bail!("reference check failed")
                })
            })
            .await;
        assert!(res.is_err());
        assert!(visible_ids(&db, &AccessScope::tenant(tenant)).await.is_empty());
    }

    #[tokio::test]
    async fn in_transaction_keeps_domain_errors_apart() {
        let db = setup().await;
        let tenant = Uuid::new_v4();
        let owner = ctx(tenant, Uuid::new_v4(), Role::AgencyOwner);
        let scope = owner.scope().prepare();

        let res: Result<(), TxError<&'static str>> = db
            .in_transaction(&owner, move |tx| {
                Box::pin(async move {
                    secure_insert::<note::Entity, _>(
                        new_note(tenant, Uuid::new_v4(), Uuid::new_v4()),
                        &scope,
                        tx,
                    )
                    .await
                    .map_err(|_| "insert failed")?;
                    Err("pilgrim has no passport")
                })
            })
            .await;
        assert!(matches!(res, Err(TxError::Domain("pilgrim has no passport"))));
        assert!(visible_ids(&db, &AccessScope::tenant(tenant)).await.is_empty());

        let unbound = AuthorizationContext::anonymous();
        let res: Result<(), TxError<&'static str>> = db
            .in_transaction(&unbound, |_tx| Box::pin(async move { Ok(()) }))
            .await;
        let collapsed = res.unwrap_err().into_domain(|_| "infrastructure");
        assert_eq!(collapsed, "infrastructure");
    }

    #[tokio::test]
    async fn raw_connection_and_nested_transactions_are_refused_inside_tx() {
        let db = setup().await;
        let owner = ctx(Uuid::new_v4(), Uuid::new_v4(), Role::AgencyOwner);
        let inner_db = db.clone();
        let inner_ctx = owner.clone();

        let (conn_refused, nested_refused) = db
            .unit_of_work(&owner, move |_tx| {
                Box::pin(async move {
                    let conn_refused =
                        matches!(inner_db.conn(), Err(DbError::ConnRequestedInsideTx));
                    let nested = inner_db
                        .unit_of_work(&inner_ctx, |_tx| {
                            Box::pin(async move { Ok::<_, DbError>(()) })
                        })
                        .await;
                    let nested_refused = matches!(nested, Err(DbError::ConnRequestedInsideTx));
                    Ok::<_, DbError>((conn_refused, nested_refused))
                })
            })
            .await
            .unwrap();
        assert!(conn_refused);
        assert!(nested_refused);

        // Outside the closure the handle works again.
        assert!(db.conn().is_ok());
    }

    #[tokio::test]
    #[traced_test]
    async fn admin_unit_of_work_is_audited_and_crosses_tenants() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        seed(&db, tenant_a, Uuid::new_v4(), Uuid::new_v4()).await;
        seed(&db, tenant_b, Uuid::new_v4(), Uuid::new_v4()).await;

        let root = ctx(tenant_a, Uuid::new_v4(), Role::SuperAdmin);
        let count = db
            .admin_unit_of_work(&root, "reconcile pilgrim counts", |tx, scope| {
                Box::pin(async move {
                    let n = note::Entity::find()
                        .secure()
                        .scope_with(&scope)
                        .count(tx)
                        .await?;
                    Ok::<_, anyhow::Error>(n)
                })
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert!(logs_contain("cross-tenant unit of work opened"));
        assert!(logs_contain("reconcile pilgrim counts"));

        let owner = ctx(tenant_a, Uuid::new_v4(), Role::AgencyOwner);
        let err = db
            .admin_unit_of_work(&owner, "curious", |_tx, _scope| {
                Box::pin(async move { Ok::<_, DbError>(()) })
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::Security(SecurityError::CrossTenantDenied { .. })
        ));
    }

    #[tokio::test]
    async fn owning_tenants_are_resolved_across_tenants() {
        let db = setup().await;
        let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
        let a = seed(&db, tenant_a, Uuid::new_v4(), Uuid::new_v4()).await;
        let b = seed(&db, tenant_b, Uuid::new_v4(), Uuid::new_v4()).await;
        let missing = Uuid::new_v4();

        let conn = db.conn().unwrap();
        let owners = resolve_owning_tenants::<note::Entity, _>(&conn, &[a.id, b.id, missing])
            .await
            .unwrap();
        assert_eq!(owners.get(&a.id), Some(&tenant_a));
        assert_eq!(owners.get(&b.id), Some(&tenant_b));
        assert!(!owners.contains_key(&missing));
    }

    #[tokio::test]
    async fn narrowed_scope_without_disjuncts_matches_nothing_it_does_not_own() {
        let db = setup().await;
        let tenant = Uuid::new_v4();
        let family = Uuid::new_v4();
        seed(&db, tenant, Uuid::new_v4(), Uuid::new_v4()).await;
        let mine = seed(&db, tenant, family, Uuid::new_v4()).await;

        let scope = AccessScope::tenant(tenant).narrowed(SubjectConstraint::new(family, vec![]));
        assert_eq!(visible_ids(&db, &scope).await, vec![mine.id]);
    }
}
