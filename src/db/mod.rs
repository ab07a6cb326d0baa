//! Persistence gateway: the only component that talks to the store.
//!
//! Table access lives in [`services`]; every function there is generic over
//! [`ConnectionTrait`] so it can run against the pool or inside a transaction
//! opened with [`PersistenceGateway::scoped`].

pub mod entities;
pub mod enums;
pub mod models;
pub mod services;

#[cfg(test)]
pub mod test_db;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, Schema, TransactionTrait,
};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

use crate::config::PcrfConfig;
use crate::error::PcrfError;
use entities::{flow, meter, policy, reroute, session, subscriber, subscriber_policy, usage};

/// Future returned by the body of a [`PersistenceGateway::scoped`] call.
pub type ScopedFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, PcrfError>> + Send + 'c>>;

const ONE_ACTIVE_SESSION_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active \
     ON sessions (subscriber_id) WHERE state = 'ACTIVE'";

#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    db: DatabaseConnection,
}

impl PersistenceGateway {
    pub async fn connect(config: &PcrfConfig) -> Result<Self, PcrfError> {
        let mut opt = ConnectOptions::new(config.database_url.to_owned());
        opt.max_connections(config.max_connections)
            .sqlx_logging(false);

        let db = Database::connect(opt).await?;
        info!(
            backend = ?db.get_database_backend(),
            max_connections = config.max_connections,
            "Connected to policy store."
        );
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Pool handle for single-statement reads.
    pub fn conn(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Creates every table (if missing) in foreign-key order, plus the index
    /// that lets the store itself reject a second active session.
    pub async fn init_schema(&self) -> Result<(), PcrfError> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);

        create_table(&self.db, &schema, policy::Entity).await?;
        create_table(&self.db, &schema, reroute::Entity).await?;
        create_table(&self.db, &schema, subscriber::Entity).await?;
        create_table(&self.db, &schema, subscriber_policy::Entity).await?;
        create_table(&self.db, &schema, usage::Entity).await?;
        create_table(&self.db, &schema, meter::Entity).await?;
        create_table(&self.db, &schema, flow::Entity).await?;
        create_table(&self.db, &schema, session::Entity).await?;

        self.db.execute_unprepared(ONE_ACTIVE_SESSION_INDEX).await?;
        info!("Policy store schema is ready.");
        Ok(())
    }

    /// Runs `op` inside one transaction. Commits when it returns `Ok`, rolls
    /// back when it returns `Err`. Dropping the returned future before it
    /// completes drops the transaction, which also rolls back.
    ///
    /// A failed `COMMIT` is reported as a storage failure with an unknown
    /// outcome; see [`PcrfError::is_indeterminate`].
    pub async fn scoped<T, F>(&self, op: F) -> Result<T, PcrfError>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> ScopedFuture<'c, T> + Send,
        T: Send,
    {
        let txn = self.db.begin().await?;

        match op(&txn).await {
            Ok(value) => {
                txn.commit().await.map_err(|e| {
                    error!(error = %e, "Error committing transaction; outcome unknown.");
                    PcrfError::commit_failed(e)
                })?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "Rolling back transaction.");
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(error = %rollback_err, "Error rolling back transaction.");
                }
                Err(err)
            }
        }
    }
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let backend = db.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    db.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services;
    use crate::db::test_db::TestDb;
    use crate::error::{CommitOutcome, ErrorKind};
    use sea_orm::{ActiveModelTrait, PaginatorTrait, Set};

    fn policy_row(id: i32) -> policy::ActiveModel {
        policy::ActiveModel {
            id: Set(id),
            data_cap: Set(1_000),
            downlink_limit: Set(10),
            uplink_limit: Set(5),
            burst: Set(0),
            start_time: Set(None),
            end_time: Set(None),
        }
    }

    #[tokio::test]
    async fn init_schema_is_repeatable() {
        let test_db = TestDb::sqlite().await;
        test_db.gateway.init_schema().await.unwrap();
        test_db.gateway.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn scoped_commits_on_ok() {
        let test_db = TestDb::sqlite().await;
        let gateway = &test_db.gateway;

        gateway
            .scoped(|txn| {
                Box::pin(async move {
                    policy_row(7).insert(txn).await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let count = policy::Entity::find().count(gateway.conn()).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn scoped_rolls_back_every_write_on_err() {
        let test_db = TestDb::sqlite().await;
        let gateway = &test_db.gateway;

        let result: Result<(), PcrfError> = gateway
            .scoped(|txn| {
                Box::pin(async move {
                    policy_row(7).insert(txn).await?;
                    policy_row(8).insert(txn).await?;
                    Err(PcrfError::Conflict("late failure".to_string()))
                })
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
        let count = policy::Entity::find().count(gateway.conn()).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn duplicate_key_inside_scope_is_a_storage_failure() {
        let test_db = TestDb::sqlite().await;
        let gateway = &test_db.gateway;

        let err = gateway
            .scoped(|txn| {
                Box::pin(async move {
                    let row = policy::Model {
                        id: 3,
                        data_cap: 1_000,
                        downlink_limit: 10,
                        uplink_limit: 5,
                        burst: 0,
                        start_time: None,
                        end_time: None,
                    };
                    services::insert_policy(txn, row.clone()).await?;
                    services::insert_policy(txn, row).await?;
                    Ok(())
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PcrfError::Storage {
                outcome: CommitOutcome::RolledBack,
                ..
            }
        ));
        let count = policy::Entity::find().count(gateway.conn()).await.unwrap();
        assert_eq!(count, 0);
    }
}
