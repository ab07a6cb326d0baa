use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;

use crate::config::PcrfConfig;
use crate::db::PersistenceGateway;

/// In-memory SQLite store with the full schema applied.
///
/// The pool holds exactly one connection: the in-memory database lives as
/// long as that connection does, and concurrent callers queue on it the way
/// they would queue on a row lock in Postgres.
pub struct TestDb {
    pub gateway: Arc<PersistenceGateway>,
    pub config: PcrfConfig,
}

impl TestDb {
    pub async fn sqlite() -> Self {
        let config = PcrfConfig::for_database("sqlite::memory:");

        let mut options = ConnectOptions::new(config.database_url.clone());
        options
            .max_connections(1)
            .min_connections(1)
            .sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();

        let gateway = PersistenceGateway::from_connection(db);
        gateway.init_schema().await.unwrap();

        Self {
            gateway: Arc::new(gateway),
            config,
        }
    }
}
