use chrono::Utc;
use sea_orm::ConnectionTrait;
use std::sync::Arc;
use tracing::info;

use super::{live_subscriber, validate_bytes, validate_external_id};
use crate::db::entities::usage;
use crate::db::services;
use crate::db::PersistenceGateway;
use crate::error::PcrfError;

/// Cumulative byte usage per subscriber.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    gateway: Arc<PersistenceGateway>,
}

impl UsageTracker {
    pub fn new(gateway: Arc<PersistenceGateway>) -> Self {
        Self { gateway }
    }

    pub async fn get_usage(&self, external_id: &str) -> Result<i64, PcrfError> {
        Ok(self.get_usage_record(external_id).await?.consumed_bytes)
    }

    pub async fn get_usage_record(&self, external_id: &str) -> Result<usage::Model, PcrfError> {
        validate_external_id(external_id)?;
        let conn = self.gateway.conn();
        let subscriber = live_subscriber(conn, external_id, false).await?;
        self.usage_of(conn, subscriber.id).await
    }

    pub async fn usage_of<C: ConnectionTrait>(
        &self,
        conn: &C,
        subscriber_id: i32,
    ) -> Result<usage::Model, PcrfError> {
        services::find_usage(conn, subscriber_id)
            .await?
            .ok_or_else(|| PcrfError::not_found("usage", subscriber_id))
    }

    /// Adds `delta` bytes as one atomic increment. Must run in the same
    /// transaction that completes the session the bytes belong to.
    pub async fn record_consumption<C: ConnectionTrait>(
        &self,
        conn: &C,
        subscriber_id: i32,
        delta: i64,
    ) -> Result<usage::Model, PcrfError> {
        validate_bytes("consumed bytes", delta)?;
        let updated = services::add_consumption(conn, subscriber_id, delta, Utc::now())
            .await?
            .ok_or_else(|| PcrfError::not_found("usage", subscriber_id))?;
        info!(
            subscriber_id,
            delta,
            consumed_bytes = updated.consumed_bytes,
            "Recorded consumption."
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db::TestDb;
    use crate::error::ErrorKind;

    async fn subscriber_with_usage(test_db: &TestDb, external_id: &str) -> i32 {
        let conn = test_db.gateway.conn();
        let now = Utc::now();
        let subscriber = services::insert_subscriber(conn, external_id, now).await.unwrap();
        services::insert_usage(conn, subscriber.id, now).await.unwrap();
        subscriber.id
    }

    #[tokio::test]
    async fn fresh_subscriber_has_zero_usage() {
        let test_db = TestDb::sqlite().await;
        let tracker = UsageTracker::new(test_db.gateway.clone());
        subscriber_with_usage(&test_db, "001010000000001").await;

        assert_eq!(tracker.get_usage("001010000000001").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn consumption_accumulates() {
        let test_db = TestDb::sqlite().await;
        let tracker = UsageTracker::new(test_db.gateway.clone());
        let subscriber_id = subscriber_with_usage(&test_db, "001010000000002").await;
        let conn = test_db.gateway.conn();

        tracker.record_consumption(conn, subscriber_id, 700).await.unwrap();
        let record = tracker.record_consumption(conn, subscriber_id, 300).await.unwrap();
        assert_eq!(record.consumed_bytes, 1_000);
        tracker.record_consumption(conn, subscriber_id, 0).await.unwrap();

        assert_eq!(tracker.get_usage("001010000000002").await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn negative_delta_is_rejected_without_writing() {
        let test_db = TestDb::sqlite().await;
        let tracker = UsageTracker::new(test_db.gateway.clone());
        let subscriber_id = subscriber_with_usage(&test_db, "001010000000003").await;

        let err = tracker
            .record_consumption(test_db.gateway.conn(), subscriber_id, -5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(tracker.get_usage("001010000000003").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_subscriber_is_not_found() {
        let test_db = TestDb::sqlite().await;
        let tracker = UsageTracker::new(test_db.gateway.clone());

        let err = tracker.get_usage("nobody").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = tracker
            .record_consumption(test_db.gateway.conn(), 404, 10)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
