use sea_orm::ConnectionTrait;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use super::parse_ip;
use crate::config::PcrfConfig;
use crate::db::entities::{policy, reroute, reroute::DEFAULT_REROUTE_ID};
use crate::db::services;
use crate::db::PersistenceGateway;
use crate::error::PcrfError;

/// The one comparison between usage and a policy cap. Traffic flows natively
/// only while usage is strictly below the cap.
pub fn has_headroom(usage_bytes: i64, policy: &policy::Model) -> bool {
    usage_bytes < policy.data_cap
}

/// Decides whether a new session must be redirected, and owns the reroute
/// targets.
#[derive(Debug, Clone)]
pub struct RerouteEngine {
    gateway: Arc<PersistenceGateway>,
    default_target: IpAddr,
}

impl RerouteEngine {
    pub fn new(gateway: Arc<PersistenceGateway>, default_target: IpAddr) -> Self {
        Self {
            gateway,
            default_target,
        }
    }

    pub fn from_config(gateway: Arc<PersistenceGateway>, config: &PcrfConfig) -> Self {
        Self::new(gateway, config.reroute_target)
    }

    /// `None` while the subscriber has headroom under `policy`; otherwise the
    /// default reroute target, created on first use.
    pub async fn decide<C: ConnectionTrait>(
        &self,
        conn: &C,
        usage_bytes: i64,
        policy: &policy::Model,
    ) -> Result<Option<reroute::Model>, PcrfError> {
        if has_headroom(usage_bytes, policy) {
            debug!(
                usage_bytes,
                data_cap = policy.data_cap,
                policy_id = policy.id,
                "Usage below cap, no reroute."
            );
            return Ok(None);
        }

        let target = self.resolve_default(conn).await?;
        info!(
            usage_bytes,
            data_cap = policy.data_cap,
            policy_id = policy.id,
            reroute_id = target.id,
            target_ip = %target.target_ip,
            "Usage at or above cap, rerouting."
        );
        Ok(Some(target))
    }

    /// The default target: id 1, or whichever row already carries the
    /// configured address. Inserted under id 1 if neither exists. An operator
    /// may have moved it since.
    pub async fn resolve_default<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<reroute::Model, PcrfError> {
        if let Some(existing) = services::find_reroute(conn, DEFAULT_REROUTE_ID).await? {
            return Ok(existing);
        }
        let default_ip = self.default_target.to_string();
        if let Some(existing) = services::find_reroute_by_ip(conn, &default_ip).await? {
            debug!(reroute_id = existing.id, target_ip = %existing.target_ip, "Default address already registered.");
            return Ok(existing);
        }
        let created = services::insert_reroute(conn, DEFAULT_REROUTE_ID, &default_ip).await?;
        info!(reroute_id = created.id, target_ip = %created.target_ip, "Created default reroute target.");
        Ok(created)
    }

    pub async fn default_target(&self) -> Result<reroute::Model, PcrfError> {
        let engine = self.clone();
        self.gateway
            .scoped(move |txn| Box::pin(async move { engine.resolve_default(txn).await }))
            .await
    }

    pub async fn get_reroute(&self, reroute_id: i32) -> Result<reroute::Model, PcrfError> {
        services::find_reroute(self.gateway.conn(), reroute_id)
            .await?
            .ok_or_else(|| PcrfError::not_found("reroute", reroute_id))
    }

    /// Returns the target with this address, creating it under a fresh id if
    /// none exists. The configured default address takes id 1 while that id
    /// is free.
    pub async fn create_reroute(&self, target_ip: &str) -> Result<reroute::Model, PcrfError> {
        let target_ip = parse_ip(target_ip)?.to_string();
        let default_ip = self.default_target.to_string();
        self.gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    if let Some(existing) = services::find_reroute_by_ip(txn, &target_ip).await? {
                        return Ok(existing);
                    }
                    let default_free = target_ip == default_ip
                        && services::find_reroute(txn, DEFAULT_REROUTE_ID).await?.is_none();
                    let reroute_id = if default_free {
                        DEFAULT_REROUTE_ID
                    } else {
                        services::next_reroute_id(txn).await?
                    };
                    let created = services::insert_reroute(txn, reroute_id, &target_ip).await?;
                    info!(reroute_id, target_ip = %created.target_ip, "Created reroute target.");
                    Ok(created)
                })
            })
            .await
    }

    /// Points an existing target at a new address. Flows keep referencing the
    /// same reroute id. An address held by another target is rejected.
    pub async fn update_reroute_target(
        &self,
        reroute_id: i32,
        target_ip: &str,
    ) -> Result<reroute::Model, PcrfError> {
        let target_ip = parse_ip(target_ip)?.to_string();
        let updated = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    if let Some(holder) = services::find_reroute_by_ip(txn, &target_ip).await? {
                        if holder.id != reroute_id {
                            return Err(PcrfError::Validation(format!(
                                "{target_ip} is already the address of reroute {}",
                                holder.id
                            )));
                        }
                    }
                    services::update_reroute_ip(txn, reroute_id, &target_ip)
                        .await?
                        .ok_or_else(|| PcrfError::not_found("reroute", reroute_id))
                })
            })
            .await?;
        info!(reroute_id, target_ip = %updated.target_ip, "Updated reroute target.");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db::TestDb;
    use crate::error::ErrorKind;

    fn policy_with_cap(data_cap: i64) -> policy::Model {
        policy::Model {
            id: 9,
            data_cap,
            downlink_limit: 5000,
            uplink_limit: 1000,
            burst: 0,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn headroom_is_strictly_below_cap() {
        let policy = policy_with_cap(100);
        assert!(has_headroom(99, &policy));
        assert!(!has_headroom(100, &policy));
        assert!(!has_headroom(101, &policy));
        assert!(!has_headroom(0, &policy_with_cap(0)));
    }

    #[tokio::test]
    async fn decide_without_reroute_writes_nothing() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let verdict = engine
            .decide(test_db.gateway.conn(), 10, &policy_with_cap(100))
            .await
            .unwrap();
        assert!(verdict.is_none());
        let missing = engine.get_reroute(DEFAULT_REROUTE_ID).await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn capped_usage_reuses_one_default_target() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);
        let conn = test_db.gateway.conn();

        let first = engine.decide(conn, 100, &policy_with_cap(100)).await.unwrap().unwrap();
        let second = engine.decide(conn, 5_000, &policy_with_cap(100)).await.unwrap().unwrap();

        assert_eq!(first.id, DEFAULT_REROUTE_ID);
        assert_eq!(first.target_ip, "192.168.0.14");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn moved_default_target_is_kept() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        engine.default_target().await.unwrap();
        let moved = engine
            .update_reroute_target(DEFAULT_REROUTE_ID, "10.20.30.40")
            .await
            .unwrap();
        assert_eq!(moved.target_ip, "10.20.30.40");

        let resolved = engine.default_target().await.unwrap();
        assert_eq!(resolved.target_ip, "10.20.30.40");
    }

    #[tokio::test]
    async fn create_reroute_is_idempotent_by_address() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let a = engine.create_reroute("172.16.0.1").await.unwrap();
        let b = engine.create_reroute("172.16.0.1").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a.id, DEFAULT_REROUTE_ID);
    }

    #[tokio::test]
    async fn default_address_created_by_operator_is_the_default_target() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let created = engine.create_reroute("192.168.0.14").await.unwrap();
        assert_eq!(created.id, DEFAULT_REROUTE_ID);

        let verdict = engine
            .decide(test_db.gateway.conn(), 0, &policy_with_cap(0))
            .await
            .unwrap();
        assert_eq!(verdict, Some(created));
    }

    #[tokio::test]
    async fn default_address_moved_onto_another_target_is_reused() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let other = engine.create_reroute("172.16.0.1").await.unwrap();
        let moved = engine
            .update_reroute_target(other.id, "192.168.0.14")
            .await
            .unwrap();

        let resolved = engine.default_target().await.unwrap();
        assert_eq!(resolved, moved);
        assert_ne!(resolved.id, DEFAULT_REROUTE_ID);
    }

    #[tokio::test]
    async fn update_onto_an_address_in_use_is_rejected() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let default = engine.default_target().await.unwrap();
        let other = engine.create_reroute("172.16.0.1").await.unwrap();

        let err = engine
            .update_reroute_target(other.id, &default.target_ip)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        // Re-pointing a target at its own address is a no-op.
        let same = engine.update_reroute_target(other.id, "172.16.0.1").await.unwrap();
        assert_eq!(same, other);
    }

    #[tokio::test]
    async fn update_of_unknown_reroute_is_not_found() {
        let test_db = TestDb::sqlite().await;
        let engine = RerouteEngine::from_config(test_db.gateway.clone(), &test_db.config);

        let err = engine.update_reroute_target(42, "10.0.0.1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = engine.update_reroute_target(42, "not-an-ip").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
