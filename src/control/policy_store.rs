use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{live_subscriber, validate_external_id};
use crate::config::PcrfConfig;
use crate::db::entities::policy::{self, DEFAULT_POLICY_ID};
use crate::db::services;
use crate::db::PersistenceGateway;
use crate::error::PcrfError;

/// Values the default policy is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultPolicy {
    pub data_cap: i64,
    pub downlink_limit: i64,
    pub uplink_limit: i64,
    pub burst: i64,
}

impl DefaultPolicy {
    pub fn from_config(config: &PcrfConfig) -> Self {
        Self {
            data_cap: config.default_policy_data_cap,
            downlink_limit: config.default_policy_downlink,
            uplink_limit: config.default_policy_uplink,
            burst: config.default_policy_burst,
        }
    }

    fn to_model(self) -> policy::Model {
        policy::Model {
            id: DEFAULT_POLICY_ID,
            data_cap: self.data_cap,
            downlink_limit: self.downlink_limit,
            uplink_limit: self.uplink_limit,
            burst: self.burst,
            start_time: None,
            end_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPolicy {
    pub data_cap: i64,
    pub downlink_limit: i64,
    pub uplink_limit: i64,
    #[serde(default)]
    pub burst: i64,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

/// Picks the policy in force from an ordered assignment list: the first one
/// valid at `now`. Its cap decides the reroute, whether or not it is
/// exhausted. `None` when no assigned policy is valid.
pub fn select_applicable(
    assigned: &[policy::Model],
    now: DateTime<Utc>,
) -> Option<&policy::Model> {
    assigned.iter().find(|p| p.is_valid_at(now))
}

fn validate_policy(
    data_cap: i64,
    downlink_limit: i64,
    uplink_limit: i64,
    burst: i64,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
) -> Result<(), PcrfError> {
    for (name, value) in [
        ("data_cap", data_cap),
        ("downlink_limit", downlink_limit),
        ("uplink_limit", uplink_limit),
        ("burst", burst),
    ] {
        if value < 0 {
            return Err(PcrfError::Validation(format!(
                "{name} must not be negative, got {value}"
            )));
        }
    }
    if let (Some(start), Some(end)) = (start_time, end_time) {
        if start >= end {
            return Err(PcrfError::Validation(format!(
                "policy window starts at {start} but ends at {end}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PolicyStore {
    gateway: Arc<PersistenceGateway>,
    defaults: DefaultPolicy,
}

impl PolicyStore {
    pub fn new(gateway: Arc<PersistenceGateway>, defaults: DefaultPolicy) -> Self {
        Self { gateway, defaults }
    }

    pub fn from_config(gateway: Arc<PersistenceGateway>, config: &PcrfConfig) -> Self {
        Self::new(gateway, DefaultPolicy::from_config(config))
    }

    /// Inserts the default policy unless it already exists. An existing
    /// default is returned unchanged.
    pub async fn create_default_policy(&self) -> Result<policy::Model, PcrfError> {
        let store = self.clone();
        self.gateway
            .scoped(move |txn| Box::pin(async move { store.ensure_default_policy(txn).await }))
            .await
    }

    pub async fn ensure_default_policy<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<policy::Model, PcrfError> {
        if let Some(existing) = services::find_policy(conn, DEFAULT_POLICY_ID).await? {
            return Ok(existing);
        }
        let created = services::insert_policy(conn, self.defaults.to_model()).await?;
        info!(
            policy_id = created.id,
            data_cap = created.data_cap,
            downlink_limit = created.downlink_limit,
            uplink_limit = created.uplink_limit,
            "Created default policy."
        );
        Ok(created)
    }

    pub async fn get_policy(&self, policy_id: i32) -> Result<policy::Model, PcrfError> {
        services::find_policy(self.gateway.conn(), policy_id)
            .await?
            .ok_or_else(|| PcrfError::not_found("policy", policy_id))
    }

    pub async fn list_policies(&self) -> Result<Vec<policy::Model>, PcrfError> {
        Ok(services::list_policies(self.gateway.conn()).await?)
    }

    pub async fn create_policy(&self, new_policy: NewPolicy) -> Result<policy::Model, PcrfError> {
        validate_policy(
            new_policy.data_cap,
            new_policy.downlink_limit,
            new_policy.uplink_limit,
            new_policy.burst,
            new_policy.start_time,
            new_policy.end_time,
        )?;

        let created = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let id = services::next_policy_id(txn).await?;
                    let model = policy::Model {
                        id,
                        data_cap: new_policy.data_cap,
                        downlink_limit: new_policy.downlink_limit,
                        uplink_limit: new_policy.uplink_limit,
                        burst: new_policy.burst,
                        start_time: new_policy.start_time,
                        end_time: new_policy.end_time,
                    };
                    Ok(services::insert_policy(txn, model).await?)
                })
            })
            .await?;
        info!(policy_id = created.id, data_cap = created.data_cap, "Created policy.");
        Ok(created)
    }

    /// Persists new limits for an existing policy. Sessions already open keep
    /// the meters they were provisioned with.
    pub async fn update_policy(&self, policy: policy::Model) -> Result<policy::Model, PcrfError> {
        validate_policy(
            policy.data_cap,
            policy.downlink_limit,
            policy.uplink_limit,
            policy.burst,
            policy.start_time,
            policy.end_time,
        )?;

        let policy_id = policy.id;
        let updated = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    services::update_policy(txn, policy)
                        .await?
                        .ok_or_else(|| PcrfError::not_found("policy", policy_id))
                })
            })
            .await?;
        info!(policy_id, data_cap = updated.data_cap, "Updated policy.");
        Ok(updated)
    }

    /// Places `policy_id` at `position` in the subscriber's assignment list,
    /// moving it if already assigned. Positions past the end append. Returns
    /// the new ordered list.
    pub async fn assign_policy(
        &self,
        external_id: &str,
        policy_id: i32,
        position: usize,
    ) -> Result<Vec<policy::Model>, PcrfError> {
        validate_external_id(external_id)?;
        let external_id = external_id.to_owned();

        let assigned = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let subscriber = live_subscriber(txn, &external_id, true).await?;
                    if services::find_policy(txn, policy_id).await?.is_none() {
                        return Err(PcrfError::not_found("policy", policy_id));
                    }

                    let mut ids: Vec<i32> = services::assigned_policies(txn, subscriber.id)
                        .await?
                        .into_iter()
                        .map(|p| p.id)
                        .filter(|id| *id != policy_id)
                        .collect();
                    ids.insert(position.min(ids.len()), policy_id);

                    services::replace_policy_assignment(txn, subscriber.id, &ids).await?;
                    Ok(services::assigned_policies(txn, subscriber.id).await?)
                })
            })
            .await?;
        info!(policy_id, position, assigned = assigned.len(), "Assigned policy.");
        Ok(assigned)
    }

    pub async fn get_applicable_policy(
        &self,
        external_id: &str,
    ) -> Result<policy::Model, PcrfError> {
        validate_external_id(external_id)?;
        let external_id = external_id.to_owned();
        let store = self.clone();

        self.gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let subscriber = live_subscriber(txn, &external_id, false).await?;
                    store.applicable_policy(txn, subscriber.id, Utc::now()).await
                })
            })
            .await
    }

    /// The policy in force for a subscriber. Falls back to the default policy
    /// when no assigned policy is valid.
    pub async fn applicable_policy<C: ConnectionTrait>(
        &self,
        conn: &C,
        subscriber_id: i32,
        now: DateTime<Utc>,
    ) -> Result<policy::Model, PcrfError> {
        let assigned = services::assigned_policies(conn, subscriber_id).await?;
        match select_applicable(&assigned, now) {
            Some(policy) => Ok(policy.clone()),
            None => self.ensure_default_policy(conn).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::has_headroom;
    use crate::db::test_db::TestDb;
    use crate::error::ErrorKind;
    use chrono::Duration;

    fn policy(id: i32, data_cap: i64) -> policy::Model {
        policy::Model {
            id,
            data_cap,
            downlink_limit: 5000,
            uplink_limit: 1000,
            burst: 0,
            start_time: None,
            end_time: None,
        }
    }

    fn new_policy(data_cap: i64) -> NewPolicy {
        NewPolicy {
            data_cap,
            downlink_limit: 20_000,
            uplink_limit: 4_000,
            burst: 128,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn first_valid_policy_applies_even_when_exhausted() {
        let now = Utc::now();
        let assigned = vec![policy(2, 100), policy(3, 1_000), policy(4, 10_000)];

        let applicable = select_applicable(&assigned, now).unwrap();
        assert_eq!(applicable.id, 2);
        // Usage past the first cap does not fall through to a roomier policy.
        assert!(!has_headroom(5_000, applicable));
    }

    #[test]
    fn selection_skips_policies_outside_their_window() {
        let now = Utc::now();
        let mut expired = policy(2, 1_000);
        expired.end_time = Some(now - Duration::hours(1));
        let mut future = policy(3, 1_000);
        future.start_time = Some(now + Duration::hours(1));
        let current = policy(4, 10);

        let assigned = vec![expired.clone(), future.clone(), current];
        assert_eq!(select_applicable(&assigned, now).unwrap().id, 4);
        assert!(select_applicable(&[expired, future], now).is_none());
        assert!(select_applicable(&[], now).is_none());
    }

    #[test]
    fn policy_validation() {
        let now = Utc::now();
        assert!(validate_policy(0, 0, 0, 0, None, None).is_ok());
        assert!(validate_policy(1, 2, 3, 4, Some(now), Some(now + Duration::days(1))).is_ok());
        assert_eq!(
            validate_policy(-1, 0, 0, 0, None, None).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            validate_policy(0, 0, 0, 0, Some(now), Some(now)).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn default_policy_is_created_once() {
        let test_db = TestDb::sqlite().await;
        let store = PolicyStore::from_config(test_db.gateway.clone(), &test_db.config);

        let first = store.create_default_policy().await.unwrap();
        assert_eq!(first, policy(DEFAULT_POLICY_ID, 0));

        let mut changed = first.clone();
        changed.downlink_limit = 9_000;
        store.update_policy(changed).await.unwrap();

        // A second bootstrap keeps the operator's change.
        let second = store.create_default_policy().await.unwrap();
        assert_eq!(second.downlink_limit, 9_000);
        assert_eq!(store.list_policies().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn created_policies_never_take_the_default_id() {
        let test_db = TestDb::sqlite().await;
        let store = PolicyStore::from_config(test_db.gateway.clone(), &test_db.config);

        let early = store.create_policy(new_policy(1_000)).await.unwrap();
        assert_eq!(early.id, 2);
        let default = store.create_default_policy().await.unwrap();
        assert_eq!(default.id, DEFAULT_POLICY_ID);
        let later = store.create_policy(new_policy(2_000)).await.unwrap();
        assert_eq!(later.id, 3);
        assert_eq!(later.burst, 128);

        let ids: Vec<i32> = store.list_policies().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn get_and_update_of_unknown_policy_fail() {
        let test_db = TestDb::sqlite().await;
        let store = PolicyStore::from_config(test_db.gateway.clone(), &test_db.config);

        assert_eq!(store.get_policy(77).await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            store.update_policy(policy(77, 10)).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            store.update_policy(policy(77, -10)).await.unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[tokio::test]
    async fn unknown_subscriber_has_no_applicable_policy() {
        let test_db = TestDb::sqlite().await;
        let store = PolicyStore::from_config(test_db.gateway.clone(), &test_db.config);

        let err = store.get_applicable_policy("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store.assign_policy("missing", DEFAULT_POLICY_ID, 0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
