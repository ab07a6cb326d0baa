use chrono::{DateTime, Utc};
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    live_subscriber, parse_ip, validate_bytes, validate_external_id, FlowProvisioner,
    PolicyStore, ProvisionedPath, RerouteEngine, UsageTracker,
};
use crate::config::PcrfConfig;
use crate::db::entities::{flow, policy, reroute, session, subscriber, usage};
use crate::db::enums::{Direction, SessionState};
use crate::db::models::{ChargingRecord, SessionDetails, SubscriberProfile};
use crate::db::services::{self, NewSession};
use crate::db::PersistenceGateway;
use crate::error::PcrfError;

/// Inserts a subscriber row. A taken external id is a `Conflict`.
pub(crate) async fn insert_new_subscriber<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
    now: DateTime<Utc>,
) -> Result<subscriber::Model, PcrfError> {
    services::insert_subscriber(conn, external_id, now)
        .await
        .map_err(|e| {
            PcrfError::conflict_on_duplicate(e, || format!("subscriber {external_id} already exists"))
        })
}

/// Inserts an `Active` session. The store's one-active-session index turns a
/// concurrent second open into a `Conflict`.
pub(crate) async fn insert_active_session<C: ConnectionTrait>(
    conn: &C,
    new: NewSession,
) -> Result<session::Model, PcrfError> {
    let subscriber_id = new.subscriber_id;
    services::insert_session(conn, new).await.map_err(|e| {
        PcrfError::conflict_on_duplicate(e, || {
            format!("subscriber {subscriber_id} already has an active session")
        })
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedSession {
    pub session: session::Model,
    pub policy: policy::Model,
    pub downlink: ProvisionedPath,
    pub uplink: ProvisionedPath,
    pub reroute: Option<reroute::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSession {
    pub session: session::Model,
    pub usage: usage::Model,
}

/// Orchestrates subscriber onboarding and the session lifecycle. Every
/// multi-row write runs in one scoped transaction.
#[derive(Debug, Clone)]
pub struct SessionManager {
    gateway: Arc<PersistenceGateway>,
    policies: PolicyStore,
    usage: UsageTracker,
    provisioner: FlowProvisioner,
    reroutes: RerouteEngine,
}

impl SessionManager {
    pub fn new(gateway: Arc<PersistenceGateway>, config: &PcrfConfig) -> Self {
        Self {
            policies: PolicyStore::from_config(gateway.clone(), config),
            usage: UsageTracker::new(gateway.clone()),
            provisioner: FlowProvisioner::from_config(config),
            reroutes: RerouteEngine::from_config(gateway.clone(), config),
            gateway,
        }
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    pub fn reroutes(&self) -> &RerouteEngine {
        &self.reroutes
    }

    pub async fn onboard_subscriber(
        &self,
        external_id: &str,
    ) -> Result<SubscriberProfile, PcrfError> {
        validate_external_id(external_id)?;
        let external_id = external_id.to_owned();
        let policies = self.policies.clone();

        let profile = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    if services::find_subscriber_any(txn, &external_id).await?.is_some() {
                        return Err(PcrfError::Conflict(format!(
                            "subscriber {external_id} already exists"
                        )));
                    }
                    let default_policy = policies.ensure_default_policy(txn).await?;

                    let now = Utc::now();
                    let subscriber = insert_new_subscriber(txn, &external_id, now).await?;
                    let usage = services::insert_usage(txn, subscriber.id, now).await?;
                    services::replace_policy_assignment(txn, subscriber.id, &[default_policy.id])
                        .await?;

                    Ok(SubscriberProfile {
                        subscriber,
                        usage,
                        policies: vec![default_policy],
                    })
                })
            })
            .await?;

        info!(
            subscriber_id = profile.subscriber.id,
            external_id = %profile.subscriber.external_id,
            "Onboarded subscriber."
        );
        Ok(profile)
    }

    pub async fn get_subscriber(&self, external_id: &str) -> Result<SubscriberProfile, PcrfError> {
        validate_external_id(external_id)?;
        let conn = self.gateway.conn();
        let subscriber = live_subscriber(conn, external_id, false).await?;
        let usage = self.usage.usage_of(conn, subscriber.id).await?;
        let policies = services::assigned_policies(conn, subscriber.id).await?;
        Ok(SubscriberProfile {
            subscriber,
            usage,
            policies,
        })
    }

    /// Soft-deletes a subscriber. Past sessions and usage stay readable by
    /// session id; the external id stays reserved.
    pub async fn remove_subscriber(&self, external_id: &str) -> Result<(), PcrfError> {
        validate_external_id(external_id)?;
        let external_id = external_id.to_owned();

        self.gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let subscriber = live_subscriber(txn, &external_id, true).await?;
                    if let Some(active) = services::find_active_session(txn, subscriber.id).await? {
                        return Err(PcrfError::Conflict(format!(
                            "subscriber {external_id} has active session {}",
                            active.id
                        )));
                    }
                    if services::soft_delete_subscriber(txn, subscriber.id, Utc::now()).await? == 0
                    {
                        return Err(PcrfError::not_found("subscriber", &external_id));
                    }
                    info!(subscriber_id = subscriber.id, external_id = %external_id, "Removed subscriber.");
                    Ok(())
                })
            })
            .await
    }

    pub async fn get_usage(&self, external_id: &str) -> Result<i64, PcrfError> {
        self.usage.get_usage(external_id).await
    }

    pub async fn get_applicable_policy(
        &self,
        external_id: &str,
    ) -> Result<policy::Model, PcrfError> {
        self.policies.get_applicable_policy(external_id).await
    }

    /// Opens a session: decides the policy and reroute verdict from current
    /// usage, provisions a metered flow per direction and stores the session
    /// as `Active`. Nothing is written unless every step succeeds.
    pub async fn open_session(
        &self,
        external_id: &str,
        ue_ip: &str,
    ) -> Result<OpenedSession, PcrfError> {
        validate_external_id(external_id)?;
        let ue_ip = parse_ip(ue_ip)?;
        let external_id = external_id.to_owned();
        let policies = self.policies.clone();
        let usage = self.usage.clone();
        let provisioner = self.provisioner;
        let reroutes = self.reroutes.clone();

        let result = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    // Locking the subscriber row serialises concurrent opens
                    // for the same subscriber on backends with row locks.
                    let subscriber = live_subscriber(txn, &external_id, true).await?;
                    if let Some(active) = services::find_active_session(txn, subscriber.id).await? {
                        return Err(PcrfError::Conflict(format!(
                            "subscriber {external_id} already has active session {}",
                            active.id
                        )));
                    }

                    let now = Utc::now();
                    let consumed = usage.usage_of(txn, subscriber.id).await?.consumed_bytes;
                    let policy = policies
                        .applicable_policy(txn, subscriber.id, now)
                        .await?;
                    let reroute = reroutes.decide(txn, consumed, &policy).await?;

                    let downlink = provisioner
                        .provision_direction(txn, ue_ip, Direction::Downlink, &policy, reroute.as_ref())
                        .await?;
                    let uplink = provisioner
                        .provision_direction(txn, ue_ip, Direction::Uplink, &policy, reroute.as_ref())
                        .await?;

                    let session = insert_active_session(
                        txn,
                        NewSession {
                            subscriber_id: subscriber.id,
                            policy_id: policy.id,
                            ue_ip: ue_ip.to_string(),
                            tx_meter_id: downlink.meter.id,
                            rx_meter_id: uplink.meter.id,
                            start_time: now,
                        },
                    )
                    .await?;

                    Ok(OpenedSession {
                        session,
                        policy,
                        downlink,
                        uplink,
                        reroute,
                    })
                })
            })
            .await;

        match &result {
            Ok(opened) => info!(
                session_id = opened.session.id,
                subscriber_id = opened.session.subscriber_id,
                policy_id = opened.policy.id,
                ue_ip = %opened.session.ue_ip,
                rerouted = opened.reroute.is_some(),
                "Opened session."
            ),
            Err(e) => warn!(ue_ip = %ue_ip, error = %e, "Failed to open session."),
        }
        result
    }

    /// Completes an `Active` session with its final counters and adds the
    /// total to the subscriber's usage, in one transaction.
    pub async fn close_session(
        &self,
        session_id: i32,
        tx_bytes: i64,
        rx_bytes: i64,
    ) -> Result<ClosedSession, PcrfError> {
        validate_bytes("tx_bytes", tx_bytes)?;
        validate_bytes("rx_bytes", rx_bytes)?;
        let total_bytes = tx_bytes.checked_add(rx_bytes).ok_or_else(|| {
            PcrfError::Validation(format!("tx_bytes {tx_bytes} + rx_bytes {rx_bytes} overflows"))
        })?;
        let usage = self.usage.clone();

        let result = self
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let session = services::find_session(txn, session_id, true)
                        .await?
                        .ok_or_else(|| PcrfError::not_found("session", session_id))?;
                    if session.state != SessionState::Active {
                        return Err(PcrfError::Conflict(format!(
                            "session {session_id} is already {}",
                            session.state
                        )));
                    }

                    let now = Utc::now();
                    let updated = services::complete_session(
                        txn,
                        session_id,
                        tx_bytes,
                        rx_bytes,
                        total_bytes,
                        now,
                    )
                    .await?;
                    if updated == 0 {
                        return Err(PcrfError::Conflict(format!(
                            "session {session_id} was closed concurrently"
                        )));
                    }

                    let usage = usage
                        .record_consumption(txn, session.subscriber_id, total_bytes)
                        .await?;
                    let session = services::find_session(txn, session_id, false)
                        .await?
                        .ok_or_else(|| PcrfError::not_found("session", session_id))?;
                    Ok(ClosedSession { session, usage })
                })
            })
            .await;

        match &result {
            Ok(closed) => info!(
                session_id,
                subscriber_id = closed.session.subscriber_id,
                total_bytes,
                consumed_bytes = closed.usage.consumed_bytes,
                "Closed session."
            ),
            Err(e) => warn!(session_id, error = %e, "Failed to close session."),
        }
        result
    }

    pub async fn get_session(&self, session_id: i32) -> Result<SessionDetails, PcrfError> {
        services::session_details(self.gateway.conn(), session_id)
            .await?
            .ok_or_else(|| PcrfError::not_found("session", session_id))
    }

    pub async fn list_active_sessions(&self) -> Result<Vec<SessionDetails>, PcrfError> {
        Ok(services::active_session_details(self.gateway.conn()).await?)
    }

    pub async fn get_active_session(
        &self,
        external_id: &str,
    ) -> Result<Option<SessionDetails>, PcrfError> {
        let sessions = self
            .subscriber_sessions(external_id, Some(SessionState::Active))
            .await?;
        Ok(sessions.into_iter().next())
    }

    pub async fn sessions_for_subscriber(
        &self,
        external_id: &str,
    ) -> Result<Vec<SessionDetails>, PcrfError> {
        self.subscriber_sessions(external_id, None).await
    }

    /// Flows of the subscriber's active session, downlink first. Empty when
    /// no session is open.
    pub async fn flows_for_subscriber(
        &self,
        external_id: &str,
    ) -> Result<Vec<flow::Model>, PcrfError> {
        let Some(active) = self.get_active_session(external_id).await? else {
            return Ok(Vec::new());
        };
        let mut flows = services::flows_for_meters(
            self.gateway.conn(),
            vec![active.tx_meter.id, active.rx_meter.id],
        )
        .await?;
        flows.sort_by_key(|f| f.meter_id != active.tx_meter.id);
        Ok(flows)
    }

    pub async fn charging_record(&self, session_id: i32) -> Result<ChargingRecord, PcrfError> {
        let details = self.get_session(session_id).await?;
        ChargingRecord::from_details(&details).ok_or_else(|| {
            PcrfError::Conflict(format!("session {session_id} is still active"))
        })
    }

    /// Charging records of every completed session of the subscriber, oldest
    /// first.
    pub async fn charging_records(
        &self,
        external_id: &str,
    ) -> Result<Vec<ChargingRecord>, PcrfError> {
        let sessions = self
            .subscriber_sessions(external_id, Some(SessionState::Completed))
            .await?;
        Ok(sessions.iter().filter_map(ChargingRecord::from_details).collect())
    }

    async fn subscriber_sessions(
        &self,
        external_id: &str,
        state: Option<SessionState>,
    ) -> Result<Vec<SessionDetails>, PcrfError> {
        validate_external_id(external_id)?;
        let conn = self.gateway.conn();
        let subscriber = live_subscriber(conn, external_id, false).await?;
        Ok(services::subscriber_session_details(conn, subscriber.id, state).await?)
    }
}
