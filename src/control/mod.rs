//! Policy decisions and session orchestration on top of the persistence
//! gateway.
//!
//! Components get their collaborators injected: each holds an
//! `Arc<PersistenceGateway>` and its own settings, and all of them are cheap
//! to clone so they can be moved into a `PersistenceGateway::scoped` body.

pub mod policy_store;
pub mod provisioner;
pub mod reroute_engine;
pub mod session_manager;
pub mod usage_tracker;


pub use policy_store::{DefaultPolicy, NewPolicy, PolicyStore};
pub use provisioner::{FlowProvisioner, ProvisionedPath};
pub use reroute_engine::{has_headroom, RerouteEngine};
pub use session_manager::{ClosedSession, OpenedSession, SessionManager};
pub use usage_tracker::UsageTracker;

use sea_orm::ConnectionTrait;
use std::net::IpAddr;

use crate::db::entities::subscriber;
use crate::db::services;
use crate::error::PcrfError;

pub const MAX_EXTERNAL_ID_LEN: usize = 64;

pub(crate) fn validate_external_id(external_id: &str) -> Result<(), PcrfError> {
    if external_id.trim().is_empty() {
        return Err(PcrfError::Validation(
            "subscriber identifier must not be empty".to_string(),
        ));
    }
    if external_id.len() > MAX_EXTERNAL_ID_LEN {
        return Err(PcrfError::Validation(format!(
            "subscriber identifier longer than {MAX_EXTERNAL_ID_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn parse_ip(value: &str) -> Result<IpAddr, PcrfError> {
    value
        .trim()
        .parse()
        .map_err(|_| PcrfError::Validation(format!("'{value}' is not an IP address")))
}

pub(crate) fn validate_bytes(name: &str, value: i64) -> Result<(), PcrfError> {
    if value < 0 {
        return Err(PcrfError::Validation(format!(
            "{name} must not be negative, got {value}"
        )));
    }
    Ok(())
}

/// Resolves a subscriber that has not been removed, or fails with `NotFound`.
pub(crate) async fn live_subscriber<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
    lock: bool,
) -> Result<subscriber::Model, PcrfError> {
    services::find_live_subscriber(conn, external_id, lock)
        .await?
        .ok_or_else(|| PcrfError::not_found("subscriber", external_id))
}
