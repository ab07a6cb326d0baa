use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{meter, policy, session, subscriber, usage};
use crate::db::enums::SessionState;

/// A session together with the rows it references, loaded with one join for
/// the subscriber and one batched lookup for the meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session: session::Model,
    pub external_id: String,
    pub tx_meter: meter::Model,
    pub rx_meter: meter::Model,
}

/// The fact the billing pipeline consumes once a session is completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingRecord {
    pub session_id: i32,
    pub external_id: String,
    pub policy_id: i32,
    pub ue_ip: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tx_bytes: i64,
    pub rx_bytes: i64,
    pub total_bytes: i64,
}

impl ChargingRecord {
    /// Builds the record for a completed session. Active sessions have no
    /// final counters yet and yield `None`.
    pub fn from_details(details: &SessionDetails) -> Option<Self> {
        let session = &details.session;
        if session.state != SessionState::Completed {
            return None;
        }
        Some(ChargingRecord {
            session_id: session.id,
            external_id: details.external_id.clone(),
            policy_id: session.policy_id,
            ue_ip: session.ue_ip.clone(),
            start_time: session.start_time,
            end_time: session.end_time?,
            tx_bytes: session.tx_bytes,
            rx_bytes: session.rx_bytes,
            total_bytes: session.total_bytes,
        })
    }
}

/// Subscriber as seen by callers: identity, current usage and the ordered
/// policy assignment (first entry is the effective policy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberProfile {
    pub subscriber: subscriber::Model,
    pub usage: usage::Model,
    pub policies: Vec<policy::Model>,
}
