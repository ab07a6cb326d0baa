use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Id of the system default policy, created once at bootstrap.
pub const DEFAULT_POLICY_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "policies")]
pub struct Model {
    // Ids are allocated by the store layer so that the default policy can
    // always own id 1.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,
    /// Data-volume cap in bytes. Usage at or above it triggers a reroute.
    pub data_cap: i64,
    /// Downlink bit-rate limit.
    pub downlink_limit: i64,
    /// Uplink bit-rate limit.
    pub uplink_limit: i64,
    pub burst: i64,
    pub start_time: Option<DateTimeUtc>,
    pub end_time: Option<DateTimeUtc>,
}

impl Model {
    /// Whether `now` falls inside the policy's validity window. An open bound
    /// never excludes.
    pub fn is_valid_at(&self, now: DateTimeUtc) -> bool {
        self.start_time.is_none_or(|start| start <= now)
            && self.end_time.is_none_or(|end| now < end)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::subscriber_policy::Entity")]
    SubscriberPolicy,
}

impl Related<super::subscriber_policy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubscriberPolicy.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
