use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::SessionState;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(indexed)]
    pub subscriber_id: i32,
    /// Policy in force when the session was opened.
    pub policy_id: i32,
    pub ue_ip: String,
    pub start_time: DateTimeUtc,
    pub end_time: Option<DateTimeUtc>,
    pub tx_bytes: i64,
    pub rx_bytes: i64,
    pub total_bytes: i64,
    /// Downlink meter (traffic transmitted towards the UE).
    pub tx_meter_id: i32,
    /// Uplink meter (traffic received from the UE).
    pub rx_meter_id: i32,
    #[sea_orm(indexed)]
    pub state: SessionState,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::subscriber::Entity",
        from = "Column::SubscriberId",
        to = "super::subscriber::Column::Id"
    )]
    Subscriber,
    #[sea_orm(
        belongs_to = "super::policy::Entity",
        from = "Column::PolicyId",
        to = "super::policy::Column::Id"
    )]
    Policy,
    #[sea_orm(
        belongs_to = "super::meter::Entity",
        from = "Column::TxMeterId",
        to = "super::meter::Column::Id"
    )]
    TxMeter,
    #[sea_orm(
        belongs_to = "super::meter::Entity",
        from = "Column::RxMeterId",
        to = "super::meter::Column::Id"
    )]
    RxMeter,
}

impl Related<super::subscriber::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Subscriber.def()
    }
}

impl Related<super::policy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Policy.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
