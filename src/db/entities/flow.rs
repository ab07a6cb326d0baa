use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "flows")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub table_id: i32,
    pub priority: i32,
    /// Opaque handle the forwarding plane uses to address this rule.
    #[sea_orm(unique)]
    pub cookie: i64,
    pub ue_ip: String,
    pub reroute_id: Option<i32>,
    pub meter_id: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::meter::Entity",
        from = "Column::MeterId",
        to = "super::meter::Column::Id"
    )]
    Meter,
    #[sea_orm(
        belongs_to = "super::reroute::Entity",
        from = "Column::RerouteId",
        to = "super::reroute::Column::Id"
    )]
    Reroute,
}

impl Related<super::meter::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Meter.def()
    }
}

impl Related<super::reroute::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reroute.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
