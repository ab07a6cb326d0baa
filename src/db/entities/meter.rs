use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::Direction;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "meters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub rate: i64,
    pub burst: i64,
    pub direction: Direction,
    // Back-reference, filled in once the flow row exists. Kept without a
    // foreign key since flows.meter_id already points the other way.
    pub flow_id: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::flow::Entity")]
    Flow,
}

impl Related<super::flow::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Flow.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
