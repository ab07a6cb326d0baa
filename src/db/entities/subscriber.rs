use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscribers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// IMSI-equivalent identifier handed to us by the gateway layer.
    #[sea_orm(unique)]
    pub external_id: String,
    pub created_at: DateTimeUtc,
    /// Soft-delete marker. Rows are never removed while sessions point at them.
    pub deleted_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::usage::Entity")]
    Usage,
    #[sea_orm(has_many = "super::session::Entity")]
    Session,
    #[sea_orm(has_many = "super::subscriber_policy::Entity")]
    SubscriberPolicy,
}

impl Related<super::usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Usage.def()
    }
}

impl Related<super::session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::subscriber_policy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubscriberPolicy.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
