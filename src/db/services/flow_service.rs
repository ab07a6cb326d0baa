use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use tracing::debug;

use crate::db::entities::flow;

/// Column values for a new forwarding rule; the cookie is drawn on insert.
#[derive(Debug, Clone)]
pub struct NewFlow {
    pub table_id: i32,
    pub priority: i32,
    pub ue_ip: String,
    pub meter_id: i32,
    pub reroute_id: Option<i32>,
}

pub async fn cookie_in_use<C: ConnectionTrait>(conn: &C, cookie: i64) -> Result<bool, DbErr> {
    let count = flow::Entity::find()
        .filter(flow::Column::Cookie.eq(cookie))
        .count(conn)
        .await?;
    Ok(count > 0)
}

/// Inserts the flow under a random 32-bit cookie not used by any other flow.
pub async fn insert_flow<C: ConnectionTrait>(conn: &C, new: NewFlow) -> Result<flow::Model, DbErr> {
    let cookie = loop {
        let candidate = i64::from(rand::random::<u32>());
        if !cookie_in_use(conn, candidate).await? {
            break candidate;
        }
        debug!(cookie = candidate, "Flow cookie already taken, drawing again.");
    };

    flow::ActiveModel {
        table_id: Set(new.table_id),
        priority: Set(new.priority),
        cookie: Set(cookie),
        ue_ip: Set(new.ue_ip),
        reroute_id: Set(new.reroute_id),
        meter_id: Set(new.meter_id),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn flows_for_meters<C: ConnectionTrait>(
    conn: &C,
    meter_ids: Vec<i32>,
) -> Result<Vec<flow::Model>, DbErr> {
    if meter_ids.is_empty() {
        return Ok(Vec::new());
    }
    flow::Entity::find()
        .filter(flow::Column::MeterId.is_in(meter_ids))
        .order_by_asc(flow::Column::Id)
        .all(conn)
        .await
}
