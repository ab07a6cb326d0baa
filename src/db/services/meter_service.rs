use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, Set,
};

use crate::db::entities::meter;
use crate::db::enums::Direction;

pub async fn insert_meter<C: ConnectionTrait>(
    conn: &C,
    direction: Direction,
    rate: i64,
    burst: i64,
) -> Result<meter::Model, DbErr> {
    meter::ActiveModel {
        rate: Set(rate),
        burst: Set(burst),
        direction: Set(direction),
        flow_id: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await
}

/// Records which flow a meter is attached to.
pub async fn attach_flow<C: ConnectionTrait>(
    conn: &C,
    meter_id: i32,
    flow_id: i32,
) -> Result<(), DbErr> {
    let res = meter::Entity::update_many()
        .col_expr(meter::Column::FlowId, Expr::value(flow_id))
        .filter(meter::Column::Id.eq(meter_id))
        .exec(conn)
        .await?;
    if res.rows_affected == 0 {
        return Err(DbErr::RecordNotFound(format!("meter {meter_id}")));
    }
    Ok(())
}

pub async fn find_meters<C: ConnectionTrait>(
    conn: &C,
    meter_ids: Vec<i32>,
) -> Result<Vec<meter::Model>, DbErr> {
    if meter_ids.is_empty() {
        return Ok(Vec::new());
    }
    meter::Entity::find()
        .filter(meter::Column::Id.is_in(meter_ids))
        .all(conn)
        .await
}
