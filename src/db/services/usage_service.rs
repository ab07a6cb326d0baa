use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, Set,
};

use crate::db::entities::usage;

pub async fn insert_usage<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
    now: DateTime<Utc>,
) -> Result<usage::Model, DbErr> {
    usage::ActiveModel {
        subscriber_id: Set(subscriber_id),
        consumed_bytes: Set(0),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn find_usage<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
) -> Result<Option<usage::Model>, DbErr> {
    usage::Entity::find()
        .filter(usage::Column::SubscriberId.eq(subscriber_id))
        .one(conn)
        .await
}

/// Adds `delta` bytes in a single `UPDATE ... SET consumed_bytes =
/// consumed_bytes + delta`, so concurrent writers cannot lose an increment.
/// Returns the updated record, or `None` when the subscriber has no usage row.
pub async fn add_consumption<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
    delta: i64,
    now: DateTime<Utc>,
) -> Result<Option<usage::Model>, DbErr> {
    let res = usage::Entity::update_many()
        .col_expr(
            usage::Column::ConsumedBytes,
            Expr::col(usage::Column::ConsumedBytes).add(delta),
        )
        .col_expr(usage::Column::UpdatedAt, Expr::value(now))
        .filter(usage::Column::SubscriberId.eq(subscriber_id))
        .exec(conn)
        .await?;

    if res.rows_affected == 0 {
        return Ok(None);
    }
    find_usage(conn, subscriber_id).await
}
