use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};

use super::for_update;
use crate::db::entities::{policy, subscriber, subscriber_policy};

/// Looks up a subscriber that has not been soft-deleted. With `lock` set the
/// row is held `FOR UPDATE` until the surrounding transaction ends.
pub async fn find_live_subscriber<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
    lock: bool,
) -> Result<Option<subscriber::Model>, DbErr> {
    let mut query = subscriber::Entity::find()
        .filter(subscriber::Column::ExternalId.eq(external_id))
        .filter(subscriber::Column::DeletedAt.is_null());
    if lock {
        query = for_update(query, conn.get_database_backend());
    }
    query.one(conn).await
}

/// Any subscriber row with this external id, soft-deleted or not.
pub async fn find_subscriber_any<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
) -> Result<Option<subscriber::Model>, DbErr> {
    subscriber::Entity::find()
        .filter(subscriber::Column::ExternalId.eq(external_id))
        .one(conn)
        .await
}

pub async fn insert_subscriber<C: ConnectionTrait>(
    conn: &C,
    external_id: &str,
    now: DateTime<Utc>,
) -> Result<subscriber::Model, DbErr> {
    subscriber::ActiveModel {
        external_id: Set(external_id.to_owned()),
        created_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn soft_delete_subscriber<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let res = subscriber::Entity::update_many()
        .col_expr(subscriber::Column::DeletedAt, Expr::value(now))
        .filter(subscriber::Column::Id.eq(subscriber_id))
        .filter(subscriber::Column::DeletedAt.is_null())
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

/// Assigned policies in priority order, fetched with a single join.
pub async fn assigned_policies<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
) -> Result<Vec<policy::Model>, DbErr> {
    let rows = subscriber_policy::Entity::find()
        .filter(subscriber_policy::Column::SubscriberId.eq(subscriber_id))
        .order_by_asc(subscriber_policy::Column::Position)
        .find_also_related(policy::Entity)
        .all(conn)
        .await?;

    rows.into_iter()
        .map(|(assignment, policy)| {
            policy.ok_or_else(|| {
                DbErr::RecordNotFound(format!(
                    "policy {} assigned to subscriber {}",
                    assignment.policy_id, subscriber_id
                ))
            })
        })
        .collect()
}

/// Replaces the subscriber's assignment list with `policy_ids`, in order.
pub async fn replace_policy_assignment<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
    policy_ids: &[i32],
) -> Result<(), DbErr> {
    subscriber_policy::Entity::delete_many()
        .filter(subscriber_policy::Column::SubscriberId.eq(subscriber_id))
        .exec(conn)
        .await?;

    if policy_ids.is_empty() {
        return Ok(());
    }

    let assignments = policy_ids
        .iter()
        .enumerate()
        .map(|(position, policy_id)| subscriber_policy::ActiveModel {
            subscriber_id: Set(subscriber_id),
            policy_id: Set(*policy_id),
            position: Set(position as i32),
        });
    subscriber_policy::Entity::insert_many(assignments)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}
