use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel, QueryOrder, Set,
};

use crate::db::entities::policy::{self, DEFAULT_POLICY_ID};

pub async fn find_policy<C: ConnectionTrait>(
    conn: &C,
    policy_id: i32,
) -> Result<Option<policy::Model>, DbErr> {
    policy::Entity::find_by_id(policy_id).one(conn).await
}

pub async fn list_policies<C: ConnectionTrait>(conn: &C) -> Result<Vec<policy::Model>, DbErr> {
    policy::Entity::find()
        .order_by_asc(policy::Column::Id)
        .all(conn)
        .await
}

/// Next free policy id. Id 1 is reserved for the default policy even before
/// it exists.
pub async fn next_policy_id<C: ConnectionTrait>(conn: &C) -> Result<i32, DbErr> {
    let highest = policy::Entity::find()
        .order_by_desc(policy::Column::Id)
        .one(conn)
        .await?
        .map(|p| p.id)
        .unwrap_or(DEFAULT_POLICY_ID);
    Ok(highest.max(DEFAULT_POLICY_ID) + 1)
}

pub async fn insert_policy<C: ConnectionTrait>(
    conn: &C,
    policy: policy::Model,
) -> Result<policy::Model, DbErr> {
    let new_policy = policy::ActiveModel {
        id: Set(policy.id),
        data_cap: Set(policy.data_cap),
        downlink_limit: Set(policy.downlink_limit),
        uplink_limit: Set(policy.uplink_limit),
        burst: Set(policy.burst),
        start_time: Set(policy.start_time),
        end_time: Set(policy.end_time),
    };
    new_policy.insert(conn).await
}

/// Overwrites the rate, cap and window of an existing policy. Returns `None`
/// when no policy has that id.
pub async fn update_policy<C: ConnectionTrait>(
    conn: &C,
    policy: policy::Model,
) -> Result<Option<policy::Model>, DbErr> {
    let Some(existing) = policy::Entity::find_by_id(policy.id).one(conn).await? else {
        return Ok(None);
    };

    let mut active_policy = existing.into_active_model();
    active_policy.data_cap = Set(policy.data_cap);
    active_policy.downlink_limit = Set(policy.downlink_limit);
    active_policy.uplink_limit = Set(policy.uplink_limit);
    active_policy.burst = Set(policy.burst);
    active_policy.start_time = Set(policy.start_time);
    active_policy.end_time = Set(policy.end_time);

    active_policy.update(conn).await.map(Some)
}
