use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};

use crate::db::entities::reroute;

pub async fn find_reroute<C: ConnectionTrait>(
    conn: &C,
    reroute_id: i32,
) -> Result<Option<reroute::Model>, DbErr> {
    reroute::Entity::find_by_id(reroute_id).one(conn).await
}

pub async fn find_reroute_by_ip<C: ConnectionTrait>(
    conn: &C,
    target_ip: &str,
) -> Result<Option<reroute::Model>, DbErr> {
    reroute::Entity::find()
        .filter(reroute::Column::TargetIp.eq(target_ip))
        .one(conn)
        .await
}

pub async fn next_reroute_id<C: ConnectionTrait>(conn: &C) -> Result<i32, DbErr> {
    let highest = reroute::Entity::find()
        .order_by_desc(reroute::Column::Id)
        .one(conn)
        .await?
        .map(|r| r.id)
        .unwrap_or(reroute::DEFAULT_REROUTE_ID);
    Ok(highest.max(reroute::DEFAULT_REROUTE_ID) + 1)
}

pub async fn insert_reroute<C: ConnectionTrait>(
    conn: &C,
    reroute_id: i32,
    target_ip: &str,
) -> Result<reroute::Model, DbErr> {
    reroute::ActiveModel {
        id: Set(reroute_id),
        target_ip: Set(target_ip.to_owned()),
    }
    .insert(conn)
    .await
}

/// Moves an existing reroute target to a new address. Returns `None` when no
/// reroute has that id.
pub async fn update_reroute_ip<C: ConnectionTrait>(
    conn: &C,
    reroute_id: i32,
    target_ip: &str,
) -> Result<Option<reroute::Model>, DbErr> {
    let Some(existing) = reroute::Entity::find_by_id(reroute_id).one(conn).await? else {
        return Ok(None);
    };
    let mut active_reroute = existing.into_active_model();
    active_reroute.target_ip = Set(target_ip.to_owned());
    active_reroute.update(conn).await.map(Some)
}
