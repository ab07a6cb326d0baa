use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;

use super::{find_meters, for_update};
use crate::db::entities::{meter, session, subscriber};
use crate::db::enums::SessionState;
use crate::db::models::SessionDetails;

/// Column values for a freshly opened session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub subscriber_id: i32,
    pub policy_id: i32,
    pub ue_ip: String,
    pub tx_meter_id: i32,
    pub rx_meter_id: i32,
    pub start_time: DateTime<Utc>,
}

pub async fn insert_session<C: ConnectionTrait>(
    conn: &C,
    new: NewSession,
) -> Result<session::Model, DbErr> {
    session::ActiveModel {
        subscriber_id: Set(new.subscriber_id),
        policy_id: Set(new.policy_id),
        ue_ip: Set(new.ue_ip),
        start_time: Set(new.start_time),
        end_time: Set(None),
        tx_bytes: Set(0),
        rx_bytes: Set(0),
        total_bytes: Set(0),
        tx_meter_id: Set(new.tx_meter_id),
        rx_meter_id: Set(new.rx_meter_id),
        state: Set(SessionState::Active),
        updated_at: Set(new.start_time),
        ..Default::default()
    }
    .insert(conn)
    .await
}

pub async fn find_session<C: ConnectionTrait>(
    conn: &C,
    session_id: i32,
    lock: bool,
) -> Result<Option<session::Model>, DbErr> {
    let mut query = session::Entity::find_by_id(session_id);
    if lock {
        query = for_update(query, conn.get_database_backend());
    }
    query.one(conn).await
}

pub async fn find_active_session<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
) -> Result<Option<session::Model>, DbErr> {
    session::Entity::find()
        .filter(session::Column::SubscriberId.eq(subscriber_id))
        .filter(session::Column::State.eq(SessionState::Active))
        .one(conn)
        .await
}

/// Moves an `Active` session to `Completed` with its final counters.
///
/// The update is conditional on the row still being `Active`; the returned
/// row count is 0 when someone else closed it first.
pub async fn complete_session<C: ConnectionTrait>(
    conn: &C,
    session_id: i32,
    tx_bytes: i64,
    rx_bytes: i64,
    total_bytes: i64,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let res = session::Entity::update_many()
        .col_expr(session::Column::TxBytes, Expr::value(tx_bytes))
        .col_expr(session::Column::RxBytes, Expr::value(rx_bytes))
        .col_expr(session::Column::TotalBytes, Expr::value(total_bytes))
        .col_expr(session::Column::EndTime, Expr::value(now))
        .col_expr(session::Column::UpdatedAt, Expr::value(now))
        .col_expr(session::Column::State, Expr::value(SessionState::Completed))
        .filter(session::Column::Id.eq(session_id))
        .filter(session::Column::State.eq(SessionState::Active))
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

pub async fn session_details<C: ConnectionTrait>(
    conn: &C,
    session_id: i32,
) -> Result<Option<SessionDetails>, DbErr> {
    let rows = session::Entity::find_by_id(session_id)
        .find_also_related(subscriber::Entity)
        .all(conn)
        .await?;
    Ok(with_meters(conn, rows).await?.into_iter().next())
}

pub async fn active_session_details<C: ConnectionTrait>(
    conn: &C,
) -> Result<Vec<SessionDetails>, DbErr> {
    let rows = session::Entity::find()
        .filter(session::Column::State.eq(SessionState::Active))
        .order_by_asc(session::Column::Id)
        .find_also_related(subscriber::Entity)
        .all(conn)
        .await?;
    with_meters(conn, rows).await
}

pub async fn subscriber_session_details<C: ConnectionTrait>(
    conn: &C,
    subscriber_id: i32,
    state: Option<SessionState>,
) -> Result<Vec<SessionDetails>, DbErr> {
    let mut query = session::Entity::find()
        .filter(session::Column::SubscriberId.eq(subscriber_id));
    if let Some(state) = state {
        query = query.filter(session::Column::State.eq(state));
    }
    let rows = query
        .order_by_asc(session::Column::Id)
        .find_also_related(subscriber::Entity)
        .all(conn)
        .await?;
    with_meters(conn, rows).await
}

/// Resolves both meters of every row with one `IN (...)` query.
async fn with_meters<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<(session::Model, Option<subscriber::Model>)>,
) -> Result<Vec<SessionDetails>, DbErr> {
    let meter_ids = rows
        .iter()
        .flat_map(|(s, _)| [s.tx_meter_id, s.rx_meter_id])
        .collect();
    let meters: HashMap<i32, meter::Model> = find_meters(conn, meter_ids)
        .await?
        .into_iter()
        .map(|m| (m.id, m))
        .collect();

    rows.into_iter()
        .map(|(session, subscriber)| {
            let subscriber = subscriber.ok_or_else(|| {
                DbErr::RecordNotFound(format!("subscriber of session {}", session.id))
            })?;
            let meter = |id: i32| {
                meters.get(&id).cloned().ok_or_else(|| {
                    DbErr::RecordNotFound(format!("meter {} of session {}", id, session.id))
                })
            };
            Ok(SessionDetails {
                tx_meter: meter(session.tx_meter_id)?,
                rx_meter: meter(session.rx_meter_id)?,
                external_id: subscriber.external_id,
                session,
            })
        })
        .collect()
}
