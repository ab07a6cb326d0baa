//! Table-level data access for the policy store.
//!
//! Every function takes any [`sea_orm::ConnectionTrait`], so the same call
//! works on the pool for reads and on a `DatabaseTransaction` inside
//! `PersistenceGateway::scoped` for multi-row writes. Functions return
//! `DbErr`; mapping to domain errors happens in `crate::control`.

pub mod flow_service;
pub mod meter_service;
pub mod policy_service;
pub mod reroute_service;
pub mod session_service;
pub mod subscriber_service;
pub mod usage_service;

pub use flow_service::*;
pub use meter_service::*;
pub use policy_service::*;
pub use reroute_service::*;
pub use session_service::*;
pub use subscriber_service::*;
pub use usage_service::*;

use sea_orm::{DbBackend, EntityTrait, QuerySelect, Select};

/// Adds `FOR UPDATE` where the backend supports row locks. SQLite serialises
/// writers on the whole database instead.
pub(crate) fn for_update<E: EntityTrait>(select: Select<E>, backend: DbBackend) -> Select<E> {
    match backend {
        DbBackend::Sqlite => select,
        _ => select.lock_exclusive(),
    }
}
