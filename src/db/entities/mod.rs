//! SeaORM entities for the policy and charging tables.
//!
//! Each entity is defined in its own module. Creation order for the schema
//! follows foreign-key dependencies, see `PersistenceGateway::init_schema`.

pub mod flow;
pub mod meter;
pub mod policy;
pub mod reroute;
pub mod session;
pub mod subscriber;
pub mod subscriber_policy;
pub mod usage;
