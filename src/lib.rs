//! Policy and charging control core.
//!
//! Decides which rate/quota policy applies to a mobile data subscriber, keeps
//! cumulative usage, opens and closes data sessions and records the
//! forwarding-plane artifacts (meters, flows, reroute targets) that enforce
//! the decision. All state lives in a transactional relational store reached
//! through [`db::PersistenceGateway`].

pub mod config;
pub mod control;
pub mod db;
pub mod error;

pub use config::PcrfConfig;
pub use control::{
    FlowProvisioner, PolicyStore, RerouteEngine, SessionManager, UsageTracker,
};
pub use db::PersistenceGateway;
pub use error::{CommitOutcome, ErrorKind, PcrfError};
