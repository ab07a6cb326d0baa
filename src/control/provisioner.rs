use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::debug;

use crate::config::PcrfConfig;
use crate::db::entities::{flow, meter, policy, reroute};
use crate::db::enums::Direction;
use crate::db::services::{self, NewFlow};
use crate::error::PcrfError;

/// The meter and flow that carry one direction of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedPath {
    pub meter: meter::Model,
    pub flow: flow::Model,
}

/// Creates rate meters and forwarding flows. Always runs inside the caller's
/// transaction; it has no store handle of its own.
#[derive(Debug, Clone, Copy)]
pub struct FlowProvisioner {
    table_id: i32,
    priority: i32,
}

impl FlowProvisioner {
    pub fn new(table_id: i32, priority: i32) -> Self {
        Self { table_id, priority }
    }

    pub fn from_config(config: &PcrfConfig) -> Self {
        Self::new(config.flow_table_id, config.flow_priority)
    }

    /// Meter rate for `direction`: downlink traffic is limited by the
    /// policy's downlink limit, uplink by its uplink limit.
    pub fn rate_for(direction: Direction, policy: &policy::Model) -> i64 {
        match direction {
            Direction::Downlink => policy.downlink_limit,
            Direction::Uplink => policy.uplink_limit,
        }
    }

    pub async fn provision_direction<C: ConnectionTrait>(
        &self,
        conn: &C,
        ue_ip: IpAddr,
        direction: Direction,
        policy: &policy::Model,
        reroute: Option<&reroute::Model>,
    ) -> Result<ProvisionedPath, PcrfError> {
        let rate = Self::rate_for(direction, policy);
        let meter = services::insert_meter(conn, direction, rate, policy.burst).await?;

        let flow = services::insert_flow(
            conn,
            NewFlow {
                table_id: self.table_id,
                priority: self.priority,
                ue_ip: ue_ip.to_string(),
                meter_id: meter.id,
                reroute_id: reroute.map(|r| r.id),
            },
        )
        .await?;
        services::attach_flow(conn, meter.id, flow.id).await?;

        debug!(
            %direction,
            meter_id = meter.id,
            flow_id = flow.id,
            cookie = flow.cookie,
            rate,
            rerouted = flow.reroute_id.is_some(),
            "Provisioned path."
        );

        Ok(ProvisionedPath {
            meter: meter::Model {
                flow_id: Some(flow.id),
                ..meter
            },
            flow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db::TestDb;
    use crate::error::ErrorKind;
    use sea_orm::{EntityTrait, PaginatorTrait};

    fn policy() -> policy::Model {
        policy::Model {
            id: 1,
            data_cap: 0,
            downlink_limit: 5000,
            uplink_limit: 1000,
            burst: 64,
            start_time: None,
            end_time: None,
        }
    }

    #[test]
    fn rates_follow_direction() {
        assert_eq!(FlowProvisioner::rate_for(Direction::Downlink, &policy()), 5000);
        assert_eq!(FlowProvisioner::rate_for(Direction::Uplink, &policy()), 1000);
    }

    #[tokio::test]
    async fn provisions_meter_and_flow_pair() {
        let test_db = TestDb::sqlite().await;
        let provisioner = FlowProvisioner::from_config(&test_db.config);
        let ue_ip: IpAddr = "10.45.0.7".parse().unwrap();

        let (down, up) = test_db
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    let down = provisioner
                        .provision_direction(txn, ue_ip, Direction::Downlink, &policy(), None)
                        .await?;
                    let up = provisioner
                        .provision_direction(txn, ue_ip, Direction::Uplink, &policy(), None)
                        .await?;
                    Ok((down, up))
                })
            })
            .await
            .unwrap();

        assert_eq!(down.meter.rate, 5000);
        assert_eq!(down.meter.burst, 64);
        assert_eq!(down.meter.direction, Direction::Downlink);
        assert_eq!(down.meter.flow_id, Some(down.flow.id));
        assert_eq!(up.meter.rate, 1000);
        assert_eq!(up.meter.direction, Direction::Uplink);

        for path in [&down, &up] {
            assert_eq!(path.flow.table_id, 0);
            assert_eq!(path.flow.priority, 100);
            assert_eq!(path.flow.ue_ip, "10.45.0.7");
            assert_eq!(path.flow.meter_id, path.meter.id);
            assert_eq!(path.flow.reroute_id, None);
        }
        assert_ne!(down.flow.cookie, up.flow.cookie);

        let stored = meter::Entity::find_by_id(down.meter.id)
            .one(test_db.gateway.conn())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, down.meter);
    }

    #[tokio::test]
    async fn failed_scope_leaves_no_meters_or_flows() {
        let test_db = TestDb::sqlite().await;
        let provisioner = FlowProvisioner::new(3, 200);
        let ue_ip: IpAddr = "10.45.0.8".parse().unwrap();

        let err = test_db
            .gateway
            .scoped(move |txn| {
                Box::pin(async move {
                    provisioner
                        .provision_direction(txn, ue_ip, Direction::Downlink, &policy(), None)
                        .await?;
                    Err::<(), _>(PcrfError::Validation("abort".to_string()))
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let conn = test_db.gateway.conn();
        assert_eq!(meter::Entity::find().count(conn).await.unwrap(), 0);
        assert_eq!(flow::Entity::find().count(conn).await.unwrap(), 0);
    }
}
