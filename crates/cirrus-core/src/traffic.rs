// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Network traffic summaries for a VNIC.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::{CloudProvider, MetricQuery};
use crate::store::Account;

/// Metric namespace of the compute agent.
pub const METRIC_NAMESPACE: &str = "oci_computeagent";

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const WINDOW_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Traffic direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes received by the VNIC
    Inbound,
    /// Bytes sent by the VNIC
    Outbound,
}

impl Direction {
    fn metric(self) -> &'static str {
        match self {
            Direction::Inbound => "NetworksBytesIn",
            Direction::Outbound => "NetworksBytesOut",
        }
    }

    /// One-minute mean query for a VNIC.
    pub fn query(self, vnic_id: &str) -> String {
        format!("{}[1m]{{resourceId = \"{vnic_id}\"}}.mean()", self.metric())
    }
}

/// Per-minute traffic in MiB.
///
/// `time` labels come from the inbound series; a direction whose query
/// failed is left empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSeries {
    /// `HH:MM` bucket labels
    pub time: Vec<String>,
    /// Inbound MiB per bucket
    pub inbound: Vec<String>,
    /// Outbound MiB per bucket
    pub outbound: Vec<String>,
}

/// Parse a `YYYY-MM-DD HH:MM:SS` window bound (UTC). Anything unparsable
/// becomes one hour before `now`.
pub fn parse_window_bound(value: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(value.trim(), WINDOW_FORMAT)
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| now - Duration::hours(1))
}

fn mib(bytes: f64) -> String {
    format!("{:.2}", bytes / BYTES_PER_MIB)
}

/// Summarize inbound and outbound traffic of `vnic_id` in `[start, end]`.
pub async fn traffic_summary(
    provider: &dyn CloudProvider,
    account: &Account,
    vnic_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> TrafficSeries {
    let mut series = TrafficSeries::default();

    for direction in [Direction::Inbound, Direction::Outbound] {
        let query = MetricQuery {
            compartment_id: account.tenant_id.clone(),
            namespace: METRIC_NAMESPACE.to_string(),
            query: direction.query(vnic_id),
            start,
            end,
        };
        let points = match provider.summarize_metrics(account, &query).await {
            Ok(points) => points,
            Err(e) => {
                warn!(vnic_id, ?direction, error = %e, "Traffic query failed");
                continue;
            }
        };

        match direction {
            Direction::Inbound => {
                for point in points {
                    series.time.push(point.timestamp.format("%H:%M").to_string());
                    series.inbound.push(mib(point.value));
                }
            }
            Direction::Outbound => {
                series.outbound = points.into_iter().map(|p| mib(p.value)).collect();
            }
        }
    }

    series
}
