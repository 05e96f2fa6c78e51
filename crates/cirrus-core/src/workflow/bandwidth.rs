// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! NAT gateway + network load balancer path for capped shapes.
//!
//! Enabling routes the instance's egress through a NAT gateway and fronts
//! it with a public network load balancer. Disabling rebinds the VNIC to
//! the VCN's ordinary route table and tears the pair down unless retained.
//! Teardown steps are tolerant.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::engine::{Step, StepOutput, WorkflowOutcome, run_steps};
use super::progress::ProgressSink;
use super::wait::{PollPolicy, missing_as, wait_for_state, wait_until};
use super::{WorkflowConfig, lookup};
use crate::error::{Error, Result};
use crate::lease::{ResourceLease, ResourceLocks};
use crate::provider::{
    BackendSetSpec, BackendSpec, BalancingPolicy, CloudProvider, CreateRouteTable,
    HealthCheckSpec, LifecycleState, ListenerProtocol, ListenerSpec, LoadBalancer,
    LoadBalancerSpec, ProviderError, ProviderResult, RouteRule, RouteTable, SecurityRule, Vnic, VnicUpdate,
};
use crate::store::Account;

/// Shape family whose bandwidth is capped.
pub const RESTRICTED_SHAPE: &str = "E2.1.Micro";

const DEFAULT_ROUTE: &str = "0.0.0.0/0";
const NAT_GATEWAY_NAME: &str = "nat-gateway";
const NAT_ROUTE_TABLE_NAME: &str = "nat-route";
const LISTENER_NAME: &str = "listener1";
const BACKEND_SET_NAME: &str = "backend1";

/// Input of an enable run.
#[derive(Debug, Clone)]
pub struct EnableBandwidthRequest {
    /// Account owning the instance.
    pub account: Account,
    /// Instance to front.
    pub instance_id: String,
    /// TCP port probed by the load balancer health check.
    pub health_check_port: u16,
}

/// Input of a disable run.
#[derive(Debug, Clone)]
pub struct DisableBandwidthRequest {
    /// Account owning the instance.
    pub account: Account,
    /// Instance to restore.
    pub instance_id: String,
    /// Leave the NAT gateway and its route tables in place.
    pub keep_nat: bool,
    /// Leave the load balancers in place.
    pub keep_load_balancer: bool,
}

/// Runs the enable/disable sequences.
#[derive(Clone)]
pub struct BandwidthWorkflow {
    provider: Arc<dyn CloudProvider>,
    locks: ResourceLocks,
    config: WorkflowConfig,
}

impl BandwidthWorkflow {
    /// Create a workflow runner.
    pub fn new(provider: Arc<dyn CloudProvider>, locks: ResourceLocks, config: WorkflowConfig) -> Self {
        Self {
            provider,
            locks,
            config,
        }
    }

    /// Route the instance through a NAT gateway and a new load balancer.
    ///
    /// On success the outcome carries `publicIp`, `loadBalancerId`,
    /// `natGatewayId` and `routeTableId`.
    pub async fn enable(
        &self,
        request: EnableBandwidthRequest,
        sink: &dyn ProgressSink,
    ) -> Result<WorkflowOutcome> {
        let (_lease, mut ctx) = self
            .prepare(&request.account, &request.instance_id)
            .await?;
        ctx.health_check_port = request.health_check_port;

        let run_id = Uuid::new_v4();
        info!(%run_id, instance_id = %ctx.instance_id, vcn_id = %ctx.vcn_id, "Enabling bandwidth path");
        let outcome = run_steps("bandwidth-enable", &ENABLE_STEPS, &mut ctx, sink).await;
        info!(%run_id, completed = outcome.is_completed(), "Bandwidth enable finished");
        Ok(outcome)
    }

    /// Restore the instance's original routing and tear down the pair.
    pub async fn disable(
        &self,
        request: DisableBandwidthRequest,
        sink: &dyn ProgressSink,
    ) -> Result<WorkflowOutcome> {
        let (_lease, mut ctx) = self
            .prepare(&request.account, &request.instance_id)
            .await?;
        ctx.keep_nat = request.keep_nat;
        ctx.keep_load_balancer = request.keep_load_balancer;

        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            instance_id = %ctx.instance_id,
            keep_nat = ctx.keep_nat,
            keep_load_balancer = ctx.keep_load_balancer,
            "Disabling bandwidth path"
        );
        let outcome = run_steps("bandwidth-disable", &DISABLE_STEPS, &mut ctx, sink).await;
        info!(%run_id, completed = outcome.is_completed(), "Bandwidth disable finished");
        Ok(outcome)
    }

    /// Lease the instance, check its shape and resolve its network.
    ///
    /// The shape check is the first remote call; a mismatch returns
    /// [`Error::Validation`] before anything is mutated.
    async fn prepare(
        &self,
        account: &Account,
        instance_id: &str,
    ) -> Result<(ResourceLease, BandwidthContext)> {
        let lease = self.locks.try_acquire(instance_id)?;

        let instance = lookup(
            self.provider.get_instance(account, instance_id).await,
            "instance",
            instance_id,
        )?;
        if !instance.shape.contains(RESTRICTED_SHAPE) {
            return Err(Error::Validation(format!(
                "only {RESTRICTED_SHAPE} instances support this operation, {} is {}",
                instance.id, instance.shape
            )));
        }

        let vnic = self
            .provider
            .list_instance_vnics(account, instance_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Validation(format!("instance {instance_id} has no VNIC")))?;
        let subnet = self.provider.get_subnet(account, &vnic.subnet_id).await?;
        let vcn = self.provider.get_vcn(account, &subnet.vcn_id).await?;
        let lb_subnet_id = vcn
            .subnets
            .first()
            .map(|s| s.id.clone())
            .unwrap_or(subnet.id);

        let ctx = BandwidthContext {
            provider: self.provider.clone(),
            account: account.clone(),
            policy: self.config.poll_policy(),
            compartment_id: instance.compartment_id,
            instance_id: instance.id,
            vnic,
            vcn_id: vcn.id,
            lb_subnet_id,
            health_check_port: 22,
            keep_nat: false,
            keep_load_balancer: false,
            nat_gateway_id: None,
            route_table_id: None,
            nat_gateway_ids: Vec::new(),
            nat_route_table_ids: Vec::new(),
        };
        Ok((lease, ctx))
    }
}

struct BandwidthContext {
    provider: Arc<dyn CloudProvider>,
    account: Account,
    policy: PollPolicy,
    compartment_id: String,
    instance_id: String,
    vnic: Vnic,
    vcn_id: String,
    lb_subnet_id: String,
    health_check_port: u16,
    keep_nat: bool,
    keep_load_balancer: bool,
    // Enable
    nat_gateway_id: Option<String>,
    route_table_id: Option<String>,
    // Disable
    nat_gateway_ids: Vec<String>,
    nat_route_table_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum BandwidthStep {
    EnsureNatGateway,
    EnsureNatRoute,
    ClearLoadBalancers,
    CreateLoadBalancer,
    BindVnic,
    OpenIngress,
    RestoreRoute,
    RemoveNat,
    RemoveLoadBalancers,
}

const ENABLE_STEPS: [BandwidthStep; 6] = [
    BandwidthStep::EnsureNatGateway,
    BandwidthStep::EnsureNatRoute,
    BandwidthStep::ClearLoadBalancers,
    BandwidthStep::CreateLoadBalancer,
    BandwidthStep::BindVnic,
    BandwidthStep::OpenIngress,
];

const DISABLE_STEPS: [BandwidthStep; 3] = [
    BandwidthStep::RestoreRoute,
    BandwidthStep::RemoveNat,
    BandwidthStep::RemoveLoadBalancers,
];

#[async_trait]
impl Step<BandwidthContext> for BandwidthStep {
    fn label(&self) -> &'static str {
        match self {
            Self::EnsureNatGateway => "Preparing NAT gateway",
            Self::EnsureNatRoute => "Preparing NAT route table",
            Self::ClearLoadBalancers => "Removing existing load balancers",
            Self::CreateLoadBalancer => "Creating network load balancer",
            Self::BindVnic => "Binding VNIC to NAT route table",
            Self::OpenIngress => "Opening security lists",
            Self::RestoreRoute => "Restoring VNIC route table",
            Self::RemoveNat => "Removing NAT gateway",
            Self::RemoveLoadBalancers => "Removing load balancers",
        }
    }

    fn is_tolerant(&self) -> bool {
        matches!(
            self,
            Self::ClearLoadBalancers | Self::OpenIngress | Self::RemoveNat | Self::RemoveLoadBalancers
        )
    }

    async fn execute(&self, ctx: &mut BandwidthContext) -> Result<StepOutput> {
        match self {
            Self::EnsureNatGateway => ensure_nat_gateway(ctx).await,
            Self::EnsureNatRoute => ensure_nat_route(ctx).await,
            Self::ClearLoadBalancers => remove_load_balancers(ctx).await,
            Self::CreateLoadBalancer => create_load_balancer(ctx).await,
            Self::BindVnic => {
                let route_table_id = ctx
                    .route_table_id
                    .clone()
                    .ok_or_else(|| Error::Other("no NAT route table was prepared".to_string()))?;
                let update = VnicUpdate {
                    route_table_id: Some(route_table_id.clone()),
                    skip_source_dest_check: Some(true),
                };
                ctx.provider
                    .update_vnic(&ctx.account, &ctx.vnic.id, &update)
                    .await?;
                Ok(StepOutput::done(format!("VNIC routed through {route_table_id}")))
            }
            Self::OpenIngress => open_ingress(ctx).await,
            Self::RestoreRoute => restore_route(ctx).await,
            Self::RemoveNat => {
                if ctx.keep_nat {
                    return Ok(StepOutput::skipped("NAT gateway retained"));
                }
                remove_nat(ctx).await
            }
            Self::RemoveLoadBalancers => {
                if ctx.keep_load_balancer {
                    return Ok(StepOutput::skipped("Load balancer retained"));
                }
                remove_load_balancers(ctx).await
            }
        }
    }
}

async fn ensure_nat_gateway(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;

    let existing = provider
        .list_nat_gateways(account, &ctx.compartment_id, &ctx.vcn_id)
        .await?
        .into_iter()
        .find(|g| g.state == LifecycleState::Available);

    let (id, message) = match existing {
        Some(gateway) => (gateway.id, "Reusing NAT gateway"),
        None => {
            let gateway = provider
                .create_nat_gateway(account, &ctx.compartment_id, &ctx.vcn_id, NAT_GATEWAY_NAME)
                .await?;
            let gateway_id = gateway.id.as_str();
            wait_for_state("nat gateway", LifecycleState::Available, ctx.policy, || async move {
                provider
                    .get_nat_gateway(account, gateway_id)
                    .await
                    .map(|g| g.state)
            })
            .await?;
            (gateway.id, "Created NAT gateway")
        }
    };

    ctx.nat_gateway_id = Some(id.clone());
    Ok(StepOutput::done(message).with("natGatewayId", id))
}

fn routes_through(table: &RouteTable, gateway_ids: &HashSet<&str>) -> bool {
    table.rules.iter().any(|r| {
        r.destination == DEFAULT_ROUTE && gateway_ids.contains(r.network_entity_id.as_str())
    })
}

async fn ensure_nat_route(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;
    let nat_gateway_id = ctx
        .nat_gateway_id
        .as_deref()
        .ok_or_else(|| Error::Other("no NAT gateway was prepared".to_string()))?;
    let gateway = HashSet::from([nat_gateway_id]);

    let existing = provider
        .list_route_tables(account, &ctx.compartment_id, &ctx.vcn_id)
        .await?
        .into_iter()
        .find(|t| t.state == LifecycleState::Available && routes_through(t, &gateway));

    let (id, message) = match existing {
        Some(table) => (table.id, "Reusing NAT route table"),
        None => {
            let details = CreateRouteTable {
                compartment_id: ctx.compartment_id.clone(),
                vcn_id: ctx.vcn_id.clone(),
                display_name: NAT_ROUTE_TABLE_NAME.to_string(),
                rules: vec![RouteRule {
                    destination: DEFAULT_ROUTE.to_string(),
                    network_entity_id: nat_gateway_id.to_string(),
                }],
            };
            let table = provider.create_route_table(account, &details).await?;
            let table_id = table.id.as_str();
            wait_for_state("route table", LifecycleState::Available, ctx.policy, || async move {
                provider
                    .get_route_table(account, table_id)
                    .await
                    .map(|t| t.state)
            })
            .await?;
            (table.id, "Created NAT route table")
        }
    };

    ctx.route_table_id = Some(id.clone());
    Ok(StepOutput::done(message).with("routeTableId", id))
}

/// Delete every live load balancer in the compartment and wait until gone.
async fn remove_load_balancers(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;

    let live: Vec<LoadBalancer> = provider
        .list_load_balancers(account, &ctx.compartment_id)
        .await?
        .into_iter()
        .filter(|lb| !lb.state.is_removed() && lb.state != LifecycleState::Deleting)
        .collect();
    if live.is_empty() {
        return Ok(StepOutput::skipped("No load balancers to remove"));
    }

    let mut failures = Vec::new();
    let mut deleted = Vec::new();
    for lb in &live {
        match provider.delete_load_balancer(account, &lb.id).await {
            Ok(()) => deleted.push(lb.id.as_str()),
            Err(e) => {
                warn!(load_balancer_id = %lb.id, error = %e, "Failed to delete load balancer");
                failures.push(e.to_string());
            }
        }
    }
    for lb_id in &deleted {
        wait_for_state("load balancer", LifecycleState::Deleted, ctx.policy, || async move {
            missing_as(
                provider
                    .get_load_balancer(account, lb_id)
                    .await
                    .map(|lb| lb.state),
                LifecycleState::Deleted,
            )
        })
        .await?;
    }

    if !failures.is_empty() {
        return Err(remote_failures("delete_load_balancer", &failures));
    }
    Ok(StepOutput::done(format!("Removed {} load balancer(s)", deleted.len())))
}

/// Collapse the failures of a best-effort batch into one provider error.
fn remote_failures(operation: &str, failures: &[String]) -> Error {
    Error::RemoteApi(ProviderError::api(operation, failures.join("; ")))
}

/// First public IPv4 among the load balancer's addresses.
pub fn public_ipv4(addresses: &[String]) -> Option<&str> {
    addresses
        .iter()
        .map(String::as_str)
        .find(|a| a.parse::<Ipv4Addr>().is_ok_and(|ip| !ip.is_private() && !ip.is_loopback()))
}

async fn create_load_balancer(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;
    let private_ip = ctx
        .vnic
        .private_ip
        .clone()
        .ok_or_else(|| Error::Validation(format!("VNIC {} has no private IP", ctx.vnic.id)))?;

    let spec = LoadBalancerSpec {
        compartment_id: ctx.compartment_id.clone(),
        display_name: format!("nlb-{}", Utc::now().format("%Y%m%d%H%M%S")),
        subnet_id: ctx.lb_subnet_id.clone(),
        is_private: false,
        listener: ListenerSpec {
            name: LISTENER_NAME.to_string(),
            default_backend_set: BACKEND_SET_NAME.to_string(),
            protocol: ListenerProtocol::TcpAndUdp,
            port: 0,
        },
        backend_set: BackendSetSpec {
            name: BACKEND_SET_NAME.to_string(),
            policy: BalancingPolicy::TwoTuple,
            preserve_source: true,
            fail_open: true,
            health_check: HealthCheckSpec {
                protocol: ListenerProtocol::Tcp,
                port: ctx.health_check_port,
            },
            backends: vec![BackendSpec {
                ip_address: private_ip,
                target_id: ctx.instance_id.clone(),
                port: 0,
                weight: 1,
            }],
        },
    };

    let created = provider.create_load_balancer(account, &spec).await?;
    let lb_id = created.id.as_str();
    let lb = wait_until("load balancer", LifecycleState::Active.as_str(), ctx.policy, || async move {
        let lb = provider.get_load_balancer(account, lb_id).await?;
        let settled = matches!(lb.state, LifecycleState::Active | LifecycleState::Failed);
        ProviderResult::Ok(settled.then_some(lb))
    })
    .await?;
    if lb.state != LifecycleState::Active {
        return Err(Error::RemoteApi(ProviderError::api(
            "create_load_balancer",
            format!("load balancer {} entered {}", lb.id, lb.state),
        )));
    }

    let public_ip = public_ipv4(&lb.ip_addresses)
        .map(str::to_string)
        .ok_or_else(|| Error::Other(format!("load balancer {} has no public address", lb.id)))?;

    Ok(StepOutput::done(format!("Load balancer active at {public_ip}"))
        .with("loadBalancerId", lb.id)
        .with("publicIp", public_ip))
}

async fn open_ingress(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;

    let lists = provider
        .list_security_lists(account, &ctx.compartment_id, &ctx.vcn_id)
        .await?;
    if lists.is_empty() {
        return Ok(StepOutput::skipped("No security lists in VCN"));
    }

    let rule = |cidr: &str| SecurityRule {
        protocol: "all".to_string(),
        cidr: cidr.to_string(),
    };
    let ingress = vec![rule("0.0.0.0/0"), rule("::/0"), rule("10.0.0.0/16")];
    let egress = vec![rule("0.0.0.0/0"), rule("::/0")];

    let mut failures = Vec::new();
    for list in &lists {
        if let Err(e) = provider
            .update_security_list(account, &list.id, ingress.clone(), egress.clone())
            .await
        {
            warn!(security_list_id = %list.id, error = %e, "Failed to open security list");
            failures.push(e.to_string());
        }
    }
    if !failures.is_empty() {
        return Err(remote_failures("update_security_list", &failures));
    }
    Ok(StepOutput::done(format!("Opened {} security list(s)", lists.len())))
}

async fn restore_route(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;

    let gateways: Vec<String> = provider
        .list_nat_gateways(account, &ctx.compartment_id, &ctx.vcn_id)
        .await?
        .into_iter()
        .filter(|g| g.state == LifecycleState::Available)
        .map(|g| g.id)
        .collect();
    let tables: Vec<RouteTable> = provider
        .list_route_tables(account, &ctx.compartment_id, &ctx.vcn_id)
        .await?
        .into_iter()
        .filter(|t| t.state == LifecycleState::Available)
        .collect();

    let gateway_ids: HashSet<&str> = gateways.iter().map(String::as_str).collect();
    let (nat_tables, plain_tables): (Vec<&RouteTable>, Vec<&RouteTable>) =
        tables.iter().partition(|t| routes_through(t, &gateway_ids));
    let nat_route_table_ids: Vec<String> = nat_tables.iter().map(|t| t.id.clone()).collect();

    let Some(target) = plain_tables.first().copied().or(tables.first()) else {
        ctx.nat_gateway_ids = gateways;
        return Ok(StepOutput::skipped("No route tables in VCN"));
    };
    let target_id = target.id.clone();

    let update = VnicUpdate {
        route_table_id: Some(target_id.clone()),
        skip_source_dest_check: Some(true),
    };
    provider.update_vnic(account, &ctx.vnic.id, &update).await?;

    ctx.nat_gateway_ids = gateways;
    ctx.nat_route_table_ids = nat_route_table_ids;
    Ok(StepOutput::done(format!("VNIC restored to {target_id}")).with("routeTableId", target_id))
}

async fn remove_nat(ctx: &mut BandwidthContext) -> Result<StepOutput> {
    let provider = ctx.provider.as_ref();
    let account = &ctx.account;
    if ctx.nat_gateway_ids.is_empty() && ctx.nat_route_table_ids.is_empty() {
        return Ok(StepOutput::skipped("No NAT gateway to remove"));
    }

    let mut failures = Vec::new();
    for table_id in &ctx.nat_route_table_ids {
        let removed = async {
            provider.update_route_rules(account, table_id, Vec::new()).await?;
            provider.delete_route_table(account, table_id).await
        }
        .await;
        if let Err(e) = removed {
            warn!(route_table_id = %table_id, error = %e, "Failed to remove NAT route table");
            failures.push(e.to_string());
        }
    }

    let mut deleted = Vec::new();
    for gateway_id in &ctx.nat_gateway_ids {
        match provider.delete_nat_gateway(account, gateway_id).await {
            Ok(()) => deleted.push(gateway_id.as_str()),
            Err(e) => {
                warn!(nat_gateway_id = %gateway_id, error = %e, "Failed to delete NAT gateway");
                failures.push(e.to_string());
            }
        }
    }
    for gateway_id in &deleted {
        wait_for_state("nat gateway", LifecycleState::Terminated, ctx.policy, || async move {
            missing_as(
                provider
                    .get_nat_gateway(account, gateway_id)
                    .await
                    .map(|g| g.state),
                LifecycleState::Terminated,
            )
        })
        .await?;
    }

    if !failures.is_empty() {
        return Err(remote_failures("delete_nat_gateway", &failures));
    }
    Ok(StepOutput::done(format!(
        "Removed {} NAT gateway(s) and {} route table(s)",
        deleted.len(),
        ctx.nat_route_table_ids.len()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockProvider, SeededInstance};
    use crate::workflow::DiscardSink;
    use crate::workflow::progress::{ProgressEvent, StepStatus};
    use tokio::sync::broadcast;

    const MICRO: &str = "VM.Standard.E2.1.Micro";

    fn account() -> Account {
        Account::new("ocid1.tenancy.test", "ocid1.user.test", "us-ashburn-1")
    }

    fn workflow(mock: &MockProvider) -> BandwidthWorkflow {
        BandwidthWorkflow::new(
            Arc::new(mock.clone()),
            ResourceLocks::new(),
            WorkflowConfig::default(),
        )
    }

    fn enable_request(seeded: &SeededInstance) -> EnableBandwidthRequest {
        EnableBandwidthRequest {
            account: account(),
            instance_id: seeded.instance_id.clone(),
            health_check_port: 2222,
        }
    }

    fn disable_request(seeded: &SeededInstance, keep_nat: bool) -> DisableBandwidthRequest {
        DisableBandwidthRequest {
            account: account(),
            instance_id: seeded.instance_id.clone(),
            keep_nat,
            keep_load_balancer: false,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn test_public_ipv4_skips_private_ranges() {
        let addrs = vec![
            "10.0.0.5".to_string(),
            "172.16.3.1".to_string(),
            "192.168.1.1".to_string(),
            "2603:c020::1".to_string(),
            "152.70.20.9".to_string(),
        ];
        assert_eq!(public_ipv4(&addrs), Some("152.70.20.9"));
        assert_eq!(public_ipv4(&addrs[..3]), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_shape_is_rejected_without_mutation() {
        let mock = MockProvider::new();
        let seeded = mock
            .seed_instance("ocid1.tenancy.test", "VM.Standard.A1.Flex")
            .await;

        let err = workflow(&mock)
            .enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap_err();

        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert_eq!(mock.calls().await, vec!["get_instance".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_creates_nat_path_and_load_balancer() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let stale_lb = mock
            .seed_load_balancer("ocid1.tenancy.test", LifecycleState::Active)
            .await;
        let (tx, mut rx) = broadcast::channel(64);

        let outcome = workflow(&mock)
            .enable(enable_request(&seeded), &tx)
            .await
            .unwrap();

        assert!(outcome.is_completed(), "{outcome:?}");
        assert!(outcome.result_str("publicIp").unwrap().starts_with("152.70.20."));
        let lb_id = outcome.result_str("loadBalancerId").unwrap();
        let nat_id = outcome.result_str("natGatewayId").unwrap();
        let rt_id = outcome.result_str("routeTableId").unwrap();

        let spec = mock.load_balancer_spec(lb_id).await.unwrap();
        assert!(spec.display_name.starts_with("nlb-"));
        assert_eq!(spec.subnet_id, seeded.subnet_id);
        assert!(!spec.is_private);
        assert_eq!(spec.listener.protocol, ListenerProtocol::TcpAndUdp);
        assert_eq!(spec.listener.port, 0);
        assert_eq!(spec.backend_set.policy, BalancingPolicy::TwoTuple);
        assert!(spec.backend_set.preserve_source && spec.backend_set.fail_open);
        assert_eq!(spec.backend_set.health_check.port, 2222);
        assert_eq!(spec.backend_set.backends[0].target_id, seeded.instance_id);

        let table = mock
            .route_tables()
            .await
            .into_iter()
            .find(|t| t.id == rt_id)
            .unwrap();
        assert_eq!(table.display_name, "nat-route");
        assert_eq!(table.rules[0].network_entity_id, nat_id);

        let vnic = mock.vnic(&seeded.vnic_id).await.unwrap();
        assert_eq!(vnic.route_table_id.as_deref(), Some(rt_id));
        assert!(vnic.skip_source_dest_check);

        let stale = mock
            .load_balancers()
            .await
            .into_iter()
            .find(|lb| lb.id == stale_lb)
            .unwrap();
        assert_eq!(stale.state, LifecycleState::Deleted);

        let lists = mock.security_lists().await;
        assert_eq!(lists[0].ingress.len(), 3);
        assert_eq!(lists[0].egress.len(), 2);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 12);
        assert!(events.iter().all(|e| e.status != StepStatus::Warning));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_reuses_available_nat_gateway() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let nat_id = mock
            .seed_nat_gateway(&seeded.vcn_id, LifecycleState::Available)
            .await;

        let outcome = workflow(&mock)
            .enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();

        assert_eq!(outcome.result_str("natGatewayId"), Some(nat_id.as_str()));
        assert_eq!(mock.call_count("create_nat_gateway").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_restores_route_and_tears_down() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let wf = workflow(&mock);
        let enabled = wf
            .enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();
        let nat_rt = enabled.result_str("routeTableId").unwrap().to_string();

        let outcome = wf
            .disable(disable_request(&seeded, false), &DiscardSink)
            .await
            .unwrap();

        assert!(outcome.is_completed(), "{outcome:?}");
        let vnic = mock.vnic(&seeded.vnic_id).await.unwrap();
        assert_ne!(vnic.route_table_id.as_deref(), Some(nat_rt.as_str()));
        assert!(
            mock.nat_gateways()
                .await
                .iter()
                .all(|g| g.state == LifecycleState::Terminated)
        );
        assert!(
            mock.load_balancers()
                .await
                .iter()
                .all(|lb| lb.state == LifecycleState::Deleted)
        );
        let nat_table = mock
            .route_tables()
            .await
            .into_iter()
            .find(|t| t.id == nat_rt)
            .unwrap();
        assert!(nat_table.rules.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_keeps_nat_when_requested() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let wf = workflow(&mock);
        wf.enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();
        let (tx, mut rx) = broadcast::channel(64);

        let outcome = wf.disable(disable_request(&seeded, true), &tx).await.unwrap();

        assert!(outcome.is_completed());
        assert_eq!(mock.call_count("delete_nat_gateway").await, 0);
        let step2 = drain(&mut rx)
            .into_iter()
            .filter(|e| e.step_index == 2)
            .last()
            .unwrap();
        assert_eq!(step2.status, StepStatus::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_teardown_failure_is_a_warning() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let wf = workflow(&mock);
        wf.enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();
        mock.fail_always("delete_load_balancer").await;

        let outcome = wf
            .disable(disable_request(&seeded, false), &DiscardSink)
            .await
            .unwrap();

        match outcome {
            WorkflowOutcome::Completed { warnings, .. } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].step_index, 3);
            }
            other => panic!("expected completed outcome, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_balancer_aborts_as_remote_error() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        mock.fail_new_load_balancers().await;

        let outcome = workflow(&mock)
            .enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();

        match outcome {
            WorkflowOutcome::Failed {
                step_index,
                error_code,
                message,
                ..
            } => {
                assert_eq!(step_index, 4);
                assert_eq!(error_code, "REMOTE_API_ERROR");
                assert!(message.contains("entered FAILED"), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(mock.call_count("update_vnic").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_warning_carries_provider_failure() {
        let mock = MockProvider::new();
        let seeded = mock.seed_instance("ocid1.tenancy.test", MICRO).await;
        let wf = workflow(&mock);
        wf.enable(enable_request(&seeded), &DiscardSink)
            .await
            .unwrap();
        mock.fail_always("delete_nat_gateway").await;

        let outcome = wf
            .disable(disable_request(&seeded, false), &DiscardSink)
            .await
            .unwrap();

        match outcome {
            WorkflowOutcome::Completed { warnings, .. } => {
                assert_eq!(warnings.len(), 1);
                assert_eq!(warnings[0].step_index, 2);
                assert!(
                    warnings[0].message.starts_with("Remote API error: delete_nat_gateway failed"),
                    "{}",
                    warnings[0].message
                );
            }
            other => panic!("expected completed outcome, got {other:?}"),
        }
    }
}
