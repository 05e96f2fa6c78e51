// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provider for testing.
//!
//! An in-memory cloud that simulates asynchronous lifecycle convergence:
//! after a mutation, a resource reports its transitional state for a
//! configurable number of reads before settling. Failures can be injected
//! per operation, and every call is recorded together with the number of
//! calls in flight.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;
use crate::store::Account;

/// Resources whose lifecycle state the mock drives.
trait Stateful: Clone {
    fn set_state(&mut self, state: LifecycleState);
}

macro_rules! stateful {
    ($($ty:ty),* $(,)?) => {
        $(impl Stateful for $ty {
            fn set_state(&mut self, state: LifecycleState) {
                self.state = state;
            }
        })*
    };
}

stateful!(
    Instance,
    BootVolume,
    BootVolumeAttachment,
    BootVolumeBackup,
    RouteTable,
    NatGateway,
    LoadBalancer,
);

/// A resource plus its pending transition.
#[derive(Debug, Clone)]
struct Tracked<T> {
    value: T,
    next: Option<LifecycleState>,
    reads_left: u32,
}

impl<T: Stateful> Tracked<T> {
    fn settled(value: T) -> Self {
        Self {
            value,
            next: None,
            reads_left: 0,
        }
    }

    fn converging(mut value: T, now: LifecycleState, then: LifecycleState, reads: u32) -> Self {
        value.set_state(now);
        Self {
            value,
            next: Some(then),
            reads_left: reads,
        }
    }

    fn transition(&mut self, now: LifecycleState, then: LifecycleState, reads: u32) {
        self.value.set_state(now);
        self.next = Some(then);
        self.reads_left = reads;
    }

    /// Read through the provider API; advances the pending transition.
    fn observe(&mut self) -> T {
        if let Some(next) = self.next {
            if self.reads_left == 0 {
                self.value.set_state(next);
                self.next = None;
            } else {
                self.reads_left -= 1;
            }
        }
        self.value.clone()
    }
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Times(u32),
    Always,
}

#[derive(Default)]
struct MockCloud {
    seq: u64,
    instances: BTreeMap<String, Tracked<Instance>>,
    boot_volumes: BTreeMap<String, Tracked<BootVolume>>,
    attachments: BTreeMap<String, Tracked<BootVolumeAttachment>>,
    backups: BTreeMap<String, Tracked<BootVolumeBackup>>,
    vnics: BTreeMap<String, Vnic>,
    instance_vnics: HashMap<String, Vec<String>>,
    vcns: BTreeMap<String, Vcn>,
    route_tables: BTreeMap<String, Tracked<RouteTable>>,
    nat_gateways: BTreeMap<String, Tracked<NatGateway>>,
    security_lists: BTreeMap<String, SecurityList>,
    load_balancers: BTreeMap<String, Tracked<LoadBalancer>>,
    load_balancer_specs: HashMap<String, LoadBalancerSpec>,
    failing_load_balancers: bool,
    tenants: HashMap<String, TenantInfo>,
    password_expiry: HashMap<String, i32>,
    metrics: HashMap<String, Vec<MetricPoint>>,
    failures: HashMap<String, Failure>,
    calls: Vec<String>,
}

impl MockCloud {
    fn next_id(&mut self, kind: &str) -> String {
        self.seq += 1;
        format!("ocid1.{kind}.mock.{:06}", self.seq)
    }

    fn next_host(&mut self) -> u64 {
        self.seq += 1;
        self.seq % 250 + 2
    }

    fn take_failure(&mut self, operation: &str) -> ProviderResult<()> {
        match self.failures.get_mut(operation) {
            Some(Failure::Always) => Err(ProviderError::api(operation, "injected failure")),
            Some(Failure::Times(remaining)) => {
                *remaining -= 1;
                if *remaining == 0 {
                    self.failures.remove(operation);
                }
                Err(ProviderError::api(operation, "injected failure"))
            }
            None => Ok(()),
        }
    }

    /// Ensure the compartment has a VCN with one public subnet, a default
    /// route table through an internet gateway and a default security list.
    fn ensure_network(&mut self, compartment_id: &str) -> (String, String) {
        if let Some(vcn) = self
            .vcns
            .values()
            .find(|v| v.compartment_id == compartment_id)
            && let Some(subnet) = vcn.subnets.first()
        {
            return (vcn.id.clone(), subnet.id.clone());
        }

        let vcn_id = self.next_id("vcn");
        let subnet_id = self.next_id("subnet");
        let igw_id = self.next_id("internetgateway");
        let rt_id = self.next_id("routetable");
        let sl_id = self.next_id("securitylist");

        self.vcns.insert(
            vcn_id.clone(),
            Vcn {
                id: vcn_id.clone(),
                display_name: "vcn-default".to_string(),
                compartment_id: compartment_id.to_string(),
                cidr_block: "10.0.0.0/16".to_string(),
                state: LifecycleState::Available,
                subnets: vec![Subnet {
                    id: subnet_id.clone(),
                    vcn_id: vcn_id.clone(),
                    display_name: "subnet-public".to_string(),
                    cidr_block: "10.0.0.0/24".to_string(),
                    availability_domain: None,
                    state: LifecycleState::Available,
                    is_public: true,
                }],
            },
        );
        self.route_tables.insert(
            rt_id.clone(),
            Tracked::settled(RouteTable {
                id: rt_id,
                vcn_id: vcn_id.clone(),
                display_name: "Default Route Table".to_string(),
                state: LifecycleState::Available,
                rules: vec![RouteRule {
                    destination: "0.0.0.0/0".to_string(),
                    network_entity_id: igw_id,
                }],
            }),
        );
        self.security_lists.insert(
            sl_id.clone(),
            SecurityList {
                id: sl_id,
                vcn_id: vcn_id.clone(),
                display_name: "Default Security List".to_string(),
                ingress: vec![SecurityRule {
                    protocol: "6".to_string(),
                    cidr: "0.0.0.0/0".to_string(),
                }],
                egress: vec![SecurityRule {
                    protocol: "all".to_string(),
                    cidr: "0.0.0.0/0".to_string(),
                }],
            },
        );

        (vcn_id, subnet_id)
    }

    #[allow(clippy::too_many_arguments)]
    fn provision_instance(
        &mut self,
        compartment_id: &str,
        region: &str,
        display_name: &str,
        shape: &str,
        ocpus: f32,
        memory_gbs: f32,
        disk_gbs: i64,
        state: Tracked<()>,
    ) -> SeededInstance {
        let (vcn_id, subnet_id) = self.ensure_network(compartment_id);
        let instance_id = self.next_id("instance");
        let boot_volume_id = self.next_id("bootvolume");
        let attachment_id = self.next_id("bootvolumeattachment");
        let vnic_id = self.next_id("vnic");
        let host = self.next_host();

        let instance = Instance {
            id: instance_id.clone(),
            display_name: display_name.to_string(),
            compartment_id: compartment_id.to_string(),
            availability_domain: "AD-1".to_string(),
            region: region.to_string(),
            shape: shape.to_string(),
            ocpus,
            memory_gbs,
            state: LifecycleState::Running,
            created_at: Some(Utc::now()),
        };
        let tracked = match state.next {
            Some(then) => Tracked::converging(
                instance,
                LifecycleState::Provisioning,
                then,
                state.reads_left,
            ),
            None => Tracked::settled(instance),
        };
        self.instances.insert(instance_id.clone(), tracked);

        self.boot_volumes.insert(
            boot_volume_id.clone(),
            Tracked::settled(BootVolume {
                id: boot_volume_id.clone(),
                display_name: format!("{display_name} (Boot Volume)"),
                compartment_id: compartment_id.to_string(),
                availability_domain: "AD-1".to_string(),
                size_gbs: disk_gbs,
                vpus_per_gb: 10,
                state: LifecycleState::Available,
            }),
        );
        self.attachments.insert(
            attachment_id.clone(),
            Tracked::settled(BootVolumeAttachment {
                id: attachment_id.clone(),
                instance_id: instance_id.clone(),
                boot_volume_id: boot_volume_id.clone(),
                display_name: "remote boot attachment".to_string(),
                state: LifecycleState::Attached,
            }),
        );
        self.vnics.insert(
            vnic_id.clone(),
            Vnic {
                id: vnic_id.clone(),
                display_name: display_name.to_string(),
                subnet_id: subnet_id.clone(),
                public_ip: Some(format!("129.146.10.{host}")),
                private_ip: Some(format!("10.0.0.{host}")),
                ipv6: None,
                route_table_id: None,
                skip_source_dest_check: false,
            },
        );
        self.instance_vnics
            .insert(instance_id.clone(), vec![vnic_id.clone()]);

        SeededInstance {
            instance_id,
            boot_volume_id,
            attachment_id,
            vnic_id,
            vcn_id,
            subnet_id,
        }
    }
}

impl Stateful for () {
    fn set_state(&mut self, _state: LifecycleState) {}
}

/// Identifiers of an instance created by [`MockProvider::seed_instance`].
#[derive(Debug, Clone)]
pub struct SeededInstance {
    /// Instance OCID.
    pub instance_id: String,
    /// Boot volume OCID.
    pub boot_volume_id: String,
    /// Boot volume attachment OCID.
    pub attachment_id: String,
    /// Primary VNIC OCID.
    pub vnic_id: String,
    /// VCN OCID.
    pub vcn_id: String,
    /// Subnet OCID.
    pub subnet_id: String,
}

/// Decrements the in-flight gauge when a call completes.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock provider for testing.
#[derive(Clone)]
pub struct MockProvider {
    cloud: Arc<Mutex<MockCloud>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    settle_reads: u32,
    call_delay: Duration,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a mock where mutated resources settle on the second read.
    pub fn new() -> Self {
        Self {
            cloud: Arc::new(Mutex::new(MockCloud::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
            settle_reads: 1,
            call_delay: Duration::ZERO,
        }
    }

    /// Number of reads that still report the transitional state after a mutation.
    pub fn with_settle_reads(mut self, reads: u32) -> Self {
        self.settle_reads = reads;
        self
    }

    /// Simulated latency of every call.
    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    /// Fail the next `times` calls of `operation`.
    pub async fn fail(&self, operation: &str, times: u32) {
        if times == 0 {
            return;
        }
        let mut cloud = self.cloud.lock().await;
        cloud
            .failures
            .insert(operation.to_string(), Failure::Times(times));
    }

    /// Fail every call of `operation` until cleared.
    pub async fn fail_always(&self, operation: &str) {
        let mut cloud = self.cloud.lock().await;
        cloud
            .failures
            .insert(operation.to_string(), Failure::Always);
    }

    /// Remove all injected failures.
    pub async fn clear_failures(&self) {
        self.cloud.lock().await.failures.clear();
    }

    /// Operations called so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.cloud.lock().await.calls.clone()
    }

    /// How many times `operation` has been called.
    pub async fn call_count(&self, operation: &str) -> usize {
        let cloud = self.cloud.lock().await;
        cloud.calls.iter().filter(|c| *c == operation).count()
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Create a running instance with a boot volume, a VNIC and (if needed)
    /// a default network in the compartment.
    pub async fn seed_instance(&self, compartment_id: &str, shape: &str) -> SeededInstance {
        let mut cloud = self.cloud.lock().await;
        cloud.provision_instance(
            compartment_id,
            "us-ashburn-1",
            "seeded-instance",
            shape,
            1.0,
            1.0,
            50,
            Tracked::settled(()),
        )
    }

    /// Add a NAT gateway to a VCN.
    pub async fn seed_nat_gateway(&self, vcn_id: &str, state: LifecycleState) -> String {
        let mut cloud = self.cloud.lock().await;
        let id = cloud.next_id("natgateway");
        cloud.nat_gateways.insert(
            id.clone(),
            Tracked::settled(NatGateway {
                id: id.clone(),
                vcn_id: vcn_id.to_string(),
                display_name: "nat-gateway".to_string(),
                state,
            }),
        );
        id
    }

    /// Add a load balancer to a compartment.
    pub async fn seed_load_balancer(&self, compartment_id: &str, state: LifecycleState) -> String {
        let mut cloud = self.cloud.lock().await;
        let id = cloud.next_id("networkloadbalancer");
        cloud.load_balancers.insert(
            id.clone(),
            Tracked::settled(LoadBalancer {
                id: id.clone(),
                display_name: "nlb-existing".to_string(),
                compartment_id: compartment_id.to_string(),
                state,
                ip_addresses: vec!["10.0.0.200".to_string()],
            }),
        );
        id
    }

    /// Make load balancers created from now on settle in `FAILED`.
    pub async fn fail_new_load_balancers(&self) {
        self.cloud.lock().await.failing_load_balancers = true;
    }

    /// Register tenancy details returned for a tenancy OCID.
    pub async fn set_tenant(&self, tenant_id: &str, info: TenantInfo) {
        let mut cloud = self.cloud.lock().await;
        cloud.tenants.insert(tenant_id.to_string(), info);
    }

    /// Register the datapoints returned for a metric query string.
    pub async fn set_metric_series(&self, query: &str, points: Vec<MetricPoint>) {
        let mut cloud = self.cloud.lock().await;
        cloud.metrics.insert(query.to_string(), points);
    }

    /// Current instance without advancing its lifecycle.
    pub async fn instance(&self, instance_id: &str) -> Option<Instance> {
        let cloud = self.cloud.lock().await;
        cloud.instances.get(instance_id).map(|t| t.value.clone())
    }

    /// Force an instance into a settled state.
    pub async fn set_instance_state(&self, instance_id: &str, state: LifecycleState) {
        let mut cloud = self.cloud.lock().await;
        if let Some(tracked) = cloud.instances.get_mut(instance_id) {
            tracked.value.state = state;
            tracked.next = None;
        }
    }

    /// All boot volumes, including removed ones.
    pub async fn boot_volumes(&self) -> Vec<BootVolume> {
        let cloud = self.cloud.lock().await;
        cloud.boot_volumes.values().map(|t| t.value.clone()).collect()
    }

    /// All boot volume attachments, including detached ones.
    pub async fn attachments(&self) -> Vec<BootVolumeAttachment> {
        let cloud = self.cloud.lock().await;
        cloud.attachments.values().map(|t| t.value.clone()).collect()
    }

    /// All backups, including removed ones.
    pub async fn backups(&self) -> Vec<BootVolumeBackup> {
        let cloud = self.cloud.lock().await;
        cloud.backups.values().map(|t| t.value.clone()).collect()
    }

    /// Current VNIC.
    pub async fn vnic(&self, vnic_id: &str) -> Option<Vnic> {
        self.cloud.lock().await.vnics.get(vnic_id).cloned()
    }

    /// All route tables.
    pub async fn route_tables(&self) -> Vec<RouteTable> {
        let cloud = self.cloud.lock().await;
        cloud.route_tables.values().map(|t| t.value.clone()).collect()
    }

    /// All NAT gateways.
    pub async fn nat_gateways(&self) -> Vec<NatGateway> {
        let cloud = self.cloud.lock().await;
        cloud.nat_gateways.values().map(|t| t.value.clone()).collect()
    }

    /// All security lists.
    pub async fn security_lists(&self) -> Vec<SecurityList> {
        let cloud = self.cloud.lock().await;
        cloud.security_lists.values().cloned().collect()
    }

    /// All load balancers.
    pub async fn load_balancers(&self) -> Vec<LoadBalancer> {
        let cloud = self.cloud.lock().await;
        cloud.load_balancers.values().map(|t| t.value.clone()).collect()
    }

    /// Parameters a load balancer was created with.
    pub async fn load_balancer_spec(&self, load_balancer_id: &str) -> Option<LoadBalancerSpec> {
        let cloud = self.cloud.lock().await;
        cloud.load_balancer_specs.get(load_balancer_id).cloned()
    }

    /// Record the call, apply latency and injected failures.
    async fn enter(&self, operation: &str) -> ProviderResult<InFlight> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(self.in_flight.clone());

        self.cloud.lock().await.calls.push(operation.to_string());

        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        self.cloud.lock().await.take_failure(operation)?;
        Ok(guard)
    }
}

fn missing(resource: &'static str, id: &str) -> ProviderError {
    ProviderError::not_found(resource, id)
}

#[async_trait]
impl CloudProvider for MockProvider {
    fn provider_type(&self) -> &'static str {
        "mock"
    }

    async fn list_instances(
        &self,
        _account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<Instance>> {
        let _call = self.enter("list_instances").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .instances
            .values()
            .filter(|t| t.value.compartment_id == compartment_id)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_instance(&self, _account: &Account, instance_id: &str) -> ProviderResult<Instance> {
        let _call = self.enter("get_instance").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .instances
            .get_mut(instance_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("instance", instance_id))
    }

    async fn get_instance_details(
        &self,
        _account: &Account,
        instance_id: &str,
    ) -> ProviderResult<InstanceDetails> {
        let _call = self.enter("get_instance_details").await?;
        let cloud = self.cloud.lock().await;
        let instance = cloud
            .instances
            .get(instance_id)
            .map(|t| t.value.clone())
            .ok_or_else(|| missing("instance", instance_id))?;

        let vnics: Vec<Vnic> = cloud
            .instance_vnics
            .get(instance_id)
            .map(|ids| ids.iter().filter_map(|id| cloud.vnics.get(id).cloned()).collect())
            .unwrap_or_default();

        let boot_volume = cloud
            .attachments
            .values()
            .find(|a| {
                a.value.instance_id == instance_id && a.value.state == LifecycleState::Attached
            })
            .and_then(|a| cloud.boot_volumes.get(&a.value.boot_volume_id))
            .map(|t| t.value.clone());

        Ok(InstanceDetails {
            public_ips: vnics.iter().filter_map(|v| v.public_ip.clone()).collect(),
            private_ips: vnics.iter().filter_map(|v| v.private_ip.clone()).collect(),
            ipv6: vnics.first().and_then(|v| v.ipv6.clone()),
            boot_volume_size_gbs: boot_volume.as_ref().map(|b| b.size_gbs),
            boot_volume_vpus_per_gb: boot_volume.as_ref().map(|b| b.vpus_per_gb),
            image_name: Some("Canonical-Ubuntu-22.04".to_string()),
            vnics,
            instance,
        })
    }

    async fn instance_action(
        &self,
        _account: &Account,
        instance_id: &str,
        action: InstanceAction,
    ) -> ProviderResult<()> {
        let _call = self.enter(action.operation()).await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        let tracked = cloud
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| missing("instance", instance_id))?;
        match action {
            InstanceAction::Start | InstanceAction::Reset => {
                tracked.transition(LifecycleState::Starting, LifecycleState::Running, reads)
            }
            InstanceAction::Stop | InstanceAction::SoftStop => {
                tracked.transition(LifecycleState::Stopping, LifecycleState::Stopped, reads)
            }
        }
        Ok(())
    }

    async fn terminate_instance(
        &self,
        _account: &Account,
        instance_id: &str,
        _preserve_boot_volume: bool,
    ) -> ProviderResult<()> {
        let _call = self.enter("terminate_instance").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| missing("instance", instance_id))?
            .transition(LifecycleState::Terminating, LifecycleState::Terminated, reads);
        Ok(())
    }

    async fn update_instance_shape(
        &self,
        _account: &Account,
        instance_id: &str,
        ocpus: f32,
        memory_gbs: f32,
    ) -> ProviderResult<()> {
        let _call = self.enter("update_instance_shape").await?;
        let mut cloud = self.cloud.lock().await;
        let tracked = cloud
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| missing("instance", instance_id))?;
        tracked.value.ocpus = ocpus;
        tracked.value.memory_gbs = memory_gbs;
        Ok(())
    }

    async fn launch_instance(
        &self,
        account: &Account,
        spec: &LaunchSpec,
    ) -> ProviderResult<Instance> {
        let _call = self.enter("launch_instance").await?;
        let reads = self.settle_reads;
        let shape = if spec.architecture.eq_ignore_ascii_case("AMD") {
            "VM.Standard.E2.1.Micro"
        } else {
            "VM.Standard.A1.Flex"
        };
        let region = if spec.region.is_empty() {
            account.region.clone()
        } else {
            spec.region.clone()
        };
        let name = spec
            .display_name
            .clone()
            .unwrap_or_else(|| format!("instance-{}", Utc::now().format("%Y%m%d-%H%M")));

        let mut cloud = self.cloud.lock().await;
        let seeded = cloud.provision_instance(
            &account.tenant_id,
            &region,
            &name,
            shape,
            spec.ocpus,
            spec.memory_gbs,
            spec.disk_gbs,
            Tracked {
                value: (),
                next: Some(LifecycleState::Running),
                reads_left: reads,
            },
        );
        cloud
            .instances
            .get(&seeded.instance_id)
            .map(|t| t.value.clone())
            .ok_or_else(|| missing("instance", &seeded.instance_id))
    }

    async fn list_boot_volumes(
        &self,
        _account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<BootVolume>> {
        let _call = self.enter("list_boot_volumes").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .boot_volumes
            .values()
            .filter(|t| t.value.compartment_id == compartment_id)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_boot_volume(
        &self,
        _account: &Account,
        boot_volume_id: &str,
    ) -> ProviderResult<BootVolume> {
        let _call = self.enter("get_boot_volume").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .boot_volumes
            .get_mut(boot_volume_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("boot volume", boot_volume_id))
    }

    async fn create_boot_volume(
        &self,
        _account: &Account,
        details: &CreateBootVolume,
    ) -> ProviderResult<BootVolume> {
        let _call = self.enter("create_boot_volume").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        if !cloud.backups.contains_key(&details.source_backup_id) {
            return Err(missing("boot volume backup", &details.source_backup_id));
        }
        let id = cloud.next_id("bootvolume");
        let volume = BootVolume {
            id: id.clone(),
            display_name: details.display_name.clone(),
            compartment_id: details.compartment_id.clone(),
            availability_domain: details.availability_domain.clone(),
            size_gbs: details.size_gbs,
            vpus_per_gb: 10,
            state: LifecycleState::Restoring,
        };
        let tracked =
            Tracked::converging(volume, LifecycleState::Restoring, LifecycleState::Available, reads);
        let created = tracked.value.clone();
        cloud.boot_volumes.insert(id, tracked);
        Ok(created)
    }

    async fn delete_boot_volume(
        &self,
        _account: &Account,
        boot_volume_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_boot_volume").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .boot_volumes
            .get_mut(boot_volume_id)
            .ok_or_else(|| missing("boot volume", boot_volume_id))?
            .transition(LifecycleState::Terminating, LifecycleState::Terminated, reads);
        Ok(())
    }

    async fn update_boot_volume(
        &self,
        _account: &Account,
        boot_volume_id: &str,
        size_gbs: i64,
        vpus_per_gb: i64,
    ) -> ProviderResult<()> {
        let _call = self.enter("update_boot_volume").await?;
        let mut cloud = self.cloud.lock().await;
        let tracked = cloud
            .boot_volumes
            .get_mut(boot_volume_id)
            .ok_or_else(|| missing("boot volume", boot_volume_id))?;
        if size_gbs > 0 {
            tracked.value.size_gbs = size_gbs;
        }
        if vpus_per_gb > 0 {
            tracked.value.vpus_per_gb = vpus_per_gb;
        }
        Ok(())
    }

    async fn list_boot_volume_attachments(
        &self,
        _account: &Account,
        instance_id: &str,
    ) -> ProviderResult<Vec<BootVolumeAttachment>> {
        let _call = self.enter("list_boot_volume_attachments").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .attachments
            .values()
            .filter(|t| t.value.instance_id == instance_id)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_boot_volume_attachment(
        &self,
        _account: &Account,
        attachment_id: &str,
    ) -> ProviderResult<BootVolumeAttachment> {
        let _call = self.enter("get_boot_volume_attachment").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .attachments
            .get_mut(attachment_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("boot volume attachment", attachment_id))
    }

    async fn attach_boot_volume(
        &self,
        _account: &Account,
        instance_id: &str,
        boot_volume_id: &str,
        display_name: &str,
    ) -> ProviderResult<BootVolumeAttachment> {
        let _call = self.enter("attach_boot_volume").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        if !cloud.instances.contains_key(instance_id) {
            return Err(missing("instance", instance_id));
        }
        if !cloud.boot_volumes.contains_key(boot_volume_id) {
            return Err(missing("boot volume", boot_volume_id));
        }
        let id = cloud.next_id("bootvolumeattachment");
        let attachment = BootVolumeAttachment {
            id: id.clone(),
            instance_id: instance_id.to_string(),
            boot_volume_id: boot_volume_id.to_string(),
            display_name: display_name.to_string(),
            state: LifecycleState::Attaching,
        };
        let tracked = Tracked::converging(
            attachment,
            LifecycleState::Attaching,
            LifecycleState::Attached,
            reads,
        );
        let created = tracked.value.clone();
        cloud.attachments.insert(id, tracked);
        Ok(created)
    }

    async fn detach_boot_volume(
        &self,
        _account: &Account,
        attachment_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("detach_boot_volume").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .attachments
            .get_mut(attachment_id)
            .ok_or_else(|| missing("boot volume attachment", attachment_id))?
            .transition(LifecycleState::Detaching, LifecycleState::Detached, reads);
        Ok(())
    }

    async fn create_boot_volume_backup(
        &self,
        _account: &Account,
        boot_volume_id: &str,
        display_name: &str,
        backup_type: BackupType,
    ) -> ProviderResult<BootVolumeBackup> {
        let _call = self.enter("create_boot_volume_backup").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        if !cloud.boot_volumes.contains_key(boot_volume_id) {
            return Err(missing("boot volume", boot_volume_id));
        }
        let id = cloud.next_id("bootvolumebackup");
        let backup = BootVolumeBackup {
            id: id.clone(),
            boot_volume_id: boot_volume_id.to_string(),
            display_name: display_name.to_string(),
            backup_type,
            state: LifecycleState::Creating,
        };
        let tracked =
            Tracked::converging(backup, LifecycleState::Creating, LifecycleState::Available, reads);
        let created = tracked.value.clone();
        cloud.backups.insert(id, tracked);
        Ok(created)
    }

    async fn get_boot_volume_backup(
        &self,
        _account: &Account,
        backup_id: &str,
    ) -> ProviderResult<BootVolumeBackup> {
        let _call = self.enter("get_boot_volume_backup").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .backups
            .get_mut(backup_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("boot volume backup", backup_id))
    }

    async fn delete_boot_volume_backup(
        &self,
        _account: &Account,
        backup_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_boot_volume_backup").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .backups
            .get_mut(backup_id)
            .ok_or_else(|| missing("boot volume backup", backup_id))?
            .transition(LifecycleState::Terminating, LifecycleState::Terminated, reads);
        Ok(())
    }

    async fn list_instance_vnics(
        &self,
        _account: &Account,
        instance_id: &str,
    ) -> ProviderResult<Vec<Vnic>> {
        let _call = self.enter("list_instance_vnics").await?;
        let cloud = self.cloud.lock().await;
        let ids = cloud
            .instance_vnics
            .get(instance_id)
            .ok_or_else(|| missing("instance", instance_id))?;
        Ok(ids
            .iter()
            .filter_map(|id| cloud.vnics.get(id).cloned())
            .collect())
    }

    async fn get_vnic(&self, _account: &Account, vnic_id: &str) -> ProviderResult<Vnic> {
        let _call = self.enter("get_vnic").await?;
        let cloud = self.cloud.lock().await;
        cloud
            .vnics
            .get(vnic_id)
            .cloned()
            .ok_or_else(|| missing("vnic", vnic_id))
    }

    async fn update_vnic(
        &self,
        _account: &Account,
        vnic_id: &str,
        update: &VnicUpdate,
    ) -> ProviderResult<Vnic> {
        let _call = self.enter("update_vnic").await?;
        let mut cloud = self.cloud.lock().await;
        let vnic = cloud
            .vnics
            .get_mut(vnic_id)
            .ok_or_else(|| missing("vnic", vnic_id))?;
        if let Some(route_table_id) = &update.route_table_id {
            vnic.route_table_id = Some(route_table_id.clone());
        }
        if let Some(skip) = update.skip_source_dest_check {
            vnic.skip_source_dest_check = skip;
        }
        Ok(vnic.clone())
    }

    async fn list_vcns(&self, _account: &Account, compartment_id: &str) -> ProviderResult<Vec<Vcn>> {
        let _call = self.enter("list_vcns").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .vcns
            .values()
            .filter(|v| v.compartment_id == compartment_id)
            .cloned()
            .collect())
    }

    async fn get_vcn(&self, _account: &Account, vcn_id: &str) -> ProviderResult<Vcn> {
        let _call = self.enter("get_vcn").await?;
        let cloud = self.cloud.lock().await;
        cloud
            .vcns
            .get(vcn_id)
            .cloned()
            .ok_or_else(|| missing("vcn", vcn_id))
    }

    async fn get_subnet(&self, _account: &Account, subnet_id: &str) -> ProviderResult<Subnet> {
        let _call = self.enter("get_subnet").await?;
        let cloud = self.cloud.lock().await;
        cloud
            .vcns
            .values()
            .flat_map(|v| v.subnets.iter())
            .find(|s| s.id == subnet_id)
            .cloned()
            .ok_or_else(|| missing("subnet", subnet_id))
    }

    async fn list_subnets(
        &self,
        _account: &Account,
        _compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<Subnet>> {
        let _call = self.enter("list_subnets").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .vcns
            .get(vcn_id)
            .map(|v| v.subnets.clone())
            .unwrap_or_default())
    }

    async fn list_route_tables(
        &self,
        _account: &Account,
        _compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<RouteTable>> {
        let _call = self.enter("list_route_tables").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .route_tables
            .values()
            .filter(|t| t.value.vcn_id == vcn_id && !t.value.state.is_removed())
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_route_table(
        &self,
        _account: &Account,
        route_table_id: &str,
    ) -> ProviderResult<RouteTable> {
        let _call = self.enter("get_route_table").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .route_tables
            .get_mut(route_table_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("route table", route_table_id))
    }

    async fn create_route_table(
        &self,
        _account: &Account,
        details: &CreateRouteTable,
    ) -> ProviderResult<RouteTable> {
        let _call = self.enter("create_route_table").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        let id = cloud.next_id("routetable");
        let table = RouteTable {
            id: id.clone(),
            vcn_id: details.vcn_id.clone(),
            display_name: details.display_name.clone(),
            state: LifecycleState::Provisioning,
            rules: details.rules.clone(),
        };
        let tracked = Tracked::converging(
            table,
            LifecycleState::Provisioning,
            LifecycleState::Available,
            reads,
        );
        let created = tracked.value.clone();
        cloud.route_tables.insert(id, tracked);
        Ok(created)
    }

    async fn update_route_rules(
        &self,
        _account: &Account,
        route_table_id: &str,
        rules: Vec<RouteRule>,
    ) -> ProviderResult<RouteTable> {
        let _call = self.enter("update_route_rules").await?;
        let mut cloud = self.cloud.lock().await;
        let tracked = cloud
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| missing("route table", route_table_id))?;
        tracked.value.rules = rules;
        Ok(tracked.value.clone())
    }

    async fn delete_route_table(
        &self,
        _account: &Account,
        route_table_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_route_table").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| missing("route table", route_table_id))?
            .transition(LifecycleState::Terminating, LifecycleState::Terminated, reads);
        Ok(())
    }

    async fn list_nat_gateways(
        &self,
        _account: &Account,
        _compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<NatGateway>> {
        let _call = self.enter("list_nat_gateways").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .nat_gateways
            .values()
            .filter(|t| t.value.vcn_id == vcn_id)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_nat_gateway(
        &self,
        _account: &Account,
        nat_gateway_id: &str,
    ) -> ProviderResult<NatGateway> {
        let _call = self.enter("get_nat_gateway").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .nat_gateways
            .get_mut(nat_gateway_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("nat gateway", nat_gateway_id))
    }

    async fn create_nat_gateway(
        &self,
        _account: &Account,
        _compartment_id: &str,
        vcn_id: &str,
        display_name: &str,
    ) -> ProviderResult<NatGateway> {
        let _call = self.enter("create_nat_gateway").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        let id = cloud.next_id("natgateway");
        let gateway = NatGateway {
            id: id.clone(),
            vcn_id: vcn_id.to_string(),
            display_name: display_name.to_string(),
            state: LifecycleState::Provisioning,
        };
        let tracked = Tracked::converging(
            gateway,
            LifecycleState::Provisioning,
            LifecycleState::Available,
            reads,
        );
        let created = tracked.value.clone();
        cloud.nat_gateways.insert(id, tracked);
        Ok(created)
    }

    async fn delete_nat_gateway(
        &self,
        _account: &Account,
        nat_gateway_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_nat_gateway").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .nat_gateways
            .get_mut(nat_gateway_id)
            .ok_or_else(|| missing("nat gateway", nat_gateway_id))?
            .transition(LifecycleState::Terminating, LifecycleState::Terminated, reads);
        Ok(())
    }

    async fn list_security_lists(
        &self,
        _account: &Account,
        _compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<SecurityList>> {
        let _call = self.enter("list_security_lists").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .security_lists
            .values()
            .filter(|s| s.vcn_id == vcn_id)
            .cloned()
            .collect())
    }

    async fn update_security_list(
        &self,
        _account: &Account,
        security_list_id: &str,
        ingress: Vec<SecurityRule>,
        egress: Vec<SecurityRule>,
    ) -> ProviderResult<()> {
        let _call = self.enter("update_security_list").await?;
        let mut cloud = self.cloud.lock().await;
        let list = cloud
            .security_lists
            .get_mut(security_list_id)
            .ok_or_else(|| missing("security list", security_list_id))?;
        list.ingress = ingress;
        list.egress = egress;
        Ok(())
    }

    async fn list_load_balancers(
        &self,
        _account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<LoadBalancer>> {
        let _call = self.enter("list_load_balancers").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .load_balancers
            .values()
            .filter(|t| t.value.compartment_id == compartment_id)
            .map(|t| t.value.clone())
            .collect())
    }

    async fn get_load_balancer(
        &self,
        _account: &Account,
        load_balancer_id: &str,
    ) -> ProviderResult<LoadBalancer> {
        let _call = self.enter("get_load_balancer").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .load_balancers
            .get_mut(load_balancer_id)
            .map(Tracked::observe)
            .ok_or_else(|| missing("load balancer", load_balancer_id))
    }

    async fn create_load_balancer(
        &self,
        _account: &Account,
        spec: &LoadBalancerSpec,
    ) -> ProviderResult<LoadBalancer> {
        let _call = self.enter("create_load_balancer").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        let id = cloud.next_id("networkloadbalancer");
        let host = cloud.next_host();
        let balancer = LoadBalancer {
            id: id.clone(),
            display_name: spec.display_name.clone(),
            compartment_id: spec.compartment_id.clone(),
            state: LifecycleState::Creating,
            ip_addresses: vec![format!("10.0.0.{host}"), format!("152.70.20.{host}")],
        };
        let settles_in = if cloud.failing_load_balancers {
            LifecycleState::Failed
        } else {
            LifecycleState::Active
        };
        let tracked = Tracked::converging(balancer, LifecycleState::Creating, settles_in, reads);
        let created = tracked.value.clone();
        cloud.load_balancers.insert(id.clone(), tracked);
        cloud.load_balancer_specs.insert(id, spec.clone());
        Ok(created)
    }

    async fn delete_load_balancer(
        &self,
        _account: &Account,
        load_balancer_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_load_balancer").await?;
        let reads = self.settle_reads;
        let mut cloud = self.cloud.lock().await;
        cloud
            .load_balancers
            .get_mut(load_balancer_id)
            .ok_or_else(|| missing("load balancer", load_balancer_id))?
            .transition(LifecycleState::Deleting, LifecycleState::Deleted, reads);
        Ok(())
    }

    async fn get_tenant_info(&self, account: &Account) -> ProviderResult<TenantInfo> {
        let _call = self.enter("get_tenant_info").await?;
        let cloud = self.cloud.lock().await;
        cloud
            .tenants
            .get(&account.tenant_id)
            .cloned()
            .ok_or_else(|| missing("tenancy", &account.tenant_id))
    }

    async fn list_users(&self, account: &Account) -> ProviderResult<Vec<TenantUser>> {
        let _call = self.enter("list_users").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .tenants
            .get(&account.tenant_id)
            .map(|t| t.users.clone())
            .unwrap_or_default())
    }

    async fn delete_user(&self, account: &Account, user_id: &str) -> ProviderResult<()> {
        let _call = self.enter("delete_user").await?;
        let mut cloud = self.cloud.lock().await;
        let tenant = cloud
            .tenants
            .get_mut(&account.tenant_id)
            .ok_or_else(|| missing("tenancy", &account.tenant_id))?;
        let before = tenant.users.len();
        tenant.users.retain(|u| u.id != user_id);
        if tenant.users.len() == before {
            return Err(missing("user", user_id));
        }
        Ok(())
    }

    async fn reset_user_password(
        &self,
        account: &Account,
        user_id: &str,
    ) -> ProviderResult<String> {
        let _call = self.enter("reset_user_password").await?;
        let cloud = self.cloud.lock().await;
        let exists = cloud
            .tenants
            .get(&account.tenant_id)
            .is_some_and(|t| t.users.iter().any(|u| u.id == user_id));
        if !exists {
            return Err(missing("user", user_id));
        }
        Ok("Mock-Pa55word!".to_string())
    }

    async fn delete_user_mfa_devices(
        &self,
        account: &Account,
        user_id: &str,
    ) -> ProviderResult<()> {
        let _call = self.enter("delete_user_mfa_devices").await?;
        let mut cloud = self.cloud.lock().await;
        let user = cloud
            .tenants
            .get_mut(&account.tenant_id)
            .and_then(|t| t.users.iter_mut().find(|u| u.id == user_id))
            .ok_or_else(|| missing("user", user_id))?;
        user.mfa_activated = false;
        Ok(())
    }

    async fn delete_user_api_keys(&self, account: &Account, user_id: &str) -> ProviderResult<()> {
        let _call = self.enter("delete_user_api_keys").await?;
        let cloud = self.cloud.lock().await;
        let exists = cloud
            .tenants
            .get(&account.tenant_id)
            .is_some_and(|t| t.users.iter().any(|u| u.id == user_id));
        if exists {
            Ok(())
        } else {
            Err(missing("user", user_id))
        }
    }

    async fn get_password_expiry_days(&self, account: &Account) -> ProviderResult<i32> {
        let _call = self.enter("get_password_expiry_days").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .password_expiry
            .get(&account.tenant_id)
            .copied()
            .unwrap_or(0))
    }

    async fn set_password_expiry_days(&self, account: &Account, days: i32) -> ProviderResult<()> {
        let _call = self.enter("set_password_expiry_days").await?;
        let mut cloud = self.cloud.lock().await;
        cloud
            .password_expiry
            .insert(account.tenant_id.clone(), days.max(0));
        Ok(())
    }

    async fn summarize_metrics(
        &self,
        _account: &Account,
        query: &MetricQuery,
    ) -> ProviderResult<Vec<MetricPoint>> {
        let _call = self.enter("summarize_metrics").await?;
        let cloud = self.cloud.lock().await;
        Ok(cloud
            .metrics
            .get(&query.query)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.timestamp >= query.start && p.timestamp <= query.end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new("ocid1.tenancy.test", "ocid1.user.test", "us-ashburn-1")
    }

    #[tokio::test]
    async fn test_mutation_settles_after_configured_reads() {
        let provider = MockProvider::new().with_settle_reads(2);
        let acct = account();
        let seeded = provider.seed_instance(&acct.tenant_id, "VM.Standard.A1.Flex").await;

        provider
            .instance_action(&acct, &seeded.instance_id, InstanceAction::Stop)
            .await
            .unwrap();

        let states: Vec<LifecycleState> = {
            let mut states = Vec::new();
            for _ in 0..3 {
                states.push(provider.get_instance(&acct, &seeded.instance_id).await.unwrap().state);
            }
            states
        };
        assert_eq!(
            states,
            vec![
                LifecycleState::Stopping,
                LifecycleState::Stopping,
                LifecycleState::Stopped
            ]
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let provider = MockProvider::new();
        let acct = account();
        let seeded = provider.seed_instance(&acct.tenant_id, "VM.Standard.A1.Flex").await;
        provider.fail("get_instance", 2).await;

        assert!(provider.get_instance(&acct, &seeded.instance_id).await.is_err());
        assert!(provider.get_instance(&acct, &seeded.instance_id).await.is_err());
        assert!(provider.get_instance(&acct, &seeded.instance_id).await.is_ok());
        assert_eq!(provider.call_count("get_instance").await, 3);
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let provider = MockProvider::new();
        let err = provider
            .get_boot_volume(&account(), "ocid1.bootvolume.nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_seeded_instance_details() {
        let provider = MockProvider::new();
        let acct = account();
        let seeded = provider.seed_instance(&acct.tenant_id, "VM.Standard.E2.1.Micro").await;

        let details = provider
            .get_instance_details(&acct, &seeded.instance_id)
            .await
            .unwrap();
        assert_eq!(details.boot_volume_size_gbs, Some(50));
        assert_eq!(details.public_ips.len(), 1);
        assert_eq!(details.vnics[0].id, seeded.vnic_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peak_in_flight_tracks_concurrent_calls() {
        let provider = MockProvider::new().with_call_delay(Duration::from_millis(100));
        let acct = account();

        let calls = (0..3).map(|_| provider.list_vcns(&acct, "c"));
        futures::future::join_all(calls).await;

        assert_eq!(provider.peak_in_flight(), 3);
    }
}
