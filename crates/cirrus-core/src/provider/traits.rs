// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud provider capability definitions.
//!
//! Defines the abstract interface the orchestration core uses to talk to the
//! remote compute, block storage, networking, load balancer, identity and
//! monitoring APIs on behalf of one account.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::store::Account;

/// Errors from provider calls.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// The remote resource does not exist (HTTP 404).
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// Resource kind (e.g. "boot volume").
        resource: &'static str,
        /// Resource identifier.
        id: String,
    },

    /// Any other failed request.
    #[error("{operation} failed: {message}")]
    Api {
        /// The provider operation that failed.
        operation: String,
        /// Error message returned by the provider.
        message: String,
    },
}

impl ProviderError {
    /// Build an API error for an operation.
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Build a not-found error.
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Whether the remote resource is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Coarse lifecycle state of a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Being created.
    Provisioning,
    /// Being created (backups, load balancers).
    Creating,
    /// Restoring from a backup.
    Restoring,
    /// Instance is booting.
    Starting,
    /// Instance is running.
    Running,
    /// Instance is shutting down.
    Stopping,
    /// Instance is stopped.
    Stopped,
    /// Volume, backup, gateway or route table is ready.
    Available,
    /// Attachment in progress.
    Attaching,
    /// Attachment complete.
    Attached,
    /// Detachment in progress.
    Detaching,
    /// Detachment complete.
    Detached,
    /// Load balancer is serving.
    Active,
    /// Resource is being reconfigured.
    Updating,
    /// Resource is being removed.
    Terminating,
    /// Resource has been removed.
    Terminated,
    /// Load balancer is being removed.
    Deleting,
    /// Load balancer has been removed.
    Deleted,
    /// Creation or update failed.
    Failed,
    /// Volume or backup is damaged.
    Faulty,
}

impl LifecycleState {
    /// Returns the provider's string representation of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "PROVISIONING",
            Self::Creating => "CREATING",
            Self::Restoring => "RESTORING",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Available => "AVAILABLE",
            Self::Attaching => "ATTACHING",
            Self::Attached => "ATTACHED",
            Self::Detaching => "DETACHING",
            Self::Detached => "DETACHED",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
            Self::Failed => "FAILED",
            Self::Faulty => "FAULTY",
        }
    }

    /// Whether the resource is gone or on its way out.
    pub fn is_removed(&self) -> bool {
        matches!(
            self,
            Self::Terminating | Self::Terminated | Self::Deleting | Self::Deleted
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compute instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Compartment holding the instance.
    pub compartment_id: String,
    /// Availability domain.
    pub availability_domain: String,
    /// Region the instance lives in.
    pub region: String,
    /// Shape name (e.g. `VM.Standard.E2.1.Micro`).
    pub shape: String,
    /// OCPU count.
    pub ocpus: f32,
    /// Memory in GB.
    pub memory_gbs: f32,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

/// Instance with its network and storage details, as cached per account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDetails {
    /// The instance itself.
    #[serde(flatten)]
    pub instance: Instance,
    /// Public addresses across all VNICs.
    pub public_ips: Vec<String>,
    /// Private addresses across all VNICs.
    pub private_ips: Vec<String>,
    /// IPv6 address of the primary VNIC, if any.
    pub ipv6: Option<String>,
    /// Boot volume size in GB.
    pub boot_volume_size_gbs: Option<i64>,
    /// Boot volume performance units per GB.
    pub boot_volume_vpus_per_gb: Option<i64>,
    /// Source image name.
    pub image_name: Option<String>,
    /// Attached VNICs.
    pub vnics: Vec<Vnic>,
}

/// Power actions on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceAction {
    /// Power on.
    Start,
    /// Hard power off.
    Stop,
    /// ACPI shutdown.
    SoftStop,
    /// Power cycle.
    Reset,
}

impl InstanceAction {
    /// Operation name used in logs and error messages.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Start => "start_instance",
            Self::Stop => "stop_instance",
            Self::SoftStop => "softstop_instance",
            Self::Reset => "reset_instance",
        }
    }
}

/// Parameters for launching an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchSpec {
    /// Target region.
    pub region: String,
    /// CPU architecture (`ARM` or `AMD`).
    pub architecture: String,
    /// Operating system family (e.g. `Ubuntu`).
    pub operating_system: String,
    /// OCPU count.
    pub ocpus: f32,
    /// Memory in GB.
    pub memory_gbs: f32,
    /// Boot volume size in GB.
    pub disk_gbs: i64,
    /// SSH public key installed on the instance.
    pub ssh_public_key: String,
    /// Explicit image; when absent the provider picks the newest matching image.
    pub image_id: Option<String>,
    /// Optional display name.
    pub display_name: Option<String>,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            region: String::new(),
            architecture: "ARM".to_string(),
            operating_system: "Ubuntu".to_string(),
            ocpus: 1.0,
            memory_gbs: 6.0,
            disk_gbs: 50,
            ssh_public_key: String::new(),
            image_id: None,
            display_name: None,
        }
    }
}

impl LaunchSpec {
    /// Replace unset or non-positive values with the defaults used for create tasks.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.ocpus <= 0.0 {
            self.ocpus = defaults.ocpus;
        }
        if self.memory_gbs <= 0.0 {
            self.memory_gbs = defaults.memory_gbs;
        }
        if self.disk_gbs <= 0 {
            self.disk_gbs = defaults.disk_gbs;
        }
        if self.architecture.trim().is_empty() {
            self.architecture = defaults.architecture;
        }
        if self.operating_system.trim().is_empty() {
            self.operating_system = defaults.operating_system;
        }
        self
    }
}

/// A boot volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootVolume {
    /// Boot volume OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Compartment.
    pub compartment_id: String,
    /// Availability domain.
    pub availability_domain: String,
    /// Size in GB.
    pub size_gbs: i64,
    /// Performance units per GB.
    pub vpus_per_gb: i64,
    /// Lifecycle state.
    pub state: LifecycleState,
}

/// Parameters for restoring a boot volume from a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBootVolume {
    /// Compartment.
    pub compartment_id: String,
    /// Availability domain (must match the instance).
    pub availability_domain: String,
    /// Display name.
    pub display_name: String,
    /// Size in GB.
    pub size_gbs: i64,
    /// Backup to restore from.
    pub source_backup_id: String,
}

/// Attachment of a boot volume to an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootVolumeAttachment {
    /// Attachment OCID.
    pub id: String,
    /// Instance.
    pub instance_id: String,
    /// Boot volume.
    pub boot_volume_id: String,
    /// Display name.
    pub display_name: String,
    /// Lifecycle state.
    pub state: LifecycleState,
}

/// Backup kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupType {
    /// Full copy of the volume.
    Full,
    /// Changes since the last backup.
    Incremental,
}

/// A boot volume backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootVolumeBackup {
    /// Backup OCID.
    pub id: String,
    /// Source boot volume.
    pub boot_volume_id: String,
    /// Display name.
    pub display_name: String,
    /// Backup kind.
    pub backup_type: BackupType,
    /// Lifecycle state.
    pub state: LifecycleState,
}

/// A virtual network interface card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vnic {
    /// VNIC OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Subnet the VNIC lives in.
    pub subnet_id: String,
    /// Public IPv4, if assigned.
    pub public_ip: Option<String>,
    /// Primary private IPv4.
    pub private_ip: Option<String>,
    /// IPv6 address, if assigned.
    pub ipv6: Option<String>,
    /// Route table override; `None` means the subnet's table.
    pub route_table_id: Option<String>,
    /// Whether source/destination checking is disabled.
    pub skip_source_dest_check: bool,
}

/// Fields to change on a VNIC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VnicUpdate {
    /// New route table.
    pub route_table_id: Option<String>,
    /// New source/destination check flag.
    pub skip_source_dest_check: Option<bool>,
}

/// A virtual cloud network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vcn {
    /// VCN OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Compartment.
    pub compartment_id: String,
    /// IPv4 CIDR block.
    pub cidr_block: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Subnets of the VCN.
    pub subnets: Vec<Subnet>,
}

/// A subnet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet OCID.
    pub id: String,
    /// Owning VCN.
    pub vcn_id: String,
    /// Display name.
    pub display_name: String,
    /// IPv4 CIDR block.
    pub cidr_block: String,
    /// Availability domain for AD-specific subnets.
    pub availability_domain: Option<String>,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Whether instances may get public addresses.
    pub is_public: bool,
}

/// A single route rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Destination CIDR.
    pub destination: String,
    /// Gateway the traffic is sent to.
    pub network_entity_id: String,
}

/// A route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTable {
    /// Route table OCID.
    pub id: String,
    /// Owning VCN.
    pub vcn_id: String,
    /// Display name.
    pub display_name: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Route rules.
    pub rules: Vec<RouteRule>,
}

/// Parameters for creating a route table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRouteTable {
    /// Compartment.
    pub compartment_id: String,
    /// Owning VCN.
    pub vcn_id: String,
    /// Display name.
    pub display_name: String,
    /// Initial rules.
    pub rules: Vec<RouteRule>,
}

/// A NAT gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatGateway {
    /// Gateway OCID.
    pub id: String,
    /// Owning VCN.
    pub vcn_id: String,
    /// Display name.
    pub display_name: String,
    /// Lifecycle state.
    pub state: LifecycleState,
}

/// A stateful security rule (ingress source or egress destination).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    /// Protocol number or `all`.
    pub protocol: String,
    /// Source (ingress) or destination (egress) CIDR.
    pub cidr: String,
}

/// A security list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityList {
    /// Security list OCID.
    pub id: String,
    /// Owning VCN.
    pub vcn_id: String,
    /// Display name.
    pub display_name: String,
    /// Ingress rules.
    pub ingress: Vec<SecurityRule>,
    /// Egress rules.
    pub egress: Vec<SecurityRule>,
}

/// Transport protocol of a load balancer listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerProtocol {
    /// TCP only.
    Tcp,
    /// UDP only.
    Udp,
    /// TCP and UDP on the same port.
    TcpAndUdp,
}

/// Load distribution policy of a backend set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalancingPolicy {
    /// Source and destination IP.
    TwoTuple,
    /// IPs plus protocol.
    ThreeTuple,
    /// IPs, ports and protocol.
    FiveTuple,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerSpec {
    /// Listener name.
    pub name: String,
    /// Backend set receiving the traffic.
    pub default_backend_set: String,
    /// Protocol.
    pub protocol: ListenerProtocol,
    /// Port; 0 means any port.
    pub port: u16,
}

/// A backend server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    /// Private address of the backend.
    pub ip_address: String,
    /// Instance OCID.
    pub target_id: String,
    /// Port; 0 means same as the listener.
    pub port: u16,
    /// Relative weight.
    pub weight: u32,
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckSpec {
    /// Protocol used by the probe.
    pub protocol: ListenerProtocol,
    /// Port probed on each backend.
    pub port: u16,
}

/// Backend set configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSetSpec {
    /// Backend set name.
    pub name: String,
    /// Distribution policy.
    pub policy: BalancingPolicy,
    /// Keep the client source address.
    pub preserve_source: bool,
    /// Keep routing when every backend is unhealthy.
    pub fail_open: bool,
    /// Health probe.
    pub health_check: HealthCheckSpec,
    /// Backends.
    pub backends: Vec<BackendSpec>,
}

/// Parameters for creating a network load balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Compartment.
    pub compartment_id: String,
    /// Display name.
    pub display_name: String,
    /// Subnet hosting the load balancer.
    pub subnet_id: String,
    /// Private-only load balancer.
    pub is_private: bool,
    /// The single listener.
    pub listener: ListenerSpec,
    /// The single backend set.
    pub backend_set: BackendSetSpec,
}

/// A network load balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// Load balancer OCID.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Compartment.
    pub compartment_id: String,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Assigned addresses (public and private).
    pub ip_addresses: Vec<String>,
}

/// Tenancy details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInfo {
    /// Tenancy OCID.
    pub id: String,
    /// Tenancy name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Home region key.
    pub home_region_key: String,
    /// Subscribed regions.
    pub regions: Vec<String>,
    /// Creation time formatted as `%Y-%m-%d %H:%M:%S`.
    pub create_time: Option<String>,
    /// Password expiry in days; 0 means never.
    pub password_expires_after: i32,
    /// Users of the tenancy.
    pub users: Vec<TenantUser>,
}

/// A tenancy user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantUser {
    /// User OCID.
    pub id: String,
    /// Login name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Lifecycle state.
    pub state: String,
    /// Whether the email has been verified.
    pub email_verified: bool,
    /// Whether MFA is enabled.
    pub mfa_activated: bool,
    /// Creation time.
    pub create_time: Option<String>,
    /// Last successful login.
    pub last_login_time: Option<String>,
}

/// A metric summarization request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricQuery {
    /// Compartment to query.
    pub compartment_id: String,
    /// Metric namespace.
    pub namespace: String,
    /// MQL query, e.g. `NetworksBytesIn[1m]{resourceId = "..."}.mean()`.
    pub query: String,
    /// Start of the window.
    pub start: DateTime<Utc>,
    /// End of the window.
    pub end: DateTime<Utc>,
}

/// One aggregated datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    /// Bucket timestamp.
    pub timestamp: DateTime<Utc>,
    /// Aggregated value.
    pub value: f64,
}

/// Trait for cloud providers.
///
/// Every call is a single request/response scoped to one account's
/// credentials. Providers never retry or poll; waiting for a mutation to
/// converge is the caller's job.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Provider identifier (e.g. "oci", "mock").
    fn provider_type(&self) -> &'static str;

    // Compute

    /// List instances in a compartment.
    async fn list_instances(
        &self,
        account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<Instance>>;

    /// Get one instance.
    async fn get_instance(&self, account: &Account, instance_id: &str) -> ProviderResult<Instance>;

    /// Get an instance with its network and storage details.
    async fn get_instance_details(
        &self,
        account: &Account,
        instance_id: &str,
    ) -> ProviderResult<InstanceDetails>;

    /// Issue a power action.
    async fn instance_action(
        &self,
        account: &Account,
        instance_id: &str,
        action: InstanceAction,
    ) -> ProviderResult<()>;

    /// Terminate an instance.
    async fn terminate_instance(
        &self,
        account: &Account,
        instance_id: &str,
        preserve_boot_volume: bool,
    ) -> ProviderResult<()>;

    /// Change the OCPU/memory configuration of a flexible shape.
    async fn update_instance_shape(
        &self,
        account: &Account,
        instance_id: &str,
        ocpus: f32,
        memory_gbs: f32,
    ) -> ProviderResult<()>;

    /// Launch a new instance.
    async fn launch_instance(&self, account: &Account, spec: &LaunchSpec)
    -> ProviderResult<Instance>;

    // Block storage

    /// List boot volumes in a compartment.
    async fn list_boot_volumes(
        &self,
        account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<BootVolume>>;

    /// Get one boot volume.
    async fn get_boot_volume(
        &self,
        account: &Account,
        boot_volume_id: &str,
    ) -> ProviderResult<BootVolume>;

    /// Create a boot volume from a backup.
    async fn create_boot_volume(
        &self,
        account: &Account,
        details: &CreateBootVolume,
    ) -> ProviderResult<BootVolume>;

    /// Delete a boot volume.
    async fn delete_boot_volume(&self, account: &Account, boot_volume_id: &str)
    -> ProviderResult<()>;

    /// Resize a boot volume or change its performance.
    async fn update_boot_volume(
        &self,
        account: &Account,
        boot_volume_id: &str,
        size_gbs: i64,
        vpus_per_gb: i64,
    ) -> ProviderResult<()>;

    /// List boot volume attachments of an instance.
    async fn list_boot_volume_attachments(
        &self,
        account: &Account,
        instance_id: &str,
    ) -> ProviderResult<Vec<BootVolumeAttachment>>;

    /// Get one boot volume attachment.
    async fn get_boot_volume_attachment(
        &self,
        account: &Account,
        attachment_id: &str,
    ) -> ProviderResult<BootVolumeAttachment>;

    /// Attach a boot volume to an instance.
    async fn attach_boot_volume(
        &self,
        account: &Account,
        instance_id: &str,
        boot_volume_id: &str,
        display_name: &str,
    ) -> ProviderResult<BootVolumeAttachment>;

    /// Detach a boot volume.
    async fn detach_boot_volume(&self, account: &Account, attachment_id: &str)
    -> ProviderResult<()>;

    /// Back up a boot volume.
    async fn create_boot_volume_backup(
        &self,
        account: &Account,
        boot_volume_id: &str,
        display_name: &str,
        backup_type: BackupType,
    ) -> ProviderResult<BootVolumeBackup>;

    /// Get one backup.
    async fn get_boot_volume_backup(
        &self,
        account: &Account,
        backup_id: &str,
    ) -> ProviderResult<BootVolumeBackup>;

    /// Delete a backup.
    async fn delete_boot_volume_backup(&self, account: &Account, backup_id: &str)
    -> ProviderResult<()>;

    // Networking

    /// List the VNICs attached to an instance, primary first.
    async fn list_instance_vnics(
        &self,
        account: &Account,
        instance_id: &str,
    ) -> ProviderResult<Vec<Vnic>>;

    /// Get one VNIC.
    async fn get_vnic(&self, account: &Account, vnic_id: &str) -> ProviderResult<Vnic>;

    /// Update a VNIC.
    async fn update_vnic(
        &self,
        account: &Account,
        vnic_id: &str,
        update: &VnicUpdate,
    ) -> ProviderResult<Vnic>;

    /// List VCNs (with their subnets) in a compartment.
    async fn list_vcns(&self, account: &Account, compartment_id: &str) -> ProviderResult<Vec<Vcn>>;

    /// Get one VCN.
    async fn get_vcn(&self, account: &Account, vcn_id: &str) -> ProviderResult<Vcn>;

    /// Get one subnet.
    async fn get_subnet(&self, account: &Account, subnet_id: &str) -> ProviderResult<Subnet>;

    /// List subnets of a VCN.
    async fn list_subnets(
        &self,
        account: &Account,
        compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<Subnet>>;

    /// List route tables of a VCN.
    async fn list_route_tables(
        &self,
        account: &Account,
        compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<RouteTable>>;

    /// Get one route table.
    async fn get_route_table(
        &self,
        account: &Account,
        route_table_id: &str,
    ) -> ProviderResult<RouteTable>;

    /// Create a route table.
    async fn create_route_table(
        &self,
        account: &Account,
        details: &CreateRouteTable,
    ) -> ProviderResult<RouteTable>;

    /// Replace the rules of a route table.
    async fn update_route_rules(
        &self,
        account: &Account,
        route_table_id: &str,
        rules: Vec<RouteRule>,
    ) -> ProviderResult<RouteTable>;

    /// Delete a route table.
    async fn delete_route_table(&self, account: &Account, route_table_id: &str)
    -> ProviderResult<()>;

    /// List NAT gateways of a VCN.
    async fn list_nat_gateways(
        &self,
        account: &Account,
        compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<NatGateway>>;

    /// Get one NAT gateway.
    async fn get_nat_gateway(&self, account: &Account, nat_gateway_id: &str)
    -> ProviderResult<NatGateway>;

    /// Create a NAT gateway.
    async fn create_nat_gateway(
        &self,
        account: &Account,
        compartment_id: &str,
        vcn_id: &str,
        display_name: &str,
    ) -> ProviderResult<NatGateway>;

    /// Delete a NAT gateway.
    async fn delete_nat_gateway(&self, account: &Account, nat_gateway_id: &str)
    -> ProviderResult<()>;

    /// List security lists of a VCN.
    async fn list_security_lists(
        &self,
        account: &Account,
        compartment_id: &str,
        vcn_id: &str,
    ) -> ProviderResult<Vec<SecurityList>>;

    /// Replace the rules of a security list.
    async fn update_security_list(
        &self,
        account: &Account,
        security_list_id: &str,
        ingress: Vec<SecurityRule>,
        egress: Vec<SecurityRule>,
    ) -> ProviderResult<()>;

    // Network load balancer

    /// List load balancers in a compartment.
    async fn list_load_balancers(
        &self,
        account: &Account,
        compartment_id: &str,
    ) -> ProviderResult<Vec<LoadBalancer>>;

    /// Get one load balancer.
    async fn get_load_balancer(
        &self,
        account: &Account,
        load_balancer_id: &str,
    ) -> ProviderResult<LoadBalancer>;

    /// Create a load balancer with one listener and one backend set.
    async fn create_load_balancer(
        &self,
        account: &Account,
        spec: &LoadBalancerSpec,
    ) -> ProviderResult<LoadBalancer>;

    /// Delete a load balancer.
    async fn delete_load_balancer(
        &self,
        account: &Account,
        load_balancer_id: &str,
    ) -> ProviderResult<()>;

    // Identity

    /// Get tenancy details, including users and password policy.
    async fn get_tenant_info(&self, account: &Account) -> ProviderResult<TenantInfo>;

    /// List users of the tenancy.
    async fn list_users(&self, account: &Account) -> ProviderResult<Vec<TenantUser>>;

    /// Delete a user.
    async fn delete_user(&self, account: &Account, user_id: &str) -> ProviderResult<()>;

    /// Reset a user's console password; returns the one-time password.
    async fn reset_user_password(&self, account: &Account, user_id: &str)
    -> ProviderResult<String>;

    /// Remove every MFA device of a user.
    async fn delete_user_mfa_devices(&self, account: &Account, user_id: &str)
    -> ProviderResult<()>;

    /// Remove every API key of a user.
    async fn delete_user_api_keys(&self, account: &Account, user_id: &str) -> ProviderResult<()>;

    /// Get the password expiry policy in days (0 = never).
    async fn get_password_expiry_days(&self, account: &Account) -> ProviderResult<i32>;

    /// Set the password expiry policy in days (0 = never).
    async fn set_password_expiry_days(&self, account: &Account, days: i32) -> ProviderResult<()>;

    // Monitoring

    /// Run a metric summarization query.
    async fn summarize_metrics(
        &self,
        account: &Account,
        query: &MetricQuery,
    ) -> ProviderResult<Vec<MetricPoint>>;
}
