//! vCloud Director API data types
//!
//! JSON shapes returned and accepted by the vCD REST API when requested with
//! `Accept: application/*+json`. Only the fields the provider reads or
//! writes are modelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// References and tasks
// ============================================================================

/// Generic link/reference to another entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// Asynchronous task handle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub href: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub major_error_code: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Success,
    Error,
    Aborted,
}

impl Task {
    pub fn state(&self) -> TaskStatus {
        match self.status.as_str() {
            "success" => TaskStatus::Success,
            "error" => TaskStatus::Error,
            "aborted" | "canceled" => TaskStatus::Aborted,
            _ => TaskStatus::Running,
        }
    }
}

// ============================================================================
// Tenancy
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vdc {
    pub id: String,
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub org_name: String,
}

// ============================================================================
// Catalogs
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub id: String,
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub org_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity: Option<Link>,
}

/// Catalog item as returned by the query service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItemRecord {
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub creation_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default)]
    pub metadata_entry: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub key: String,
    #[serde(default)]
    pub typed_value: MetadataValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataValue {
    #[serde(default)]
    pub value: String,
}

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata_entry
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.typed_value.value.as_str())
    }
}

/// Parameters for uploading a vApp template into a catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadVAppTemplateParams {
    pub name: String,
    pub description: String,
    pub manifest_required: bool,
}

/// Upload session opened by a catalog upload request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub item: CatalogItem,
    /// Where the OVA payload must be PUT
    pub upload_href: String,
    pub task: Task,
}

// ============================================================================
// vApps and VMs
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VApp {
    pub id: String,
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub children: VAppChildren,
    #[serde(default)]
    pub network_config_section: Option<NetworkConfigSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VAppChildren {
    #[serde(default)]
    pub vm: Vec<Vm>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub href: String,
    /// Identifier valid only while the VM is a child of its current vApp
    #[serde(rename = "vAppScopedLocalId", default)]
    pub vapp_scoped_local_id: String,
}

impl VApp {
    pub fn vms(&self) -> &[Vm] {
        &self.children.vm
    }
}

// ============================================================================
// vApp networks
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfigSection {
    #[serde(default)]
    pub network_config: Vec<VAppNetworkConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VAppNetworkConfig {
    pub network_name: String,
    #[serde(default)]
    pub link: Option<Link>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub configuration: NetworkConfiguration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fence_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<NetworkFeatures>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkFeatures {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firewall_service: Option<FirewallService>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nat_service: Option<NatService>,
}

/// A vApp network resolved out of the network config section
#[derive(Debug, Clone, Default)]
pub struct VAppNetwork {
    /// `urn:vcloud:network:<uuid>`
    pub id: String,
    pub name: String,
    pub configuration: NetworkConfiguration,
}

impl VAppNetwork {
    pub fn firewall_service(&self) -> Option<&FirewallService> {
        self.configuration
            .features
            .as_ref()
            .and_then(|f| f.firewall_service.as_ref())
    }

    pub fn nat_service(&self) -> Option<&NatService> {
        self.configuration
            .features
            .as_ref()
            .and_then(|f| f.nat_service.as_ref())
    }
}

// ============================================================================
// Firewall service
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallService {
    pub is_enabled: bool,
    #[serde(default)]
    pub default_action: String,
    #[serde(default)]
    pub log_default_action: bool,
    #[serde(default)]
    pub firewall_rule: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub is_enabled: bool,
    #[serde(default)]
    pub match_on_translate: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub protocols: Option<FirewallRuleProtocols>,
    #[serde(default)]
    pub destination_port_range: String,
    #[serde(default, rename = "destinationIp")]
    pub destination_ip: String,
    #[serde(default, rename = "destinationVm", skip_serializing_if = "Option::is_none")]
    pub destination_vm: Option<VmSelection>,
    #[serde(default)]
    pub source_port_range: String,
    #[serde(default, rename = "sourceIp")]
    pub source_ip: String,
    #[serde(default, rename = "sourceVm", skip_serializing_if = "Option::is_none")]
    pub source_vm: Option<VmSelection>,
    #[serde(default)]
    pub enable_logging: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallRuleProtocols {
    #[serde(default)]
    pub tcp: bool,
    #[serde(default)]
    pub udp: bool,
    #[serde(default)]
    pub icmp: bool,
    #[serde(default)]
    pub any: bool,
}

/// VM selector inside a firewall rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSelection {
    #[serde(rename = "vAppScopedVmId")]
    pub vapp_scoped_vm_id: String,
    #[serde(rename = "vmNicId")]
    pub vm_nic_id: i64,
    #[serde(default, rename = "ipType")]
    pub ip_type: String,
}

// ============================================================================
// NAT service
// ============================================================================

pub const NAT_TYPE_PORT_FORWARDING: &str = "portForwarding";
pub const NAT_TYPE_IP_TRANSLATION: &str = "ipTranslation";
pub const NAT_POLICY_ALLOW_TRAFFIC: &str = "allowTraffic";
pub const NAT_POLICY_ALLOW_TRAFFIC_IN: &str = "allowTrafficIn";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatService {
    pub is_enabled: bool,
    #[serde(default)]
    pub nat_type: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub nat_rule: Vec<NatRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, rename = "vmRule", skip_serializing_if = "Option::is_none")]
    pub vm_rule: Option<NatVmRule>,
    #[serde(
        default,
        rename = "oneToOneVmRule",
        skip_serializing_if = "Option::is_none"
    )]
    pub one_to_one_vm_rule: Option<NatOneToOneVmRule>,
}

/// Port forwarding rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatVmRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ip_address: Option<String>,
    #[serde(default)]
    pub external_port: i64,
    #[serde(rename = "vAppScopedVmId")]
    pub vapp_scoped_vm_id: String,
    #[serde(rename = "vmNicId")]
    pub vm_nic_id: i64,
    #[serde(default)]
    pub internal_port: i64,
    #[serde(default)]
    pub protocol: String,
}

/// IP translation rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatOneToOneVmRule {
    #[serde(default)]
    pub mapping_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ip_address: Option<String>,
    #[serde(rename = "vAppScopedVmId")]
    pub vapp_scoped_vm_id: String,
    #[serde(rename = "vmNicId")]
    pub vm_nic_id: i64,
}

// ============================================================================
// Query service
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    #[serde(default = "Vec::new")]
    pub record: Vec<T>,
    #[serde(default)]
    pub total: Option<i64>,
}

/// Minimal record shape shared by most query types
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub name: String,
    pub href: String,
    #[serde(default)]
    pub org_name: Option<String>,
}
