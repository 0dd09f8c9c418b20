use crate::config::DeploymentClass;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostRecord {
    pub endpoint: String,
    pub name: String,
    pub datacenter: String,
    pub cluster: String,
    pub cpu_sockets: u32,
    pub cpu_cores: u32,
    pub cpu_usage_percent: f64,
    pub memory_gib: f64,
    pub memory_usage_percent: f64,
    pub total_vms: u32,
    pub dns: String,
    pub ntp: String,
    pub ip: String,
    pub mac: String,
    pub power_policy: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRecord {
    pub endpoint: String,
    pub datacenter: String,
    pub name: String,
    pub deploy_type: DeploymentClass,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
    pub storage_utilization: f64,
    pub vsan_enabled: bool,
    pub vsan_capacity_tib: f64,
    pub vsan_used_tib: f64,
    pub vsan_free_tib: f64,
    pub vsan_utilization: f64,
    pub num_hosts: u32,
    pub num_cpu_sockets: u32,
    pub num_cpu_cores: u32,
    pub foundation_license_core_count: u32,
    pub entitled_vsan_license_tib: f64,
    pub required_vsan_tib_capacity: f64,
    pub vsan_license_tib_count: f64,
    pub required_vvf_compute_licenses: u32,
    pub required_vsan_addon_licenses: f64,
    pub storage_health_status: String,
    pub vsan_health_status: String,
    pub drs_status: String,
    pub ha_status: String,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualMachineRecord {
    pub endpoint: String,
    pub name: String,
    pub instance_uuid: Option<String>,
    pub os: Option<String>,
    pub site: String,
    pub power_state: Option<String>,
    pub created_unix: Option<i64>,
    pub provisioned_gb: f64,
    pub used_gb: f64,
    pub ip_addresses: Vec<String>,
    pub nic_types: Vec<String>,
    pub tools_status: Option<String>,
    pub hardware_version: Option<u32>,
    pub host: String,
    pub cluster: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotRecord {
    pub endpoint: String,
    pub vm_id: Option<String>,
    pub vm_name: String,
    pub name: String,
    pub created_unix: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Connected,
    Error,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Connected => "connected",
            EndpointStatus::Error => "error",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "connected" => Some(EndpointStatus::Connected),
            "error" => Some(EndpointStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CertificateSummary {
    pub expires_at_unix: Option<i64>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointHealthRecord {
    pub endpoint: String,
    pub deploy_type: DeploymentClass,
    pub version: Option<String>,
    pub build: Option<String>,
    pub status: EndpointStatus,
    pub error_message: Option<String>,
    pub storage_health_status: String,
    pub disk_health_status: String,
    pub storage_capacity_used: f64,
    pub network_status: String,
    pub network_details: String,
    pub vsan_health_status: String,
    pub vsan_disk_status: String,
    pub vsan_network_status: String,
    pub drs_status: String,
    pub drs_balance: String,
    pub ha_status: String,
    pub avg_latency_ms: f64,
    pub cpu_overcommitment: f64,
    pub memory_overcommitment: f64,
    pub storage_overcommitment: f64,
    pub tls_certificate: Option<CertificateSummary>,
    pub signing_certificate: Option<CertificateSummary>,
    pub checked_at_unix: i64,
}

impl EndpointHealthRecord {
    pub fn failed(
        endpoint: &str,
        deploy_type: DeploymentClass,
        message: String,
        now_unix: i64,
    ) -> Self {
        const UNKNOWN: &str = "Unknown";
        Self {
            endpoint: endpoint.to_string(),
            deploy_type,
            version: None,
            build: None,
            status: EndpointStatus::Error,
            error_message: Some(message),
            storage_health_status: UNKNOWN.to_string(),
            disk_health_status: UNKNOWN.to_string(),
            storage_capacity_used: 0.0,
            network_status: UNKNOWN.to_string(),
            network_details: "Error collecting data".to_string(),
            vsan_health_status: UNKNOWN.to_string(),
            vsan_disk_status: UNKNOWN.to_string(),
            vsan_network_status: UNKNOWN.to_string(),
            drs_status: UNKNOWN.to_string(),
            drs_balance: UNKNOWN.to_string(),
            ha_status: UNKNOWN.to_string(),
            avg_latency_ms: 0.0,
            cpu_overcommitment: 0.0,
            memory_overcommitment: 0.0,
            storage_overcommitment: 0.0,
            tls_certificate: None,
            signing_certificate: None,
            checked_at_unix: now_unix,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    VmHostAffinity,
    VmAffinity,
    VmAntiAffinity,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::VmHostAffinity => "vm-host-affinity",
            RuleKind::VmAffinity => "vm-affinity",
            RuleKind::VmAntiAffinity => "vm-anti-affinity",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "vm-host-affinity" => Some(RuleKind::VmHostAffinity),
            "vm-affinity" => Some(RuleKind::VmAffinity),
            "vm-anti-affinity" => Some(RuleKind::VmAntiAffinity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AffinityRuleRecord {
    pub endpoint: String,
    pub name: String,
    pub kind: RuleKind,
    pub enabled: bool,
    pub cluster: String,
    pub vms: Vec<String>,
    pub hosts: Vec<String>,
    pub mandatory: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatistics {
    pub run_count: i64,
    pub last_run_unix: i64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InventoryBatch {
    pub hosts: Vec<HostRecord>,
    pub clusters: Vec<ClusterRecord>,
    pub virtual_machines: Vec<VirtualMachineRecord>,
    pub snapshots: Vec<SnapshotRecord>,
    pub endpoint_health: Vec<EndpointHealthRecord>,
    pub affinity_rules: Vec<AffinityRuleRecord>,
}

impl InventoryBatch {
    pub fn extend(&mut self, other: InventoryBatch) {
        self.hosts.extend(other.hosts);
        self.clusters.extend(other.clusters);
        self.virtual_machines.extend(other.virtual_machines);
        self.snapshots.extend(other.snapshots);
        self.endpoint_health.extend(other.endpoint_health);
        self.affinity_rules.extend(other.affinity_rules);
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            hosts: self.hosts.len() as u64,
            clusters: self.clusters.len() as u64,
            virtual_machines: self.virtual_machines.len() as u64,
            snapshots: self.snapshots.len() as u64,
            endpoint_health: self.endpoint_health.len() as u64,
            affinity_rules: self.affinity_rules.len() as u64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub hosts: u64,
    pub clusters: u64,
    pub virtual_machines: u64,
    pub snapshots: u64,
    pub endpoint_health: u64,
    pub affinity_rules: u64,
}

impl TableCounts {
    pub fn by_kind(&self) -> [(&'static str, u64); 6] {
        [
            ("hosts", self.hosts),
            ("clusters", self.clusters),
            ("virtual_machines", self.virtual_machines),
            ("snapshots", self.snapshots),
            ("endpoint_health", self.endpoint_health),
            ("affinity_rules", self.affinity_rules),
        ]
    }
}
