use serde::Deserialize;

// Raw object graph as returned by a management endpoint. Every leaf is optional:
// endpoints differ by version and a missing field must degrade to a sentinel
// further down, never fail deserialization of the whole tree.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub datacenters: Vec<Datacenter>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct About {
    pub version: Option<String>,
    pub build: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Datacenter {
    pub name: String,
    #[serde(default)]
    pub datastores: Vec<Datastore>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Datastore {
    pub name: String,
    pub kind: Option<String>,
    pub capacity_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub accessible: Option<bool>,
    pub max_read_latency_ms: Option<f64>,
    pub max_write_latency_ms: Option<f64>,
}

impl Datastore {
    pub fn is_vsan(&self) -> bool {
        self.kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("vsan"))
            .unwrap_or(false)
    }

    pub fn used_bytes(&self) -> u64 {
        let capacity = self.capacity_bytes.unwrap_or(0);
        capacity.saturating_sub(self.free_bytes.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub vsan_enabled: Option<bool>,
    pub drs: Option<DrsConfig>,
    pub ha: Option<HaConfig>,
    #[serde(default)]
    pub datastores: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DrsConfig {
    pub enabled: Option<bool>,
    pub migration_threshold: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HaConfig {
    pub enabled: Option<bool>,
    pub host_monitoring: Option<bool>,
    pub admission_control: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub hardware: HostHardware,
    #[serde(default)]
    pub usage: HostUsage,
    #[serde(default)]
    pub network: HostNetwork,
    pub power_policy: Option<String>,
    pub vsan_enabled: Option<bool>,
    #[serde(default)]
    pub datastores: Vec<String>,
    #[serde(default)]
    pub vms: Vec<VirtualMachine>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostHardware {
    pub cpu_mhz: Option<u64>,
    pub cpu_cores: Option<u32>,
    pub cpu_packages: Option<u32>,
    pub memory_bytes: Option<u64>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostUsage {
    pub cpu_mhz: Option<u64>,
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostNetwork {
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub ntp_servers: Vec<String>,
    #[serde(default)]
    pub vnics: Vec<VirtualNic>,
    #[serde(default)]
    pub pnics: Vec<PhysicalNic>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualNic {
    pub ip: Option<String>,
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhysicalNic {
    pub device: String,
    pub link_speed_mbps: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    pub instance_uuid: Option<String>,
    pub guest_full_name: Option<String>,
    pub power_state: Option<String>,
    pub created: Option<String>,
    pub committed_bytes: Option<u64>,
    pub uncommitted_bytes: Option<u64>,
    #[serde(default)]
    pub guest_ips: Vec<String>,
    #[serde(default)]
    pub nic_types: Vec<String>,
    pub tools_status: Option<String>,
    pub hardware_version: Option<String>,
    pub annotation: Option<String>,
    pub num_cpu: Option<u32>,
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub disk_capacity_bytes: Vec<u64>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotNode {
    pub name: String,
    pub created: Option<String>,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    VmHostAffinity {
        #[serde(flatten)]
        common: RuleCommon,
        vm_group: Option<String>,
        host_group: Option<String>,
    },
    VmAffinity {
        #[serde(flatten)]
        common: RuleCommon,
        #[serde(default)]
        vms: Vec<String>,
    },
    VmAntiAffinity {
        #[serde(flatten)]
        common: RuleCommon,
        #[serde(default)]
        vms: Vec<String>,
    },
    /// Any rule kind not modelled above, such as VM-to-VM dependency rules.
    #[serde(other)]
    Unsupported,
}

impl Rule {
    pub fn common(&self) -> Option<&RuleCommon> {
        match self {
            Rule::VmHostAffinity { common, .. }
            | Rule::VmAffinity { common, .. }
            | Rule::VmAntiAffinity { common, .. } => Some(common),
            Rule::Unsupported => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleCommon {
    pub name: String,
    pub enabled: Option<bool>,
    pub mandatory: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Group {
    VmGroup {
        name: String,
        #[serde(default)]
        vms: Vec<String>,
    },
    HostGroup {
        name: String,
        #[serde(default)]
        hosts: Vec<String>,
    },
    #[serde(other)]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_tree_deserializes() {
        let json = r#"{
            "datacenters": [{
                "name": "dc1",
                "clusters": [{
                    "name": "c1",
                    "hosts": [{"name": "esx1", "vms": [{"name": "vm1"}]}],
                    "rules": [
                        {"kind": "vm_anti_affinity", "name": "spread", "vms": ["vm1", "vm2"]},
                        {"kind": "vm_host_affinity", "name": "pin", "vm_group": "g1", "host_group": "h1"}
                    ],
                    "groups": [{"kind": "vm_group", "name": "g1", "vms": ["vm1"]}]
                }]
            }]
        }"#;
        let inv: Inventory = serde_json::from_str(json).expect("разбор дерева");
        let cluster = &inv.datacenters[0].clusters[0];
        assert_eq!(cluster.hosts[0].vms[0].name, "vm1");
        assert!(cluster.hosts[0].hardware.cpu_mhz.is_none());
        assert_eq!(cluster.rules.len(), 2);
        assert_eq!(cluster.rules[0].common().map(|c| c.name.as_str()), Some("spread"));
        assert!(matches!(cluster.groups[0], Group::VmGroup { .. }));
    }

    #[test]
    fn datastore_used_never_underflows() {
        let ds = Datastore {
            name: "ds".to_string(),
            capacity_bytes: Some(10),
            free_bytes: Some(20),
            ..Datastore::default()
        };
        assert_eq!(ds.used_bytes(), 0);
    }
}
