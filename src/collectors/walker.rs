use crate::collectors::api::CertificateSet;
use crate::config::EndpointConfig;
use crate::health::{
    self, average_latency, bytes_to_tib, drs_status, ha_status, license_sizing, network_status,
    overcommitment, percent, round2, storage_health, vsan_health, Capacity, DrsReport,
    NetworkReport, Overcommitment, Severity, StorageReport, VsanReport,
};
use crate::inventory::{
    About, Cluster, Datacenter, Datastore, Group, Host, Inventory, Rule, SnapshotNode,
    VirtualMachine,
};
use crate::records::{
    AffinityRuleRecord, ClusterRecord, EndpointHealthRecord, EndpointStatus, HostRecord,
    InventoryBatch, RuleKind, SnapshotRecord, VirtualMachineRecord,
};
use crate::time::parse_rfc3339_unix;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Health readings of every cluster on one endpoint, folded into the single
/// endpoint summary after the walk.
#[derive(Default)]
struct EndpointRollup {
    vsan: Vec<VsanReport>,
    drs: Vec<DrsReport>,
    ha: Vec<health::HaStatus>,
    latency: Vec<f64>,
    overcommit: Vec<Overcommitment>,
    networks: Vec<(String, NetworkReport)>,
}

/// Walks one endpoint's inventory graph into normalized records. Always yields
/// exactly one connected health record for the endpoint.
pub fn walk(
    endpoint: &EndpointConfig,
    about: &About,
    certs: CertificateSet,
    inventory: &Inventory,
    now_unix: i64,
) -> InventoryBatch {
    let mut batch = InventoryBatch::default();
    let mut rollup = EndpointRollup::default();

    for datacenter in &inventory.datacenters {
        let datastores: HashMap<&str, &Datastore> = datacenter
            .datastores
            .iter()
            .map(|ds| (ds.name.as_str(), ds))
            .collect();
        for cluster in &datacenter.clusters {
            walk_cluster(endpoint, datacenter, cluster, &datastores, &mut batch, &mut rollup);
        }
    }

    let storage = storage_health(inventory.datacenters.iter().flat_map(|dc| &dc.datastores));
    batch
        .endpoint_health
        .push(summarize(endpoint, about, certs, storage, rollup, now_unix));
    batch
}

fn walk_cluster(
    endpoint: &EndpointConfig,
    datacenter: &Datacenter,
    cluster: &Cluster,
    datastores: &HashMap<&str, &Datastore>,
    batch: &mut InventoryBatch,
    rollup: &mut EndpointRollup,
) {
    batch
        .affinity_rules
        .extend(extract_rules(&endpoint.address, cluster));

    let mut used = Capacity::default();
    let mut physical = Capacity::default();
    let mut allocated = Capacity::default();
    let mut host_loads = Vec::with_capacity(cluster.hosts.len());
    let mut latency_samples = Vec::new();
    let mut cluster_stores: BTreeSet<&str> = cluster.datastores.iter().map(String::as_str).collect();

    for host in &cluster.hosts {
        let record = host_record(&endpoint.address, datacenter, cluster, host);
        host_loads.push(record.cpu_usage_percent);

        let per_core_mhz = host.hardware.cpu_mhz.unwrap_or(0) as f64;
        physical.add(Capacity {
            cpu_mhz: per_core_mhz * host.hardware.cpu_cores.unwrap_or(0) as f64,
            memory_bytes: host.hardware.memory_bytes.unwrap_or(0) as f64,
            storage_bytes: 0.0,
        });
        used.add(Capacity {
            cpu_mhz: host.usage.cpu_mhz.unwrap_or(0) as f64,
            memory_bytes: host.usage.memory_mb.unwrap_or(0) as f64 * MIB,
            storage_bytes: 0.0,
        });

        for name in &host.datastores {
            cluster_stores.insert(name.as_str());
            if let Some(ds) = datastores.get(name.as_str()) {
                latency_samples.extend(ds.max_read_latency_ms);
                latency_samples.extend(ds.max_write_latency_ms);
            }
        }

        rollup
            .networks
            .push((host.name.clone(), network_status(&host.network.pnics)));

        for vm in &host.vms {
            allocated.add(Capacity {
                cpu_mhz: vm.num_cpu.unwrap_or(0) as f64 * per_core_mhz,
                memory_bytes: vm.memory_mb.unwrap_or(0) as f64 * MIB,
                storage_bytes: vm
                    .disk_capacity_bytes
                    .iter()
                    .fold(0_u64, |total, bytes| total.saturating_add(*bytes))
                    as f64,
            });
            batch
                .virtual_machines
                .push(vm_record(&endpoint.address, datacenter, cluster, host, vm));
            collect_snapshots(&endpoint.address, vm, &vm.snapshots, &mut batch.snapshots);
        }

        batch.hosts.push(record);
    }

    let resolved: Vec<&Datastore> = cluster_stores
        .iter()
        .filter_map(|name| datastores.get(name).copied())
        .collect();
    physical.storage_bytes = resolved
        .iter()
        .map(|ds| ds.capacity_bytes.unwrap_or(0) as f64)
        .sum();

    let storage = storage_health(resolved.iter().copied());
    let (vsan_capacity, vsan_used) = resolved
        .iter()
        .filter(|ds| ds.is_vsan())
        .fold((0_u64, 0_u64), |(cap, used), ds| {
            (
                cap.saturating_add(ds.capacity_bytes.unwrap_or(0)),
                used.saturating_add(ds.used_bytes()),
            )
        });

    let vsan = vsan_health(
        cluster.vsan_enabled,
        cluster.hosts.iter().map(|h| h.vsan_enabled),
    );
    let drs = drs_status(cluster.drs.as_ref(), &host_loads);
    let ha = ha_status(cluster.ha.as_ref());
    let latency = average_latency(latency_samples);
    let sizing = license_sizing(
        endpoint.deploy_type,
        cluster.hosts.iter().map(|h| {
            (
                h.hardware.cpu_packages.unwrap_or(0),
                h.hardware.cpu_cores.unwrap_or(0),
            )
        }),
        vsan_capacity,
    );

    batch.clusters.push(ClusterRecord {
        endpoint: endpoint.address.clone(),
        datacenter: datacenter.name.clone(),
        name: cluster.name.clone(),
        deploy_type: endpoint.deploy_type,
        cpu_utilization: percent(used.cpu_mhz, physical.cpu_mhz),
        memory_utilization: percent(used.memory_bytes, physical.memory_bytes),
        storage_utilization: storage.capacity_used_percent,
        vsan_enabled: cluster.vsan_enabled.unwrap_or(false),
        vsan_capacity_tib: bytes_to_tib(vsan_capacity),
        vsan_used_tib: bytes_to_tib(vsan_used),
        vsan_free_tib: bytes_to_tib(vsan_capacity.saturating_sub(vsan_used)),
        vsan_utilization: percent(vsan_used as f64, vsan_capacity as f64),
        num_hosts: cluster.hosts.len() as u32,
        num_cpu_sockets: cluster
            .hosts
            .iter()
            .map(|h| h.hardware.cpu_packages.unwrap_or(0))
            .fold(0, u32::saturating_add),
        num_cpu_cores: cluster
            .hosts
            .iter()
            .map(|h| h.hardware.cpu_cores.unwrap_or(0))
            .fold(0, u32::saturating_add),
        foundation_license_core_count: sizing.foundation_license_core_count,
        entitled_vsan_license_tib: sizing.entitled_vsan_license_tib,
        required_vsan_tib_capacity: sizing.required_vsan_tib_capacity,
        vsan_license_tib_count: sizing.vsan_license_tib_count,
        required_vvf_compute_licenses: sizing.required_vvf_compute_licenses,
        required_vsan_addon_licenses: sizing.required_vsan_addon_licenses,
        storage_health_status: storage.status.as_str().to_string(),
        vsan_health_status: vsan.status.as_str().to_string(),
        drs_status: drs.status.as_str().to_string(),
        ha_status: ha.as_str().to_string(),
        avg_latency_ms: latency,
    });

    rollup.vsan.push(vsan);
    rollup.drs.push(drs);
    rollup.ha.push(ha);
    rollup.latency.push(latency);
    rollup.overcommit.push(overcommitment(allocated, physical));
}

fn host_record(endpoint: &str, datacenter: &Datacenter, cluster: &Cluster, host: &Host) -> HostRecord {
    let hw = &host.hardware;
    let cpu_total = hw.cpu_mhz.unwrap_or(0) as f64 * hw.cpu_cores.unwrap_or(0) as f64;
    let memory_total = hw.memory_bytes.unwrap_or(0) as f64;
    let first_vnic = host.network.vnics.first();

    HostRecord {
        endpoint: endpoint.to_string(),
        name: host.name.clone(),
        datacenter: datacenter.name.clone(),
        cluster: cluster.name.clone(),
        cpu_sockets: hw.cpu_packages.unwrap_or(0),
        cpu_cores: hw.cpu_cores.unwrap_or(0),
        cpu_usage_percent: percent(host.usage.cpu_mhz.unwrap_or(0) as f64, cpu_total),
        memory_gib: round2(memory_total / GIB),
        memory_usage_percent: percent(host.usage.memory_mb.unwrap_or(0) as f64 * MIB, memory_total),
        total_vms: host.vms.len() as u32,
        dns: host.network.dns_servers.join(", "),
        ntp: host.network.ntp_servers.join(", "),
        ip: first_vnic.and_then(|n| n.ip.clone()).unwrap_or_default(),
        mac: first_vnic.and_then(|n| n.mac.clone()).unwrap_or_default(),
        power_policy: host.power_policy.clone(),
        vendor: hw.vendor.clone(),
        model: hw.model.clone(),
        serial_number: hw.serial_number.clone(),
    }
}

fn vm_record(
    endpoint: &str,
    datacenter: &Datacenter,
    cluster: &Cluster,
    host: &Host,
    vm: &VirtualMachine,
) -> VirtualMachineRecord {
    let committed = vm.committed_bytes.unwrap_or(0);
    let uncommitted = vm.uncommitted_bytes.unwrap_or(0);

    VirtualMachineRecord {
        endpoint: endpoint.to_string(),
        name: vm.name.clone(),
        instance_uuid: vm.instance_uuid.clone(),
        os: vm.guest_full_name.clone(),
        site: datacenter.name.clone(),
        power_state: vm.power_state.clone(),
        created_unix: vm.created.as_deref().and_then(parse_rfc3339_unix),
        provisioned_gb: round2(committed.saturating_add(uncommitted) as f64 / GIB),
        used_gb: round2(committed as f64 / GIB),
        ip_addresses: vm
            .guest_ips
            .iter()
            .map(|ip| ip.trim())
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect(),
        nic_types: normalize_nic_types(&vm.nic_types),
        tools_status: vm.tools_status.clone(),
        hardware_version: vm.hardware_version.as_deref().and_then(parse_hardware_version),
        host: host.name.clone(),
        cluster: cluster.name.clone(),
        notes: vm
            .annotation
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty())
            .map(str::to_string),
    }
}

fn collect_snapshots(endpoint: &str, vm: &VirtualMachine, nodes: &[SnapshotNode], out: &mut Vec<SnapshotRecord>) {
    for node in nodes {
        out.push(SnapshotRecord {
            endpoint: endpoint.to_string(),
            vm_id: vm.instance_uuid.clone(),
            vm_name: vm.name.clone(),
            name: node.name.clone(),
            created_unix: node.created.as_deref().and_then(parse_rfc3339_unix),
        });
        collect_snapshots(endpoint, vm, &node.children, out);
    }
}

fn extract_rules(endpoint: &str, cluster: &Cluster) -> Vec<AffinityRuleRecord> {
    let mut vm_groups: HashMap<&str, &[String]> = HashMap::new();
    let mut host_groups: HashMap<&str, &[String]> = HashMap::new();
    for group in &cluster.groups {
        match group {
            Group::VmGroup { name, vms } => {
                vm_groups.insert(name.as_str(), vms.as_slice());
            }
            Group::HostGroup { name, hosts } => {
                host_groups.insert(name.as_str(), hosts.as_slice());
            }
            Group::Unsupported => {
                debug!(endpoint, cluster = %cluster.name, "skipping unsupported group kind");
            }
        }
    }
    let resolve = |groups: &HashMap<&str, &[String]>, name: &Option<String>| -> Vec<String> {
        name.as_deref()
            .and_then(|n| groups.get(n))
            .map(|members| members.to_vec())
            .unwrap_or_default()
    };

    cluster
        .rules
        .iter()
        .filter_map(|rule| {
            let (kind, vms, hosts) = match rule {
                Rule::VmHostAffinity {
                    vm_group,
                    host_group,
                    ..
                } => (
                    RuleKind::VmHostAffinity,
                    resolve(&vm_groups, vm_group),
                    resolve(&host_groups, host_group),
                ),
                Rule::VmAffinity { vms, .. } => (RuleKind::VmAffinity, vms.clone(), Vec::new()),
                Rule::VmAntiAffinity { vms, .. } => {
                    (RuleKind::VmAntiAffinity, vms.clone(), Vec::new())
                }
                Rule::Unsupported => {
                    debug!(endpoint, cluster = %cluster.name, "skipping unsupported rule kind");
                    return None;
                }
            };
            let common = rule.common()?;
            Some(AffinityRuleRecord {
                endpoint: endpoint.to_string(),
                name: common.name.clone(),
                kind,
                enabled: common.enabled.unwrap_or(false),
                cluster: cluster.name.clone(),
                vms,
                hosts,
                mandatory: common.mandatory.unwrap_or(false),
                description: common.description.clone(),
            })
        })
        .collect()
}

fn summarize(
    endpoint: &EndpointConfig,
    about: &About,
    certs: CertificateSet,
    storage: StorageReport,
    rollup: EndpointRollup,
    now_unix: i64,
) -> EndpointHealthRecord {
    let vsan = VsanReport {
        status: health::worst(rollup.vsan.iter().map(|r| r.status))
            .unwrap_or(VsanReport::unknown().status),
        disk_status: health::worst(rollup.vsan.iter().map(|r| r.disk_status))
            .unwrap_or(VsanReport::unknown().disk_status),
        network_status: health::worst(rollup.vsan.iter().map(|r| r.network_status))
            .unwrap_or(VsanReport::unknown().network_status),
    };
    let drs = DrsReport {
        status: health::worst(rollup.drs.iter().map(|r| r.status))
            .unwrap_or(DrsReport::unknown().status),
        balance: health::worst(rollup.drs.iter().map(|r| r.balance))
            .unwrap_or(DrsReport::unknown().balance),
    };
    let ha = health::worst(rollup.ha.iter().copied()).unwrap_or(health::HaStatus::Unknown);
    let network = worst_network(rollup.networks);
    let overcommit = rollup
        .overcommit
        .iter()
        .fold(Overcommitment::default(), |acc, oc| Overcommitment {
            cpu: acc.cpu.max(oc.cpu),
            memory: acc.memory.max(oc.memory),
            storage: acc.storage.max(oc.storage),
        });
    let latency = rollup.latency.iter().copied().fold(0.0_f64, f64::max);

    EndpointHealthRecord {
        endpoint: endpoint.address.clone(),
        deploy_type: endpoint.deploy_type,
        version: about.version.clone(),
        build: about.build.clone(),
        status: EndpointStatus::Connected,
        error_message: None,
        storage_health_status: storage.status.as_str().to_string(),
        disk_health_status: storage.disk_health.as_str().to_string(),
        storage_capacity_used: storage.capacity_used_percent,
        network_status: network.status.as_str().to_string(),
        network_details: network.details,
        vsan_health_status: vsan.status.as_str().to_string(),
        vsan_disk_status: vsan.disk_status.as_str().to_string(),
        vsan_network_status: vsan.network_status.as_str().to_string(),
        drs_status: drs.status.as_str().to_string(),
        drs_balance: drs.balance.as_str().to_string(),
        ha_status: ha.as_str().to_string(),
        avg_latency_ms: latency,
        cpu_overcommitment: overcommit.cpu,
        memory_overcommitment: overcommit.memory,
        storage_overcommitment: overcommit.storage,
        tls_certificate: certs.tls,
        signing_certificate: certs.signing,
        checked_at_unix: now_unix,
    }
}

fn worst_network(hosts: Vec<(String, NetworkReport)>) -> NetworkReport {
    let mut worst: Option<(String, NetworkReport)> = None;
    for (host, report) in hosts {
        let replace = match &worst {
            Some((_, current)) => report.status.severity() > current.status.severity(),
            None => true,
        };
        if replace {
            worst = Some((host, report));
        }
    }
    match worst {
        Some((host, report)) => NetworkReport {
            status: report.status,
            details: format!("{host}: {}", report.details),
        },
        None => network_status(&[]),
    }
}

fn parse_hardware_version(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("vmx-")
        .unwrap_or(trimmed)
        .parse()
        .ok()
}

fn normalize_nic_types(types: &[String]) -> Vec<String> {
    let set: BTreeSet<String> = types
        .iter()
        .map(|t| {
            let t = t.trim();
            let t = t.strip_prefix("Virtual").unwrap_or(t);
            t.strip_suffix("Card").unwrap_or(t).trim().to_string()
        })
        .filter(|t| !t.is_empty())
        .collect();
    set.into_iter().collect()
}
