use crate::config::DeploymentClass;
use crate::inventory::{Datastore, DrsConfig, HaConfig, PhysicalNic};

// Derived health indicators. Every function here is total: missing input yields
// an `Unknown`/0 sentinel so a single odd cluster never aborts the walk.

const DATASTORE_WARNING_RATIO: f64 = 0.9;
const TIB: f64 = 1024.0 * 1024.0 * 1024.0 * 1024.0;

pub trait Severity: Copy {
    fn severity(&self) -> u8;
    fn as_str(&self) -> &'static str;
}

/// Most severe value of a sequence, first occurrence wins on ties.
pub fn worst<T: Severity>(items: impl IntoIterator<Item = T>) -> Option<T> {
    items.into_iter().fold(None, |acc, item| match acc {
        Some(current) if current.severity() >= item.severity() => Some(current),
        _ => Some(item),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageHealth {
    Healthy,
    Warning,
    Critical,
}

impl Severity for StorageHealth {
    fn severity(&self) -> u8 {
        match self {
            StorageHealth::Healthy => 0,
            StorageHealth::Warning => 1,
            StorageHealth::Critical => 2,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            StorageHealth::Healthy => "Healthy",
            StorageHealth::Warning => "Warning",
            StorageHealth::Critical => "Critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    Normal,
    Warning,
    Critical,
    NotApplicable,
    Unknown,
}

impl Severity for ComponentStatus {
    fn severity(&self) -> u8 {
        match self {
            ComponentStatus::NotApplicable => 0,
            ComponentStatus::Normal => 1,
            ComponentStatus::Unknown => 2,
            ComponentStatus::Warning => 3,
            ComponentStatus::Critical => 4,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Normal => "Normal",
            ComponentStatus::Warning => "Warning",
            ComponentStatus::Critical => "Critical",
            ComponentStatus::NotApplicable => "N/A",
            ComponentStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsanHealth {
    Disabled,
    Healthy,
    Warning,
    Unknown,
}

impl Severity for VsanHealth {
    fn severity(&self) -> u8 {
        match self {
            VsanHealth::Disabled => 0,
            VsanHealth::Healthy => 1,
            VsanHealth::Unknown => 2,
            VsanHealth::Warning => 3,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            VsanHealth::Disabled => "Disabled",
            VsanHealth::Healthy => "Healthy",
            VsanHealth::Warning => "Warning",
            VsanHealth::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrsStatus {
    Conservative,
    Active,
    Aggressive,
    Disabled,
    Unknown,
}

impl Severity for DrsStatus {
    fn severity(&self) -> u8 {
        match self {
            DrsStatus::Conservative | DrsStatus::Active | DrsStatus::Aggressive => 0,
            DrsStatus::Unknown => 1,
            DrsStatus::Disabled => 2,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DrsStatus::Conservative => "Conservative",
            DrsStatus::Active => "Active",
            DrsStatus::Aggressive => "Aggressive",
            DrsStatus::Disabled => "Disabled",
            DrsStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrsBalance {
    NotApplicable,
    Optimal,
    Good,
    Fair,
    Poor,
    Unknown,
}

impl Severity for DrsBalance {
    fn severity(&self) -> u8 {
        match self {
            DrsBalance::NotApplicable => 0,
            DrsBalance::Optimal => 1,
            DrsBalance::Good => 2,
            DrsBalance::Unknown => 3,
            DrsBalance::Fair => 4,
            DrsBalance::Poor => 5,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            DrsBalance::NotApplicable => "N/A",
            DrsBalance::Optimal => "Optimal",
            DrsBalance::Good => "Good",
            DrsBalance::Fair => "Fair",
            DrsBalance::Poor => "Poor",
            DrsBalance::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaStatus {
    FullyEnabled,
    EnabledNoAdmissionControl,
    PartiallyEnabled,
    Disabled,
    Unknown,
}

impl Severity for HaStatus {
    fn severity(&self) -> u8 {
        match self {
            HaStatus::FullyEnabled => 0,
            HaStatus::EnabledNoAdmissionControl => 1,
            HaStatus::PartiallyEnabled => 2,
            HaStatus::Unknown => 3,
            HaStatus::Disabled => 4,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            HaStatus::FullyEnabled => "Fully Enabled",
            HaStatus::EnabledNoAdmissionControl => "Enabled (No Admission Control)",
            HaStatus::PartiallyEnabled => "Partially Enabled",
            HaStatus::Disabled => "Disabled",
            HaStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageReport {
    pub status: StorageHealth,
    pub disk_health: ComponentStatus,
    pub capacity_used_percent: f64,
}

pub fn storage_health<'a>(datastores: impl IntoIterator<Item = &'a Datastore>) -> StorageReport {
    let mut total_capacity = 0_u64;
    let mut total_used = 0_u64;
    let mut inaccessible = false;
    let mut over_threshold = false;

    for ds in datastores {
        let capacity = ds.capacity_bytes.unwrap_or(0);
        let used = ds.used_bytes();
        total_capacity = total_capacity.saturating_add(capacity);
        total_used = total_used.saturating_add(used);

        if ds.accessible == Some(false) {
            inaccessible = true;
        } else if capacity > 0 && used as f64 / capacity as f64 > DATASTORE_WARNING_RATIO {
            over_threshold = true;
        }
    }

    let (status, disk_health) = if inaccessible {
        (StorageHealth::Critical, ComponentStatus::Critical)
    } else if over_threshold {
        (StorageHealth::Warning, ComponentStatus::Warning)
    } else {
        (StorageHealth::Healthy, ComponentStatus::Normal)
    };

    StorageReport {
        status,
        disk_health,
        capacity_used_percent: percent(total_used as f64, total_capacity as f64),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VsanReport {
    pub status: VsanHealth,
    pub disk_status: ComponentStatus,
    pub network_status: ComponentStatus,
}

impl VsanReport {
    pub fn unknown() -> Self {
        Self {
            status: VsanHealth::Unknown,
            disk_status: ComponentStatus::Unknown,
            network_status: ComponentStatus::Unknown,
        }
    }
}

pub fn vsan_health(
    cluster_enabled: Option<bool>,
    host_enabled: impl IntoIterator<Item = Option<bool>>,
) -> VsanReport {
    match cluster_enabled {
        None => VsanReport::unknown(),
        Some(false) => VsanReport {
            status: VsanHealth::Disabled,
            disk_status: ComponentStatus::NotApplicable,
            network_status: ComponentStatus::NotApplicable,
        },
        Some(true) => {
            let disabled_hosts = host_enabled
                .into_iter()
                .filter(|flag| *flag == Some(false))
                .count();
            if disabled_hosts > 0 {
                VsanReport {
                    status: VsanHealth::Warning,
                    disk_status: ComponentStatus::Normal,
                    network_status: ComponentStatus::Warning,
                }
            } else {
                VsanReport {
                    status: VsanHealth::Healthy,
                    disk_status: ComponentStatus::Normal,
                    network_status: ComponentStatus::Normal,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrsReport {
    pub status: DrsStatus,
    pub balance: DrsBalance,
}

impl DrsReport {
    pub fn unknown() -> Self {
        Self {
            status: DrsStatus::Unknown,
            balance: DrsBalance::Unknown,
        }
    }
}

pub fn drs_status(config: Option<&DrsConfig>, host_cpu_loads: &[f64]) -> DrsReport {
    let Some(config) = config else {
        return DrsReport::unknown();
    };
    match config.enabled {
        None => DrsReport::unknown(),
        Some(false) => DrsReport {
            status: DrsStatus::Disabled,
            balance: DrsBalance::NotApplicable,
        },
        Some(true) => {
            let status = match config.migration_threshold {
                Some(1) => DrsStatus::Conservative,
                Some(5) => DrsStatus::Aggressive,
                _ => DrsStatus::Active,
            };
            let balance = match coefficient_of_variation(host_cpu_loads) {
                None => DrsBalance::Unknown,
                Some(cv) if cv < 10.0 => DrsBalance::Optimal,
                Some(cv) if cv < 20.0 => DrsBalance::Good,
                Some(cv) if cv < 30.0 => DrsBalance::Fair,
                Some(_) => DrsBalance::Poor,
            };
            DrsReport { status, balance }
        }
    }
}

/// Population standard deviation over mean, in percent. An all-idle cluster is
/// perfectly balanced.
pub fn coefficient_of_variation(samples: &[f64]) -> Option<f64> {
    let values: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return Some(0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some(variance.sqrt() / mean * 100.0)
}

pub fn ha_status(config: Option<&HaConfig>) -> HaStatus {
    let Some(config) = config else {
        return HaStatus::Unknown;
    };
    match config.enabled {
        None => HaStatus::Unknown,
        Some(false) => HaStatus::Disabled,
        Some(true) => {
            if config.host_monitoring == Some(false) {
                HaStatus::PartiallyEnabled
            } else if config.admission_control == Some(true) {
                HaStatus::FullyEnabled
            } else {
                HaStatus::EnabledNoAdmissionControl
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Capacity {
    pub cpu_mhz: f64,
    pub memory_bytes: f64,
    pub storage_bytes: f64,
}

impl Capacity {
    pub fn add(&mut self, other: Capacity) {
        self.cpu_mhz += other.cpu_mhz;
        self.memory_bytes += other.memory_bytes;
        self.storage_bytes += other.storage_bytes;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overcommitment {
    pub cpu: f64,
    pub memory: f64,
    pub storage: f64,
}

pub fn overcommitment(allocated: Capacity, physical: Capacity) -> Overcommitment {
    Overcommitment {
        cpu: percent(allocated.cpu_mhz, physical.cpu_mhz),
        memory: percent(allocated.memory_bytes, physical.memory_bytes),
        storage: percent(allocated.storage_bytes, physical.storage_bytes),
    }
}

pub fn average_latency(samples: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = samples
        .into_iter()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .fold((0.0_f64, 0_usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        return 0.0;
    }
    round2(sum / count as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkReport {
    pub status: ComponentStatus,
    pub details: String,
}

pub fn network_status(pnics: &[PhysicalNic]) -> NetworkReport {
    if pnics.is_empty() {
        return NetworkReport {
            status: ComponentStatus::Unknown,
            details: "No physical NICs reported".to_string(),
        };
    }
    let down: Vec<&str> = pnics
        .iter()
        .filter(|nic| nic.link_speed_mbps.unwrap_or(0) == 0)
        .map(|nic| nic.device.as_str())
        .collect();
    let up = pnics.len() - down.len();
    if down.is_empty() {
        NetworkReport {
            status: ComponentStatus::Normal,
            details: format!("All {up} links up"),
        }
    } else {
        NetworkReport {
            status: if up == 0 {
                ComponentStatus::Critical
            } else {
                ComponentStatus::Warning
            },
            details: format!(
                "{up} NICs up, {} NICs down ({})",
                down.len(),
                down.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LicenseSizing {
    pub foundation_license_core_count: u32,
    pub entitled_vsan_license_tib: f64,
    pub required_vsan_tib_capacity: f64,
    pub vsan_license_tib_count: f64,
    pub required_vvf_compute_licenses: u32,
    pub required_vsan_addon_licenses: f64,
}

/// Subscription sizing: every socket is licensed for at least 16 cores, vSAN
/// entitlement per licensed core depends on the deployment class.
pub fn license_sizing(
    class: DeploymentClass,
    hosts: impl IntoIterator<Item = (u32, u32)>,
    vsan_capacity_bytes: u64,
) -> LicenseSizing {
    const MIN_CORES_PER_SOCKET: u32 = 16;

    let licensed_cores: u32 = hosts
        .into_iter()
        .map(|(sockets, cores)| {
            if sockets == 0 {
                return 0;
            }
            let per_socket = cores.div_ceil(sockets).max(MIN_CORES_PER_SOCKET);
            per_socket.saturating_mul(sockets)
        })
        .fold(0, u32::saturating_add);

    let per_core_tib = match class {
        DeploymentClass::Vcf => 1.0,
        DeploymentClass::Vvf => 0.25,
    };
    let entitled = licensed_cores as f64 * per_core_tib;
    let required = vsan_capacity_bytes as f64 / TIB;

    LicenseSizing {
        foundation_license_core_count: licensed_cores,
        entitled_vsan_license_tib: round2(entitled),
        required_vsan_tib_capacity: round2(required),
        vsan_license_tib_count: required.ceil(),
        required_vvf_compute_licenses: match class {
            DeploymentClass::Vvf => licensed_cores,
            DeploymentClass::Vcf => 0,
        },
        required_vsan_addon_licenses: round2((required - entitled).max(0.0).ceil()),
    }
}

/// `used / total * 100`, rounded to two decimals; 0 for an empty or invalid total.
pub fn percent(used: f64, total: f64) -> f64 {
    if !(total.is_finite() && total > 0.0) || !used.is_finite() {
        return 0.0;
    }
    round2((used / total * 100.0).max(0.0))
}

pub fn bytes_to_tib(bytes: u64) -> f64 {
    round2(bytes as f64 / TIB)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datastore(name: &str, capacity: u64, free: u64, accessible: bool) -> Datastore {
        Datastore {
            name: name.to_string(),
            capacity_bytes: Some(capacity),
            free_bytes: Some(free),
            accessible: Some(accessible),
            ..Datastore::default()
        }
    }

    #[test]
    fn datastore_at_95_percent_is_warning() {
        let stores = [datastore("ds1", 100, 5, true), datastore("ds2", 100, 80, true)];
        let report = storage_health(&stores);
        assert_eq!(report.status, StorageHealth::Warning);
        assert_eq!(report.disk_health, ComponentStatus::Warning);
        assert_eq!(report.capacity_used_percent, 57.5);
    }

    #[test]
    fn inaccessible_datastore_is_critical() {
        let stores = [datastore("ds1", 100, 1, true), datastore("ds2", 100, 90, false)];
        assert_eq!(storage_health(&stores).status, StorageHealth::Critical);
    }

    #[test]
    fn exactly_ninety_percent_is_healthy() {
        let stores = [datastore("ds1", 100, 10, true)];
        assert_eq!(storage_health(&stores).status, StorageHealth::Healthy);
    }

    #[test]
    fn zero_capacity_datastore_is_tolerated() {
        let stores = [Datastore {
            name: "empty".to_string(),
            ..Datastore::default()
        }];
        let report = storage_health(&stores);
        assert_eq!(report.status, StorageHealth::Healthy);
        assert_eq!(report.capacity_used_percent, 0.0);
    }

    #[test]
    fn vsan_disabled_reports_not_applicable() {
        let report = vsan_health(Some(false), [Some(true)]);
        assert_eq!(report.status.as_str(), "Disabled");
        assert_eq!(report.disk_status.as_str(), "N/A");
        assert_eq!(report.network_status.as_str(), "N/A");
    }

    #[test]
    fn vsan_host_disabled_is_warning() {
        let report = vsan_health(Some(true), [Some(true), Some(false), None]);
        assert_eq!(report.status, VsanHealth::Warning);
        assert_eq!(report.network_status, ComponentStatus::Warning);
        assert_eq!(vsan_health(Some(true), [Some(true)]).status, VsanHealth::Healthy);
        assert_eq!(vsan_health(None, []).status, VsanHealth::Unknown);
    }

    #[test]
    fn drs_threshold_tiers_and_balance() {
        let cfg = |threshold| DrsConfig {
            enabled: Some(true),
            migration_threshold: Some(threshold),
        };
        assert_eq!(drs_status(Some(&cfg(1)), &[50.0]).status, DrsStatus::Conservative);
        assert_eq!(drs_status(Some(&cfg(5)), &[50.0]).status, DrsStatus::Aggressive);
        assert_eq!(drs_status(Some(&cfg(3)), &[50.0]).status, DrsStatus::Active);

        assert_eq!(drs_status(Some(&cfg(3)), &[50.0, 50.0]).balance, DrsBalance::Optimal);
        // mean 50, stddev 7.5 -> 15%
        assert_eq!(drs_status(Some(&cfg(3)), &[42.5, 57.5]).balance, DrsBalance::Good);
        // mean 50, stddev 12.5 -> 25%
        assert_eq!(drs_status(Some(&cfg(3)), &[37.5, 62.5]).balance, DrsBalance::Fair);
        assert_eq!(drs_status(Some(&cfg(3)), &[10.0, 90.0]).balance, DrsBalance::Poor);
        assert_eq!(drs_status(Some(&cfg(3)), &[]).balance, DrsBalance::Unknown);
    }

    #[test]
    fn drs_missing_or_disabled() {
        assert_eq!(drs_status(None, &[1.0]), DrsReport::unknown());
        let disabled = DrsConfig {
            enabled: Some(false),
            migration_threshold: None,
        };
        let report = drs_status(Some(&disabled), &[1.0]);
        assert_eq!(report.status, DrsStatus::Disabled);
        assert_eq!(report.balance.as_str(), "N/A");
    }

    #[test]
    fn ha_ladder() {
        let cfg = |enabled, monitoring, admission| HaConfig {
            enabled,
            host_monitoring: monitoring,
            admission_control: admission,
        };
        assert_eq!(ha_status(None), HaStatus::Unknown);
        assert_eq!(ha_status(Some(&cfg(Some(false), None, None))), HaStatus::Disabled);
        assert_eq!(
            ha_status(Some(&cfg(Some(true), Some(false), Some(true)))),
            HaStatus::PartiallyEnabled
        );
        assert_eq!(
            ha_status(Some(&cfg(Some(true), Some(true), Some(false)))),
            HaStatus::EnabledNoAdmissionControl
        );
        assert_eq!(
            ha_status(Some(&cfg(Some(true), Some(true), Some(true)))).as_str(),
            "Fully Enabled"
        );
    }

    #[test]
    fn overcommitment_clamps_each_dimension() {
        let allocated = Capacity {
            cpu_mhz: 3000.0,
            memory_bytes: 512.0,
            storage_bytes: 10.0,
        };
        let physical = Capacity {
            cpu_mhz: 2000.0,
            memory_bytes: 0.0,
            storage_bytes: 40.0,
        };
        let oc = overcommitment(allocated, physical);
        assert_eq!(oc.cpu, 150.0);
        assert_eq!(oc.memory, 0.0);
        assert_eq!(oc.storage, 25.0);
    }

    #[test]
    fn latency_mean_and_empty() {
        assert_eq!(average_latency([1.0, 2.0, 4.0, 5.0]), 3.0);
        assert_eq!(average_latency(std::iter::empty()), 0.0);
        assert_eq!(average_latency([f64::NAN, 2.0]), 2.0);
    }

    #[test]
    fn percent_never_divides_by_zero() {
        assert_eq!(percent(10.0, 0.0), 0.0);
        assert_eq!(percent(-5.0, 10.0), 0.0);
        assert_eq!(percent(1.0, 3.0), 33.33);
    }

    #[test]
    fn network_link_states() {
        let nic = |device: &str, speed| PhysicalNic {
            device: device.to_string(),
            link_speed_mbps: speed,
        };
        let all_up = network_status(&[nic("vmnic0", Some(10000)), nic("vmnic1", Some(10000))]);
        assert_eq!(all_up.status, ComponentStatus::Normal);
        let partial = network_status(&[nic("vmnic0", Some(10000)), nic("vmnic1", None)]);
        assert_eq!(partial.status, ComponentStatus::Warning);
        assert_eq!(partial.details, "1 NICs up, 1 NICs down (vmnic1)");
        let down = network_status(&[nic("vmnic0", None), nic("vmnic1", Some(0))]);
        assert_eq!(down.status, ComponentStatus::Critical);
        assert_eq!(down.details, "0 NICs up, 2 NICs down (vmnic0, vmnic1)");
        assert_eq!(network_status(&[]).status, ComponentStatus::Unknown);
    }

    #[test]
    fn worst_prefers_higher_severity() {
        let statuses = [StorageHealth::Healthy, StorageHealth::Critical, StorageHealth::Warning];
        assert_eq!(worst(statuses), Some(StorageHealth::Critical));
        assert_eq!(worst(Vec::<HaStatus>::new()), None);
        assert_eq!(
            worst([VsanHealth::Disabled, VsanHealth::Healthy]),
            Some(VsanHealth::Healthy)
        );
    }

    #[test]
    fn license_sizing_applies_core_minimum() {
        // two dual-socket hosts with 12 cores per socket -> 16 licensed per socket
        let sizing = license_sizing(DeploymentClass::Vvf, [(2, 24), (2, 24)], 0);
        assert_eq!(sizing.foundation_license_core_count, 64);
        assert_eq!(sizing.entitled_vsan_license_tib, 16.0);
        assert_eq!(sizing.required_vvf_compute_licenses, 64);
        assert_eq!(sizing.required_vsan_addon_licenses, 0.0);

        let vcf = license_sizing(DeploymentClass::Vcf, [(1, 32)], 40 * 1024_u64.pow(4));
        assert_eq!(vcf.foundation_license_core_count, 32);
        assert_eq!(vcf.required_vsan_tib_capacity, 40.0);
        assert_eq!(vcf.vsan_license_tib_count, 40.0);
        assert_eq!(vcf.required_vsan_addon_licenses, 8.0);
        assert_eq!(vcf.required_vvf_compute_licenses, 0);
    }

    #[test]
    fn license_sizing_saturates_on_absurd_core_counts() {
        let sizing = license_sizing(DeploymentClass::Vvf, [(u32::MAX, u32::MAX), (2, 24)], 0);
        assert_eq!(sizing.foundation_license_core_count, u32::MAX);
        assert_eq!(sizing.required_vvf_compute_licenses, u32::MAX);
    }
}
