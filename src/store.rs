use crate::config::DeploymentClass;
use crate::records::{
    AffinityRuleRecord, CertificateSummary, ClusterRecord, EndpointHealthRecord, EndpointStatus,
    HostRecord, InventoryBatch, RuleKind, RunStatistics, SnapshotRecord, TableCounts,
    VirtualMachineRecord,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create database directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to open database {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },
    #[error("failed to initialize schema: {0}")]
    Schema(rusqlite::Error),
    #[error("publish failed while writing {table}: {source}")]
    Transaction {
        table: &'static str,
        source: rusqlite::Error,
    },
    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("database connection lock poisoned")]
    Lock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub counts: TableCounts,
    pub latest_run: Option<RunStatistics>,
}

/// Latest published inventory snapshot plus the append-only run log.
///
/// Writes go through one connection, reads through another. With WAL journaling a
/// reader keeps seeing the previous snapshot until a publish commits.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let open = || {
            Connection::open(path).map_err(|source| StoreError::Open {
                path: shown.clone(),
                source,
            })
        };
        let writer = open()?;
        init_schema(&writer).map_err(StoreError::Schema)?;
        let reader = open()?;
        reader
            .execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(StoreError::Schema)?;

        debug!(path = %shown, "store opened");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// Replaces every entity table with `batch` and appends one run-statistics row,
    /// all in a single transaction. On error nothing is changed.
    pub fn publish(
        &self,
        batch: &InventoryBatch,
        duration: Duration,
        now_unix: i64,
    ) -> Result<RunStatistics, StoreError> {
        let mut conn = self.writer.lock().map_err(|_| StoreError::Lock)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|source| StoreError::Transaction {
                table: "begin",
                source,
            })?;

        match write_snapshot(&tx, batch, duration, now_unix) {
            Ok(stats) => {
                tx.commit().map_err(|source| StoreError::Transaction {
                    table: "commit",
                    source,
                })?;
                let counts = batch.counts();
                info!(
                    run_count = stats.run_count,
                    hosts = counts.hosts,
                    clusters = counts.clusters,
                    vms = counts.virtual_machines,
                    snapshots = counts.snapshots,
                    endpoints = counts.endpoint_health,
                    rules = counts.affinity_rules,
                    "snapshot published"
                );
                Ok(stats)
            }
            Err(err) => {
                // dropping the transaction rolls it back
                drop(tx);
                warn!(error = %err, "publish rolled back, previous snapshot kept");
                Err(err)
            }
        }
    }

    pub fn hosts(&self) -> Result<Vec<HostRecord>, StoreError> {
        self.select(&format!("SELECT {HOST_COLUMNS} FROM hosts ORDER BY rowid"), [], host_from_row)
    }

    pub fn host_by_name(&self, name: &str) -> Result<Vec<HostRecord>, StoreError> {
        self.select(
            &format!("SELECT {HOST_COLUMNS} FROM hosts WHERE name = ?1 ORDER BY rowid"),
            [name],
            host_from_row,
        )
    }

    pub fn clusters(&self) -> Result<Vec<ClusterRecord>, StoreError> {
        self.select(
            &format!("SELECT {CLUSTER_COLUMNS} FROM clusters ORDER BY rowid"),
            [],
            cluster_from_row,
        )
    }

    pub fn virtual_machines(&self) -> Result<Vec<VirtualMachineRecord>, StoreError> {
        self.select(
            &format!("SELECT {VM_COLUMNS} FROM virtual_machines ORDER BY rowid"),
            [],
            vm_from_row,
        )
    }

    pub fn snapshots(&self) -> Result<Vec<SnapshotRecord>, StoreError> {
        self.select(
            &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY rowid"),
            [],
            snapshot_from_row,
        )
    }

    pub fn endpoint_health(&self) -> Result<Vec<EndpointHealthRecord>, StoreError> {
        self.select(
            &format!("SELECT {HEALTH_COLUMNS} FROM endpoint_health ORDER BY rowid"),
            [],
            health_from_row,
        )
    }

    pub fn endpoint_health_for(
        &self,
        endpoint: &str,
    ) -> Result<Option<EndpointHealthRecord>, StoreError> {
        let conn = self.read()?;
        let record = conn
            .query_row(
                &format!("SELECT {HEALTH_COLUMNS} FROM endpoint_health WHERE endpoint = ?1"),
                [endpoint],
                health_from_row,
            )
            .optional()?;
        Ok(record)
    }

    pub fn affinity_rules(&self) -> Result<Vec<AffinityRuleRecord>, StoreError> {
        self.select(
            &format!("SELECT {RULE_COLUMNS} FROM affinity_rules ORDER BY rowid"),
            [],
            rule_from_row,
        )
    }

    pub fn latest_run(&self) -> Result<Option<RunStatistics>, StoreError> {
        let conn = self.read()?;
        Ok(latest_run(&conn)?)
    }

    /// Row counts of every table plus the latest run, read inside one transaction so
    /// they always describe the same published snapshot.
    pub fn health_summary(&self) -> Result<HealthSummary, StoreError> {
        let mut conn = self.read()?;
        let tx = conn.transaction()?;
        let summary = read_summary(&tx)?;
        tx.commit()?;
        Ok(summary)
    }

    fn read(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.reader.lock().map_err(|_| StoreError::Lock)
    }

    fn select<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.read()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }
}

fn read_summary(conn: &Connection) -> rusqlite::Result<HealthSummary> {
    let count = |table: &str| -> rusqlite::Result<u64> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    };
    let counts = TableCounts {
        hosts: count("hosts")?,
        clusters: count("clusters")?,
        virtual_machines: count("virtual_machines")?,
        snapshots: count("snapshots")?,
        endpoint_health: count("endpoint_health")?,
        affinity_rules: count("affinity_rules")?,
    };
    Ok(HealthSummary {
        counts,
        latest_run: latest_run(conn)?,
    })
}

fn latest_run(conn: &Connection) -> rusqlite::Result<Option<RunStatistics>> {
    conn.query_row(
        "SELECT run_count, last_run, duration_secs FROM run_statistics
         ORDER BY id DESC LIMIT 1",
        [],
        |row| {
            Ok(RunStatistics {
                run_count: row.get(0)?,
                last_run_unix: row.get(1)?,
                duration_secs: row.get(2)?,
            })
        },
    )
    .optional()
}

fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    conn.execute_batch(SCHEMA_SQL)
}

fn write_snapshot(
    tx: &Transaction<'_>,
    batch: &InventoryBatch,
    duration: Duration,
    now_unix: i64,
) -> Result<RunStatistics, StoreError> {
    let step = |table: &'static str| {
        move |source: rusqlite::Error| StoreError::Transaction { table, source }
    };

    replace_hosts(tx, &batch.hosts).map_err(step("hosts"))?;
    replace_clusters(tx, &batch.clusters).map_err(step("clusters"))?;
    replace_vms(tx, &batch.virtual_machines).map_err(step("virtual_machines"))?;
    replace_snapshots(tx, &batch.snapshots).map_err(step("snapshots"))?;
    replace_health(tx, &batch.endpoint_health).map_err(step("endpoint_health"))?;
    replace_rules(tx, &batch.affinity_rules).map_err(step("affinity_rules"))?;
    append_run(tx, duration, now_unix).map_err(step("run_statistics"))
}

fn append_run(
    tx: &Transaction<'_>,
    duration: Duration,
    now_unix: i64,
) -> rusqlite::Result<RunStatistics> {
    let run_count: i64 = tx.query_row(
        "SELECT COALESCE(MAX(run_count), 0) + 1 FROM run_statistics",
        [],
        |row| row.get(0),
    )?;
    let stats = RunStatistics {
        run_count,
        last_run_unix: now_unix,
        duration_secs: duration.as_secs_f64(),
    };
    tx.execute(
        "INSERT INTO run_statistics (run_count, last_run, duration_secs) VALUES (?1, ?2, ?3)",
        params![stats.run_count, stats.last_run_unix, stats.duration_secs],
    )?;
    Ok(stats)
}

const HOST_COLUMNS: &str = "endpoint, name, datacenter, cluster, cpu_sockets, cpu_cores, \
     cpu_usage_percent, memory_gib, memory_usage_percent, total_vms, dns, ntp, ip, mac, \
     power_policy, vendor, model, serial_number";

fn replace_hosts(tx: &Transaction<'_>, hosts: &[HostRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM hosts", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO hosts ({HOST_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
    ))?;
    for h in hosts {
        stmt.execute(params![
            h.endpoint,
            h.name,
            h.datacenter,
            h.cluster,
            h.cpu_sockets,
            h.cpu_cores,
            h.cpu_usage_percent,
            h.memory_gib,
            h.memory_usage_percent,
            h.total_vms,
            h.dns,
            h.ntp,
            h.ip,
            h.mac,
            h.power_policy,
            h.vendor,
            h.model,
            h.serial_number,
        ])?;
    }
    Ok(())
}

fn host_from_row(row: &Row<'_>) -> rusqlite::Result<HostRecord> {
    Ok(HostRecord {
        endpoint: row.get(0)?,
        name: row.get(1)?,
        datacenter: row.get(2)?,
        cluster: row.get(3)?,
        cpu_sockets: row.get(4)?,
        cpu_cores: row.get(5)?,
        cpu_usage_percent: row.get(6)?,
        memory_gib: row.get(7)?,
        memory_usage_percent: row.get(8)?,
        total_vms: row.get(9)?,
        dns: row.get(10)?,
        ntp: row.get(11)?,
        ip: row.get(12)?,
        mac: row.get(13)?,
        power_policy: row.get(14)?,
        vendor: row.get(15)?,
        model: row.get(16)?,
        serial_number: row.get(17)?,
    })
}

const CLUSTER_COLUMNS: &str = "endpoint, datacenter, name, deploy_type, cpu_utilization, \
     memory_utilization, storage_utilization, vsan_enabled, vsan_capacity_tib, vsan_used_tib, \
     vsan_free_tib, vsan_utilization, num_hosts, num_cpu_sockets, num_cpu_cores, \
     foundation_license_core_count, entitled_vsan_license_tib, required_vsan_tib_capacity, \
     vsan_license_tib_count, required_vvf_compute_licenses, required_vsan_addon_licenses, \
     storage_health_status, vsan_health_status, drs_status, ha_status, avg_latency_ms";

fn replace_clusters(tx: &Transaction<'_>, clusters: &[ClusterRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM clusters", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO clusters ({CLUSTER_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
          ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
    ))?;
    for c in clusters {
        stmt.execute(params![
            c.endpoint,
            c.datacenter,
            c.name,
            c.deploy_type.as_str(),
            c.cpu_utilization,
            c.memory_utilization,
            c.storage_utilization,
            c.vsan_enabled,
            c.vsan_capacity_tib,
            c.vsan_used_tib,
            c.vsan_free_tib,
            c.vsan_utilization,
            c.num_hosts,
            c.num_cpu_sockets,
            c.num_cpu_cores,
            c.foundation_license_core_count,
            c.entitled_vsan_license_tib,
            c.required_vsan_tib_capacity,
            c.vsan_license_tib_count,
            c.required_vvf_compute_licenses,
            c.required_vsan_addon_licenses,
            c.storage_health_status,
            c.vsan_health_status,
            c.drs_status,
            c.ha_status,
            c.avg_latency_ms,
        ])?;
    }
    Ok(())
}

fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<ClusterRecord> {
    Ok(ClusterRecord {
        endpoint: row.get(0)?,
        datacenter: row.get(1)?,
        name: row.get(2)?,
        deploy_type: deploy_type_at(row, 3)?,
        cpu_utilization: row.get(4)?,
        memory_utilization: row.get(5)?,
        storage_utilization: row.get(6)?,
        vsan_enabled: row.get(7)?,
        vsan_capacity_tib: row.get(8)?,
        vsan_used_tib: row.get(9)?,
        vsan_free_tib: row.get(10)?,
        vsan_utilization: row.get(11)?,
        num_hosts: row.get(12)?,
        num_cpu_sockets: row.get(13)?,
        num_cpu_cores: row.get(14)?,
        foundation_license_core_count: row.get(15)?,
        entitled_vsan_license_tib: row.get(16)?,
        required_vsan_tib_capacity: row.get(17)?,
        vsan_license_tib_count: row.get(18)?,
        required_vvf_compute_licenses: row.get(19)?,
        required_vsan_addon_licenses: row.get(20)?,
        storage_health_status: row.get(21)?,
        vsan_health_status: row.get(22)?,
        drs_status: row.get(23)?,
        ha_status: row.get(24)?,
        avg_latency_ms: row.get(25)?,
    })
}

const VM_COLUMNS: &str = "endpoint, name, instance_uuid, os, site, power_state, created, \
     provisioned_gb, used_gb, ip_addresses, nic_types, tools_status, hardware_version, host, \
     cluster, notes";

fn replace_vms(tx: &Transaction<'_>, vms: &[VirtualMachineRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM virtual_machines", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO virtual_machines ({VM_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
    ))?;
    for vm in vms {
        stmt.execute(params![
            vm.endpoint,
            vm.name,
            vm.instance_uuid,
            vm.os,
            vm.site,
            vm.power_state,
            vm.created_unix,
            vm.provisioned_gb,
            vm.used_gb,
            to_json(&vm.ip_addresses)?,
            to_json(&vm.nic_types)?,
            vm.tools_status,
            vm.hardware_version,
            vm.host,
            vm.cluster,
            vm.notes,
        ])?;
    }
    Ok(())
}

fn vm_from_row(row: &Row<'_>) -> rusqlite::Result<VirtualMachineRecord> {
    Ok(VirtualMachineRecord {
        endpoint: row.get(0)?,
        name: row.get(1)?,
        instance_uuid: row.get(2)?,
        os: row.get(3)?,
        site: row.get(4)?,
        power_state: row.get(5)?,
        created_unix: row.get(6)?,
        provisioned_gb: row.get(7)?,
        used_gb: row.get(8)?,
        ip_addresses: json_list_at(row, 9)?,
        nic_types: json_list_at(row, 10)?,
        tools_status: row.get(11)?,
        hardware_version: row.get(12)?,
        host: row.get(13)?,
        cluster: row.get(14)?,
        notes: row.get(15)?,
    })
}

const SNAPSHOT_COLUMNS: &str = "endpoint, vm_id, vm_name, name, created";

fn replace_snapshots(tx: &Transaction<'_>, snapshots: &[SnapshotRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM snapshots", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO snapshots ({SNAPSHOT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
    ))?;
    for s in snapshots {
        stmt.execute(params![s.endpoint, s.vm_id, s.vm_name, s.name, s.created_unix])?;
    }
    Ok(())
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        endpoint: row.get(0)?,
        vm_id: row.get(1)?,
        vm_name: row.get(2)?,
        name: row.get(3)?,
        created_unix: row.get(4)?,
    })
}

const HEALTH_COLUMNS: &str = "endpoint, deploy_type, version, build, status, error_message, \
     storage_health_status, disk_health_status, storage_capacity_used, network_status, \
     network_details, vsan_health_status, vsan_disk_status, vsan_network_status, drs_status, \
     drs_balance, ha_status, avg_latency_ms, cpu_overcommitment, memory_overcommitment, \
     storage_overcommitment, tls_expires_at, tls_issuer, tls_subject, signing_expires_at, \
     signing_issuer, signing_subject, checked_at";

fn replace_health(tx: &Transaction<'_>, records: &[EndpointHealthRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM endpoint_health", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO endpoint_health ({HEALTH_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
          ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28)"
    ))?;
    for r in records {
        let tls = r.tls_certificate.as_ref();
        let signing = r.signing_certificate.as_ref();
        stmt.execute(params![
            r.endpoint,
            r.deploy_type.as_str(),
            r.version,
            r.build,
            r.status.as_str(),
            r.error_message,
            r.storage_health_status,
            r.disk_health_status,
            r.storage_capacity_used,
            r.network_status,
            r.network_details,
            r.vsan_health_status,
            r.vsan_disk_status,
            r.vsan_network_status,
            r.drs_status,
            r.drs_balance,
            r.ha_status,
            r.avg_latency_ms,
            r.cpu_overcommitment,
            r.memory_overcommitment,
            r.storage_overcommitment,
            tls.and_then(|c| c.expires_at_unix),
            tls.and_then(|c| c.issuer.as_deref()),
            tls.and_then(|c| c.subject.as_deref()),
            signing.and_then(|c| c.expires_at_unix),
            signing.and_then(|c| c.issuer.as_deref()),
            signing.and_then(|c| c.subject.as_deref()),
            r.checked_at_unix,
        ])?;
    }
    Ok(())
}

fn health_from_row(row: &Row<'_>) -> rusqlite::Result<EndpointHealthRecord> {
    let status: String = row.get(4)?;
    Ok(EndpointHealthRecord {
        endpoint: row.get(0)?,
        deploy_type: deploy_type_at(row, 1)?,
        version: row.get(2)?,
        build: row.get(3)?,
        status: EndpointStatus::parse(&status).ok_or_else(|| bad_value(4, &status))?,
        error_message: row.get(5)?,
        storage_health_status: row.get(6)?,
        disk_health_status: row.get(7)?,
        storage_capacity_used: row.get(8)?,
        network_status: row.get(9)?,
        network_details: row.get(10)?,
        vsan_health_status: row.get(11)?,
        vsan_disk_status: row.get(12)?,
        vsan_network_status: row.get(13)?,
        drs_status: row.get(14)?,
        drs_balance: row.get(15)?,
        ha_status: row.get(16)?,
        avg_latency_ms: row.get(17)?,
        cpu_overcommitment: row.get(18)?,
        memory_overcommitment: row.get(19)?,
        storage_overcommitment: row.get(20)?,
        tls_certificate: certificate_at(row, 21)?,
        signing_certificate: certificate_at(row, 24)?,
        checked_at_unix: row.get(27)?,
    })
}

const RULE_COLUMNS: &str = "endpoint, name, kind, enabled, cluster, vms, hosts, mandatory, description";

fn replace_rules(tx: &Transaction<'_>, rules: &[AffinityRuleRecord]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM affinity_rules", [])?;
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO affinity_rules ({RULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ))?;
    for rule in rules {
        stmt.execute(params![
            rule.endpoint,
            rule.name,
            rule.kind.as_str(),
            rule.enabled,
            rule.cluster,
            to_json(&rule.vms)?,
            to_json(&rule.hosts)?,
            rule.mandatory,
            rule.description,
        ])?;
    }
    Ok(())
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<AffinityRuleRecord> {
    let kind: String = row.get(2)?;
    Ok(AffinityRuleRecord {
        endpoint: row.get(0)?,
        name: row.get(1)?,
        kind: RuleKind::parse(&kind).ok_or_else(|| bad_value(2, &kind))?,
        enabled: row.get(3)?,
        cluster: row.get(4)?,
        vms: json_list_at(row, 5)?,
        hosts: json_list_at(row, 6)?,
        mandatory: row.get(7)?,
        description: row.get(8)?,
    })
}

#[derive(Debug, Error)]
#[error("unexpected stored value '{0}'")]
struct UnexpectedValue(String);

fn bad_value(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(UnexpectedValue(value.to_string())),
    )
}

fn deploy_type_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DeploymentClass> {
    let text: String = row.get(idx)?;
    DeploymentClass::parse(&text).ok_or_else(|| bad_value(idx, &text))
}

fn certificate_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<CertificateSummary>> {
    let summary = CertificateSummary {
        expires_at_unix: row.get(idx)?,
        issuer: row.get(idx + 1)?,
        subject: row.get(idx + 2)?,
    };
    let empty = summary.expires_at_unix.is_none() && summary.issuer.is_none() && summary.subject.is_none();
    Ok((!empty).then_some(summary))
}

fn to_json(values: &[String]) -> rusqlite::Result<String> {
    serde_json::to_string(values).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

fn json_list_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err)))
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS hosts (
    endpoint TEXT NOT NULL,
    name TEXT NOT NULL,
    datacenter TEXT NOT NULL,
    cluster TEXT NOT NULL,
    cpu_sockets INTEGER NOT NULL,
    cpu_cores INTEGER NOT NULL,
    cpu_usage_percent REAL NOT NULL,
    memory_gib REAL NOT NULL,
    memory_usage_percent REAL NOT NULL,
    total_vms INTEGER NOT NULL,
    dns TEXT NOT NULL,
    ntp TEXT NOT NULL,
    ip TEXT NOT NULL,
    mac TEXT NOT NULL,
    power_policy TEXT,
    vendor TEXT,
    model TEXT,
    serial_number TEXT
);
CREATE INDEX IF NOT EXISTS idx_hosts_name ON hosts(name);

CREATE TABLE IF NOT EXISTS clusters (
    endpoint TEXT NOT NULL,
    datacenter TEXT NOT NULL,
    name TEXT NOT NULL,
    deploy_type TEXT NOT NULL,
    cpu_utilization REAL NOT NULL,
    memory_utilization REAL NOT NULL,
    storage_utilization REAL NOT NULL,
    vsan_enabled INTEGER NOT NULL,
    vsan_capacity_tib REAL NOT NULL,
    vsan_used_tib REAL NOT NULL,
    vsan_free_tib REAL NOT NULL,
    vsan_utilization REAL NOT NULL,
    num_hosts INTEGER NOT NULL,
    num_cpu_sockets INTEGER NOT NULL,
    num_cpu_cores INTEGER NOT NULL,
    foundation_license_core_count INTEGER NOT NULL,
    entitled_vsan_license_tib REAL NOT NULL,
    required_vsan_tib_capacity REAL NOT NULL,
    vsan_license_tib_count REAL NOT NULL,
    required_vvf_compute_licenses INTEGER NOT NULL,
    required_vsan_addon_licenses REAL NOT NULL,
    storage_health_status TEXT NOT NULL,
    vsan_health_status TEXT NOT NULL,
    drs_status TEXT NOT NULL,
    ha_status TEXT NOT NULL,
    avg_latency_ms REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS virtual_machines (
    endpoint TEXT NOT NULL,
    name TEXT NOT NULL,
    instance_uuid TEXT,
    os TEXT,
    site TEXT NOT NULL,
    power_state TEXT,
    created INTEGER,
    provisioned_gb REAL NOT NULL,
    used_gb REAL NOT NULL,
    ip_addresses TEXT NOT NULL,
    nic_types TEXT NOT NULL,
    tools_status TEXT,
    hardware_version INTEGER,
    host TEXT NOT NULL,
    cluster TEXT NOT NULL,
    notes TEXT
);
CREATE INDEX IF NOT EXISTS idx_vms_name ON virtual_machines(name);

CREATE TABLE IF NOT EXISTS snapshots (
    endpoint TEXT NOT NULL,
    vm_id TEXT,
    vm_name TEXT NOT NULL,
    name TEXT NOT NULL,
    created INTEGER
);

CREATE TABLE IF NOT EXISTS endpoint_health (
    endpoint TEXT NOT NULL,
    deploy_type TEXT NOT NULL,
    version TEXT,
    build TEXT,
    status TEXT NOT NULL,
    error_message TEXT,
    storage_health_status TEXT NOT NULL,
    disk_health_status TEXT NOT NULL,
    storage_capacity_used REAL NOT NULL,
    network_status TEXT NOT NULL,
    network_details TEXT NOT NULL,
    vsan_health_status TEXT NOT NULL,
    vsan_disk_status TEXT NOT NULL,
    vsan_network_status TEXT NOT NULL,
    drs_status TEXT NOT NULL,
    drs_balance TEXT NOT NULL,
    ha_status TEXT NOT NULL,
    avg_latency_ms REAL NOT NULL,
    cpu_overcommitment REAL NOT NULL,
    memory_overcommitment REAL NOT NULL,
    storage_overcommitment REAL NOT NULL,
    tls_expires_at INTEGER,
    tls_issuer TEXT,
    tls_subject TEXT,
    signing_expires_at INTEGER,
    signing_issuer TEXT,
    signing_subject TEXT,
    checked_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS affinity_rules (
    endpoint TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    cluster TEXT NOT NULL,
    vms TEXT NOT NULL,
    hosts TEXT NOT NULL,
    mandatory INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS run_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_count INTEGER NOT NULL,
    last_run INTEGER NOT NULL,
    duration_secs REAL NOT NULL
);
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::walker::walk;
    use crate::collectors::api::CertificateSet;
    use crate::config::DeploymentClass;
    use crate::inventory::About;
    use crate::testing::{endpoint, scenario_inventory};
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let dir = tempfile::tempdir().expect("временный каталог");
        let store = Store::open(dir.path().join("db").join("inventory.db")).expect("открытие базы");
        (dir, store)
    }

    fn scenario_batch(address: &str) -> InventoryBatch {
        let mut batch = walk(
            &endpoint(address, DeploymentClass::Vcf),
            &About::default(),
            CertificateSet {
                tls: Some(CertificateSummary {
                    expires_at_unix: Some(1_900_000_000),
                    issuer: Some("CN=CA".to_string()),
                    subject: None,
                }),
                signing: None,
            },
            &scenario_inventory(),
            1_700_000_000,
        );
        batch.affinity_rules.push(AffinityRuleRecord {
            endpoint: address.to_string(),
            name: "spread-db".to_string(),
            kind: RuleKind::VmAntiAffinity,
            enabled: true,
            cluster: "prod".to_string(),
            vms: vec!["db-01".to_string(), "db-02".to_string()],
            hosts: vec![],
            mandatory: false,
            description: None,
        });
        batch
    }

    fn read_all(store: &Store) -> InventoryBatch {
        InventoryBatch {
            hosts: store.hosts().expect("hosts"),
            clusters: store.clusters().expect("clusters"),
            virtual_machines: store.virtual_machines().expect("vms"),
            snapshots: store.snapshots().expect("snapshots"),
            endpoint_health: store.endpoint_health().expect("health"),
            affinity_rules: store.affinity_rules().expect("rules"),
        }
    }

    #[test]
    fn publish_then_read_back() {
        let (_dir, store) = open_temp();
        let batch = scenario_batch("vc-a");
        let stats = store
            .publish(&batch, Duration::from_millis(1500), 1_700_000_100)
            .expect("публикация");
        assert_eq!(stats.run_count, 1);
        assert_eq!(stats.duration_secs, 1.5);
        assert_eq!(read_all(&store), batch);

        let health = store
            .endpoint_health_for("vc-a")
            .expect("запрос")
            .expect("запись есть");
        assert_eq!(health.tls_certificate, batch.endpoint_health[0].tls_certificate);
        assert!(health.signing_certificate.is_none());
        assert!(store.endpoint_health_for("vc-z").expect("запрос").is_none());
        assert_eq!(store.host_by_name("esx-02").expect("запрос").len(), 1);
    }

    #[test]
    fn publish_is_idempotent_and_counts_runs() {
        let (_dir, store) = open_temp();
        let batch = scenario_batch("vc-a");
        store.publish(&batch, Duration::from_secs(1), 100).expect("первая");
        let first = read_all(&store);
        let stats = store.publish(&batch, Duration::from_secs(2), 200).expect("вторая");
        assert_eq!(read_all(&store), first);
        assert_eq!(stats.run_count, 2);

        let summary = store.health_summary().expect("сводка");
        assert_eq!(summary.counts, batch.counts());
        assert_eq!(
            summary.latest_run,
            Some(RunStatistics {
                run_count: 2,
                last_run_unix: 200,
                duration_secs: 2.0,
            })
        );
    }

    #[test]
    fn failing_table_rolls_back_whole_snapshot() {
        let (_dir, store) = open_temp();
        let old = scenario_batch("vc-old");
        store.publish(&old, Duration::from_secs(1), 100).expect("исходный снимок");

        store
            .writer
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER fail_vms BEFORE INSERT ON virtual_machines
                 BEGIN SELECT RAISE(ABORT, 'boom'); END;",
            )
            .expect("триггер");

        let new = scenario_batch("vc-new");
        let err = store
            .publish(&new, Duration::from_secs(1), 200)
            .expect_err("публикация должна упасть");
        assert!(matches!(
            err,
            StoreError::Transaction {
                table: "virtual_machines",
                ..
            }
        ));

        // hosts and clusters were replaced before the failure and must be restored too
        assert_eq!(read_all(&store), old);
        assert_eq!(store.latest_run().expect("run").map(|r| r.run_count), Some(1));
    }

    #[test]
    fn readers_see_last_committed_snapshot() {
        let (dir, store) = open_temp();
        let batch = scenario_batch("vc-a");
        store.publish(&batch, Duration::from_secs(1), 100).expect("публикация");

        let other = Connection::open(dir.path().join("db").join("inventory.db")).expect("второе соединение");
        other.execute_batch("BEGIN IMMEDIATE; DELETE FROM hosts;").expect("незавершённое удаление");
        assert_eq!(store.hosts().expect("чтение").len(), batch.hosts.len());
        other.execute_batch("ROLLBACK;").expect("откат");
    }

    #[test]
    fn health_summary_stays_on_one_snapshot_across_publish() {
        let (_dir, store) = open_temp();
        let batch = scenario_batch("vc-a");
        store.publish(&batch, Duration::from_secs(1), 100).expect("публикация");

        let mut conn = store.reader.lock().unwrap();
        let tx = conn.transaction().expect("транзакция чтения");
        let before = read_summary(&tx).expect("сводка до публикации");
        store
            .publish(&InventoryBatch::default(), Duration::from_secs(2), 200)
            .expect("публикация во время чтения");
        let during = read_summary(&tx).expect("сводка во время публикации");
        assert_eq!(during, before);
        assert_eq!(before.counts, batch.counts());
        assert_eq!(before.latest_run.map(|r| r.run_count), Some(1));
        drop(tx);
        drop(conn);

        let after = store.health_summary().expect("сводка после");
        assert_eq!(after.counts, TableCounts::default());
        assert_eq!(after.latest_run.map(|r| r.run_count), Some(2));
    }

    #[test]
    fn empty_store_has_no_runs() {
        let (_dir, store) = open_temp();
        let summary = store.health_summary().expect("сводка");
        assert_eq!(summary.counts, TableCounts::default());
        assert!(summary.latest_run.is_none());
    }
}
