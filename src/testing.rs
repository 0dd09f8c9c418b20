//! In-memory fakes and inventory fixtures shared by the unit tests.

use crate::collectors::api::{CertificateSet, Connector, Session};
use crate::collectors::CollectError;
use crate::config::{DeploymentClass, EndpointConfig};
use crate::credentials::{Credential, Credentials, CredentialsError, CredentialsProvider};
use crate::inventory::{
    About, Cluster, Datacenter, Datastore, Host, HostHardware, HostNetwork, HostUsage,
    Inventory, PhysicalNic, SnapshotNode, VirtualMachine, VirtualNic,
};
use crate::records::CertificateSummary;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn endpoint(address: &str, deploy_type: DeploymentClass) -> EndpointConfig {
    EndpointConfig {
        address: address.to_string(),
        deploy_type,
    }
}

pub fn credential() -> Credential {
    Credential {
        username: "svc-inventory".to_string(),
        password: "secret".to_string(),
    }
}

pub fn datastore(name: &str, capacity: u64, free: u64) -> Datastore {
    Datastore {
        name: name.to_string(),
        kind: Some("VMFS".to_string()),
        capacity_bytes: Some(capacity),
        free_bytes: Some(free),
        accessible: Some(true),
        ..Datastore::default()
    }
}

pub fn vm(name: &str) -> VirtualMachine {
    VirtualMachine {
        name: name.to_string(),
        instance_uuid: Some(format!("uuid-{name}")),
        guest_full_name: Some("Ubuntu Linux (64-bit)".to_string()),
        power_state: Some("poweredOn".to_string()),
        created: Some("2024-03-01T12:00:00Z".to_string()),
        committed_bytes: Some(40 * 1024_u64.pow(3)),
        uncommitted_bytes: Some(10 * 1024_u64.pow(3)),
        guest_ips: vec!["10.0.0.10".to_string()],
        nic_types: vec!["VirtualVmxnet3".to_string()],
        tools_status: Some("toolsOk".to_string()),
        hardware_version: Some("vmx-19".to_string()),
        num_cpu: Some(2),
        memory_mb: Some(4096),
        disk_capacity_bytes: vec![50 * 1024_u64.pow(3)],
        ..VirtualMachine::default()
    }
}

pub fn host(name: &str, vms: Vec<VirtualMachine>) -> Host {
    Host {
        name: name.to_string(),
        hardware: HostHardware {
            cpu_mhz: Some(2_400),
            cpu_cores: Some(32),
            cpu_packages: Some(2),
            memory_bytes: Some(512 * 1024_u64.pow(3)),
            vendor: Some("Dell Inc.".to_string()),
            model: Some("PowerEdge R650".to_string()),
            serial_number: Some(format!("SN-{name}")),
        },
        usage: HostUsage {
            cpu_mhz: Some(19_200),
            memory_mb: Some(128 * 1024),
        },
        network: HostNetwork {
            dns_servers: vec!["10.0.0.2".to_string(), "10.0.0.3".to_string()],
            ntp_servers: vec!["ntp.example.net".to_string()],
            vnics: vec![VirtualNic {
                ip: Some("10.0.1.11".to_string()),
                mac: Some("00:50:56:aa:bb:cc".to_string()),
            }],
            pnics: vec![
                PhysicalNic {
                    device: "vmnic0".to_string(),
                    link_speed_mbps: Some(25_000),
                },
                PhysicalNic {
                    device: "vmnic1".to_string(),
                    link_speed_mbps: Some(25_000),
                },
            ],
        },
        power_policy: Some("Balanced".to_string()),
        vsan_enabled: Some(true),
        datastores: vec!["ds-shared".to_string()],
        vms,
    }
}

/// Three hosts in two clusters running ten VMs, one of which has a snapshot.
pub fn scenario_inventory() -> Inventory {
    let vms = |prefix: &str, count: usize| -> Vec<VirtualMachine> {
        (1..=count).map(|i| vm(&format!("{prefix}-{i:02}"))).collect()
    };
    let mut first = vms("app", 4);
    first[0].snapshots = vec![SnapshotNode {
        name: "pre-patch".to_string(),
        created: Some("2024-05-01T08:00:00Z".to_string()),
        children: vec![],
    }];

    Inventory {
        datacenters: vec![Datacenter {
            name: "dc-main".to_string(),
            datastores: vec![datastore("ds-shared", 10 * 1024_u64.pow(4), 6 * 1024_u64.pow(4))],
            clusters: vec![
                Cluster {
                    name: "prod".to_string(),
                    vsan_enabled: Some(false),
                    datastores: vec!["ds-shared".to_string()],
                    hosts: vec![host("esx-01", first), host("esx-02", vms("db", 3))],
                    ..Cluster::default()
                },
                Cluster {
                    name: "edge".to_string(),
                    vsan_enabled: Some(false),
                    hosts: vec![host("esx-03", vms("edge", 3))],
                    ..Cluster::default()
                },
            ],
        }],
    }
}

#[derive(Clone)]
pub enum Behaviour {
    Serve(Inventory),
    ConnectError,
    AuthError,
    WalkError,
    Hang,
}

/// Connector whose endpoints behave as scripted; counts opened and released sessions.
pub struct FakeConnector {
    behaviours: HashMap<String, Behaviour>,
    connects: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            behaviours: HashMap::new(),
            connects: AtomicUsize::new(0),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with(mut self, address: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(address.to_string(), behaviour);
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        endpoint: &EndpointConfig,
        _credential: &Credential,
    ) -> Result<Arc<dyn Session>, CollectError> {
        let behaviour = self.behaviours.get(&endpoint.address).cloned();
        match behaviour {
            None | Some(Behaviour::ConnectError) => Err(CollectError::Connect {
                endpoint: endpoint.address.clone(),
                message: "connection refused".to_string(),
            }),
            Some(Behaviour::AuthError) => Err(CollectError::Auth {
                endpoint: endpoint.address.clone(),
                message: "session request returned 401 Unauthorized".to_string(),
            }),
            Some(behaviour) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(FakeSession {
                    endpoint: endpoint.address.clone(),
                    behaviour,
                    disconnects: Arc::clone(&self.disconnects),
                }))
            }
        }
    }
}

struct FakeSession {
    endpoint: String,
    behaviour: Behaviour,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for FakeSession {
    async fn about(&self) -> Result<About, CollectError> {
        Ok(About {
            version: Some("8.0.2".to_string()),
            build: Some("22617221".to_string()),
        })
    }

    async fn inventory(&self) -> Result<Inventory, CollectError> {
        match &self.behaviour {
            Behaviour::Serve(inventory) => Ok(inventory.clone()),
            Behaviour::Hang => std::future::pending().await,
            _ => Err(CollectError::Walk {
                endpoint: self.endpoint.clone(),
                message: "property collector fault".to_string(),
            }),
        }
    }

    async fn certificates(&self) -> CertificateSet {
        CertificateSet {
            tls: Some(CertificateSummary {
                expires_at_unix: Some(1_893_456_000),
                issuer: Some("CN=CA".to_string()),
                subject: Some(format!("CN={}", self.endpoint)),
            }),
            signing: None,
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider returning a fixed result; counts forced refreshes.
pub struct StaticCredentials {
    result: Result<Credentials, String>,
    pub forced: AtomicUsize,
}

impl StaticCredentials {
    pub fn ok(role: &str) -> Self {
        Self {
            result: Ok(HashMap::from([(role.to_string(), credential())])),
            forced: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            forced: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn get_credentials(&self, force_refresh: bool) -> Result<Credentials, CredentialsError> {
        if force_refresh {
            self.forced.fetch_add(1, Ordering::SeqCst);
        }
        self.result
            .clone()
            .map_err(CredentialsError::Unavailable)
    }
}
