use crate::collectors::api::Connector;
use crate::collectors::endpoint::collect_endpoint;
use crate::collectors::{CollectError, EndpointOutcome};
use crate::config::EndpointConfig;
use crate::credentials::Credential;
use crate::records::{EndpointHealthRecord, InventoryBatch};
use crate::time::now_unix;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct FleetReport {
    pub batch: InventoryBatch,
    /// Addresses of endpoints that contributed only an error health record.
    pub failed: Vec<String>,
}

/// Aborts every still-running endpoint task when the fleet run itself is dropped.
struct AbortOnDrop(Vec<JoinHandle<EndpointOutcome>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// One task per endpoint; results are merged in configuration order once all finish.
pub async fn collect_fleet(
    connector: Arc<dyn Connector>,
    endpoints: &[EndpointConfig],
    credential: Credential,
    deadline: Duration,
) -> FleetReport {
    let mut tasks = AbortOnDrop(Vec::with_capacity(endpoints.len()));
    for endpoint in endpoints {
        let connector = Arc::clone(&connector);
        let endpoint = endpoint.clone();
        let credential = credential.clone();
        tasks.0.push(tokio::spawn(async move {
            collect_endpoint(connector.as_ref(), &endpoint, &credential, deadline).await
        }));
    }

    let mut report = FleetReport::default();
    for (endpoint, handle) in endpoints.iter().zip(tasks.0.iter_mut()) {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                error!(endpoint = %endpoint.address, error = %join_err, "endpoint task aborted");
                let error = CollectError::Walk {
                    endpoint: endpoint.address.clone(),
                    message: format!("collection task failed: {join_err}"),
                };
                EndpointOutcome::Failed {
                    health: EndpointHealthRecord::failed(
                        &endpoint.address,
                        endpoint.deploy_type,
                        error.to_string(),
                        now_unix(),
                    ),
                    error,
                }
            }
        };

        match outcome {
            EndpointOutcome::Collected(batch) => report.batch.extend(batch),
            EndpointOutcome::Failed { health, error } => {
                warn!(endpoint = %endpoint.address, error = %error, "endpoint excluded from snapshot");
                report.failed.push(endpoint.address.clone());
                report.batch.endpoint_health.push(health);
            }
        }
    }

    info!(
        endpoints = endpoints.len(),
        failed = report.failed.len(),
        hosts = report.batch.hosts.len(),
        vms = report.batch.virtual_machines.len(),
        "fleet collection finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentClass;
    use crate::records::EndpointStatus;
    use crate::testing::{credential, endpoint, scenario_inventory, Behaviour, FakeConnector};

    #[tokio::test(start_paused = true)]
    async fn healthy_endpoint_survives_a_hung_one() {
        let connector = Arc::new(
            FakeConnector::new()
                .with("vc-a", Behaviour::Serve(scenario_inventory()))
                .with("vc-b", Behaviour::Hang),
        );
        let endpoints = vec![
            endpoint("vc-a", DeploymentClass::Vcf),
            endpoint("vc-b", DeploymentClass::Vvf),
        ];
        let report = collect_fleet(
            connector.clone(),
            &endpoints,
            credential(),
            Duration::from_secs(30),
        )
        .await;

        let batch = &report.batch;
        assert_eq!(batch.hosts.len(), 3);
        assert_eq!(batch.clusters.len(), 2);
        assert_eq!(batch.virtual_machines.len(), 10);
        assert_eq!(batch.snapshots.len(), 1);
        assert_eq!(batch.endpoint_health.len(), 2);
        assert_eq!(batch.endpoint_health[0].endpoint, "vc-a");
        assert_eq!(batch.endpoint_health[0].status, EndpointStatus::Connected);
        assert_eq!(batch.endpoint_health[1].endpoint, "vc-b");
        assert_eq!(batch.endpoint_health[1].status, EndpointStatus::Error);
        assert_eq!(report.failed, vec!["vc-b"]);
        assert_eq!(connector.disconnects(), 2);
    }

    #[tokio::test]
    async fn each_failure_is_isolated() {
        let names = ["vc-1", "vc-2", "vc-3", "vc-4"];
        for failing in names {
            let mut connector = FakeConnector::new();
            for name in names {
                let behaviour = if name == failing {
                    Behaviour::ConnectError
                } else {
                    Behaviour::Serve(scenario_inventory())
                };
                connector = connector.with(name, behaviour);
            }
            let endpoints: Vec<_> = names
                .iter()
                .map(|n| endpoint(n, DeploymentClass::Vcf))
                .collect();
            let report = collect_fleet(
                Arc::new(connector),
                &endpoints,
                credential(),
                Duration::from_secs(30),
            )
            .await;

            assert_eq!(report.failed, vec![failing]);
            assert_eq!(report.batch.hosts.len(), 3 * (names.len() - 1));
            assert!(report.batch.hosts.iter().all(|h| h.endpoint != failing));
            assert!(report
                .batch
                .virtual_machines
                .iter()
                .all(|vm| vm.endpoint != failing));
            assert_eq!(report.batch.endpoint_health.len(), names.len());
        }
    }

    #[tokio::test]
    async fn empty_fleet_yields_empty_report() {
        let report = collect_fleet(
            Arc::new(FakeConnector::new()),
            &[],
            credential(),
            Duration::from_secs(30),
        )
        .await;
        assert!(report.failed.is_empty());
        assert_eq!(report.batch, InventoryBatch::default());
    }
}
