use crate::collectors::api::{CertificateSet, Connector, Session};
use crate::collectors::walker::walk;
use crate::collectors::{CollectError, EndpointOutcome};
use crate::config::EndpointConfig;
use crate::credentials::Credential;
use crate::inventory::{About, Inventory};
use crate::records::EndpointHealthRecord;
use crate::time::now_unix;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Collects one endpoint within `deadline`. Never fails: errors come back as an
/// `EndpointOutcome::Failed` carrying the endpoint's error health record.
pub async fn collect_endpoint(
    connector: &dyn Connector,
    endpoint: &EndpointConfig,
    credential: &Credential,
    deadline: Duration,
) -> EndpointOutcome {
    let started = Instant::now();
    match collect(connector, endpoint, credential, deadline).await {
        Ok(batch) => {
            info!(
                endpoint = %endpoint.address,
                hosts = batch.hosts.len(),
                clusters = batch.clusters.len(),
                vms = batch.virtual_machines.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "endpoint collected"
            );
            EndpointOutcome::Collected(batch)
        }
        Err(error) => {
            warn!(
                endpoint = %endpoint.address,
                kind = error.kind(),
                error = %error,
                "endpoint collection failed"
            );
            let health = EndpointHealthRecord::failed(
                &endpoint.address,
                endpoint.deploy_type,
                error.to_string(),
                now_unix(),
            );
            EndpointOutcome::Failed { health, error }
        }
    }
}

async fn collect(
    connector: &dyn Connector,
    endpoint: &EndpointConfig,
    credential: &Credential,
    deadline: Duration,
) -> Result<crate::records::InventoryBatch, CollectError> {
    let expires = Instant::now() + deadline;
    let timed_out = || CollectError::Timeout {
        endpoint: endpoint.address.clone(),
        secs: deadline.as_secs(),
    };

    let session = timeout_at(expires, connector.connect(endpoint, credential))
        .await
        .map_err(|_| timed_out())??;
    let guard = SessionGuard::new(session, &endpoint.address);

    let fetched = timeout_at(expires, fetch(guard.session())).await;
    guard.close().await;

    let (about, inventory, certs) = fetched.map_err(|_| timed_out())??;
    Ok(walk(endpoint, &about, certs, &inventory, now_unix()))
}

async fn fetch(session: &dyn Session) -> Result<(About, Inventory, CertificateSet), CollectError> {
    let about = session.about().await?;
    let inventory = session.inventory().await?;
    let certs = session.certificates().await;
    Ok((about, inventory, certs))
}

/// Releases the session on every exit path. `close` logs out inline; if the guard is
/// dropped first (cancellation, panic) the logout is spawned onto the runtime.
struct SessionGuard {
    session: Arc<dyn Session>,
    endpoint: String,
    closed: bool,
}

impl SessionGuard {
    fn new(session: Arc<dyn Session>, endpoint: &str) -> Self {
        Self {
            session,
            endpoint: endpoint.to_string(),
            closed: false,
        }
    }

    fn session(&self) -> &dyn Session {
        self.session.as_ref()
    }

    async fn close(mut self) {
        self.session.disconnect().await;
        self.closed = true;
        debug!(endpoint = %self.endpoint, "session released");
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                debug!(endpoint = %self.endpoint, "releasing abandoned session");
                let session = Arc::clone(&self.session);
                handle.spawn(async move { session.disconnect().await });
            }
            Err(_) => warn!(endpoint = %self.endpoint, "no runtime to release session"),
        }
    }
}
