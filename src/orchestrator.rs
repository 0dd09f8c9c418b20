use crate::collectors::api::Connector;
use crate::collectors::fleet::{collect_fleet, FleetReport};
use crate::config::{Config, EndpointConfig};
use crate::credentials::{validate_role, Credential, Credentials, CredentialsError, CredentialsProvider};
use crate::metrics::Metrics;
use crate::records::{RunStatistics, TableCounts};
use crate::store::{Store, StoreError};
use crate::time::{format_unix, next_daily_run, now_unix};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    FetchingCredentials,
    Collecting,
    Publishing,
    Failed,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::FetchingCredentials => "fetching_credentials",
            CycleState::Collecting => "collecting",
            CycleState::Publishing => "publishing",
            CycleState::Failed => "failed",
        }
    }

    /// True while a cycle holds the run-lock.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            CycleState::FetchingCredentials | CycleState::Collecting | CycleState::Publishing
        )
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("cycle abandoned before publish")]
    Abandoned,
    #[error("publish task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("a refresh cycle is already running")]
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    Busy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run: RunStatistics,
    pub counts: TableCounts,
    pub failed_endpoints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub endpoints: Vec<EndpointConfig>,
    pub role: String,
    pub endpoint_deadline: Duration,
}

impl From<&Config> for CycleSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            endpoints: cfg.endpoints.clone(),
            role: cfg.credentials.role.clone(),
            endpoint_deadline: cfg.collection.endpoint_deadline,
        }
    }
}

/// Drives refresh cycles: credentials, fleet collection, publish. At most one cycle
/// runs at a time; the state channel doubles as the run-lock. `Failed` is kept until
/// the next cycle is admitted so the read side can see the last run failed.
pub struct Orchestrator {
    settings: CycleSettings,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialsProvider>,
    store: Arc<Store>,
    metrics: Arc<Metrics>,
    state: Arc<watch::Sender<CycleState>>,
    shutdown: watch::Receiver<bool>,
}

/// Held for the lifetime of one cycle; releases the run-lock when dropped.
struct CycleGuard {
    state: Arc<watch::Sender<CycleState>>,
}

impl CycleGuard {
    fn set(&self, next: CycleState) {
        debug!(state = next.as_str(), "cycle state changed");
        self.state.send_replace(next);
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if state.is_running() {
                *state = CycleState::Idle;
                true
            } else {
                false
            }
        });
    }
}

impl Orchestrator {
    pub fn new(
        settings: CycleSettings,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialsProvider>,
        store: Arc<Store>,
        metrics: Arc<Metrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(CycleState::Idle);
        Arc::new(Self {
            settings,
            connector,
            credentials,
            store,
            metrics,
            state: Arc::new(state),
            shutdown,
        })
    }

    pub fn state(&self) -> CycleState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CycleState> {
        self.state.subscribe()
    }

    /// Starts a cycle in the background unless one is already running.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let Some(guard) = self.begin() else {
            info!(state = self.state().as_str(), "refresh already in progress, trigger dropped");
            return TriggerOutcome::Busy;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            // outcome is logged and exported by execute
            let _ = this.execute(guard).await;
        });
        TriggerOutcome::Started
    }

    /// Runs one cycle in the caller's task.
    pub async fn run_once(&self) -> Result<CycleSummary, CycleError> {
        let guard = self.begin().ok_or(CycleError::Busy)?;
        self.execute(guard).await
    }

    /// Long-lived timer worker: fires daily at `daily_offset_secs` past UTC midnight
    /// until shutdown, then waits for the in-flight cycle.
    pub async fn run_scheduler(self: Arc<Self>, daily_offset_secs: i64, run_on_start: bool) {
        let mut shutdown = self.shutdown.clone();
        if run_on_start {
            self.trigger();
        }

        loop {
            let now = now_unix();
            let next = next_daily_run(now, daily_offset_secs);
            info!(next_run = %format_unix(next), "next refresh scheduled");
            let wait = Duration::from_secs(next.saturating_sub(now).max(0) as u64);
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(wait) => {
                    self.trigger();
                }
            }
        }

        self.wait_in_flight().await;
        info!("scheduler stopped");
    }

    /// Resolves once no cycle holds the run-lock. The guard releases it even when
    /// the cycle task panics.
    pub async fn wait_in_flight(&self) {
        let mut states = self.subscribe_state();
        // the sender lives in self, so the channel cannot close here
        let _ = states.wait_for(|state| !state.is_running()).await;
    }

    fn begin(&self) -> Option<CycleGuard> {
        let acquired = self.state.send_if_modified(|state| {
            if !state.is_running() {
                *state = CycleState::FetchingCredentials;
                true
            } else {
                false
            }
        });
        acquired.then(|| CycleGuard {
            state: Arc::clone(&self.state),
        })
    }

    async fn execute(&self, guard: CycleGuard) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        info!(endpoints = self.settings.endpoints.len(), "refresh cycle started");
        let result = self.cycle(&guard, started).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(summary) => {
                self.metrics.record_cycle("success", elapsed);
                self.metrics
                    .record_published(&summary.counts, summary.run.last_run_unix);
                for endpoint in &summary.failed_endpoints {
                    self.metrics.inc_endpoint_failure(endpoint);
                }
                info!(
                    run_count = summary.run.run_count,
                    failed_endpoints = summary.failed_endpoints.len(),
                    elapsed_secs = elapsed,
                    "refresh cycle finished"
                );
            }
            Err(CycleError::Abandoned) => {
                self.metrics.record_cycle("abandoned", elapsed);
                warn!("refresh cycle abandoned on shutdown, store untouched");
            }
            Err(err) => {
                guard.set(CycleState::Failed);
                self.metrics.record_cycle("failure", elapsed);
                error!(error = %err, "refresh cycle failed, previous snapshot kept");
            }
        }
        result
    }

    async fn cycle(&self, guard: &CycleGuard, started: Instant) -> Result<CycleSummary, CycleError> {
        let credential = self.fetch_credential().await?;

        guard.set(CycleState::Collecting);
        let mut shutdown = self.shutdown.clone();
        let report = tokio::select! {
            report = collect_fleet(
                Arc::clone(&self.connector),
                &self.settings.endpoints,
                credential,
                self.settings.endpoint_deadline,
            ) => report,
            _ = shutdown_requested(&mut shutdown) => return Err(CycleError::Abandoned),
        };
        if *self.shutdown.borrow() {
            return Err(CycleError::Abandoned);
        }

        // Past this point the publish runs to commit or rollback even if the
        // caller goes away.
        guard.set(CycleState::Publishing);
        let FleetReport { batch, failed } = report;
        let counts = batch.counts();
        let duration = started.elapsed();
        let store = Arc::clone(&self.store);
        let run = tokio::task::spawn_blocking(move || store.publish(&batch, duration, now_unix()))
            .await??;

        Ok(CycleSummary {
            run,
            counts,
            failed_endpoints: failed,
        })
    }

    async fn fetch_credential(&self) -> Result<Credential, CredentialsError> {
        let role = self.settings.role.as_str();
        let cached = self.credentials.get_credentials(false).await?;
        match pick(&cached, role) {
            Ok(credential) => Ok(credential),
            Err(err) => {
                warn!(role, error = %err, "cached credentials unusable, forcing refresh");
                let fresh = self.credentials.get_credentials(true).await?;
                pick(&fresh, role)
            }
        }
    }
}

fn pick(credentials: &Credentials, role: &str) -> Result<Credential, CredentialsError> {
    validate_role(credentials, role)?;
    credentials
        .get(role)
        .cloned()
        .ok_or_else(|| CredentialsError::Invalid {
            role: role.to_string(),
            reason: "role missing".to_string(),
        })
}

/// Resolves once shutdown is signalled; never resolves if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
