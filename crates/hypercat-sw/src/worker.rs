//! The offline worker: lifecycle events plus per-request fetch handling.

use std::sync::Arc;

use hypercat_common::WaitUntil;
use hypercat_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::classify::classify;
use crate::clients::Clients;
use crate::config::CacheConfig;
use crate::lifecycle::{
    precache, purge_stale_generations, ActivateReport, InstallReport, Lifecycle, WorkerId,
    WorkerState,
};
use crate::storage::CacheStorage;
use crate::strategy::{Strategy, StrategyExecutor};
use crate::SwError;

/// Worker events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        version: String,
        new_state: WorkerState,
    },
    /// Open pages switched to this worker.
    ClientsClaimed { worker_id: WorkerId, count: usize },
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Fetcher>,
    pub clients: Arc<RwLock<Clients>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerContext {
    /// Create a context and the receiving end of its event channel.
    pub fn new(
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                storage,
                network,
                clients: Arc::new(RwLock::new(Clients::new())),
                events,
            },
            rx,
        )
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }
}

/// One versioned instance of the caching engine.
pub struct OfflineWorker {
    id: WorkerId,
    config: Arc<CacheConfig>,
    context: WorkerContext,
    executor: StrategyExecutor,
    lifecycle: RwLock<Lifecycle>,
}

impl OfflineWorker {
    pub fn new(config: Arc<CacheConfig>, context: WorkerContext) -> Self {
        let executor = StrategyExecutor::new(
            Arc::clone(&config),
            Arc::clone(&context.storage),
            Arc::clone(&context.network),
        );

        Self {
            id: WorkerId::new(),
            config,
            context,
            executor,
            lifecycle: RwLock::new(Lifecycle::new()),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state()
    }

    /// Whether install asked to bypass the waiting phase.
    pub async fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.read().await.skip_waiting()
    }

    async fn set_state(&self, next: WorkerState) -> Result<(), SwError> {
        let mut lifecycle = self.lifecycle.write().await;
        let previous = lifecycle.state();
        let held_for = lifecycle.since_change();
        lifecycle.transition(next)?;
        drop(lifecycle);

        info!(
            worker = self.id.raw(),
            version = %self.config.version,
            from = ?previous,
            to = ?next,
            ?held_for,
            "Worker state changed"
        );
        self.context.emit(WorkerEvent::StateChange {
            worker_id: self.id,
            version: self.config.version.clone(),
            new_state: next,
        });
        Ok(())
    }

    /// Install: precache the manifest into the static generation.
    ///
    /// Individual manifest failures are reported, never returned as errors;
    /// only an out-of-order call fails.
    pub async fn install(&self) -> Result<InstallReport, SwError> {
        self.set_state(WorkerState::Installing).await?;

        let report = precache(
            &self.config,
            self.context.storage.as_ref(),
            self.context.network.as_ref(),
        )
        .await;
        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                total = self.config.precache.len(),
                "Some manifest entries were not precached"
            );
        }

        self.set_state(WorkerState::Installed).await?;
        if self.config.skip_waiting {
            self.lifecycle.write().await.request_skip_waiting();
        }
        Ok(report)
    }

    /// Activate: purge stale generations, then take control of open pages.
    pub async fn activate(&self) -> Result<ActivateReport, SwError> {
        self.set_state(WorkerState::Activating).await?;

        let mut report = purge_stale_generations(&self.config, self.context.storage.as_ref()).await;

        self.set_state(WorkerState::Activated).await?;
        report.claimed = self.claim_clients().await;
        Ok(report)
    }

    async fn claim_clients(&self) -> usize {
        let count = self
            .context
            .clients
            .write()
            .await
            .claim(self.id, &self.config.origin);

        debug!(worker = self.id.raw(), count, "Claimed clients");
        self.context.emit(WorkerEvent::ClientsClaimed {
            worker_id: self.id,
            count,
        });
        count
    }

    /// Retire this worker.
    pub async fn mark_redundant(&self) -> Result<(), SwError> {
        self.set_state(WorkerState::Redundant).await
    }

    /// Handle an intercepted request. `None` lets it pass through.
    ///
    /// Only an activated worker answers requests.
    pub async fn handle_fetch(&self, request: &Request, wait_until: &WaitUntil) -> Option<Response> {
        if self.state().await != WorkerState::Activated {
            return None;
        }

        let strategy = Strategy::from(classify(request, &self.config));
        self.executor.execute(strategy, request, wait_until).await
    }
}
