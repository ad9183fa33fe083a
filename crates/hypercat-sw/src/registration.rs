//! Registration: the slot holding the waiting and active workers, and the
//! entry point for intercepted requests.

use std::sync::Arc;

use async_trait::async_trait;
use hypercat_common::WaitUntil;
use hypercat_net::{InterceptAction, InterceptHandler, Request};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::lifecycle::{ActivateReport, InstallReport, WorkerId};
use crate::worker::{OfflineWorker, WorkerContext};
use crate::SwError;

/// Result of installing a new worker version.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub worker_id: WorkerId,
    pub install: InstallReport,
    /// Present when the new worker was activated right away.
    pub activation: Option<ActivateReport>,
}

/// A worker registration for one site.
pub struct Registration {
    context: WorkerContext,
    waiting: RwLock<Option<Arc<OfflineWorker>>>,
    active: RwLock<Option<Arc<OfflineWorker>>>,
}

impl Registration {
    pub fn new(context: WorkerContext) -> Self {
        Self {
            context,
            waiting: RwLock::new(None),
            active: RwLock::new(None),
        }
    }

    /// Shared collaborators.
    pub fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub async fn active(&self) -> Option<Arc<OfflineWorker>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.waiting.read().await.clone()
    }

    /// Install a worker built from `config`.
    ///
    /// It activates immediately if it asked to skip waiting or nothing is
    /// active yet; otherwise it waits for [`Registration::activate_waiting`].
    pub async fn update(&self, config: CacheConfig) -> Result<UpdateOutcome, SwError> {
        config.validate()?;
        let worker = Arc::new(OfflineWorker::new(Arc::new(config), self.context.clone()));
        let install = worker.install().await?;

        let activate_now =
            worker.skip_waiting_requested().await || self.active.read().await.is_none();

        let activation = if activate_now {
            Some(self.promote(Arc::clone(&worker)).await?)
        } else {
            debug!(worker = worker.id().raw(), "Worker installed and waiting");
            let previous = self.waiting.write().await.replace(Arc::clone(&worker));
            if let Some(previous) = previous {
                retire(&previous).await;
            }
            None
        };

        Ok(UpdateOutcome {
            worker_id: worker.id(),
            install,
            activation,
        })
    }

    /// Activate the waiting worker, if there is one.
    pub async fn activate_waiting(&self) -> Result<Option<ActivateReport>, SwError> {
        let waiting = self.waiting.write().await.take();
        match waiting {
            Some(worker) => Ok(Some(self.promote(worker).await?)),
            None => Ok(None),
        }
    }

    /// Retire every worker.
    pub async fn unregister(&self) {
        let active = self.active.write().await.take();
        let waiting = self.waiting.write().await.take();
        for worker in active.iter().chain(waiting.iter()) {
            retire(worker).await;
        }
        info!("Registration cleared");
    }

    /// Activate `worker`, then make it the active worker.
    ///
    /// The previous worker keeps answering requests until activation ends.
    /// A different worker parked in the waiting slot is older than `worker`
    /// and is retired so it can never be activated over it.
    async fn promote(&self, worker: Arc<OfflineWorker>) -> Result<ActivateReport, SwError> {
        let superseded = {
            let mut waiting = self.waiting.write().await;
            match waiting.as_ref() {
                Some(parked) if !Arc::ptr_eq(parked, &worker) => waiting.take(),
                _ => None,
            }
        };
        if let Some(superseded) = superseded {
            debug!(worker = superseded.id().raw(), "Dropping superseded waiting worker");
            retire(&superseded).await;
        }

        let report = match worker.activate().await {
            Ok(report) => report,
            Err(e) => {
                retire(&worker).await;
                return Err(e);
            }
        };

        let previous = self.active.write().await.replace(Arc::clone(&worker));
        if let Some(previous) = previous {
            retire(&previous).await;
        }
        Ok(report)
    }
}

async fn retire(worker: &OfflineWorker) {
    if let Err(e) = worker.mark_redundant().await {
        warn!(worker = worker.id().raw(), error = %e, "Could not retire worker");
    }
}

#[async_trait]
impl InterceptHandler for Registration {
    async fn intercept(&self, request: &Request, wait_until: &WaitUntil) -> InterceptAction {
        let Some(worker) = self.active().await else {
            return InterceptAction::PassThrough;
        };

        match worker.handle_fetch(request, wait_until).await {
            Some(response) => InterceptAction::Respond(response),
            None => InterceptAction::PassThrough,
        }
    }
}
