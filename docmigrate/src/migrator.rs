use docmigrate_store::Store;
use tokio_util::sync::CancellationToken;

use crate::{
    config::MigrateConfig,
    error::Result,
    executor::Executor,
    history::HistoryStore,
    lock::LockManager,
    registry::{Plan, Registry},
    report::{ExecutionReport, RollbackReport},
    rollback::RollbackEngine,
    status::StatusReport,
};

/// Entry points an application exposes: run pending units, roll back to an
/// order, report status.
#[derive(Clone)]
pub struct Migrator {
    store: Store,
    plan: Plan,
    config: MigrateConfig,
    cancel: CancellationToken,
}

impl Migrator {
    pub fn new(store: &Store, registry: &Registry) -> Self {
        Self {
            store: store.clone(),
            plan: registry.plan(),
            config: MigrateConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(mut self, config: MigrateConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancelling `token` stops the current run after aborting the unit in
    /// flight.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn executor_id(&self) -> &str {
        &self.config.executor_id
    }

    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(
            self.store.clone(),
            &self.config.history_collection,
            &self.config.executor_id,
        )
    }

    pub fn locks(&self) -> LockManager {
        LockManager::new(self.store.clone(), &self.config)
    }

    pub fn executor(&self) -> Executor {
        Executor {
            store: self.store.clone(),
            plan: self.plan.clone(),
            history: self.history(),
            locks: self.locks(),
            executor_id: self.config.executor_id.to_owned(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn rollback_engine(&self) -> RollbackEngine {
        RollbackEngine {
            store: self.store.clone(),
            plan: self.plan.clone(),
            history: self.history(),
            locks: self.locks(),
            executor_id: self.config.executor_id.to_owned(),
            cancel: self.cancel.clone(),
        }
    }

    pub async fn run(&self) -> Result<ExecutionReport> {
        self.executor().run().await
    }

    pub async fn run_until(&self, order: &str) -> Result<ExecutionReport> {
        self.executor().run_until(Some(order)).await
    }

    pub async fn rollback_to(&self, order: &str) -> Result<RollbackReport> {
        self.rollback_engine().rollback_to(order).await
    }

    pub async fn rollback_all(&self) -> Result<RollbackReport> {
        self.rollback_engine().rollback_to("").await
    }

    pub async fn status(&self) -> Result<StatusReport> {
        self.store.init().await?;

        StatusReport::collect(&self.plan, &self.history()).await
    }
}
