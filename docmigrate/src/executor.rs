use docmigrate_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    change_unit::ChangeUnit,
    error::{MigrateError, Result},
    history::{HistoryStore, MigrationState},
    lock::{LockGuard, LockManager},
    registry::Plan,
    report::{ExecutionOutcome, ExecutionReport},
};

/// Walks the plan under the migration lock and executes pending units.
#[derive(Clone)]
pub struct Executor {
    pub(crate) store: Store,
    pub(crate) plan: Plan,
    pub(crate) history: HistoryStore,
    pub(crate) locks: LockManager,
    pub(crate) executor_id: String,
    pub(crate) cancel: CancellationToken,
}

impl Executor {
    pub async fn run(&self) -> Result<ExecutionReport> {
        self.run_until(None).await
    }

    /// Runs the units whose order is lower than or equal to `target`, or the
    /// whole plan when no target is given.
    ///
    /// Only failing to initialise the store or to acquire the lock is
    /// returned as `Err`. Anything that halts the run afterwards is carried in
    /// [`ExecutionReport::error`], a failed release in
    /// [`ExecutionReport::release_error`].
    pub async fn run_until(&self, target: Option<&str>) -> Result<ExecutionReport> {
        self.store.init().await?;

        let guard = self.locks.lock().await?;
        let mut report = ExecutionReport::new(&self.executor_id);

        info!(executor = %self.executor_id, units = self.plan.len(), "migration run started");

        let units = self
            .plan
            .iter()
            .filter(|unit| target.map(|target| unit.order() <= target).unwrap_or(true));

        for unit in units {
            if report.error.is_some() {
                report.push(unit.id(), unit.order(), ExecutionOutcome::Blocked);
                continue;
            }

            if self.cancel.is_cancelled() {
                info!(change_unit = unit.id(), "run cancelled before change unit");
                report.error = Some(MigrateError::Cancelled);
                report.push(unit.id(), unit.order(), ExecutionOutcome::Blocked);
                continue;
            }

            match self.step(unit, &guard).await {
                Ok(outcome) => report.push(unit.id(), unit.order(), outcome),
                Err((outcome, err)) => {
                    report.push(unit.id(), unit.order(), outcome);
                    report.error = Some(err);
                }
            }
        }

        if let Err(err) = guard.release().await {
            error!(error = %err, "failed to release migration lock");
            report.release_error = Some(err);
        }

        match &report.error {
            None => info!(
                executed = report.executed().len(),
                skipped = report.skipped().len(),
                "migration run finished"
            ),
            Some(err) => error!(error = %err, "migration run halted"),
        }

        Ok(report)
    }

    async fn step(
        &self,
        unit: &ChangeUnit,
        guard: &LockGuard,
    ) -> std::result::Result<ExecutionOutcome, (ExecutionOutcome, MigrateError)> {
        let entry = self.history.get(unit).await.map_err(failed)?;

        if let Some(entry) = entry {
            if entry.checksum_mismatch {
                return Err((
                    ExecutionOutcome::Blocked,
                    MigrateError::ChecksumMismatch {
                        id: unit.id().to_owned(),
                        recorded: entry.record.checksum,
                        current: unit.current_checksum(),
                    },
                ));
            }

            match entry.record.state {
                MigrationState::Executed if !unit.is_run_always() => {
                    debug!(change_unit = unit.id(), "already executed, skipping");

                    return Ok(ExecutionOutcome::Skipped);
                }
                MigrationState::Pending => warn!(
                    change_unit = unit.id(),
                    previous_executor = %entry.record.executor_id,
                    "change unit was left pending by an interrupted run, executing again"
                ),
                _ => {}
            }
        }

        guard
            .ensure_held()
            .await
            .map_err(|err| (ExecutionOutcome::Blocked, err))?;

        self.history.record_start(unit).await.map_err(failed)?;

        info!(change_unit = unit.id(), order = unit.order(), "executing change unit");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MigrateError::Cancelled),
            _ = guard.lost().cancelled() => Err(MigrateError::LockLost {
                owner_id: self.executor_id.to_owned(),
            }),
            result = unit.run_execute(&self.store) => result.map_err(|err| {
                MigrateError::ExecutionFailure {
                    id: unit.id().to_owned(),
                    reason: format!("{err:#}"),
                }
            }),
        };

        let err = match result {
            Ok(()) => match guard.ensure_held().await {
                Ok(()) => {
                    self.history
                        .record_success(unit.id(), &unit.current_checksum())
                        .await
                        .map_err(failed)?;

                    info!(change_unit = unit.id(), "change unit executed");

                    return Ok(ExecutionOutcome::Executed);
                }
                Err(err) => err,
            },
            Err(err) => err,
        };

        let reason = failure_reason(&err);

        error!(change_unit = unit.id(), reason = %reason, "change unit failed");

        if let Err(record_err) = self.history.record_failure(unit.id(), &reason).await {
            error!(change_unit = unit.id(), error = %record_err, "failed to record change unit failure");
        }

        Err((ExecutionOutcome::Failed(reason), err))
    }
}

fn failed(err: MigrateError) -> (ExecutionOutcome, MigrateError) {
    (ExecutionOutcome::Failed(failure_reason(&err)), err)
}

/// Text recorded in the ledger for a unit that did not complete.
pub(crate) fn failure_reason(err: &MigrateError) -> String {
    match err {
        MigrateError::ExecutionFailure { reason, .. }
        | MigrateError::RollbackFailure { reason, .. } => reason.to_owned(),
        MigrateError::Cancelled => "cancelled".to_owned(),
        other => other.to_string(),
    }
}
