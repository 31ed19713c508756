use docmigrate_store::Store;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    error::{MigrateError, Result},
    executor::failure_reason,
    history::{HistoryStore, MigrationRecord},
    lock::{LockGuard, LockManager},
    registry::Plan,
    report::{RollbackOutcome, RollbackReport},
};

/// Reverts executed units above a target order, newest first.
#[derive(Clone)]
pub struct RollbackEngine {
    pub(crate) store: Store,
    pub(crate) plan: Plan,
    pub(crate) history: HistoryStore,
    pub(crate) locks: LockManager,
    pub(crate) executor_id: String,
    pub(crate) cancel: CancellationToken,
}

impl RollbackEngine {
    /// Rolls back every executed unit with an order greater than `target`.
    /// Units at or below `target` are left as they are.
    pub async fn rollback_to(&self, target: &str) -> Result<RollbackReport> {
        self.store.init().await?;

        let guard = self.locks.lock().await?;
        let mut report = RollbackReport::new(&self.executor_id, target);

        if let Err(err) = self.walk(target, &guard, &mut report).await {
            report.error = Some(err);
        }

        if let Err(err) = guard.release().await {
            error!(error = %err, "failed to release migration lock");
            report.release_error = Some(err);
        }

        match &report.error {
            None => info!(
                to = target,
                rolled_back = report.rolled_back().len(),
                "rollback finished"
            ),
            Some(err) => error!(to = target, error = %err, "rollback halted"),
        }

        Ok(report)
    }

    async fn walk(
        &self,
        target: &str,
        guard: &LockGuard,
        report: &mut RollbackReport,
    ) -> Result<()> {
        let mut applied = self
            .history
            .list_applied()
            .await?
            .into_iter()
            .filter(|record| record.order.as_str() > target)
            .collect::<Vec<_>>();
        applied.reverse();

        info!(to = target, units = applied.len(), "rollback started");

        for (pos, record) in applied.iter().enumerate() {
            if let Err((outcome, err)) = self.step(record, guard).await {
                report.push(&record.change_unit_id, &record.order, outcome);

                for record in applied.iter().skip(pos + 1) {
                    report.push(&record.change_unit_id, &record.order, RollbackOutcome::Untouched);
                }

                return Err(err);
            }

            report.push(&record.change_unit_id, &record.order, RollbackOutcome::RolledBack);
        }

        Ok(())
    }

    async fn step(
        &self,
        record: &MigrationRecord,
        guard: &LockGuard,
    ) -> std::result::Result<(), (RollbackOutcome, MigrateError)> {
        let id = record.change_unit_id.as_str();

        if self.cancel.is_cancelled() {
            return Err((RollbackOutcome::Untouched, MigrateError::Cancelled));
        }

        let Some(unit) = self.plan.get(id) else {
            return Err((
                RollbackOutcome::Untouched,
                MigrateError::UnknownChangeUnit { id: id.to_owned() },
            ));
        };

        let current = unit.current_checksum();
        if !unit.is_run_always() && record.checksum != current {
            return Err((
                RollbackOutcome::Untouched,
                MigrateError::ChecksumMismatch {
                    id: id.to_owned(),
                    recorded: record.checksum.to_owned(),
                    current,
                },
            ));
        }

        if !unit.is_reversible() {
            return Err((
                RollbackOutcome::Irreversible,
                MigrateError::IrreversibleChangeUnit { id: id.to_owned() },
            ));
        }

        if let Err(err) = guard.ensure_held().await {
            return Err((RollbackOutcome::Untouched, err));
        }

        info!(change_unit = id, order = unit.order(), "rolling back change unit");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MigrateError::Cancelled),
            _ = guard.lost().cancelled() => Err(MigrateError::LockLost {
                owner_id: self.executor_id.to_owned(),
            }),
            result = unit.run_rollback(&self.store) => result.map_err(|err| {
                MigrateError::RollbackFailure {
                    id: id.to_owned(),
                    reason: format!("{err:#}"),
                }
            }),
        };

        if let Err(err) = result {
            let reason = failure_reason(&err);
            error!(change_unit = id, reason = %reason, "change unit rollback failed");

            return Err((RollbackOutcome::Failed(reason), err));
        }

        if let Err(err) = guard.ensure_held().await {
            error!(change_unit = id, error = %err, "lost migration lock during rollback");

            return Err((RollbackOutcome::Failed(failure_reason(&err)), err));
        }

        if let Err(err) = self.history.record_rollback(id).await {
            return Err((RollbackOutcome::Failed(err.to_string()), err));
        }

        info!(change_unit = id, "change unit rolled back");

        Ok(())
    }
}
