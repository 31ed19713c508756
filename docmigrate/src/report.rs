use crate::error::{MigrateError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Already executed with a matching checksum.
    Skipped,
    Executed,
    /// Execution started and did not succeed; holds the recorded reason.
    Failed(String),
    /// Not attempted because the run halted earlier or on this unit.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct UnitExecution {
    pub id: String,
    pub order: String,
    pub outcome: ExecutionOutcome,
}

/// Per-unit outcomes of a forward run, in plan order.
#[derive(Debug)]
pub struct ExecutionReport {
    pub executor_id: String,
    pub units: Vec<UnitExecution>,

    /// First error that halted the run.
    pub error: Option<MigrateError>,

    /// Failure to release the migration lock once the run was over.
    pub release_error: Option<MigrateError>,
}

impl ExecutionReport {
    pub(crate) fn new(executor_id: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
            units: Vec::new(),
            error: None,
            release_error: None,
        }
    }

    pub(crate) fn push(&mut self, id: &str, order: &str, outcome: ExecutionOutcome) {
        self.units.push(UnitExecution {
            id: id.to_owned(),
            order: order.to_owned(),
            outcome,
        });
    }

    pub fn outcome(&self, id: &str) -> Option<&ExecutionOutcome> {
        self.units
            .iter()
            .find(|unit| unit.id == id)
            .map(|unit| &unit.outcome)
    }

    pub fn executed(&self) -> Vec<&str> {
        self.ids_with(|outcome| outcome == &ExecutionOutcome::Executed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_with(|outcome| outcome == &ExecutionOutcome::Skipped)
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.ids_with(|outcome| outcome == &ExecutionOutcome::Blocked)
    }

    pub fn failed(&self) -> Option<&UnitExecution> {
        self.units
            .iter()
            .find(|unit| matches!(unit.outcome, ExecutionOutcome::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.release_error.is_none()
    }

    /// Turns the halting error, or else the release error, into `Err`.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take().or_else(|| self.release_error.take()) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    fn ids_with(&self, f: impl Fn(&ExecutionOutcome) -> bool) -> Vec<&str> {
        self.units
            .iter()
            .filter(|unit| f(&unit.outcome))
            .map(|unit| unit.id.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    RolledBack,
    /// Rollback started and did not succeed; the ledger entry is unchanged.
    Failed(String),
    /// No rollback logic, the rollback stopped here.
    Irreversible,
    /// Not attempted because the rollback halted on this unit or a later one.
    Untouched,
}

#[derive(Debug, Clone)]
pub struct UnitRollback {
    pub id: String,
    pub order: String,
    pub outcome: RollbackOutcome,
}

/// Per-unit outcomes of a rollback, in descending order.
#[derive(Debug)]
pub struct RollbackReport {
    pub executor_id: String,
    pub target: String,
    pub units: Vec<UnitRollback>,
    pub error: Option<MigrateError>,
    pub release_error: Option<MigrateError>,
}

impl RollbackReport {
    pub(crate) fn new(executor_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            executor_id: executor_id.into(),
            target: target.into(),
            units: Vec::new(),
            error: None,
            release_error: None,
        }
    }

    pub(crate) fn push(&mut self, id: &str, order: &str, outcome: RollbackOutcome) {
        self.units.push(UnitRollback {
            id: id.to_owned(),
            order: order.to_owned(),
            outcome,
        });
    }

    pub fn outcome(&self, id: &str) -> Option<&RollbackOutcome> {
        self.units
            .iter()
            .find(|unit| unit.id == id)
            .map(|unit| &unit.outcome)
    }

    pub fn rolled_back(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|unit| unit.outcome == RollbackOutcome::RolledBack)
            .map(|unit| unit.id.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.release_error.is_none()
    }

    /// Turns the halting error, or else the release error, into `Err`.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take().or_else(|| self.release_error.take()) {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
