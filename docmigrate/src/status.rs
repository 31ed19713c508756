use std::collections::HashMap;

use crate::{
    error::Result,
    history::{HistoryStore, MigrationRecord, MigrationState},
    registry::Plan,
};

#[derive(Debug, Clone)]
pub struct UnitStatus {
    pub id: String,
    pub order: String,
    pub author: String,
    pub reversible: bool,
    pub record: Option<MigrationRecord>,
    pub checksum_mismatch: bool,
}

impl UnitStatus {
    pub fn state(&self) -> Option<MigrationState> {
        self.record.as_ref().map(|record| record.state)
    }

    pub fn is_applied(&self) -> bool {
        self.state() == Some(MigrationState::Executed)
    }
}

/// Ledger state of every planned unit, plus records of units no longer
/// registered.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub units: Vec<UnitStatus>,
    pub orphans: Vec<MigrationRecord>,
}

impl StatusReport {
    pub(crate) async fn collect(plan: &Plan, history: &HistoryStore) -> Result<Self> {
        let mut records = history
            .list()
            .await?
            .into_iter()
            .map(|record| (record.change_unit_id.to_owned(), record))
            .collect::<HashMap<_, _>>();

        let units = plan
            .iter()
            .map(|unit| {
                let record = records.remove(unit.id());
                let checksum_mismatch = record
                    .as_ref()
                    .map(|record| {
                        record.state == MigrationState::Executed
                            && !unit.is_run_always()
                            && record.checksum != unit.current_checksum()
                    })
                    .unwrap_or(false);

                UnitStatus {
                    id: unit.id().to_owned(),
                    order: unit.order().to_owned(),
                    author: unit.author().to_owned(),
                    reversible: unit.is_reversible(),
                    record,
                    checksum_mismatch,
                }
            })
            .collect();

        let mut orphans = records.into_values().collect::<Vec<_>>();
        orphans.sort_by(|a, b| a.order.cmp(&b.order));

        Ok(Self { units, orphans })
    }

    pub fn get(&self, id: &str) -> Option<&UnitStatus> {
        self.units.iter().find(|unit| unit.id == id)
    }

    /// Units a forward run would execute.
    pub fn pending(&self) -> Vec<&UnitStatus> {
        self.units.iter().filter(|unit| !unit.is_applied()).collect()
    }

    pub fn applied(&self) -> Vec<&UnitStatus> {
        self.units.iter().filter(|unit| unit.is_applied()).collect()
    }

    pub fn drifted(&self) -> Vec<&UnitStatus> {
        self.units
            .iter()
            .filter(|unit| unit.checksum_mismatch)
            .collect()
    }
}
