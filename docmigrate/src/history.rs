use chrono::{DateTime, Utc};
use docmigrate_store::{Filter, Store, StoreError, Update};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{change_unit::ChangeUnit, error::Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    Pending,
    Executed,
    Failed,
    RolledBack,
}

/// Ledger entry of a change unit, keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    #[serde(rename = "_id")]
    pub change_unit_id: String,
    pub order: String,
    pub author: String,
    pub state: MigrationState,
    pub checksum: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub executor_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub record: MigrationRecord,

    /// Set when the record is executed under a checksum the registered unit
    /// no longer has.
    pub checksum_mismatch: bool,
}

#[derive(Clone)]
pub struct HistoryStore {
    store: Store,
    collection: String,
    executor_id: String,
}

impl HistoryStore {
    pub fn new(store: Store, collection: impl Into<String>, executor_id: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            executor_id: executor_id.into(),
        }
    }

    pub async fn get(&self, unit: &ChangeUnit) -> Result<Option<HistoryEntry>> {
        let Some(record) = self.find(unit.id()).await? else {
            return Ok(None);
        };

        let checksum_mismatch = record.state == MigrationState::Executed
            && !unit.is_run_always()
            && record.checksum != unit.current_checksum();

        Ok(Some(HistoryEntry {
            record,
            checksum_mismatch,
        }))
    }

    pub async fn find(&self, change_unit_id: &str) -> Result<Option<MigrationRecord>> {
        let record = self
            .store
            .find_one(&self.collection, &Filter::by_id(change_unit_id))
            .await?;

        match record {
            Some(record) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    /// Every record, sorted by order.
    pub async fn list(&self) -> Result<Vec<MigrationRecord>> {
        self.list_by(Filter::all()).await
    }

    /// Executed records, sorted by order.
    pub async fn list_applied(&self) -> Result<Vec<MigrationRecord>> {
        self.list_by(Filter::new().eq("state", state_value(MigrationState::Executed)?))
            .await
    }

    async fn list_by(&self, filter: Filter) -> Result<Vec<MigrationRecord>> {
        let mut records = self
            .store
            .find_as::<MigrationRecord>(&self.collection, &filter)
            .await?;
        records.sort_by(|a, b| a.order.cmp(&b.order));

        Ok(records)
    }

    pub async fn record_start(&self, unit: &ChangeUnit) -> Result<()> {
        let record = MigrationRecord {
            change_unit_id: unit.id().to_owned(),
            order: unit.order().to_owned(),
            author: unit.author().to_owned(),
            state: MigrationState::Pending,
            checksum: unit.current_checksum(),
            started_at: Utc::now(),
            finished_at: None,
            executor_id: self.executor_id.to_owned(),
            error: None,
        };

        self.store.upsert(&self.collection, record).await?;

        Ok(())
    }

    pub async fn record_success(&self, change_unit_id: &str, checksum: &str) -> Result<()> {
        let update = Update::new()
            .set("state", state_value(MigrationState::Executed)?)
            .set("checksum", checksum)
            .set("error", Value::Null);

        self.finish(change_unit_id, update).await
    }

    pub async fn record_failure(&self, change_unit_id: &str, reason: &str) -> Result<()> {
        let update = Update::new()
            .set("state", state_value(MigrationState::Failed)?)
            .set("error", reason);

        self.finish(change_unit_id, update).await
    }

    pub async fn record_rollback(&self, change_unit_id: &str) -> Result<()> {
        let update = Update::new()
            .set("state", state_value(MigrationState::RolledBack)?)
            .set("error", Value::Null);

        self.finish(change_unit_id, update).await
    }

    async fn finish(&self, change_unit_id: &str, update: Update) -> Result<()> {
        let update = update
            .set("finishedAt", serde_json::to_value(Utc::now())?)
            .set("executorId", self.executor_id.as_str());

        let matched = self
            .store
            .update(&self.collection, &Filter::by_id(change_unit_id), &update)
            .await?;

        if matched == 0 {
            return Err(StoreError::Any(anyhow::anyhow!(
                "no history record for change unit `{change_unit_id}`"
            ))
            .into());
        }

        Ok(())
    }
}

fn state_value(state: MigrationState) -> Result<Value> {
    Ok(serde_json::to_value(state)?)
}
