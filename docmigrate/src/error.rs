use std::time::Duration;

use docmigrate_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    #[error("change unit {field} `{value}` is already registered")]
    DuplicateChangeUnit { field: &'static str, value: String },

    #[error("invalid change unit: {0}")]
    InvalidChangeUnit(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("migration lock is held by `{}`, gave up after {waited:?}", .owner.as_deref().unwrap_or("unknown"))]
    LockTimeout {
        owner: Option<String>,
        waited: Duration,
    },

    #[error("migration lock owned by `{owner_id}` was lost to another process")]
    LockLost { owner_id: String },

    #[error("change unit `{id}` changed since it was executed (recorded checksum {recorded}, current {current}); resolve the drift manually before running again")]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },

    #[error("change unit `{id}` failed: {reason}; the run is resumable from this unit once the cause is fixed")]
    ExecutionFailure { id: String, reason: String },

    #[error("change unit `{id}` has no rollback")]
    IrreversibleChangeUnit { id: String },

    #[error("rollback of change unit `{id}` failed: {reason}")]
    RollbackFailure { id: String, reason: String },

    #[error("change unit `{id}` is recorded in the history but not registered")]
    UnknownChangeUnit { id: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("store `{0}`")]
    Store(#[from] StoreError),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrateError>;
