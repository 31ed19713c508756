use async_trait::async_trait;
use dyn_clone::DynClone;
use serde_json::Value;

use crate::{
    error::Result,
    query::{Filter, Update},
    validator::Validator,
};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// Storage backend behind a [`crate::Store`].
///
/// Every document handed to an engine is a JSON object carrying a string
/// `_id`; [`crate::Store`] guarantees both before delegating.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    /// Prepares backend storage. Must be idempotent and safe to call from
    /// several processes at once.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Inserts all documents or none; fails with `DuplicateKey` when an `_id`
    /// is already present.
    async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<()>;

    async fn upsert(&self, collection: &str, document: Value) -> Result<()>;

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>>;

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64>;

    /// Atomically replaces the first document matching `filter`, keeping its
    /// `_id`. Returns `false` when nothing matched.
    async fn replace_one(&self, collection: &str, filter: &Filter, document: Value)
        -> Result<bool>;

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64>;

    async fn drop_collection(&self, collection: &str) -> Result<()>;

    async fn create_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Fields indexed on `collection`, sorted.
    async fn indexes(&self, collection: &str) -> Result<Vec<String>>;

    async fn apply_validator(&self, collection: &str, validator: Validator) -> Result<()>;

    async fn validator(&self, collection: &str) -> Result<Option<Validator>>;
}

dyn_clone::clone_trait_object!(Engine);
