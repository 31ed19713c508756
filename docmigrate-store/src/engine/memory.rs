use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    query::{Filter, Update, ID_FIELD},
    store::{document_id, Store},
    validator::Validator,
};

#[derive(Debug, Default)]
struct Collections {
    documents: HashMap<String, Vec<Value>>,
    validators: HashMap<String, Validator>,
    indexes: HashMap<String, BTreeSet<String>>,
}

/// In-process engine. Every operation runs under one write or read lock, so
/// `insert` and `replace_one` are atomic with respect to each other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore(Arc<RwLock<Collections>>);

impl MemoryStore {
    pub fn new() -> Store {
        Store::new(Self::default())
    }
}

#[async_trait]
impl Engine for MemoryStore {
    async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut data = self.0.write();
        let existing = data.documents.entry(collection.to_owned()).or_default();

        let mut ids = BTreeSet::new();
        for document in existing.iter() {
            ids.insert(document_id(document)?);
        }

        for document in documents.iter() {
            let id = document_id(document)?;

            if !ids.insert(id.to_owned()) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_owned(),
                    id,
                });
            }
        }

        existing.extend(documents);

        Ok(())
    }

    async fn upsert(&self, collection: &str, document: Value) -> Result<()> {
        let id = document_id(&document)?;
        let mut data = self.0.write();
        let existing = data.documents.entry(collection.to_owned()).or_default();

        let position = existing
            .iter()
            .position(|d| d.get(ID_FIELD).and_then(Value::as_str) == Some(id.as_str()));

        match position {
            Some(position) => existing[position] = document,
            None => existing.push(document),
        }

        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let data = self.0.read();
        let Some(documents) = data.documents.get(collection) else {
            return Ok(vec![]);
        };

        Ok(documents
            .iter()
            .filter(|document| filter.matches(document))
            .cloned()
            .collect())
    }

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64> {
        let mut data = self.0.write();
        let Some(documents) = data.documents.get_mut(collection) else {
            return Ok(0);
        };

        let mut matched = 0;

        for document in documents.iter_mut() {
            if !filter.matches(document) {
                continue;
            }

            if let Some(fields) = document.as_object_mut() {
                update.apply(fields);
                matched += 1;
            }
        }

        Ok(matched)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        mut document: Value,
    ) -> Result<bool> {
        let mut data = self.0.write();
        let Some(documents) = data.documents.get_mut(collection) else {
            return Ok(false);
        };

        let Some(current) = documents.iter_mut().find(|d| filter.matches(d)) else {
            return Ok(false);
        };

        let id = document_id(current)?;
        let Some(fields) = document.as_object_mut() else {
            return Err(StoreError::DocumentNotObject);
        };
        fields.insert(ID_FIELD.to_owned(), Value::String(id));
        *current = document;

        Ok(true)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut data = self.0.write();
        let Some(documents) = data.documents.get_mut(collection) else {
            return Ok(0);
        };

        let before = documents.len();
        documents.retain(|document| !filter.matches(document));

        Ok((before - documents.len()) as u64)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut data = self.0.write();
        data.documents.remove(collection);
        data.validators.remove(collection);
        data.indexes.remove(collection);

        Ok(())
    }

    async fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        self.0
            .write()
            .indexes
            .entry(collection.to_owned())
            .or_default()
            .insert(field.to_owned());

        Ok(())
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .0
            .read()
            .indexes
            .get(collection)
            .map(|fields| fields.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn apply_validator(&self, collection: &str, validator: Validator) -> Result<()> {
        self.0
            .write()
            .validators
            .insert(collection.to_owned(), validator);

        Ok(())
    }

    async fn validator(&self, collection: &str) -> Result<Option<Validator>> {
        Ok(self.0.read().validators.get(collection).cloned())
    }
}
