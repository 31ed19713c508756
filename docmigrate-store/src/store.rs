use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    query::{Filter, Update, ID_FIELD},
    validator::{ValidationAction, ValidationLevel, Validator},
};

/// Cloneable handle to a document store.
#[derive(Clone)]
pub struct Store {
    pub(crate) engine: Box<dyn Engine>,
}

impl Store {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
        }
    }

    pub async fn init(&self) -> Result<()> {
        self.engine.init().await
    }

    /// Inserts a document and returns its `_id`, generating one when missing.
    pub async fn insert_one<D: Serialize>(
        &self,
        collection: impl AsRef<str>,
        document: D,
    ) -> Result<String> {
        let (id, document) = to_document(document)?;
        self.engine
            .insert(collection.as_ref(), vec![document])
            .await?;

        Ok(id)
    }

    pub async fn insert_many<D: Serialize>(
        &self,
        collection: impl AsRef<str>,
        documents: Vec<D>,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(documents.len());
        let mut values = Vec::with_capacity(documents.len());

        for document in documents {
            let (id, document) = to_document(document)?;
            ids.push(id);
            values.push(document);
        }

        self.engine.insert(collection.as_ref(), values).await?;

        Ok(ids)
    }

    pub async fn upsert<D: Serialize>(&self, collection: impl AsRef<str>, document: D) -> Result<()> {
        let (_, document) = to_document(document)?;
        self.engine.upsert(collection.as_ref(), document).await
    }

    pub async fn find(&self, collection: impl AsRef<str>, filter: &Filter) -> Result<Vec<Value>> {
        self.engine.find(collection.as_ref(), filter).await
    }

    pub async fn find_as<D: DeserializeOwned>(
        &self,
        collection: impl AsRef<str>,
        filter: &Filter,
    ) -> Result<Vec<D>> {
        let documents = self.find(collection, filter).await?;
        let mut items = Vec::with_capacity(documents.len());

        for document in documents {
            items.push(serde_json::from_value(document)?);
        }

        Ok(items)
    }

    pub async fn find_one(
        &self,
        collection: impl AsRef<str>,
        filter: &Filter,
    ) -> Result<Option<Value>> {
        let documents = self.find(collection, filter).await?;

        Ok(documents.into_iter().next())
    }

    pub async fn update(
        &self,
        collection: impl AsRef<str>,
        filter: &Filter,
        update: &Update,
    ) -> Result<u64> {
        self.engine.update(collection.as_ref(), filter, update).await
    }

    pub async fn replace_one<D: Serialize>(
        &self,
        collection: impl AsRef<str>,
        filter: &Filter,
        document: D,
    ) -> Result<bool> {
        let mut document = serde_json::to_value(document)?;
        let Some(fields) = document.as_object_mut() else {
            return Err(StoreError::DocumentNotObject);
        };
        fields.remove(ID_FIELD);

        self.engine
            .replace_one(collection.as_ref(), filter, document)
            .await
    }

    pub async fn delete(&self, collection: impl AsRef<str>, filter: &Filter) -> Result<u64> {
        self.engine.delete(collection.as_ref(), filter).await
    }

    pub async fn drop_collection(&self, collection: impl AsRef<str>) -> Result<()> {
        self.engine.drop_collection(collection.as_ref()).await
    }

    pub async fn create_index(
        &self,
        collection: impl AsRef<str>,
        field: impl AsRef<str>,
    ) -> Result<()> {
        self.engine
            .create_index(collection.as_ref(), field.as_ref())
            .await
    }

    pub async fn indexes(&self, collection: impl AsRef<str>) -> Result<Vec<String>> {
        self.engine.indexes(collection.as_ref()).await
    }

    pub async fn apply_validator(
        &self,
        collection: impl AsRef<str>,
        rule: Value,
        level: ValidationLevel,
        action: ValidationAction,
    ) -> Result<()> {
        self.engine
            .apply_validator(
                collection.as_ref(),
                Validator {
                    rule,
                    level,
                    action,
                },
            )
            .await
    }

    pub async fn validator(&self, collection: impl AsRef<str>) -> Result<Option<Validator>> {
        self.engine.validator(collection.as_ref()).await
    }
}

fn to_document<D: Serialize>(document: D) -> Result<(String, Value)> {
    let mut document = serde_json::to_value(document)?;
    let Some(fields) = document.as_object_mut() else {
        return Err(StoreError::DocumentNotObject);
    };

    let id = match fields.get(ID_FIELD) {
        Some(Value::String(id)) => id.to_owned(),
        Some(_) => return Err(StoreError::InvalidId),
        None => {
            let id = Uuid::new_v4().to_string();
            fields.insert(ID_FIELD.to_owned(), Value::String(id.to_owned()));
            id
        }
    };

    Ok((id, document))
}

/// Reads the `_id` of a document already validated by [`Store`].
#[cfg_attr(not(any(feature = "memory", feature = "pg")), allow(dead_code))]
pub(crate) fn document_id(document: &Value) -> Result<String> {
    match document.get(ID_FIELD) {
        Some(Value::String(id)) => Ok(id.to_owned()),
        _ => Err(StoreError::InvalidId),
    }
}
