use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    engine::Engine,
    error::{Result, StoreError},
    query::{Filter, Update, ID_FIELD},
    store::{document_id, Store},
    validator::Validator,
};

/// PostgreSQL engine. All collections share one JSONB table keyed by
/// `(collection, id)`; `seq` keeps insertion order.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    prefix: Option<String>,
}

impl PgStore {
    pub fn new(pool: &PgPool) -> Store {
        Store::new(Self {
            pool: pool.clone(),
            prefix: None,
        })
    }

    pub fn with_prefix(pool: &PgPool, prefix: impl Into<String>) -> Store {
        Store::new(Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        })
    }

    pub fn table(&self, name: impl Into<String>) -> String {
        format!(
            "{}_{}",
            self.prefix.as_ref().unwrap_or(&"dm".to_owned()),
            name.into()
        )
    }

    pub fn table_document(&self) -> String {
        self.table("document")
    }

    pub fn table_validator(&self) -> String {
        self.table("validator")
    }

    pub fn table_index(&self) -> String {
        self.table("index")
    }

    fn index_name(&self, collection: &str, field: &str) -> String {
        format!("{}_{collection}_{field}_idx", self.table_document())
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    if filter.is_empty() {
        return;
    }

    let containments = filter.containments();

    if containments.is_empty() {
        builder.push(" AND FALSE");
        return;
    }

    builder.push(" AND (");
    let mut separated = builder.separated(" OR ");
    for containment in containments {
        separated.push("data @> ");
        separated.push_bind_unseparated(containment);
        separated.push_unseparated("::jsonb");
    }
    builder.push(")");
}

fn valid_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_owned()))
    }
}

#[async_trait]
impl Engine for PgStore {
    async fn init(&self) -> Result<()> {
        let table_document = self.table_document();
        let table_validator = self.table_validator();
        let table_index = self.table_index();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&table_document)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table_document} (
                    seq BIGSERIAL NOT NULL,
                    collection VARCHAR(255) NOT NULL,
                    id VARCHAR(255) NOT NULL,
                    data JSONB NOT NULL,
                    PRIMARY KEY (collection, id)
                )
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table_validator} (
                    collection VARCHAR(255) PRIMARY KEY,
                    rule JSONB NOT NULL,
                    level VARCHAR(16) NOT NULL,
                    action VARCHAR(16) NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table_index} (
                    collection VARCHAR(255) NOT NULL,
                    field VARCHAR(255) NOT NULL,
                    PRIMARY KEY (collection, field)
                )
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn insert(&self, collection: &str, documents: Vec<Value>) -> Result<()> {
        let table_document = self.table_document();
        let mut tx = self.pool.begin().await?;

        for document in documents {
            let id = document_id(&document)?;

            let inserted = sqlx::query(
                format!(
                    r#"
                    INSERT INTO {table_document} (collection, id, data)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (collection, id) DO NOTHING
                    "#
                )
                .as_str(),
            )
            .bind(collection)
            .bind(&id)
            .bind(document)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 0 {
                tx.rollback().await?;

                return Err(StoreError::DuplicateKey {
                    collection: collection.to_owned(),
                    id,
                });
            }
        }

        tx.commit().await?;

        Ok(())
    }

    async fn upsert(&self, collection: &str, document: Value) -> Result<()> {
        let table_document = self.table_document();
        let id = document_id(&document)?;

        sqlx::query(
            format!(
                r#"
                INSERT INTO {table_document} (collection, id, data)
                VALUES ($1, $2, $3)
                ON CONFLICT (collection, id)
                DO
                    UPDATE SET data = EXCLUDED.data
                "#
            )
            .as_str(),
        )
        .bind(collection)
        .bind(id)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Value>> {
        let table_document = self.table_document();
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT data FROM {table_document} WHERE collection = "
        ));
        builder.push_bind(collection.to_owned());
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY seq");

        let rows = builder
            .build_query_as::<(Value,)>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(data,)| data).collect())
    }

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64> {
        let table_document = self.table_document();

        let mut set = update.fields_to_set().clone();
        set.remove(ID_FIELD);
        let unset = update
            .fields_to_unset()
            .iter()
            .filter(|field| field.as_str() != ID_FIELD)
            .cloned()
            .collect::<Vec<String>>();

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("UPDATE {table_document} SET data = (data - "));
        builder.push_bind(unset);
        builder.push("::text[]) || ");
        builder.push_bind(Value::Object(set));
        builder.push("::jsonb WHERE collection = ");
        builder.push_bind(collection.to_owned());
        push_filter(&mut builder, filter);

        let matched = builder.build().execute(&self.pool).await?.rows_affected();

        Ok(matched)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Value,
    ) -> Result<bool> {
        let table_document = self.table_document();

        // The filter is repeated on the outer statement so a concurrent writer
        // that changed the row first makes this update match nothing.
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "UPDATE {table_document} SET data = "
        ));
        builder.push_bind(document);
        builder.push("::jsonb || jsonb_build_object('_id', id) WHERE collection = ");
        builder.push_bind(collection.to_owned());
        push_filter(&mut builder, filter);
        builder.push(format!(
            " AND seq = (SELECT seq FROM {table_document} WHERE collection = "
        ));
        builder.push_bind(collection.to_owned());
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY seq LIMIT 1)");

        let replaced = builder.build().execute(&self.pool).await?.rows_affected();

        Ok(replaced > 0)
    }

    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let table_document = self.table_document();
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("DELETE FROM {table_document} WHERE collection = "));
        builder.push_bind(collection.to_owned());
        push_filter(&mut builder, filter);

        let deleted = builder.build().execute(&self.pool).await?.rows_affected();

        Ok(deleted)
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let table_document = self.table_document();
        let table_validator = self.table_validator();
        let table_index = self.table_index();
        let mut tx = self.pool.begin().await?;

        sqlx::query(format!("DELETE FROM {table_document} WHERE collection = $1").as_str())
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        sqlx::query(format!("DELETE FROM {table_validator} WHERE collection = $1").as_str())
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        let fields = sqlx::query_as::<_, (String,)>(
            format!("DELETE FROM {table_index} WHERE collection = $1 RETURNING field").as_str(),
        )
        .bind(collection)
        .fetch_all(&mut *tx)
        .await?;

        for (field,) in fields {
            let index_name = self.index_name(collection, &field);
            sqlx::query(format!("DROP INDEX IF EXISTS {index_name}").as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        valid_name(collection)?;
        valid_name(field)?;

        let table_document = self.table_document();
        let table_index = self.table_index();
        let index_name = self.index_name(collection, field);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            format!(
                r#"
                CREATE INDEX IF NOT EXISTS {index_name}
                ON {table_document} ((data->>'{field}'))
                WHERE collection = '{collection}'
                "#
            )
            .as_str(),
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            format!(
                r#"
                INSERT INTO {table_index} (collection, field)
                VALUES ($1, $2)
                ON CONFLICT (collection, field) DO NOTHING
                "#
            )
            .as_str(),
        )
        .bind(collection)
        .bind(field)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<String>> {
        let table_index = self.table_index();
        let fields = sqlx::query_as::<_, (String,)>(
            format!("SELECT field FROM {table_index} WHERE collection = $1 ORDER BY field")
                .as_str(),
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        Ok(fields.into_iter().map(|(field,)| field).collect())
    }

    async fn apply_validator(&self, collection: &str, validator: Validator) -> Result<()> {
        let table_validator = self.table_validator();

        sqlx::query(
            format!(
                r#"
                INSERT INTO {table_validator} (collection, rule, level, action, updated_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (collection)
                DO
                    UPDATE SET rule = $2, level = $3, action = $4, updated_at = now()
                "#
            )
            .as_str(),
        )
        .bind(collection)
        .bind(validator.rule)
        .bind(validator.level.as_str())
        .bind(validator.action.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn validator(&self, collection: &str) -> Result<Option<Validator>> {
        let table_validator = self.table_validator();
        let row = sqlx::query_as::<_, (Value, String, String)>(
            format!("SELECT rule, level, action FROM {table_validator} WHERE collection = $1")
                .as_str(),
        )
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        let Some((rule, level, action)) = row else {
            return Ok(None);
        };

        Ok(Some(Validator {
            rule,
            level: serde_json::from_value(Value::String(level))?,
            action: serde_json::from_value(Value::String(action))?,
        }))
    }
}
