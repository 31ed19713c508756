#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document with `_id` {id} already exists in `{collection}`")]
    DuplicateKey { collection: String, id: String },

    #[error("document must be an object")]
    DocumentNotObject,

    #[error("document `_id` must be a string")]
    InvalidId,

    #[error("`{0}` is not a valid collection or field name")]
    InvalidName(String),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
