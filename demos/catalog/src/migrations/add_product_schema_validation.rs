use docmigrate::{ChangeUnit, Store, ValidationAction, ValidationLevel};
use serde_json::json;
use tracing::info;

use super::schema;
use crate::product::PRODUCTS;

pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("add-product-schema-validation", "004", "admin")
        .content(schema::initial().to_string())
        .execute(execute)
        .rollback(rollback)
}

async fn execute(store: Store) -> anyhow::Result<()> {
    store
        .apply_validator(
            PRODUCTS,
            schema::initial(),
            ValidationLevel::Moderate,
            ValidationAction::Error,
        )
        .await?;

    info!("schema validation added to products");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    store
        .apply_validator(PRODUCTS, json!({}), ValidationLevel::Off, ValidationAction::Error)
        .await?;

    info!("schema validation removed from products");

    Ok(())
}
