use docmigrate::{ChangeUnit, Filter, Store, ValidationAction, ValidationLevel};
use tracing::info;

use super::schema;
use crate::product::{Product, PRODUCTS};

pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("add-office-category-products", "005", "admin")
        .content(format!(
            "{}; Desk Lamp, Notebook Set, Pen Holder",
            schema::with_office()
        ))
        .execute(execute)
        .rollback(rollback)
}

async fn execute(store: Store) -> anyhow::Result<()> {
    store
        .apply_validator(
            PRODUCTS,
            schema::with_office(),
            ValidationLevel::Moderate,
            ValidationAction::Error,
        )
        .await?;

    store
        .insert_many(
            PRODUCTS,
            vec![
                Product::new(
                    "Desk Lamp",
                    "LED desk lamp with adjustable brightness",
                    34.99,
                    "Office",
                    50,
                ),
                Product::new("Notebook Set", "Premium notebook set (5 pack)", 15.99, "Office", 100),
                Product::new("Pen Holder", "Wooden desk organizer", 12.99, "Office", 60),
            ],
        )
        .await?;

    info!("office products added");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    let removed = store
        .delete(PRODUCTS, &Filter::new().eq("category", "Office"))
        .await?;

    store
        .apply_validator(
            PRODUCTS,
            schema::without_office(),
            ValidationLevel::Moderate,
            ValidationAction::Error,
        )
        .await?;

    info!(removed, "office products removed and schema reverted");

    Ok(())
}
