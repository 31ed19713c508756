use docmigrate::{ChangeUnit, Filter, Store};
use tracing::info;

use crate::product::{Product, PRODUCTS};

const NAMES: [&str; 4] = ["Standing Desk", "Monitor", "Keyboard", "Bookshelf"];

pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("add-more-products", "002", "admin")
        .content(NAMES.join(", "))
        .execute(execute)
        .rollback(rollback)
}

async fn execute(store: Store) -> anyhow::Result<()> {
    store
        .insert_many(
            PRODUCTS,
            vec![
                Product::new("Standing Desk", "Adjustable height desk", 599.99, "Furniture", 10),
                Product::new("Monitor", "27-inch 4K monitor", 449.99, "Electronics", 18),
                Product::new("Keyboard", "Mechanical gaming keyboard", 129.99, "Electronics", 35),
                Product::new("Bookshelf", "5-tier wooden bookshelf", 149.99, "Furniture", 12),
            ],
        )
        .await?;

    info!("additional products added");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    let removed = store
        .delete(PRODUCTS, &Filter::new().is_in("name", NAMES))
        .await?;

    info!(removed, "additional products removed");

    Ok(())
}
