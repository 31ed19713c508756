use docmigrate::{ChangeUnit, Store};
use tracing::info;

use crate::product::{Product, PRODUCTS};

pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("initial-product-setup", "001", "admin")
        .content("indexes on category and name; Laptop, Smartphone, Desk Chair, Coffee Maker, Headphones")
        .execute(execute)
        .rollback(rollback)
}

async fn execute(store: Store) -> anyhow::Result<()> {
    store.create_index(PRODUCTS, "category").await?;
    store.create_index(PRODUCTS, "name").await?;

    store
        .insert_many(
            PRODUCTS,
            vec![
                Product::new("Laptop", "High-performance laptop", 1299.99, "Electronics", 15),
                Product::new("Smartphone", "Latest model smartphone", 899.99, "Electronics", 30),
                Product::new("Desk Chair", "Ergonomic office chair", 249.99, "Furniture", 20),
                Product::new("Coffee Maker", "Automatic coffee machine", 89.99, "Appliances", 40),
                Product::new("Headphones", "Noise-canceling headphones", 199.99, "Electronics", 25),
            ],
        )
        .await?;

    info!("initial products created");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    store.drop_collection(PRODUCTS).await?;

    info!("products collection dropped");

    Ok(())
}
