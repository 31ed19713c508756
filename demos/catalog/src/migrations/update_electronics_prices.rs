use chrono::Utc;
use docmigrate::{ChangeUnit, Filter, Store, Update};
use tracing::info;

use crate::product::{round_cents, Product, PRODUCTS};

const DISCOUNT: f64 = 0.9;

pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("update-electronics-prices", "003", "admin")
        .content("Electronics price * 0.9")
        .execute(execute)
        .rollback(rollback)
}

async fn reprice(store: &Store, price: impl Fn(f64) -> f64) -> anyhow::Result<usize> {
    let electronics = store
        .find_as::<Product>(PRODUCTS, &Filter::new().eq("category", "Electronics"))
        .await?;

    for product in electronics.iter() {
        let Some(id) = &product.id else {
            continue;
        };

        let update = Update::new()
            .set("price", price(product.price))
            .set("updatedAt", serde_json::to_value(Utc::now())?);

        store.update(PRODUCTS, &Filter::by_id(id), &update).await?;
    }

    Ok(electronics.len())
}

async fn execute(store: Store) -> anyhow::Result<()> {
    let updated = reprice(&store, |price| price * DISCOUNT).await?;

    info!(updated, "electronics prices discounted by 10%");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    let updated = reprice(&store, |price| round_cents(price / DISCOUNT)).await?;

    info!(updated, "electronics prices restored");

    Ok(())
}
