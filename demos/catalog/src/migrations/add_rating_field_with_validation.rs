use docmigrate::{ChangeUnit, Filter, Store, Update, ValidationAction, ValidationLevel};
use rand::Rng;
use tracing::info;

use super::schema;
use crate::product::{Product, PRODUCTS};

/// Ratings are random, so a re-run after a partial failure rates the
/// remaining products differently. Every write is a plain `set`, which keeps
/// the unit safe to run again.
pub fn change_unit() -> ChangeUnit {
    ChangeUnit::new("add-rating-field-with-validation", "006", "admin")
        .content(schema::with_rating().to_string())
        .execute(execute)
        .rollback(rollback)
}

async fn execute(store: Store) -> anyhow::Result<()> {
    let products = store.find_as::<Product>(PRODUCTS, &Filter::all()).await?;

    let ratings = {
        let mut rng = rand::thread_rng();
        products
            .into_iter()
            .filter_map(|product| product.id)
            .map(|id| (id, (rng.gen_range(3.0..=5.0_f64) * 10.0).round() / 10.0))
            .collect::<Vec<_>>()
    };

    for (id, rating) in ratings.iter() {
        store
            .update(PRODUCTS, &Filter::by_id(id), &Update::new().set("rating", *rating))
            .await?;
    }

    store
        .apply_validator(
            PRODUCTS,
            schema::with_rating(),
            ValidationLevel::Strict,
            ValidationAction::Error,
        )
        .await?;

    info!(rated = ratings.len(), "rating added and validation made strict");

    Ok(())
}

async fn rollback(store: Store) -> anyhow::Result<()> {
    store
        .update(PRODUCTS, &Filter::all(), &Update::new().unset("rating"))
        .await?;

    store
        .apply_validator(
            PRODUCTS,
            schema::without_rating(),
            ValidationLevel::Moderate,
            ValidationAction::Error,
        )
        .await?;

    info!("rating removed and validation reverted to moderate");

    Ok(())
}
