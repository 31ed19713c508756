mod add_more_products;
mod add_office_category_products;
mod add_product_schema_validation;
mod add_rating_field_with_validation;
mod initial_product_setup;
mod schema;
mod update_electronics_prices;

use docmigrate::Registry;

/// Every change unit of the catalog, registered explicitly.
pub fn registry() -> docmigrate::Result<Registry> {
    Registry::new()
        .with(initial_product_setup::change_unit())?
        .with(add_more_products::change_unit())?
        .with(update_electronics_prices::change_unit())?
        .with(add_product_schema_validation::change_unit())?
        .with(add_office_category_products::change_unit())?
        .with(add_rating_field_with_validation::change_unit())
}
