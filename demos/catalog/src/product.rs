use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PRODUCTS: &str = "products";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub category: String,
    pub stock_quantity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: &str, description: &str, price: f64, category: &str, stock: i32) -> Self {
        let now = Utc::now();

        Self {
            id: None,
            name: name.to_owned(),
            description: description.to_owned(),
            price,
            category: category.to_owned(),
            stock_quantity: stock,
            rating: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
