//! `$jsonSchema` validators installed on the products collection over time.

use serde_json::{json, Value};

const CATEGORIES: [&str; 5] = ["Electronics", "Furniture", "Appliances", "Office", "Home"];

fn name() -> Value {
    json!({ "bsonType": "string", "minLength": 3, "maxLength": 100 })
}

fn rating() -> Value {
    json!({ "bsonType": "double", "minimum": 0, "maximum": 5 })
}

fn schema(required: &[&str], properties: Value) -> Value {
    json!({
        "$jsonSchema": {
            "bsonType": "object",
            "required": required,
            "properties": properties,
        }
    })
}

pub fn initial() -> Value {
    schema(
        &["name", "price", "category", "stockQuantity"],
        json!({
            "name": {
                "bsonType": "string",
                "description": "Product name must be a string and is required",
                "minLength": 3,
                "maxLength": 100,
            },
            "description": {
                "bsonType": "string",
                "description": "Product description must be a string",
            },
            "price": {
                "bsonType": ["decimal", "double", "string"],
                "description": "Price must be a number and is required",
            },
            "category": {
                "bsonType": "string",
                "description": "Category must be a string and is required",
                "enum": CATEGORIES,
            },
            "stockQuantity": {
                "bsonType": "int",
                "description": "Stock quantity must be an integer and is required",
                "minimum": 0,
            },
        }),
    )
}

pub fn with_office() -> Value {
    schema(
        &["name", "price", "category", "stockQuantity"],
        json!({
            "name": name(),
            "description": { "bsonType": "string" },
            "price": { "bsonType": "decimal", "minimum": 0 },
            "category": { "bsonType": "string", "enum": CATEGORIES },
            "stockQuantity": { "bsonType": "int", "minimum": 0 },
            "rating": rating(),
        }),
    )
}

pub fn without_office() -> Value {
    schema(
        &["name", "price", "category", "stockQuantity"],
        json!({
            "name": name(),
            "description": { "bsonType": "string" },
            "price": { "bsonType": "decimal", "minimum": 0 },
            "category": {
                "bsonType": "string",
                "enum": ["Electronics", "Furniture", "Appliances"],
            },
            "stockQuantity": { "bsonType": "int", "minimum": 0 },
        }),
    )
}

pub fn with_rating() -> Value {
    schema(
        &["name", "price", "category", "stockQuantity", "rating"],
        json!({
            "name": name(),
            "description": { "bsonType": "string", "maxLength": 500 },
            "price": { "bsonType": ["decimal", "double", "string"] },
            "category": { "bsonType": "string", "enum": CATEGORIES },
            "stockQuantity": { "bsonType": "int", "minimum": 0, "maximum": 1000 },
            "rating": rating(),
        }),
    )
}

pub fn without_rating() -> Value {
    schema(
        &["name", "price", "category", "stockQuantity"],
        json!({
            "name": name(),
            "description": { "bsonType": "string" },
            "price": { "bsonType": ["decimal", "double", "string"] },
            "category": { "bsonType": "string", "enum": CATEGORIES },
            "stockQuantity": { "bsonType": "int", "minimum": 0 },
            "rating": rating(),
        }),
    )
}
