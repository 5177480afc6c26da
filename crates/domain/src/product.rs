use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::commands::CreateProductCommand;
use crate::errors::DomainError;
use crate::slug::{unique_slug, SLUG_MAX_LEN};

/// A catalog product as stored in the primary store.
///
/// The same shape is cached as JSON under `product:{id}` and indexed as the
/// search document with id `id.to_string()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: f64,
    pub base_price: f64,
    pub discount: f64,
    pub image_url: String,
    pub meta_description: String,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub category_id: Option<i64>,
    pub store_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Identifier of this product's search document
    pub fn document_id(&self) -> String {
        self.id.to_string()
    }
}

/// Column values for an insert or a full update, before the store assigns
/// the id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub description: String,
    pub price: f64,
    pub base_price: f64,
    pub discount: f64,
    pub image_url: String,
    pub meta_description: String,
    pub stock_quantity: i32,
    pub is_active: bool,
    pub is_featured: bool,
    pub category_id: Option<i64>,
    pub store_id: i64,
}

impl NewProduct {
    /// Validate the command and derive the row, generating a fresh unique slug
    pub fn from_command(cmd: CreateProductCommand) -> Result<Self, DomainError> {
        cmd.validate()?;

        let product = Self {
            slug: unique_slug(&cmd.name),
            name: cmd.name,
            description: cmd.description,
            price: cmd.price,
            base_price: cmd.base_price,
            discount: cmd.discount,
            image_url: cmd.image_url,
            meta_description: cmd.meta_description,
            stock_quantity: cmd.stock_quantity,
            is_active: cmd.is_active,
            is_featured: cmd.is_featured,
            category_id: cmd.category_id,
            store_id: cmd.store_id,
        };

        let slug_len = product.slug.chars().count();
        if !(2..=SLUG_MAX_LEN).contains(&slug_len) {
            return Err(DomainError::ValidationError(format!(
                "slug must be between 2 and {} characters",
                SLUG_MAX_LEN
            )));
        }

        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laptop_command() -> CreateProductCommand {
        CreateProductCommand {
            name: "Laptop".to_string(),
            description: "15 inch".to_string(),
            price: 20000.0,
            base_price: 22000.0,
            discount: 10.0,
            image_url: String::new(),
            meta_description: String::new(),
            stock_quantity: 5,
            is_active: true,
            is_featured: false,
            category_id: None,
            store_id: 1,
        }
    }

    #[test]
    fn test_new_product_from_valid_command() {
        let product = NewProduct::from_command(laptop_command()).unwrap();

        assert_eq!(product.name, "Laptop");
        assert!(product.slug.starts_with("laptop-"));
        assert_eq!(product.price, 20000.0);
        assert_eq!(product.discount, 10.0);
        assert_eq!(product.store_id, 1);
    }

    #[test]
    fn test_new_product_rejects_invalid_command() {
        let mut cmd = laptop_command();
        cmd.price = 0.0;

        let result = NewProduct::from_command(cmd);
        assert!(matches!(result, Err(DomainError::ValidationError(_))));
    }

    #[test]
    fn test_product_document_id() {
        let now = Utc::now();
        let product = Product {
            id: 42,
            name: "Chair".to_string(),
            slug: "chair-0a1b2c3d".to_string(),
            description: String::new(),
            price: 100.0,
            base_price: 100.0,
            discount: 0.0,
            image_url: String::new(),
            meta_description: String::new(),
            stock_quantity: 1,
            is_active: true,
            is_featured: false,
            category_id: Some(3),
            store_id: 1,
            created_at: now,
            updated_at: now,
        };

        assert_eq!(product.document_id(), "42");
    }
}
