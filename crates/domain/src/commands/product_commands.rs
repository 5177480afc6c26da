use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request body for creating or fully replacing a product.
///
/// The slug is never client-supplied; it is derived from `name`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductCommand {
    #[validate(length(min = 2, max = 255, message = "Name must be between 2 and 255 characters"))]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[validate(range(min = 0.01, max = 1_000_000.0, message = "Price must be between 0.01 and 1000000"))]
    pub price: f64,

    #[serde(default)]
    pub base_price: f64,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0, message = "Discount must be between 0 and 100"))]
    pub discount: f64,

    #[serde(default)]
    pub image_url: String,

    #[serde(default)]
    pub meta_description: String,

    #[serde(default)]
    pub stock_quantity: i32,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub is_featured: bool,

    #[serde(default)]
    pub category_id: Option<i64>,

    pub store_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, price: f64, discount: f64) -> CreateProductCommand {
        CreateProductCommand {
            name: name.to_string(),
            description: String::new(),
            price,
            base_price: price,
            discount,
            image_url: String::new(),
            meta_description: String::new(),
            stock_quantity: 10,
            is_active: true,
            is_featured: false,
            category_id: None,
            store_id: 1,
        }
    }

    #[test]
    fn test_create_product_command_validation() {
        assert!(command("Gaming Mouse", 500.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_name_too_short_fails() {
        assert!(command("M", 500.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_name_too_long_fails() {
        assert!(command(&"x".repeat(256), 500.0, 0.0).validate().is_err());
    }

    #[test]
    fn test_price_bounds() {
        assert!(command("Mouse", 0.0, 0.0).validate().is_err());
        assert!(command("Mouse", -5.0, 0.0).validate().is_err());
        assert!(command("Mouse", 1_000_000.0, 0.0).validate().is_ok());
        assert!(command("Mouse", 1_000_000.01, 0.0).validate().is_err());
    }

    #[test]
    fn test_discount_bounds() {
        assert!(command("Mouse", 10.0, 100.0).validate().is_ok());
        assert!(command("Mouse", 10.0, -1.0).validate().is_err());
        assert!(command("Mouse", 10.0, 100.5).validate().is_err());
    }

    #[test]
    fn test_optional_fields_default_when_absent() {
        let cmd: CreateProductCommand = serde_json::from_value(serde_json::json!({
            "name": "Laptop",
            "price": 20000.0,
            "store_id": 1
        }))
        .unwrap();

        assert_eq!(cmd.discount, 0.0);
        assert_eq!(cmd.stock_quantity, 0);
        assert!(cmd.category_id.is_none());
        assert!(cmd.validate().is_ok());
    }
}
