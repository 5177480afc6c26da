use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewProduct, Product};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};

use crate::{ProductRepository, StoreError};

const PRODUCT_COLUMNS: &str = "id, name, slug, description, price, base_price, discount, \
     image_url, meta_description, stock_quantity, is_active, is_featured, \
     category_id, store_id, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ProductRow {
    id: i64,
    name: String,
    slug: String,
    description: String,
    price: f64,
    base_price: f64,
    discount: f64,
    image_url: String,
    meta_description: String,
    stock_quantity: i32,
    is_active: bool,
    is_featured: bool,
    category_id: Option<i64>,
    store_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            slug: row.slug,
            description: row.description,
            price: row.price,
            base_price: row.base_price,
            discount: row.discount,
            image_url: row.image_url,
            meta_description: row.meta_description,
            stock_quantity: row.stock_quantity,
            is_active: row.is_active,
            is_featured: row.is_featured,
            category_id: row.category_id,
            store_id: row.store_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL implementation of ProductRepository
pub struct PostgresProductRepository {
    pool: PgPool,
}

impl PostgresProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn list_all(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products ORDER BY id",
            PRODUCT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        debug!("Loaded {} products", rows.len());
        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Product, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Product::from).ok_or(StoreError::NotFound {
            entity: "product",
            id,
        })
    }

    async fn insert(&self, product: &NewProduct) -> Result<Product, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            INSERT INTO products (
                name, slug, description, price, base_price, discount, image_url,
                meta_description, stock_quantity, is_active, is_featured, category_id, store_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.base_price)
        .bind(product.discount)
        .bind(&product.image_url)
        .bind(&product.meta_description)
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(product.category_id)
        .bind(product.store_id)
        .fetch_one(&self.pool)
        .await?;

        info!(product_id = row.id, slug = %row.slug, "Inserted product");
        Ok(row.into())
    }

    async fn update(&self, id: i64, product: &NewProduct) -> Result<Product, StoreError> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            r#"
            UPDATE products
            SET name = $1, slug = $2, description = $3, price = $4, base_price = $5,
                discount = $6, image_url = $7, meta_description = $8, stock_quantity = $9,
                is_active = $10, is_featured = $11, category_id = $12, store_id = $13,
                updated_at = NOW()
            WHERE id = $14
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        ))
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.description)
        .bind(product.price)
        .bind(product.base_price)
        .bind(product.discount)
        .bind(&product.image_url)
        .bind(&product.meta_description)
        .bind(product.stock_quantity)
        .bind(product.is_active)
        .bind(product.is_featured)
        .bind(product.category_id)
        .bind(product.store_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                info!(product_id = id, "Updated product");
                Ok(row.into())
            }
            None => Err(StoreError::NotFound {
                entity: "product",
                id,
            }),
        }
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "product",
                id,
            });
        }

        info!(product_id = id, "Deleted product");
        Ok(())
    }
}
