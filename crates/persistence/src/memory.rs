//! In-memory repositories used by unit tests and local runs without a database.

use async_trait::async_trait;
use chrono::Utc;
use domain::{NewOrder, NewProduct, Order, OrderFilter, OrderStatus, Product};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::{OrderRepository, ProductRepository, ShipOutcome, StoreError};

fn unavailable() -> StoreError {
    StoreError::Unavailable("in-memory store marked unavailable".to_string())
}

#[derive(Default)]
pub struct InMemoryProductRepository {
    products: Mutex<BTreeMap<i64, Product>>,
    next_id: Mutex<i64>,
    reads: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of single-product reads served (`get_by_id` calls)
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.products.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, Product>>, StoreError> {
        self.products
            .lock()
            .map_err(|_| StoreError::Unavailable("product map poisoned".to_string()))
    }
}

#[async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn list_all(&self) -> Result<Vec<Product>, StoreError> {
        self.check_available()?;
        Ok(self.lock()?.values().cloned().collect())
    }

    async fn get_by_id(&self, id: i64) -> Result<Product, StoreError> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "product",
                id,
            })
    }

    async fn insert(&self, product: &NewProduct) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut products = self.lock()?;

        if products.values().any(|p| p.slug == product.slug) {
            return Err(StoreError::Conflict(format!(
                "slug {} already exists",
                product.slug
            )));
        }

        let id = {
            let mut next = self
                .next_id
                .lock()
                .map_err(|_| StoreError::Unavailable("id sequence poisoned".to_string()))?;
            *next += 1;
            *next
        };

        let now = Utc::now();
        let stored = Product {
            id,
            name: product.name.clone(),
            slug: product.slug.clone(),
            description: product.description.clone(),
            price: product.price,
            base_price: product.base_price,
            discount: product.discount,
            image_url: product.image_url.clone(),
            meta_description: product.meta_description.clone(),
            stock_quantity: product.stock_quantity,
            is_active: product.is_active,
            is_featured: product.is_featured,
            category_id: product.category_id,
            store_id: product.store_id,
            created_at: now,
            updated_at: now,
        };
        products.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: i64, product: &NewProduct) -> Result<Product, StoreError> {
        self.check_available()?;
        let mut products = self.lock()?;

        if products
            .values()
            .any(|p| p.id != id && p.slug == product.slug)
        {
            return Err(StoreError::Conflict(format!(
                "slug {} already exists",
                product.slug
            )));
        }

        let existing = products.get_mut(&id).ok_or(StoreError::NotFound {
            entity: "product",
            id,
        })?;

        existing.name = product.name.clone();
        existing.slug = product.slug.clone();
        existing.description = product.description.clone();
        existing.price = product.price;
        existing.base_price = product.base_price;
        existing.discount = product.discount;
        existing.image_url = product.image_url.clone();
        existing.meta_description = product.meta_description.clone();
        existing.stock_quantity = product.stock_quantity;
        existing.is_active = product.is_active;
        existing.is_featured = product.is_featured;
        existing.category_id = product.category_id;
        existing.store_id = product.store_id;
        existing.updated_at = Utc::now();

        Ok(existing.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                entity: "product",
                id,
            })
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: Mutex<BTreeMap<i64, Order>>,
    next_id: Mutex<i64>,
    ship_transitions: AtomicUsize,
    failing_ship_calls: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of Pending -> Shipped transitions actually applied
    pub fn ship_transitions(&self) -> usize {
        self.ship_transitions.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `mark_shipped` fail with a transient error
    pub fn fail_next_updates(&self, n: u32) {
        self.failing_ship_calls.store(n, Ordering::SeqCst);
    }

    /// Seed an order with an explicit id
    pub fn put(&self, order: Order) {
        if let Ok(mut orders) = self.orders.lock() {
            if let Ok(mut next) = self.next_id.lock() {
                *next = (*next).max(order.id);
            }
            orders.insert(order.id, order);
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<i64, Order>>, StoreError> {
        self.orders
            .lock()
            .map_err(|_| StoreError::Unavailable("order map poisoned".to_string()))
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &NewOrder) -> Result<Order, StoreError> {
        self.check_available()?;
        let mut orders = self.lock()?;

        let id = {
            let mut next = self
                .next_id
                .lock()
                .map_err(|_| StoreError::Unavailable("id sequence poisoned".to_string()))?;
            *next += 1;
            *next
        };

        let now = Utc::now();
        let stored = Order {
            id,
            user_id: order.user_id,
            total_price: order.total_price,
            status: order.status,
            created_at: now,
            updated_at: now,
        };
        orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> Result<Order, StoreError> {
        self.check_available()?;
        self.lock()?
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { entity: "order", id })
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        self.check_available()?;
        Ok(self
            .lock()?
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: i64, status: OrderStatus) -> Result<Order, StoreError> {
        self.check_available()?;
        let mut orders = self.lock()?;
        let order = orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "order", id })?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn update_total_price(&self, id: i64, total_price: f64) -> Result<Order, StoreError> {
        self.check_available()?;
        let mut orders = self.lock()?;
        let order = orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "order", id })?;
        order.total_price = total_price;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock()?
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "order", id })
    }

    async fn mark_shipped(&self, id: i64) -> Result<ShipOutcome, StoreError> {
        self.check_available()?;

        let failing = self
            .failing_ship_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable());
        }

        let mut orders = self.lock()?;
        let order = orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "order", id })?;

        if order.status == OrderStatus::Shipped {
            return Ok(ShipOutcome::AlreadyShipped(order.clone()));
        }

        order.status = OrderStatus::Shipped;
        order.updated_at = Utc::now();
        self.ship_transitions.fetch_add(1, Ordering::SeqCst);
        Ok(ShipOutcome::Shipped(order.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product(name: &str, slug: &str) -> NewProduct {
        NewProduct {
            name: name.to_string(),
            slug: slug.to_string(),
            description: String::new(),
            price: 10.0,
            base_price: 10.0,
            discount: 0.0,
            image_url: String::new(),
            meta_description: String::new(),
            stock_quantity: 1,
            is_active: true,
            is_featured: false,
            category_id: None,
            store_id: 1,
        }
    }

    fn pending(user_id: i64) -> NewOrder {
        NewOrder {
            user_id,
            total_price: 50.0,
            status: OrderStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_product_ids_are_assigned_in_order() {
        let repo = InMemoryProductRepository::new();
        let a = repo.insert(&new_product("Laptop", "laptop-1")).await.unwrap();
        let b = repo.insert(&new_product("Chair", "chair-1")).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        let all = repo.list_all().await.unwrap();
        assert_eq!(all.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_slug_is_conflict() {
        let repo = InMemoryProductRepository::new();
        repo.insert(&new_product("Laptop", "laptop")).await.unwrap();
        let err = repo.insert(&new_product("Laptop", "laptop")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_product() {
        let repo = InMemoryProductRepository::new();
        let err = repo.update(7, &new_product("X", "xx")).await.unwrap_err();
        assert!(err.is_not_found());
        let err = repo.delete(7).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_connectivity() {
        let repo = InMemoryProductRepository::new();
        repo.set_unavailable(true);
        let err = repo.list_all().await.unwrap_err();
        assert!(err.is_connectivity());
    }

    #[tokio::test]
    async fn test_mark_shipped_is_idempotent() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(&pending(3)).await.unwrap();

        let first = repo.mark_shipped(order.id).await.unwrap();
        let second = repo.mark_shipped(order.id).await.unwrap();

        assert!(matches!(first, ShipOutcome::Shipped(ref o) if o.status == OrderStatus::Shipped));
        assert!(matches!(second, ShipOutcome::AlreadyShipped(_)));
        assert_eq!(repo.ship_transitions(), 1);
    }

    #[tokio::test]
    async fn test_mark_shipped_unknown_order() {
        let repo = InMemoryOrderRepository::new();
        let err = repo.mark_shipped(42).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_ship_failures_are_consumed() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(&pending(3)).await.unwrap();
        repo.fail_next_updates(2);

        assert!(repo.mark_shipped(order.id).await.unwrap_err().is_connectivity());
        assert!(repo.mark_shipped(order.id).await.is_err());
        assert!(repo.mark_shipped(order.id).await.is_ok());
        assert_eq!(repo.ship_transitions(), 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_user_and_status() {
        let repo = InMemoryOrderRepository::new();
        let a = repo.insert(&pending(1)).await.unwrap();
        repo.insert(&pending(2)).await.unwrap();
        repo.insert(&pending(1)).await.unwrap();
        repo.mark_shipped(a.id).await.unwrap();

        let user_one = repo
            .list(&OrderFilter {
                user_id: Some(1),
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(user_one.len(), 2);

        let shipped = repo
            .list(&OrderFilter {
                user_id: None,
                status: Some(OrderStatus::Shipped),
            })
            .await
            .unwrap();
        assert_eq!(shipped.len(), 1);
        assert_eq!(shipped[0].id, a.id);
    }

    #[tokio::test]
    async fn test_update_total_keeps_status() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(&pending(4)).await.unwrap();
        repo.mark_shipped(order.id).await.unwrap();

        let updated = repo.update_total_price(order.id, 75.5).await.unwrap();
        assert_eq!(updated.total_price, 75.5);
        assert_eq!(updated.status, OrderStatus::Shipped);
        assert_eq!(repo.get_by_id(order.id).await.unwrap().total_price, 75.5);
    }

    #[tokio::test]
    async fn test_delete_order() {
        let repo = InMemoryOrderRepository::new();
        let order = repo.insert(&pending(4)).await.unwrap();

        repo.delete(order.id).await.unwrap();
        assert!(repo.get_by_id(order.id).await.unwrap_err().is_not_found());
        assert!(repo.delete(order.id).await.unwrap_err().is_not_found());
        assert!(repo.update_total_price(order.id, 1.0).await.unwrap_err().is_not_found());
    }
}
