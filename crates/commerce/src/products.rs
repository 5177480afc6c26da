use common::metrics::{
    record_cache_lookup, record_operation_duration, record_search_operation, CacheLookup,
};
use domain::{CreateProductCommand, NewProduct, Product};
use persistence::ProductRepository;
use read_model::{product_cache_key, CacheStore, SearchIndex};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::errors::ServiceError;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Outcome of a full search index resync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub pruned: u64,
}

/// Keeps the primary store, the product cache and the search index in step.
///
/// The store is authoritative. The cache is filled on read and invalidated on
/// write. The index is written on create and on resync only, so updates and
/// deletes stay invisible to search until the next resync.
pub struct ProductCoordinator {
    repository: Arc<dyn ProductRepository>,
    cache: Arc<dyn CacheStore>,
    search: Arc<dyn SearchIndex>,
    cache_ttl: Duration,
}

impl ProductCoordinator {
    pub fn new(
        repository: Arc<dyn ProductRepository>,
        cache: Arc<dyn CacheStore>,
        search: Arc<dyn SearchIndex>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            search,
            cache_ttl,
        }
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, ServiceError> {
        let start = Instant::now();
        let products = self.repository.list_all().await?;
        record_operation_duration("list_products", start.elapsed().as_secs_f64());
        Ok(products)
    }

    /// Cache-aside read of a single product
    pub async fn get_product(&self, id: i64) -> Result<Product, ServiceError> {
        let start = Instant::now();
        let key = product_cache_key(id);

        if let Some(product) = self.cached(&key).await {
            record_operation_duration("get_product", start.elapsed().as_secs_f64());
            return Ok(product);
        }

        let product = self.repository.get_by_id(id).await?;

        // The read succeeds whether or not the cache write does
        match serde_json::to_string(&product) {
            Ok(json) => {
                if let Err(e) = self.cache.set(&key, &json, self.cache_ttl).await {
                    warn!(product_id = id, error = %e, "Failed to populate product cache");
                }
            }
            Err(e) => error!(product_id = id, error = %e, "Failed to serialize product for cache"),
        }

        record_operation_duration("get_product", start.elapsed().as_secs_f64());
        Ok(product)
    }

    async fn cached(&self, key: &str) -> Option<Product> {
        match self.cache.get(key).await {
            Ok(Some(json)) => match serde_json::from_str::<Product>(&json) {
                Ok(product) => {
                    debug!(key, "Product cache hit");
                    record_cache_lookup(CacheLookup::Hit);
                    Some(product)
                }
                Err(e) => {
                    warn!(key, error = %e, "Discarding undecodable cached product");
                    record_cache_lookup(CacheLookup::Error);
                    None
                }
            },
            Ok(None) => {
                debug!(key, "Product cache miss");
                record_cache_lookup(CacheLookup::Miss);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "Product cache unavailable, reading from store");
                record_cache_lookup(CacheLookup::Error);
                None
            }
        }
    }

    /// Insert a product and index it. An indexing failure is logged and the
    /// product is still returned.
    pub async fn add_product(&self, cmd: CreateProductCommand) -> Result<Product, ServiceError> {
        let start = Instant::now();
        let new_product = NewProduct::from_command(cmd)?;
        let product = self.repository.insert(&new_product).await?;
        info!(product_id = product.id, slug = %product.slug, "Product created");

        self.index_product(&product).await;

        record_operation_duration("add_product", start.elapsed().as_secs_f64());
        Ok(product)
    }

    pub async fn update_product(
        &self,
        id: i64,
        cmd: CreateProductCommand,
    ) -> Result<Product, ServiceError> {
        let start = Instant::now();
        let new_product = NewProduct::from_command(cmd)?;
        let product = self.repository.update(id, &new_product).await?;

        self.invalidate(id).await;
        info!(product_id = id, "Product updated");

        record_operation_duration("update_product", start.elapsed().as_secs_f64());
        Ok(product)
    }

    pub async fn delete_product(&self, id: i64) -> Result<(), ServiceError> {
        let start = Instant::now();
        self.repository.delete(id).await?;

        self.invalidate(id).await;
        info!(product_id = id, "Product deleted");

        record_operation_duration("delete_product", start.elapsed().as_secs_f64());
        Ok(())
    }

    async fn invalidate(&self, id: i64) {
        if let Err(e) = self.cache.delete(&product_cache_key(id)).await {
            warn!(product_id = id, error = %e, "Failed to invalidate product cache");
        }
    }

    async fn index_product(&self, product: &Product) -> bool {
        match self.search.index(&product.document_id(), product).await {
            Ok(()) => {
                record_search_operation("index", true);
                true
            }
            Err(e) => {
                record_search_operation("index", false);
                error!(product_id = product.id, error = %e, "Failed to index product");
                false
            }
        }
    }

    /// Products ranked by the search index's relevance
    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, ServiceError> {
        if query.trim().is_empty() {
            return Err(ServiceError::Validation(
                "search query must not be empty".to_string(),
            ));
        }

        let start = Instant::now();
        let result = self.search.search(query).await;
        record_search_operation("search", result.is_ok());
        record_operation_duration("search_products", start.elapsed().as_secs_f64());

        let products = result?;
        debug!(query, hits = products.len(), "Product search");
        Ok(products)
    }

    /// Re-index every stored product, then drop documents for products that
    /// no longer exist. Per-product and prune failures are logged and counted;
    /// only a failure to read the store is an error.
    pub async fn sync_search_index(&self) -> Result<SyncReport, ServiceError> {
        let start = Instant::now();
        let products = self.repository.list_all().await?;

        let mut report = SyncReport {
            total: products.len(),
            ..SyncReport::default()
        };

        for product in &products {
            if self.index_product(product).await {
                report.indexed += 1;
            } else {
                report.failed += 1;
            }
        }

        let keep: Vec<String> = products.iter().map(Product::document_id).collect();
        match self.search.prune(&keep).await {
            Ok(pruned) => {
                record_search_operation("prune", true);
                report.pruned = pruned;
            }
            Err(e) => {
                record_search_operation("prune", false);
                error!(error = %e, "Failed to prune orphaned search documents");
            }
        }

        info!(
            total = report.total,
            indexed = report.indexed,
            failed = report.failed,
            pruned = report.pruned,
            "Search index resync finished"
        );
        record_operation_duration("sync_search_index", start.elapsed().as_secs_f64());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use persistence::{InMemoryProductRepository, StoreError};
    use read_model::{InMemoryCache, InMemorySearchIndex};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;
    use tokio_test::assert_ok;

    struct Fixture {
        repository: Arc<InMemoryProductRepository>,
        cache: Arc<InMemoryCache>,
        search: Arc<InMemorySearchIndex>,
        coordinator: ProductCoordinator,
    }

    fn fixture() -> Fixture {
        let repository = Arc::new(InMemoryProductRepository::new());
        let cache = Arc::new(InMemoryCache::new());
        let search = Arc::new(InMemorySearchIndex::new());
        let coordinator = ProductCoordinator::new(
            repository.clone(),
            cache.clone(),
            search.clone(),
            DEFAULT_CACHE_TTL,
        );

        Fixture {
            repository,
            cache,
            search,
            coordinator,
        }
    }

    fn command(name: &str, price: f64) -> CreateProductCommand {
        CreateProductCommand {
            name: name.to_string(),
            description: String::new(),
            price,
            base_price: price,
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

    #[tokio::test]
    async fn test_cold_read_fills_cache_and_warm_read_skips_store() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();

        let first = f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(f.repository.read_count(), 1);
        assert_eq!(f.cache.set_count(), 1);

        let second = f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(f.repository.read_count(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_update_invalidates_cached_value() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        f.coordinator.get_product(product.id).await.unwrap();

        f.coordinator
            .update_product(product.id, command("Laptop Pro", 1800.0))
            .await
            .unwrap();
        assert!(!f.cache.contains(&product_cache_key(product.id)));

        let fetched = f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(fetched.name, "Laptop Pro");
        assert_eq!(fetched.price, 1800.0);
        assert!(fetched.slug.starts_with("laptop-pro-"));
    }

    #[tokio::test]
    async fn test_delete_invalidates_cached_value() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Chair", 80.0)).await.unwrap();
        f.coordinator.get_product(product.id).await.unwrap();

        f.coordinator.delete_product(product.id).await.unwrap();

        let err = f.coordinator.get_product(product.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_product_is_not_cached() {
        let f = fixture();
        let err = f.coordinator.get_product(404).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(f.cache.set_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_triggers_fresh_store_read() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();

        f.coordinator.get_product(product.id).await.unwrap();
        tokio::time::advance(Duration::from_secs(599)).await;
        f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(f.repository.read_count(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(f.repository.read_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_outage_falls_back_to_store() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        f.cache.set_unavailable(true);

        let fetched = assert_ok!(f.coordinator.get_product(product.id).await);
        assert_eq!(fetched.id, product.id);
        assert_eq!(f.repository.read_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_treated_as_miss() {
        let f = fixture();
        let product = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        f.cache
            .set(&product_cache_key(product.id), "not json", DEFAULT_CACHE_TTL)
            .await
            .unwrap();

        let fetched = f.coordinator.get_product(product.id).await.unwrap();
        assert_eq!(fetched, product);
        assert_eq!(f.repository.read_count(), 1);
    }

    #[tokio::test]
    async fn test_add_product_survives_index_failure() {
        let f = fixture();
        f.search.set_failing(true);

        let product = assert_ok!(f.coordinator.add_product(command("Laptop", 1500.0)).await);
        assert_eq!(f.coordinator.list_products().await.unwrap().len(), 1);
        assert!(f.search.document(&product.document_id()).is_none());

        f.search.set_failing(false);
        let report = f.coordinator.sync_search_index().await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(
            f.coordinator.search_products("Laptop").await.unwrap()[0].id,
            product.id
        );
    }

    #[tokio::test]
    async fn test_add_product_rejects_invalid_input() {
        let f = fixture();

        let err = f.coordinator.add_product(command("X", 10.0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = f.coordinator.add_product(command("Desk", 0.0)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(f.repository.is_empty());
    }

    #[tokio::test]
    async fn test_updates_and_deletes_leave_index_stale_until_resync() {
        let f = fixture();
        let laptop = f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        let chair = f.coordinator.add_product(command("Chair", 80.0)).await.unwrap();

        f.coordinator
            .update_product(laptop.id, command("Notebook", 1400.0))
            .await
            .unwrap();
        f.coordinator.delete_product(chair.id).await.unwrap();

        // Index still holds the pre-update and the deleted documents
        let stale = f.search.document(&laptop.document_id()).unwrap();
        assert_eq!(stale.name, "Laptop");
        assert!(f.search.document(&chair.document_id()).is_some());
        assert_eq!(f.coordinator.search_products("Laptop").await.unwrap().len(), 1);

        let report = f.coordinator.sync_search_index().await.unwrap();
        assert_eq!(
            report,
            SyncReport {
                total: 1,
                indexed: 1,
                failed: 0,
                pruned: 1,
            }
        );
        assert_eq!(f.search.document(&laptop.document_id()).unwrap().name, "Notebook");
        assert!(f.search.document(&chair.document_id()).is_none());
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let f = fixture();
        for name in ["Laptop", "Chair", "Desk"] {
            f.coordinator.add_product(command(name, 100.0)).await.unwrap();
        }

        f.coordinator.sync_search_index().await.unwrap();
        let first = f.search.document_ids();
        let report = f.coordinator.sync_search_index().await.unwrap();
        let second = f.search.document_ids();

        assert_eq!(first, second);
        assert_eq!(first, vec!["1", "2", "3"]);
        assert_eq!(report.pruned, 0);
    }

    #[tokio::test]
    async fn test_resync_counts_failures_and_still_succeeds() {
        let f = fixture();
        f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        f.search.set_failing(true);

        let report = assert_ok!(f.coordinator.sync_search_index().await);
        assert_eq!(report.total, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pruned, 0);
    }

    #[tokio::test]
    async fn test_search_substring_matches_only_related_products() {
        let f = fixture();
        f.coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        f.coordinator.add_product(command("Chair", 80.0)).await.unwrap();

        let hits = f.coordinator.search_products("lap").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Laptop");
    }

    #[tokio::test]
    async fn test_blank_search_is_rejected() {
        let f = fixture();
        let err = f.coordinator.search_products("   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_outage_is_downstream_error() {
        let f = fixture();
        f.search.set_failing(true);
        let err = f.coordinator.search_products("lap").await.unwrap_err();
        assert!(matches!(err, ServiceError::DownstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_laptop_round_trip() {
        let f = fixture();
        let before = f.coordinator.list_products().await.unwrap().len();

        let created = f
            .coordinator
            .add_product(CreateProductCommand {
                discount: 10.0,
                stock_quantity: 5,
                ..command("Laptop", 20000.0)
            })
            .await
            .unwrap();

        assert!(created.id > 0);
        assert!(created.created_at.timestamp() > 0);
        assert!(created.updated_at.timestamp() > 0);
        assert_eq!(f.coordinator.list_products().await.unwrap().len(), before + 1);

        let fetched = f.coordinator.get_product(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.price, 20000.0);
        assert_eq!(fetched.discount, 10.0);
        assert_eq!(fetched.stock_quantity, 5);
        assert_eq!(fetched.store_id, 1);
    }

    mock! {
        pub Repo {}

        #[async_trait]
        impl ProductRepository for Repo {
            async fn list_all(&self) -> Result<Vec<Product>, StoreError>;
            async fn get_by_id(&self, id: i64) -> Result<Product, StoreError>;
            async fn insert(&self, product: &NewProduct) -> Result<Product, StoreError>;
            async fn update(&self, id: i64, product: &NewProduct) -> Result<Product, StoreError>;
            async fn delete(&self, id: i64) -> Result<(), StoreError>;
        }
    }

    fn stored_product(id: i64) -> Product {
        let now = chrono::Utc::now();
        Product {
            id,
            name: "Laptop".to_string(),
            slug: "laptop-0a1b2c3d".to_string(),
            description: String::new(),
            price: 1500.0,
            base_price: 1500.0,
            discount: 0.0,
            image_url: String::new(),
            meta_description: String::new(),
            stock_quantity: 1,
            is_active: true,
            is_featured: false,
            category_id: None,
            store_id: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_repeated_reads_hit_store_exactly_once() {
        let mut repo = MockRepo::new();
        repo.expect_get_by_id()
            .withf(|id| *id == 7)
            .times(1)
            .returning(|id| Ok(stored_product(id)));

        let coordinator = ProductCoordinator::new(
            Arc::new(repo),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemorySearchIndex::new()),
            DEFAULT_CACHE_TTL,
        );

        for _ in 0..3 {
            assert_eq!(coordinator.get_product(7).await.unwrap().id, 7);
        }
    }

    #[tokio::test]
    async fn test_store_errors_surface_unchanged() {
        let mut repo = MockRepo::new();
        repo.expect_delete()
            .times(1)
            .returning(|id| Err(StoreError::NotFound { entity: "product", id }));

        let cache = Arc::new(InMemoryCache::new());
        let coordinator = ProductCoordinator::new(
            Arc::new(repo),
            cache.clone(),
            Arc::new(InMemorySearchIndex::new()),
            DEFAULT_CACHE_TTL,
        );

        let err = coordinator.delete_product(3).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(cache.delete_count(), 0);
    }

    /// Repository whose next single-product read pauses after loading the row
    /// until released
    struct GatedRepository {
        inner: InMemoryProductRepository,
        armed: AtomicBool,
        read_loaded: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ProductRepository for GatedRepository {
        async fn list_all(&self) -> Result<Vec<Product>, StoreError> {
            self.inner.list_all().await
        }

        async fn get_by_id(&self, id: i64) -> Result<Product, StoreError> {
            let product = self.inner.get_by_id(id).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.read_loaded.notify_one();
                self.release.notified().await;
            }
            Ok(product)
        }

        async fn insert(&self, product: &NewProduct) -> Result<Product, StoreError> {
            self.inner.insert(product).await
        }

        async fn update(&self, id: i64, product: &NewProduct) -> Result<Product, StoreError> {
            self.inner.update(id, product).await
        }

        async fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn test_cache_aside_race_resurrects_stale_value_until_ttl() {
        let repository = Arc::new(GatedRepository {
            inner: InMemoryProductRepository::new(),
            armed: AtomicBool::new(false),
            read_loaded: Notify::new(),
            release: Notify::new(),
        });
        let coordinator = Arc::new(ProductCoordinator::new(
            repository.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(InMemorySearchIndex::new()),
            DEFAULT_CACHE_TTL,
        ));

        let product = coordinator.add_product(command("Laptop", 1500.0)).await.unwrap();
        repository.armed.store(true, Ordering::SeqCst);

        // Reader misses the cache and loads the pre-update row
        let reader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.get_product(product.id).await })
        };
        repository.read_loaded.notified().await;

        // Writer commits and invalidates while the reader is between load and cache fill
        coordinator
            .update_product(product.id, command("Laptop Pro", 1800.0))
            .await
            .unwrap();

        repository.release.notify_one();
        let stale_read = reader.await.unwrap().unwrap();
        assert_eq!(stale_read.name, "Laptop");

        // The reader's late cache fill now shadows the committed update
        let served = coordinator.get_product(product.id).await.unwrap();
        assert_eq!(served.name, "Laptop");
        let stored = repository.inner.get_by_id(product.id).await.unwrap();
        assert_eq!(stored.name, "Laptop Pro");
    }
}
