pub mod cache;
pub mod search;

pub use cache::{product_cache_key, CacheError, CacheStore, InMemoryCache, RedisCache};
pub use search::{
    ElasticsearchIndex, InMemorySearchIndex, SearchError, SearchIndex,
};
