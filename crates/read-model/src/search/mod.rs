pub mod elasticsearch;
pub mod memory;
pub mod query;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::InMemorySearchIndex;

use async_trait::async_trait;
use domain::Product;
use thiserror::Error;

/// Full-text index of catalog products, kept eventually consistent with the
/// primary store
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or overwrite the document `doc_id`
    async fn index(&self, doc_id: &str, product: &Product) -> Result<(), SearchError>;

    /// Fuzzy and substring match over name, description and slug
    async fn search(&self, query: &str) -> Result<Vec<Product>, SearchError>;

    /// Remove every document whose id is not in `keep_ids`; returns how many
    /// were removed
    async fn prune(&self, keep_ids: &[String]) -> Result<u64, SearchError>;

    async fn ping(&self) -> Result<(), SearchError>;
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search transport error: {0}")]
    Transport(String),

    #[error("Search request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid search response: {0}")]
    InvalidResponse(String),
}
