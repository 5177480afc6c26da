use async_trait::async_trait;
use domain::Product;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::query::{prune_body, product_search_body};
use super::{SearchError, SearchIndex};

/// Elasticsearch index spoken to over its REST API
#[derive(Clone)]
pub struct ElasticsearchIndex {
    client: Client,
    base_url: String,
    index: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Product,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

impl ElasticsearchIndex {
    pub fn new(base_url: &str, index: &str) -> Result<Self, SearchError> {
        // Only connection setup is bounded; requests wait as long as the server takes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SearchError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: index.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, SearchError> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse(e.to_string()))
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(SearchError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

fn transport(e: reqwest::Error) -> SearchError {
    SearchError::Transport(e.to_string())
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    async fn index(&self, doc_id: &str, product: &Product) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.url(&format!("_doc/{}?refresh=true", doc_id)))
            .json(product)
            .send()
            .await
            .map_err(transport)?;

        let _: serde_json::Value = Self::parse(response).await?;
        debug!(doc_id, index = %self.index, "Indexed product document");
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<Product>, SearchError> {
        let response = self
            .client
            .post(self.url("_search"))
            .json(&product_search_body(query))
            .send()
            .await
            .map_err(transport)?;

        let parsed: SearchResponse = Self::parse(response).await?;
        debug!(query, hits = parsed.hits.hits.len(), "Search completed");
        Ok(parsed.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    async fn prune(&self, keep_ids: &[String]) -> Result<u64, SearchError> {
        let response = self
            .client
            .post(self.url("_delete_by_query?refresh=true&conflicts=proceed"))
            .json(&prune_body(keep_ids))
            .send()
            .await
            .map_err(transport)?;

        let parsed: DeleteByQueryResponse = Self::parse(response).await?;
        info!(deleted = parsed.deleted, "Pruned orphaned search documents");
        Ok(parsed.deleted)
    }

    async fn ping(&self) -> Result<(), SearchError> {
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .map_err(transport)?;

        let _: serde_json::Value = Self::parse(response).await?;
        Ok(())
    }
}
