//! Process-local search index approximating the Elasticsearch query semantics.

use async_trait::async_trait;
use domain::Product;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{SearchError, SearchIndex};

#[derive(Default)]
pub struct InMemorySearchIndex {
    documents: Mutex<BTreeMap<String, Product>>,
    index_calls: AtomicUsize,
    failing: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every index, search and prune call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn index_count(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn document(&self, doc_id: &str) -> Option<Product> {
        self.documents
            .lock()
            .ok()
            .and_then(|docs| docs.get(doc_id).cloned())
    }

    pub fn document_ids(&self) -> Vec<String> {
        self.documents
            .lock()
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), SearchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SearchError::Transport("search index marked failing".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Product>>, SearchError> {
        self.documents
            .lock()
            .map_err(|_| SearchError::Transport("document map poisoned".to_string()))
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Edits allowed for a term under AUTO fuzziness
fn allowed_edits(term: &str) -> usize {
    match term.chars().count() {
        0..=2 => 0,
        3..=5 => 1,
        _ => 2,
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Relevance of a product for an already-lowercased query; zero means no match
fn score(product: &Product, query: &str) -> u32 {
    let mut score = 0;

    let field_tokens: Vec<String> = [&product.name, &product.description, &product.slug]
        .iter()
        .flat_map(|field| tokens(field))
        .collect();
    for term in tokens(query) {
        let max_edits = allowed_edits(&term);
        for candidate in &field_tokens {
            match edit_distance(&term, candidate) {
                0 => score += 3,
                d if d <= max_edits => score += 1,
                _ => {}
            }
        }
    }

    if product.name.to_lowercase().contains(query) {
        score += 2;
    }
    if product.slug.to_lowercase().contains(query) {
        score += 1;
    }
    score
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, doc_id: &str, product: &Product) -> Result<(), SearchError> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.lock()?.insert(doc_id.to_string(), product.clone());
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<Product>, SearchError> {
        self.check()?;
        let query = query.trim().to_lowercase();

        let mut scored: Vec<(u32, Product)> = self
            .lock()?
            .values()
            .map(|p| (score(p, &query), p.clone()))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.id.cmp(&b.1.id)));

        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }

    async fn prune(&self, keep_ids: &[String]) -> Result<u64, SearchError> {
        self.check()?;
        let keep: HashSet<&str> = keep_ids.iter().map(String::as_str).collect();

        let mut documents = self.lock()?;
        let before = documents.len();
        documents.retain(|id, _| keep.contains(id.as_str()));
        Ok((before - documents.len()) as u64)
    }

    async fn ping(&self) -> Result<(), SearchError> {
        self.check()
    }
}
