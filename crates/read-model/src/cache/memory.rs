use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{CacheError, CacheStore};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache with per-key expiry.
///
/// Expiry follows the tokio clock, so tests can pause and advance time.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Whether a live (unexpired) entry exists, without counting a lookup
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .get(key)
                    .map_or(false, |e| e.expires_at > Instant::now())
            })
            .unwrap_or(false)
    }

    fn check_available(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Connection("cache marked unavailable".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Command("cache map poisoned".to_string()))
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.lock()?.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.lock()?.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check_available()
    }
}
