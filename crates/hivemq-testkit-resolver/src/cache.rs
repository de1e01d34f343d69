//! Process-wide artifact cache with single-flight fetches
//!
//! Lifecycle: create one [`ArtifactCache`] per process (or per test session), wrap it
//! in an `Arc` and hand it to every [`DependencyResolver`](crate::DependencyResolver).
//! Successful entries are never invalidated. Reads are concurrent; a fetch for a
//! given key runs at most once at a time and every concurrent caller awaits that
//! same fetch. A failed fetch is reported to all of its waiters and then forgotten,
//! so a later call (the caller's own retry) starts a fresh fetch.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

use crate::coordinate::Coordinate;
use crate::error::ResolutionError;
use crate::pom::RawPom;

type Slot<V> = Arc<OnceCell<Result<V, ResolutionError>>>;

/// Deduplicates concurrent fetches per key and memoizes successes
pub struct SingleFlight<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, or run `fetch` exactly once for all concurrent callers
    pub async fn get_or_fetch<F, Fut>(&self, key: &K, fetch: F) -> Result<V, ResolutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, ResolutionError>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.clone()).or_default().clone()
        };

        let result = slot.get_or_init(fetch).await.clone();

        if result.is_err() {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                slots.remove(key);
            }
        }

        result
    }

    /// Cached value without fetching
    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get(key)
            .and_then(|slot| slot.get())
            .and_then(|result| result.as_ref().ok().cloned())
    }

    /// Number of keys with a completed, successful value
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| matches!(slot.get(), Some(Ok(_))))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared cache of fetched files and parsed POMs
#[derive(Default)]
pub struct ArtifactCache {
    files: SingleFlight<(Coordinate, String), PathBuf>,
    poms: SingleFlight<Coordinate, Arc<RawPom>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Single-flight access to a fetched file, keyed by coordinate and extension
    pub async fn file<F, Fut>(
        &self,
        coordinate: &Coordinate,
        extension: &str,
        fetch: F,
    ) -> Result<PathBuf, ResolutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PathBuf, ResolutionError>>,
    {
        self.files
            .get_or_fetch(&(coordinate.clone(), extension.to_string()), fetch)
            .await
    }

    /// Single-flight access to a parsed POM
    pub async fn pom<F, Fut>(&self, coordinate: &Coordinate, fetch: F) -> Result<Arc<RawPom>, ResolutionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<RawPom>, ResolutionError>>,
    {
        self.poms.get_or_fetch(coordinate, fetch).await
    }

    /// Previously fetched file, if any
    pub fn cached_file(&self, coordinate: &Coordinate, extension: &str) -> Option<PathBuf> {
        self.files
            .get(&(coordinate.clone(), extension.to_string()))
    }

    /// Number of files fetched successfully so far
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let flight: Arc<SingleFlight<String, usize>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .get_or_fetch(&"key".to_string(), || async {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(calls.fetch_add(1, Ordering::SeqCst) + 100)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 100);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_memoized() {
        let flight: SingleFlight<&str, u32> = SingleFlight::new();
        let coordinate = Coordinate::new("g", "a", "1");

        let first = flight
            .get_or_fetch(&"k", || async { Err(ResolutionError::not_found(&coordinate)) })
            .await;
        assert!(first.is_err());
        assert!(flight.is_empty());

        let second = flight.get_or_fetch(&"k", || async { Ok(7) }).await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(flight.get(&"k"), Some(7));
    }

    #[tokio::test]
    async fn test_disjoint_keys_fetch_independently() {
        let cache = ArtifactCache::new();
        let a = Coordinate::new("g", "a", "1");
        let b = Coordinate::new("g", "b", "1");

        let pa = cache
            .file(&a, "jar", || async { Ok(PathBuf::from("/repo/a.jar")) })
            .await
            .unwrap();
        let pb = cache
            .file(&b, "jar", || async { Ok(PathBuf::from("/repo/b.jar")) })
            .await
            .unwrap();

        assert_ne!(pa, pb);
        assert_eq!(cache.file_count(), 2);
        assert_eq!(cache.cached_file(&a, "jar"), Some(pa));
        assert_eq!(cache.cached_file(&a, "pom"), None);
    }
}
