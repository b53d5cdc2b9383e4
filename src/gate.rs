use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use actix_rt::task::JoinHandle;
use chrono::Utc;
use log::{debug, error, info, warn};

use crate::cache::Cachable;
use crate::cached_response::{CacheEntry, FreshnessPolicy, FreshnessState};
use crate::fetcher::{Fetchable, FetchedObject, FetchError};
use crate::http_cache::{HttpCacheHandler, RequestCacheResult};

pub type SharedCache = Arc<RwLock<dyn Cachable<Arc<CacheEntry>> + Send + Sync>>;

/// Holds a URL in the in-flight refresh set until dropped, including when the
/// refresh task panics or is cancelled.
struct RefreshGuard {
    refreshing: Arc<Mutex<HashSet<String>>>,
    link: String,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        let mut refreshing = match self.refreshing.lock() {
            Ok(refreshing) => refreshing,
            Err(poisoned) => poisoned.into_inner(),
        };
        refreshing.remove(&self.link);
    }
}

/// What to do with a request, derived from the stored entry's freshness.
#[derive(Debug, Clone)]
pub enum Action {
    ServeCached(Arc<CacheEntry>),
    ServeCachedAndRefresh(Arc<CacheEntry>),
    /// Carries the stale entry, if there was one, for revalidation only.
    FetchRequired(Option<Arc<CacheEntry>>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheStatus {
    Hit,
    HitRefreshing,
    Miss,
    Uncacheable,
}

#[derive(Debug, Clone)]
pub struct Served {
    pub entry: Arc<CacheEntry>,
    pub status: CacheStatus,
}

#[derive(Clone)]
pub struct CacheGate {
    cache: SharedCache,
    fetcher: Arc<dyn Fetchable + Send + Sync>,
    cache_handler: Arc<dyn HttpCacheHandler + Send + Sync>,
    default_ttl: Duration,
    policy: FreshnessPolicy,
    refreshing: Arc<Mutex<HashSet<String>>>,
}

impl CacheGate {
    pub fn new(
        cache: SharedCache,
        fetcher: Arc<dyn Fetchable + Send + Sync>,
        cache_handler: Arc<dyn HttpCacheHandler + Send + Sync>,
        default_ttl: Duration,
        policy: FreshnessPolicy,
    ) -> CacheGate {
        CacheGate {
            cache,
            fetcher,
            cache_handler,
            default_ttl,
            policy,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn can_fetch(&self, link: &str) -> bool {
        self.fetcher.can_fetch(link)
    }

    /// Read-only: never touches the store beyond a lookup.
    pub fn decide(&self, link: &str) -> Action {
        let entry = match self.lookup(link) {
            Some(entry) => entry,
            None => return Action::FetchRequired(None),
        };
        match entry.freshness_state() {
            FreshnessState::Fresh => Action::ServeCached(entry),
            FreshnessState::RefreshSuggested => Action::ServeCachedAndRefresh(entry),
            FreshnessState::Stale => Action::FetchRequired(Some(entry)),
        }
    }

    pub async fn handle(&self, link: &str) -> Result<Served, FetchError> {
        match self.decide(link) {
            Action::ServeCached(entry) => {
                info!("Serving {} from cache, {:?} left.", link, entry.remaining(Utc::now()));
                Ok(Served { entry, status: CacheStatus::Hit })
            }
            Action::ServeCachedAndRefresh(entry) => {
                info!("Serving {} from cache, refresh scheduled.", link);
                self.refresh_in_background(link, entry.clone());
                Ok(Served { entry, status: CacheStatus::HitRefreshing })
            }
            Action::FetchRequired(previous) => {
                info!("Fetching {}.", link);
                self.fetch_and_store(link, previous.as_deref()).await
            }
        }
    }

    pub async fn fetch_and_store(&self, link: &str, previous: Option<&CacheEntry>) -> Result<Served, FetchError> {
        let cached = previous.map(|entry| entry.to_fetched());
        let fetched = self.fetcher.fetch(link, cached.as_ref()).await?;
        Ok(self.store(link, fetched))
    }

    /// Starts a refresh on the current runtime unless one is already running
    /// for `link`. Failures are logged and leave the stored entry in place.
    pub fn refresh_in_background(&self, link: &str, current: Arc<CacheEntry>) -> Option<JoinHandle<()>> {
        {
            let mut refreshing = match self.refreshing.lock() {
                Ok(refreshing) => refreshing,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !refreshing.insert(link.to_string()) {
                debug!("Refresh of {} already in flight.", link);
                return None;
            }
        }

        let guard = RefreshGuard {
            refreshing: self.refreshing.clone(),
            link: link.to_string(),
        };
        let gate = self.clone();
        Some(actix_rt::spawn(async move {
            let link = guard.link.as_str();
            match gate.fetch_and_store(link, Some(current.as_ref())).await {
                Ok(_) => info!("Refreshed {} in background.", link),
                Err(e) => warn!("Background refresh of {} failed: {}", link, e),
            }
        }))
    }

    fn lookup(&self, link: &str) -> Option<Arc<CacheEntry>> {
        match self.cache.read() {
            Ok(cache) => cache.get(link).ok(),
            Err(_) => {
                error!("Cache lock poisoned, treating {} as a miss.", link);
                None
            }
        }
    }

    fn ttl_for(&self, link: &str, fetched: &FetchedObject) -> Option<Duration> {
        match self.cache_handler.should_cache(link, fetched) {
            RequestCacheResult::NoCache => None,
            RequestCacheResult::IfNotExpired(ttl) if ttl.is_zero() => None,
            RequestCacheResult::IfNotExpired(ttl) => Some(ttl),
            RequestCacheResult::ServeCache if self.default_ttl.is_zero() => None,
            RequestCacheResult::ServeCache => Some(self.default_ttl),
        }
    }

    fn store(&self, link: &str, fetched: FetchedObject) -> Served {
        let ttl = match self.ttl_for(link, &fetched) {
            Some(ttl) => ttl,
            None => {
                debug!("{} is not cacheable.", link);
                let entry = CacheEntry::create(link, fetched, Duration::from_secs(0), self.policy);
                return Served { entry: Arc::new(entry), status: CacheStatus::Uncacheable };
            }
        };

        let entry = Arc::new(CacheEntry::create(link, fetched, ttl, self.policy));
        match self.cache.write() {
            Ok(mut cache) => match cache.set(link.to_string(), entry.clone()) {
                Ok(_) => debug!("Saving {} to cache for {:?}.", link, ttl),
                Err(e) => error!("Failed to save {} to cache: {}", link, e),
            },
            Err(_) => error!("Cache lock poisoned, {} not saved.", link),
        }
        Served { entry, status: CacheStatus::Miss }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_cache::MemoryCache;
    use crate::http_cache::request_cache_handler::RequestCacheHandler;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const URL: &str = "http://x/a";

    struct FetcherMock {
        body: Mutex<Option<&'static str>>,
        cache_control: Option<&'static str>,
        calls: AtomicUsize,
        revalidations: AtomicUsize,
        /// `fetch` waits while this is false.
        released: AtomicBool,
        panics: AtomicBool,
    }

    impl FetcherMock {
        fn new(body: Option<&'static str>) -> FetcherMock {
            FetcherMock {
                body: Mutex::new(body),
                cache_control: None,
                calls: AtomicUsize::new(0),
                revalidations: AtomicUsize::new(0),
                released: AtomicBool::new(true),
                panics: AtomicBool::new(false),
            }
        }

        fn set_body(&self, body: Option<&'static str>) {
            *self.body.lock().unwrap() = body;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetchable for FetcherMock {
        fn can_fetch(&self, _: &str) -> bool {
            true
        }

        async fn fetch(&self, _: &str, cached: Option<&FetchedObject>) -> Result<FetchedObject, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if cached.is_some() {
                self.revalidations.fetch_add(1, Ordering::SeqCst);
            }
            while !self.released.load(Ordering::SeqCst) {
                actix_rt::time::sleep(Duration::from_millis(5)).await;
            }
            if self.panics.load(Ordering::SeqCst) {
                panic!("upstream handler crashed");
            }
            let body = (*self.body.lock().unwrap()).ok_or(FetchError::NotFound)?;
            let mut fetched_object = FetchedObject::default();
            fetched_object.bytes = Bytes::from(body);
            if let Some(cache_control) = self.cache_control {
                fetched_object.metadata.append_header("cache-control", cache_control);
            }
            Ok(fetched_object)
        }
    }

    fn shared_cache() -> SharedCache {
        Arc::new(RwLock::new(MemoryCache::<Arc<CacheEntry>>::new()))
    }

    fn gate(cache: SharedCache, fetcher: Arc<FetcherMock>) -> CacheGate {
        CacheGate::new(
            cache,
            fetcher,
            Arc::new(RequestCacheHandler::new(vec![])),
            Duration::from_secs(60),
            FreshnessPolicy::new(0.2),
        )
    }

    /// Puts an entry with a 60 second lifetime created `age_seconds` ago.
    fn insert_aged(cache: &SharedCache, body: &'static str, age_seconds: i64) -> Arc<CacheEntry> {
        let mut fetched_object = FetchedObject::default();
        fetched_object.bytes = Bytes::from(body);
        let entry = Arc::new(CacheEntry::create_at(
            URL,
            fetched_object,
            Duration::from_secs(60),
            FreshnessPolicy::new(0.2),
            Utc::now() - chrono::Duration::seconds(age_seconds),
        ));
        cache.write().unwrap().set(URL.to_string(), entry.clone()).unwrap();
        entry
    }

    fn stored(cache: &SharedCache) -> Option<Arc<CacheEntry>> {
        cache.read().unwrap().get(URL).ok()
    }

    #[test]
    fn test_empty_store_requires_fetch() {
        let fetcher = Arc::new(FetcherMock::new(Some("B1")));
        let gate = gate(shared_cache(), fetcher.clone());

        assert!(matches!(gate.decide(URL), Action::FetchRequired(None)));
        assert_eq!(fetcher.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_miss_then_hit() {
        let cache = shared_cache();
        let fetcher = Arc::new(FetcherMock::new(Some("B1")));
        let gate = gate(cache.clone(), fetcher.clone());

        let served = gate.handle(URL).await.unwrap();
        assert_eq!(served.status, CacheStatus::Miss);
        assert_eq!(served.entry.body(), &Bytes::from("B1"));
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("B1"));

        match gate.decide(URL) {
            Action::ServeCached(entry) => assert_eq!(entry.body(), &Bytes::from("B1")),
            other => panic!("expected a cache hit, got {:?}", other),
        }
        let served = gate.handle(URL).await.unwrap();
        assert_eq!(served.status, CacheStatus::Hit);
        assert_eq!(fetcher.calls(), 1);
    }

    #[actix_rt::test]
    async fn test_stale_entry_is_refetched() {
        let cache = shared_cache();
        insert_aged(&cache, "old", 120);
        let fetcher = Arc::new(FetcherMock::new(Some("new")));
        let gate = gate(cache.clone(), fetcher.clone());

        assert!(matches!(gate.decide(URL), Action::FetchRequired(Some(_))));

        let served = gate.handle(URL).await.unwrap();
        assert_eq!(served.status, CacheStatus::Miss);
        assert_eq!(served.entry.body(), &Bytes::from("new"));
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("new"));
        assert_eq!(fetcher.revalidations.load(Ordering::SeqCst), 1);
    }

    #[actix_rt::test]
    async fn test_fetch_error_propagates_and_store_untouched() {
        let cache = shared_cache();
        let gate = gate(cache.clone(), Arc::new(FetcherMock::new(None)));

        assert!(matches!(gate.handle(URL).await, Err(FetchError::NotFound)));
        assert_eq!(cache.read().unwrap().count(), 0);
    }

    #[actix_rt::test]
    async fn test_refresh_window_serves_old_body_then_refreshes() {
        let cache = shared_cache();
        let original = insert_aged(&cache, "B1", 55);
        let fetcher = Arc::new(FetcherMock::new(Some("B2")));
        let gate = gate(cache.clone(), fetcher.clone());

        let entry = match gate.decide(URL) {
            Action::ServeCachedAndRefresh(entry) => entry,
            other => panic!("expected refresh suggestion, got {:?}", other),
        };
        assert_eq!(entry.body(), &Bytes::from("B1"));
        assert!(Arc::ptr_eq(&stored(&cache).unwrap(), &original));
        assert_eq!(fetcher.calls(), 0);

        let refresh = gate.refresh_in_background(URL, entry).unwrap();
        refresh.await.unwrap();

        match gate.decide(URL) {
            Action::ServeCached(entry) => assert_eq!(entry.body(), &Bytes::from("B2")),
            other => panic!("expected a cache hit, got {:?}", other),
        }
    }

    #[actix_rt::test]
    async fn test_handle_does_not_wait_for_refresh() {
        let cache = shared_cache();
        insert_aged(&cache, "B1", 55);
        let fetcher = Arc::new(FetcherMock::new(Some("B2")));
        fetcher.released.store(false, Ordering::SeqCst);
        let gate = gate(cache.clone(), fetcher.clone());

        let served = actix_rt::time::timeout(Duration::from_secs(1), gate.handle(URL))
            .await
            .expect("handle waited for the refresh")
            .unwrap();
        assert_eq!(served.status, CacheStatus::HitRefreshing);
        assert_eq!(served.entry.body(), &Bytes::from("B1"));

        for _ in 0..50 {
            if fetcher.calls() == 1 {
                break;
            }
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("B1"));
        assert_eq!(gate.handle(URL).await.unwrap().status, CacheStatus::HitRefreshing);
        assert_eq!(fetcher.calls(), 1);

        fetcher.released.store(true, Ordering::SeqCst);
        for _ in 0..50 {
            if stored(&cache).unwrap().body() == &Bytes::from("B2") {
                break;
            }
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("B2"));
        assert_eq!(gate.handle(URL).await.unwrap().status, CacheStatus::Hit);
    }

    #[actix_rt::test]
    async fn test_failed_refresh_keeps_entry() {
        let cache = shared_cache();
        let original = insert_aged(&cache, "B1", 55);
        let fetcher = Arc::new(FetcherMock::new(None));
        let gate = gate(cache.clone(), fetcher.clone());

        gate.refresh_in_background(URL, original.clone()).unwrap().await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert!(Arc::ptr_eq(&stored(&cache).unwrap(), &original));
        assert!(matches!(gate.decide(URL), Action::ServeCachedAndRefresh(_)));
    }

    #[actix_rt::test]
    async fn test_duplicate_refreshes_are_coalesced() {
        let cache = shared_cache();
        let original = insert_aged(&cache, "B1", 55);
        let fetcher = Arc::new(FetcherMock::new(Some("B2")));
        let gate = gate(cache.clone(), fetcher.clone());

        let first = gate.refresh_in_background(URL, original.clone());
        assert!(first.is_some());
        assert!(gate.refresh_in_background(URL, original.clone()).is_none());

        first.unwrap().await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        fetcher.set_body(Some("B3"));
        gate.refresh_in_background(URL, original).unwrap().await.unwrap();
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("B3"));
    }

    #[actix_rt::test]
    async fn test_panicked_refresh_allows_next_refresh() {
        let cache = shared_cache();
        let original = insert_aged(&cache, "B1", 55);
        let fetcher = Arc::new(FetcherMock::new(Some("B2")));
        fetcher.panics.store(true, Ordering::SeqCst);
        let gate = gate(cache.clone(), fetcher.clone());

        let crashed = gate.refresh_in_background(URL, original.clone()).unwrap();
        assert!(crashed.await.is_err());
        assert!(Arc::ptr_eq(&stored(&cache).unwrap(), &original));

        fetcher.panics.store(false, Ordering::SeqCst);
        let retry = gate.refresh_in_background(URL, original).expect("refresh slot was not released");
        retry.await.unwrap();
        assert_eq!(stored(&cache).unwrap().body(), &Bytes::from("B2"));
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_concurrent_decisions_on_fresh_entry() {
        let cache = shared_cache();
        insert_aged(&cache, "B1", 0);
        let fetcher = Arc::new(FetcherMock::new(Some("B2")));
        let gate = gate(cache, fetcher.clone());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.decide(URL))
            })
            .collect();

        for worker in workers {
            match worker.join().unwrap() {
                Action::ServeCached(entry) => assert_eq!(entry.body(), &Bytes::from("B1")),
                other => panic!("expected a cache hit, got {:?}", other),
            }
        }
        assert_eq!(fetcher.calls(), 0);
    }

    #[actix_rt::test]
    async fn test_no_store_response_is_served_but_not_stored() {
        let cache = shared_cache();
        let mut fetcher = FetcherMock::new(Some("private"));
        fetcher.cache_control = Some("no-store");
        let gate = gate(cache.clone(), Arc::new(fetcher));

        let served = gate.handle(URL).await.unwrap();

        assert_eq!(served.status, CacheStatus::Uncacheable);
        assert_eq!(served.entry.body(), &Bytes::from("private"));
        assert_eq!(cache.read().unwrap().count(), 0);
    }

    #[test]
    fn test_poisoned_store_is_a_miss() {
        let cache = shared_cache();
        insert_aged(&cache, "B1", 0);
        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.write().unwrap();
            panic!("poison the cache lock");
        }).join();

        let gate = gate(cache, Arc::new(FetcherMock::new(Some("B2"))));

        assert!(matches!(gate.decide(URL), Action::FetchRequired(None)));
    }
}
