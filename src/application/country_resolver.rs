//! Country Resolver - IP to country resolution cache
//!
//! Combines the resolution cache, the provider lifecycle and the
//! background maintenance loop behind a single `resolve_country` entry
//! point.
//!
//! Locking: one `RwLock<ProviderState>` guards the provider and the
//! structural cache operations that must not race with a provider swap.
//! Cache hits only take the shared lock; last-access stamps are atomics
//! inside the entries. Provider creation, provider swap, eviction and
//! shutdown take the exclusive lock.

use super::resolver_config::ResolverConfig;
use crate::domain::entities::{CachedResult, CountryResult};
use crate::domain::ports::{CountryProvider, ProviderFactory};
use crate::domain::value_objects::ProviderKind;
use dashmap::DashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// The currently active lookup backend.
///
/// At most one provider is open at a time. A swap always closes the
/// previous instance before the slot is reused.
#[derive(Default)]
struct ProviderState {
    provider: Option<Arc<dyn CountryProvider>>,
    /// Database file the open provider was loaded from
    backing_file: Option<PathBuf>,
    /// Modification time of `backing_file` when it was opened
    backing_file_modified: Option<SystemTime>,
    /// Set once by shutdown, never cleared
    shutting_down: bool,
}

impl ProviderState {
    fn kind(&self) -> ProviderKind {
        self.provider
            .as_ref()
            .map(|p| p.kind())
            .unwrap_or(ProviderKind::None)
    }

    fn close_provider(&mut self) -> Option<ProviderKind> {
        let provider = self.provider.take()?;
        provider.close();
        self.backing_file = None;
        self.backing_file_modified = None;
        Some(provider.kind())
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    lookup_failures: AtomicU64,
    evictions: AtomicU64,
    cache_clears: AtomicU64,
    provider_opens: AtomicU64,
    provider_closes: AtomicU64,
}

/// Point-in-time resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub lookup_failures: u64,
    pub evictions: u64,
    pub cache_clears: u64,
    pub provider_opens: u64,
    pub provider_closes: u64,
}

/// IP to country resolver.
///
/// One instance per process, constructed explicitly and shared by `Arc`
/// with every component that issues resolutions.
///
/// Lifecycle: [`CountryResolver::new`] once configuration is loaded,
/// [`CountryResolver::start_maintenance`] when the host initialises, and
/// [`CountryResolver::shutdown`] when the host begins shutting down.
pub struct CountryResolver {
    config: ResolverConfig,
    factory: Arc<dyn ProviderFactory>,
    state: RwLock<ProviderState>,
    cache: DashMap<String, Arc<CachedResult>>,
    epoch: Instant,
    /// Last successful backend lookup, ms since `epoch`
    last_lookup_ms: AtomicU64,
    /// Latest access stamp handed out, microseconds since `epoch`
    access_clock: AtomicU64,
    counters: Counters,
    maintenance: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CountryResolver {
    /// Create a resolver. No provider is opened until the first miss.
    pub fn new(config: ResolverConfig, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            cache: DashMap::with_capacity(config.capacity),
            config,
            factory,
            state: RwLock::new(ProviderState::default()),
            epoch: Instant::now(),
            last_lookup_ms: AtomicU64::new(0),
            access_clock: AtomicU64::new(0),
            counters: Counters::default(),
            maintenance: parking_lot::Mutex::new(None),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Next cache access stamp. Follows the clock in microseconds but is
    /// strictly increasing, so two accesses never tie.
    fn next_access_stamp(&self) -> u64 {
        let now = self.epoch.elapsed().as_micros() as u64;
        let next = |last: u64| now.max(last + 1);
        match self
            .access_clock
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| Some(next(last)))
        {
            Ok(last) | Err(last) => next(last),
        }
    }

    /// Resolve the country for an IP address.
    ///
    /// Returns `None` when the address cannot be resolved for any reason:
    /// malformed input, no provider available, a backend error, or
    /// shutdown in progress. Callers apply their own default policy.
    pub async fn resolve_country(&self, ip_address: &str) -> Option<CountryResult> {
        let state = self.state.read().await;
        if state.shutting_down {
            return None;
        }

        let ip: IpAddr = match ip_address.trim().parse() {
            Ok(ip) => ip,
            Err(e) => {
                self.counters.lookup_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ip = %ip_address, error = %e, "malformed address, not resolved");
                return None;
            }
        };
        let key = ip.to_string();

        let hit = self.cache.get(&key).map(|entry| entry.value().clone());
        if let Some(cached) = hit {
            cached.touch(self.next_access_stamp());
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(cached.result.clone());
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        // Not an atomic upgrade: another task may open the provider (or
        // shutdown may start) between dropping the read guard and taking
        // the write guard, so ensure_provider re-checks under the lock.
        let state = if state.provider.is_none() {
            drop(state);
            let mut write = self.state.write().await;
            self.ensure_provider(&mut write).await;
            write.downgrade()
        } else {
            state
        };

        if state.shutting_down {
            return None;
        }
        let provider = state.provider.clone()?;

        match provider.lookup(ip).await {
            Ok(result) => {
                self.last_lookup_ms.store(self.now_ms(), Ordering::Relaxed);
                let stamp = self.next_access_stamp();

                // First insert wins; racing resolvers reuse it.
                let cached = self
                    .cache
                    .entry(key)
                    .or_insert_with(|| Arc::new(CachedResult::new(result, stamp)))
                    .value()
                    .clone();
                Some(cached.result.clone())
            }
            Err(e) => {
                self.counters.lookup_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(ip = %key, provider = %provider.kind(), error = %e, "country lookup failed");
                None
            }
        }
    }

    /// Open a provider if none is open, following the selection rule:
    /// remote credentials first, then an existing local database file.
    ///
    /// Must be called with the exclusive lock held.
    async fn ensure_provider(&self, state: &mut ProviderState) {
        if state.shutting_down || state.provider.is_some() {
            return;
        }

        if let Some(remote) = self.config.remote_credentials() {
            match self.factory.connect_remote(remote).await {
                Ok(provider) => {
                    tracing::info!(account_id = %remote.account_id, "remote lookup service client created");
                    self.last_lookup_ms.store(self.now_ms(), Ordering::Relaxed);
                    self.counters.provider_opens.fetch_add(1, Ordering::Relaxed);
                    state.provider = Some(provider);
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to create remote lookup provider");
                }
            }
            return;
        }

        let Some(path) = self.config.database_path.as_deref().filter(|p| p.is_file()) else {
            tracing::debug!("no lookup provider configured");
            return;
        };

        // Read the mtime before opening so a write during the open is
        // still seen as a change by the next maintenance tick.
        let modified = file_modified(path);
        match self.factory.open_database(path).await {
            Ok(provider) => {
                tracing::info!(path = %path.display(), "local lookup database opened");
                self.counters.provider_opens.fetch_add(1, Ordering::Relaxed);
                state.provider = Some(provider);
                state.backing_file = Some(path.to_path_buf());
                state.backing_file_modified = modified;
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to open local lookup database");
            }
        }
    }

    /// Run one maintenance pass: retire a stale or idle provider, then
    /// trim the cache if it has reached capacity.
    pub async fn run_maintenance(&self) {
        let mut state = self.state.write().await;
        if state.shutting_down {
            return;
        }

        self.check_provider(&mut state);
        self.evict_if_full();
    }

    fn check_provider(&self, state: &mut ProviderState) {
        match state.kind() {
            ProviderKind::LocalDatabase => {
                let current = state.backing_file.as_deref().and_then(file_modified);
                let stale = match (current, state.backing_file_modified) {
                    (Some(current), Some(recorded)) => current > recorded,
                    _ => false,
                };
                if stale {
                    state.close_provider();
                    self.counters.provider_closes.fetch_add(1, Ordering::Relaxed);
                    let cleared = self.cache.len();
                    self.cache.clear();
                    self.counters.cache_clears.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(cleared, "lookup database changed on disk, provider closed and cache cleared");
                }
            }
            ProviderKind::RemoteService => {
                let idle_ms = self
                    .now_ms()
                    .saturating_sub(self.last_lookup_ms.load(Ordering::Relaxed));
                if idle_ms >= self.config.remote_idle_timeout.as_millis() as u64 {
                    state.close_provider();
                    self.counters.provider_closes.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(idle_ms, "remote lookup provider idle, closed");
                }
            }
            ProviderKind::None => {}
        }
    }

    /// Remove the least recently accessed entries, oldest first, until the
    /// cache is at or below the eviction threshold. Only runs once the cache
    /// has reached capacity. Returns the number of entries removed.
    fn evict_if_full(&self) -> usize {
        if self.cache.len() < self.config.capacity {
            return 0;
        }

        let target = self.config.eviction_threshold();
        let mut entries: Vec<(String, u64)> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), e.value().last_access()))
            .collect();
        entries.sort_unstable_by_key(|(_, last_access)| *last_access);

        let mut removed = 0;
        for (key, _) in entries {
            if self.cache.len() <= target {
                break;
            }
            if self.cache.remove(&key).is_some() {
                removed += 1;
            }
        }

        self.counters.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(removed, remaining = self.cache.len(), "cache eviction pass");
        removed
    }

    /// Start the background maintenance loop. Idempotent.
    ///
    /// The loop holds only a weak reference, so it also ends when the
    /// resolver is dropped.
    pub fn start_maintenance(self: &Arc<Self>) {
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }

        let resolver: Weak<Self> = Arc::downgrade(self);
        let period = self.config.maintenance_interval;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(resolver) = resolver.upgrade() else {
                    break;
                };
                resolver.run_maintenance().await;
            }
        }));

        tracing::info!(interval_ms = period.as_millis() as u64, "resolver maintenance started");
    }

    /// Stop maintenance, close any open provider and fail every later
    /// resolution fast. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }

        // Taking the write lock waits out any in-flight tick or lookup.
        let mut state = self.state.write().await;
        if state.shutting_down {
            return;
        }
        if let Some(kind) = state.close_provider() {
            self.counters.provider_closes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(provider = %kind, "lookup provider closed for shutdown");
        }
        state.shutting_down = true;
    }

    /// Number of cached entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Kind of the currently open provider.
    pub async fn provider_kind(&self) -> ProviderKind {
        self.state.read().await.kind()
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.state.read().await.shutting_down
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            entries: self.cache.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            lookup_failures: self.counters.lookup_failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            cache_clears: self.counters.cache_clears.load(Ordering::Relaxed),
            provider_opens: self.counters.provider_opens.load(Ordering::Relaxed),
            provider_closes: self.counters.provider_closes.load(Ordering::Relaxed),
        }
    }
}

fn file_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::errors::{LookupError, ProviderError};
    use crate::domain::value_objects::RemoteServiceConfig;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use tempfile::NamedTempFile;
    use tokio::sync::Barrier;
    use tracing_test::traced_test;

    // ===== Test Doubles =====

    struct MockProvider {
        kind: ProviderKind,
        answers: HashMap<IpAddr, Result<CountryResult, LookupError>>,
        delay: Option<Duration>,
        /// Lookups for this address wait until the barrier fills
        barrier: Option<(IpAddr, Arc<Barrier>)>,
        /// Tag every default answer with the lookup number
        distinct_answers: bool,
        lookups: AtomicUsize,
        closed: AtomicBool,
    }

    #[async_trait]
    impl CountryProvider for MockProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn lookup(&self, ip: IpAddr) -> Result<CountryResult, LookupError> {
            assert!(!self.closed.load(Ordering::SeqCst), "lookup on closed provider");
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            if let Some((target, barrier)) = &self.barrier {
                if *target == ip {
                    barrier.wait().await;
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.distinct_answers {
                return Ok(CountryResult::new("US", Some(format!("lookup {}", n))));
            }
            self.answers
                .get(&ip)
                .cloned()
                .unwrap_or_else(|| Ok(CountryResult::new("US", Some("United States".to_string()))))
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockFactory {
        answers: HashMap<IpAddr, Result<CountryResult, LookupError>>,
        delay: Option<Duration>,
        barrier: Option<(IpAddr, Arc<Barrier>)>,
        distinct_answers: bool,
        fail: AtomicBool,
        attempts: AtomicUsize,
        created: parking_lot::Mutex<Vec<Arc<MockProvider>>>,
    }

    impl MockFactory {
        fn with_answer(mut self, ip: &str, answer: Result<CountryResult, LookupError>) -> Self {
            self.answers.insert(ip.parse().unwrap(), answer);
            self
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn with_barrier(mut self, ip: &str, callers: usize) -> Self {
            self.barrier = Some((ip.parse().unwrap(), Arc::new(Barrier::new(callers))));
            self
        }

        fn with_distinct_answers(mut self) -> Self {
            self.distinct_answers = true;
            self
        }

        fn build(&self, kind: ProviderKind) -> Result<Arc<dyn CountryProvider>, ProviderError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::Remote("backend unreachable".to_string()));
            }
            let provider = Arc::new(MockProvider {
                kind,
                answers: self.answers.clone(),
                delay: self.delay,
                barrier: self.barrier.clone(),
                distinct_answers: self.distinct_answers,
                lookups: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            });
            self.created.lock().push(provider.clone());
            Ok(provider)
        }

        fn opened(&self) -> usize {
            self.created.lock().len()
        }

        fn provider(&self, index: usize) -> Arc<MockProvider> {
            self.created.lock()[index].clone()
        }

        fn total_lookups(&self) -> usize {
            self.created
                .lock()
                .iter()
                .map(|p| p.lookups.load(Ordering::SeqCst))
                .sum()
        }
    }

    #[async_trait]
    impl ProviderFactory for MockFactory {
        async fn open_database(&self, _path: &Path) -> Result<Arc<dyn CountryProvider>, ProviderError> {
            self.build(ProviderKind::LocalDatabase)
        }

        async fn connect_remote(
            &self,
            _config: &RemoteServiceConfig,
        ) -> Result<Arc<dyn CountryProvider>, ProviderError> {
            self.build(ProviderKind::RemoteService)
        }
    }

    fn remote_config() -> ResolverConfig {
        ResolverConfig::new().remote(RemoteServiceConfig::new("1234", "license"))
    }

    fn local_config(file: &NamedTempFile) -> ResolverConfig {
        ResolverConfig::new().database_path(file.path())
    }

    fn resolver(config: ResolverConfig, factory: &Arc<MockFactory>) -> Arc<CountryResolver> {
        Arc::new(CountryResolver::new(config, factory.clone()))
    }

    fn set_mtime(file: &NamedTempFile, time: SystemTime) {
        file.as_file().set_modified(time).unwrap();
    }

    // ===== Resolution Tests =====

    #[tokio::test]
    async fn test_resolve_miss_then_hit() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        let first = resolver.resolve_country("8.8.8.8").await;
        let second = resolver.resolve_country("8.8.8.8").await;

        assert_eq!(first.as_ref().unwrap().iso_code.as_deref(), Some("US"));
        assert_eq!(first, second);
        assert_eq!(factory.total_lookups(), 1);
        assert_eq!(resolver.cache_len(), 1);

        let stats = resolver.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_provider_created_lazily() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
        assert_eq!(factory.opened(), 0);

        resolver.resolve_country("1.2.3.4").await;
        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_is_normalized() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        resolver.resolve_country("2001:db8::1").await;
        resolver.resolve_country(" 2001:0db8:0:0::1 ").await;

        assert_eq!(resolver.cache_len(), 1);
        assert_eq!(factory.total_lookups(), 1);
    }

    #[tokio::test]
    async fn test_unknown_country_is_cached() {
        let factory =
            Arc::new(MockFactory::default().with_answer("10.0.0.1", Ok(CountryResult::unknown())));
        let resolver = resolver(remote_config(), &factory);

        let first = resolver.resolve_country("10.0.0.1").await;
        let second = resolver.resolve_country("10.0.0.1").await;

        assert_eq!(first, Some(CountryResult::unknown()));
        assert_eq!(second, Some(CountryResult::unknown()));
        assert_eq!(factory.total_lookups(), 1);
        assert_eq!(resolver.cache_len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unresolvable_address_not_cached() {
        let factory = Arc::new(MockFactory::default().with_answer(
            "203.0.113.9",
            Err(LookupError::unresolvable("203.0.113.9", "rejected by backend")),
        ));
        let resolver = resolver(remote_config(), &factory);

        assert!(resolver.resolve_country("203.0.113.9").await.is_none());
        assert_eq!(resolver.cache_len(), 0);

        assert!(resolver.resolve_country("203.0.113.9").await.is_none());
        assert_eq!(factory.total_lookups(), 2);
        assert_eq!(resolver.stats().lookup_failures, 2);
        assert!(logs_contain("country lookup failed"));
    }

    #[tokio::test]
    async fn test_backend_unavailable_not_cached() {
        let factory = Arc::new(MockFactory::default().with_answer(
            "198.51.100.1",
            Err(LookupError::unavailable("connection reset")),
        ));
        let resolver = resolver(remote_config(), &factory);

        assert!(resolver.resolve_country("198.51.100.1").await.is_none());
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_address() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        assert!(resolver.resolve_country("not-an-ip").await.is_none());
        assert!(resolver.resolve_country("999.1.1.1").await.is_none());
        assert_eq!(resolver.cache_len(), 0);
        assert_eq!(factory.total_lookups(), 0);
        assert!(logs_contain("malformed address"));
    }

    // ===== Provider Selection Tests =====

    #[tokio::test]
    async fn test_no_configuration_resolves_nothing() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(ResolverConfig::new(), &factory);

        assert!(resolver.resolve_country("8.8.8.8").await.is_none());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
    }

    #[tokio::test]
    async fn test_missing_database_file_resolves_nothing() {
        let factory = Arc::new(MockFactory::default());
        let config = ResolverConfig::new().database_path("/nonexistent/GeoIP2-Country.mmdb");
        let resolver = resolver(config, &factory);

        assert!(resolver.resolve_country("8.8.8.8").await.is_none());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_incomplete_credentials_fall_back_to_database() {
        let file = NamedTempFile::new().unwrap();
        let factory = Arc::new(MockFactory::default());
        let config = local_config(&file).remote(RemoteServiceConfig::new("1234", ""));
        let resolver = resolver(config, &factory);

        assert!(resolver.resolve_country("8.8.8.8").await.is_some());
        assert_eq!(resolver.provider_kind().await, ProviderKind::LocalDatabase);
    }

    #[tokio::test]
    async fn test_remote_preferred_over_database() {
        let file = NamedTempFile::new().unwrap();
        let factory = Arc::new(MockFactory::default());
        let config = local_config(&file).remote(RemoteServiceConfig::new("1234", "license"));
        let resolver = resolver(config, &factory);

        resolver.resolve_country("8.8.8.8").await;
        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_construction_failure_retried_on_next_resolution() {
        let factory = Arc::new(MockFactory::default());
        factory.fail.store(true, Ordering::SeqCst);
        let resolver = resolver(remote_config(), &factory);

        assert!(resolver.resolve_country("8.8.8.8").await.is_none());
        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
        assert!(logs_contain("failed to create remote lookup provider"));

        factory.fail.store(false, Ordering::SeqCst);
        assert!(resolver.resolve_country("8.8.8.8").await.is_some());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }

    // ===== Concurrency Tests =====

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolutions_share_one_entry() {
        const CALLERS: usize = 16;
        let factory = Arc::new(
            MockFactory::default()
                .with_distinct_answers()
                .with_barrier("93.184.216.34", CALLERS),
        );
        let resolver = resolver(remote_config(), &factory);

        // Open the provider first so every racer goes straight to the backend.
        resolver.resolve_country("192.0.2.1").await.unwrap();

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve_country("93.184.216.34").await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        // Every racer got its own backend answer, yet all see the first insert.
        assert_eq!(factory.total_lookups(), CALLERS + 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(resolver.cache_len(), 2);
        assert_eq!(resolver.cache.get("93.184.216.34").unwrap().result, results[0]);
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_addresses() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        let addresses: Vec<String> = (0..32u8).map(|i| format!("10.1.0.{}", i)).collect();
        let results = futures::future::join_all(
            addresses.iter().map(|ip| resolver.resolve_country(ip)),
        )
        .await;

        assert!(results.iter().all(Option::is_some));
        assert_eq!(resolver.cache_len(), 32);
        assert_eq!(factory.opened(), 1);
    }

    // ===== Maintenance: Local Database =====

    #[tokio::test]
    async fn test_stale_database_clears_cache_and_reopens() {
        let file = NamedTempFile::new().unwrap();
        let t0 = SystemTime::now() - Duration::from_secs(3600);
        set_mtime(&file, t0);

        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(local_config(&file), &factory);

        resolver.resolve_country("8.8.8.8").await;
        resolver.resolve_country("1.1.1.1").await;
        assert_eq!(resolver.cache_len(), 2);
        assert_eq!(resolver.provider_kind().await, ProviderKind::LocalDatabase);

        set_mtime(&file, t0 + Duration::from_secs(60));
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 0);
        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
        assert!(factory.provider(0).closed.load(Ordering::SeqCst));

        assert!(resolver.resolve_country("8.8.8.8").await.is_some());
        assert_eq!(factory.opened(), 2);
        assert_eq!(resolver.stats().cache_clears, 1);
    }

    #[tokio::test]
    async fn test_unchanged_database_kept_open() {
        let file = NamedTempFile::new().unwrap();
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(local_config(&file), &factory);

        resolver.resolve_country("8.8.8.8").await;
        resolver.run_maintenance().await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 1);
        assert_eq!(resolver.provider_kind().await, ProviderKind::LocalDatabase);
        assert!(!factory.provider(0).closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deleted_database_keeps_loaded_provider() {
        let file = NamedTempFile::new().unwrap();
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(local_config(&file), &factory);

        resolver.resolve_country("8.8.8.8").await;
        file.close().unwrap();
        resolver.run_maintenance().await;

        assert_eq!(resolver.provider_kind().await, ProviderKind::LocalDatabase);
        assert_eq!(resolver.cache_len(), 1);
    }

    // ===== Maintenance: Remote Service =====

    #[tokio::test(start_paused = true)]
    async fn test_idle_remote_provider_closed_and_recreated() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config().remote_idle_timeout(Duration::from_secs(30));
        let resolver = resolver(config, &factory);

        resolver.resolve_country("8.8.8.8").await;
        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);

        tokio::time::advance(Duration::from_secs(31)).await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
        assert!(factory.provider(0).closed.load(Ordering::SeqCst));
        // Remote answers stay valid across a reconnect.
        assert_eq!(resolver.cache_len(), 1);

        assert!(resolver.resolve_country("1.1.1.1").await.is_some());
        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);
        assert_eq!(factory.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_remote_provider_kept_open() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config().remote_idle_timeout(Duration::from_secs(30));
        let resolver = resolver(config, &factory);

        resolver.resolve_country("8.8.8.8").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        resolver.resolve_country("1.1.1.1").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);
        assert_eq!(factory.opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hits_do_not_keep_remote_provider_alive() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config().remote_idle_timeout(Duration::from_secs(30));
        let resolver = resolver(config, &factory);

        resolver.resolve_country("8.8.8.8").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        resolver.resolve_country("8.8.8.8").await;
        tokio::time::advance(Duration::from_secs(20)).await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
    }

    // ===== Maintenance: Eviction =====

    #[tokio::test(start_paused = true)]
    async fn test_eviction_trims_to_target() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config()
            .capacity(8)
            .eviction_target(0.5)
            .remote_idle_timeout(Duration::from_secs(3600));
        let resolver = resolver(config, &factory);

        for i in 0..8 {
            resolver.resolve_country(&format!("10.0.0.{}", i)).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(resolver.cache_len(), 8);

        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 4);
        assert_eq!(resolver.stats().evictions, 4);
        // The four newest entries survive.
        for i in 4..8 {
            assert!(resolver.cache.contains_key(&format!("10.0.0.{}", i)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_keeps_recently_accessed_entry() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config()
            .capacity(4)
            .eviction_target(0.75)
            .remote_idle_timeout(Duration::from_secs(3600));
        let resolver = resolver(config, &factory);

        for i in 1..=4 {
            resolver.resolve_country(&format!("192.0.2.{}", i)).await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        // Oldest insert, touched right before the tick.
        resolver.resolve_country("192.0.2.1").await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 3);
        assert!(resolver.cache.contains_key("192.0.2.1"));
        assert!(!resolver.cache.contains_key("192.0.2.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_orders_accesses_within_one_instant() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config()
            .capacity(4)
            .eviction_target(0.75)
            .remote_idle_timeout(Duration::from_secs(3600));
        let resolver = resolver(config, &factory);

        // The clock never moves: fill, touch and evict all happen at once.
        for i in 1..=4 {
            resolver.resolve_country(&format!("198.51.100.{}", i)).await;
        }
        resolver.resolve_country("198.51.100.1").await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 3);
        assert!(resolver.cache.contains_key("198.51.100.1"));
        assert!(!resolver.cache.contains_key("198.51.100.2"));
    }

    #[tokio::test]
    async fn test_access_stamps_strictly_increase() {
        let resolver = CountryResolver::new(ResolverConfig::new(), Arc::new(MockFactory::default()));

        let stamps: Vec<u64> = (0..1000).map(|_| resolver.next_access_stamp()).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_no_eviction_below_capacity() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config().capacity(10), &factory);

        for i in 0..9 {
            resolver.resolve_country(&format!("10.0.0.{}", i)).await;
        }
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 9);
        assert_eq!(resolver.stats().evictions, 0);
    }

    // ===== Maintenance Loop =====

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_loop_runs_periodically() {
        let factory = Arc::new(MockFactory::default());
        let config = remote_config()
            .maintenance_interval(Duration::from_millis(100))
            .remote_idle_timeout(Duration::from_millis(250));
        let resolver = resolver(config, &factory);
        resolver.start_maintenance();
        resolver.start_maintenance();

        resolver.resolve_country("8.8.8.8").await;
        assert_eq!(resolver.provider_kind().await, ProviderKind::RemoteService);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(resolver.provider_kind().await, ProviderKind::None);

        resolver.shutdown().await;
    }

    // ===== Shutdown =====

    #[tokio::test]
    async fn test_shutdown_fails_fast() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        resolver.resolve_country("8.8.8.8").await;
        resolver.shutdown().await;

        assert!(resolver.is_shutting_down().await);
        assert!(resolver.resolve_country("8.8.8.8").await.is_none());
        assert!(resolver.resolve_country("1.1.1.1").await.is_none());
        assert_eq!(factory.opened(), 1);
        assert!(factory.provider(0).closed.load(Ordering::SeqCst));
        assert_eq!(resolver.provider_kind().await, ProviderKind::None);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_resolution() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config(), &factory);

        resolver.shutdown().await;
        resolver.shutdown().await;

        assert!(resolver.resolve_country("8.8.8.8").await.is_none());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_maintenance_after_shutdown_is_noop() {
        let factory = Arc::new(MockFactory::default());
        let resolver = resolver(remote_config().capacity(1), &factory);

        resolver.resolve_country("8.8.8.8").await;
        resolver.shutdown().await;
        resolver.run_maintenance().await;

        assert_eq!(resolver.cache_len(), 1);
        assert_eq!(resolver.stats().evictions, 0);
    }

    #[test]
    fn test_resolver_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CountryResolver>();
    }
}
