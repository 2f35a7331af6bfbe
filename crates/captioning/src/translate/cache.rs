use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::TranslationConfig;
use crate::error::TranslationError;
use crate::task::AbortOnDrop;
use crate::translate::{
    Availability, DownloadProgress, LanguagePair, TranslationEngine, TranslatorHandle,
};

/// A cached translator bound to one (source, target) pair.
pub struct CachedTranslator {
    pair: LanguagePair,
    handle: Box<dyn TranslatorHandle>,
    /// Refreshed synchronously on every access, before any await, so a sweep
    /// firing while a call is in flight never sees the entry as idle.
    last_used_at: parking_lot::Mutex<Instant>,
    /// Earliest instant the next translate call on this pair may be issued.
    /// The async lock also serializes same-pair callers through the limiter.
    next_call_at: Mutex<Instant>,
}

impl CachedTranslator {
    pub fn pair(&self) -> &LanguagePair {
        &self.pair
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_at.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used_at.lock() = Instant::now();
    }
}

/// Owns translator handles keyed by language pair; rate-limits translate
/// calls per pair and evicts handles idle past the TTL.
pub struct TranslatorCache {
    engine: Arc<dyn TranslationEngine>,
    entries: DashMap<LanguagePair, Arc<CachedTranslator>>,
    /// Serializes handle creation so two racing `get`s cannot both create a
    /// handle for the same pair.
    create_lock: Mutex<()>,
    min_call_interval: Duration,
    idle_ttl: Duration,
    sweep: parking_lot::Mutex<Option<AbortOnDrop>>,
}

impl TranslatorCache {
    /// Creates the cache and starts its periodic idle sweep.
    pub fn new(engine: Arc<dyn TranslationEngine>, config: &TranslationConfig) -> Arc<Self> {
        let cache = Arc::new(Self {
            engine,
            entries: DashMap::new(),
            create_lock: Mutex::new(()),
            min_call_interval: Duration::from_millis(config.min_call_interval_ms),
            idle_ttl: Duration::from_secs(config.idle_ttl_secs),
            sweep: parking_lot::Mutex::new(None),
        });
        cache.spawn_sweep(Duration::from_secs(config.sweep_interval_secs.max(1)));
        cache
    }

    /// Returns the cached translator for `pair`, creating it on first use.
    ///
    /// Availability is checked with the engine before creation; a pair that
    /// needs a model download streams progress to `progress` (or into the
    /// log when no channel is supplied).
    pub async fn get(
        &self,
        pair: &LanguagePair,
        progress: Option<mpsc::Sender<DownloadProgress>>,
    ) -> Result<Arc<CachedTranslator>, TranslationError> {
        if let Some(entry) = self.entries.get(pair) {
            entry.touch();
            return Ok(Arc::clone(entry.value()));
        }

        let _creating = self.create_lock.lock().await;
        // A concurrent caller may have created the handle while we waited.
        if let Some(entry) = self.entries.get(pair) {
            entry.touch();
            return Ok(Arc::clone(entry.value()));
        }

        match self.engine.check_availability(pair).await? {
            Availability::Unsupported => {
                return Err(TranslationError::Unavailable {
                    src: pair.source.clone(),
                    target: pair.target.clone(),
                });
            }
            Availability::NeedsDownload => {
                info!(pair = %pair, "Translator model download required");
            }
            Availability::Ready => {}
        }

        let (progress_tx, progress_rx) = mpsc::channel(16);
        Self::forward_progress(progress_rx, progress);

        let handle = self.engine.create(pair, progress_tx).await?;
        let entry = Arc::new(CachedTranslator {
            pair: pair.clone(),
            handle,
            last_used_at: parking_lot::Mutex::new(Instant::now()),
            next_call_at: Mutex::new(Instant::now()),
        });
        self.entries.insert(pair.clone(), Arc::clone(&entry));
        debug!(pair = %pair, cached = self.entries.len(), "Translator created");
        Ok(entry)
    }

    /// Translates `text` through the cached entry, honoring the per-pair
    /// minimum call interval by delaying (never dropping) the call.
    pub async fn translate(
        &self,
        entry: &Arc<CachedTranslator>,
        text: &str,
    ) -> Result<String, TranslationError> {
        entry.touch();
        {
            let mut next_call_at = entry.next_call_at.lock().await;
            let now = Instant::now();
            if *next_call_at > now {
                debug!(
                    pair = %entry.pair,
                    wait_ms = (*next_call_at - now).as_millis() as u64,
                    "Rate limit wait before translate"
                );
                tokio::time::sleep_until(*next_call_at).await;
            }
            *next_call_at = Instant::now() + self.min_call_interval;
        }
        entry.touch();
        entry.handle.translate(text).await
    }

    /// Evicts every handle idle past the TTL. Runs periodically; callable
    /// directly for tests.
    pub async fn sweep_once(&self) {
        let expired: Vec<LanguagePair> = self
            .entries
            .iter()
            .filter(|e| e.value().idle_for() >= self.idle_ttl)
            .map(|e| e.key().clone())
            .collect();

        for pair in expired {
            // Re-check under the removal guard: the entry may have been
            // touched between the scan and now.
            if let Some((_, entry)) = self
                .entries
                .remove_if(&pair, |_, e| e.idle_for() >= self.idle_ttl)
            {
                info!(pair = %pair, "Evicting idle translator");
                entry.handle.release().await;
            }
        }
    }

    /// Releases every handle unconditionally and stops the sweep. Called on
    /// pipeline teardown.
    pub async fn destroy(&self) {
        *self.sweep.lock() = None;

        let pairs: Vec<LanguagePair> = self.entries.iter().map(|e| e.key().clone()).collect();
        for pair in pairs {
            if let Some((_, entry)) = self.entries.remove(&pair) {
                entry.handle.release().await;
            }
        }
        debug!("Translator cache destroyed");
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, pair: &LanguagePair) -> bool {
        self.entries.contains_key(pair)
    }

    fn spawn_sweep(self: &Arc<Self>, period: Duration) {
        let cache = Arc::downgrade(self);
        let guard = AbortOnDrop(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                cache.sweep_once().await;
            }
        }));
        *self.sweep.lock() = Some(guard);
    }

    /// Pipes engine download progress to the caller, or drains it into the
    /// log when nobody asked for it.
    fn forward_progress(
        mut from_engine: mpsc::Receiver<DownloadProgress>,
        to_caller: Option<mpsc::Sender<DownloadProgress>>,
    ) {
        tokio::spawn(async move {
            while let Some(update) = from_engine.recv().await {
                match &to_caller {
                    Some(caller) => {
                        if caller.send(update).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(
                        pair = %update.pair,
                        loaded = update.loaded_bytes,
                        total = ?update.total_bytes,
                        "Translator download progress"
                    ),
                }
            }
        });
    }
}

impl Drop for TranslatorCache {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            warn!(
                live = self.entries.len(),
                "Translator cache dropped without destroy()"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTranslationEngine;

    fn config(min_call_interval_ms: u64, idle_ttl_secs: u64) -> TranslationConfig {
        TranslationConfig {
            enabled: true,
            min_call_interval_ms,
            idle_ttl_secs,
            sweep_interval_secs: 3600,
            ..TranslationConfig::default()
        }
    }

    #[tokio::test]
    async fn caches_one_handle_per_pair() {
        let engine = MockTranslationEngine::new();
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        let pair = LanguagePair::new("en", "fr");

        let first = cache.get(&pair, None).await.unwrap();
        let second = cache.get(&pair, None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.created_pairs(), vec![pair.clone()]);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_gets_create_a_single_handle() {
        let engine = MockTranslationEngine::new();
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        let pair = LanguagePair::new("en", "de");

        let (a, b) = tokio::join!(cache.get(&pair, None), cache.get(&pair, None));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(engine.created_pairs().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_pair_is_an_error_and_never_cached() {
        let engine = MockTranslationEngine::new();
        engine.mark_unsupported("en", "xx");
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        let pair = LanguagePair::new("en", "xx");

        let result = cache.get(&pair, None).await;
        assert!(matches!(
            result,
            Err(TranslationError::Unavailable { .. })
        ));
        assert!(cache.is_empty());
        assert!(engine.created_pairs().is_empty());
    }

    #[tokio::test]
    async fn needs_download_streams_progress_to_the_caller() {
        let engine = MockTranslationEngine::new();
        engine.mark_needs_download("en", "ja");
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        let pair = LanguagePair::new("en", "ja");

        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        cache.get(&pair, Some(progress_tx)).await.unwrap();

        let first = progress_rx.recv().await.expect("progress update");
        assert_eq!(first.pair, pair);
        assert!(first.loaded_bytes <= first.total_bytes.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_delays_not_drops() {
        let engine = MockTranslationEngine::new();
        let cache = TranslatorCache::new(engine.clone(), &config(500, 300));
        let pair = LanguagePair::new("en", "fr");
        let entry = cache.get(&pair, None).await.unwrap();

        let started = Instant::now();
        cache.translate(&entry, "one").await.unwrap();
        cache.translate(&entry, "two").await.unwrap();
        let elapsed = started.elapsed();

        // The second call waited out the interval instead of being dropped.
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert_eq!(engine.translate_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_and_spares_fresh_handles() {
        let engine = MockTranslationEngine::new();
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        let idle = LanguagePair::new("en", "fr");
        let fresh = LanguagePair::new("en", "de");

        cache.get(&idle, None).await.unwrap();
        cache.get(&fresh, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        // Refresh one handle inside the TTL window.
        cache.get(&fresh, None).await.unwrap();

        cache.sweep_once().await;
        assert!(!cache.contains(&idle));
        assert!(cache.contains(&fresh));
        assert_eq!(engine.released_pairs(), vec![idle]);
    }

    #[tokio::test]
    async fn destroy_releases_everything() {
        let engine = MockTranslationEngine::new();
        let cache = TranslatorCache::new(engine.clone(), &config(0, 300));
        cache.get(&LanguagePair::new("en", "fr"), None).await.unwrap();
        cache.get(&LanguagePair::new("en", "de"), None).await.unwrap();

        cache.destroy().await;
        assert!(cache.is_empty());
        assert_eq!(engine.released_pairs().len(), 2);
    }
}
