//! Active model cache
//!
//! Holds at most one loaded detector. Requesting a different model releases
//! the current one before the new one is loaded, so two models are never
//! resident at the same time. A failed load leaves the cache empty; nothing
//! about the failure is remembered and the next request starts over with
//! resolution.
//!
//! Every transition runs under one async mutex. Concurrent requests queue
//! behind a load instead of racing it, and a request that queued behind a
//! load of the same model gets the freshly loaded instance. Status reads go
//! to a separate snapshot and never wait on a load.

use chrono::{DateTime, Utc};
use dustwatch_core::{DustwatchResult, ModelSource};
use dustwatch_store::{SourceResolver, WeightsFetcher};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::traits::{Detector, DetectorLoader};

/// Cache state machine
pub enum CacheState {
    /// Nothing loaded
    Empty,
    /// A detector for the named model is loaded
    Loaded {
        name: String,
        source: ModelSource,
        detector: Arc<dyn Detector>,
        loaded_at: DateTime<Utc>,
    },
}

/// Snapshot of the cache for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// `empty`, `loading` or `loaded`
    pub state: &'static str,
    /// Model being loaded or loaded
    pub model: Option<String>,
    /// Where the loaded model came from
    pub source: Option<ModelSource>,
    /// When the loaded model finished loading
    pub loaded_at: Option<DateTime<Utc>>,
}

impl CacheStatus {
    fn empty() -> Self {
        Self {
            state: "empty",
            model: None,
            source: None,
            loaded_at: None,
        }
    }

    fn loading(name: &str) -> Self {
        Self {
            state: "loading",
            model: Some(name.to_string()),
            ..Self::empty()
        }
    }

    fn loaded(name: &str, source: ModelSource, loaded_at: DateTime<Utc>) -> Self {
        Self {
            state: "loaded",
            model: Some(name.to_string()),
            source: Some(source),
            loaded_at: Some(loaded_at),
        }
    }
}

/// Single-instance model cache
pub struct ActiveModelCache {
    resolver: Arc<dyn SourceResolver>,
    fetcher: Arc<dyn WeightsFetcher>,
    loader: Arc<dyn DetectorLoader>,
    state: Mutex<CacheState>,
    snapshot: RwLock<CacheStatus>,
}

impl ActiveModelCache {
    /// Create an empty cache
    pub fn new(
        resolver: Arc<dyn SourceResolver>,
        fetcher: Arc<dyn WeightsFetcher>,
        loader: Arc<dyn DetectorLoader>,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            loader,
            state: Mutex::new(CacheState::Empty),
            snapshot: RwLock::new(CacheStatus::empty()),
        }
    }

    fn publish(&self, status: CacheStatus) {
        *self.snapshot.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    /// Get the detector for `name`, loading it if needed.
    ///
    /// On a cache hit the resolver is not consulted. On a miss the current
    /// detector is released first. If loading fails the cache is left empty
    /// and the error is returned; the next call retries from scratch.
    pub async fn get_model(&self, name: &str) -> DustwatchResult<Arc<dyn Detector>> {
        let mut state = self.state.lock().await;

        if let CacheState::Loaded {
            name: current,
            detector,
            ..
        } = &*state
        {
            if current == name {
                if detector.is_alive() {
                    debug!(model = name, "Model cache hit");
                    return Ok(detector.clone());
                }
                warn!(model = name, "Loaded detector is no longer running, reloading");
            }
        }

        self.publish(CacheStatus::loading(name));
        if let CacheState::Loaded { name: previous, detector, .. } =
            std::mem::replace(&mut *state, CacheState::Empty)
        {
            info!(evicted = %previous, requested = name, "Releasing active model");
            detector.release().await;
        }

        let (source, detector) = self.load(name).await.map_err(|e| {
            self.publish(CacheStatus::empty());
            warn!(model = name, error = %e, "Model unavailable, cache left empty");
            e
        })?;

        info!(
            model = name,
            source = %source,
            loader = self.loader.name(),
            "Model loaded"
        );

        let loaded_at = Utc::now();
        self.publish(CacheStatus::loaded(name, source.clone(), loaded_at));
        *state = CacheState::Loaded {
            name: name.to_string(),
            source,
            detector: detector.clone(),
            loaded_at,
        };
        Ok(detector)
    }

    /// Release the loaded detector, if any, and return to the empty state
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        if let CacheState::Loaded { name, detector, .. } =
            std::mem::replace(&mut *state, CacheState::Empty)
        {
            info!(model = %name, "Invalidating active model");
            self.publish(CacheStatus::empty());
            detector.release().await;
        }
    }

    /// Name of the loaded model. `None` while a load is still in progress.
    pub fn current_model(&self) -> Option<String> {
        let status = self.status();
        match status.state {
            "loaded" => status.model,
            _ => None,
        }
    }

    /// Snapshot of the cache state
    pub fn status(&self) -> CacheStatus {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn load(&self, name: &str) -> DustwatchResult<(ModelSource, Arc<dyn Detector>)> {
        let source = self.resolver.resolve(name)?;

        let weights: PathBuf = match &source {
            ModelSource::Local(path) | ModelSource::Cache(path) => path.clone(),
            ModelSource::Remote(url) => self.fetcher.fetch(name, url).await?,
        };

        let detector = self.loader.load(name, &weights).await?;
        Ok((source, detector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dustwatch_core::{
        Detection, DetectionParams, DeploymentMode, DustwatchError, ModelRegistry,
    };
    use dustwatch_store::{ModelPolicy, ModelResolver};
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingResolver {
        sources: HashMap<String, ModelSource>,
        calls: AtomicUsize,
    }

    impl CountingResolver {
        fn new(pairs: &[(&str, ModelSource)]) -> Arc<Self> {
            Arc::new(Self {
                sources: pairs
                    .iter()
                    .map(|(n, s)| (n.to_string(), s.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SourceResolver for CountingResolver {
        fn resolve(&self, name: &str) -> DustwatchResult<ModelSource> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sources
                .get(name)
                .cloned()
                .ok_or_else(|| DustwatchError::ModelNotFound(name.to_string()))
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        fetched: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WeightsFetcher for FakeFetcher {
        async fn fetch(&self, name: &str, url: &str) -> DustwatchResult<PathBuf> {
            self.fetched.lock().unwrap().push(url.to_string());
            Ok(PathBuf::from("/cache").join(name))
        }
    }

    struct FakeDetector {
        name: String,
        weights: PathBuf,
        alive: AtomicBool,
        released: AtomicBool,
    }

    #[async_trait]
    impl Detector for FakeDetector {
        fn model_name(&self) -> &str {
            &self.name
        }

        async fn detect(
            &self,
            _png: &[u8],
            _params: &DetectionParams,
        ) -> DustwatchResult<Vec<Detection>> {
            Ok(Vec::new())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst) && !self.released.load(Ordering::SeqCst)
        }

        async fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeLoader {
        failing: std::sync::Mutex<HashSet<String>>,
        created: std::sync::Mutex<Vec<Arc<FakeDetector>>>,
        delay: Option<Duration>,
    }

    impl FakeLoader {
        fn fail(&self, name: &str, fail: bool) {
            let mut failing = self.failing.lock().unwrap();
            if fail {
                failing.insert(name.to_string());
            } else {
                failing.remove(name);
            }
        }

        fn created(&self) -> Vec<Arc<FakeDetector>> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DetectorLoader for FakeLoader {
        async fn load(&self, name: &str, weights: &Path) -> DustwatchResult<Arc<dyn Detector>> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(name) {
                return Err(DustwatchError::LoadFailed {
                    model: name.to_string(),
                    reason: "corrupt weights".to_string(),
                });
            }
            let detector = Arc::new(FakeDetector {
                name: name.to_string(),
                weights: weights.to_path_buf(),
                alive: AtomicBool::new(true),
                released: AtomicBool::new(false),
            });
            self.created.lock().unwrap().push(detector.clone());
            Ok(detector)
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn local(name: &str) -> ModelSource {
        ModelSource::Local(PathBuf::from("/models").join(name))
    }

    fn setup(
        pairs: &[(&str, ModelSource)],
    ) -> (ActiveModelCache, Arc<CountingResolver>, Arc<FakeFetcher>, Arc<FakeLoader>) {
        let resolver = CountingResolver::new(pairs);
        let fetcher = Arc::new(FakeFetcher::default());
        let loader = Arc::new(FakeLoader::default());
        let cache = ActiveModelCache::new(resolver.clone(), fetcher.clone(), loader.clone());
        (cache, resolver, fetcher, loader)
    }

    #[tokio::test]
    async fn test_repeated_requests_reuse_instance() {
        let (cache, resolver, _, loader) = setup(&[("best.pt", local("best.pt"))]);

        let first = cache.get_model("best.pt").await.unwrap();
        let second = cache.get_model("best.pt").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.calls(), 1);
        assert_eq!(loader.created().len(), 1);
    }

    #[tokio::test]
    async fn test_switch_releases_previous_model() {
        let (cache, _, _, loader) =
            setup(&[("best.pt", local("best.pt")), ("last.pt", local("last.pt"))]);

        cache.get_model("best.pt").await.unwrap();
        let last = cache.get_model("last.pt").await.unwrap();

        assert_eq!(last.model_name(), "last.pt");
        assert_eq!(cache.current_model().as_deref(), Some("last.pt"));

        let created = loader.created();
        assert_eq!(created.len(), 2);
        assert!(created[0].released.load(Ordering::SeqCst));
        assert!(!created[1].released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_load_failure_leaves_cache_empty_and_retries() {
        let (cache, resolver, _, loader) = setup(&[("best.pt", local("best.pt"))]);
        loader.fail("best.pt", true);

        let err = cache.get_model("best.pt").await.err().unwrap();
        assert!(err.is_unavailable());
        assert_eq!(cache.status().state, "empty");

        loader.fail("best.pt", false);
        let detector = cache.get_model("best.pt").await.unwrap();

        assert_eq!(detector.model_name(), "best.pt");
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_switch_does_not_keep_old_model() {
        let (cache, _, _, loader) =
            setup(&[("best.pt", local("best.pt")), ("last.pt", local("last.pt"))]);

        cache.get_model("best.pt").await.unwrap();
        loader.fail("last.pt", true);

        assert!(cache.get_model("last.pt").await.is_err());
        assert!(cache.current_model().is_none());
        assert!(loader.created()[0].released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_found() {
        let (cache, _, _, loader) = setup(&[("best.pt", local("best.pt"))]);

        let err = cache.get_model("yolov9.pt").await.err().unwrap();
        assert!(matches!(err, DustwatchError::ModelNotFound(_)));
        assert!(loader.created().is_empty());
    }

    #[tokio::test]
    async fn test_remote_source_is_fetched_before_loading() {
        let (cache, _, fetcher, loader) = setup(&[(
            "last.pt",
            ModelSource::Remote("https://example.com/last.pt".to_string()),
        )]);

        cache.get_model("last.pt").await.unwrap();

        assert_eq!(
            *fetcher.fetched.lock().unwrap(),
            vec!["https://example.com/last.pt".to_string()]
        );
        assert_eq!(loader.created()[0].weights, PathBuf::from("/cache/last.pt"));

        let status = cache.status();
        assert_eq!(status.state, "loaded");
        assert!(matches!(status.source, Some(ModelSource::Remote(_))));
        assert!(status.loaded_at.is_some());
    }

    #[tokio::test]
    async fn test_dead_detector_is_reloaded() {
        let (cache, resolver, _, loader) = setup(&[("best.pt", local("best.pt"))]);

        let first = cache.get_model("best.pt").await.unwrap();
        loader.created()[0].alive.store(false, Ordering::SeqCst);

        let second = cache.get_model("best.pt").await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(loader.created().len(), 2);
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let (cache, _, _, loader) = setup(&[("best.pt", local("best.pt"))]);

        cache.get_model("best.pt").await.unwrap();
        cache.invalidate().await;

        assert_eq!(cache.status().state, "empty");
        assert!(loader.created()[0].released.load(Ordering::SeqCst));

        // Invalidating an empty cache is a no-op
        cache.invalidate().await;
    }

    #[tokio::test]
    async fn test_concurrent_requests_load_once() {
        let resolver = CountingResolver::new(&[("best.pt", local("best.pt"))]);
        let loader = Arc::new(FakeLoader {
            delay: Some(Duration::from_millis(50)),
            ..FakeLoader::default()
        });
        let cache = Arc::new(ActiveModelCache::new(
            resolver.clone(),
            Arc::new(FakeFetcher::default()),
            loader.clone(),
        ));

        let (a, b) = tokio::join!(cache.get_model("best.pt"), cache.get_model("best.pt"));

        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(loader.created().len(), 1);
        assert_eq!(resolver.calls(), 1);
    }

    #[tokio::test]
    async fn test_status_readable_while_loading() {
        let resolver = CountingResolver::new(&[("best.pt", local("best.pt"))]);
        let loader = Arc::new(FakeLoader {
            delay: Some(Duration::from_millis(500)),
            ..FakeLoader::default()
        });
        let cache = Arc::new(ActiveModelCache::new(
            resolver,
            Arc::new(FakeFetcher::default()),
            loader,
        ));

        let background = cache.clone();
        let load = tokio::spawn(async move { background.get_model("best.pt").await.map(|_| ()) });

        tokio::time::timeout(Duration::from_millis(400), async {
            while cache.status().state != "loading" {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let status = cache.status();
        assert_eq!(status.model.as_deref(), Some("best.pt"));
        assert!(status.loaded_at.is_none());
        assert!(cache.current_model().is_none());

        load.await.unwrap().unwrap();
        assert_eq!(cache.status().state, "loaded");
        assert_eq!(cache.current_model().as_deref(), Some("best.pt"));
    }

    #[tokio::test]
    async fn test_restricted_mode_loads_only_permitted_model() {
        let root = tempfile::tempdir().unwrap();
        let local_dir = root.path().join("Model");
        let cache_dir = root.path().join("cache");
        std::fs::create_dir_all(&local_dir).unwrap();
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(local_dir.join("best.pt"), b"weights").unwrap();
        std::fs::write(cache_dir.join("best.pt"), b"cached-weights").unwrap();

        let registry = ModelRegistry::from_pairs([
            ("best.pt", "https://example.com/best.pt"),
            ("last.pt", "https://example.com/last.pt"),
        ])
        .unwrap();
        let policy = ModelPolicy::new(
            DeploymentMode::Restricted,
            registry.clone(),
            "best.pt".into(),
            "best.pt".into(),
        )
        .unwrap();
        let resolver = Arc::new(ModelResolver::new(local_dir.clone(), cache_dir, registry, 1));
        let fetcher = Arc::new(FakeFetcher::default());
        let loader = Arc::new(FakeLoader::default());
        let cache = ActiveModelCache::new(resolver, fetcher.clone(), loader.clone());

        let effective = policy.normalize(Some("last.pt"));
        assert_eq!(effective.name, "best.pt");
        assert!(effective.overridden);

        cache.get_model(&effective.name).await.unwrap();

        let created = loader.created();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "best.pt");
        assert_eq!(created[0].weights, local_dir.join("best.pt"));
        assert!(fetcher.fetched.lock().unwrap().is_empty());
    }
}
