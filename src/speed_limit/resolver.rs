use super::{
    load_entries, CacheKey, CuratedDatabase, CrowdSourcedIndex, GeocodeHeuristic,
    NominatimGeocoder, RegionalEstimator, ReverseGeocoder, RoadInfo, SpeedLimitCache,
    SpeedLimitResult, SpeedLimitTier, TierQuery,
};
use crate::clock::Clock;
use crate::config::ResolverConfig;
use crate::types::Coordinate;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type PendingLookup = Shared<BoxFuture<'static, Option<SpeedLimitResult>>>;

/// Tiered speed limit resolution
///
/// # Cascade
/// 1. Spatial LRU cache
/// 2. Curated database (needs the road name)
/// 3. Crowd-sourced dataset within the configured radius
/// 4. Naming heuristic over the reverse lookup
/// 5. Regional estimate
///
/// The reverse lookup runs at most once per resolution, on the first tier that
/// needs it, and is bounded by `lookup_timeout`. A failed or slow lookup leaves
/// the road unknown and the cascade continues. Concurrent resolutions for the
/// same cache slot share one in-flight lookup.
pub struct SpeedLimitResolver {
    cache: SpeedLimitCache,
    tiers: Vec<Box<dyn SpeedLimitTier>>,
    geocoder: Option<Arc<dyn ReverseGeocoder>>,
    clock: Arc<dyn Clock>,
    lookup_timeout: Duration,
    carry_forward: chrono::Duration,
    in_flight: Mutex<HashMap<CacheKey, PendingLookup>>,
    /// Last limit handed out and when
    latest: Mutex<Option<(SpeedLimitResult, DateTime<Utc>)>>,
}

impl SpeedLimitResolver {
    /// Resolver with a cache and no tiers
    pub fn new(config: &ResolverConfig, clock: Arc<dyn Clock>) -> Self {
        SpeedLimitResolver {
            cache: SpeedLimitCache::new(config.cache_capacity, config.cache_precision_deg),
            tiers: Vec::new(),
            geocoder: None,
            clock,
            lookup_timeout: config.lookup_timeout(),
            carry_forward: chrono::Duration::seconds(config.carry_forward_secs),
            in_flight: Mutex::new(HashMap::new()),
            latest: Mutex::new(None),
        }
    }

    /// Full cascade from config
    ///
    /// Datasets that fail to load are logged and their tier is left out.
    pub fn from_config(config: &ResolverConfig, clock: Arc<dyn Clock>) -> Self {
        let mut resolver = Self::new(config, clock);

        if let Some(path) = &config.curated_path {
            match CuratedDatabase::load(path) {
                Ok(db) => {
                    log::info!("Loaded {} curated roads from {}", db.len(), path.display());
                    resolver = resolver.with_tier(Box::new(db));
                }
                Err(e) => log::warn!("Curated roads unavailable: {}", e),
            }
        }

        if let Some(path) = &config.crowd_dataset_path {
            match load_entries(path) {
                Ok(entries) => {
                    let index = CrowdSourcedIndex::from_entries(entries, config.crowd_radius_m);
                    log::info!("Indexed {} crowd-sourced limits from {}", index.len(), path.display());
                    resolver = resolver.with_tier(Box::new(index));
                }
                Err(e) => log::warn!("Crowd-sourced limits unavailable: {}", e),
            }
        }

        if let Some(url) = &config.geocoder_url {
            resolver = resolver.with_geocoder(Arc::new(NominatimGeocoder::new(url)));
        }

        resolver
            .with_tier(Box::new(GeocodeHeuristic))
            .with_tier(Box::new(RegionalEstimator::default()))
    }

    /// Add a tier; tiers always run in cascade order regardless of insertion order
    pub fn with_tier(mut self, tier: Box<dyn SpeedLimitTier>) -> Self {
        self.tiers.push(tier);
        self.tiers.sort_by_key(|t| t.source().tier());
        self
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn ReverseGeocoder>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn cache(&self) -> &SpeedLimitCache {
        &self.cache
    }

    /// Resolve a limit, waiting for the cascade
    ///
    /// None means every tier came up empty; nothing is cached in that case.
    pub async fn resolve(self: &Arc<Self>, coordinate: Coordinate) -> Option<SpeedLimitResult> {
        if !coordinate.is_valid() {
            return None;
        }

        if let Some(hit) = self.cache.get(&coordinate) {
            self.remember(&hit);
            return Some(hit);
        }

        self.pending_lookup(coordinate).await
    }

    /// Non-blocking limit for the per-sample path
    ///
    /// Returns a cache hit immediately. On a miss a background resolution is
    /// started and the most recent limit is carried forward if it is younger
    /// than the carry-forward window.
    pub fn limit_for_sample(self: &Arc<Self>, coordinate: Coordinate) -> Option<SpeedLimitResult> {
        if !coordinate.is_valid() {
            return None;
        }

        if let Some(hit) = self.cache.get(&coordinate) {
            self.remember(&hit);
            return Some(hit);
        }

        self.dispatch(coordinate);
        self.carried_forward()
    }

    /// Drop every cached and carried-forward limit
    pub fn clear_cache(&self) {
        self.cache.clear();
        *lock(&self.latest) = None;
        log::info!("Speed limit cache cleared");
    }

    fn dispatch(self: &Arc<Self>, coordinate: Coordinate) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::debug!("No runtime for background speed limit lookup");
            return;
        };

        let key = self.cache.key_for(&coordinate);
        if lock(&self.in_flight).contains_key(&key) {
            return;
        }

        let this = Arc::clone(self);
        handle.spawn(async move {
            this.pending_lookup(coordinate).await;
        });
    }

    /// Join the in-flight lookup for this slot, starting one if needed
    fn pending_lookup(self: &Arc<Self>, coordinate: Coordinate) -> PendingLookup {
        let key = self.cache.key_for(&coordinate);
        let mut in_flight = lock(&self.in_flight);

        in_flight
            .entry(key)
            .or_insert_with(|| {
                let this = Arc::clone(self);
                async move {
                    let result = this.run_cascade(coordinate).await;
                    lock(&this.in_flight).remove(&key);
                    result
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    async fn run_cascade(&self, coordinate: Coordinate) -> Option<SpeedLimitResult> {
        let mut road: Option<RoadInfo> = None;
        let mut looked_up = false;

        for tier in &self.tiers {
            if tier.needs_road() && !looked_up {
                road = self.reverse_lookup(coordinate).await;
                looked_up = true;
            }

            let query = TierQuery {
                coordinate,
                road: road.as_ref(),
                now: self.clock.now(),
            };

            if let Some(result) = tier.lookup(&query) {
                log::debug!(
                    "Speed limit {} mph from {:?} ({:?}) at ({:.5}, {:.5})",
                    result.speed_limit_mph,
                    result.source,
                    result.confidence,
                    coordinate.latitude,
                    coordinate.longitude
                );
                self.cache.insert(&coordinate, result.clone());
                self.remember(&result);
                return Some(result);
            }
        }

        log::debug!(
            "No speed limit for ({:.5}, {:.5})",
            coordinate.latitude,
            coordinate.longitude
        );
        None
    }

    async fn reverse_lookup(&self, coordinate: Coordinate) -> Option<RoadInfo> {
        let geocoder = self.geocoder.as_ref()?;

        match tokio::time::timeout(self.lookup_timeout, geocoder.reverse(coordinate)).await {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                log::warn!("Reverse lookup failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!(
                    "Reverse lookup timed out after {}ms",
                    self.lookup_timeout.as_millis()
                );
                None
            }
        }
    }

    fn remember(&self, result: &SpeedLimitResult) {
        *lock(&self.latest) = Some((result.clone(), self.clock.now()));
    }

    fn carried_forward(&self) -> Option<SpeedLimitResult> {
        let now = self.clock.now();
        lock(&self.latest)
            .as_ref()
            .filter(|(_, at)| now.signed_duration_since(*at) <= self.carry_forward)
            .map(|(result, _)| result.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::speed_limit::{
        Confidence, CuratedRoad, GeocodeError, LimitSource, Metro, SpeedLimitEntry,
    };
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGeocoder {
        calls: AtomicUsize,
        delay: Duration,
        info: Option<RoadInfo>,
    }

    impl FakeGeocoder {
        fn new(road_name: Option<&str>, delay: Duration) -> Arc<Self> {
            Arc::new(FakeGeocoder {
                calls: AtomicUsize::new(0),
                delay,
                info: road_name.map(|name| RoadInfo {
                    road_name: Some(name.to_string()),
                    ..Default::default()
                }),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReverseGeocoder for FakeGeocoder {
        fn reverse(&self, _coordinate: Coordinate) -> BoxFuture<'_, Result<RoadInfo, GeocodeError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let info = self.info.clone();
            async move {
                tokio::time::sleep(delay).await;
                info.ok_or(GeocodeError::NoData)
            }
            .boxed()
        }
    }

    const HOME: (f64, f64) = (37.7749, -122.4194);

    fn home() -> Coordinate {
        Coordinate::new(HOME.0, HOME.1)
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()))
    }

    fn curated() -> Box<CuratedDatabase> {
        Box::new(CuratedDatabase::from_entries(vec![CuratedRoad {
            name: "Market Street".to_string(),
            speed_limit_mph: 25,
            road_type: None,
            region: None,
        }]))
    }

    fn crowd() -> Box<CrowdSourcedIndex> {
        Box::new(CrowdSourcedIndex::from_entries(
            vec![SpeedLimitEntry {
                coordinate: home(),
                speed_limit_mph: 30,
                road_name: None,
                road_type: None,
            }],
            100.0,
        ))
    }

    fn regional() -> Box<RegionalEstimator> {
        Box::new(RegionalEstimator::new(
            vec![Metro {
                name: "SF".to_string(),
                center: home(),
                core_radius_km: 10.0,
            }],
            Vec::new(),
        ))
    }

    fn resolver(clock: Arc<ManualClock>) -> SpeedLimitResolver {
        SpeedLimitResolver::new(&ResolverConfig::default(), clock)
    }

    #[tokio::test]
    async fn test_curated_beats_crowd() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(crowd())
                .with_tier(curated())
                .with_geocoder(geocoder.clone()),
        );

        let result = resolver.resolve(home()).await.unwrap();
        assert_eq!(result.speed_limit_mph, 25);
        assert_eq!(result.source, LimitSource::Curated);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_local_tier_skips_network() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(crowd())
                .with_tier(Box::new(GeocodeHeuristic))
                .with_geocoder(geocoder.clone()),
        );

        let result = resolver.resolve(home()).await.unwrap();
        assert_eq!(result.source, LimitSource::CrowdSourced);
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_lookup_shared_by_tiers() {
        // Curated misses on "Valencia Street", heuristic then uses the same lookup
        let geocoder = FakeGeocoder::new(Some("Valencia Street"), Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_tier(Box::new(GeocodeHeuristic))
                .with_geocoder(geocoder.clone()),
        );

        let far = Coordinate::new(37.76, -122.42);
        let result = resolver.resolve(far).await.unwrap();
        assert_eq!(result.source, LimitSource::Geocoded);
        assert_eq!(result.speed_limit_mph, 35);
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_timeout_falls_through() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::from_secs(10));
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_tier(regional())
                .with_geocoder(geocoder.clone()),
        );

        let started = tokio::time::Instant::now();
        let result = resolver.resolve(home()).await.unwrap();
        assert_eq!(result.source, LimitSource::RegionalEstimate);
        assert_eq!(result.confidence, Confidence::VeryLow);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_failed_lookup_falls_through() {
        let geocoder = FakeGeocoder::new(None, Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_tier(Box::new(GeocodeHeuristic))
                .with_tier(regional())
                .with_geocoder(geocoder),
        );

        let result = resolver.resolve(home()).await.unwrap();
        assert_eq!(result.source, LimitSource::RegionalEstimate);
    }

    #[tokio::test]
    async fn test_no_tier_matches() {
        let resolver = Arc::new(resolver(clock()).with_tier(crowd()));
        let nowhere = Coordinate::new(0.0, 0.0);
        assert!(resolver.resolve(nowhere).await.is_none());
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn test_second_resolve_hits_cache() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_geocoder(geocoder.clone()),
        );

        resolver.resolve(home()).await.unwrap();
        resolver.resolve(home()).await.unwrap();
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(resolver.cache().hit_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_resolves_coalesce() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::from_millis(200));
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_geocoder(geocoder.clone()),
        );

        let nearby = Coordinate::new(HOME.0 + 0.00001, HOME.1);
        let (a, b) = tokio::join!(resolver.resolve(home()), resolver.resolve(nearby));
        assert_eq!(a, b);
        assert_eq!(geocoder.calls(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let geocoder = FakeGeocoder::new(Some("Market St"), Duration::ZERO);
        let resolver = Arc::new(
            resolver(clock())
                .with_tier(curated())
                .with_geocoder(geocoder.clone()),
        );

        resolver.resolve(home()).await.unwrap();
        resolver.clear_cache();
        assert!(resolver.cache().is_empty());

        resolver.resolve(home()).await.unwrap();
        assert_eq!(geocoder.calls(), 2);
    }

    #[tokio::test]
    async fn test_limit_for_sample_background_fill() {
        let resolver = Arc::new(resolver(clock()).with_tier(crowd()));

        // Nothing known yet; a background lookup starts
        assert!(resolver.limit_for_sample(home()).is_none());

        // Joining the slot waits for that lookup
        resolver.resolve(home()).await.unwrap();
        let hit = resolver.limit_for_sample(home()).unwrap();
        assert_eq!(hit.speed_limit_mph, 30);
    }

    #[tokio::test]
    async fn test_carry_forward_window() {
        let clock = clock();
        let resolver = Arc::new(resolver(clock.clone()).with_tier(crowd()));
        resolver.resolve(home()).await.unwrap();

        // Unknown spot, recent limit carries forward
        let elsewhere = Coordinate::new(37.80, -122.40);
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(resolver.limit_for_sample(elsewhere).unwrap().speed_limit_mph, 30);

        clock.advance(chrono::Duration::seconds(31));
        assert!(resolver.limit_for_sample(elsewhere).is_none());
    }

    #[test]
    fn test_limit_for_sample_without_runtime() {
        let resolver = Arc::new(resolver(clock()).with_tier(crowd()));
        assert!(resolver.limit_for_sample(home()).is_none());
        assert!(resolver.limit_for_sample(Coordinate::new(f64::NAN, 0.0)).is_none());
    }

    #[test]
    fn test_tiers_sorted() {
        let resolver = resolver(clock())
            .with_tier(regional())
            .with_tier(Box::new(GeocodeHeuristic))
            .with_tier(crowd())
            .with_tier(curated());
        let order: Vec<LimitSource> = resolver.tiers.iter().map(|t| t.source()).collect();
        assert_eq!(
            order,
            vec![
                LimitSource::Curated,
                LimitSource::CrowdSourced,
                LimitSource::Geocoded,
                LimitSource::RegionalEstimate
            ]
        );
    }
}
