use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;
use geo_types::Geometry;

use super::cache::{CacheStats, TtlCache};
use super::fallback;
use super::inflight::InflightRegistry;
use crate::config::Config;
use crate::map::containment::{claims_within, ContainmentSummary};
use crate::map::feature::{AtlasCollection, ClaimFilter, DataSource};
use crate::map::layers::{LayerDataSource, LayerError, LayerKind};
use crate::map::region::Region;
use crate::maps_api::overpass::{self, UpstreamError, UpstreamSource};

/// The upstream-backed datasets. Assets have no upstream and skip the race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dataset {
    Boundaries,
    Fra,
}

impl Dataset {
    /// Unknown regions can share an extent, so the labels are part of every key.
    fn cache_key(&self, region: &Region) -> String {
        match self {
            Dataset::Boundaries => format!("boundaries_{}_{}", region.bounds, region.key()),
            Dataset::Fra => format!("fra_{}", region.key()),
        }
    }

    fn query(&self, region: &Region) -> String {
        match self {
            Dataset::Boundaries => overpass::boundaries_query(&region.bounds),
            Dataset::Fra => overpass::forest_query(&region.bounds),
        }
    }

    fn synthetic(&self, region: &Region, source: DataSource) -> AtlasCollection {
        match self {
            Dataset::Boundaries => fallback::boundaries(region, source),
            Dataset::Fra => fallback::claims(region, source),
        }
    }
}

/// Cache-first atlas data with a bounded upstream fetch and synthetic fallback.
///
/// Every method yields a collection. Upstream trouble shows up only in
/// `metadata.source` and `metadata.error`.
pub struct AtlasService {
    config: Config,
    upstream: Arc<dyn UpstreamSource>,
    boundary_cache: TtlCache<AtlasCollection>,
    fra_cache: TtlCache<AtlasCollection>,
    asset_cache: TtlCache<AtlasCollection>,
    inflight: InflightRegistry<Result<AtlasCollection, UpstreamError>>,
}

impl AtlasService {
    pub fn new(config: Config, upstream: Arc<dyn UpstreamSource>) -> Self {
        Self {
            boundary_cache: TtlCache::new(config.boundaries_ttl, config.cache_capacity),
            fra_cache: TtlCache::new(config.fra_ttl, config.cache_capacity),
            asset_cache: TtlCache::new(config.assets_ttl, config.cache_capacity),
            inflight: InflightRegistry::new(),
            upstream,
            config,
        }
    }

    /// Hit and miss counters for the boundaries, FRA and asset caches.
    pub fn cache_stats(&self) -> [CacheStats; 3] {
        [
            self.boundary_cache.stats(),
            self.fra_cache.stats(),
            self.asset_cache.stats(),
        ]
    }

    pub async fn boundaries(&self, region: &Region) -> AtlasCollection {
        self.fetch_or_fallback(Dataset::Boundaries, region).await
    }

    /// FRA claims for the region. The filter applies after the cache, which keeps the full set.
    pub async fn fra(&self, region: &Region, filter: &ClaimFilter) -> AtlasCollection {
        let mut collection = self.fetch_or_fallback(Dataset::Fra, region).await;
        if !filter.is_empty() {
            collection.retain_claims(filter);
        }
        collection
    }

    pub async fn assets(&self, region: &Region) -> AtlasCollection {
        let key = format!("assets_{}", region.key());
        if let Some(hit) = self.asset_cache.get(&key) {
            log::debug!("cache hit for {key}");
            return served(hit, true);
        }
        let collection = fallback::assets(region);
        self.asset_cache.insert(key, collection.clone());
        served(collection, false)
    }

    /// Claims anywhere in the state of `region` that fall inside the boundary `name`.
    pub async fn claims_within(
        &self,
        region: &Region,
        name: &str,
        boundary: &Geometry<f64>,
    ) -> ContainmentSummary {
        let claims = self.fra(&region.state_region(), &ClaimFilter::default()).await;
        claims_within(name, boundary, &claims.features, self.config.containment_buffer_deg)
    }

    fn budget(&self, dataset: Dataset) -> Duration {
        match dataset {
            Dataset::Boundaries => self.config.boundaries_budget,
            Dataset::Fra => self.config.fra_budget,
        }
    }

    fn cache(&self, dataset: Dataset) -> &TtlCache<AtlasCollection> {
        match dataset {
            Dataset::Boundaries => &self.boundary_cache,
            Dataset::Fra => &self.fra_cache,
        }
    }

    async fn fetch_or_fallback(&self, dataset: Dataset, region: &Region) -> AtlasCollection {
        let key = dataset.cache_key(region);
        let cache = self.cache(dataset);
        if let Some(hit) = cache.get(&key) {
            log::debug!("cache hit for {key}");
            return served(hit, true);
        }
        log::debug!("cache miss for {key}");

        let upstream = Arc::clone(&self.upstream);
        let query = dataset.query(region);
        let owned_region = region.clone();
        let flight = self.inflight.run(&key, move || async move {
            let response = upstream.query(&query).await?;
            let features = match dataset {
                Dataset::Boundaries => overpass::to_boundaries(&response, &owned_region),
                Dataset::Fra => overpass::to_claims(&response, &owned_region),
            };
            Ok(AtlasCollection::new(features, DataSource::Overpass, &owned_region))
        });

        let budget = self.budget(dataset);
        let collection = match tokio::time::timeout(budget, flight).await {
            Ok(Ok(collection)) if !collection.is_empty() => collection,
            Ok(Ok(_)) => {
                log::info!("upstream returned no features for {key}, serving fallback");
                dataset
                    .synthetic(region, DataSource::RealisticFallback)
                    .with_error("upstream returned no features")
            }
            Ok(Err(err)) => {
                log::warn!("upstream failed for {key}: {err}");
                dataset.synthetic(region, DataSource::RealisticFallback).with_error(err.to_string())
            }
            Err(_) => {
                log::info!("upstream exceeded {budget:?} for {key}, serving mock data");
                dataset
                    .synthetic(region, DataSource::FastMock)
                    .with_error(format!("upstream did not answer within {} ms", budget.as_millis()))
            }
        };

        cache.insert(key, collection.clone());
        served(collection, false)
    }
}

fn served(mut collection: AtlasCollection, cached: bool) -> AtlasCollection {
    collection.metadata.cached = cached;
    collection.metadata.timestamp = now_millis();
    collection
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl LayerDataSource for AtlasService {
    fn load<'a>(
        &'a self,
        kind: LayerKind,
        region: &'a Region,
    ) -> BoxFuture<'a, Result<AtlasCollection, LayerError>> {
        Box::pin(async move {
            Ok(match kind {
                LayerKind::Boundaries => self.boundaries(region).await,
                LayerKind::Claims => self.fra(region, &ClaimFilter::default()).await,
                LayerKind::Assets => self.assets(region).await,
            })
        })
    }
}
