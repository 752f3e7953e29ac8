//! Market statistics per segment
//!
//! A [`MarketStatsProvider`] answers "what does a square meter cost in this
//! segment?" by asking a [`MarketDataSource`] for the segment's data and
//! caching it per segment key. Metrics that leave the analyzed listing out
//! are derived from the cached entry, so a batch computes each segment once.
//! When no source knows the segment it substitutes the configured
//! placeholder metrics, tagged [`MetricsSource::Placeholder`] with a zero
//! sample size so downstream consumers can tell them apart.

use crate::analysis::cache::TtlCache;
use crate::analysis::types::{MarketMetrics, MetricsSource, SampleSet, Segment};
use crate::config::{FallbackMetrics, MarketConfig};
use crate::ingestion::types::{InventoryPoint, PropertyType};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a source knows about one segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentData {
    /// Individual samples; usable only while `min_sample` remain after
    /// leaving a listing out
    Samples { set: SampleSet, min_sample: usize },
    /// A single pre-aggregated figure
    Fixed(MarketMetrics),
    /// Answers from several sources, first usable one wins
    Layered(Vec<SegmentData>),
}

impl SegmentData {
    pub fn metrics(&self, exclude: Option<&str>) -> Option<MarketMetrics> {
        match self {
            SegmentData::Samples { set, min_sample } => set
                .metrics(exclude, MetricsSource::Inventory)
                .filter(|m| m.sample_size >= *min_sample),
            SegmentData::Fixed(metrics) => Some(metrics.clone()),
            SegmentData::Layered(layers) => layers.iter().find_map(|l| l.metrics(exclude)),
        }
    }
}

/// Anything that can describe a segment's market
pub trait MarketDataSource: Send + Sync {
    /// Everything the source knows about `segment`, or None
    fn segment_data(&self, segment: &Segment) -> Option<SegmentData>;

    /// Metrics for `segment`, leaving out the listing `exclude` when given.
    /// `None` means the source has nothing trustworthy for this segment.
    fn segment_metrics(&self, segment: &Segment, exclude: Option<&str>) -> Option<MarketMetrics> {
        self.segment_data(segment)?.metrics(exclude)
    }
}

/// Market stats computed from stored active inventory
#[derive(Debug, Default)]
pub struct InventorySource {
    segments: HashMap<String, SampleSet>,
    min_sample: usize,
}

impl InventorySource {
    pub fn new(points: Vec<InventoryPoint>, min_sample: usize) -> Self {
        let mut grouped: HashMap<String, Vec<(String, Decimal)>> = HashMap::new();
        for point in points {
            if point.price_per_sqm <= Decimal::ZERO {
                continue;
            }
            let key = Segment::new(&point.city, point.district.as_deref(), point.property_type).key();
            grouped
                .entry(key)
                .or_default()
                .push((point.external_id, point.price_per_sqm));
        }

        Self {
            segments: grouped
                .into_iter()
                .map(|(key, samples)| (key, SampleSet::new(samples)))
                .collect(),
            min_sample: min_sample.max(1),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl MarketDataSource for InventorySource {
    fn segment_data(&self, segment: &Segment) -> Option<SegmentData> {
        let set = self.segments.get(&segment.key())?;
        Some(SegmentData::Samples {
            set: set.clone(),
            min_sample: self.min_sample,
        })
    }
}

/// City-wide average price per area, seeded from the store
#[derive(Debug, Default)]
pub struct CityAverageSource {
    averages: HashMap<String, (Decimal, usize)>,
}

impl CityAverageSource {
    /// `averages` holds (city, average price per sqm, sample size)
    pub fn new(averages: Vec<(String, Decimal, usize)>) -> Self {
        Self {
            averages: averages
                .into_iter()
                .filter(|(_, avg, _)| *avg > Decimal::ZERO)
                .map(|(city, avg, n)| (city, (avg, n)))
                .collect(),
        }
    }

    /// Average price per area for a city, None when the store has none
    pub fn city_average(&self, city: &str) -> Option<Decimal> {
        self.averages.get(city).map(|(avg, _)| avg.round_dp(2))
    }
}

impl MarketDataSource for CityAverageSource {
    fn segment_data(&self, segment: &Segment) -> Option<SegmentData> {
        let (avg, sample_size) = self.averages.get(&segment.city)?;
        Some(SegmentData::Fixed(MarketMetrics::from_average(
            avg.round_dp(2),
            *sample_size,
            MetricsSource::CityAverage,
        )))
    }
}

/// Tries each source in order, first usable answer wins
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<Box<dyn MarketDataSource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl MarketDataSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }
}

impl MarketDataSource for SourceChain {
    // Every source's data is kept: whether inventory is usable depends on
    // which listing is left out.
    fn segment_data(&self, segment: &Segment) -> Option<SegmentData> {
        let mut layers: Vec<SegmentData> = self
            .sources
            .iter()
            .filter_map(|s| s.segment_data(segment))
            .collect();

        match layers.len() {
            0 => None,
            1 => layers.pop(),
            _ => Some(SegmentData::Layered(layers)),
        }
    }
}

/// Source with no data; every lookup falls back to placeholders
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMarketData;

impl MarketDataSource for NoMarketData {
    fn segment_data(&self, _segment: &Segment) -> Option<SegmentData> {
        None
    }
}

/// Cached, never-failing market metrics lookup
pub struct MarketStatsProvider {
    source: Box<dyn MarketDataSource>,
    cache: TtlCache<String, Option<Arc<SegmentData>>>,
    fallback: FallbackMetrics,
}

impl MarketStatsProvider {
    pub fn new(source: impl MarketDataSource + 'static, config: &MarketConfig) -> Self {
        Self {
            source: Box::new(source),
            cache: TtlCache::new(
                Duration::from_secs(config.cache_ttl_seconds),
                config.cache_capacity,
            ),
            fallback: config.fallback.clone(),
        }
    }

    /// Metrics for the segment, excluding `exclude_property_id` from the sample
    pub fn get_market_metrics(
        &self,
        city: &str,
        district: Option<&str>,
        property_type: PropertyType,
        exclude_property_id: Option<&str>,
    ) -> MarketMetrics {
        let segment = Segment::new(city, district, property_type);
        self.metrics_for(&segment, exclude_property_id)
    }

    pub fn metrics_for(&self, segment: &Segment, exclude: Option<&str>) -> MarketMetrics {
        let key = segment.key();
        let data = self.cache.get_or_insert_with(key.clone(), || {
            let data = self.source.segment_data(segment);
            if data.is_none() {
                warn!(
                    "No market data for {}, using placeholder metrics (low confidence)",
                    key
                );
            }
            data.map(Arc::new)
        });

        match data.and_then(|d| d.metrics(exclude)) {
            Some(metrics) => {
                debug!(
                    "Market metrics for {}: avg {} over {} samples ({:?})",
                    key, metrics.avg_price_per_sqm, metrics.sample_size, metrics.source
                );
                metrics
            }
            None => {
                debug!("Not enough market data for {} without {:?}", key, exclude);
                self.placeholder()
            }
        }
    }

    /// The configured placeholder, flagged as such
    pub fn placeholder(&self) -> MarketMetrics {
        MarketMetrics {
            avg_price_per_sqm: self.fallback.avg_price_per_sqm,
            median_price_per_sqm: self.fallback.median_price_per_sqm,
            min_price_per_sqm: self.fallback.min_price_per_sqm,
            max_price_per_sqm: self.fallback.max_price_per_sqm,
            sample_size: 0,
            source: MetricsSource::Placeholder,
        }
    }

    pub fn cached_segments(&self) -> usize {
        self.cache.len()
    }

    /// Forget all cached metrics, e.g. between batch runs
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn prune_expired(&self) -> usize {
        self.cache.prune_expired()
    }
}
