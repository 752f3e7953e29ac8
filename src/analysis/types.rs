//! Analysis data types: segments, market metrics and the analysis record

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::collections::HashMap;

use crate::ingestion::types::{Listing, PropertyType};

/// A (city, district, property type) triple keying market statistics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub city: String,
    pub district: Option<String>,
    pub property_type: PropertyType,
}

impl Segment {
    pub fn new(city: &str, district: Option<&str>, property_type: PropertyType) -> Self {
        Self {
            city: city.to_string(),
            district: district.map(str::to_string),
            property_type,
        }
    }

    pub fn of(listing: &Listing) -> Self {
        Self::new(
            &listing.city,
            listing.district.as_deref(),
            listing.property_type,
        )
    }

    /// `city:district:property_type`, with an empty district when absent
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.city,
            self.district.as_deref().unwrap_or(""),
            self.property_type
        )
    }
}

/// Where a set of market metrics came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "market_source_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    /// Computed from live inventory in the same segment
    Inventory,
    /// City-wide average seeded from the store
    CityAverage,
    /// Configured constants, no market data behind them
    Placeholder,
}

impl MetricsSource {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, MetricsSource::Placeholder)
    }
}

/// Aggregate price-per-area statistics for one segment
#[derive(Debug, Clone, PartialEq)]
pub struct MarketMetrics {
    pub avg_price_per_sqm: Decimal,
    pub median_price_per_sqm: Decimal,
    pub min_price_per_sqm: Decimal,
    pub max_price_per_sqm: Decimal,
    pub sample_size: usize,
    pub source: MetricsSource,
}

impl MarketMetrics {
    /// Metrics from a single average, used when only a city-wide figure exists
    pub fn from_average(avg: Decimal, sample_size: usize, source: MetricsSource) -> Self {
        Self {
            avg_price_per_sqm: avg,
            median_price_per_sqm: avg,
            min_price_per_sqm: avg,
            max_price_per_sqm: avg,
            sample_size,
            source,
        }
    }

    /// Compute metrics over price-per-area samples. Returns None for an empty
    /// slice or when the total is out of range.
    pub fn from_samples(samples: &[Decimal], source: MetricsSource) -> Option<Self> {
        SampleSet::from_values(samples.to_vec()).metrics(None, source)
    }
}

/// Sorted price-per-area samples of one segment, keyed by listing id.
///
/// Built once per segment; metrics with one listing left out are read off
/// the sorted values and the running total without copying them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleSet {
    ids: HashMap<String, Decimal>,
    sorted: Vec<Decimal>,
    /// None when the total does not fit in a Decimal
    sum: Option<Decimal>,
}

impl SampleSet {
    pub fn new(samples: Vec<(String, Decimal)>) -> Self {
        let values = samples.iter().map(|(_, v)| *v).collect();
        Self {
            ids: samples.into_iter().collect(),
            ..Self::from_values(values)
        }
    }

    fn from_values(mut values: Vec<Decimal>) -> Self {
        values.sort();
        let sum = values
            .iter()
            .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v));
        Self {
            ids: HashMap::new(),
            sorted: values,
            sum,
        }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// Metrics over every sample except the one recorded for `exclude`.
    /// An id not in the set excludes nothing.
    pub fn metrics(&self, exclude: Option<&str>, source: MetricsSource) -> Option<MarketMetrics> {
        let skip = exclude
            .and_then(|id| self.ids.get(id))
            .and_then(|value| self.sorted.binary_search(value).ok());

        let len = match skip {
            Some(_) => self.sorted.len() - 1,
            None => self.sorted.len(),
        };
        if len == 0 {
            return None;
        }

        let at = |i: usize| match skip {
            Some(s) if i >= s => self.sorted[i + 1],
            _ => self.sorted[i],
        };

        let sum = match skip {
            Some(s) => self.sum?.checked_sub(self.sorted[s])?,
            None => self.sum?,
        };
        let mid = len / 2;
        let median = if len % 2 == 0 {
            at(mid - 1).checked_add(at(mid))?.checked_div(Decimal::TWO)?
        } else {
            at(mid)
        };

        Some(MarketMetrics {
            avg_price_per_sqm: sum.checked_div(Decimal::from(len))?.round_dp(2),
            median_price_per_sqm: median.round_dp(2),
            min_price_per_sqm: at(0),
            max_price_per_sqm: at(len - 1),
            sample_size: len,
            source,
        })
    }
}

/// Deal classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "deal_type_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DealType {
    HotDeal,
    GoodDeal,
    FairPrice,
    Overpriced,
}

impl DealType {
    pub fn is_deal(&self) -> bool {
        matches!(self, DealType::HotDeal | DealType::GoodDeal)
    }
}

impl sqlx::postgres::PgHasArrayType for DealType {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("_deal_type_enum")
    }
}

impl std::fmt::Display for DealType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DealType::HotDeal => write!(f, "hot_deal"),
            DealType::GoodDeal => write!(f, "good_deal"),
            DealType::FairPrice => write!(f, "fair_price"),
            DealType::Overpriced => write!(f, "overpriced"),
        }
    }
}

/// Analysis output, one per listing. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyAnalysis {
    pub property_id: String,
    pub price_per_sqm: Option<Decimal>,
    pub district_avg_price_per_sqm: Decimal,
    pub price_vs_market_percent: Option<Decimal>,
    pub investment_score: u8,
    pub deal_type: DealType,
    pub estimated_monthly_rent: Option<Decimal>,
    pub estimated_annual_rent: Option<Decimal>,
    pub estimated_annual_yield_percent: Option<Decimal>,
    pub market_source: MetricsSource,
    pub market_sample_size: usize,
    pub analyzed_at: DateTime<Utc>,
}
