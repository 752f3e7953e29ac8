//! Deal analysis - price metrics, classification, yield and score for one listing
//!
//! All arithmetic is exact decimal; results are rounded half-to-even to two
//! decimal places. Every division and multiplication is checked: a result
//! outside the decimal range is treated as unknown, never as a panic.

use crate::analysis::market::MarketStatsProvider;
use crate::analysis::scoring::{ScoreContext, Scorer};
use crate::analysis::types::{DealType, MarketMetrics, PropertyAnalysis, Segment};
use crate::config::{AnalysisConfig, DealThresholds, YieldConfig};
use crate::error::AnalysisError;
use crate::ingestion::types::{Listing, PropertyType};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::debug;

/// Estimated rent for a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentalEstimate {
    pub monthly_rent: Decimal,
    pub annual_rent: Decimal,
    pub annual_yield_percent: Decimal,
}

/// Price divided by area, or None when the area is missing or not positive
pub fn price_per_unit_area(price: Decimal, area: Option<Decimal>) -> Option<Decimal> {
    match area {
        Some(area) if area > Decimal::ZERO => price.checked_div(area).map(|ppa| ppa.round_dp(2)),
        _ => None,
    }
}

/// Signed percentage deviation from the market average; negative is cheaper
pub fn percent_vs_market(price_per_area: Option<Decimal>, market_avg: Option<Decimal>) -> Option<Decimal> {
    let ppa = price_per_area?;
    let avg = market_avg?;
    if avg.is_zero() {
        return None;
    }
    let percent = ppa
        .checked_sub(avg)?
        .checked_div(avg)?
        .checked_mul(Decimal::ONE_HUNDRED)?;
    Some(percent.round_dp(2))
}

/// Classify a deviation. Exact threshold values fall into the better category.
pub fn classify_deal(percent: Option<Decimal>, thresholds: &DealThresholds) -> DealType {
    match percent {
        None => DealType::FairPrice,
        Some(p) if p <= -thresholds.hot_deal => DealType::HotDeal,
        Some(p) if p <= -thresholds.good_deal => DealType::GoodDeal,
        Some(p) if p > thresholds.overpriced => DealType::Overpriced,
        Some(_) => DealType::FairPrice,
    }
}

/// City base yield times the property-type multiplier, applied to the price.
/// None when the rent falls outside the decimal range.
pub fn estimate_rental_yield(
    property_type: PropertyType,
    city: &str,
    price: Decimal,
    yields: &YieldConfig,
) -> Option<RentalEstimate> {
    let adjusted_yield = yields
        .base_yield(city)
        .checked_mul(yields.multiplier(property_type))?;
    let annual_rent = price
        .checked_mul(adjusted_yield)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    let monthly_rent = annual_rent.checked_div(Decimal::from(12))?;

    Some(RentalEstimate {
        monthly_rent: monthly_rent.round_dp(2),
        annual_rent: annual_rent.round_dp(2),
        annual_yield_percent: adjusted_yield.round_dp(2),
    })
}

/// Validated, strictly positive price of a listing
fn require_price(listing: &Listing) -> Result<Decimal, AnalysisError> {
    match listing.price {
        None => Err(AnalysisError::MissingPrice {
            external_id: listing.external_id.clone(),
        }),
        Some(price) if price <= Decimal::ZERO => Err(AnalysisError::NonPositivePrice {
            external_id: listing.external_id.clone(),
            price,
        }),
        Some(price) => Ok(price),
    }
}

/// Stateless apart from the market-stats provider it delegates to
pub struct DealAnalyzer {
    market: MarketStatsProvider,
    scorer: Scorer,
    thresholds: DealThresholds,
    yields: YieldConfig,
}

impl DealAnalyzer {
    pub fn new(market: MarketStatsProvider, config: &AnalysisConfig) -> Self {
        Self {
            market,
            scorer: Scorer::standard(&config.scoring),
            thresholds: config.thresholds.clone(),
            yields: config.yields.clone(),
        }
    }

    /// Use a custom scorer, e.g. with a real location signal plugged in
    pub fn with_scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn market(&self) -> &MarketStatsProvider {
        &self.market
    }

    pub fn classify(&self, percent: Option<Decimal>) -> DealType {
        classify_deal(percent, &self.thresholds)
    }

    pub fn estimate_rent(&self, listing: &Listing) -> Result<RentalEstimate, AnalysisError> {
        let price = require_price(listing)?;
        estimate_rental_yield(listing.property_type, &listing.city, price, &self.yields).ok_or_else(
            || AnalysisError::Overflow {
                external_id: listing.external_id.clone(),
                quantity: "rental estimate",
            },
        )
    }

    /// Score 0..=100 for a listing against the given market metrics
    pub fn investment_score(&self, listing: &Listing, market: &MarketMetrics) -> u8 {
        let price = listing.price.filter(|p| *p > Decimal::ZERO);
        let price_per_sqm = price.and_then(|p| price_per_unit_area(p, listing.size_sqm));
        let yield_percent = price
            .and_then(|p| estimate_rental_yield(listing.property_type, &listing.city, p, &self.yields))
            .map(|rent| rent.annual_yield_percent);

        self.scorer.score(&ScoreContext {
            listing,
            market,
            price_per_sqm,
            yield_percent,
        })
    }

    /// Full analysis of one listing, scored against the market excluding itself
    pub fn analyze_one(&self, listing: &Listing) -> Result<PropertyAnalysis, AnalysisError> {
        let price = require_price(listing)?;
        let rent = self.estimate_rent(listing)?;

        let segment = Segment::of(listing);
        let market = self
            .market
            .metrics_for(&segment, Some(listing.external_id.as_str()));

        let price_per_sqm = price_per_unit_area(price, listing.size_sqm);
        let vs_market = percent_vs_market(price_per_sqm, Some(market.avg_price_per_sqm));
        let deal_type = self.classify(vs_market);

        let investment_score = self.scorer.score(&ScoreContext {
            listing,
            market: &market,
            price_per_sqm,
            yield_percent: Some(rent.annual_yield_percent),
        });

        debug!(
            "Analysis for {}: score={}, type={}, vs market={:?}%",
            listing.external_id, investment_score, deal_type, vs_market
        );

        Ok(PropertyAnalysis {
            property_id: listing.external_id.clone(),
            price_per_sqm,
            district_avg_price_per_sqm: market.avg_price_per_sqm,
            price_vs_market_percent: vs_market,
            investment_score,
            deal_type,
            estimated_monthly_rent: Some(rent.monthly_rent),
            estimated_annual_rent: Some(rent.annual_rent),
            estimated_annual_yield_percent: Some(rent.annual_yield_percent),
            market_source: market.source,
            market_sample_size: market.sample_size,
            analyzed_at: Utc::now(),
        })
    }
}
