//! Investment score factors
//!
//! The score starts from a base and adds one contribution per factor. Each
//! factor is computed independently; a factor whose inputs are missing
//! returns `None` and contributes nothing, it never aborts the score.

use crate::analysis::types::MarketMetrics;
use crate::config::{ScoringConfig, Tier};
use crate::ingestion::types::Listing;
use rust_decimal::Decimal;

/// Inputs shared by all factors
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub listing: &'a Listing,
    pub market: &'a MarketMetrics,
    pub price_per_sqm: Option<Decimal>,
    pub yield_percent: Option<Decimal>,
}

/// One additive component of the investment score
pub trait ScoreFactor: Send + Sync {
    fn name(&self) -> &'static str;
    fn contribution(&self, ctx: &ScoreContext<'_>) -> Option<i32>;
}

/// Desirability of the listing's location
pub trait LocationSignal: Send + Sync {
    fn bonus(&self, listing: &Listing) -> Option<i32>;
}

/// Freshness of the listing
pub trait RecencySignal: Send + Sync {
    fn bonus(&self, listing: &Listing) -> Option<i32>;
}

/// Same bonus for every listing. No district-desirability or freshness data
/// is wired in yet, so this is the default for both signals.
#[derive(Debug, Clone, Copy)]
pub struct FixedBonus(pub i32);

impl LocationSignal for FixedBonus {
    fn bonus(&self, _listing: &Listing) -> Option<i32> {
        Some(self.0)
    }
}

impl RecencySignal for FixedBonus {
    fn bonus(&self, _listing: &Listing) -> Option<i32> {
        Some(self.0)
    }
}

/// Points for the first tier whose threshold `value` reaches (`>=`)
fn at_or_above(tiers: &[Tier], value: Decimal) -> Option<i32> {
    tiers.iter().find(|t| value >= t.threshold).map(|t| t.points)
}

/// Points for the first tier whose threshold `value` is strictly below
fn below(tiers: &[Tier], value: Decimal) -> Option<i32> {
    tiers.iter().find(|t| value < t.threshold).map(|t| t.points)
}

/// Discount of the listing's price-per-area against the market average
pub struct PriceFactor {
    discount_tiers: Vec<Tier>,
    premium_tiers: Vec<Tier>,
}

impl PriceFactor {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            discount_tiers: config.discount_tiers.clone(),
            premium_tiers: config.premium_tiers.clone(),
        }
    }

    /// `(avg - ppsqm) / avg * 100`; positive means cheaper than market
    pub fn discount_percent(price_per_sqm: Decimal, market_avg: Decimal) -> Option<Decimal> {
        if market_avg.is_zero() {
            return None;
        }
        market_avg
            .checked_sub(price_per_sqm)?
            .checked_div(market_avg)?
            .checked_mul(Decimal::ONE_HUNDRED)
    }
}

impl ScoreFactor for PriceFactor {
    fn name(&self) -> &'static str {
        "price"
    }

    fn contribution(&self, ctx: &ScoreContext<'_>) -> Option<i32> {
        let ppsqm = ctx.price_per_sqm?;
        let discount = Self::discount_percent(ppsqm, ctx.market.avg_price_per_sqm)?;

        at_or_above(&self.discount_tiers, discount)
            .or_else(|| below(&self.premium_tiers, discount))
    }
}

pub struct LocationFactor {
    signal: Box<dyn LocationSignal>,
}

impl LocationFactor {
    pub fn new(signal: impl LocationSignal + 'static) -> Self {
        Self {
            signal: Box::new(signal),
        }
    }
}

impl ScoreFactor for LocationFactor {
    fn name(&self) -> &'static str {
        "location"
    }

    fn contribution(&self, ctx: &ScoreContext<'_>) -> Option<i32> {
        self.signal.bonus(ctx.listing)
    }
}

pub struct YieldFactor {
    tiers: Vec<Tier>,
}

impl YieldFactor {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            tiers: config.yield_tiers.clone(),
        }
    }
}

impl ScoreFactor for YieldFactor {
    fn name(&self) -> &'static str {
        "yield"
    }

    fn contribution(&self, ctx: &ScoreContext<'_>) -> Option<i32> {
        at_or_above(&self.tiers, ctx.yield_percent?)
    }
}

pub struct RecencyFactor {
    signal: Box<dyn RecencySignal>,
}

impl RecencyFactor {
    pub fn new(signal: impl RecencySignal + 'static) -> Self {
        Self {
            signal: Box::new(signal),
        }
    }
}

impl ScoreFactor for RecencyFactor {
    fn name(&self) -> &'static str {
        "recency"
    }

    fn contribution(&self, ctx: &ScoreContext<'_>) -> Option<i32> {
        self.signal.bonus(ctx.listing)
    }
}

/// Base score plus a list of factors, clamped to 0..=100
pub struct Scorer {
    base: i32,
    factors: Vec<Box<dyn ScoreFactor>>,
}

impl Scorer {
    pub fn new(base: i32) -> Self {
        Self {
            base,
            factors: Vec::new(),
        }
    }

    /// Price, location, yield and recency factors with placeholder signals
    pub fn standard(config: &ScoringConfig) -> Self {
        Self::new(config.base_score)
            .with(PriceFactor::new(config))
            .with(LocationFactor::new(FixedBonus(config.location_bonus)))
            .with(YieldFactor::new(config))
            .with(RecencyFactor::new(FixedBonus(config.recency_bonus)))
    }

    pub fn with(mut self, factor: impl ScoreFactor + 'static) -> Self {
        self.factors.push(Box::new(factor));
        self
    }

    /// Swap the factor with the same name, or append it
    pub fn replace(mut self, factor: impl ScoreFactor + 'static) -> Self {
        match self.factors.iter().position(|f| f.name() == factor.name()) {
            Some(idx) => self.factors[idx] = Box::new(factor),
            None => self.factors.push(Box::new(factor)),
        }
        self
    }

    pub fn score(&self, ctx: &ScoreContext<'_>) -> u8 {
        let total = self
            .factors
            .iter()
            .filter_map(|f| f.contribution(ctx))
            .fold(self.base, |acc, points| acc.saturating_add(points));

        total.clamp(0, 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::MetricsSource;
    use crate::ingestion::types::PropertyType;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn listing() -> Listing {
        Listing {
            external_id: "aqar-1".to_string(),
            source: "aqar".to_string(),
            source_url: None,
            title: "Apartment in Al Olaya".to_string(),
            price: Some(dec!(450000)),
            size_sqm: Some(dec!(100)),
            bedrooms: Some(3),
            city: "Riyadh".to_string(),
            district: Some("Al Olaya".to_string()),
            property_type: PropertyType::Apartment,
            listed_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn market() -> MarketMetrics {
        MarketMetrics::from_average(dec!(4500), 10, MetricsSource::Inventory)
    }

    fn price_points(ppsqm: Decimal) -> Option<i32> {
        let l = listing();
        let m = market();
        let ctx = ScoreContext {
            listing: &l,
            market: &m,
            price_per_sqm: Some(ppsqm),
            yield_percent: None,
        };
        PriceFactor::new(&ScoringConfig::default()).contribution(&ctx)
    }

    #[test]
    fn test_price_factor_tiers() {
        assert_eq!(price_points(dec!(3600)), Some(40)); // 20% below
        assert_eq!(price_points(dec!(3825)), Some(30)); // 15% below
        assert_eq!(price_points(dec!(4050)), Some(20)); // 10% below
        assert_eq!(price_points(dec!(4275)), Some(10)); // 5% below
        assert_eq!(price_points(dec!(4400)), None); // ~2% below
        assert_eq!(price_points(dec!(4500)), None); // at market
        assert_eq!(price_points(dec!(4600)), Some(-10)); // ~2% above
        assert_eq!(price_points(dec!(4950)), Some(-10)); // exactly 10% above
        assert_eq!(price_points(dec!(5000)), Some(-20)); // ~11% above
    }

    #[test]
    fn test_discount_out_of_range_contributes_nothing() {
        assert_eq!(PriceFactor::discount_percent(Decimal::MAX, dec!(0.0001)), None);
        assert_eq!(PriceFactor::discount_percent(dec!(3600), Decimal::ZERO), None);
    }

    #[test]
    fn test_yield_factor_tiers() {
        let l = listing();
        let m = market();
        let factor = YieldFactor::new(&ScoringConfig::default());
        let points = |y: Decimal| {
            factor.contribution(&ScoreContext {
                listing: &l,
                market: &m,
                price_per_sqm: None,
                yield_percent: Some(y),
            })
        };

        assert_eq!(points(dec!(10.5)), Some(20));
        assert_eq!(points(dec!(8)), Some(15));
        assert_eq!(points(dec!(6.5)), Some(10));
        assert_eq!(points(dec!(5.85)), Some(5));
        assert_eq!(points(dec!(3.9)), None);
    }

    #[test]
    fn test_missing_inputs_degrade_to_placeholders() {
        let l = listing();
        let m = market();
        let ctx = ScoreContext {
            listing: &l,
            market: &m,
            price_per_sqm: None,
            yield_percent: None,
        };

        assert_eq!(Scorer::standard(&ScoringConfig::default()).score(&ctx), 70);
    }

    struct Extreme(i32);

    impl ScoreFactor for Extreme {
        fn name(&self) -> &'static str {
            "extreme"
        }

        fn contribution(&self, _ctx: &ScoreContext<'_>) -> Option<i32> {
            Some(self.0)
        }
    }

    #[test]
    fn test_score_is_clamped() {
        let l = listing();
        let m = market();
        let ctx = ScoreContext {
            listing: &l,
            market: &m,
            price_per_sqm: None,
            yield_percent: None,
        };

        assert_eq!(Scorer::new(50).with(Extreme(500)).score(&ctx), 100);
        assert_eq!(Scorer::new(50).with(Extreme(-500)).score(&ctx), 0);
        assert_eq!(Scorer::new(50).with(Extreme(i32::MAX)).score(&ctx), 100);
    }

    struct PrimeDistrict;

    impl LocationSignal for PrimeDistrict {
        fn bonus(&self, listing: &Listing) -> Option<i32> {
            match listing.district.as_deref() {
                Some("Al Olaya") => Some(30),
                _ => None,
            }
        }
    }

    #[test]
    fn test_location_signal_is_pluggable() {
        let l = listing();
        let m = market();
        let ctx = ScoreContext {
            listing: &l,
            market: &m,
            price_per_sqm: None,
            yield_percent: None,
        };

        let scorer = Scorer::standard(&ScoringConfig::default())
            .replace(LocationFactor::new(PrimeDistrict));
        // 50 base + 30 location + 5 recency
        assert_eq!(scorer.score(&ctx), 85);
    }
}
