//! Analysis configuration
//!
//! Every tunable of the analyzer lives here and is passed explicitly into the
//! market-stats provider and the deal analyzer. Defaults reproduce the values
//! the batch job has always run with; a TOML file and a handful of
//! environment variables can override them without code changes.

use crate::error::ConfigError;
use crate::ingestion::types::PropertyType;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level analysis configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub thresholds: DealThresholds,
    pub yields: YieldConfig,
    pub scoring: ScoringConfig,
    pub market: MarketConfig,
}

/// Percent-below-market breakpoints for deal classification
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DealThresholds {
    /// At or below `-hot_deal` percent is a hot deal
    pub hot_deal: Decimal,
    /// At or below `-good_deal` percent is a good deal
    pub good_deal: Decimal,
    /// Strictly above `overpriced` percent is overpriced
    pub overpriced: Decimal,
}

impl Default for DealThresholds {
    fn default() -> Self {
        Self {
            hot_deal: Decimal::new(150, 1),
            good_deal: Decimal::new(100, 1),
            overpriced: Decimal::new(100, 1),
        }
    }
}

/// Rental yield estimation tables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct YieldConfig {
    /// Base annual yield percent per recognized city name
    pub city_base_yields: BTreeMap<String, Decimal>,
    /// Base annual yield percent for any other city
    pub default_base_yield: Decimal,
    /// Multiplier per property type name
    pub type_multipliers: BTreeMap<String, Decimal>,
    /// Multiplier for property types without an entry
    pub default_multiplier: Decimal,
}

impl Default for YieldConfig {
    fn default() -> Self {
        let city_base_yields = BTreeMap::from([
            ("Riyadh".to_string(), Decimal::new(65, 1)),
            ("Jeddah".to_string(), Decimal::new(70, 1)),
        ]);

        let type_multipliers = BTreeMap::from([
            (PropertyType::Apartment.to_string(), Decimal::new(10, 1)),
            (PropertyType::Villa.to_string(), Decimal::new(9, 1)),
            (PropertyType::Building.to_string(), Decimal::new(12, 1)),
            (PropertyType::Commercial.to_string(), Decimal::new(13, 1)),
            (PropertyType::Office.to_string(), Decimal::new(11, 1)),
            (PropertyType::Shop.to_string(), Decimal::new(125, 2)),
        ]);

        Self {
            city_base_yields,
            default_base_yield: Decimal::new(75, 1),
            type_multipliers,
            default_multiplier: Decimal::ONE,
        }
    }
}

impl YieldConfig {
    pub fn base_yield(&self, city: &str) -> Decimal {
        self.city_base_yields
            .get(city)
            .copied()
            .unwrap_or(self.default_base_yield)
    }

    pub fn multiplier(&self, property_type: PropertyType) -> Decimal {
        self.type_multipliers
            .get(property_type.as_str())
            .copied()
            .unwrap_or(self.default_multiplier)
    }
}

/// A scoring breakpoint: `points` apply when the compared value crosses `threshold`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Tier {
    pub threshold: Decimal,
    pub points: i32,
}

impl Tier {
    pub fn new(threshold: Decimal, points: i32) -> Self {
        Self { threshold, points }
    }
}

/// Investment score weights and breakpoints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: i32,
    /// Discount percent at or above `threshold` earns `points`; highest first
    pub discount_tiers: Vec<Tier>,
    /// Discount percent strictly below `threshold` earns `points`; lowest first
    pub premium_tiers: Vec<Tier>,
    /// Yield percent at or above `threshold` earns `points`; highest first
    pub yield_tiers: Vec<Tier>,
    pub location_bonus: i32,
    pub recency_bonus: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 50,
            discount_tiers: vec![
                Tier::new(Decimal::from(20), 40),
                Tier::new(Decimal::from(15), 30),
                Tier::new(Decimal::from(10), 20),
                Tier::new(Decimal::from(5), 10),
            ],
            premium_tiers: vec![
                Tier::new(Decimal::from(-10), -20),
                Tier::new(Decimal::ZERO, -10),
            ],
            yield_tiers: vec![
                Tier::new(Decimal::from(10), 20),
                Tier::new(Decimal::from(8), 15),
                Tier::new(Decimal::from(6), 10),
                Tier::new(Decimal::from(4), 5),
            ],
            location_bonus: 15,
            recency_bonus: 5,
        }
    }
}

/// Market-stats provider settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    /// Minimum inventory points before a segment's own stats are trusted
    pub min_segment_sample: usize,
    pub fallback: FallbackMetrics,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600,
            cache_capacity: 10_000,
            min_segment_sample: 3,
            fallback: FallbackMetrics::default(),
        }
    }
}

/// Placeholder price-per-area statistics used when a segment has no data
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackMetrics {
    pub avg_price_per_sqm: Decimal,
    pub median_price_per_sqm: Decimal,
    pub min_price_per_sqm: Decimal,
    pub max_price_per_sqm: Decimal,
}

impl Default for FallbackMetrics {
    fn default() -> Self {
        Self {
            avg_price_per_sqm: Decimal::from(4500),
            median_price_per_sqm: Decimal::from(4200),
            min_price_per_sqm: Decimal::from(3000),
            max_price_per_sqm: Decimal::from(8000),
        }
    }
}

impl AnalysisConfig {
    /// Defaults, overlaid by an optional TOML file, overlaid by environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = decimal_env("HOT_DEAL_THRESHOLD")? {
            self.thresholds.hot_deal = v;
        }
        if let Some(v) = decimal_env("GOOD_DEAL_THRESHOLD")? {
            self.thresholds.good_deal = v;
        }
        if let Some(v) = decimal_env("OVERPRICED_THRESHOLD")? {
            self.thresholds.overpriced = v;
        }
        if let Some(v) = decimal_env("AVG_RENTAL_YIELD_DEFAULT")? {
            self.yields.default_base_yield = v;
        }
        if let Ok(raw) = env::var("MARKET_CACHE_TTL_SECONDS") {
            self.market.cache_ttl_seconds = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "MARKET_CACHE_TTL_SECONDS",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if t.hot_deal <= Decimal::ZERO || t.good_deal <= Decimal::ZERO {
            return Err(invalid("thresholds", "deal thresholds must be positive"));
        }
        if t.hot_deal < t.good_deal {
            return Err(invalid(
                "thresholds",
                format!("hot_deal ({}) must be >= good_deal ({})", t.hot_deal, t.good_deal),
            ));
        }

        let y = &self.yields;
        if y.default_base_yield <= Decimal::ZERO
            || y.city_base_yields.values().any(|v| *v <= Decimal::ZERO)
        {
            return Err(invalid("yields", "base yields must be positive"));
        }
        if y.default_multiplier <= Decimal::ZERO
            || y.type_multipliers.values().any(|v| *v <= Decimal::ZERO)
        {
            return Err(invalid("yields", "type multipliers must be positive"));
        }
        if let Some(name) = y
            .type_multipliers
            .keys()
            .find(|k| !PropertyType::ALL.iter().any(|t| t.as_str() == k.as_str()))
        {
            return Err(invalid("yields", format!("unknown property type '{}'", name)));
        }

        let f = &self.market.fallback;
        let ordered = f.min_price_per_sqm <= f.median_price_per_sqm
            && f.median_price_per_sqm <= f.max_price_per_sqm
            && f.min_price_per_sqm <= f.avg_price_per_sqm
            && f.avg_price_per_sqm <= f.max_price_per_sqm;
        if !ordered || f.avg_price_per_sqm <= Decimal::ZERO {
            return Err(invalid(
                "market.fallback",
                "expected 0 < min <= median/avg <= max",
            ));
        }
        if self.market.cache_capacity == 0 {
            return Err(invalid("market.cache_capacity", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

fn decimal_env(var: &'static str) -> Result<Option<Decimal>, ConfigError> {
    match env::var(var) {
        Ok(raw) => Decimal::from_str(raw.trim())
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
        Err(_) => Ok(None),
    }
}

/// Runtime settings for the batch binary, loaded from environment variables
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Required unless the run is a dry run
    pub database_url: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub admin_chat_id: Option<i64>,
    pub analysis_config_path: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let admin_chat_id = match non_empty_env("ADMIN_TELEGRAM_CHAT_ID") {
            Some(raw) => Some(raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "ADMIN_TELEGRAM_CHAT_ID",
                value: raw.clone(),
            })?),
            None => None,
        };

        Ok(RunConfig {
            database_url: non_empty_env("DATABASE_URL"),
            telegram_bot_token: non_empty_env("TELEGRAM_BOT_TOKEN"),
            admin_chat_id,
            analysis_config_path: non_empty_env("ANALYSIS_CONFIG").map(PathBuf::from),
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::MissingEnv("DATABASE_URL"))
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|s| !s.trim().is_empty())
}
