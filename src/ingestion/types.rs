//! Core data types for the ingestion pipeline
//! Pure data structures with no behavior

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;

use crate::analysis::types::PropertyAnalysis;

/// Raw collector output - tagged unions
#[derive(Debug)]
pub enum RawData {
    Json(serde_json::Value),
    Csv(String),
}

impl RawData {
    pub fn as_json(&self) -> anyhow::Result<&serde_json::Value> {
        match self {
            RawData::Json(json) => Ok(json),
            _ => Err(anyhow::anyhow!("Expected Json, got {:?}", self)),
        }
    }

    pub fn as_csv(&self) -> anyhow::Result<&str> {
        match self {
            RawData::Csv(text) => Ok(text),
            _ => Err(anyhow::anyhow!("Expected Csv, got {:?}", self)),
        }
    }
}

/// Property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "property_type_enum", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    Villa,
    Building,
    Land,
    Commercial,
    Farm,
    Chalet,
    Office,
    Shop,
    Warehouse,
}

impl PropertyType {
    pub const ALL: [PropertyType; 10] = [
        PropertyType::Apartment,
        PropertyType::Villa,
        PropertyType::Building,
        PropertyType::Land,
        PropertyType::Commercial,
        PropertyType::Farm,
        PropertyType::Chalet,
        PropertyType::Office,
        PropertyType::Shop,
        PropertyType::Warehouse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment",
            PropertyType::Villa => "villa",
            PropertyType::Building => "building",
            PropertyType::Land => "land",
            PropertyType::Commercial => "commercial",
            PropertyType::Farm => "farm",
            PropertyType::Chalet => "chalet",
            PropertyType::Office => "office",
            PropertyType::Shop => "shop",
            PropertyType::Warehouse => "warehouse",
        }
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listing record - pure data, no behavior
///
/// `price` stays optional here: a listing without a price still reaches the
/// analyzer, which rejects it as an input-validation failure.
#[derive(Debug, Clone)]
pub struct Listing {
    // Core identification
    pub external_id: String,
    pub source: String,
    pub source_url: Option<String>,
    pub title: String,

    // Financial / physical attributes
    pub price: Option<Decimal>,
    pub size_sqm: Option<Decimal>,
    pub bedrooms: Option<i32>,

    // Location (free text, source-specific spelling)
    pub city: String,
    pub district: Option<String>,

    pub property_type: PropertyType,

    pub listed_at: Option<DateTime<Utc>>,
    pub scraped_at: DateTime<Utc>,
}

/// A listing together with its analysis, ready to be persisted or notified
#[derive(Debug, Clone)]
pub struct AnalyzedListing {
    pub listing: Listing,
    pub analysis: PropertyAnalysis,
}

/// Tag for a price history row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceHistorySource {
    InitialScrape,
    ScraperUpdate,
}

impl PriceHistorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceHistorySource::InitialScrape => "initial_scrape",
            PriceHistorySource::ScraperUpdate => "scraper_update",
        }
    }
}

/// Stored row used for upsert decisions
#[derive(Debug, sqlx::FromRow)]
pub struct StoredPrice {
    pub id: uuid::Uuid,
    pub price: Option<Decimal>,
}

/// One active listing's price-per-area, used to build inventory market stats
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InventoryPoint {
    pub external_id: String,
    pub city: String,
    pub district: Option<String>,
    pub property_type: PropertyType,
    pub price_per_sqm: Decimal,
}

/// A stored listing seen again at a lower price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceDrop {
    pub external_id: String,
    pub old_price: Decimal,
    pub new_price: Decimal,
}

impl PriceDrop {
    /// Drop as a percentage of the old price, one decimal place
    pub fn percent(&self) -> Option<Decimal> {
        let percent = self
            .old_price
            .checked_sub(self.new_price)?
            .checked_div(self.old_price)?
            .checked_mul(Decimal::ONE_HUNDRED)?;
        Some(percent.round_dp(1))
    }
}

/// Write operation statistics
#[derive(Debug, Default, Clone)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub price_changes: usize,
    pub errors: usize,
    /// Price changes that lowered the price, for alerts
    pub price_drops: Vec<PriceDrop>,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, price changes: {} ({} drops), errors: {}",
            self.inserted,
            self.updated,
            self.price_changes,
            self.price_drops.len(),
            self.errors
        )
    }
}

/// Analysis run record
#[derive(Debug, sqlx::FromRow)]
pub struct AnalysisRun {
    pub id: uuid::Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub listings_total: i32,
    pub listings_analyzed: i32,
    pub listings_failed: i32,
    pub listings_not_started: i32,
    pub error_message: Option<String>,
}
