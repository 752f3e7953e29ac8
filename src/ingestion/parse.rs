//! Parse functions - transform collector output into typed Listing structs

use crate::error::ParseError;
use crate::ingestion::types::{Listing, RawData};
use crate::ingestion::utils::{external_id, parse_amount, parse_property_type};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// A numeric field as collectors send it: a JSON number or free text
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Number(serde_json::Number),
    Text(String),
}

impl RawAmount {
    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            RawAmount::Number(n) => {
                let s = n.to_string();
                Decimal::from_str(&s)
                    .or_else(|_| Decimal::from_scientific(&s))
                    .ok()
            }
            RawAmount::Text(s) if s.trim().is_empty() => None,
            RawAmount::Text(s) => parse_amount(s),
        }
    }
}

/// Collector record - loosely typed, validated into a Listing
#[derive(Debug, Deserialize)]
struct RawListing {
    #[serde(alias = "id")]
    external_id: Option<String>,
    source: Option<String>,
    #[serde(alias = "url")]
    source_url: Option<String>,
    title: Option<String>,
    price: Option<RawAmount>,
    #[serde(alias = "size", alias = "area")]
    size_sqm: Option<RawAmount>,
    bedrooms: Option<RawAmount>,
    city: Option<String>,
    district: Option<String>,
    #[serde(alias = "type")]
    property_type: Option<String>,
    listed_at: Option<String>,
}

/// Result of parsing one collector payload
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub listings: Vec<Listing>,
    pub rejected: usize,
}

/// Parse collector output (JSON array, `{"listings": [...]}` or CSV) into listings.
/// `source` names the collector and prefixes native ids.
pub fn parse_listings(raw: RawData, source: &str) -> Result<ParseOutcome> {
    let rows: Vec<Result<RawListing, String>> = match &raw {
        RawData::Json(json) => json_rows(json)?,
        RawData::Csv(text) => csv_rows(text),
    };

    info!("Parsing {} raw records from {}", rows.len(), source);

    let scraped_at = Utc::now();
    let mut outcome = ParseOutcome::default();

    for (idx, row) in rows.into_iter().enumerate() {
        let parsed =
            row.and_then(|r| parse_record(r, source, scraped_at).map_err(|e| e.to_string()));
        match parsed {
            Ok(listing) => outcome.listings.push(listing),
            Err(e) => {
                outcome.rejected += 1;
                if outcome.rejected <= 10 {
                    // Only log first 10 errors
                    warn!("Rejected record {} from {}: {}", idx, source, e);
                }
            }
        }
    }

    info!(
        "Parsed {} listings from {} ({} rejected)",
        outcome.listings.len(),
        source,
        outcome.rejected
    );

    Ok(outcome)
}

fn json_rows(json: &serde_json::Value) -> Result<Vec<Result<RawListing, String>>> {
    let items = match json {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(obj) => obj
            .get("listings")
            .and_then(|v| v.as_array())
            .ok_or_else(|| anyhow::anyhow!("JSON object has no 'listings' array"))?,
        other => return Err(anyhow::anyhow!("Unexpected JSON payload: {}", other)),
    };

    Ok(items
        .iter()
        .map(|item| RawListing::deserialize(item).map_err(|e| e.to_string()))
        .collect())
}

fn csv_rows(text: &str) -> Vec<Result<RawListing, String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    reader
        .deserialize::<RawListing>()
        .map(|r| r.map_err(|e| e.to_string()))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_record(
    raw: RawListing,
    default_source: &str,
    scraped_at: DateTime<Utc>,
) -> Result<Listing, ParseError> {
    let source = non_empty(raw.source).unwrap_or_else(|| default_source.to_string());
    let native_id = non_empty(raw.external_id).ok_or(ParseError::MissingField("external_id"))?;
    let city = non_empty(raw.city).ok_or(ParseError::MissingField("city"))?;
    let type_label = non_empty(raw.property_type).ok_or(ParseError::MissingField("property_type"))?;
    let property_type = parse_property_type(&type_label)
        .ok_or_else(|| ParseError::UnknownPropertyType(type_label.clone()))?;

    let price = raw.price.as_ref().and_then(RawAmount::to_decimal);
    if price.is_none() {
        debug!("Record {} has no usable price", native_id);
    }

    let bedrooms = match raw.bedrooms.as_ref() {
        None => None,
        Some(amount) => match amount.to_decimal() {
            Some(d) => d.trunc().to_i32(),
            None => {
                return Err(ParseError::InvalidNumber {
                    field: "bedrooms",
                    value: format!("{:?}", amount),
                })
            }
        },
    };

    let listed_at = raw
        .listed_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Listing {
        external_id: external_id(&source, &native_id),
        source,
        source_url: non_empty(raw.source_url),
        title: non_empty(raw.title).unwrap_or_default(),
        price,
        size_sqm: raw.size_sqm.as_ref().and_then(RawAmount::to_decimal),
        bedrooms,
        city,
        district: non_empty(raw.district),
        property_type,
        listed_at,
        scraped_at,
    })
}
