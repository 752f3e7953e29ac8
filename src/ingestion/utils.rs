//! Utility functions for common operations

use crate::ingestion::types::PropertyType;
use anyhow::Result;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;

/// Download a collector feed via HTTP
pub async fn http_get(url: &str) -> Result<Vec<u8>> {
    info!("Downloading from {}", url);
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();

    if !status.is_success() {
        return Err(anyhow::anyhow!("HTTP request failed: {}", status));
    }

    let bytes = response.bytes().await?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Replace Arabic-Indic (and Eastern Arabic-Indic) digits with ASCII digits
pub fn normalize_digits(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            '\u{066B}' => '.',
            '\u{066C}' => ',',
            _ => c,
        })
        .collect()
}

/// Extract a decimal amount from free text such as "١٫٢ مليون ريال" or "850,000 SAR"
///
/// The first number found is used; "million"/"thousand" words scale it.
/// An amount too large for a Decimal after scaling is None.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let normalized = normalize_digits(text);

    let start = normalized.find(|c: char| c.is_ascii_digit())?;
    let number: String = normalized[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .filter(|c| *c != ',')
        .collect();
    let number = number.trim_end_matches('.');

    let value = Decimal::from_str(number).ok()?;

    let lower = normalized.to_lowercase();
    if normalized.contains("مليون") || lower.contains("million") {
        value.checked_mul(Decimal::from(1_000_000))
    } else if normalized.contains("ألف") || normalized.contains("الف") || lower.contains("thousand")
    {
        value.checked_mul(Decimal::from(1_000))
    } else {
        Some(value)
    }
}

/// Map a collector's property type label (Arabic category or English name)
pub fn parse_property_type(label: &str) -> Option<PropertyType> {
    let trimmed = label.trim();

    let arabic = match trimmed {
        "شقق" | "شقة" => Some(PropertyType::Apartment),
        "فلل" | "فيلا" => Some(PropertyType::Villa),
        "عماير" | "عمارة" => Some(PropertyType::Building),
        "أراضي" | "ارض" | "أرض" => Some(PropertyType::Land),
        "تجاري" => Some(PropertyType::Commercial),
        "مزارع" | "مزرعة" => Some(PropertyType::Farm),
        "استراحات" | "استراحة" => Some(PropertyType::Chalet),
        "مكاتب" | "مكتب" => Some(PropertyType::Office),
        "محلات" | "محل" => Some(PropertyType::Shop),
        "مستودعات" | "مستودع" => Some(PropertyType::Warehouse),
        _ => None,
    };
    if arabic.is_some() {
        return arabic;
    }

    let lower = trimmed.to_lowercase();
    PropertyType::ALL
        .iter()
        .copied()
        .find(|t| lower == t.as_str() || lower == format!("{}s", t.as_str()))
}

/// Build the globally unique listing id `{source}-{native_id}`
pub fn external_id(source: &str, native_id: &str) -> String {
    let prefix = format!("{}-", source);
    if native_id.starts_with(&prefix) {
        native_id.to_string()
    } else {
        format!("{}{}", prefix, native_id)
    }
}
