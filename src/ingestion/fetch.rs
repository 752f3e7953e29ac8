//! Fetch functions - retrieve raw collector output from files or feeds

use crate::ingestion::types::RawData;
use crate::ingestion::utils::http_get;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Load collector output written to disk (`.json` or `.csv`)
pub fn load_file(path: &Path) -> Result<RawData> {
    info!("Loading collector output from {:?}", path);

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read collector output {:?}", path))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => decode_json(&text),
        Some("csv") => Ok(RawData::Csv(text)),
        other => Err(anyhow::anyhow!(
            "Unsupported collector output format: {:?}",
            other
        )),
    }
}

/// Fetch a collector's JSON feed over HTTP
pub async fn fetch_feed(url: &str) -> Result<RawData> {
    info!("Fetching collector feed from {}", url);

    let bytes = http_get(url).await?;
    let text = String::from_utf8(bytes).context("Feed is not valid UTF-8")?;

    decode_json(&text)
}

fn decode_json(text: &str) -> Result<RawData> {
    let json = serde_json::from_str(text).context("Collector output is not valid JSON")?;
    Ok(RawData::Json(json))
}
