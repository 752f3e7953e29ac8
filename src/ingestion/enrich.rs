//! Enrichment functions - merge analyses back onto the listings they describe

use crate::analysis::types::PropertyAnalysis;
use crate::ingestion::types::{AnalyzedListing, Listing};
use std::collections::HashMap;
use tracing::{debug, info};

/// Pair every analysis with its listing by external id.
/// Listings without an analysis (failed or not started) are dropped.
/// Pure function - output keeps the input order of `listings`.
pub fn attach_analyses(
    listings: Vec<Listing>,
    analyses: Vec<PropertyAnalysis>,
) -> Vec<AnalyzedListing> {
    let total = listings.len();
    let mut by_id: HashMap<String, PropertyAnalysis> = analyses
        .into_iter()
        .map(|a| (a.property_id.clone(), a))
        .collect();

    let analyzed: Vec<AnalyzedListing> = listings
        .into_iter()
        .filter_map(|listing| match by_id.remove(&listing.external_id) {
            Some(analysis) => Some(AnalyzedListing { listing, analysis }),
            None => {
                debug!("No analysis for {}, skipping", listing.external_id);
                None
            }
        })
        .collect();

    info!("Attached analyses to {}/{} listings", analyzed.len(), total);

    analyzed
}
