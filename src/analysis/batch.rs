//! Batch analysis with per-listing failure isolation
//!
//! Every listing is analyzed on its own; a failure is recorded with the
//! listing's id and cause and the batch moves on. Cancellation is
//! cooperative and checked between listings, so no partial analysis is
//! ever emitted.

use crate::analysis::deal::DealAnalyzer;
use crate::analysis::types::PropertyAnalysis;
use crate::error::AnalysisError;
use crate::ingestion::types::Listing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared stop request, checked between listings
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A listing that could not be analyzed
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    pub external_id: String,
    pub error: AnalysisError,
}

/// Everything a batch run produced
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful analyses, in input order
    pub analyses: Vec<PropertyAnalysis>,
    pub failures: Vec<BatchFailure>,
    /// Listings never attempted because the run was cancelled
    pub not_started: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.analyses.len() + self.failures.len() + self.not_started,
            analyzed: self.analyses.len(),
            failed: self.failures.len(),
            not_started: self.not_started,
            cancelled: self.cancelled,
        }
    }
}

/// Counts reported at the end of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub not_started: usize,
    pub cancelled: bool,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total: {}, analyzed: {}, failed: {}",
            self.total, self.analyzed, self.failed
        )?;
        if self.cancelled {
            write!(f, ", cancelled with {} not started", self.not_started)?;
        }
        Ok(())
    }
}

pub struct BatchAnalysisRunner<'a> {
    analyzer: &'a DealAnalyzer,
    cancel: CancelFlag,
}

impl<'a> BatchAnalysisRunner<'a> {
    pub fn new(analyzer: &'a DealAnalyzer) -> Self {
        Self {
            analyzer,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Analyze every listing; N listings with K failures yield N-K analyses
    pub fn analyze_batch(&self, listings: &[Listing]) -> Vec<PropertyAnalysis> {
        self.run(listings).analyses
    }

    pub fn run(&self, listings: &[Listing]) -> BatchReport {
        info!("Analyzing {} listings", listings.len());

        let mut report = BatchReport::default();

        for (idx, listing) in listings.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.not_started = listings.len() - idx;
                warn!(
                    "Batch cancelled after {} listings, {} not started",
                    idx, report.not_started
                );
                break;
            }

            match self.analyzer.analyze_one(listing) {
                Ok(analysis) => report.analyses.push(analysis),
                Err(error) => {
                    warn!("Skipping listing {}: {}", listing.external_id, error);
                    report.failures.push(BatchFailure {
                        external_id: listing.external_id.clone(),
                        error,
                    });
                }
            }
        }

        info!("Batch analysis complete: {}", report.summary());

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::market::{MarketStatsProvider, NoMarketData};
    use crate::config::AnalysisConfig;
    use crate::ingestion::types::PropertyType;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn listing(id: &str, price: Option<Decimal>) -> Listing {
        Listing {
            external_id: id.to_string(),
            source: "bayut".to_string(),
            source_url: None,
            title: format!("Listing {}", id),
            price,
            size_sqm: Some(dec!(120)),
            bedrooms: Some(2),
            city: "Jeddah".to_string(),
            district: None,
            property_type: PropertyType::Apartment,
            listed_at: None,
            scraped_at: Utc::now(),
        }
    }

    fn analyzer() -> DealAnalyzer {
        let config = AnalysisConfig::default();
        DealAnalyzer::new(MarketStatsProvider::new(NoMarketData, &config.market), &config)
    }

    #[test]
    fn test_failed_listing_is_skipped() {
        let listings = vec![
            listing("bayut-1", Some(dec!(500000))),
            listing("bayut-2", Some(dec!(600000))),
            listing("bayut-3", None),
            listing("bayut-4", Some(dec!(700000))),
            listing("bayut-5", Some(dec!(800000))),
        ];

        let a = analyzer();
        let runner = BatchAnalysisRunner::new(&a);
        let report = runner.run(&listings);

        assert_eq!(report.analyses.len(), 4);
        assert!(report.analyses.iter().all(|x| x.property_id != "bayut-3"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].external_id, "bayut-3");

        let ids: Vec<&str> = report.analyses.iter().map(|x| x.property_id.as_str()).collect();
        assert_eq!(ids, vec!["bayut-1", "bayut-2", "bayut-4", "bayut-5"]);
    }

    #[test]
    fn test_cancel_stops_between_listings() {
        let listings = vec![
            listing("bayut-1", Some(dec!(500000))),
            listing("bayut-2", Some(dec!(600000))),
        ];

        let a = analyzer();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let report = BatchAnalysisRunner::new(&a).with_cancel(cancel).run(&listings);

        assert!(report.cancelled);
        assert!(report.analyses.is_empty());
        assert_eq!(report.not_started, 2);
        assert_eq!(report.summary().total, 2);
    }

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            total: 5,
            analyzed: 4,
            failed: 1,
            not_started: 0,
            cancelled: false,
        };
        assert_eq!(summary.to_string(), "total: 5, analyzed: 4, failed: 1");
    }

    #[test]
    fn test_empty_batch() {
        let a = analyzer();
        assert!(BatchAnalysisRunner::new(&a).analyze_batch(&[]).is_empty());
    }
}
