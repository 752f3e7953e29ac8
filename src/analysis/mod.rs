//! Deal analysis engine: market stats, per-listing analysis and batch runs

pub mod batch;
pub mod cache;
pub mod deal;
pub mod market;
pub mod scoring;
pub mod types;

pub use batch::{BatchAnalysisRunner, BatchReport, BatchSummary, CancelFlag};
pub use deal::DealAnalyzer;
pub use market::{MarketDataSource, MarketStatsProvider, SegmentData};
pub use types::*;
