// Library crate: collector ingestion, deal analysis, persistence and alerts

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod notify;

pub use analysis::{BatchAnalysisRunner, DealAnalyzer, MarketStatsProvider};
pub use config::{AnalysisConfig, RunConfig};
