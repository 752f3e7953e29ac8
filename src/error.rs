//! Typed errors for the analysis pipeline

use rust_decimal::Decimal;
use thiserror::Error;

/// Per-listing input failures. These are the only errors the batch runner
/// absorbs; everything else propagates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("listing {external_id} has no price")]
    MissingPrice { external_id: String },

    #[error("listing {external_id} has non-positive price {price}")]
    NonPositivePrice { external_id: String, price: Decimal },

    #[error("listing {external_id}: {quantity} is out of range")]
    Overflow {
        external_id: String,
        quantity: &'static str,
    },
}

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnv { var: &'static str, value: String },

    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
}

/// A collector record rejected at the collector/analyzer boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid number in '{field}': {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unknown property type '{0}'")]
    UnknownPropertyType(String),
}
