//! Error types for the carb_core library.

use chrono::{DateTime, Utc};
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for carb_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A schedule or entry source has not been set up
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// The requested interval ends before it starts
    #[error("Invalid range: end {end} is before start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Schedule values do not span the range a projection needs
    #[error("No schedule coverage for {start} to {end}")]
    ScheduleCoverage {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Schedule values have a gap at an instant an entry depends on
    #[error("Incomplete schedule: no value in effect at {at}")]
    IncompleteSchedule { at: DateTime<Utc> },

    /// Daily schedule violates its invariants
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Carbohydrate entry cannot be projected
    #[error("Invalid carb entry: {0}")]
    InvalidEntry(String),
}
