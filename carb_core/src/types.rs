//! Core domain types for carbohydrate effect projection.
//!
//! This module defines the values that flow through the pipeline:
//! - Carbohydrate entries (the input records)
//! - Externally observed glucose effect velocities
//! - Glucose effects and carb values (the outputs)

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Units
// ============================================================================

/// Unit of blood glucose concentration
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MilligramsPerDeciliter,
    #[serde(rename = "mmol/L")]
    MillimolesPerLiter,
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlucoseUnit::MilligramsPerDeciliter => write!(f, "mg/dL"),
            GlucoseUnit::MillimolesPerLiter => write!(f, "mmol/L"),
        }
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A recorded carbohydrate intake
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbEntry {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub start_date: DateTime<Utc>,
    /// Grams of carbohydrate
    pub quantity: f64,
    /// Expected absorption time, serialized as seconds
    #[serde(
        default,
        with = "optional_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub absorption_time: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub food_type: Option<String>,
}

impl CarbEntry {
    pub fn new(start_date: DateTime<Utc>, quantity: f64, absorption_time: Option<Duration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_date,
            quantity,
            absorption_time,
            food_type: None,
        }
    }

    /// Reject entries that cannot be projected
    pub fn validate(&self) -> Result<()> {
        if !self.quantity.is_finite() || self.quantity < 0.0 {
            return Err(Error::InvalidEntry(format!(
                "entry {} has quantity {}",
                self.id, self.quantity
            )));
        }
        if let Some(time) = self.absorption_time {
            if time < Duration::zero() {
                return Err(Error::InvalidEntry(format!(
                    "entry {} has negative absorption time",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

/// Rate of glucose change attributed to carbohydrate absorption over an interval.
///
/// `velocity` is expressed in glucose units per second, using the unit of the
/// insulin sensitivity schedule it is reconciled against.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffectVelocity {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub velocity: f64,
}

// ============================================================================
// Outputs
// ============================================================================

/// Cumulative glucose effect at a point in time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlucoseEffect {
    pub date: DateTime<Utc>,
    pub quantity: f64,
    pub unit: GlucoseUnit,
}

/// Grams of carbohydrate at a point in time
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CarbValue {
    pub date: DateTime<Utc>,
    pub grams: f64,
}

// ============================================================================
// Time helpers
// ============================================================================

/// Signed seconds from `from` to `to`, at millisecond precision
pub(crate) fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    duration_seconds(to - from)
}

pub(crate) fn duration_seconds(duration: Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

pub(crate) fn seconds_to_duration(seconds: f64) -> Duration {
    Duration::milliseconds((seconds * 1000.0).round() as i64)
}

mod optional_seconds {
    use chrono::Duration;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&super::duration_seconds(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<f64>::deserialize(deserializer)? {
            Some(seconds) if !seconds.is_finite() => {
                Err(de::Error::custom("absorption time must be finite"))
            }
            Some(seconds) => Ok(Some(super::seconds_to_duration(seconds))),
            None => Ok(None),
        }
    }
}
