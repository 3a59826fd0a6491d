//! Carbohydrate absorption model.
//!
//! Maps an entry and the time elapsed since it was eaten to the fraction of its
//! carbohydrate absorbed so far:
//! - Absorption time comes from the entry, or from a fast/medium/slow tier
//!   chosen by quantity
//! - The shape of the curve is one of a small set of normalized curves

use crate::types::{duration_seconds, seconds_between};
use crate::CarbEntry;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Shape of the absorbed fraction over normalized time
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AbsorptionCurve {
    /// Constant rate for the whole absorption time
    Linear,
    /// Rate rises linearly to the midpoint, then falls linearly
    Parabolic,
    /// Rate ramps up over the first 15%, holds, then ramps down from 50%
    #[default]
    PiecewiseLinear,
}

const PERCENT_END_OF_RISE: f64 = 0.15;
const PERCENT_START_OF_FALL: f64 = 0.5;

impl AbsorptionCurve {
    /// Fraction absorbed after `percent_time` of the absorption time has elapsed
    pub fn percent_absorbed(&self, percent_time: f64) -> f64 {
        if percent_time <= 0.0 {
            return 0.0;
        }
        if percent_time >= 1.0 {
            return 1.0;
        }

        let t = percent_time;
        let fraction = match self {
            AbsorptionCurve::Linear => t,
            AbsorptionCurve::Parabolic => {
                if t <= 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + 2.0 * t * (2.0 - t)
                }
            }
            AbsorptionCurve::PiecewiseLinear => {
                let rise = PERCENT_END_OF_RISE;
                let fall = PERCENT_START_OF_FALL;
                let scale = 2.0 / (1.0 + fall - rise);

                if t < rise {
                    0.5 * scale * t * t / rise
                } else if t < fall {
                    scale * (t - rise / 2.0)
                } else {
                    let into_fall = t - fall;
                    scale * (fall - rise / 2.0 + into_fall * (1.0 - into_fall / (1.0 - fall) / 2.0))
                }
            }
        };
        fraction.clamp(0.0, 1.0)
    }
}

/// Absorption speed category for entries without an explicit time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbsorptionTier {
    Fast,
    Medium,
    Slow,
}

/// Default absorption time for each tier
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DefaultAbsorptionTimes {
    pub fast: Duration,
    pub medium: Duration,
    pub slow: Duration,
}

impl Default for DefaultAbsorptionTimes {
    fn default() -> Self {
        Self {
            fast: Duration::minutes(30),
            medium: Duration::hours(3),
            slow: Duration::hours(5),
        }
    }
}

impl DefaultAbsorptionTimes {
    pub fn duration(&self, tier: AbsorptionTier) -> Duration {
        match tier {
            AbsorptionTier::Fast => self.fast,
            AbsorptionTier::Medium => self.medium,
            AbsorptionTier::Slow => self.slow,
        }
    }
}

/// Quantity thresholds selecting a tier; anything unmatched is medium
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TierThresholds {
    pub fast_below_grams: Option<f64>,
    pub slow_at_or_above_grams: Option<f64>,
}

impl TierThresholds {
    pub fn tier_for(&self, grams: f64) -> AbsorptionTier {
        if self.fast_below_grams.is_some_and(|limit| grams < limit) {
            AbsorptionTier::Fast
        } else if self.slow_at_or_above_grams.is_some_and(|limit| grams >= limit) {
            AbsorptionTier::Slow
        } else {
            AbsorptionTier::Medium
        }
    }
}

/// Absorption parameters shared by every entry in a projection
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AbsorptionModel {
    pub curve: AbsorptionCurve,
    pub default_times: DefaultAbsorptionTimes,
    pub thresholds: TierThresholds,
}

impl AbsorptionModel {
    pub fn new(
        curve: AbsorptionCurve,
        default_times: DefaultAbsorptionTimes,
        thresholds: TierThresholds,
    ) -> Self {
        Self {
            curve,
            default_times,
            thresholds,
        }
    }

    /// Longest time an entry may still be contributing absorption
    pub fn max_absorption_duration(&self) -> Duration {
        self.default_times.slow * 2
    }

    /// Tier used when an entry carries no absorption time
    pub fn tier_for(&self, entry: &CarbEntry) -> AbsorptionTier {
        self.thresholds.tier_for(entry.quantity)
    }

    /// Absorption time applied to `entry`, capped at the maximum duration
    pub fn absorption_time(&self, entry: &CarbEntry) -> Duration {
        let time = entry
            .absorption_time
            .unwrap_or_else(|| self.default_times.duration(self.tier_for(entry)));
        time.min(self.max_absorption_duration())
    }

    /// Fraction of `entry` absorbed once `elapsed` has passed since it started
    pub fn absorbed_fraction(&self, entry: &CarbEntry, elapsed: Duration) -> f64 {
        if entry.quantity <= 0.0 {
            return 0.0;
        }
        fraction_at(
            self.curve,
            duration_seconds(self.absorption_time(entry)),
            duration_seconds(elapsed),
        )
    }

    /// Fraction of `entry` absorbed at `date`
    pub fn absorbed_fraction_at(&self, entry: &CarbEntry, date: DateTime<Utc>) -> f64 {
        self.absorbed_fraction(entry, date - entry.start_date)
    }

    /// Grams of `entry` the model expects to absorb between `from` and `to`
    pub fn modeled_grams_between(&self, entry: &CarbEntry, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        modeled_grams_between(
            self.curve,
            entry,
            duration_seconds(self.absorption_time(entry)),
            from,
            to,
        )
    }
}

pub(crate) fn fraction_at(curve: AbsorptionCurve, absorption_seconds: f64, elapsed_seconds: f64) -> f64 {
    if elapsed_seconds <= 0.0 {
        return 0.0;
    }
    if absorption_seconds <= 0.0 {
        return 1.0;
    }
    curve.percent_absorbed(elapsed_seconds / absorption_seconds)
}

pub(crate) fn modeled_grams_between(
    curve: AbsorptionCurve,
    entry: &CarbEntry,
    absorption_seconds: f64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> f64 {
    if to <= from || entry.quantity <= 0.0 {
        return 0.0;
    }
    let before = fraction_at(curve, absorption_seconds, seconds_between(entry.start_date, from));
    let after = fraction_at(curve, absorption_seconds, seconds_between(entry.start_date, to));
    entry.quantity * (after - before).max(0.0)
}
