//! Daily repeating schedules keyed by time of day.
//!
//! A schedule is an ordered table of `(start_seconds, value)` items covering one
//! day. Offsets are always resolved in a fixed UTC offset, so a schedule never
//! shifts across daylight-saving transitions.

use crate::{Error, GlucoseUnit, Result};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u32 = 86_400;

const MILLIS_PER_DAY: i64 = SECONDS_PER_DAY as i64 * 1000;

/// A value that takes effect at a time-of-day offset and repeats daily
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RepeatingScheduleValue<T> {
    pub start_seconds: u32,
    pub value: T,
}

impl<T> RepeatingScheduleValue<T> {
    pub fn new(start_seconds: u32, value: T) -> Self {
        Self {
            start_seconds,
            value,
        }
    }
}

/// A schedule value pinned to an absolute interval
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AbsoluteScheduleValue<T> {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub value: T,
}

/// Time-of-day lookup table repeating every day
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule<T> {
    items: Vec<RepeatingScheduleValue<T>>,
    utc_offset: FixedOffset,
}

/// Grams of carbohydrate covered by one unit of insulin
pub type CarbRatioSchedule = Schedule<f64>;

impl<T: Clone> Schedule<T> {
    /// Build a schedule, checking that items start at midnight, are strictly
    /// increasing and stay within one day.
    pub fn new(items: Vec<RepeatingScheduleValue<T>>, utc_offset: FixedOffset) -> Result<Self> {
        let first = items
            .first()
            .ok_or_else(|| Error::InvalidSchedule("schedule has no items".into()))?;
        if first.start_seconds != 0 {
            return Err(Error::InvalidSchedule(format!(
                "first item starts at {}s, expected 0",
                first.start_seconds
            )));
        }
        for pair in items.windows(2) {
            if pair[1].start_seconds <= pair[0].start_seconds {
                return Err(Error::InvalidSchedule(format!(
                    "item at {}s does not follow item at {}s",
                    pair[1].start_seconds, pair[0].start_seconds
                )));
            }
        }
        if let Some(last) = items.last() {
            if last.start_seconds >= SECONDS_PER_DAY {
                return Err(Error::InvalidSchedule(format!(
                    "item at {}s is beyond the end of the day",
                    last.start_seconds
                )));
            }
        }

        Ok(Self { items, utc_offset })
    }

    /// Build a schedule whose offsets are interpreted in UTC
    pub fn utc(items: Vec<RepeatingScheduleValue<T>>) -> Result<Self> {
        Self::new(items, Utc.fix())
    }

    pub fn items(&self) -> &[RepeatingScheduleValue<T>] {
        &self.items
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    /// Value in effect at `date`
    pub fn value_at(&self, date: DateTime<Utc>) -> T {
        let index = self.index_at(self.offset_millis(date));
        self.items[index].value.clone()
    }

    /// Piecewise-constant values covering `[start, end]`.
    ///
    /// The first value starts at `start`, each later one at a schedule boundary,
    /// and the last one ends at `end`.
    pub fn values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AbsoluteScheduleValue<T>>> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }

        let mut values = Vec::new();
        let mut segment_start = start;
        loop {
            let offset = self.offset_millis(segment_start);
            let index = self.index_at(offset);
            let until_boundary = self.next_boundary_millis(index, offset) - offset;
            let segment_end = (segment_start + Duration::milliseconds(until_boundary)).min(end);

            values.push(AbsoluteScheduleValue {
                start_date: segment_start,
                end_date: segment_end,
                value: self.items[index].value.clone(),
            });

            if segment_end >= end {
                break;
            }
            segment_start = segment_end;
        }

        Ok(values)
    }

    /// Milliseconds since local midnight in the schedule's reference offset
    fn offset_millis(&self, date: DateTime<Utc>) -> i64 {
        let local = date.timestamp_millis() + i64::from(self.utc_offset.local_minus_utc()) * 1000;
        local.rem_euclid(MILLIS_PER_DAY)
    }

    /// Index of the last item starting at or before `offset`, wrapping to
    /// yesterday's last item when `offset` precedes the first one.
    fn index_at(&self, offset: i64) -> usize {
        self.items
            .partition_point(|item| start_millis(item) <= offset)
            .checked_sub(1)
            .unwrap_or(self.items.len() - 1)
    }

    fn next_boundary_millis(&self, index: usize, offset: i64) -> i64 {
        let first = start_millis(&self.items[0]);
        if offset < first {
            return first;
        }
        match self.items.get(index + 1) {
            Some(next) => start_millis(next),
            None => MILLIS_PER_DAY + first,
        }
    }
}

impl Schedule<f64> {
    /// Build a schedule of strictly positive, finite values
    pub fn positive(items: Vec<RepeatingScheduleValue<f64>>, utc_offset: FixedOffset) -> Result<Self> {
        if let Some(item) = items
            .iter()
            .find(|item| !item.value.is_finite() || item.value <= 0.0)
        {
            return Err(Error::InvalidSchedule(format!(
                "value {} at {}s must be positive",
                item.value, item.start_seconds
            )));
        }
        Self::new(items, utc_offset)
    }
}

fn start_millis<T>(item: &RepeatingScheduleValue<T>) -> i64 {
    i64::from(item.start_seconds) * 1000
}

/// Glucose change per unit of insulin, by time of day
#[derive(Clone, Debug, PartialEq)]
pub struct InsulinSensitivitySchedule {
    pub unit: GlucoseUnit,
    pub values: Schedule<f64>,
}

impl InsulinSensitivitySchedule {
    pub fn new(
        unit: GlucoseUnit,
        items: Vec<RepeatingScheduleValue<f64>>,
        utc_offset: FixedOffset,
    ) -> Result<Self> {
        Ok(Self {
            unit,
            values: Schedule::positive(items, utc_offset)?,
        })
    }

    pub fn value_at(&self, date: DateTime<Utc>) -> f64 {
        self.values.value_at(date)
    }

    pub fn values_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AbsoluteScheduleValue<f64>>> {
        self.values.values_between(start, end)
    }
}

/// Carb ratio and insulin sensitivity values fetched for one range
#[derive(Clone, Debug, PartialEq)]
pub struct SampledSchedules {
    pub carb_ratios: Vec<AbsoluteScheduleValue<f64>>,
    pub sensitivities: Vec<AbsoluteScheduleValue<f64>>,
    pub unit: GlucoseUnit,
}

impl SampledSchedules {
    pub fn between(
        carb_ratio: &CarbRatioSchedule,
        sensitivity: &InsulinSensitivitySchedule,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            carb_ratios: carb_ratio.values_between(start, end)?,
            sensitivities: sensitivity.values_between(start, end)?,
            unit: sensitivity.unit,
        })
    }

    /// Whether both value lists span `[start, end]`
    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        spans(&self.carb_ratios, start, end) && spans(&self.sensitivities, start, end)
    }

    /// Glucose change per gram of carbohydrate at `at`
    pub fn carb_sensitivity_at(&self, at: DateTime<Utc>) -> Result<f64> {
        let ratio = value_in_effect(&self.carb_ratios, at)
            .ok_or(Error::IncompleteSchedule { at })?;
        let sensitivity = value_in_effect(&self.sensitivities, at)
            .ok_or(Error::IncompleteSchedule { at })?;

        if !ratio.is_finite() || *ratio <= 0.0 {
            return Err(Error::InvalidSchedule(format!(
                "carb ratio {} at {} must be positive",
                ratio, at
            )));
        }
        if !sensitivity.is_finite() || *sensitivity <= 0.0 {
            return Err(Error::InvalidSchedule(format!(
                "insulin sensitivity {} at {} must be positive",
                sensitivity, at
            )));
        }
        Ok(sensitivity / ratio)
    }
}

/// Value of the segment containing `at`; a boundary belongs to the later segment
pub fn value_in_effect<T>(values: &[AbsoluteScheduleValue<T>], at: DateTime<Utc>) -> Option<&T> {
    values
        .iter()
        .rev()
        .find(|value| value.start_date <= at && at <= value.end_date)
        .map(|value| &value.value)
}

fn spans<T>(values: &[AbsoluteScheduleValue<T>], start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    match (values.first(), values.last()) {
        (Some(first), Some(last)) => first.start_date <= start && last.end_date >= end,
        _ => false,
    }
}
