//! Carb status resolution.
//!
//! For every entry active in a window this module decides how its absorption is
//! described: purely by the absorption model, or by externally observed glucose
//! effect velocities where those overlap the entry's active window.

use crate::absorption::{fraction_at, modeled_grams_between, AbsorptionCurve};
use crate::schedule::SampledSchedules;
use crate::types::{duration_seconds, seconds_between};
use crate::{AbsorptionModel, CarbEntry, Error, GlucoseEffectVelocity, Result};
use chrono::{DateTime, Duration, Utc};

/// Remaining grams below which an entry counts as fully absorbed
const COMPLETE_TOLERANCE_GRAMS: f64 = 1e-6;

/// Grams attributed to an entry from an observed velocity interval
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedAbsorption {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub grams: f64,
}

/// How an entry's absorption is determined
#[derive(Clone, Debug, PartialEq)]
pub enum Absorption {
    /// Entirely from the absorption model
    Modeled,
    /// Observed segments take precedence; gaps between them are modeled
    Observed { segments: Vec<ObservedAbsorption> },
}

/// Resolved absorption state of one entry
#[derive(Clone, Debug, PartialEq)]
pub struct CarbStatus {
    pub entry: CarbEntry,
    pub absorption: Absorption,
    pub is_complete: bool,
    /// Absorption time applied to the entry
    pub absorption_time: Duration,
    pub curve: AbsorptionCurve,
    /// Glucose change per gram, from the schedules in effect at the entry's start
    pub carb_sensitivity: f64,
}

impl CarbStatus {
    /// Total grams attributed from observed velocities, if any overlapped
    pub fn observed_grams(&self) -> Option<f64> {
        match &self.absorption {
            Absorption::Modeled => None,
            Absorption::Observed { segments } => Some(segments.iter().map(|s| s.grams).sum()),
        }
    }

    /// Grams absorbed between the entry's start and `at`
    pub fn absorbed_grams_at(&self, at: DateTime<Utc>) -> f64 {
        let quantity = self.entry.quantity;
        if quantity <= 0.0 || at <= self.entry.start_date {
            return 0.0;
        }

        let segments: &[ObservedAbsorption] = match &self.absorption {
            Absorption::Modeled => &[],
            Absorption::Observed { segments } => segments,
        };

        let mut grams = 0.0;
        let mut cursor = self.entry.start_date;
        for segment in segments {
            if segment.start_date >= at {
                break;
            }
            if segment.start_date > cursor {
                grams += self.modeled_grams_between(cursor, segment.start_date);
            }
            let elapsed = seconds_between(segment.start_date, segment.end_date.min(at));
            grams += segment.grams * elapsed / seconds_between(segment.start_date, segment.end_date);
            cursor = cursor.max(segment.end_date);
        }
        if cursor < at {
            let observed_until = segments.iter().map(|s| s.end_date).max();
            grams += match observed_until {
                Some(until) if cursor >= until => {
                    self.remaining_after_observation(cursor, at, quantity - grams)
                }
                _ => self.modeled_grams_between(cursor, at),
            };
        }

        grams.min(quantity)
    }

    /// Grams absorbed between `from` and `to` once observations have ended.
    ///
    /// Whatever the observations left unabsorbed is spread evenly over the rest
    /// of the absorption time. Past that time the remainder absorbs at the
    /// entry's average modeled rate.
    fn remaining_after_observation(&self, from: DateTime<Utc>, to: DateTime<Utc>, remaining: f64) -> f64 {
        if remaining <= 0.0 {
            return 0.0;
        }
        let elapsed = seconds_between(from, to);
        let time_left = seconds_between(from, self.entry.start_date + self.absorption_time);
        if time_left > 0.0 {
            return remaining * (elapsed / time_left).min(1.0);
        }

        let absorption_seconds = duration_seconds(self.absorption_time);
        if absorption_seconds <= 0.0 {
            return remaining;
        }
        (self.entry.quantity / absorption_seconds * elapsed).min(remaining)
    }

    /// Grams not yet absorbed at `at`
    pub fn remaining_grams_at(&self, at: DateTime<Utc>) -> f64 {
        (self.entry.quantity - self.absorbed_grams_at(at)).max(0.0)
    }

    /// Fraction the model alone expects to be absorbed at `at`
    pub fn modeled_fraction_at(&self, at: DateTime<Utc>) -> f64 {
        if self.entry.quantity <= 0.0 {
            return 0.0;
        }
        fraction_at(
            self.curve,
            duration_seconds(self.absorption_time),
            seconds_between(self.entry.start_date, at),
        )
    }

    fn modeled_grams_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        modeled_grams_between(
            self.curve,
            &self.entry,
            duration_seconds(self.absorption_time),
            from,
            to,
        )
    }
}

/// Entries whose active window `[start_date, start_date + max_absorption]`
/// intersects `[start, end]`, ordered by start date then id
pub(crate) fn active_entries<'a>(
    entries: &'a [CarbEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_absorption: Duration,
) -> Vec<&'a CarbEntry> {
    let mut active: Vec<_> = entries
        .iter()
        .filter(|e| e.start_date <= end && e.start_date + max_absorption >= start)
        .collect();
    active.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
    active
}

/// Resolve the absorption status of every entry active in `[start, end]`.
///
/// Without velocities each entry follows the absorption model. With velocities,
/// the glucose change they describe is converted to grams using each entry's
/// carb sensitivity and shared among the entries active in each interval, in
/// proportion to their modeled absorption there.
pub fn resolve(
    entries: &[CarbEntry],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    velocities: &[GlucoseEffectVelocity],
    model: &AbsorptionModel,
    schedules: &SampledSchedules,
) -> Result<Vec<CarbStatus>> {
    if end < start {
        return Err(Error::InvalidRange { start, end });
    }

    let max_absorption = model.max_absorption_duration();
    let mut statuses = active_entries(entries, start, end, max_absorption)
        .into_iter()
        .map(|entry| -> Result<CarbStatus> {
            entry.validate()?;
            Ok(CarbStatus {
                entry: entry.clone(),
                absorption: Absorption::Modeled,
                is_complete: false,
                absorption_time: model.absorption_time(entry),
                curve: model.curve,
                carb_sensitivity: schedules.carb_sensitivity_at(entry.start_date)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if !velocities.is_empty() {
        let observed = attribute_velocities(&statuses, velocities, max_absorption);
        for (status, segments) in statuses.iter_mut().zip(observed) {
            if let Some(segments) = segments {
                status.absorption = Absorption::Observed {
                    segments: cap_at_quantity(segments, status.entry.quantity),
                };
            }
        }
    }

    for status in &mut statuses {
        status.is_complete = status.remaining_grams_at(end) <= COMPLETE_TOLERANCE_GRAMS;
    }

    tracing::debug!(
        "Resolved {} carb statuses ({} observed) for {} to {}",
        statuses.len(),
        statuses
            .iter()
            .filter(|s| matches!(s.absorption, Absorption::Observed { .. }))
            .count(),
        start,
        end
    );

    Ok(statuses)
}

/// Split observed glucose change into per-entry grams.
///
/// Each velocity interval is cut at entry window edges so the set of active
/// entries is constant within every piece. Negative velocities count as no
/// absorption; an interval overlapping an earlier one is trimmed to start where
/// the earlier one ends.
fn attribute_velocities(
    statuses: &[CarbStatus],
    velocities: &[GlucoseEffectVelocity],
    max_absorption: Duration,
) -> Vec<Option<Vec<ObservedAbsorption>>> {
    let mut observed: Vec<Option<Vec<ObservedAbsorption>>> = vec![None; statuses.len()];

    let mut ordered: Vec<&GlucoseEffectVelocity> = velocities.iter().collect();
    ordered.sort_by_key(|v| v.start_date);

    let mut covered_until: Option<DateTime<Utc>> = None;
    for velocity in ordered {
        let from = covered_until.map_or(velocity.start_date, |t| t.max(velocity.start_date));
        let to = velocity.end_date;
        if to <= from {
            continue;
        }
        covered_until = Some(to);

        let rate = velocity.velocity.max(0.0);
        let mut cuts = vec![from, to];
        for status in statuses {
            for edge in [status.entry.start_date, status.entry.start_date + max_absorption] {
                if edge > from && edge < to {
                    cuts.push(edge);
                }
            }
        }
        cuts.sort();
        cuts.dedup();

        for piece in cuts.windows(2) {
            let (a, b) = (piece[0], piece[1]);
            let members: Vec<usize> = statuses
                .iter()
                .enumerate()
                .filter(|(_, s)| s.entry.start_date <= a && b <= s.entry.start_date + max_absorption)
                .map(|(i, _)| i)
                .collect();
            if members.is_empty() {
                continue;
            }

            let mut weights: Vec<f64> = members
                .iter()
                .map(|&i| statuses[i].modeled_grams_between(a, b))
                .collect();
            if weights.iter().sum::<f64>() <= 0.0 {
                weights = members.iter().map(|&i| statuses[i].entry.quantity).collect();
            }
            let total: f64 = weights.iter().sum();
            let glucose = rate * seconds_between(a, b);

            for (&i, weight) in members.iter().zip(weights) {
                let share = if total > 0.0 { glucose * weight / total } else { 0.0 };
                observed[i].get_or_insert_with(Vec::new).push(ObservedAbsorption {
                    start_date: a,
                    end_date: b,
                    grams: share / statuses[i].carb_sensitivity,
                });
            }
        }
    }

    observed
}

/// Clamp cumulative observed grams to the entry's quantity
fn cap_at_quantity(segments: Vec<ObservedAbsorption>, quantity: f64) -> Vec<ObservedAbsorption> {
    let mut total = 0.0;
    segments
        .into_iter()
        .map(|mut segment| {
            segment.grams = segment.grams.min((quantity - total).max(0.0));
            total += segment.grams;
            segment
        })
        .collect()
}
