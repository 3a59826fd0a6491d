//! Glucose effect projection.
//!
//! This module turns carbohydrate entries into a cumulative glucose effect
//! curve:
//! - Entries eaten up to the maximum absorption duration before the window are
//!   included, since they may still be absorbing
//! - Carb ratio and insulin sensitivity are sampled over the entries' dates
//! - Each entry's absorbed grams are scaled by the carb sensitivity in effect
//!   when it was eaten and summed at every step of a fixed grid

use crate::schedule::SampledSchedules;
use crate::status::{active_entries, resolve, CarbStatus};
use crate::{
    AbsorptionModel, CarbEntry, CarbRatioSchedule, Error, GlucoseEffect, GlucoseEffectVelocity,
    InsulinSensitivitySchedule, Result,
};
use chrono::{DateTime, Duration, Utc};

/// Projected effects together with the statuses they were computed from
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub statuses: Vec<CarbStatus>,
    pub effects: Vec<GlucoseEffect>,
}

/// Computes glucose effect sequences on a fixed time grid
#[derive(Clone, Debug, PartialEq)]
pub struct EffectProjector {
    pub model: AbsorptionModel,
    pub delta: Duration,
}

impl Default for EffectProjector {
    fn default() -> Self {
        Self {
            model: AbsorptionModel::default(),
            delta: Duration::minutes(5),
        }
    }
}

impl EffectProjector {
    pub fn new(model: AbsorptionModel, delta: Duration) -> Result<Self> {
        if delta <= Duration::zero() {
            return Err(Error::Config(format!(
                "effect delta must be positive, got {}s",
                delta.num_seconds()
            )));
        }
        Ok(Self { model, delta })
    }

    /// Project the glucose effect of `entries` over `[start, end]`
    pub fn project(
        &self,
        entries: &[CarbEntry],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        carb_ratio: &CarbRatioSchedule,
        sensitivity: &InsulinSensitivitySchedule,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<Projection> {
        let (samples, schedules) = self.sample(entries, start, end, carb_ratio, sensitivity)?;
        self.project_sampled(&samples, start, end, &schedules, velocities)
    }

    /// Resolve carb statuses for `[start, end]` without projecting effects
    pub fn carb_statuses(
        &self,
        entries: &[CarbEntry],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        carb_ratio: &CarbRatioSchedule,
        sensitivity: &InsulinSensitivitySchedule,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<Vec<CarbStatus>> {
        let (samples, schedules) = self.sample(entries, start, end, carb_ratio, sensitivity)?;
        self.check_coverage(&samples, start, end, &schedules)?;
        resolve(&samples, start, end, velocities, &self.model, &schedules)
    }

    /// Project against schedule values that have already been fetched.
    ///
    /// Fails with `ScheduleCoverage` when `schedules` do not span the dates of
    /// the entries active in the window (or the window itself when none are).
    pub fn project_sampled(
        &self,
        entries: &[CarbEntry],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        schedules: &SampledSchedules,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<Projection> {
        self.check_coverage(entries, start, end, schedules)?;
        let statuses = resolve(entries, start, end, velocities, &self.model, schedules)?;
        let effects = self.accumulate(&statuses, start, end, schedules)?;

        tracing::debug!(
            "Projected {} effects from {} entries between {} and {}",
            effects.len(),
            statuses.len(),
            start,
            end
        );

        Ok(Projection { statuses, effects })
    }

    /// Entries that may contribute to `[start, end]` and schedule values over
    /// their dates
    fn sample(
        &self,
        entries: &[CarbEntry],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        carb_ratio: &CarbRatioSchedule,
        sensitivity: &InsulinSensitivitySchedule,
    ) -> Result<(Vec<CarbEntry>, SampledSchedules)> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }

        let food_start = start - self.model.max_absorption_duration();
        let samples: Vec<CarbEntry> = entries
            .iter()
            .filter(|e| e.start_date >= food_start && e.start_date <= end)
            .cloned()
            .collect();

        let (range_start, range_end) = sampling_range(&samples).unwrap_or((start, end));
        let schedules = SampledSchedules::between(carb_ratio, sensitivity, range_start, range_end)?;

        tracing::debug!(
            "Sampled {} entries since {}, {} carb ratio and {} sensitivity values",
            samples.len(),
            food_start,
            schedules.carb_ratios.len(),
            schedules.sensitivities.len()
        );

        Ok((samples, schedules))
    }

    fn check_coverage(
        &self,
        entries: &[CarbEntry],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        schedules: &SampledSchedules,
    ) -> Result<()> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        let active: Vec<CarbEntry> =
            active_entries(entries, start, end, self.model.max_absorption_duration())
                .into_iter()
                .cloned()
                .collect();
        let (range_start, range_end) = sampling_range(&active).unwrap_or((start, end));
        if !schedules.covers(range_start, range_end) {
            return Err(Error::ScheduleCoverage {
                start: range_start,
                end: range_end,
            });
        }
        Ok(())
    }

    /// Running total of glucose effect at each step of the grid
    fn accumulate(
        &self,
        statuses: &[CarbStatus],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        schedules: &SampledSchedules,
    ) -> Result<Vec<GlucoseEffect>> {
        let dates = step_dates(start, end, self.delta)?;

        let mut absorbed: Vec<f64> = statuses.iter().map(|s| s.absorbed_grams_at(start)).collect();
        let mut running: f64 = statuses
            .iter()
            .zip(&absorbed)
            .map(|(status, grams)| status.carb_sensitivity * grams)
            .sum();

        let mut effects = Vec::with_capacity(dates.len());
        for (index, date) in dates.into_iter().enumerate() {
            if index > 0 {
                for (status, previous) in statuses.iter().zip(absorbed.iter_mut()) {
                    let now = status.absorbed_grams_at(date);
                    running += status.carb_sensitivity * (now - *previous);
                    *previous = now;
                }
            }
            effects.push(GlucoseEffect {
                date,
                quantity: running,
                unit: schedules.unit,
            });
        }

        Ok(effects)
    }
}

/// Grid `start, start + delta, ...` up to and including `end`
pub fn step_dates(start: DateTime<Utc>, end: DateTime<Utc>, delta: Duration) -> Result<Vec<DateTime<Utc>>> {
    if end < start {
        return Err(Error::InvalidRange { start, end });
    }
    let step = delta.num_milliseconds();
    if step <= 0 {
        return Err(Error::Config(format!(
            "step must be positive, got {}ms",
            step
        )));
    }

    let count = (end - start).num_milliseconds() / step;
    Ok((0..=count)
        .map(|i| start + Duration::milliseconds(i * step))
        .collect())
}

fn sampling_range(entries: &[CarbEntry]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let min = entries.iter().map(|e| e.start_date).min()?;
    let max = entries.iter().map(|e| e.start_date).max()?;
    Some((min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{AbsoluteScheduleValue, RepeatingScheduleValue};
    use crate::status::Absorption;
    use crate::{AbsorptionCurve, GlucoseUnit, Schedule};
    use chrono::{FixedOffset, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn carb_ratio(value: f64) -> CarbRatioSchedule {
        Schedule::utc(vec![RepeatingScheduleValue::new(0, value)]).unwrap()
    }

    fn sensitivity(value: f64) -> InsulinSensitivitySchedule {
        InsulinSensitivitySchedule::new(
            GlucoseUnit::MilligramsPerDeciliter,
            vec![RepeatingScheduleValue::new(0, value)],
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap()
    }

    fn linear_projector() -> EffectProjector {
        EffectProjector::new(
            AbsorptionModel {
                curve: AbsorptionCurve::Linear,
                ..AbsorptionModel::default()
            },
            Duration::minutes(5),
        )
        .unwrap()
    }

    #[test]
    fn test_single_entry_reaches_full_effect() {
        crate::logging::init_test();
        let entries = vec![CarbEntry::new(t0(), 20.0, Some(Duration::hours(3)))];

        let projection = linear_projector()
            .project(
                &entries,
                t0(),
                t0() + Duration::hours(4),
                &carb_ratio(10.0),
                &sensitivity(50.0),
                &[],
            )
            .unwrap();

        let effects = &projection.effects;
        assert_eq!(effects.len(), 49);
        assert_eq!(effects[0].quantity, 0.0);

        let at_three_hours = &effects[36];
        assert_eq!(at_three_hours.date, t0() + Duration::hours(3));
        assert!((at_three_hours.quantity - 100.0).abs() < 1e-9);

        for pair in effects.windows(2) {
            assert!(pair[1].quantity + 1e-12 >= pair[0].quantity);
        }
        assert!((effects.last().unwrap().quantity - 100.0).abs() < 1e-9);
        assert_eq!(effects[0].unit, GlucoseUnit::MilligramsPerDeciliter);
    }

    #[test]
    fn test_empty_entries_give_flat_zero() {
        let projection = linear_projector()
            .project(
                &[],
                t0(),
                t0() + Duration::hours(2),
                &carb_ratio(10.0),
                &sensitivity(50.0),
                &[],
            )
            .unwrap();

        assert_eq!(projection.effects.len(), 25);
        assert!(projection.effects.iter().all(|e| e.quantity == 0.0));
        assert!(projection.statuses.is_empty());
    }

    #[test]
    fn test_steps_are_evenly_spaced_and_floor_aligned() {
        let end = t0() + Duration::minutes(62);
        let projection = linear_projector()
            .project(&[], t0(), end, &carb_ratio(10.0), &sensitivity(50.0), &[])
            .unwrap();

        // floor(62 / 5) + 1
        assert_eq!(projection.effects.len(), 13);
        for pair in projection.effects.windows(2) {
            assert_eq!(pair[1].date - pair[0].date, Duration::minutes(5));
        }
        assert_eq!(projection.effects.last().unwrap().date, t0() + Duration::minutes(60));
    }

    #[test]
    fn test_single_instant_window() {
        let projection = linear_projector()
            .project(&[], t0(), t0(), &carb_ratio(10.0), &sensitivity(50.0), &[])
            .unwrap();
        assert_eq!(projection.effects.len(), 1);
        assert_eq!(projection.effects[0].date, t0());
    }

    #[test]
    fn test_reversed_window_fails() {
        let result = linear_projector().project(
            &[CarbEntry::new(t0(), 20.0, None)],
            t0(),
            t0() - Duration::minutes(1),
            &carb_ratio(10.0),
            &sensitivity(50.0),
            &[],
        );
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let entries = vec![
            CarbEntry::new(t0() - Duration::hours(2), 45.0, None),
            CarbEntry::new(t0() + Duration::minutes(20), 15.0, Some(Duration::minutes(45))),
            CarbEntry::new(t0() + Duration::minutes(20), 30.0, None),
        ];
        let projector = EffectProjector::default();
        let run = || {
            projector
                .project(
                    &entries,
                    t0(),
                    t0() + Duration::hours(6),
                    &carb_ratio(12.0),
                    &sensitivity(45.0),
                    &[],
                )
                .unwrap()
        };

        let first = run();
        let second = run();
        assert_eq!(first, second);

        let mut reversed = entries.clone();
        reversed.reverse();
        let third = projector
            .project(
                &reversed,
                t0(),
                t0() + Duration::hours(6),
                &carb_ratio(12.0),
                &sensitivity(45.0),
                &[],
            )
            .unwrap();
        assert_eq!(first.effects, third.effects);
    }

    #[test]
    fn test_prior_absorption_included_at_start() {
        let entries = vec![CarbEntry::new(t0() - Duration::minutes(90), 20.0, Some(Duration::hours(3)))];

        let projection = linear_projector()
            .project(
                &entries,
                t0(),
                t0() + Duration::hours(2),
                &carb_ratio(10.0),
                &sensitivity(50.0),
                &[],
            )
            .unwrap();

        assert!((projection.effects[0].quantity - 50.0).abs() < 1e-9);
        assert!((projection.effects.last().unwrap().quantity - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_entries_too_old_are_ignored() {
        let entries = vec![CarbEntry::new(t0() - Duration::hours(11), 20.0, None)];

        let projection = linear_projector()
            .project(
                &entries,
                t0(),
                t0() + Duration::hours(1),
                &carb_ratio(10.0),
                &sensitivity(50.0),
                &[],
            )
            .unwrap();

        assert!(projection.statuses.is_empty());
        assert!(projection.effects.iter().all(|e| e.quantity == 0.0));
    }

    #[test]
    fn test_schedule_sampled_at_entry_start() {
        let ratio = Schedule::utc(vec![
            RepeatingScheduleValue::new(0, 10.0),
            RepeatingScheduleValue::new(13 * 3600, 20.0),
        ])
        .unwrap();
        let entries = vec![CarbEntry::new(t0(), 20.0, Some(Duration::hours(3)))];

        let projection = linear_projector()
            .project(
                &entries,
                t0(),
                t0() + Duration::hours(3),
                &ratio,
                &sensitivity(50.0),
                &[],
            )
            .unwrap();

        // Ratio at noon is 10 g/U even though it changes at 13:00
        assert!((projection.effects.last().unwrap().quantity - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_observed_velocities_drive_effect() {
        let entries = vec![CarbEntry::new(t0(), 20.0, Some(Duration::hours(3)))];
        let velocity = 0.002;
        let observed: Vec<GlucoseEffectVelocity> = (0..120)
            .map(|i| GlucoseEffectVelocity {
                start_date: t0() + Duration::minutes(5 * i),
                end_date: t0() + Duration::minutes(5 * (i + 1)),
                velocity,
            })
            .collect();

        let projection = linear_projector()
            .project(
                &entries,
                t0(),
                t0() + Duration::hours(10),
                &carb_ratio(10.0),
                &sensitivity(50.0),
                &observed,
            )
            .unwrap();

        assert!(matches!(
            projection.statuses[0].absorption,
            Absorption::Observed { .. }
        ));
        for (k, effect) in projection.effects.iter().enumerate() {
            let expected = velocity * 300.0 * k as f64;
            assert!(
                (effect.quantity - expected).abs() < 1e-9,
                "step {}: {} != {}",
                k,
                effect.quantity,
                expected
            );
        }
    }

    #[test]
    fn test_zero_quantity_entry_contributes_nothing() {
        let meal = CarbEntry::new(t0(), 20.0, Some(Duration::hours(3)));
        let empty = CarbEntry::new(t0() + Duration::minutes(30), 0.0, None);
        let observed: Vec<GlucoseEffectVelocity> = (0..24)
            .map(|i| GlucoseEffectVelocity {
                start_date: t0() + Duration::minutes(5 * i),
                end_date: t0() + Duration::minutes(5 * (i + 1)),
                velocity: 0.004,
            })
            .collect();
        let projector = linear_projector();
        let end = t0() + Duration::hours(4);

        for velocities in [&[][..], &observed[..]] {
            let alone = projector
                .project(
                    &[meal.clone()],
                    t0(),
                    end,
                    &carb_ratio(10.0),
                    &sensitivity(50.0),
                    velocities,
                )
                .unwrap();
            let mixed = projector
                .project(
                    &[meal.clone(), empty.clone()],
                    t0(),
                    end,
                    &carb_ratio(10.0),
                    &sensitivity(50.0),
                    velocities,
                )
                .unwrap();

            assert_eq!(mixed.effects.len(), alone.effects.len());
            for (with_empty, without) in mixed.effects.iter().zip(&alone.effects) {
                assert_eq!(with_empty.date, without.date);
                assert!((with_empty.quantity - without.quantity).abs() < 1e-9);
            }

            let empty_status = mixed
                .statuses
                .iter()
                .find(|s| s.entry.id == empty.id)
                .unwrap();
            assert_eq!(empty_status.absorbed_grams_at(end), 0.0);
            if !velocities.is_empty() {
                assert_eq!(empty_status.observed_grams(), Some(0.0));
            }
        }
    }

    #[test]
    fn test_sampled_values_must_cover_entries() {
        let entries = vec![CarbEntry::new(t0(), 20.0, None)];
        let later = |value| AbsoluteScheduleValue {
            start_date: t0() + Duration::hours(1),
            end_date: t0() + Duration::hours(2),
            value,
        };
        let schedules = SampledSchedules {
            carb_ratios: vec![later(10.0)],
            sensitivities: vec![later(50.0)],
            unit: GlucoseUnit::MilligramsPerDeciliter,
        };

        let result = linear_projector().project_sampled(
            &entries,
            t0(),
            t0() + Duration::hours(1),
            &schedules,
            &[],
        );
        assert!(matches!(result, Err(Error::ScheduleCoverage { .. })));

        let empty = SampledSchedules {
            carb_ratios: vec![],
            sensitivities: vec![],
            unit: GlucoseUnit::MilligramsPerDeciliter,
        };
        let result =
            linear_projector().project_sampled(&[], t0(), t0() + Duration::hours(1), &empty, &[]);
        assert!(matches!(result, Err(Error::ScheduleCoverage { .. })));
    }

    #[test]
    fn test_new_rejects_non_positive_delta() {
        let result = EffectProjector::new(AbsorptionModel::default(), Duration::zero());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_step_dates() {
        let dates = step_dates(t0(), t0() + Duration::minutes(15), Duration::minutes(5)).unwrap();
        assert_eq!(dates.len(), 4);
        assert_eq!(dates[3], t0() + Duration::minutes(15));
    }
}
