//! Carbohydrates on board and carbohydrate totals.

use crate::effects::step_dates;
use crate::status::CarbStatus;
use crate::{CarbEntry, CarbValue, Result};
use chrono::{DateTime, Duration, Utc};

/// Grams eaten at or before `at` that have not been absorbed yet
pub fn carbs_on_board(statuses: &[CarbStatus], at: DateTime<Utc>) -> CarbValue {
    let grams = statuses
        .iter()
        .filter(|s| s.entry.start_date <= at)
        .map(|s| s.remaining_grams_at(at))
        .sum();
    CarbValue { date: at, grams }
}

/// Carbs on board at every step from `start` to `end`
pub fn carbs_on_board_values(
    statuses: &[CarbStatus],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta: Duration,
) -> Result<Vec<CarbValue>> {
    Ok(step_dates(start, end, delta)?
        .into_iter()
        .map(|date| carbs_on_board(statuses, date))
        .collect())
}

/// Grams of all entries eaten at or after `since`
pub fn total_carbs(entries: &[CarbEntry], since: DateTime<Utc>) -> CarbValue {
    let grams = entries
        .iter()
        .filter(|e| e.start_date >= since)
        .map(|e| e.quantity)
        .sum();
    CarbValue { date: since, grams }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::RepeatingScheduleValue;
    use crate::status::resolve;
    use crate::{
        AbsorptionCurve, AbsorptionModel, Error, GlucoseUnit, InsulinSensitivitySchedule,
        SampledSchedules, Schedule,
    };
    use chrono::{FixedOffset, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn statuses(entries: &[CarbEntry], start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CarbStatus> {
        let carb_ratio = Schedule::utc(vec![RepeatingScheduleValue::new(0, 10.0)]).unwrap();
        let sensitivity = InsulinSensitivitySchedule::new(
            GlucoseUnit::MilligramsPerDeciliter,
            vec![RepeatingScheduleValue::new(0, 50.0)],
            FixedOffset::east_opt(0).unwrap(),
        )
        .unwrap();
        let schedules = SampledSchedules::between(
            &carb_ratio,
            &sensitivity,
            start - Duration::hours(10),
            end,
        )
        .unwrap();
        let model = AbsorptionModel {
            curve: AbsorptionCurve::Linear,
            ..AbsorptionModel::default()
        };
        resolve(entries, start, end, &[], &model, &schedules).unwrap()
    }

    #[test]
    fn test_carbs_on_board_decays_with_absorption() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(Duration::hours(3)))];
        let statuses = statuses(&entries, t0(), t0() + Duration::hours(4));

        assert_eq!(carbs_on_board(&statuses, t0()).grams, 30.0);
        assert!((carbs_on_board(&statuses, t0() + Duration::hours(1)).grams - 20.0).abs() < 1e-9);
        assert_eq!(carbs_on_board(&statuses, t0() + Duration::hours(3)).grams, 0.0);
    }

    #[test]
    fn test_future_entries_not_on_board() {
        let entries = vec![CarbEntry::new(t0() + Duration::hours(1), 30.0, None)];
        let statuses = statuses(&entries, t0(), t0() + Duration::hours(2));

        assert_eq!(carbs_on_board(&statuses, t0()).grams, 0.0);
        assert_eq!(carbs_on_board(&statuses, t0() + Duration::hours(1)).grams, 30.0);
    }

    #[test]
    fn test_carbs_on_board_values_series() {
        let entries = vec![CarbEntry::new(t0(), 30.0, Some(Duration::hours(3)))];
        let statuses = statuses(&entries, t0(), t0() + Duration::hours(3));

        let values =
            carbs_on_board_values(&statuses, t0(), t0() + Duration::hours(3), Duration::hours(1))
                .unwrap();
        let grams: Vec<f64> = values.iter().map(|v| (v.grams * 1e6).round() / 1e6).collect();
        assert_eq!(grams, vec![30.0, 20.0, 10.0, 0.0]);

        let reversed =
            carbs_on_board_values(&statuses, t0(), t0() - Duration::hours(1), Duration::hours(1));
        assert!(matches!(reversed, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn test_total_carbs_since() {
        let entries = vec![
            CarbEntry::new(t0() - Duration::hours(2), 10.0, None),
            CarbEntry::new(t0(), 15.0, None),
            CarbEntry::new(t0() + Duration::hours(1), 25.0, None),
        ];

        let total = total_carbs(&entries, t0());
        assert_eq!(total.grams, 40.0);
        assert_eq!(total.date, t0());
    }
}
