//! Carb effect service combining entry and schedule collaborators.
//!
//! The service fetches what a computation needs from its collaborators and
//! hands it to the projector. Each call reads one snapshot of entries and
//! schedules; nothing is cached between calls.

use crate::carbs_on_board::{carbs_on_board, carbs_on_board_values, total_carbs};
use crate::effects::EffectProjector;
use crate::source::{EntrySource, ScheduleProvider};
use crate::status::CarbStatus;
use crate::{
    CarbEntry, CarbRatioSchedule, CarbValue, Error, GlucoseEffect, GlucoseEffectVelocity,
    InsulinSensitivitySchedule, Result,
};
use chrono::{DateTime, Utc};

/// Output of a glucose effect request
#[derive(Clone, Debug, PartialEq)]
pub struct EffectReport {
    /// Entries read from the source for the request
    pub entries: Vec<CarbEntry>,
    pub statuses: Vec<CarbStatus>,
    pub effects: Vec<GlucoseEffect>,
}

pub struct CarbEffectService<E, S> {
    entries: E,
    schedules: S,
    projector: EffectProjector,
}

impl<E: EntrySource, S: ScheduleProvider> CarbEffectService<E, S> {
    pub fn new(entries: E, schedules: S, projector: EffectProjector) -> Self {
        Self {
            entries,
            schedules,
            projector,
        }
    }

    pub fn projector(&self) -> &EffectProjector {
        &self.projector
    }

    pub fn schedules(&self) -> &S {
        &self.schedules
    }

    /// Glucose effects over `[start, end]` with the entries and statuses behind them
    pub fn glucose_effects(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<EffectReport> {
        let (carb_ratio, sensitivity) = self.required_schedules()?;
        let entries = self.samples(start, end)?;
        let projection =
            self.projector
                .project(&entries, start, end, carb_ratio, sensitivity, velocities)?;

        Ok(EffectReport {
            entries,
            statuses: projection.statuses,
            effects: projection.effects,
        })
    }

    /// Absorption status of every entry active in `[start, end]`
    pub fn carb_status(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<Vec<CarbStatus>> {
        let (carb_ratio, sensitivity) = self.required_schedules()?;
        let entries = self.samples(start, end)?;
        self.projector
            .carb_statuses(&entries, start, end, carb_ratio, sensitivity, velocities)
    }

    /// Unabsorbed grams at `at`
    pub fn carbs_on_board(
        &self,
        at: DateTime<Utc>,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<CarbValue> {
        let statuses = self.carb_status(at, at, velocities)?;
        Ok(carbs_on_board(&statuses, at))
    }

    /// Unabsorbed grams at each step from `start` to `end`
    pub fn carbs_on_board_values(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        velocities: &[GlucoseEffectVelocity],
    ) -> Result<Vec<CarbValue>> {
        let statuses = self.carb_status(start, end, velocities)?;
        carbs_on_board_values(&statuses, start, end, self.projector.delta)
    }

    /// Grams eaten since `since`
    pub fn total_carbs(&self, since: DateTime<Utc>) -> Result<CarbValue> {
        let entries = self.entries.entries_in_range(since, DateTime::<Utc>::MAX_UTC)?;
        Ok(total_carbs(&entries, since))
    }

    fn required_schedules(&self) -> Result<(&CarbRatioSchedule, &InsulinSensitivitySchedule)> {
        let carb_ratio = self
            .schedules
            .carb_ratio_schedule()
            .ok_or_else(|| Error::NotConfigured("carb ratio schedule".into()))?;
        let sensitivity = self
            .schedules
            .insulin_sensitivity_schedule()
            .ok_or_else(|| Error::NotConfigured("insulin sensitivity schedule".into()))?;
        Ok((carb_ratio, sensitivity))
    }

    /// Entries that may still be absorbing during `[start, end]`
    fn samples(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<CarbEntry>> {
        if end < start {
            return Err(Error::InvalidRange { start, end });
        }
        let food_start = start - self.projector.model.max_absorption_duration();
        self.entries.entries_in_range(food_start, end)
    }
}
