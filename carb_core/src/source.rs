//! Collaborators supplying entries, schedules and observed velocities.
//!
//! Entries are read from a JSON Lines file under a shared file lock so a
//! concurrent writer never hands us a half-written line.

use crate::{
    CarbEntry, CarbRatioSchedule, Error, GlucoseEffectVelocity, InsulinSensitivitySchedule, Result,
};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Read-only source of carbohydrate entries
pub trait EntrySource {
    /// Entries whose start date falls within `[start, end]`, oldest first
    fn entries_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<CarbEntry>>;
}

/// Source of the schedules a projection needs; `None` means not configured
pub trait ScheduleProvider {
    fn carb_ratio_schedule(&self) -> Option<&CarbRatioSchedule>;
    fn insulin_sensitivity_schedule(&self) -> Option<&InsulinSensitivitySchedule>;
}

fn in_range(entries: impl IntoIterator<Item = CarbEntry>, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<CarbEntry> {
    let mut entries: Vec<CarbEntry> = entries
        .into_iter()
        .filter(|e| e.start_date >= start && e.start_date <= end)
        .collect();
    entries.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
    entries
}

// ============================================================================
// File-backed entries
// ============================================================================

/// Carb entries stored one JSON object per line
pub struct JsonlEntryStore {
    path: PathBuf,
}

impl JsonlEntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in the file, skipping lines that fail to parse
    pub fn read_all(&self) -> Result<Vec<CarbEntry>> {
        if !self.path.exists() {
            return Err(Error::NotConfigured(format!(
                "no carb entry store at {}",
                self.path.display()
            )));
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let reader = BufReader::new(&file);
        let mut entries = Vec::new();
        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<CarbEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        "Skipping malformed entry at {:?} line {}: {}",
                        self.path,
                        line_num + 1,
                        e
                    );
                }
            }
        }

        file.unlock()?;

        tracing::info!("Loaded {} carb entries from {:?}", entries.len(), self.path);
        Ok(entries)
    }
}

impl EntrySource for JsonlEntryStore {
    fn entries_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<CarbEntry>> {
        Ok(in_range(self.read_all()?, start, end))
    }
}

// ============================================================================
// In-memory entries
// ============================================================================

/// Entries held in memory
#[derive(Clone, Debug, Default)]
pub struct InMemoryEntrySource {
    pub entries: Vec<CarbEntry>,
}

impl InMemoryEntrySource {
    pub fn new(entries: Vec<CarbEntry>) -> Self {
        Self { entries }
    }
}

impl EntrySource for InMemoryEntrySource {
    fn entries_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<CarbEntry>> {
        Ok(in_range(self.entries.iter().cloned(), start, end))
    }
}

// ============================================================================
// Schedules
// ============================================================================

/// Schedules fixed at construction, e.g. from configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfiguredSchedules {
    pub carb_ratio: Option<CarbRatioSchedule>,
    pub insulin_sensitivity: Option<InsulinSensitivitySchedule>,
}

impl ConfiguredSchedules {
    pub fn new(
        carb_ratio: Option<CarbRatioSchedule>,
        insulin_sensitivity: Option<InsulinSensitivitySchedule>,
    ) -> Self {
        Self {
            carb_ratio,
            insulin_sensitivity,
        }
    }
}

impl ScheduleProvider for ConfiguredSchedules {
    fn carb_ratio_schedule(&self) -> Option<&CarbRatioSchedule> {
        self.carb_ratio.as_ref()
    }

    fn insulin_sensitivity_schedule(&self) -> Option<&InsulinSensitivitySchedule> {
        self.insulin_sensitivity.as_ref()
    }
}

// ============================================================================
// Velocities
// ============================================================================

/// Load observed velocities from a JSON array file
pub fn load_velocities(path: &Path) -> Result<Vec<GlucoseEffectVelocity>> {
    let contents = std::fs::read_to_string(path)?;
    let mut velocities: Vec<GlucoseEffectVelocity> = serde_json::from_str(&contents)?;
    velocities.sort_by_key(|v| v.start_date);

    tracing::info!("Loaded {} effect velocities from {:?}", velocities.len(), path);
    Ok(velocities)
}
