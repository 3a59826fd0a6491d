#![forbid(unsafe_code)]

//! Carbohydrate glucose-effect projection.
//!
//! This crate provides:
//! - Domain types (carb entries, effect velocities, glucose effects)
//! - Daily schedules for carb ratio and insulin sensitivity
//! - Absorption model and carb status resolution
//! - Effect projection and carbs on board
//! - Entry/schedule collaborators, CSV export, configuration

pub mod types;
pub mod error;
pub mod schedule;
pub mod absorption;
pub mod status;
pub mod effects;
pub mod carbs_on_board;
pub mod source;
pub mod service;
pub mod export;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use schedule::{
    AbsoluteScheduleValue, CarbRatioSchedule, InsulinSensitivitySchedule,
    RepeatingScheduleValue, SampledSchedules, Schedule,
};
pub use absorption::{
    AbsorptionCurve, AbsorptionModel, AbsorptionTier, DefaultAbsorptionTimes, TierThresholds,
};
pub use status::{resolve, Absorption, CarbStatus, ObservedAbsorption};
pub use effects::{EffectProjector, Projection};
pub use source::{
    load_velocities, ConfiguredSchedules, EntrySource, InMemoryEntrySource, JsonlEntryStore,
    ScheduleProvider,
};
pub use service::{CarbEffectService, EffectReport};
pub use export::write_effects_csv;
pub use config::Config;
