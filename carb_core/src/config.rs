//! Configuration file support for carbfx.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/carbfx/config.toml`.

use crate::absorption::{AbsorptionCurve, AbsorptionModel, DefaultAbsorptionTimes, TierThresholds};
use crate::effects::EffectProjector;
use crate::schedule::{InsulinSensitivitySchedule, RepeatingScheduleValue, Schedule};
use crate::source::ConfiguredSchedules;
use crate::{Error, GlucoseUnit, Result};
use chrono::{Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub absorption: AbsorptionConfig,

    #[serde(default)]
    pub effects: EffectsConfig,

    #[serde(default)]
    pub schedules: SchedulesConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_entries_path")]
    pub entries_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            entries_path: default_entries_path(),
        }
    }
}

/// Absorption model configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AbsorptionConfig {
    #[serde(default)]
    pub curve: AbsorptionCurve,

    #[serde(default = "default_fast_minutes")]
    pub fast_minutes: u32,

    #[serde(default = "default_medium_minutes")]
    pub medium_minutes: u32,

    #[serde(default = "default_slow_minutes")]
    pub slow_minutes: u32,

    /// Entries lighter than this without an absorption time use the fast tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_below_grams: Option<f64>,

    /// Entries at least this heavy without an absorption time use the slow tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_at_or_above_grams: Option<f64>,
}

impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            curve: AbsorptionCurve::default(),
            fast_minutes: default_fast_minutes(),
            medium_minutes: default_medium_minutes(),
            slow_minutes: default_slow_minutes(),
            fast_below_grams: None,
            slow_at_or_above_grams: None,
        }
    }
}

/// Effect projection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EffectsConfig {
    #[serde(default = "default_delta_minutes")]
    pub delta_minutes: u32,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            delta_minutes: default_delta_minutes(),
        }
    }
}

/// Insulin sensitivity table with its glucose unit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensitivityConfig {
    #[serde(default)]
    pub unit: GlucoseUnit,
    pub items: Vec<RepeatingScheduleValue<f64>>,
}

/// Daily schedules; an absent table means not configured
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SchedulesConfig {
    /// Fixed offset from UTC in which schedule offsets are read
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carb_ratio: Option<Vec<RepeatingScheduleValue<f64>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_sensitivity: Option<SensitivityConfig>,
}

// Default value functions
fn default_entries_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("carbfx").join("carb_entries.jsonl")
}

fn default_fast_minutes() -> u32 {
    30
}

fn default_medium_minutes() -> u32 {
    180
}

fn default_slow_minutes() -> u32 {
    300
}

fn default_delta_minutes() -> u32 {
    5
}

impl AbsorptionConfig {
    pub fn model(&self) -> Result<AbsorptionModel> {
        for (name, minutes) in [
            ("fast_minutes", self.fast_minutes),
            ("medium_minutes", self.medium_minutes),
            ("slow_minutes", self.slow_minutes),
        ] {
            if minutes == 0 {
                return Err(Error::Config(format!("absorption.{} must be positive", name)));
            }
        }

        Ok(AbsorptionModel::new(
            self.curve,
            DefaultAbsorptionTimes {
                fast: Duration::minutes(i64::from(self.fast_minutes)),
                medium: Duration::minutes(i64::from(self.medium_minutes)),
                slow: Duration::minutes(i64::from(self.slow_minutes)),
            },
            TierThresholds {
                fast_below_grams: self.fast_below_grams,
                slow_at_or_above_grams: self.slow_at_or_above_grams,
            },
        ))
    }
}

impl SchedulesConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "schedules.utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }

    /// Build the configured schedules, validating each table
    pub fn build(&self) -> Result<ConfiguredSchedules> {
        let offset = self.utc_offset()?;

        let carb_ratio = self
            .carb_ratio
            .as_ref()
            .map(|items| Schedule::positive(items.clone(), offset))
            .transpose()?;
        let insulin_sensitivity = self
            .insulin_sensitivity
            .as_ref()
            .map(|config| InsulinSensitivitySchedule::new(config.unit, config.items.clone(), offset))
            .transpose()?;

        Ok(ConfiguredSchedules::new(carb_ratio, insulin_sensitivity))
    }
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("carbfx").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn absorption_model(&self) -> Result<AbsorptionModel> {
        self.absorption.model()
    }

    pub fn delta(&self) -> Duration {
        Duration::minutes(i64::from(self.effects.delta_minutes))
    }

    pub fn projector(&self) -> Result<EffectProjector> {
        EffectProjector::new(self.absorption_model()?, self.delta())
    }

    pub fn schedules(&self) -> Result<ConfiguredSchedules> {
        self.schedules.build()
    }
}
