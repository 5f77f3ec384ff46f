//! ---
//! tms_section: "01-core-functionality"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Shared primitives and utilities for the core runtime."
//! tms_version: "v0.0.0-prealpha"
//! tms_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_level() -> String {
    "warn".into()
}

fn default_driver_path() -> PathBuf {
    PathBuf::from("data/temperature_by_month.txt")
}

fn default_usage_path() -> PathBuf {
    PathBuf::from("data/fuel_usage_by_hour.txt")
}

fn default_measurements_path() -> PathBuf {
    PathBuf::from("data/tank_measures.csv")
}

fn default_fleet() -> Vec<TankConfig> {
    (1..=4u32)
        .map(|id| TankConfig {
            id,
            name: id.to_string(),
            min: 0.0,
            max: f64::from(id) * 10_000.0,
        })
        .collect()
}

fn default_critical_ratio() -> f64 {
    0.1
}

fn default_warning_ratio() -> f64 {
    0.3
}

fn default_critical_threshold() -> f64 {
    0.15
}

fn default_driver_modifier() -> f64 {
    0.05
}

fn default_scale_modifier() -> f64 {
    3.0
}

fn default_min_modifier() -> f64 {
    0.1
}

fn default_max_modifier() -> f64 {
    0.3
}

fn default_speed() -> u32 {
    200
}

fn default_min_speed() -> u32 {
    1
}

fn default_max_speed() -> u32 {
    300
}

fn default_interval_offset() -> Duration {
    Duration::from_millis(10)
}

fn default_recompute_every() -> u32 {
    100
}

fn default_counter_lead() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_frame_count() -> u32 {
    30
}

fn default_frames_per_second() -> u32 {
    60
}

/// Primary configuration object for the TMS runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub datasets: DatasetConfig,
    #[serde(default = "default_fleet")]
    pub fleet: Vec<TankConfig>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "TMS_CONFIG";

    /// Load configuration from disk, respecting the `TMS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Unlike the daemon's data files the configuration is optional: when no
    /// candidate exists the built-in defaults are returned with no source.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.fleet.is_empty() {
            return Err(anyhow!("fleet must declare at least one tank"));
        }
        let mut seen = HashSet::new();
        for tank in &self.fleet {
            tank.validate()?;
            if !seen.insert(tank.id) {
                return Err(anyhow!("tank id {} declared more than once", tank.id));
            }
        }
        self.clock.validate()?;
        self.animation.validate()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            datasets: DatasetConfig::default(),
            fleet: default_fleet(),
            thresholds: ThresholdConfig::default(),
            synthetic: SyntheticConfig::default(),
            clock: ClockConfig::default(),
            animation: AnimationConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Level for targets outside the TMS crates.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-target levels layered over the TMS crate defaults, e.g.
    /// `tms_sim = "debug"`.
    #[serde(default)]
    pub targets: IndexMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            level: default_log_level(),
            targets: IndexMap::new(),
        }
    }
}

/// Locations of the replayed datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Synthetic driver samples, one float per line.
    #[serde(default = "default_driver_path")]
    pub driver: PathBuf,
    /// Usage samples, one float per line; normalised on load.
    #[serde(default = "default_usage_path")]
    pub usage: PathBuf,
    /// `id,"value"` measurement records replayed circularly.
    #[serde(default = "default_measurements_path")]
    pub measurements: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            driver: default_driver_path(),
            usage: default_usage_path(),
            measurements: default_measurements_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TankConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub min: f64,
    pub max: f64,
}

impl TankConfig {
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(anyhow!("tank ids are 1-based; found id 0"));
        }
        if !(self.max > self.min) {
            return Err(anyhow!(
                "tank {} must have max ({}) greater than min ({})",
                self.id,
                self.max,
                self.min
            ));
        }
        Ok(())
    }

    /// Display name, falling back to the numeric id.
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.id.to_string()
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Initial critical level as a fraction of the tank maximum.
    #[serde(default = "default_critical_ratio")]
    pub initial_critical_ratio: f64,
    /// Initial warning level as a fraction of the tank maximum.
    #[serde(default = "default_warning_ratio")]
    pub initial_warning_ratio: f64,
    /// Synthetic values at or above this push critical levels upward.
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            initial_critical_ratio: default_critical_ratio(),
            initial_warning_ratio: default_warning_ratio(),
            critical_threshold: default_critical_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_driver_modifier")]
    pub driver_modifier: f64,
    #[serde(default = "default_scale_modifier")]
    pub scale_modifier: f64,
    #[serde(default = "default_min_modifier")]
    pub min_modifier: f64,
    #[serde(default = "default_max_modifier")]
    pub max_modifier: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            driver_modifier: default_driver_modifier(),
            scale_modifier: default_scale_modifier(),
            min_modifier: default_min_modifier(),
            max_modifier: default_max_modifier(),
        }
    }
}

/// Longest data tick period a clock configuration may produce.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    #[serde(default = "default_speed")]
    pub speed: u32,
    #[serde(default = "default_min_speed")]
    pub min_speed: u32,
    #[serde(default = "default_max_speed")]
    pub max_speed: u32,
    #[serde(default = "default_interval_offset")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub interval_offset: Duration,
    /// Threshold recompute period in ticks.
    #[serde(default = "default_recompute_every")]
    pub recompute_every: u32,
    /// How many ticks before the first recompute the counter starts.
    #[serde(default = "default_counter_lead")]
    pub counter_lead: u32,
    #[serde(default = "default_initial_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub initial_delay: Duration,
}

impl ClockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_speed == 0 {
            return Err(anyhow!("min_speed must be at least 1"));
        }
        if self.min_speed > self.max_speed {
            return Err(anyhow!(
                "min_speed {} exceeds max_speed {}",
                self.min_speed,
                self.max_speed
            ));
        }
        if !(self.min_speed..=self.max_speed).contains(&self.speed) {
            return Err(anyhow!(
                "speed {} outside [{}, {}]",
                self.speed,
                self.min_speed,
                self.max_speed
            ));
        }
        if self.interval_offset.is_zero() {
            return Err(anyhow!("interval_offset must be positive"));
        }
        match self.interval_offset.checked_mul(self.max_speed) {
            Some(longest) if longest <= MAX_TICK_INTERVAL => {}
            _ => {
                return Err(anyhow!(
                    "interval_offset {:?} times max_speed {} exceeds {:?}",
                    self.interval_offset,
                    self.max_speed,
                    MAX_TICK_INTERVAL
                ))
            }
        }
        if self.recompute_every == 0 {
            return Err(anyhow!("recompute_every must be at least one tick"));
        }
        if self.counter_lead > self.recompute_every {
            return Err(anyhow!(
                "counter_lead {} exceeds recompute_every {}",
                self.counter_lead,
                self.recompute_every
            ));
        }
        Ok(())
    }

    /// Counter value the clock starts from.
    pub fn counter_start(&self) -> u32 {
        self.recompute_every.saturating_sub(self.counter_lead)
    }

    /// Tick period for `speed`: `(max - speed + min) * offset`, kept within
    /// `[1ms, MAX_TICK_INTERVAL]` so a timer can always be built from it.
    pub fn interval_for(&self, speed: u32) -> Duration {
        let steps = self
            .max_speed
            .saturating_sub(speed)
            .saturating_add(self.min_speed);
        self.interval_offset
            .checked_mul(steps)
            .unwrap_or(MAX_TICK_INTERVAL)
            .clamp(Duration::from_millis(1), MAX_TICK_INTERVAL)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
            interval_offset: default_interval_offset(),
            recompute_every: default_recompute_every(),
            counter_lead: default_counter_lead(),
            initial_delay: default_initial_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationConfig {
    #[serde(default = "default_frame_count")]
    pub frame_count: u32,
    #[serde(default = "default_frames_per_second")]
    pub frames_per_second: u32,
}

impl AnimationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_count == 0 {
            return Err(anyhow!("animation frame_count must be positive"));
        }
        if self.frames_per_second == 0 || self.frames_per_second > 1000 {
            return Err(anyhow!(
                "animation frames_per_second must be within 1..=1000, got {}",
                self.frames_per_second
            ));
        }
        Ok(())
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_millis(u64::from(1000 / self.frames_per_second))
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frame_count: default_frame_count(),
            frames_per_second: default_frames_per_second(),
        }
    }
}
