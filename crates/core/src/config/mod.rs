use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::plan::SegmentType;
use crate::{ChoreoError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub planner: PlannerConfig,
    pub scheduler: SchedulerConfig,
    pub fallback: FallbackConfig,
    pub catalog: CatalogConfig,
}

impl AppConfig {
    /// Reads a TOML file. Missing tables and keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.planner.validate()?;
        self.scheduler.validate()?;
        self.fallback.validate()
    }
}

/// Tuning knobs for the planner. The defaults are empirically chosen and
/// kept overridable rather than re-derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Grid spacing used when too few beats are supplied.
    pub fallback_beat_interval: f64,
    pub min_beats: usize,
    /// Normalised energy below this is weak.
    pub weak_threshold: f64,
    /// Normalised energy below this (and above `weak_threshold`) is medium.
    pub medium_threshold: f64,
    pub probe_group_chance: f64,
    pub long_group_chance: f64,
    /// Probability of an action window at zero energy.
    pub action_bias_quiet: f64,
    /// Probability of an action window at full energy.
    pub action_bias_loud: f64,
    pub expression_lead_in: f64,
    pub expression_min_slice: f64,
    pub expression_max_slice: f64,
    pub expression_gap_min: f64,
    pub expression_gap_max: f64,
    /// Distance kept between infill and the end of the span it fills.
    pub infill_safety: f64,
    pub action_min_slice: f64,
    pub action_max_slice: f64,
    pub min_segment: f64,
    /// Gaps before the closing segment larger than this get an action chain.
    pub gap_fill_threshold: f64,
    /// Largest gap tolerated between consecutive motion segments.
    pub continuity_threshold: f64,
    pub closing_tolerance: f64,
    /// How many recent picks per category are avoided when alternatives exist.
    pub recent_memory: usize,
    /// Emit light cues when the catalog carries light primitives.
    pub light_cues: bool,
    /// Fail with `InsufficientCatalog` instead of degrading the closing.
    pub strict_closing: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fallback_beat_interval: 2.0,
            min_beats: 4,
            weak_threshold: 0.4,
            medium_threshold: 0.7,
            probe_group_chance: 0.15,
            long_group_chance: 0.6,
            action_bias_quiet: 0.7,
            action_bias_loud: 0.55,
            expression_lead_in: 0.25,
            expression_min_slice: 0.6,
            expression_max_slice: 2.5,
            expression_gap_min: 0.1,
            expression_gap_max: 0.3,
            infill_safety: 0.05,
            action_min_slice: 0.8,
            action_max_slice: 2.2,
            min_segment: 0.4,
            gap_fill_threshold: 0.05,
            continuity_threshold: 0.25,
            closing_tolerance: 0.05,
            recent_memory: 3,
            light_cues: true,
            strict_closing: false,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.fallback_beat_interval > 0.0) {
            return Err(ChoreoError::Config(
                "planner.fallback_beat_interval must be positive".into(),
            ));
        }
        if !(0.0 < self.weak_threshold && self.weak_threshold < self.medium_threshold) {
            return Err(ChoreoError::Config(
                "planner thresholds must satisfy 0 < weak < medium".into(),
            ));
        }
        for (name, p) in [
            ("probe_group_chance", self.probe_group_chance),
            ("long_group_chance", self.long_group_chance),
            ("action_bias_quiet", self.action_bias_quiet),
            ("action_bias_loud", self.action_bias_loud),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(ChoreoError::Config(format!(
                    "planner.{name} must be a probability, got {p}"
                )));
            }
        }
        if self.expression_min_slice > self.expression_max_slice
            || self.action_min_slice > self.action_max_slice
        {
            return Err(ChoreoError::Config(
                "planner slice bounds are inverted".into(),
            ));
        }
        if self.expression_gap_min > self.expression_gap_max {
            return Err(ChoreoError::Config(
                "planner.expression_gap_min exceeds expression_gap_max".into(),
            ));
        }
        if !(self.min_segment > 0.0) {
            return Err(ChoreoError::Config(
                "planner.min_segment must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Timing policy for the synchronized performance loop, in seconds unless
/// the field name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub late_tolerance: f64,
    pub min_start_motion: f64,
    pub min_start_expression: f64,
    pub min_start_light: f64,
    pub end_epsilon: f64,
    pub tick_ms: u64,
    pub motion_command_timeout: f64,
    pub teardown_grace: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            late_tolerance: 0.35,
            min_start_motion: 0.6,
            min_start_expression: 0.5,
            min_start_light: 0.2,
            end_epsilon: 0.05,
            tick_ms: 30,
            motion_command_timeout: 3.0,
            teardown_grace: 0.5,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn motion_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.motion_command_timeout.max(0.0)).unwrap_or(Duration::MAX)
    }

    pub fn grace(&self) -> Duration {
        Duration::try_from_secs_f64(self.teardown_grace.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Least time that must remain in the performance to start a segment.
    pub fn min_start(&self, segment_type: SegmentType) -> f64 {
        match segment_type {
            SegmentType::Dance | SegmentType::Action => self.min_start_motion,
            SegmentType::Expression => self.min_start_expression,
            SegmentType::Light => self.min_start_light,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let windows = [
            self.late_tolerance,
            self.min_start_motion,
            self.min_start_expression,
            self.min_start_light,
            self.end_epsilon,
            self.motion_command_timeout,
            self.teardown_grace,
        ];
        if windows.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ChoreoError::Config(
                "scheduler windows must be finite and non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Pacing for the segment-by-segment executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Fraction of a dance's duration to hold before stopping it.
    pub dance_hold_ratio: f64,
    pub inter_primitive_pause: f64,
    pub expression_delay: f64,
    pub inter_window_pause: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            dance_hold_ratio: 0.8,
            inter_primitive_pause: 0.2,
            expression_delay: 0.5,
            inter_window_pause: 0.2,
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.dance_hold_ratio) {
            return Err(ChoreoError::Config(
                "fallback.dance_hold_ratio must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Catalog loading options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Glob patterns per device profile. The `*` key applies to all profiles.
    pub exclusions: BTreeMap<String, Vec<String>>,
    /// Duration assumed for catalog entries that carry none.
    pub default_expression_ms: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            exclusions: BTreeMap::new(),
            default_expression_ms: 2000,
        }
    }
}
