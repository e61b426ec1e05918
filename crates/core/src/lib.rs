//! Core library for the Music Choreographer.
//!
//! Audio features come in, a timed [`Plan`] of robot primitives comes out of
//! the [`Planner`], and the plan is played on an [`ActuatorPort`] either by
//! the clock-driven [`PerformanceScheduler`] or by the simpler
//! [`FallbackExecutor`]. Each module owns one of those stages; nothing in the
//! crate keeps global state.

pub mod actuator;
pub mod analysis;
pub mod catalog;
pub mod config;
pub mod error;
pub mod perform;
pub mod plan;
pub mod planner;

pub use actuator::{
    ActuatorCall, ActuatorError, ActuatorPort, ContinuousPerformance, LightColor, LightMode,
    SimulatedActuator,
};
pub use analysis::{seed_from_audio, BeatAnalysis};
pub use catalog::{
    BuiltinCatalog, CatalogLoader, CatalogRecord, CatalogSource, CatalogView, Category,
    IntensityClass, MotionPrimitive, StaticCatalog, TomlCatalog, BUILTIN_PROFILE,
};
pub use config::{AppConfig, CatalogConfig, FallbackConfig, PlannerConfig, SchedulerConfig};
pub use error::{ChoreoError, Result};
pub use perform::{
    DropReason, ExecutionMode, FallbackExecutor, Outcome, PerformanceDirector, PerformanceReport,
    PerformanceScheduler,
};
pub use plan::{
    ActivityDocument, Degradation, LightCue, MusicInfo, Plan, PlanWindow, PlannedSegment,
    SegmentType,
};
pub use planner::Planner;
