//! Running plans on an actuator.
//!
//! [`PerformanceScheduler`] follows the music clock and drops what it can no
//! longer start on time. [`FallbackExecutor`] walks the plan window by window
//! with plain sequential waits. [`PerformanceDirector`] owns the actuator
//! handle and picks between the two.

mod fallback;
mod scheduler;
mod side_effects;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub use fallback::FallbackExecutor;
pub use scheduler::{Performance, PerformanceClock, PerformanceScheduler, PerformanceState};

use crate::actuator::ActuatorPort;
use crate::config::{AppConfig, FallbackConfig, SchedulerConfig};
use crate::plan::Plan;
use crate::{ChoreoError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Clock-driven scheduler with late-drop and near-end suppression.
    Synchronized,
    /// Window-by-window sequential execution.
    SegmentBySegment,
    /// Synchronized when the actuator engages, segment-by-segment otherwise.
    #[default]
    Auto,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Synchronized => "synchronized",
            ExecutionMode::SegmentBySegment => "segments",
            ExecutionMode::Auto => "auto",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ChoreoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "synchronized" | "sync" => Ok(ExecutionMode::Synchronized),
            "segments" | "segment-by-segment" | "fallback" => Ok(ExecutionMode::SegmentBySegment),
            "auto" => Ok(ExecutionMode::Auto),
            other => Err(ChoreoError::invalid(format!("unknown execution mode `{other}`"))),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    PartiallyCompleted,
}

/// Why a planned segment never reached the actuator, or failed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Came due further behind the clock than the late tolerance allows.
    Stale,
    /// Too little of the performance was left to start it.
    NearEnd,
    /// The actuator rejected or timed out on the command.
    CommandFailed,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::Stale => "stale",
            DropReason::NearEnd => "near_end",
            DropReason::CommandFailed => "command_failed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate result of one performance. Individual command failures never
/// abort a performance; they only show up here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Executor that actually ran; never `Auto`.
    pub mode: ExecutionMode,
    /// Segments in the plan.
    pub total: usize,
    /// Segments handed to the actuator, including ones whose command failed.
    pub dispatched: usize,
    /// Dropped because they came due too late to start in sync.
    pub stale: usize,
    /// Dropped because too little of the performance remained.
    pub near_end_suppressed: usize,
    /// Commands that reported an error or timed out.
    pub failed: usize,
    /// Side effects still running at teardown and cancelled there.
    pub side_effects_cancelled: usize,
    /// Stopped early by cancellation.
    pub interrupted: bool,
    /// The loop panicked; teardown still ran.
    pub faulted: bool,
    /// The final stop command failed. Logged only, never escalated.
    pub teardown_failed: bool,
}

impl PerformanceReport {
    pub fn new(mode: ExecutionMode, total: usize) -> Self {
        Self {
            mode,
            total,
            dispatched: 0,
            stale: 0,
            near_end_suppressed: 0,
            failed: 0,
            side_effects_cancelled: 0,
            interrupted: false,
            faulted: false,
            teardown_failed: false,
        }
    }

    pub fn dropped(&self) -> usize {
        self.stale + self.near_end_suppressed
    }

    pub fn outcome(&self) -> Outcome {
        if self.interrupted || self.faulted || self.failed > 0 || self.dropped() > 0 {
            Outcome::PartiallyCompleted
        } else {
            Outcome::Completed
        }
    }
}

/// Seconds as a [`Duration`], treating negative and non-finite values as zero.
pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Sleeps unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Single owner of the actuator handle. Only one performance, of either
/// kind, may drive the actuator at a time.
pub struct PerformanceDirector {
    actuator: Mutex<Arc<dyn ActuatorPort>>,
    scheduler: PerformanceScheduler,
    fallback: FallbackExecutor,
}

impl PerformanceDirector {
    pub fn new(
        actuator: Arc<dyn ActuatorPort>,
        scheduler: SchedulerConfig,
        fallback: FallbackConfig,
    ) -> Self {
        Self {
            actuator: Mutex::new(actuator),
            scheduler: PerformanceScheduler::new(scheduler),
            fallback: FallbackExecutor::new(fallback),
        }
    }

    pub fn from_config(actuator: Arc<dyn ActuatorPort>, config: &AppConfig) -> Self {
        Self::new(actuator, config.scheduler.clone(), config.fallback.clone())
    }

    /// Runs `plan` to completion or cancellation.
    ///
    /// Fails with [`ChoreoError::ActuatorBusy`] when another performance holds
    /// the actuator, and with [`ChoreoError::Actuator`] when synchronized mode
    /// is forced but the actuator cannot be engaged.
    pub async fn perform(
        &self,
        plan: &Plan,
        mode: ExecutionMode,
        cancel: CancellationToken,
    ) -> Result<PerformanceReport> {
        let guard = self
            .actuator
            .try_lock()
            .map_err(|_| ChoreoError::ActuatorBusy)?;
        let actuator = Arc::clone(&*guard);

        let use_scheduler = match mode {
            ExecutionMode::Synchronized => {
                actuator.engage().await?;
                true
            }
            ExecutionMode::SegmentBySegment => false,
            ExecutionMode::Auto => match actuator.engage().await {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(error = %err, "actuator did not engage, using segment-by-segment execution");
                    false
                }
            },
        };

        let report = if use_scheduler {
            self.scheduler
                .run_with_cancel(plan, Arc::clone(&actuator), cancel)
                .await
        } else {
            self.fallback.run(plan, actuator.as_ref(), &cancel).await
        };

        tracing::info!(
            mode = %report.mode,
            dispatched = report.dispatched,
            dropped = report.dropped(),
            failed = report.failed,
            outcome = ?report.outcome(),
            "performance finished"
        );
        Ok(report)
    }
}
