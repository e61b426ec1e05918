use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::side_effects::SideEffectSet;
use super::{seconds, DropReason, ExecutionMode, PerformanceReport};
use crate::actuator::{ActuatorError, ActuatorPort};
use crate::config::SchedulerConfig;
use crate::plan::{LightCue, Plan, PlannedSegment, SegmentType, TIME_EPSILON};

/// Floor for idle sleeps; float rounding can leave a remainder that would
/// otherwise become a zero-length sleep.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Wall-clock position inside a performance.
#[derive(Debug, Default, Clone)]
pub struct PerformanceClock {
    started: Option<Instant>,
}

impl PerformanceClock {
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        self.started = None;
    }

    /// Seconds since [`start`](Self::start); zero before it.
    pub fn elapsed(&self) -> f64 {
        self.started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Ephemeral bookkeeping of one synchronized run.
#[derive(Debug, Default)]
pub struct PerformanceState {
    pub clock: PerformanceClock,
    /// Index of the next plan segment to consider.
    pub cursor: usize,
    side_effects: SideEffectSet,
}

impl PerformanceState {
    pub fn live_side_effects(&self) -> usize {
        self.side_effects.len()
    }
}

/// Clock-driven executor.
///
/// Segments are started when the performance clock reaches them. A segment
/// that comes due more than `late_tolerance` late is dropped as stale, and
/// none is started once too little of the music remains for its type.
/// Motion commands are awaited one at a time; expressions and lights run as
/// bounded side effects.
#[derive(Debug, Clone, Default)]
pub struct PerformanceScheduler {
    config: SchedulerConfig,
}

impl PerformanceScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn run(&self, plan: &Plan, actuator: Arc<dyn ActuatorPort>) -> PerformanceReport {
        self.run_with_cancel(plan, actuator, CancellationToken::new())
            .await
    }

    /// Runs until the music ends or `cancel` fires. Teardown always runs,
    /// even when the loop panics.
    pub async fn run_with_cancel(
        &self,
        plan: &Plan,
        actuator: Arc<dyn ActuatorPort>,
        cancel: CancellationToken,
    ) -> PerformanceReport {
        let mut performance = Performance::new(plan, actuator, self.config.clone());
        let driven = AssertUnwindSafe(performance.drive(&cancel))
            .catch_unwind()
            .await;
        if driven.is_err() {
            tracing::error!("performance loop panicked, tearing down");
            performance.report.faulted = true;
        }
        performance.teardown().await;
        performance.into_report()
    }
}

/// One synchronized run of a plan.
pub struct Performance {
    segments: Vec<PlannedSegment>,
    music_duration: f64,
    actuator: Arc<dyn ActuatorPort>,
    config: SchedulerConfig,
    state: PerformanceState,
    report: PerformanceReport,
    torn_down: bool,
}

impl Performance {
    pub fn new(plan: &Plan, actuator: Arc<dyn ActuatorPort>, config: SchedulerConfig) -> Self {
        Self {
            segments: plan.segments().to_vec(),
            music_duration: plan.duration(),
            actuator,
            config,
            state: PerformanceState::default(),
            report: PerformanceReport::new(ExecutionMode::Synchronized, plan.len()),
            torn_down: false,
        }
    }

    pub fn state(&self) -> &PerformanceState {
        &self.state
    }

    pub fn report(&self) -> &PerformanceReport {
        &self.report
    }

    pub fn into_report(self) -> PerformanceReport {
        self.report
    }

    /// The scheduling loop. Returns when the music is over, the plan is
    /// exhausted and its time has run out, or `cancel` fires.
    pub async fn drive(&mut self, cancel: &CancellationToken) {
        if let Err(err) = self.actuator.stop_all_motion().await {
            tracing::warn!(error = %err, "could not reset motion before the performance");
        }
        self.state.clock.start();
        self.state.cursor = 0;
        tracing::info!(
            segments = self.segments.len(),
            duration = self.music_duration,
            "synchronized performance started"
        );

        loop {
            if cancel.is_cancelled() {
                self.report.interrupted = true;
                break;
            }
            let now = self.state.clock.elapsed();
            let remaining = self.music_duration - now;
            if remaining <= self.config.end_epsilon {
                break;
            }

            if let Some(segment) = self.next_due(now) {
                self.state.cursor += 1;
                self.dispatch(segment, now, remaining, cancel).await;
                continue;
            }

            self.report.failed += self.state.side_effects.reap();
            let wait = if self.state.cursor >= self.segments.len() {
                seconds(remaining - self.config.end_epsilon).max(MIN_WAIT)
            } else {
                self.config.tick()
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.report.interrupted = true;
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let undispatched = self.segments.len().saturating_sub(self.state.cursor);
        if undispatched > 0 {
            tracing::debug!(undispatched, "segments left when the loop ended");
        }
    }

    fn next_due(&self, now: f64) -> Option<PlannedSegment> {
        self.segments
            .get(self.state.cursor)
            .filter(|s| s.start_time <= now + TIME_EPSILON)
            .cloned()
    }

    async fn dispatch(&mut self, segment: PlannedSegment, now: f64, remaining: f64, cancel: &CancellationToken) {
        let lateness = now - segment.start_time;
        if lateness > self.config.late_tolerance {
            tracing::warn!(
                segment = %segment.primitive_id,
                late = lateness,
                reason = %DropReason::Stale,
                "segment dropped"
            );
            self.report.stale += 1;
            return;
        }
        if remaining < self.config.min_start(segment.segment_type) {
            tracing::debug!(
                segment = %segment.primitive_id,
                remaining,
                reason = %DropReason::NearEnd,
                "segment dropped"
            );
            self.report.near_end_suppressed += 1;
            return;
        }

        self.report.dispatched += 1;
        match segment.segment_type {
            SegmentType::Dance | SegmentType::Action => {
                match self.start_motion(&segment, cancel).await {
                    Some(Ok(())) => {
                        tracing::debug!(id = %segment.primitive_id, at = now, "motion started");
                    }
                    Some(Err(err)) => {
                        tracing::warn!(
                            segment = %segment.primitive_id,
                            error = %err,
                            reason = %DropReason::CommandFailed,
                            "motion command failed"
                        );
                        self.report.failed += 1;
                    }
                    None => self.report.interrupted = true,
                }
            }
            SegmentType::Expression => {
                let actuator = Arc::clone(&self.actuator);
                let id = segment.primitive_id.clone();
                let bound = seconds(segment.duration.min(remaining));
                self.state.side_effects.spawn(
                    segment.primitive_id,
                    SegmentType::Expression,
                    bound,
                    async move { actuator.play_expression(&id).await },
                );
            }
            SegmentType::Light => {
                let actuator = Arc::clone(&self.actuator);
                let cue = segment
                    .light
                    .or_else(|| LightCue::from_primitive_id(&segment.primitive_id))
                    .unwrap_or(LightCue {
                        color: Default::default(),
                        mode: Default::default(),
                    });
                let bound = seconds(segment.duration.min(remaining));
                let millis = u32::try_from(bound.as_millis()).unwrap_or(u32::MAX);
                self.state.side_effects.spawn(
                    segment.primitive_id,
                    SegmentType::Light,
                    bound,
                    async move { actuator.set_light(cue.color, cue.mode, millis).await },
                );
            }
        }
    }

    /// Starts a motion primitive, stopping the previous one first for
    /// dances. `None` when cancelled while waiting.
    async fn start_motion(
        &self,
        segment: &PlannedSegment,
        cancel: &CancellationToken,
    ) -> Option<Result<(), ActuatorError>> {
        let timeout = self.config.motion_timeout();
        let command = async {
            if segment.segment_type == SegmentType::Dance {
                if let Err(err) = self.actuator.stop_all_motion().await {
                    tracing::warn!(error = %err, "stop before dance failed");
                }
            }
            self.actuator.start_primitive(&segment.primitive_id).await
        };
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, command) => {
                Some(result.unwrap_or(Err(ActuatorError::Timeout(timeout))))
            }
        }
    }

    /// Cancels live side effects, then stops all motion. Runs once; later
    /// calls return immediately.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            tracing::debug!("teardown already done");
            return;
        }
        self.torn_down = true;

        let summary = self.state.side_effects.shutdown(self.config.grace()).await;
        self.report.side_effects_cancelled += summary.cancelled;
        self.report.failed += summary.failed;

        let timeout = self.config.motion_timeout();
        let stopped = match tokio::time::timeout(timeout, self.actuator.stop_all_motion()).await {
            Ok(result) => result,
            Err(_) => Err(ActuatorError::Timeout(timeout)),
        };
        if let Err(err) = stopped {
            tracing::warn!(error = %err, "final stop failed");
            self.report.teardown_failed = true;
        }
        self.state.clock.reset();
        tracing::info!(
            cancelled_side_effects = summary.cancelled,
            "performance torn down"
        );
    }
}
