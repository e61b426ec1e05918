use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{seconds, sleep_or_cancel, DropReason, ExecutionMode, PerformanceReport};
use crate::actuator::{ActuatorError, ActuatorPort, ContinuousPerformance};
use crate::config::FallbackConfig;
use crate::plan::{LightCue, Plan, PlannedSegment, SegmentType};

/// Plays a plan window by window with sequential waits and no clock. Used
/// when the actuator cannot keep up with the synchronized scheduler.
#[derive(Debug, Clone, Default)]
pub struct FallbackExecutor {
    config: FallbackConfig,
}

impl FallbackExecutor {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub async fn run(
        &self,
        plan: &Plan,
        actuator: &dyn ActuatorPort,
        cancel: &CancellationToken,
    ) -> PerformanceReport {
        let mut report = PerformanceReport::new(ExecutionMode::SegmentBySegment, plan.len());
        let mut windows: BTreeMap<usize, Vec<&PlannedSegment>> = BTreeMap::new();
        for segment in plan.segments() {
            windows.entry(segment.window).or_default().push(segment);
        }
        tracing::info!(windows = windows.len(), "segment-by-segment performance started");

        for (index, segments) in &windows {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }
            let attempted = segments.len();
            let failed = if wants_continuous(segments) {
                self.run_continuous(*index, segments, actuator, cancel).await
            } else {
                self.run_individually(segments, actuator, cancel).await
            };
            report.dispatched += attempted;
            report.failed += failed;
            if failed > 0 {
                tracing::warn!(window = index, failed, attempted, "window finished with failures");
            }
            if !sleep_or_cancel(seconds(self.config.inter_window_pause), cancel).await {
                report.interrupted = true;
                break;
            }
        }
        if cancel.is_cancelled() {
            report.interrupted = true;
        }

        if let Err(err) = actuator.stop_all_motion().await {
            tracing::warn!(error = %err, "final stop failed");
            report.teardown_failed = true;
        }
        report
    }

    /// One combined request for the whole window. Returns the number of
    /// failed commands.
    async fn run_continuous(
        &self,
        window: usize,
        segments: &[&PlannedSegment],
        actuator: &dyn ActuatorPort,
        cancel: &CancellationToken,
    ) -> usize {
        let of_type = |kind: SegmentType| {
            segments
                .iter()
                .filter(move |s| s.segment_type == kind)
                .copied()
        };
        let start = segments.iter().map(|s| s.start_time).fold(f64::INFINITY, f64::min);
        let end = segments.iter().map(|s| s.end_time()).fold(0.0_f64, f64::max);

        let mut request = ContinuousPerformance {
            dances: of_type(SegmentType::Dance).map(|s| s.primitive_id.clone()).collect(),
            expressions: of_type(SegmentType::Expression)
                .map(|s| s.primitive_id.clone())
                .collect(),
            light_colors: of_type(SegmentType::Light).map(|s| cue_for(s).color).collect(),
            segment_duration: Duration::ZERO,
            expression_delay: seconds(self.config.expression_delay),
            pause: seconds(self.config.inter_primitive_pause),
        };
        let rounds = request.rounds().max(1);
        request.segment_duration = seconds((end - start) / rounds as f64);
        tracing::debug!(window, rounds, "continuous window");

        tokio::select! {
            _ = cancel.cancelled() => 0,
            result = actuator.perform_continuous(&request) => match result {
                Ok(()) => 0,
                Err(ActuatorError::Partial { failed, .. }) => failed,
                Err(err) => {
                    tracing::warn!(window, error = %err, "continuous request failed");
                    segments.len()
                }
            },
        }
    }

    async fn run_individually(
        &self,
        segments: &[&PlannedSegment],
        actuator: &dyn ActuatorPort,
        cancel: &CancellationToken,
    ) -> usize {
        let mut failed = 0;
        for segment in segments {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return failed,
                outcome = self.play(segment, actuator) => outcome,
            };
            if let Err(err) = outcome {
                tracing::warn!(
                    segment = %segment.primitive_id,
                    error = %err,
                    reason = %DropReason::CommandFailed,
                    "primitive failed"
                );
                failed += 1;
            }
            if !sleep_or_cancel(seconds(self.config.inter_primitive_pause), cancel).await {
                break;
            }
        }
        failed
    }

    async fn play(&self, segment: &PlannedSegment, actuator: &dyn ActuatorPort) -> Result<(), ActuatorError> {
        let id = segment.primitive_id.as_str();
        match segment.segment_type {
            SegmentType::Dance => {
                actuator.start_primitive(id).await?;
                tokio::time::sleep(seconds(segment.duration * self.config.dance_hold_ratio)).await;
                actuator.stop_all_motion().await
            }
            SegmentType::Action => {
                actuator.start_primitive(id).await?;
                tokio::time::sleep(seconds(segment.duration)).await;
                Ok(())
            }
            SegmentType::Expression => {
                actuator.play_expression(id).await?;
                tokio::time::sleep(seconds(segment.duration)).await;
                Ok(())
            }
            SegmentType::Light => {
                let cue = cue_for(segment);
                let millis = u32::try_from(seconds(segment.duration).as_millis()).unwrap_or(u32::MAX);
                actuator.set_light(cue.color, cue.mode, millis).await
            }
        }
    }
}

/// Windows with a dance plus an expression or light go out as one combined
/// request.
fn wants_continuous(segments: &[&PlannedSegment]) -> bool {
    let has = |kind: SegmentType| segments.iter().any(|s| s.segment_type == kind);
    has(SegmentType::Dance) && (has(SegmentType::Expression) || has(SegmentType::Light))
}

fn cue_for(segment: &PlannedSegment) -> LightCue {
    segment
        .light
        .or_else(|| LightCue::from_primitive_id(&segment.primitive_id))
        .unwrap_or(LightCue {
            color: Default::default(),
            mode: Default::default(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{ActuatorCall, LightColor, LightMode, SimulatedActuator};
    use crate::plan::PlanWindow;

    fn windowed_plan() -> Plan {
        Plan::new(
            6.0,
            vec![
                PlannedSegment::new("D1", 0.0, 3.0, SegmentType::Dance, 0),
                PlannedSegment::new("E1", 0.25, 1.5, SegmentType::Expression, 0),
                PlannedSegment::new("L1", 0.0, 3.0, SegmentType::Light, 0).with_light(LightCue {
                    color: LightColor::Red,
                    mode: LightMode::Normal,
                }),
                PlannedSegment::new("A1", 3.0, 3.0, SegmentType::Action, 1),
                PlannedSegment::new("E2", 3.25, 1.0, SegmentType::Expression, 1),
            ],
            vec![
                PlanWindow { index: 0, start: 0.0, end: 3.0 },
                PlanWindow { index: 1, start: 3.0, end: 6.0 },
            ],
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn dance_windows_go_out_as_one_continuous_request() {
        let actuator = SimulatedActuator::new();
        let report = FallbackExecutor::default()
            .run(&windowed_plan(), &actuator, &CancellationToken::new())
            .await;

        assert_eq!(report.mode, ExecutionMode::SegmentBySegment);
        assert_eq!(report.dispatched, 5);
        assert_eq!(report.failed, 0);

        let calls = actuator.calls();
        assert_eq!(calls[0], ActuatorCall::StartPrimitive("D1".into()));
        // The combined request lights the window with the planned color in
        // breathing mode.
        assert!(calls.contains(&ActuatorCall::SetLight {
            color: LightColor::Red,
            mode: LightMode::Breath,
            duration_ms: 3000,
        }));
        // The action window has no dance, so its primitives run one by one.
        let action = calls
            .iter()
            .position(|c| *c == ActuatorCall::StartPrimitive("A1".into()))
            .unwrap();
        assert_eq!(calls[action + 1], ActuatorCall::PlayExpression("E2".into()));
        assert_eq!(calls.last(), Some(&ActuatorCall::StopAllMotion));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_window_does_not_stop_the_next() {
        let actuator = SimulatedActuator::new().failing("D1");
        let report = FallbackExecutor::default()
            .run(&windowed_plan(), &actuator, &CancellationToken::new())
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(actuator.started(), vec!["A1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_still_stops_motion() {
        let actuator = SimulatedActuator::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = FallbackExecutor::default()
            .run(&windowed_plan(), &actuator, &cancel)
            .await;

        assert!(report.interrupted);
        assert_eq!(report.dispatched, 0);
        assert_eq!(actuator.calls(), vec![ActuatorCall::StopAllMotion]);
    }
}
