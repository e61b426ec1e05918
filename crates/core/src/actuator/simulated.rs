use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::{sleep, Instant};

use super::{ActuatorError, ActuatorPort, LightColor, LightMode};

/// A command as seen by the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCall {
    Engage,
    StartPrimitive(String),
    StopAllMotion,
    PlayExpression(String),
    SetLight {
        color: LightColor,
        mode: LightMode,
        duration_ms: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Time since the actuator was created, at the moment the call arrived.
    pub at: Duration,
    pub call: ActuatorCall,
    pub ok: bool,
}

/// Software stand-in for the robot.
///
/// Every call is recorded in a journal, answered after a fixed latency and
/// may fail either deterministically (per id) or randomly from a seeded
/// generator. Uses `tokio::time` so tests can run on paused time.
pub struct SimulatedActuator {
    created: Instant,
    latency: Duration,
    failure_rate: f64,
    rng: Mutex<ChaCha8Rng>,
    failing_ids: HashSet<String>,
    offline: bool,
    light_hold: bool,
    journal: Mutex<Vec<JournalEntry>>,
}

impl SimulatedActuator {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(0)),
            failing_ids: HashSet::new(),
            offline: false,
            light_hold: false,
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Random failure probability for every non-stop command.
    pub fn with_failure_rate(mut self, rate: f64, seed: u64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self.rng = Mutex::new(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    pub fn failing(mut self, id: impl Into<String>) -> Self {
        self.failing_ids.insert(id.into());
        self
    }

    /// Refuses to engage and rejects every command.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Makes `set_light` block for the full light duration, like devices
    /// that only acknowledge once the effect is over.
    pub fn with_light_hold(mut self) -> Self {
        self.light_hold = true;
        self
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.journal).clone()
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        lock(&self.journal).iter().map(|e| e.call.clone()).collect()
    }

    pub fn started(&self) -> Vec<String> {
        lock(&self.journal)
            .iter()
            .filter_map(|e| match &e.call {
                ActuatorCall::StartPrimitive(id) if e.ok => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        lock(&self.journal)
            .iter()
            .filter(|e| e.call == ActuatorCall::StopAllMotion)
            .count()
    }

    async fn answer(&self, call: ActuatorCall, id: Option<&str>) -> Result<(), ActuatorError> {
        let at = self.created.elapsed();
        let result = self.decide(&call, id);
        lock(&self.journal).push(JournalEntry {
            at,
            call,
            ok: result.is_ok(),
        });
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        result
    }

    fn decide(&self, call: &ActuatorCall, id: Option<&str>) -> Result<(), ActuatorError> {
        if self.offline {
            return Err(ActuatorError::Disconnected);
        }
        if let Some(id) = id {
            if self.failing_ids.contains(id) {
                return Err(ActuatorError::Rejected(id.to_string()));
            }
        }
        let may_fail = !matches!(call, ActuatorCall::StopAllMotion | ActuatorCall::Engage);
        if may_fail && self.failure_rate > 0.0 && lock(&self.rng).gen_bool(self.failure_rate) {
            return Err(ActuatorError::Rejected(format!("{call:?}")));
        }
        Ok(())
    }
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimulatedActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedActuator")
            .field("latency", &self.latency)
            .field("failure_rate", &self.failure_rate)
            .field("offline", &self.offline)
            .field("calls", &lock(&self.journal).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ActuatorPort for SimulatedActuator {
    async fn engage(&self) -> Result<(), ActuatorError> {
        self.answer(ActuatorCall::Engage, None).await
    }

    async fn start_primitive(&self, id: &str) -> Result<(), ActuatorError> {
        self.answer(ActuatorCall::StartPrimitive(id.to_string()), Some(id))
            .await
    }

    async fn stop_all_motion(&self) -> Result<(), ActuatorError> {
        self.answer(ActuatorCall::StopAllMotion, None).await
    }

    async fn play_expression(&self, id: &str) -> Result<(), ActuatorError> {
        self.answer(ActuatorCall::PlayExpression(id.to_string()), Some(id))
            .await
    }

    async fn set_light(
        &self,
        color: LightColor,
        mode: LightMode,
        duration_ms: u32,
    ) -> Result<(), ActuatorError> {
        let call = ActuatorCall::SetLight {
            color,
            mode,
            duration_ms,
        };
        self.answer(call, None).await?;
        if self.light_hold {
            sleep(Duration::from_millis(u64::from(duration_ms))).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ContinuousPerformance;

    #[tokio::test(start_paused = true)]
    async fn journals_calls_with_latency() {
        let actuator = SimulatedActuator::new()
            .with_latency(Duration::from_millis(200))
            .failing("bad");

        actuator.start_primitive("good").await.unwrap();
        assert!(actuator.start_primitive("bad").await.is_err());
        actuator.stop_all_motion().await.unwrap();

        let journal = actuator.journal();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[1].at, Duration::from_millis(200));
        assert!(!journal[1].ok);
        assert_eq!(actuator.started(), vec!["good".to_string()]);
        assert_eq!(actuator.stop_count(), 1);
    }

    #[tokio::test]
    async fn offline_device_refuses_everything() {
        let actuator = SimulatedActuator::new().offline();
        assert_eq!(actuator.engage().await, Err(ActuatorError::Disconnected));
        assert!(actuator.play_expression("e").await.is_err());
    }

    #[tokio::test]
    async fn seeded_failures_are_reproducible() {
        let run = || async {
            let actuator = SimulatedActuator::new().with_failure_rate(0.5, 42);
            let mut outcomes = Vec::new();
            for i in 0..16 {
                outcomes.push(actuator.start_primitive(&format!("p{i}")).await.is_ok());
            }
            outcomes
        };
        let first = run().await;
        assert_eq!(first, run().await);
        assert!(first.iter().any(|ok| *ok) && first.iter().any(|ok| !*ok));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_performance_cycles_lists() {
        let actuator = SimulatedActuator::new();
        let request = ContinuousPerformance {
            dances: vec!["d1".into(), "d2".into()],
            expressions: vec!["e1".into()],
            light_colors: vec![LightColor::Blue],
            segment_duration: Duration::from_secs(2),
            expression_delay: Duration::from_millis(500),
            pause: Duration::from_millis(200),
        };
        let started = Instant::now();
        actuator.perform_continuous(&request).await.unwrap();

        assert_eq!(actuator.started(), vec!["d1".to_string(), "d2".to_string()]);
        assert_eq!(actuator.stop_count(), 2);
        let expressions = actuator
            .calls()
            .into_iter()
            .filter(|c| matches!(c, ActuatorCall::PlayExpression(_)))
            .count();
        assert_eq!(expressions, 2);
        assert_eq!(started.elapsed(), Duration::from_millis(4400));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_performance_reports_partial_failure() {
        let actuator = SimulatedActuator::new().failing("d1");
        let request = ContinuousPerformance {
            dances: vec!["d1".into()],
            expressions: vec![],
            light_colors: vec![],
            segment_duration: Duration::from_secs(1),
            expression_delay: Duration::ZERO,
            pause: Duration::ZERO,
        };
        let err = actuator.perform_continuous(&request).await.unwrap_err();
        assert_eq!(err, ActuatorError::Partial { failed: 1, attempted: 3 });
    }
}
