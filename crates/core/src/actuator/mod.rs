//! Capability interface to the physical robot.
//!
//! The core never talks to a device directly. Everything goes through
//! [`ActuatorPort`], whose calls are all fallible and may take hundreds of
//! milliseconds to answer.

mod simulated;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use simulated::{ActuatorCall, JournalEntry, SimulatedActuator};

/// Failure reported by an actuator command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("actuator disconnected")]
    Disconnected,
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsupported command: {0}")]
    Unsupported(String),
    /// Some commands of a combined request failed.
    #[error("{failed} of {attempted} commands failed")]
    Partial { failed: usize, attempted: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightColor {
    Red,
    #[default]
    Green,
    Blue,
}

impl LightColor {
    pub fn as_str(self) -> &'static str {
        match self {
            LightColor::Red => "red",
            LightColor::Green => "green",
            LightColor::Blue => "blue",
        }
    }

    /// Nearest supported color to an RGB triple, by dominant channel.
    pub fn nearest(r: u8, g: u8, b: u8) -> Self {
        if r >= g && r >= b {
            LightColor::Red
        } else if g >= b {
            LightColor::Green
        } else {
            LightColor::Blue
        }
    }
}

impl FromStr for LightColor {
    type Err = ActuatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(LightColor::Red),
            "green" => Ok(LightColor::Green),
            "blue" => Ok(LightColor::Blue),
            other => Err(ActuatorError::Unsupported(format!("light color `{other}`"))),
        }
    }
}

impl fmt::Display for LightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightMode {
    #[default]
    Normal,
    Breath,
}

impl LightMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LightMode::Normal => "normal",
            LightMode::Breath => "breath",
        }
    }
}

impl FromStr for LightMode {
    type Err = ActuatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(LightMode::Normal),
            "breath" => Ok(LightMode::Breath),
            other => Err(ActuatorError::Unsupported(format!("light mode `{other}`"))),
        }
    }
}

impl fmt::Display for LightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combined dance + expression + light request for one window. Shorter
/// lists are cycled to the length of the longest one.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousPerformance {
    pub dances: Vec<String>,
    pub expressions: Vec<String>,
    pub light_colors: Vec<LightColor>,
    /// Time given to each item of the cycle.
    pub segment_duration: Duration,
    /// Delay between starting the dance and playing the expression.
    pub expression_delay: Duration,
    /// Pause after stopping motion, before the next item.
    pub pause: Duration,
}

impl ContinuousPerformance {
    pub fn rounds(&self) -> usize {
        self.dances
            .len()
            .max(self.expressions.len())
            .max(self.light_colors.len())
    }

    fn cycled<T>(items: &[T], round: usize) -> Option<&T> {
        if items.is_empty() {
            None
        } else {
            items.get(round % items.len())
        }
    }
}

/// Commands the robot understands.
#[async_trait]
pub trait ActuatorPort: Send + Sync {
    /// Prepares the device for a performance (connection checks, program
    /// mode). A failure here means the synchronized scheduler cannot be used.
    async fn engage(&self) -> Result<(), ActuatorError> {
        Ok(())
    }

    async fn start_primitive(&self, id: &str) -> Result<(), ActuatorError>;

    async fn stop_all_motion(&self) -> Result<(), ActuatorError>;

    async fn play_expression(&self, id: &str) -> Result<(), ActuatorError>;

    async fn set_light(
        &self,
        color: LightColor,
        mode: LightMode,
        duration_ms: u32,
    ) -> Result<(), ActuatorError>;

    /// Runs a combined request built from the primitive commands. Devices
    /// with a native equivalent should override this.
    async fn perform_continuous(&self, request: &ContinuousPerformance) -> Result<(), ActuatorError> {
        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut tally = |result: Result<(), ActuatorError>| {
            attempted += 1;
            if let Err(err) = result {
                tracing::warn!(error = %err, "continuous performance command failed");
                failed += 1;
            }
        };

        let light_ms = u32::try_from(request.segment_duration.as_millis()).unwrap_or(u32::MAX);
        for round in 0..request.rounds() {
            let round_start = tokio::time::Instant::now();
            let dance = ContinuousPerformance::cycled(&request.dances, round);
            let expression = ContinuousPerformance::cycled(&request.expressions, round);
            let color = ContinuousPerformance::cycled(&request.light_colors, round)
                .copied()
                .unwrap_or_default();

            tracing::debug!(round, ?dance, ?expression, %color, "continuous round");

            let start_dance = async {
                match dance {
                    Some(id) => Some(self.start_primitive(id).await),
                    None => None,
                }
            };
            let light = self.set_light(color, LightMode::Breath, light_ms);
            let (dance_result, light_result) = futures::join!(start_dance, light);
            if let Some(result) = dance_result {
                tally(result);
            }
            tally(light_result);

            tokio::time::sleep(request.expression_delay).await;
            if let Some(id) = expression {
                tally(self.play_expression(id).await);
            }

            let elapsed = round_start.elapsed();
            if elapsed < request.segment_duration {
                tokio::time::sleep(request.segment_duration - elapsed).await;
            }
            tally(self.stop_all_motion().await);
            tokio::time::sleep(request.pause).await;
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(ActuatorError::Partial { failed, attempted })
        }
    }
}
