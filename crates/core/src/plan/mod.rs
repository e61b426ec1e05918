//! The timeline artifact produced by the planner and consumed by the
//! performance executors.

mod export;

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use export::{ActivityDocument, ColorHint, MusicInfo, PlanRecord};

use crate::actuator::{LightColor, LightMode};
use crate::catalog::Category;
use crate::{ChoreoError, Result};

/// Slack used when comparing segment boundaries computed in floating point.
pub const TIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentType {
    Dance,
    Action,
    Expression,
    Light,
}

impl SegmentType {
    /// Dance and action segments drive the body and are mutually exclusive.
    pub fn is_motion(self) -> bool {
        matches!(self, SegmentType::Dance | SegmentType::Action)
    }

    /// Order among segments sharing a start time.
    pub fn priority(self) -> u8 {
        match self {
            SegmentType::Dance | SegmentType::Action => 0,
            SegmentType::Expression => 1,
            SegmentType::Light => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentType::Dance => "dance",
            SegmentType::Action => "action",
            SegmentType::Expression => "expression",
            SegmentType::Light => "light",
        }
    }
}

impl From<Category> for SegmentType {
    fn from(category: Category) -> Self {
        match category {
            Category::Dance => SegmentType::Dance,
            Category::Action => SegmentType::Action,
            Category::Expression => SegmentType::Expression,
            Category::Light => SegmentType::Light,
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Color and mode of a light segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCue {
    pub color: LightColor,
    pub mode: LightMode,
}

impl LightCue {
    /// Parses ids shaped like `light_<color>_<mode>`.
    pub fn from_primitive_id(id: &str) -> Option<Self> {
        let mut parts = id.strip_prefix("light_")?.splitn(2, '_');
        let color = parts.next()?.parse().ok()?;
        let mode = match parts.next() {
            Some(mode) => mode.parse().ok()?,
            None => LightMode::Normal,
        };
        Some(Self { color, mode })
    }
}

/// One scheduled occurrence of a primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedSegment {
    pub primitive_id: String,
    pub start_time: f64,
    pub duration: f64,
    pub segment_type: SegmentType,
    /// Index of the planning window this segment was generated for.
    #[serde(default)]
    pub window: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<LightCue>,
}

impl PlannedSegment {
    pub fn new(
        primitive_id: impl Into<String>,
        start_time: f64,
        duration: f64,
        segment_type: SegmentType,
        window: usize,
    ) -> Self {
        Self {
            primitive_id: primitive_id.into(),
            start_time,
            duration,
            segment_type,
            window,
            light: None,
        }
    }

    pub fn with_light(mut self, cue: LightCue) -> Self {
        self.light = Some(cue);
        self
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    fn order(&self, other: &Self) -> Ordering {
        self.start_time
            .total_cmp(&other.start_time)
            .then_with(|| self.segment_type.priority().cmp(&other.segment_type.priority()))
    }
}

/// Coarse time window the planner grouped beats into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanWindow {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl PlanWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Why a plan is weaker than the planner would normally produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// No action fit the music, so the shortest primitive closes the whole
    /// timeline and only expressions ride on top of it.
    InsufficientCatalog,
}

/// Ordered, immutable timeline of segments covering a piece of music.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    music_duration: f64,
    segments: Vec<PlannedSegment>,
    #[serde(default)]
    windows: Vec<PlanWindow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    degradation: Option<Degradation>,
}

impl Plan {
    pub fn new(
        music_duration: f64,
        mut segments: Vec<PlannedSegment>,
        windows: Vec<PlanWindow>,
        degradation: Option<Degradation>,
    ) -> Self {
        sort_segments(&mut segments);
        Self {
            music_duration,
            segments,
            windows,
            degradation,
        }
    }

    pub fn duration(&self) -> f64 {
        self.music_duration
    }

    pub fn segments(&self) -> &[PlannedSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn windows(&self) -> &[PlanWindow] {
        &self.windows
    }

    pub fn degradation(&self) -> Option<Degradation> {
        self.degradation
    }

    pub fn motion(&self) -> impl Iterator<Item = &PlannedSegment> {
        self.segments.iter().filter(|s| s.segment_type.is_motion())
    }

    /// The segment that ends last; motion wins ties. For a valid plan this is
    /// the closing action.
    pub fn closing(&self) -> Option<&PlannedSegment> {
        self.segments.iter().fold(None, |best: Option<&PlannedSegment>, s| match best {
            Some(b) if b.end_time() > s.end_time() + TIME_EPSILON => Some(b),
            Some(b)
                if (b.end_time() - s.end_time()).abs() <= TIME_EPSILON
                    && (b.segment_type.is_motion() || !s.segment_type.is_motion()) =>
            {
                Some(b)
            }
            _ => Some(s),
        })
    }

    pub fn window_segments(&self, window: usize) -> impl Iterator<Item = &PlannedSegment> {
        self.segments.iter().filter(move |s| s.window == window)
    }

    /// Checks ordering, overlap, bounds, closing and coverage rules.
    pub fn validate(&self, continuity: f64, closing_tolerance: f64) -> Result<()> {
        let end = self.music_duration;
        let fail = |msg: String| Err(ChoreoError::InvalidPlan(msg));

        for (i, s) in self.segments.iter().enumerate() {
            if !(s.start_time.is_finite() && s.start_time >= 0.0 && s.duration > 0.0) {
                return fail(format!("segment {i} has start {} duration {}", s.start_time, s.duration));
            }
            if !s.segment_type.is_motion() && s.end_time() > end + TIME_EPSILON {
                return fail(format!("{} segment {i} ends at {:.3} past {end:.3}", s.segment_type, s.end_time()));
            }
        }
        if self
            .segments
            .windows(2)
            .any(|pair| pair[0].order(&pair[1]) == Ordering::Greater)
        {
            return fail("segments are not sorted by start time and type".into());
        }

        let Some(closing) = self.closing() else {
            return fail("plan has no segments".into());
        };
        if closing.segment_type != SegmentType::Action
            || (closing.end_time() - end).abs() > closing_tolerance
        {
            return fail(format!(
                "closing segment is {} ending at {:.3}, expected action ending at {end:.3}",
                closing.segment_type,
                closing.end_time()
            ));
        }

        let mut covered_until = 0.0_f64;
        for s in self.motion() {
            if s.start_time < covered_until - TIME_EPSILON {
                return fail(format!(
                    "motion segment `{}` at {:.3} overlaps previous motion ending {covered_until:.3}",
                    s.primitive_id, s.start_time
                ));
            }
            if s.start_time - covered_until > continuity {
                return fail(format!(
                    "motion gap of {:.3}s before {:.3}",
                    s.start_time - covered_until,
                    s.start_time
                ));
            }
            covered_until = s.end_time();
        }
        if end - covered_until > continuity {
            return fail(format!("motion stops at {covered_until:.3} before {end:.3}"));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut plan: Self = serde_json::from_str(text)?;
        if !(plan.music_duration.is_finite() && plan.music_duration > 0.0) {
            return Err(ChoreoError::InvalidPlan("music duration must be positive".into()));
        }
        sort_segments(&mut plan.segments);
        Ok(plan)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }
}

/// Sorts by start time, motion before expression before light on ties.
/// Stable, so equal keys keep generation order.
pub fn sort_segments(segments: &mut [PlannedSegment]) {
    segments.sort_by(|a, b| a.order(b));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: &str, start: f64, duration: f64, kind: SegmentType) -> PlannedSegment {
        PlannedSegment::new(id, start, duration, kind, 0)
    }

    fn valid_plan() -> Plan {
        Plan::new(
            10.0,
            vec![
                seg("A1", 7.0, 3.0, SegmentType::Action),
                seg("E1", 0.25, 1.5, SegmentType::Expression),
                seg("D1", 0.0, 4.0, SegmentType::Dance),
                seg("A2", 4.0, 3.0, SegmentType::Action),
                seg("E2", 7.25, 2.0, SegmentType::Expression),
            ],
            vec![PlanWindow { index: 0, start: 0.0, end: 10.0 }],
            None,
        )
    }

    #[test]
    fn sorts_motion_before_expression_on_ties() {
        let plan = Plan::new(
            2.0,
            vec![
                seg("E", 0.0, 1.0, SegmentType::Expression),
                seg("L", 0.0, 1.0, SegmentType::Light),
                seg("A", 0.0, 2.0, SegmentType::Action),
            ],
            Vec::new(),
            None,
        );
        let order: Vec<_> = plan.segments().iter().map(|s| s.primitive_id.as_str()).collect();
        assert_eq!(order, ["A", "E", "L"]);
    }

    #[test]
    fn closing_is_the_segment_ending_last() {
        let plan = valid_plan();
        assert_eq!(plan.closing().unwrap().primitive_id, "A1");
        assert_eq!(plan.segments().last().unwrap().primitive_id, "E2");
        plan.validate(0.25, 0.05).unwrap();
    }

    #[test]
    fn detects_motion_overlap() {
        let plan = Plan::new(
            4.0,
            vec![seg("D", 0.0, 2.5, SegmentType::Dance), seg("A", 2.0, 2.0, SegmentType::Action)],
            Vec::new(),
            None,
        );
        let err = plan.validate(0.25, 0.05).unwrap_err();
        assert!(err.to_string().contains("overlaps"));
    }

    #[test]
    fn detects_gaps_and_bad_closing() {
        let gap = Plan::new(
            4.0,
            vec![seg("D", 0.0, 1.0, SegmentType::Dance), seg("A", 2.0, 2.0, SegmentType::Action)],
            Vec::new(),
            None,
        );
        assert!(gap.validate(0.25, 0.05).unwrap_err().to_string().contains("gap"));

        let dance_close = Plan::new(2.0, vec![seg("D", 0.0, 2.0, SegmentType::Dance)], Vec::new(), None);
        assert!(dance_close.validate(0.25, 0.05).is_err());
    }

    #[test]
    fn expression_past_the_end_is_invalid() {
        let plan = Plan::new(
            2.0,
            vec![seg("A", 0.0, 2.0, SegmentType::Action), seg("E", 1.5, 1.0, SegmentType::Expression)],
            Vec::new(),
            None,
        );
        assert!(plan.validate(0.25, 0.05).is_err());
    }

    #[test]
    fn json_round_trip_keeps_order() {
        let plan = valid_plan();
        let restored = Plan::from_json(&plan.to_json().unwrap()).unwrap();
        assert_eq!(restored, plan);
    }

    #[test]
    fn parses_light_cue_ids() {
        let cue = LightCue::from_primitive_id("light_red_breath").unwrap();
        assert_eq!(cue.color, LightColor::Red);
        assert_eq!(cue.mode, LightMode::Breath);
        assert_eq!(LightCue::from_primitive_id("light_blue").unwrap().mode, LightMode::Normal);
        assert!(LightCue::from_primitive_id("flash_red").is_none());
        assert!(LightCue::from_primitive_id("light_purple_normal").is_none());
    }
}
