use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{LightCue, Plan, PlanWindow, PlannedSegment, SegmentType};
use crate::{ChoreoError, Result};

const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_895;
const ACTIVITY_KIND: &str = "dance_with_music";

/// Cosmetic color attached to exported segments. Not used by execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorHint {
    pub a: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorHint {
    /// Hue steps by the golden ratio per index so neighbours never look alike.
    pub fn for_segment(index: usize, segment_type: SegmentType) -> Self {
        let hue = (index as f64 * GOLDEN_RATIO_CONJUGATE).fract();
        let (saturation, value) = match segment_type {
            SegmentType::Expression => (0.85, 0.95),
            _ => (0.70, 0.90),
        };
        let (r, g, b) = hsv_to_rgb(hue, saturation, value);
        Self {
            a: 0,
            r: channel(r),
            g: channel(g),
            b: channel(b),
        }
    }
}

fn channel(value: f64) -> u8 {
    (value * 255.0).clamp(0.0, 255.0) as u8
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s <= 0.0 {
        return (v, v, v);
    }
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match sector as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

fn round_centis(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Wire form of one plan segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub primitive_id: String,
    pub start_time: f64,
    pub duration: f64,
    pub segment_type: SegmentType,
    pub color: ColorHint,
    #[serde(default)]
    pub window: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<LightCue>,
}

impl Plan {
    /// Exports segments with times rounded to centiseconds.
    pub fn to_records(&self) -> Vec<PlanRecord> {
        self.segments()
            .iter()
            .enumerate()
            .map(|(index, s)| PlanRecord {
                primitive_id: s.primitive_id.clone(),
                start_time: round_centis(s.start_time),
                duration: round_centis(s.duration),
                segment_type: s.segment_type,
                color: ColorHint::for_segment(index, s.segment_type),
                window: s.window,
                light: s.light,
            })
            .collect()
    }

    /// Rebuilds a plan from exported records. Window bounds are recovered as
    /// the span of each window's motion segments.
    pub fn from_records(music_duration: f64, records: &[PlanRecord]) -> Result<Self> {
        if !(music_duration.is_finite() && music_duration > 0.0) {
            return Err(ChoreoError::InvalidPlan("music duration must be positive".into()));
        }

        let mut spans: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
        let segments: Vec<PlannedSegment> = records
            .iter()
            .map(|r| {
                if r.segment_type.is_motion() {
                    let span = spans.entry(r.window).or_insert((r.start_time, r.start_time));
                    span.0 = span.0.min(r.start_time);
                    span.1 = span.1.max(r.start_time + r.duration);
                }
                PlannedSegment {
                    primitive_id: r.primitive_id.clone(),
                    start_time: r.start_time,
                    duration: r.duration,
                    segment_type: r.segment_type,
                    window: r.window,
                    light: r.light,
                }
            })
            .collect();

        let windows = spans
            .into_iter()
            .map(|(index, (start, end))| PlanWindow { index, start, end })
            .collect();
        Ok(Plan::new(music_duration, segments, windows, None))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicInfo {
    pub name: String,
    pub music_file_url: String,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub actions: Vec<PlanRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityData {
    pub music_info: MusicInfo,
    pub activity: Activity,
    pub robot_model_id: String,
}

/// Envelope handed to the execution side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: ActivityData,
}

impl ActivityDocument {
    pub fn new(music_info: MusicInfo, plan: &Plan, robot_model_id: impl Into<String>) -> Self {
        Self {
            kind: ACTIVITY_KIND.to_string(),
            data: ActivityData {
                music_info,
                activity: Activity {
                    actions: plan.to_records(),
                },
                robot_model_id: robot_model_id.into(),
            },
        }
    }

    pub fn to_plan(&self) -> Result<Plan> {
        if self.kind != ACTIVITY_KIND {
            return Err(ChoreoError::invalid(format!(
                "unsupported activity type `{}`",
                self.kind
            )));
        }
        Plan::from_records(self.data.music_info.duration, &self.data.activity.actions)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
