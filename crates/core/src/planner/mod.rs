//! Beat-aware choreography planner.
//!
//! Beats are grouped into short windows; each window gets one motion
//! primitive (dance or action) sized to the window, expressions layered on
//! top and optionally a light cue. The timeline always ends on the longest
//! action that fits the music, placed so it finishes with the last note.
//!
//! All randomness comes from a [`ChaCha8Rng`] seeded by the caller, and the
//! catalog view iterates in a fixed order, so identical inputs give
//! identical plans.

mod beats;
mod select;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use self::beats::BeatGrid;
use self::select::PrimitiveSelector;
use crate::actuator::{LightColor, LightMode};
use crate::catalog::{CatalogView, Category, IntensityClass, MotionPrimitive};
use crate::config::PlannerConfig;
use crate::plan::{
    ColorHint, Degradation, LightCue, Plan, PlanWindow, PlannedSegment, SegmentType, TIME_EPSILON,
};
use crate::{ChoreoError, Result};

pub struct Planner<'a> {
    catalog: &'a CatalogView,
    config: PlannerConfig,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a CatalogView, config: PlannerConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Builds a plan for `music_duration` seconds of music.
    ///
    /// `beats` are onset times in seconds and `energies` one value per beat
    /// interval. Both may be empty or sparse; a uniform grid with flat energy
    /// is used when they are too thin to plan from.
    pub fn plan(&self, music_duration: f64, beats: &[f64], energies: &[f64], seed: u64) -> Result<Plan> {
        if self.catalog.is_empty() {
            return Err(ChoreoError::EmptyCatalog {
                profile: self.catalog.profile().to_string(),
            });
        }
        if !(music_duration.is_finite() && music_duration > 0.0) {
            return Err(ChoreoError::invalid(format!(
                "music duration must be a positive number of seconds, got {music_duration}"
            )));
        }

        let grid = BeatGrid::build(music_duration, beats, energies, &self.config);
        tracing::debug!(
            beats = grid.beats.len(),
            median_energy = grid.median,
            "beat grid ready"
        );

        let mut draft = Draft::new(self.catalog, &self.config, seed);
        draft.lay_windows(&grid);

        match self
            .catalog
            .longest_fitting(Category::Action, music_duration + TIME_EPSILON)
        {
            Some(closing) => draft.close_with(closing, music_duration),
            None if self.config.strict_closing => {
                return Err(ChoreoError::InsufficientCatalog { music_duration });
            }
            None => {
                tracing::warn!(
                    music_duration,
                    profile = self.catalog.profile(),
                    "no action fits the music, degrading to a single closing segment"
                );
                draft.close_degraded(music_duration)?;
            }
        }
        draft.clip(music_duration);

        let plan = draft.finish(music_duration);
        tracing::info!(
            segments = plan.len(),
            windows = plan.windows().len(),
            degraded = plan.degradation().is_some(),
            seed,
            "plan built"
        );
        Ok(plan)
    }
}

/// Mutable state of one planning run.
struct Draft<'a, 'c> {
    catalog: &'a CatalogView,
    config: &'c PlannerConfig,
    rng: ChaCha8Rng,
    selector: PrimitiveSelector<'a>,
    lights: bool,
    segments: Vec<PlannedSegment>,
    windows: Vec<PlanWindow>,
    degradation: Option<Degradation>,
}

impl<'a, 'c> Draft<'a, 'c> {
    fn new(catalog: &'a CatalogView, config: &'c PlannerConfig, seed: u64) -> Self {
        Self {
            catalog,
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
            selector: PrimitiveSelector::new(catalog, config.recent_memory),
            lights: config.light_cues && catalog.count(Category::Light) > 0,
            segments: Vec::new(),
            windows: Vec::new(),
            degradation: None,
        }
    }

    fn lay_windows(&mut self, grid: &BeatGrid) {
        let min_segment = self.config.min_segment;
        let last = grid.last_index();
        let mut i = 0;
        while i < last {
            let energy = grid.window_energy(i);
            let span = self.group_span(energy >= grid.median, i, last);

            let mut end = (i + span).min(last);
            while end < last && grid.beats[end] - grid.beats[i] < min_segment {
                end += 1;
            }
            if end < last && grid.beats[last] - grid.beats[end] < min_segment {
                end = last;
            }

            self.fill_window(grid.beats[i], grid.beats[end], energy);
            i = end;
        }
    }

    /// Beats per window. Loud passages mostly use longer groups with an
    /// occasional single-beat probe; quiet ones always use two beats.
    fn group_span(&mut self, loud: bool, index: usize, last: usize) -> usize {
        if !loud {
            return 2;
        }
        if self.rng.gen_bool(self.config.probe_group_chance) {
            1
        } else if index + 3 <= last && self.rng.gen_bool(self.config.long_group_chance) {
            3
        } else {
            2
        }
    }

    fn fill_window(&mut self, start: f64, end: f64, energy: f64) {
        let config = self.config;
        let intensity =
            IntensityClass::from_energy(energy, config.weak_threshold, config.medium_threshold);
        let action_bias = config.action_bias_quiet
            + (config.action_bias_loud - config.action_bias_quiet) * energy.clamp(0.0, 1.0);
        let (preferred, other) = if self.rng.gen_bool(action_bias.clamp(0.0, 1.0)) {
            (Category::Action, Category::Dance)
        } else {
            (Category::Dance, Category::Action)
        };

        let motion = match self.selector.pick(&mut self.rng, preferred, intensity) {
            Some(primitive) => Some(primitive),
            None => self.selector.pick(&mut self.rng, other, intensity),
        };
        let Some(motion) = motion else {
            return;
        };

        let index = self.windows.len();
        self.windows.push(PlanWindow { index, start, end });
        self.segments.push(PlannedSegment::new(
            motion.id.clone(),
            start,
            end - start,
            motion.category.into(),
            index,
        ));
        self.infill_expressions(start, end, intensity, index);
        self.push_light(start, end, intensity, index);
    }

    /// Layers expressions over `[start, end)`, never closer than the infill
    /// safety margin to `end`.
    fn infill_expressions(&mut self, start: f64, end: f64, intensity: IntensityClass, window: usize) {
        let config = self.config;
        let mut t = start + config.expression_lead_in;
        while t < end - config.min_segment {
            let max_allow = (end - t) - config.infill_safety;
            if max_allow <= config.expression_min_slice {
                break;
            }
            let Some(expression) = self.selector.pick(&mut self.rng, Category::Expression, intensity)
            else {
                break;
            };
            let natural = expression.duration_seconds.min(config.expression_max_slice);
            let slice = max_allow.min(config.expression_min_slice.max(natural));
            self.segments.push(PlannedSegment::new(
                expression.id.clone(),
                t,
                slice,
                SegmentType::Expression,
                window,
            ));
            t += slice
                + self
                    .rng
                    .gen_range(config.expression_gap_min..=config.expression_gap_max);
        }
    }

    fn push_light(&mut self, start: f64, end: f64, intensity: IntensityClass, window: usize) {
        if !self.lights {
            return;
        }
        let Some(light) = self.selector.pick(&mut self.rng, Category::Light, intensity) else {
            return;
        };
        let cue = LightCue::from_primitive_id(&light.id).unwrap_or_else(|| {
            let hint = ColorHint::for_segment(window, SegmentType::Light);
            LightCue {
                color: LightColor::nearest(hint.r, hint.g, hint.b),
                mode: if intensity == IntensityClass::Weak {
                    LightMode::Breath
                } else {
                    LightMode::Normal
                },
            }
        });
        self.segments.push(
            PlannedSegment::new(light.id.clone(), start, end - start, SegmentType::Light, window)
                .with_light(cue),
        );
    }

    /// Places `closing` so it ends with the music and repairs whatever the
    /// windows left between them and the closing start.
    fn close_with(&mut self, closing: &MotionPrimitive, music_duration: f64) {
        let config = self.config;
        let duration = closing.duration_seconds.min(music_duration);
        let close_start = (music_duration - duration).max(0.0);
        self.trim_before(close_start);

        let motion_end = self
            .segments
            .iter()
            .filter(|s| s.segment_type.is_motion())
            .map(PlannedSegment::end_time)
            .fold(0.0_f64, f64::max);
        let gap = close_start - motion_end;
        if gap > config.gap_fill_threshold {
            let short_gap = gap < config.min_segment;
            if !(short_gap && self.extend_last_motion(close_start)) {
                tracing::debug!(from = motion_end, to = close_start, "filling gap before closing");
                let index = self.windows.len();
                self.windows.push(PlanWindow {
                    index,
                    start: motion_end,
                    end: close_start,
                });
                self.chain_actions(motion_end, close_start, index);
                self.infill_expressions(motion_end, close_start, IntensityClass::Medium, index);
                self.push_light(motion_end, close_start, IntensityClass::Medium, index);
            }
        } else if gap > TIME_EPSILON {
            self.extend_last_motion(close_start);
        }

        let index = self.windows.len();
        self.windows.push(PlanWindow {
            index,
            start: close_start,
            end: music_duration,
        });
        self.segments.push(PlannedSegment::new(
            closing.id.clone(),
            close_start,
            duration,
            SegmentType::Action,
            index,
        ));
        self.infill_expressions(close_start, music_duration, closing.intensity, index);
        self.push_light(close_start, music_duration, closing.intensity, index);
    }

    /// Drops or shortens everything that reaches past `close_start`. Motion
    /// and lights survive truncated when at least a minimum segment remains;
    /// expressions crossing the boundary are discarded.
    fn trim_before(&mut self, close_start: f64) {
        let min_segment = self.config.min_segment;
        let survives = |start: f64| close_start - start >= min_segment - TIME_EPSILON;

        self.windows.retain_mut(|w| {
            if w.end <= close_start + TIME_EPSILON {
                true
            } else if survives(w.start) {
                w.end = close_start;
                true
            } else {
                false
            }
        });
        let live = self.windows.len();

        self.segments.retain_mut(|s| {
            if s.window >= live {
                return false;
            }
            if s.end_time() <= close_start + TIME_EPSILON {
                return true;
            }
            match s.segment_type {
                SegmentType::Expression => false,
                _ if survives(s.start_time) => {
                    s.duration = close_start - s.start_time;
                    true
                }
                _ => false,
            }
        });
    }

    fn extend_last_motion(&mut self, until: f64) -> bool {
        let Some(last) = self
            .segments
            .iter_mut()
            .filter(|s| s.segment_type.is_motion())
            .max_by(|a, b| a.end_time().total_cmp(&b.end_time()))
        else {
            return false;
        };
        last.duration = until - last.start_time;
        let window = last.window;
        if let Some(w) = self.windows.iter_mut().find(|w| w.index == window) {
            w.end = until;
        }
        true
    }

    /// Back-to-back medium actions from `start` to exactly `end`.
    fn chain_actions(&mut self, start: f64, end: f64, window: usize) {
        let config = self.config;
        let mut t = start;
        while end - t > TIME_EPSILON {
            let Some(action) =
                self.selector
                    .pick(&mut self.rng, Category::Action, IntensityClass::Medium)
            else {
                break;
            };
            let remaining = end - t;
            let mut slice = action
                .duration_seconds
                .clamp(config.action_min_slice, config.action_max_slice)
                .min(remaining);
            if remaining - slice < config.min_segment {
                slice = remaining;
            }
            self.segments.push(PlannedSegment::new(
                action.id.clone(),
                t,
                slice,
                SegmentType::Action,
                window,
            ));
            t += slice;
        }
    }

    /// Replaces the timeline with the shortest primitive stretched over the
    /// whole piece, with expressions on top.
    fn close_degraded(&mut self, music_duration: f64) -> Result<()> {
        let fallback = self
            .catalog
            .shortest()
            .or_else(|| self.catalog.iter().next())
            .ok_or_else(|| ChoreoError::EmptyCatalog {
                profile: self.catalog.profile().to_string(),
            })?;

        self.segments.clear();
        self.windows.clear();
        self.windows.push(PlanWindow {
            index: 0,
            start: 0.0,
            end: music_duration,
        });
        self.segments.push(PlannedSegment::new(
            fallback.id.clone(),
            0.0,
            music_duration,
            SegmentType::Action,
            0,
        ));
        self.infill_expressions(0.0, music_duration, fallback.intensity, 0);
        self.degradation = Some(Degradation::InsufficientCatalog);
        Ok(())
    }

    /// Shortens or drops non-motion segments that run past the music.
    fn clip(&mut self, music_duration: f64) {
        let config = self.config;
        self.segments.retain_mut(|s| {
            if s.segment_type.is_motion() || s.end_time() <= music_duration + TIME_EPSILON {
                return true;
            }
            let shortened = music_duration - s.start_time - config.infill_safety;
            if shortened >= config.min_segment {
                s.duration = shortened;
                true
            } else {
                false
            }
        });
    }

    fn finish(self, music_duration: f64) -> Plan {
        Plan::new(music_duration, self.segments, self.windows, self.degradation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BuiltinCatalog, CatalogLoader, BUILTIN_PROFILE};

    fn primitive(id: &str, category: Category, seconds: f64) -> MotionPrimitive {
        MotionPrimitive {
            id: id.into(),
            category,
            duration_seconds: seconds,
            intensity: IntensityClass::Medium,
        }
    }

    fn builtin() -> CatalogView {
        CatalogLoader::new(BuiltinCatalog)
            .load(BUILTIN_PROFILE)
            .unwrap()
    }

    fn song(duration: f64, bpm: f64) -> (Vec<f64>, Vec<f64>) {
        let interval = 60.0 / bpm;
        let beats: Vec<f64> = (0..)
            .map(|k| k as f64 * interval)
            .take_while(|t| *t < duration)
            .collect();
        let energies = (0..beats.len().saturating_sub(1))
            .map(|k| 0.2 + 0.8 * ((k as f64) * 0.7).sin().abs())
            .collect();
        (beats, energies)
    }

    #[test]
    fn closing_action_ends_with_the_music() {
        let catalog = CatalogView::new(
            "test",
            vec![
                primitive("A1", Category::Action, 3.0),
                primitive("D1", Category::Dance, 4.0),
            ],
        );
        let config = PlannerConfig::default();
        let planner = Planner::new(&catalog, config.clone());
        let plan = planner
            .plan(10.0, &[0.0, 2.0, 4.0, 6.0, 8.0], &[0.5; 4], 7)
            .unwrap();

        let closing = plan.closing().unwrap();
        assert_eq!(closing.primitive_id, "A1");
        assert_eq!(closing.segment_type, SegmentType::Action);
        assert!((closing.start_time - 7.0).abs() < 1e-9);
        assert!((closing.duration - 3.0).abs() < 1e-9);
        for segment in plan.segments() {
            if segment.segment_type != SegmentType::Expression && segment.start_time > 7.0 + 1e-9 {
                panic!("segment starts after the closing: {segment:?}");
            }
        }
        plan.validate(config.continuity_threshold, config.closing_tolerance)
            .unwrap();
        assert!(plan.degradation().is_none());
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let catalog = CatalogView::new("bare", Vec::new());
        let err = Planner::new(&catalog, PlannerConfig::default())
            .plan(10.0, &[], &[], 1)
            .unwrap_err();
        assert!(matches!(err, ChoreoError::EmptyCatalog { ref profile } if profile == "bare"));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let catalog = builtin();
        let planner = Planner::new(&catalog, PlannerConfig::default());
        for duration in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                planner.plan(duration, &[], &[], 1),
                Err(ChoreoError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn same_inputs_give_identical_plans() {
        let catalog = builtin();
        let planner = Planner::new(&catalog, PlannerConfig::default());
        let (beats, energies) = song(45.0, 112.0);

        let first = planner.plan(45.0, &beats, &energies, 99).unwrap();
        let second = planner.plan(45.0, &beats, &energies, 99).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

        let other = planner.plan(45.0, &beats, &energies, 100).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn builtin_plan_is_valid_and_lit() {
        let catalog = builtin();
        let config = PlannerConfig::default();
        let planner = Planner::new(&catalog, config.clone());
        let (beats, energies) = song(62.5, 96.0);
        let plan = planner.plan(62.5, &beats, &energies, 3).unwrap();

        plan.validate(config.continuity_threshold, config.closing_tolerance)
            .unwrap();
        for window in plan.windows() {
            let lights: Vec<_> = plan
                .window_segments(window.index)
                .filter(|s| s.segment_type == SegmentType::Light)
                .collect();
            assert_eq!(lights.len(), 1, "window {window:?}");
            assert!(lights[0].light.is_some());
        }
        for expression in plan
            .segments()
            .iter()
            .filter(|s| s.segment_type == SegmentType::Expression)
        {
            assert!(expression.duration >= config.min_segment - 1e-9);
            assert!(expression.end_time() <= 62.5 - config.infill_safety + 1e-9);
        }
    }

    #[test]
    fn lights_can_be_turned_off() {
        let catalog = builtin();
        let config = PlannerConfig {
            light_cues: false,
            ..PlannerConfig::default()
        };
        let plan = Planner::new(&catalog, config).plan(20.0, &[], &[], 5).unwrap();
        assert!(plan
            .segments()
            .iter()
            .all(|s| s.segment_type != SegmentType::Light));
    }

    #[test]
    fn missing_closing_action_degrades() {
        let catalog = CatalogView::new(
            "tiny",
            vec![
                primitive("D1", Category::Dance, 4.0),
                primitive("A_long", Category::Action, 8.0),
                primitive("E1", Category::Expression, 1.5),
            ],
        );
        let config = PlannerConfig::default();
        let plan = Planner::new(&catalog, config.clone())
            .plan(5.0, &[], &[], 11)
            .unwrap();

        assert_eq!(plan.degradation(), Some(Degradation::InsufficientCatalog));
        assert_eq!(plan.motion().count(), 1);
        let closing = plan.closing().unwrap();
        assert_eq!(closing.primitive_id, "E1");
        assert_eq!(closing.segment_type, SegmentType::Action);
        assert_eq!((closing.start_time, closing.duration), (0.0, 5.0));
        assert!(plan
            .segments()
            .iter()
            .skip(1)
            .all(|s| s.segment_type == SegmentType::Expression));
        plan.validate(config.continuity_threshold, config.closing_tolerance)
            .unwrap();

        let strict = PlannerConfig {
            strict_closing: true,
            ..config
        };
        let err = Planner::new(&catalog, strict)
            .plan(5.0, &[], &[], 11)
            .unwrap_err();
        assert!(matches!(err, ChoreoError::InsufficientCatalog { .. }));
    }

    #[test]
    fn straddling_window_is_dropped_and_gap_absorbed() {
        let catalog = CatalogView::new(
            "gappy",
            vec![
                primitive("A_close", Category::Action, 5.0),
                primitive("D1", Category::Dance, 2.0),
            ],
        );
        let config = PlannerConfig::default();
        // The closing starts at 4.6, only 0.2s after the beat at 4.4.
        let plan = Planner::new(&catalog, config.clone())
            .plan(9.6, &[0.0, 2.0, 4.4, 6.0, 8.0], &[0.3, 0.3, 0.3, 0.3], 2)
            .unwrap();
        plan.validate(config.continuity_threshold, config.closing_tolerance)
            .unwrap();

        let motion: Vec<_> = plan.motion().collect();
        for pair in motion.windows(2) {
            assert!((pair[0].end_time() - pair[1].start_time).abs() < 1e-6);
        }
        assert!(motion
            .iter()
            .all(|s| s.duration >= config.min_segment - 1e-9));
        let closing_window = plan.windows().last().unwrap();
        assert!((closing_window.start - 4.6).abs() < 1e-9);
    }

    #[test]
    fn leading_gap_is_chained_with_actions() {
        let catalog = CatalogView::new(
            "short",
            vec![
                primitive("A_close", Category::Action, 1.0),
                primitive("D1", Category::Dance, 2.0),
            ],
        );
        let plan = Planner::new(&catalog, PlannerConfig::default())
            .plan(1.3, &[], &[], 4)
            .unwrap();

        let motion: Vec<_> = plan.motion().collect();
        assert_eq!(motion.len(), 2);
        assert_eq!(motion[0].segment_type, SegmentType::Action);
        assert_eq!(motion[0].start_time, 0.0);
        assert!((motion[0].duration - 0.3).abs() < 1e-9);
        assert_eq!(motion[1].primitive_id, "A_close");
        assert!((motion[1].start_time - 0.3).abs() < 1e-9);
    }
}
