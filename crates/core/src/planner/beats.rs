use crate::config::PlannerConfig;
use crate::plan::TIME_EPSILON;

/// Cleaned beat timeline with one normalised energy per interval.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BeatGrid {
    /// Strictly increasing, first close to zero, last equal to the duration.
    pub beats: Vec<f64>,
    /// Energies scaled to `[0, 1]`, `beats.len() - 1` of them.
    pub energies: Vec<f64>,
    /// High/low split point of the normalised energies.
    pub median: f64,
}

impl BeatGrid {
    pub fn build(music_duration: f64, beats: &[f64], energies: &[f64], config: &PlannerConfig) -> Self {
        let (mut grid, mut levels) = accept_beats(music_duration, beats, energies);

        if grid.len() < config.min_beats {
            tracing::debug!(supplied = grid.len(), "too few beats, using a uniform grid");
            grid = uniform_grid(music_duration, config.fallback_beat_interval);
            levels = None;
        }

        if grid.first().map_or(true, |first| *first > config.continuity_threshold) {
            grid.insert(0, 0.0);
            if let Some(levels) = levels.as_mut() {
                let head = levels.first().copied().unwrap_or(1.0);
                levels.insert(0, head);
            }
        }
        if grid.last().map_or(true, |last| *last < music_duration - TIME_EPSILON) {
            grid.push(music_duration);
        } else if let Some(last) = grid.last_mut() {
            *last = music_duration;
        }

        let intervals = grid.len().saturating_sub(1);
        let raw = match levels {
            Some(mut levels) if !levels.is_empty() => {
                let tail = levels[levels.len() - 1];
                levels.resize(intervals, tail);
                levels
            }
            _ => vec![1.0; intervals],
        };
        let energies = normalise(&raw);
        let median = median(&energies).unwrap_or(0.5);

        Self {
            beats: grid,
            energies,
            median,
        }
    }

    pub fn last_index(&self) -> usize {
        self.beats.len() - 1
    }

    /// Average energy of the interval at `index` and the one after it.
    pub fn window_energy(&self, index: usize) -> f64 {
        let end = (index + 2).min(self.energies.len());
        let slice = &self.energies[index.min(end)..end];
        if slice.is_empty() {
            0.5
        } else {
            slice.iter().sum::<f64>() / slice.len() as f64
        }
    }
}

/// Keeps in-range, strictly increasing beats. When energies cover every
/// supplied interval, intervals merged by dropped beats get the mean of the
/// energies they absorbed; otherwise no energies are returned.
fn accept_beats(music_duration: f64, beats: &[f64], energies: &[f64]) -> (Vec<f64>, Option<Vec<f64>>) {
    let energies_usable = !beats.is_empty() && energies.len() >= beats.len() - 1;

    let mut accepted: Vec<f64> = Vec::with_capacity(beats.len() + 1);
    let mut accepted_index: Vec<usize> = Vec::with_capacity(beats.len() + 1);
    for (index, beat) in beats.iter().copied().enumerate() {
        let in_range = beat.is_finite() && beat >= 0.0 && beat < music_duration - TIME_EPSILON;
        let increasing = accepted.last().map_or(true, |last| beat > last + TIME_EPSILON);
        if in_range && increasing {
            accepted.push(beat);
            accepted_index.push(index);
        }
    }

    if !energies_usable || accepted.is_empty() {
        return (accepted, None);
    }

    let mut levels: Vec<f64> = accepted_index
        .windows(2)
        .map(|pair| mean(&energies[pair[0]..pair[1]]))
        .collect();
    // The interval from the last accepted beat onward, if the input had one.
    if let Some(last) = accepted_index.last() {
        if *last < energies.len() && *last + 1 < beats.len() {
            levels.push(mean(&energies[*last..(beats.len() - 1)]));
        }
    }
    let levels = levels.into_iter().map(|e| if e.is_finite() { e.max(0.0) } else { 0.0 }).collect();
    (accepted, Some(levels))
}

fn uniform_grid(music_duration: f64, interval: f64) -> Vec<f64> {
    let steps = (music_duration / interval).floor() as usize;
    (0..=steps)
        .map(|k| k as f64 * interval)
        .filter(|t| *t < music_duration - TIME_EPSILON)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn normalise(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max > 0.0 {
        values.iter().map(|v| v / max).collect()
    } else {
        values.to_vec()
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(duration: f64, beats: &[f64], energies: &[f64]) -> BeatGrid {
        BeatGrid::build(duration, beats, energies, &PlannerConfig::default())
    }

    #[test]
    fn synthesises_grid_for_sparse_beats() {
        let grid = build(7.0, &[0.0, 1.0], &[]);
        assert_eq!(grid.beats, vec![0.0, 2.0, 4.0, 6.0, 7.0]);
        assert_eq!(grid.energies, vec![1.0; 4]);
        assert_eq!(grid.median, 1.0);
    }

    #[test]
    fn appends_music_end_and_extends_energies() {
        let grid = build(10.0, &[0.0, 2.0, 4.0, 6.0, 8.0], &[1.0, 2.0, 4.0, 2.0]);
        assert_eq!(grid.beats, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(grid.energies, vec![0.25, 0.5, 1.0, 0.5, 0.5]);
        assert_eq!(grid.median, 0.5);
    }

    #[test]
    fn short_energy_list_means_flat_energy() {
        let grid = build(10.0, &[0.0, 2.0, 4.0, 6.0, 8.0], &[0.5, 0.5]);
        assert!(grid.energies.iter().all(|e| *e == 1.0));
    }

    #[test]
    fn prepends_zero_and_drops_bad_beats() {
        let grid = build(
            6.0,
            &[1.0, 2.0, 2.0, f64::NAN, 3.0, 4.0, 9.0],
            &[1.0, 3.0, 1.0, 1.0, 2.0, 2.0],
        );
        assert_eq!(grid.beats, vec![0.0, 1.0, 2.0, 3.0, 4.0, 6.0]);
        assert_eq!(grid.energies.len(), 5);
        // Interval [2, 3] absorbed the duplicate and the NaN beat.
        assert!((grid.energies[2] - (5.0 / 3.0) / 2.0).abs() < 1e-9);
        assert_eq!(grid.energies[4], 1.0);
    }

    #[test]
    fn window_energy_averages_two_intervals() {
        let grid = build(6.0, &[0.0, 2.0, 4.0, 5.0], &[0.2, 1.0, 0.6]);
        assert!((grid.window_energy(0) - 0.6).abs() < 1e-9);
        let last = grid.energies.len() - 1;
        assert_eq!(grid.window_energy(last), grid.energies[last]);
    }
}
