//! Motion primitive catalog.
//!
//! A catalog is loaded once per device profile from a [`CatalogSource`],
//! filtered through the profile's exclusion patterns and frozen into an
//! immutable [`CatalogView`] that the planner consumes.

mod builtin;
mod exclusion;
mod source;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use builtin::{BuiltinCatalog, BUILTIN_PROFILE};
pub use exclusion::{ExclusionRules, GlobPattern, ANY_PROFILE};
pub use source::{CatalogRecord, CatalogSource, PrimitiveSpec, StaticCatalog, TomlCatalog};

use crate::config::CatalogConfig;
use crate::{ChoreoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Dance,
    Action,
    Expression,
    Light,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Dance,
        Category::Action,
        Category::Expression,
        Category::Light,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Dance => "dance",
            Category::Action => "action",
            Category::Expression => "expression",
            Category::Light => "light",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse physical energy bucket of a primitive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IntensityClass {
    #[serde(alias = "low")]
    Weak = 1,
    #[default]
    Medium = 2,
    #[serde(alias = "high")]
    Strong = 3,
}

impl IntensityClass {
    pub const ALL: [IntensityClass; 3] = [
        IntensityClass::Weak,
        IntensityClass::Medium,
        IntensityClass::Strong,
    ];

    /// Buckets a normalised energy value: below `weak` is weak, below
    /// `medium` is medium, anything else is strong.
    pub fn from_energy(energy: f64, weak: f64, medium: f64) -> Self {
        if energy < weak {
            IntensityClass::Weak
        } else if energy < medium {
            IntensityClass::Medium
        } else {
            IntensityClass::Strong
        }
    }

    /// Adjacent classes, nearest first.
    pub fn neighbors(self) -> &'static [IntensityClass] {
        match self {
            IntensityClass::Weak => &[IntensityClass::Medium],
            IntensityClass::Medium => &[IntensityClass::Weak, IntensityClass::Strong],
            IntensityClass::Strong => &[IntensityClass::Medium],
        }
    }

    pub fn level(self) -> u8 {
        self as u8
    }
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPrimitive {
    pub id: String,
    pub category: Category,
    pub duration_seconds: f64,
    pub intensity: IntensityClass,
}

/// Filtered, read-only view over one profile's primitives. Iteration order
/// is by category, then id, so planning over it is reproducible.
#[derive(Debug, Clone, Default)]
pub struct CatalogView {
    profile: String,
    entries: Vec<MotionPrimitive>,
    index: BTreeMap<String, usize>,
}

impl CatalogView {
    /// Builds a view from already-converted primitives. Duplicate ids keep
    /// the first occurrence in category order.
    pub fn new(profile: impl Into<String>, primitives: impl IntoIterator<Item = MotionPrimitive>) -> Self {
        let mut entries: Vec<MotionPrimitive> = primitives.into_iter().collect();
        entries.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.id.cmp(&b.id)));

        let mut index = BTreeMap::new();
        let mut kept = Vec::with_capacity(entries.len());
        for primitive in entries {
            if index.contains_key(&primitive.id) {
                tracing::warn!(id = %primitive.id, category = %primitive.category, "duplicate primitive id ignored");
                continue;
            }
            index.insert(primitive.id.clone(), kept.len());
            kept.push(primitive);
        }

        Self {
            profile: profile.into(),
            entries: kept,
            index,
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MotionPrimitive> {
        self.entries.iter()
    }

    pub fn get(&self, id: &str) -> Result<&MotionPrimitive> {
        self.index
            .get(id)
            .map(|i| &self.entries[*i])
            .ok_or_else(|| ChoreoError::NotFound(format!("primitive `{id}`")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn by_category(&self, category: Category) -> Vec<&MotionPrimitive> {
        self.entries
            .iter()
            .filter(|p| p.category == category)
            .collect()
    }

    pub fn by_intensity(&self, intensity: IntensityClass) -> Vec<&MotionPrimitive> {
        self.entries
            .iter()
            .filter(|p| p.intensity == intensity)
            .collect()
    }

    pub fn pool(&self, category: Category, intensity: IntensityClass) -> Vec<&MotionPrimitive> {
        self.entries
            .iter()
            .filter(|p| p.category == category && p.intensity == intensity)
            .collect()
    }

    /// Longest primitive of `category` no longer than `max_seconds`. Ties go
    /// to the smaller id.
    pub fn longest_fitting(&self, category: Category, max_seconds: f64) -> Option<&MotionPrimitive> {
        self.entries
            .iter()
            .filter(|p| p.category == category && p.duration_seconds <= max_seconds)
            .fold(None, |best: Option<&MotionPrimitive>, p| match best {
                Some(b) if b.duration_seconds >= p.duration_seconds => Some(b),
                _ => Some(p),
            })
    }

    /// Shortest primitive that can hold a segment on its own (anything but
    /// a light), preferring actions on equal length.
    pub fn shortest(&self) -> Option<&MotionPrimitive> {
        self.entries
            .iter()
            .filter(|p| p.category != Category::Light)
            .fold(None, |best: Option<&MotionPrimitive>, p| match best {
                Some(b)
                    if b.duration_seconds < p.duration_seconds
                        || (b.duration_seconds == p.duration_seconds
                            && (b.category == Category::Action
                                || p.category != Category::Action)) =>
                {
                    Some(b)
                }
                _ => Some(p),
            })
    }

    pub fn count(&self, category: Category) -> usize {
        self.entries.iter().filter(|p| p.category == category).count()
    }
}

/// Loads catalog views for device profiles, applying exclusion rules.
pub struct CatalogLoader<S> {
    source: S,
    rules: ExclusionRules,
    default_duration_ms: u32,
}

impl<S: CatalogSource> CatalogLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            rules: ExclusionRules::new(),
            default_duration_ms: CatalogConfig::default().default_expression_ms,
        }
    }

    /// Fails when one of the configured exclusion globs cannot be compiled.
    pub fn with_config(source: S, config: &CatalogConfig) -> Result<Self> {
        Ok(Self {
            source,
            rules: ExclusionRules::from_map(&config.exclusions)?,
            default_duration_ms: config.default_expression_ms,
        })
    }

    pub fn rules_mut(&mut self) -> &mut ExclusionRules {
        &mut self.rules
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn load(&self, profile: &str) -> Result<CatalogView> {
        let record = self.source.load_catalog(profile)?;

        let mut rules = self.rules.clone();
        rules.extend(profile, self.source.exclusions(profile))?;

        let mut primitives = Vec::with_capacity(record.len());
        let mut excluded = 0usize;
        for category in Category::ALL {
            for (id, spec) in record.category(category) {
                if rules.is_excluded(profile, id) {
                    excluded += 1;
                    continue;
                }
                let duration_ms = spec.duration_ms.unwrap_or(self.default_duration_ms);
                if duration_ms == 0 {
                    tracing::warn!(%id, %category, "skipping primitive without a duration");
                    continue;
                }
                primitives.push(MotionPrimitive {
                    id: id.clone(),
                    category,
                    duration_seconds: f64::from(duration_ms) / 1000.0,
                    intensity: spec.intensity,
                });
            }
        }

        let view = CatalogView::new(profile, primitives);
        if view.is_empty() {
            return Err(ChoreoError::EmptyCatalog {
                profile: profile.to_string(),
            });
        }

        tracing::info!(
            profile,
            dances = view.count(Category::Dance),
            actions = view.count(Category::Action),
            expressions = view.count(Category::Expression),
            lights = view.count(Category::Light),
            excluded,
            "loaded catalog"
        );
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(id: &str, category: Category, seconds: f64, intensity: IntensityClass) -> MotionPrimitive {
        MotionPrimitive {
            id: id.to_string(),
            category,
            duration_seconds: seconds,
            intensity,
        }
    }

    fn record() -> CatalogRecord {
        let mut record = CatalogRecord::default();
        record
            .insert(Category::Action, "A1", PrimitiveSpec::new(3000, IntensityClass::Weak))
            .insert(Category::Action, "A2", PrimitiveSpec::new(1500, IntensityClass::Strong))
            .insert(Category::Dance, "D1", PrimitiveSpec::new(4000, IntensityClass::Medium))
            .insert(Category::Expression, "E1", PrimitiveSpec {
                duration_ms: None,
                intensity: IntensityClass::Weak,
            });
        record
    }

    #[test]
    fn loads_and_converts_durations() {
        let loader = CatalogLoader::new(StaticCatalog::new().with_profile("p", record()));
        let view = loader.load("p").unwrap();

        assert_eq!(view.len(), 4);
        assert_eq!(view.get("A1").unwrap().duration_seconds, 3.0);
        assert_eq!(view.get("E1").unwrap().duration_seconds, 2.0);
        assert_eq!(view.by_category(Category::Action).len(), 2);
        assert_eq!(view.by_intensity(IntensityClass::Weak).len(), 2);
        assert!(matches!(view.get("nope"), Err(ChoreoError::NotFound(_))));
    }

    #[test]
    fn exclusions_remove_ids_from_every_view() {
        let source = StaticCatalog::new()
            .with_profile("p", record())
            .with_exclusions("p", ["A*"]);
        let mut loader = CatalogLoader::new(source);
        loader.rules_mut().extend(ANY_PROFILE, ["E?"]).unwrap();

        let view = loader.load("p").unwrap();
        assert_eq!(view.len(), 1);
        assert!(!view.contains("A1"));
        assert!(view.by_intensity(IntensityClass::Weak).is_empty());
        assert!(view.get("E1").is_err());
    }

    #[test]
    fn configured_exclusions_apply_per_profile() {
        let mut config = CatalogConfig::default();
        config.exclusions.insert("p".into(), vec!["D?".into()]);
        config.exclusions.insert(ANY_PROFILE.into(), vec!["A2".into()]);
        let source = StaticCatalog::new().with_profile("p", record());

        let view = CatalogLoader::with_config(source, &config).unwrap().load("p").unwrap();
        assert_eq!(view.count(Category::Dance), 0);
        assert!(view.contains("A1"));
        assert!(!view.contains("A2"));
    }

    #[test]
    fn fully_excluded_catalog_is_empty_error() {
        let source = StaticCatalog::new()
            .with_profile("p", record())
            .with_exclusions("p", ["*"]);
        let err = CatalogLoader::new(source).load("p").unwrap_err();
        assert!(matches!(err, ChoreoError::EmptyCatalog { ref profile } if profile == "p"));
    }

    #[test]
    fn longest_fitting_and_shortest() {
        let view = CatalogView::new(
            "p",
            vec![
                primitive("A1", Category::Action, 3.0, IntensityClass::Weak),
                primitive("A2", Category::Action, 5.0, IntensityClass::Medium),
                primitive("E1", Category::Expression, 1.0, IntensityClass::Weak),
                primitive("A3", Category::Action, 1.0, IntensityClass::Weak),
            ],
        );

        assert_eq!(view.longest_fitting(Category::Action, 4.0).unwrap().id, "A1");
        assert_eq!(view.longest_fitting(Category::Action, 10.0).unwrap().id, "A2");
        assert!(view.longest_fitting(Category::Action, 0.5).is_none());
        assert_eq!(view.shortest().unwrap().id, "A3");
    }

    #[test]
    fn energy_maps_to_intensity() {
        assert_eq!(IntensityClass::from_energy(0.1, 0.4, 0.7), IntensityClass::Weak);
        assert_eq!(IntensityClass::from_energy(0.4, 0.4, 0.7), IntensityClass::Medium);
        assert_eq!(IntensityClass::from_energy(0.7, 0.4, 0.7), IntensityClass::Strong);
    }
}
