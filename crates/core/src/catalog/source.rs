use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Category, IntensityClass};
use crate::{ChoreoError, Result};

/// Raw catalog entry as delivered by a source, before unit conversion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveSpec {
    /// Missing durations fall back to the configured default.
    #[serde(default)]
    pub duration_ms: Option<u32>,
    #[serde(default)]
    pub intensity: IntensityClass,
}

impl PrimitiveSpec {
    pub fn new(duration_ms: u32, intensity: IntensityClass) -> Self {
        Self {
            duration_ms: Some(duration_ms),
            intensity,
        }
    }
}

/// Catalog contents for one device profile, one map per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogRecord {
    pub dance: BTreeMap<String, PrimitiveSpec>,
    pub action: BTreeMap<String, PrimitiveSpec>,
    pub expression: BTreeMap<String, PrimitiveSpec>,
    pub light: BTreeMap<String, PrimitiveSpec>,
}

impl CatalogRecord {
    pub fn category(&self, category: Category) -> &BTreeMap<String, PrimitiveSpec> {
        match category {
            Category::Dance => &self.dance,
            Category::Action => &self.action,
            Category::Expression => &self.expression,
            Category::Light => &self.light,
        }
    }

    pub fn category_mut(&mut self, category: Category) -> &mut BTreeMap<String, PrimitiveSpec> {
        match category {
            Category::Dance => &mut self.dance,
            Category::Action => &mut self.action,
            Category::Expression => &mut self.expression,
            Category::Light => &mut self.light,
        }
    }

    pub fn insert(
        &mut self,
        category: Category,
        id: impl Into<String>,
        spec: PrimitiveSpec,
    ) -> &mut Self {
        self.category_mut(category).insert(id.into(), spec);
        self
    }

    pub fn len(&self) -> usize {
        Category::ALL
            .iter()
            .map(|category| self.category(*category).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where catalog records come from. Database-backed sources live outside
/// this crate and plug in through this trait.
pub trait CatalogSource: Send + Sync {
    fn load_catalog(&self, profile: &str) -> Result<CatalogRecord>;

    /// Exclusion patterns the source itself ships for `profile`.
    fn exclusions(&self, _profile: &str) -> Vec<String> {
        Vec::new()
    }

    fn profiles(&self) -> Vec<String>;
}

/// In-memory source, mostly for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    profiles: HashMap<String, CatalogRecord>,
    exclusions: HashMap<String, Vec<String>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: impl Into<String>, record: CatalogRecord) -> Self {
        self.profiles.insert(profile.into(), record);
        self
    }

    pub fn with_exclusions<I, S>(mut self, profile: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions
            .entry(profile.into())
            .or_default()
            .extend(patterns.into_iter().map(Into::into));
        self
    }
}

impl CatalogSource for StaticCatalog {
    fn load_catalog(&self, profile: &str) -> Result<CatalogRecord> {
        self.profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| ChoreoError::UnknownProfile(profile.to_string()))
    }

    fn exclusions(&self, profile: &str) -> Vec<String> {
        self.exclusions.get(profile).cloned().unwrap_or_default()
    }

    fn profiles(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TomlProfile {
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(flatten)]
    record: CatalogRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TomlCatalogFile {
    #[serde(default)]
    profiles: BTreeMap<String, TomlProfile>,
}

/// Catalog profiles read from a TOML document of the form
///
/// ```toml
/// [profiles.alpha-mini]
/// exclude = ["custom_*"]
///
/// [profiles.alpha-mini.action]
/// "016" = { duration_ms = 5000, intensity = "medium" }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TomlCatalog {
    file: TomlCatalogFile,
}

impl TomlCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: TomlCatalogFile = toml::from_str(text)?;
        Ok(Self { file })
    }
}

impl CatalogSource for TomlCatalog {
    fn load_catalog(&self, profile: &str) -> Result<CatalogRecord> {
        self.file
            .profiles
            .get(profile)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| ChoreoError::UnknownProfile(profile.to_string()))
    }

    fn exclusions(&self, profile: &str) -> Vec<String> {
        self.file
            .profiles
            .get(profile)
            .map(|entry| entry.exclude.clone())
            .unwrap_or_default()
    }

    fn profiles(&self) -> Vec<String> {
        self.file.profiles.keys().cloned().collect()
    }
}
