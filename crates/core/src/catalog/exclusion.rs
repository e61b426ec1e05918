use std::collections::BTreeMap;

use regex::Regex;

use crate::Result;

/// Profile key whose patterns apply to every device profile.
pub const ANY_PROFILE: &str = "*";

/// A glob pattern over primitive ids. `*` matches any run of characters
/// (including none) and `?` matches exactly one.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let source = pattern.into();
        let mut expr = String::with_capacity(source.len() + 8);
        expr.push_str("^(?s:");
        let mut buf = [0u8; 4];
        for c in source.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
            }
        }
        expr.push_str(")$");
        let regex = Regex::new(&expr)?;
        Ok(Self { source, regex })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

/// Exclusion patterns keyed by device profile.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    rules: BTreeMap<String, Vec<GlobPattern>>,
}

impl ExclusionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut rules = Self::new();
        for (profile, patterns) in map {
            rules.extend(profile, patterns.iter().cloned())?;
        }
        Ok(rules)
    }

    pub fn extend<I, S>(&mut self, profile: &str, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.rules.entry(profile.to_string()).or_default();
        for pattern in patterns {
            let pattern = GlobPattern::new(pattern)?;
            if !entry.contains(&pattern) {
                entry.push(pattern);
            }
        }
        Ok(())
    }

    /// Patterns that apply to `profile`, including the catch-all ones.
    pub fn for_profile<'a>(&'a self, profile: &'a str) -> impl Iterator<Item = &'a GlobPattern> {
        let specific = (profile != ANY_PROFILE).then_some(profile);
        std::iter::once(ANY_PROFILE)
            .chain(specific)
            .filter_map(|key| self.rules.get(key))
            .flatten()
    }

    pub fn is_excluded(&self, profile: &str, id: &str) -> bool {
        self.for_profile(profile).any(|pattern| pattern.matches(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str) -> GlobPattern {
        GlobPattern::new(pattern).unwrap()
    }

    #[test]
    fn star_and_question_mark() {
        let pattern = glob("dance_00?en");
        assert!(pattern.matches("dance_001en"));
        assert!(!pattern.matches("dance_0011en"));

        let pattern = glob("*_breath");
        assert!(pattern.matches("light_red_breath"));
        assert!(!pattern.matches("light_red_normal"));

        let pattern = glob("w_*_00*");
        assert!(pattern.matches("w_stand_0001"));
        assert!(!pattern.matches("w_stand_1001"));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        let pattern = glob("016");
        assert!(pattern.matches("016"));
        assert!(!pattern.matches("0160"));
        assert!(!pattern.matches("x016"));
        assert!(glob("*").matches(""));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let pattern = glob("a.b+(c)");
        assert!(pattern.matches("a.b+(c)"));
        assert!(!pattern.matches("axbb(c)"));
        assert!(glob("[x]*").matches("[x]_1"));
    }

    #[test]
    fn duplicate_patterns_are_kept_once() {
        let mut rules = ExclusionRules::new();
        rules.extend("p", ["A*", "A*"]).unwrap();
        assert_eq!(rules.for_profile("p").count(), 1);
    }

    #[test]
    fn catch_all_profile_applies_everywhere() {
        let mut rules = ExclusionRules::new();
        rules.extend(ANY_PROFILE, ["custom_*"]).unwrap();
        rules.extend("alpha-mini-lite", ["dance_*"]).unwrap();

        assert!(rules.is_excluded("alpha-mini", "custom_0035"));
        assert!(!rules.is_excluded("alpha-mini", "dance_0001en"));
        assert!(rules.is_excluded("alpha-mini-lite", "dance_0001en"));
    }
}
