use super::{CatalogRecord, CatalogSource, Category, IntensityClass, PrimitiveSpec};
use super::IntensityClass::{Medium as M, Strong as S, Weak as W};
use crate::{ChoreoError, Result};

/// Profile id served by [`BuiltinCatalog`].
pub const BUILTIN_PROFILE: &str = "alpha-mini";

const DANCES: &[(&str, u32, IntensityClass)] = &[
    ("dance_0001en", 15_000, S),
    ("dance_0002en", 12_000, S),
    ("dance_0003en", 18_000, S),
    ("dance_0004en", 10_000, M),
    ("dance_0005en", 8_000, M),
    ("dance_0006en", 12_000, M),
    ("dance_0007en", 10_000, M),
    ("dance_0008en", 14_000, S),
    ("dance_0009en", 8_000, M),
    ("dance_0011en", 16_000, S),
    ("dance_0013", 12_000, M),
    ("custom_0035", 8_000, M),
    ("action_015", 3_000, M),
];

const ACTIONS: &[(&str, u32, IntensityClass)] = &[
    ("w_stand_0001", 2_000, W),
    ("w_stand_0002", 1_500, W),
    ("w_stand_0003", 3_000, M),
    ("w_stand_0008", 1_000, W),
    ("w_stand_0009", 2_500, M),
    ("w_stand_0010", 2_000, S),
    ("009", 2_000, W),
    ("010", 3_000, M),
    ("011", 1_000, W),
    ("015", 2_000, M),
    ("016", 5_000, M),
    ("017", 2_000, M),
    ("018", 3_000, M),
    ("019", 3_000, M),
    ("021", 2_000, M),
    ("027", 3_000, W),
    ("028", 2_000, M),
    ("031", 2_000, M),
    ("037", 1_000, W),
    ("038", 1_000, W),
    ("007", 4_000, M),
    ("random_short2", 2_000, M),
    ("random_short3", 1_500, W),
    ("random_short4", 1_500, W),
    ("Surveillance_001", 2_000, M),
    ("Surveillance_003", 3_000, M),
    ("Surveillance_004", 2_000, M),
    ("Surveillance_006", 3_000, M),
    ("action_004", 1_500, S),
    ("action_005", 1_500, M),
    ("action_006", 1_000, W),
    ("action_007", 2_000, S),
    ("action_011", 4_000, S),
    ("action_012", 2_500, M),
    ("action_013", 2_000, M),
    ("action_014", 2_000, M),
    ("action_016", 2_000, M),
    ("action_018", 2_000, S),
    ("action_019", 2_000, M),
    ("action_020", 2_000, M),
];

const EXPRESSIONS: &[(&str, u32, IntensityClass)] = &[
    ("codemao1", 2_000, W),
    ("codemao4", 2_500, M),
    ("codemao7", 2_000, M),
    ("codemao8", 1_500, S),
    ("codemao9", 1_500, W),
    ("codemao10", 2_000, S),
    ("codemao11", 2_000, S),
    ("codemao13", 2_000, M),
    ("codemao16", 2_000, M),
    ("codemao19", 2_500, S),
    ("codemao20", 1_000, W),
    ("w_basic_0003-1", 1_500, W),
    ("w_basic_0005-1", 1_500, W),
    ("w_basic_0011-1", 2_500, M),
    ("emo_007", 2_000, M),
    ("emo_010", 2_000, M),
    ("emo_015", 2_000, S),
    ("emo_019", 3_000, W),
    ("emo_027", 2_000, M),
    ("emo_029", 2_000, M),
];

const LIGHTS: &[(&str, u32, IntensityClass)] = &[
    ("light_blue_breath", 3_000, W),
    ("light_green_breath", 3_000, W),
    ("light_green_normal", 3_000, M),
    ("light_blue_normal", 3_000, M),
    ("light_red_normal", 3_000, S),
    ("light_red_breath", 3_000, S),
];

/// Stock primitives of the Alpha Mini humanoid, compiled in so the CLI and
/// tests work without an external catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl BuiltinCatalog {
    pub fn record() -> CatalogRecord {
        let mut record = CatalogRecord::default();
        for (category, table) in [
            (Category::Dance, DANCES),
            (Category::Action, ACTIONS),
            (Category::Expression, EXPRESSIONS),
            (Category::Light, LIGHTS),
        ] {
            for (id, ms, intensity) in table {
                record.insert(category, *id, PrimitiveSpec::new(*ms, *intensity));
            }
        }
        record
    }
}

impl CatalogSource for BuiltinCatalog {
    fn load_catalog(&self, profile: &str) -> Result<CatalogRecord> {
        if profile == BUILTIN_PROFILE {
            Ok(Self::record())
        } else {
            Err(ChoreoError::UnknownProfile(profile.to_string()))
        }
    }

    fn profiles(&self) -> Vec<String> {
        vec![BUILTIN_PROFILE.to_string()]
    }
}
