use std::collections::{BTreeMap, VecDeque};

use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::catalog::{CatalogView, Category, IntensityClass, MotionPrimitive};

/// Random pick from intensity pools that avoids the most recently used ids
/// of each category.
pub(crate) struct PrimitiveSelector<'a> {
    catalog: &'a CatalogView,
    memory: usize,
    recent: BTreeMap<Category, VecDeque<&'a str>>,
}

impl<'a> PrimitiveSelector<'a> {
    pub fn new(catalog: &'a CatalogView, memory: usize) -> Self {
        Self {
            catalog,
            memory,
            recent: BTreeMap::new(),
        }
    }

    /// Widens the pool from the exact class, to its neighbours, to the whole
    /// category. `None` only when the category is empty.
    pub fn pick(
        &mut self,
        rng: &mut ChaCha8Rng,
        category: Category,
        intensity: IntensityClass,
    ) -> Option<&'a MotionPrimitive> {
        let catalog = self.catalog;
        let mut pool = catalog.pool(category, intensity);
        if pool.is_empty() {
            pool = intensity
                .neighbors()
                .iter()
                .flat_map(|near| catalog.pool(category, *near))
                .collect();
        }
        if pool.is_empty() {
            pool = catalog.by_category(category);
        }
        if pool.is_empty() {
            return None;
        }

        let recent = self.recent.entry(category).or_default();
        let fresh: Vec<&MotionPrimitive> = pool
            .iter()
            .copied()
            .filter(|p| !recent.contains(&p.id.as_str()))
            .collect();
        let candidates = if fresh.is_empty() { pool } else { fresh };
        let chosen = candidates[rng.gen_range(0..candidates.len())];

        if self.memory > 0 {
            recent.push_back(chosen.id.as_str());
            while recent.len() > self.memory {
                recent.pop_front();
            }
        }
        Some(chosen)
    }
}
