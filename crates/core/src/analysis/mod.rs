//! Audio features consumed by the planner.
//!
//! Beat and onset detection happen upstream; this module only carries their
//! output and derives a stable planning seed from the audio content.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{ChoreoError, Result};

/// Number of leading audio bytes hashed into the seed.
const SEED_PREFIX_BYTES: usize = 100_000;

/// Beat timestamps plus one energy magnitude per inter-beat interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatAnalysis {
    #[serde(default)]
    pub beats: Vec<f64>,
    #[serde(default)]
    pub energies: Vec<f64>,
}

impl BeatAnalysis {
    pub fn new(beats: Vec<f64>, energies: Vec<f64>) -> Self {
        Self { beats, energies }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let analysis: Self = serde_json::from_str(text)?;
        if analysis.beats.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(ChoreoError::invalid("beat timestamps must be in order"));
        }
        Ok(analysis)
    }

    /// Mean spacing between consecutive beats, if there are at least two.
    pub fn mean_interval(&self) -> Option<f64> {
        if self.beats.len() < 2 {
            return None;
        }
        let span = self.beats[self.beats.len() - 1] - self.beats[0];
        Some(span / (self.beats.len() - 1) as f64)
    }

    pub fn tempo_bpm(&self) -> Option<f64> {
        self.mean_interval()
            .filter(|interval| *interval > f64::EPSILON)
            .map(|interval| 60.0 / interval)
    }
}

/// Deterministic planning seed from the start of an audio file: SHA-256 over
/// the first 100 kB, first eight digest bytes read big-endian.
pub fn seed_from_audio(bytes: &[u8]) -> u64 {
    let prefix = &bytes[..bytes.len().min(SEED_PREFIX_BYTES)];
    let digest = Sha256::digest(prefix);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}
