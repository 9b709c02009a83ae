//! Nearest-neighbor face matcher.
//!
//! Compares a probe embedding against every gallery entry by Euclidean
//! distance and accepts the closest one when it falls within the tolerance.

use crate::types::{Embedding, Gallery};

/// Default maximum acceptable distance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Euclidean nearest-neighbor matcher with a distance tolerance.
#[derive(Debug, Clone, Copy)]
pub struct NearestMatcher {
    tolerance: f32,
}

impl Default for NearestMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl NearestMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    /// Identify the person whose stored embedding is nearest to `probe`.
    ///
    /// Returns `None` when the gallery is empty or the nearest entry is
    /// farther than the tolerance. When several entries are at exactly the
    /// minimum distance, the first one in gallery order wins; gallery order
    /// is registration insertion order, so this tie-break is deterministic.
    ///
    /// Panics if `probe` and the gallery disagree on dimensionality; that is
    /// a data error, not a recoverable condition.
    pub fn identify<'g>(&self, probe: &Embedding, gallery: &'g Gallery) -> Option<&'g str> {
        if gallery.is_empty() {
            // Distinct condition, not an error: nothing is registered yet.
            tracing::debug!("gallery is empty; no match possible");
            return None;
        }

        let mut best_distance = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.entries().iter().enumerate() {
            let distance = probe.euclidean_distance(&entry.embedding);
            // Strict `<` keeps the first entry on exact-distance ties.
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance <= self.tolerance => {
                let name = gallery.entries()[idx].name.as_str();
                tracing::debug!(name, distance = best_distance, "face matched");
                Some(name)
            }
            _ => {
                tracing::debug!(
                    min_distance = best_distance,
                    tolerance = self.tolerance,
                    "nearest gallery entry outside tolerance"
                );
                None
            }
        }
    }
}
