use serde::{Deserialize, Serialize};

/// Face embedding vector (typically 512-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance to another embedding.
    ///
    /// Both embeddings must have the same dimensionality; a mismatch is a
    /// data error, not a recoverable condition.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        assert_eq!(
            self.values.len(),
            other.values.len(),
            "embedding dimensionality mismatch"
        );
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Bounding box for a detected face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// One face found in a photo: embedding plus location. Never persisted.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Embedding,
    pub bounds: BoundingBox,
}

/// A registered person's name paired with one of their stored embeddings.
#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub name: String,
    pub embedding: Embedding,
}

/// Immutable snapshot of all registered (name, embedding) pairs.
///
/// A snapshot is replaced, never mutated: after a registration commits, the
/// store hands out a new `Gallery` with a strictly larger `revision`, so a
/// matcher can never observe a half-updated gallery. Entry order is the
/// registration insertion order, which makes matcher tie-breaks reproducible.
#[derive(Debug, Clone)]
pub struct Gallery {
    revision: u64,
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new(revision: u64, entries: Vec<GalleryEntry>) -> Self {
        Self { revision, entries }
    }

    /// Empty snapshot at revision zero.
    pub fn empty() -> Self {
        Self {
            revision: 0,
            entries: Vec::new(),
        }
    }

    /// Monotonic snapshot version; increases with every committed registration.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Entries in registration insertion order.
    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
