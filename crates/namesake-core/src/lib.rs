//! Face matching and rename decision logic.
//!
//! Classifies detected faces against a gallery of registered people by
//! nearest-neighbor distance, derives collision-free filenames from the
//! identified labels, and fans batches of photos through that pipeline.
//!
//! Face detection and embedding extraction live behind the [`FaceDetector`]
//! boundary; persistence lives in `namesake-store`.

pub mod batch;
pub mod classify;
pub mod conflict;
pub mod detect;
pub mod matcher;
pub mod naming;
pub mod types;

pub use batch::{
    find_image_files, run_batch, BatchError, BatchOptions, BatchReport, BatchSummary,
    RenameOutcome, RenameStatus,
};
pub use detect::{DetectError, FaceDetector};
pub use matcher::NearestMatcher;
pub use types::{BoundingBox, DetectedFace, Embedding, Gallery, GalleryEntry};
