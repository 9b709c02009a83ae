//! Per-photo classification: detected faces to an ordered label list.

use crate::matcher::NearestMatcher;
use crate::types::{DetectedFace, Gallery};

/// Default cap on identified names per photo. Filenames concatenate the
/// labels, so an unbounded list would produce unusable names.
pub const DEFAULT_MAX_LABELS: usize = 3;

/// Run the matcher over every detected face and produce the label list used
/// for renaming.
///
/// Unmatched faces are dropped, duplicate names are collapsed to their first
/// occurrence (a person detected twice appears once), and the result is
/// truncated to `max_labels`. An empty result means "no rename".
pub fn classify(
    faces: &[DetectedFace],
    gallery: &Gallery,
    matcher: &NearestMatcher,
    max_labels: usize,
) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();

    for face in faces {
        let Some(name) = matcher.identify(&face.embedding, gallery) else {
            continue;
        };
        if labels.len() == max_labels {
            break;
        }
        if !labels.iter().any(|l| l == name) {
            labels.push(name.to_string());
        }
    }

    labels.truncate(max_labels);
    labels
}
