//! Filename derivation from identified labels.

use std::path::Path;

/// Default separator between labels in a derived filename.
pub const DEFAULT_SEPARATOR: &str = "_";

/// Fallback for labels that sanitize down to nothing.
const EMPTY_LABEL_FALLBACK: &str = "unnamed";

/// Characters that are invalid in filenames on Windows or Unix.
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip filesystem-hostile characters from a label.
///
/// Invalid characters become `_`, runs of `_` collapse to one, leading and
/// trailing dots and whitespace are removed, and an empty result falls back
/// to `"unnamed"`. Total and idempotent.
pub fn sanitize_label(label: &str) -> String {
    let mut cleaned = String::with_capacity(label.len());
    let mut last_was_underscore = false;

    for c in label.chars() {
        let c = if INVALID_CHARS.contains(&c) { '_' } else { c };
        if c == '_' {
            if !last_was_underscore {
                cleaned.push('_');
            }
            last_was_underscore = true;
        } else {
            cleaned.push(c);
            last_was_underscore = false;
        }
    }

    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if cleaned.is_empty() {
        EMPTY_LABEL_FALLBACK.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Derive the new filename for a photo from its identified labels.
///
/// With no labels there is nothing to rename with, so the original filename
/// comes back unchanged. Otherwise the sanitized labels are joined with
/// `separator` and the original extension is appended lower-cased. Pure;
/// no filesystem access.
pub fn derive_filename(labels: &[String], original: &Path, separator: &str) -> String {
    if labels.is_empty() {
        return original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    let name_part = labels
        .iter()
        .map(|l| sanitize_label(l))
        .collect::<Vec<_>>()
        .join(separator);

    match original.extension() {
        Some(ext) => format!("{name_part}.{}", ext.to_string_lossy().to_lowercase()),
        None => name_part,
    }
}
