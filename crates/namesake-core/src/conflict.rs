//! Collision-free target path resolution.
//!
//! The existence probe and the later rename are separate filesystem calls,
//! not a transaction. Callers that rename concurrently into one directory
//! must serialize the probe+rename step per directory (the batch
//! orchestrator does).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default suffix format for numbered duplicates: `photo(1).jpg`.
pub const DEFAULT_DUPLICATE_FORMAT: &str = "({n})";

/// Probe bound before giving up on numbered suffixes.
const MAX_PROBES: u32 = 9999;

/// Find a path that does not exist, starting from `candidate`.
///
/// Returns `candidate` unchanged when it does not exist. Otherwise probes
/// `stem(n)ext` for n = 1, 2, 3, … and returns the first free path. After
/// [`MAX_PROBES`] failed probes the current Unix timestamp is appended
/// instead, so the function always terminates with a path believed free at
/// return time.
pub fn resolve_conflict(candidate: &Path) -> PathBuf {
    resolve_conflict_with(candidate, DEFAULT_DUPLICATE_FORMAT)
}

/// [`resolve_conflict`] with a custom suffix format; `{n}` is replaced by
/// the probe counter.
pub fn resolve_conflict_with(candidate: &Path, duplicate_format: &str) -> PathBuf {
    if !candidate.exists() {
        return candidate.to_path_buf();
    }

    let parent = candidate.parent().unwrap_or_else(|| Path::new(""));
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    for n in 1..=MAX_PROBES {
        let suffix = duplicate_format.replace("{n}", &n.to_string());
        let probe = parent.join(format!("{stem}{suffix}{ext}"));
        if !probe.exists() {
            return probe;
        }
    }

    // Termination guarantee: fall back to a timestamp suffix.
    tracing::warn!(
        candidate = %candidate.display(),
        probes = MAX_PROBES,
        "numbered suffixes exhausted; falling back to timestamp"
    );
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    parent.join(format!("{stem}_{timestamp}{ext}"))
}
