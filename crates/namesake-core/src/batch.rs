//! Batch rename orchestration.
//!
//! Fans a file list out to the detect, classify, derive, resolve, rename
//! pipeline on a bounded worker pool. Per-file failures are captured into
//! [`RenameOutcome`]s and never abort the batch; only setup-level errors
//! propagate to the caller.

use crate::classify::{classify, DEFAULT_MAX_LABELS};
use crate::conflict::{resolve_conflict_with, DEFAULT_DUPLICATE_FORMAT};
use crate::detect::{DetectError, FaceDetector};
use crate::matcher::NearestMatcher;
use crate::naming::{derive_filename, DEFAULT_SEPARATOR};
use crate::types::Gallery;
use rayon::prelude::*;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use walkdir::WalkDir;

/// Extensions the pipeline accepts (lower-case, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "webp", "jfif", "bmp", "tiff", "tif"];

/// Default worker pool width.
pub const DEFAULT_WORKERS: usize = 4;

/// Default per-file size cap: 50 MB.
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Knobs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Compute outcomes without touching the filesystem.
    pub dry_run: bool,
    pub workers: usize,
    pub max_labels: usize,
    pub separator: String,
    pub duplicate_format: String,
    pub max_image_bytes: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            workers: DEFAULT_WORKERS,
            max_labels: DEFAULT_MAX_LABELS,
            separator: DEFAULT_SEPARATOR.to_string(),
            duplicate_format: DEFAULT_DUPLICATE_FORMAT.to_string(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenameStatus {
    /// Rename performed, or would be performed in a dry run.
    Renamed,
    /// No faces detected or none matched. Not an error.
    NoMatch,
    Failed(String),
}

impl RenameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenameStatus::Renamed => "renamed",
            RenameStatus::NoMatch => "no-match",
            RenameStatus::Failed(_) => "failed",
        }
    }
}

/// Per-file result of one trip through the pipeline.
#[derive(Debug, Clone)]
pub struct RenameOutcome {
    pub original_path: PathBuf,
    pub labels: Vec<String>,
    /// Resolved target path. `None` when nothing was renamed.
    pub new_path: Option<PathBuf>,
    pub status: RenameStatus,
    pub elapsed: Duration,
}

impl RenameOutcome {
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            RenameStatus::Failed(message) => Some(message),
            _ => None,
        }
    }
}

/// Aggregate counters, derived purely from the outcome list.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub no_match: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub avg_time_per_file: Duration,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[RenameOutcome], total_time: Duration) -> Self {
        let mut successful = 0;
        let mut no_match = 0;
        let mut failed = 0;
        for outcome in outcomes {
            match outcome.status {
                RenameStatus::Renamed => successful += 1,
                RenameStatus::NoMatch => no_match += 1,
                RenameStatus::Failed(_) => failed += 1,
            }
        }
        let total = outcomes.len();
        Self {
            total,
            successful,
            no_match,
            failed,
            total_time,
            avg_time_per_file: if total > 0 {
                total_time / total as u32
            } else {
                Duration::ZERO
            },
        }
    }
}

/// Summary plus the per-file detail list (for tabular display or export).
#[derive(Debug)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub outcomes: Vec<RenameOutcome>,
}

/// Filesystem-mutation strategy. One pipeline serves both the real run and
/// the dry run; only this seam differs.
pub trait RenameFs: Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// Performs real renames with the host filesystem's native semantics
/// (atomic-or-fails).
pub struct RealFs;

impl RenameFs for RealFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// No-op strategy for dry runs.
///
/// Because nothing is created, conflict probes in a dry run only see files
/// that already exist: two files deriving the same name report the same
/// target, where a real run would suffix the second one. Reported targets
/// are therefore not mutually collision-free.
pub struct DryRunFs;

impl RenameFs for DryRunFs {
    fn rename(&self, _from: &Path, _to: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Whether a path carries a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Find supported image files under `directory`, sorted by path.
///
/// `recursive = false` stays in the top level.
pub fn find_image_files(directory: &Path, recursive: bool) -> Result<Vec<PathBuf>, BatchError> {
    if !directory.is_dir() {
        return Err(BatchError::NotADirectory(directory.to_path_buf()));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_supported_image(path))
        .collect();
    files.sort();

    tracing::info!(
        directory = %directory.display(),
        count = files.len(),
        recursive,
        "image file search complete"
    );
    Ok(files)
}

/// Run the rename pipeline over `files`.
///
/// Outcomes are collected in input order; the progress callback fires once
/// per completed file with `(completed, total)` in completion order, which
/// differs from submission order under parallelism. The gallery snapshot is
/// read-only for the whole batch.
pub fn run_batch(
    files: &[PathBuf],
    detector: &dyn FaceDetector,
    gallery: &Gallery,
    matcher: &NearestMatcher,
    options: &BatchOptions,
    on_progress: &(dyn Fn(usize, usize) + Sync),
) -> Result<BatchReport, BatchError> {
    let total = files.len();
    if total == 0 {
        return Ok(BatchReport {
            summary: BatchSummary::from_outcomes(&[], Duration::ZERO),
            outcomes: Vec::new(),
        });
    }

    tracing::info!(
        total,
        dry_run = options.dry_run,
        workers = options.workers,
        gallery_revision = gallery.revision(),
        "batch rename starting"
    );
    let started = Instant::now();

    let fs_strategy: &dyn RenameFs = if options.dry_run { &DryRunFs } else { &RealFs };

    // One lock per target directory: two workers resolving conflicts in the
    // same directory would otherwise both observe the same free name.
    let dir_locks: HashMap<PathBuf, Mutex<()>> = files
        .iter()
        .map(|f| parent_dir(f))
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .map(|dir| (dir, Mutex::new(())))
        .collect();

    let completed = AtomicUsize::new(0);

    // workers = 0 would mean "rayon's default" to the builder; pin it to a
    // single worker instead so the pool width is always what was asked for.
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .build()?;

    let outcomes: Vec<RenameOutcome> = pool.install(|| {
        files
            .par_iter()
            .map(|path| {
                let outcome = process_file(
                    path,
                    detector,
                    gallery,
                    matcher,
                    fs_strategy,
                    &dir_locks,
                    options,
                );
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(done, total);
                outcome
            })
            .collect()
    });

    let total_time = started.elapsed();
    let summary = BatchSummary::from_outcomes(&outcomes, total_time);
    tracing::info!(
        successful = summary.successful,
        no_match = summary.no_match,
        failed = summary.failed,
        elapsed_ms = total_time.as_millis() as u64,
        "batch rename complete"
    );

    Ok(BatchReport { summary, outcomes })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().unwrap_or_else(|| Path::new("")).to_path_buf()
}

fn process_file(
    path: &Path,
    detector: &dyn FaceDetector,
    gallery: &Gallery,
    matcher: &NearestMatcher,
    fs_strategy: &dyn RenameFs,
    dir_locks: &HashMap<PathBuf, Mutex<()>>,
    options: &BatchOptions,
) -> RenameOutcome {
    let started = Instant::now();

    let failed = |labels: Vec<String>, message: String| RenameOutcome {
        original_path: path.to_path_buf(),
        labels,
        new_path: None,
        status: RenameStatus::Failed(message),
        elapsed: started.elapsed(),
    };

    if let Err(e) = validate_input(path, options.max_image_bytes) {
        tracing::warn!(file = %path.display(), error = %e, "input rejected");
        return failed(Vec::new(), e.to_string());
    }

    let faces = match detector.detect(path) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "detection failed");
            return failed(Vec::new(), e.to_string());
        }
    };

    let labels = classify(&faces, gallery, matcher, options.max_labels);
    if labels.is_empty() {
        tracing::debug!(file = %path.display(), "no recognized faces; keeping name");
        return RenameOutcome {
            original_path: path.to_path_buf(),
            labels,
            new_path: None,
            status: RenameStatus::NoMatch,
            elapsed: started.elapsed(),
        };
    }

    let new_name = derive_filename(&labels, path, &options.separator);
    let parent = parent_dir(path);
    let target = parent.join(&new_name);

    if target == path {
        // Already carries the derived name; nothing to do.
        return RenameOutcome {
            original_path: path.to_path_buf(),
            labels,
            new_path: Some(target),
            status: RenameStatus::Renamed,
            elapsed: started.elapsed(),
        };
    }

    // Critical section per directory: probe and rename must not interleave
    // with another worker targeting the same directory.
    let lock = &dir_locks[&parent];
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let resolved = resolve_conflict_with(&target, &options.duplicate_format);
    match fs_strategy.rename(path, &resolved) {
        Ok(()) => {
            tracing::info!(
                from = %path.display(),
                to = %resolved.display(),
                dry_run = options.dry_run,
                "renamed"
            );
            RenameOutcome {
                original_path: path.to_path_buf(),
                labels,
                new_path: Some(resolved),
                status: RenameStatus::Renamed,
                elapsed: started.elapsed(),
            }
        }
        Err(e) => failed(labels, format!("rename failed: {e}")),
    }
}

fn validate_input(path: &Path, max_image_bytes: u64) -> Result<(), DetectError> {
    if !is_supported_image(path) {
        return Err(DetectError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "none".to_string()),
        ));
    }
    let metadata =
        std::fs::metadata(path).map_err(|_| DetectError::NotFound(path.to_path_buf()))?;
    if metadata.len() > max_image_bytes {
        return Err(DetectError::TooLarge {
            size: metadata.len(),
            limit: max_image_bytes,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, DetectedFace, Embedding, GalleryEntry};
    use std::fs::{self, File};
    use std::io::Write;

    enum MockResponse {
        Faces(Vec<Vec<f32>>),
        Error,
    }

    struct MockDetector {
        responses: HashMap<PathBuf, MockResponse>,
    }

    impl FaceDetector for MockDetector {
        fn detect(&self, image: &Path) -> Result<Vec<DetectedFace>, DetectError> {
            match self.responses.get(image) {
                Some(MockResponse::Faces(vectors)) => Ok(vectors
                    .iter()
                    .map(|values| DetectedFace {
                        embedding: Embedding::new(values.clone()),
                        bounds: BoundingBox {
                            x: 0.0,
                            y: 0.0,
                            width: 10.0,
                            height: 10.0,
                            confidence: 0.9,
                        },
                    })
                    .collect()),
                Some(MockResponse::Error) => {
                    Err(DetectError::Inference("mock detector failure".into()))
                }
                None => Ok(Vec::new()),
            }
        }
    }

    fn touch(path: &Path) {
        let mut f = File::create(path).unwrap();
        f.write_all(b"img").unwrap();
    }

    fn test_gallery() -> Gallery {
        Gallery::new(
            2,
            vec![
                GalleryEntry {
                    name: "Alice".into(),
                    embedding: Embedding::new(vec![0.0, 0.0]),
                },
                GalleryEntry {
                    name: "Bob".into(),
                    embedding: Embedding::new(vec![10.0, 0.0]),
                },
            ],
        )
    }

    fn run(
        files: &[PathBuf],
        detector: &MockDetector,
        options: &BatchOptions,
    ) -> BatchReport {
        run_batch(
            files,
            detector,
            &test_gallery(),
            &NearestMatcher::new(0.6),
            options,
            &|_, _| {},
        )
        .unwrap()
    }

    #[test]
    fn mixed_batch_counts() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"]
            .iter()
            .map(|n| dir.path().join(n))
            .collect();
        for f in &files {
            touch(f);
        }

        let mut responses = HashMap::new();
        responses.insert(files[0].clone(), MockResponse::Faces(vec![vec![0.1, 0.0]]));
        responses.insert(files[1].clone(), MockResponse::Faces(vec![vec![10.1, 0.0]]));
        responses.insert(files[2].clone(), MockResponse::Faces(vec![]));
        // d.jpg absent from the map: readable photo, no faces.
        responses.insert(files[4].clone(), MockResponse::Error);
        let detector = MockDetector { responses };

        let report = run(&files, &detector, &BatchOptions::default());
        assert_eq!(report.summary.total, 5);
        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.summary.no_match, 2);
        assert_eq!(report.summary.failed, 1);

        assert!(dir.path().join("Alice.jpg").exists());
        assert!(dir.path().join("Bob.jpg").exists());
        assert!(!files[0].exists());
        assert!(!files[1].exists());
        // No-match and failed files keep their names.
        assert!(files[2].exists());
        assert!(files[4].exists());
    }

    #[test]
    fn dry_run_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        touch(&file);

        let mut responses = HashMap::new();
        responses.insert(file.clone(), MockResponse::Faces(vec![vec![0.0, 0.0]]));
        let detector = MockDetector { responses };

        let options = BatchOptions {
            dry_run: true,
            ..BatchOptions::default()
        };
        let report = run(&[file.clone()], &detector, &options);

        assert_eq!(report.summary.successful, 1);
        assert_eq!(
            report.outcomes[0].new_path.as_deref(),
            Some(dir.path().join("Alice.jpg").as_path())
        );
        // Original untouched, target never created.
        assert!(file.exists());
        assert!(!dir.path().join("Alice.jpg").exists());
    }

    #[test]
    fn same_directory_collisions_get_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = ["one.jpg", "two.jpg"]
            .iter()
            .map(|n| dir.path().join(n))
            .collect();
        for f in &files {
            touch(f);
        }

        let mut responses = HashMap::new();
        for f in &files {
            responses.insert(f.clone(), MockResponse::Faces(vec![vec![0.0, 0.0]]));
        }
        let detector = MockDetector { responses };

        let options = BatchOptions {
            workers: 2,
            ..BatchOptions::default()
        };
        let report = run(&files, &detector, &options);

        assert_eq!(report.summary.successful, 2);
        assert!(dir.path().join("Alice.jpg").exists());
        assert!(dir.path().join("Alice(1).jpg").exists());
    }

    #[test]
    fn already_named_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Alice.jpg");
        touch(&file);

        let mut responses = HashMap::new();
        responses.insert(file.clone(), MockResponse::Faces(vec![vec![0.0, 0.0]]));
        let detector = MockDetector { responses };

        let report = run(&[file.clone()], &detector, &BatchOptions::default());
        assert_eq!(report.summary.successful, 1);
        assert!(file.exists());
        // No conflict suffix was generated for the file's own name.
        assert!(!dir.path().join("Alice(1).jpg").exists());
    }

    #[test]
    fn unsupported_extension_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        touch(&file);

        let detector = MockDetector {
            responses: HashMap::new(),
        };
        let report = run(&[file], &detector, &BatchOptions::default());
        assert_eq!(report.summary.failed, 1);
        assert!(report.outcomes[0].error().unwrap().contains("unsupported"));
    }

    #[test]
    fn oversized_file_is_a_per_file_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.jpg");
        touch(&file);

        let detector = MockDetector {
            responses: HashMap::new(),
        };
        let options = BatchOptions {
            max_image_bytes: 1,
            ..BatchOptions::default()
        };
        let report = run(&[file], &detector, &options);
        assert_eq!(report.summary.failed, 1);
        assert!(report.outcomes[0].error().unwrap().contains("too large"));
    }

    #[test]
    fn zero_workers_runs_on_a_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("photo.jpg");
        touch(&file);

        let mut responses = HashMap::new();
        responses.insert(file.clone(), MockResponse::Faces(vec![vec![0.0, 0.0]]));
        let detector = MockDetector { responses };

        let options = BatchOptions {
            workers: 0,
            ..BatchOptions::default()
        };
        let report = run(&[file], &detector, &options);
        assert_eq!(report.summary.successful, 1);
        assert!(dir.path().join("Alice.jpg").exists());
    }

    #[test]
    fn progress_callback_fires_once_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| dir.path().join(format!("p{i}.jpg")))
            .collect();
        for f in &files {
            touch(f);
        }
        let detector = MockDetector {
            responses: HashMap::new(),
        };

        let calls = Mutex::new(Vec::new());
        run_batch(
            &files,
            &detector,
            &test_gallery(),
            &NearestMatcher::new(0.6),
            &BatchOptions::default(),
            &|done, total| {
                assert_eq!(total, 5);
                calls.lock().unwrap().push(done);
            },
        )
        .unwrap();

        let mut seen = calls.into_inner().unwrap();
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn empty_file_list_yields_empty_report() {
        let detector = MockDetector {
            responses: HashMap::new(),
        };
        let report = run(&[], &detector, &BatchOptions::default());
        assert_eq!(report.summary.total, 0);
        assert_eq!(report.summary.avg_time_per_file, Duration::ZERO);
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn find_image_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.jpg"));
        touch(&dir.path().join("a.png"));
        touch(&dir.path().join("skip.txt"));
        fs::create_dir(dir.path().join("sub")).unwrap();
        touch(&dir.path().join("sub/c.jpeg"));

        let flat = find_image_files(dir.path(), false).unwrap();
        assert_eq!(
            flat,
            vec![dir.path().join("a.png"), dir.path().join("b.jpg")]
        );

        let deep = find_image_files(dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("sub/c.jpeg")));
    }

    #[test]
    fn find_image_files_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            find_image_files(&missing, false),
            Err(BatchError::NotADirectory(_))
        ));
    }
}
