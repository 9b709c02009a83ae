use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use namesake_core::batch::{run_batch, BatchOptions, BatchReport, RenameStatus};
use namesake_core::classify::classify;
use namesake_core::naming::derive_filename;
use namesake_core::{find_image_files, FaceDetector, NearestMatcher};
use namesake_onnx::OnnxFaceEngine;
use namesake_store::GalleryStore;
use std::path::{Path, PathBuf};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "namesake", about = "Face-recognition photo renamer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person's face from a photo containing exactly one face
    Register {
        /// Person's display name
        #[arg(short, long)]
        name: String,
        /// Photo to register the face from
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Rename photos in a folder after the people recognized in them
    Rename {
        /// Folder to process
        #[arg(short, long)]
        input_folder: PathBuf,
        /// Also process subfolders
        #[arg(short, long)]
        recursive: bool,
        /// Compute and report outcomes without renaming anything
        #[arg(short, long)]
        dry_run: bool,
        /// Worker pool width (default from NAMESAKE_WORKERS)
        #[arg(long)]
        workers: Option<usize>,
        /// Emit the full report as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show what a rename would produce for the first few photos
    Preview {
        /// Folder to process
        #[arg(short, long)]
        input_folder: PathBuf,
        /// Also process subfolders
        #[arg(short, long)]
        recursive: bool,
        /// Number of photos to preview
        #[arg(short = 'm', long, default_value_t = 10)]
        max_preview: usize,
    },
    /// List registered people
    List,
    /// Remove a registered person (and all their face data) by id
    Remove {
        /// Person id as shown by `list`
        id: i64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Register { name, image } => cmd_register(&config, &name, &image),
        Commands::Rename {
            input_folder,
            recursive,
            dry_run,
            workers,
            json,
        } => cmd_rename(&config, &input_folder, recursive, dry_run, workers, json),
        Commands::Preview {
            input_folder,
            recursive,
            max_preview,
        } => cmd_preview(&config, &input_folder, recursive, max_preview),
        Commands::List => cmd_list(&config),
        Commands::Remove { id } => cmd_remove(&config, id),
    }
}

fn load_engine(config: &Config) -> Result<OnnxFaceEngine> {
    OnnxFaceEngine::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )
    .with_context(|| {
        format!(
            "loading ONNX models from {} (override with NAMESAKE_MODEL_DIR)",
            config.model_dir.display()
        )
    })
}

fn cmd_register(config: &Config, name: &str, image: &Path) -> Result<()> {
    let store = GalleryStore::open(&config.db_path)?;
    let engine = load_engine(config)?;

    let mut faces = engine.detect(image)?;
    match faces.len() {
        0 => bail!("no face detected in {}", image.display()),
        1 => {}
        n => bail!(
            "{n} faces detected in {}; a registration photo must contain exactly one",
            image.display()
        ),
    }
    let face = faces.remove(0);

    let registration = store.register_embedding(name, &face.embedding)?;
    if registration.new_person {
        println!("Registered new person: {name} (id {})", registration.person_id);
    } else {
        println!(
            "Person '{name}' already exists (id {}); added another face",
            registration.person_id
        );
    }

    let stats = store.stats()?;
    println!(
        "Gallery now holds {} people and {} face vectors",
        stats.person_count, stats.vector_count
    );
    Ok(())
}

fn cmd_rename(
    config: &Config,
    input_folder: &Path,
    recursive: bool,
    dry_run: bool,
    workers: Option<usize>,
    json: bool,
) -> Result<()> {
    let store = GalleryStore::open(&config.db_path)?;
    // Fresh snapshot: matching never runs against anything older than the
    // last committed registration.
    let gallery = store.load_gallery()?;
    tracing::debug!(
        revision = gallery.revision(),
        vectors = gallery.len(),
        "gallery snapshot loaded"
    );
    if gallery.is_empty() {
        println!("No people registered yet; every photo will be a no-match.");
    }

    let files = find_image_files(input_folder, recursive)?;
    if files.is_empty() {
        println!("No image files found in {}", input_folder.display());
        return Ok(());
    }
    println!(
        "Processing {} files{}",
        files.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    let engine = load_engine(config)?;
    let matcher = NearestMatcher::new(config.tolerance);
    let options = BatchOptions {
        dry_run,
        workers: workers.unwrap_or(config.workers),
        max_labels: config.max_labels,
        separator: config.separator.clone(),
        duplicate_format: config.duplicate_format.clone(),
        max_image_bytes: config.max_image_bytes,
    };

    let bar = if json {
        ProgressBar::hidden()
    } else {
        progress_bar(files.len() as u64)
    };
    let report = run_batch(&files, &engine, &gallery, &matcher, &options, &|done, _| {
        bar.set_position(done as u64)
    })?;
    bar.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
    } else {
        print_report(&report);
        if dry_run && report.summary.successful > 0 {
            println!("\nRe-run without --dry-run to apply these renames.");
        }
    }
    Ok(())
}

fn cmd_preview(
    config: &Config,
    input_folder: &Path,
    recursive: bool,
    max_preview: usize,
) -> Result<()> {
    let store = GalleryStore::open(&config.db_path)?;
    let gallery = store.load_gallery()?;
    let files = find_image_files(input_folder, recursive)?;
    if files.is_empty() {
        println!("No image files found in {}", input_folder.display());
        return Ok(());
    }

    let engine = load_engine(config)?;
    let matcher = NearestMatcher::new(config.tolerance);

    println!(
        "Previewing {} of {} files:",
        max_preview.min(files.len()),
        files.len()
    );
    for (i, file) in files.iter().take(max_preview).enumerate() {
        let line = match engine.detect(file) {
            Ok(faces) => {
                let labels = classify(&faces, &gallery, &matcher, config.max_labels);
                if labels.is_empty() {
                    format!("{}: no recognized faces", display_name(file))
                } else {
                    format!(
                        "{} -> {} ({})",
                        display_name(file),
                        derive_filename(&labels, file, &config.separator),
                        labels.join(", ")
                    )
                }
            }
            Err(e) => format!("{}: error: {e}", display_name(file)),
        };
        println!("  {:3}: {line}", i + 1);
    }
    if files.len() > max_preview {
        println!("  ... {} more", files.len() - max_preview);
    }
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    let store = GalleryStore::open(&config.db_path)?;
    let persons = store.all_persons()?;
    if persons.is_empty() {
        println!("No people registered");
        return Ok(());
    }

    println!("Registered people ({}):", persons.len());
    for person in &persons {
        println!(
            "  {:4}: {} ({} face vector{})",
            person.id,
            person.name,
            person.vector_count,
            if person.vector_count == 1 { "" } else { "s" }
        );
    }

    let stats = store.stats()?;
    println!(
        "\n{} people, {} vectors, {:.2} vectors/person",
        stats.person_count, stats.vector_count, stats.avg_vectors_per_person
    );
    Ok(())
}

fn cmd_remove(config: &Config, id: i64) -> Result<()> {
    let store = GalleryStore::open(&config.db_path)?;
    if store.delete_person(id)? {
        println!("Removed person {id} and their face data");
    } else {
        println!("No person with id {id}");
    }
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} files")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            RenameStatus::Renamed => {
                let new_name = outcome
                    .new_path
                    .as_deref()
                    .map(display_name)
                    .unwrap_or_default();
                println!(
                    "  {} -> {} ({})",
                    display_name(&outcome.original_path),
                    new_name,
                    outcome.labels.join(", ")
                );
            }
            RenameStatus::NoMatch => {
                println!("  {}: no recognized faces", display_name(&outcome.original_path));
            }
            RenameStatus::Failed(message) => {
                println!("  {}: failed: {message}", display_name(&outcome.original_path));
            }
        }
    }

    let s = &report.summary;
    println!("\nTotal: {}", s.total);
    println!("  renamed:  {}", s.successful);
    println!("  no match: {}", s.no_match);
    println!("  failed:   {}", s.failed);
    println!(
        "  took {:.1}s ({:.2}s/file)",
        s.total_time.as_secs_f64(),
        s.avg_time_per_file.as_secs_f64()
    );
}

fn report_json(report: &BatchReport) -> serde_json::Value {
    serde_json::json!({
        "summary": {
            "total": report.summary.total,
            "successful": report.summary.successful,
            "no_match": report.summary.no_match,
            "failed": report.summary.failed,
            "total_time_secs": report.summary.total_time.as_secs_f64(),
            "avg_time_per_file_secs": report.summary.avg_time_per_file.as_secs_f64(),
        },
        "files": report.outcomes.iter().map(|o| {
            serde_json::json!({
                "original": o.original_path,
                "new_path": o.new_path,
                "labels": o.labels,
                "status": o.status.as_str(),
                "error": o.error(),
                "elapsed_secs": o.elapsed.as_secs_f64(),
            })
        }).collect::<Vec<_>>(),
    })
}
