use crate::db::Store;
use crate::image_converter::{generate_missing_thumbnails, ThumbnailReport};
use crate::importer::{import_directory, ImportReport};
use crate::scanner::{copy_images, CopyReport};
use crate::settings::Config;
use crate::steps::{Step, StepLedger};
use crate::time::Ticker;

use anyhow::{Context, Result};
use std::fs;

/// What each startup step did; `None` means the step was skipped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub copy: Option<CopyReport>,
    pub thumbnails: Option<ThumbnailReport>,
    pub import: Option<ImportReport>,
}

/// Runs the one-shot startup steps in order: copy source images, generate
/// missing thumbnails, then import metadata into an empty store.
///
/// Only failing to create the served directories is fatal. A step that could
/// not complete leaves its flag unset so the next start retries it.
pub fn run(config: &Config, store: &mut Store, ledger: &impl StepLedger) -> Result<PipelineReport> {
    let images_dir = config.paths.images_dir();
    let thumbnails_dir = config.paths.thumbnails_dir();
    for dir in [&images_dir, &thumbnails_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create directory {}", dir.display()))?;
    }
    let mut report = PipelineReport::default();

    if ledger.has_run(Step::CopyImages) {
        debug!("Images already copied, skipping");
    } else {
        info!("Copying images to {}...", images_dir.display());
        let ticker = Ticker::new();
        match copy_images(&config.paths.source_images, &images_dir) {
            Ok(copy) => {
                report.copy = Some(copy);
                mark(ledger, Step::CopyImages);
            }
            Err(e) => error!("Cannot copy source images, will retry next start: {e}"),
        }
        ticker.elapsed("to copy images.");
    }

    if ledger.has_run(Step::GenerateThumbnails) {
        debug!("Thumbnails already generated, skipping");
    } else {
        info!("Generating thumbnails...");
        let ticker = Ticker::new();
        match generate_missing_thumbnails(
            &images_dir,
            &thumbnails_dir,
            &config.thumbnails,
            config.processing.cpu_usage_percent,
        ) {
            Ok(thumbnails) => {
                report.thumbnails = Some(thumbnails);
                // Images may still arrive from a copy that has not completed.
                if ledger.has_run(Step::CopyImages) {
                    mark(ledger, Step::GenerateThumbnails);
                }
            }
            Err(e) => error!("Thumbnail generation could not start: {e}"),
        }
        ticker.elapsed("to generate thumbnails.");
    }

    report.import = import_if_empty(config, store);
    Ok(report)
}

fn mark(ledger: &impl StepLedger, step: Step) {
    if let Err(e) = ledger.mark_run(step) {
        error!("Could not record completion of {step}: {e}");
    }
}

fn import_if_empty(config: &Config, store: &mut Store) -> Option<ImportReport> {
    info!("Checking database status...");
    let source_json = &config.paths.source_json;
    if !source_json.is_dir() {
        error!("Data directory not found: {}", source_json.display());
        return None;
    }
    match store.first() {
        Ok(Some(_)) => {
            info!("Database already contains images, skipping load");
            return None;
        }
        Ok(None) => info!("No images in database, loading from JSON..."),
        Err(e) => {
            error!("Could not inspect database: {e}");
            return None;
        }
    }
    let ticker = Ticker::new();
    let result = import_directory(source_json, config.processing.batch_size, store);
    ticker.elapsed("to import metadata.");
    match result {
        Ok(import) => {
            info!(
                "Data loading completed: {} of {} records imported, {} lost",
                import.imported(),
                import.files,
                import.lost()
            );
            Some(import)
        }
        Err(e) => {
            error!("Error loading data: {e}");
            None
        }
    }
}
