use crate::errors::BooruErrors;
use crate::scanner::{is_image_name, list_files};
use crate::settings::ThumbnailsSection;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use rayon::ThreadPool;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailOptions {
    pub quality: u8,
    pub compression_level: u8,
}

impl From<&ThumbnailsSection> for ThumbnailOptions {
    fn from(section: &ThumbnailsSection) -> Self {
        ThumbnailOptions {
            quality: section.quality,
            compression_level: section.compression_level,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub workers: usize,
}

/// Output height keeping the source aspect ratio, never below one pixel.
pub fn thumbnail_height(width: u32, source_width: u32, source_height: u32) -> u32 {
    let ratio = f64::from(width) / f64::from(source_width.max(1));
    (ratio * f64::from(source_height)).round().max(1.0) as u32
}

/// `ceil(cores * percent / 100)`, at least one worker.
pub fn worker_count(cores: usize, cpu_usage_percent: u32) -> usize {
    let percent = cpu_usage_percent.clamp(1, 100) as usize;
    ((cores * percent + 99) / 100).max(1)
}

pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn png_compression(level: u8) -> CompressionType {
    match level {
        0..=3 => CompressionType::Fast,
        4..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    }
}

fn is_png_destination(path: &Path) -> bool {
    path.to_string_lossy().to_lowercase().ends_with(".png")
}

/// Images in `images_dir` without a same-named file in `thumbnails_dir`.
pub fn pending_tasks(
    images_dir: &Path,
    thumbnails_dir: &Path,
    width: u32,
) -> Result<Vec<ThumbnailTask>, BooruErrors> {
    Ok(list_files(images_dir, is_image_name)?
        .into_iter()
        .filter_map(|image| {
            let destination = thumbnails_dir.join(&image.name);
            if destination.exists() {
                None
            } else {
                Some(ThumbnailTask {
                    source: image.path,
                    destination,
                    width,
                })
            }
        })
        .collect())
}

pub struct ThumbnailGenerator<'a> {
    task: &'a ThumbnailTask,
    options: ThumbnailOptions,
}

impl ThumbnailGenerator<'_> {
    pub fn from(task: &ThumbnailTask, options: ThumbnailOptions) -> ThumbnailGenerator<'_> {
        ThumbnailGenerator { task, options }
    }

    /// Never fails: errors are logged with the source path and reported as
    /// `false`. A partially written destination is removed.
    pub fn run(&self) -> bool {
        match self.convert() {
            Ok(()) => {
                debug!("Thumbnail written to {}", self.task.destination.display());
                true
            }
            Err(e) => {
                error!(
                    "Error generating thumbnail for {}: {e}",
                    self.task.source.display()
                );
                false
            }
        }
    }

    fn convert(&self) -> Result<(), BooruErrors> {
        // Only pixels survive decoding, so EXIF and colour profiles are dropped.
        // The format comes from the content, the extension is only a hint.
        let img = ImageReader::open(&self.task.source)?
            .with_guessed_format()?
            .decode()?;
        let width = self.task.width.max(1);
        let height = thumbnail_height(width, img.width(), img.height());
        let thumbnail = img.resize_exact(width, height, FilterType::Lanczos3);

        let writer = BufWriter::new(File::create(&self.task.destination)?);
        let written = if is_png_destination(&self.task.destination) {
            let encoder = PngEncoder::new_with_quality(
                writer,
                png_compression(self.options.compression_level),
                PngFilter::Adaptive,
            );
            thumbnail.write_with_encoder(encoder)
        } else {
            let encoder = JpegEncoder::new_with_quality(writer, self.options.quality.clamp(1, 100));
            DynamicImage::ImageRgb8(thumbnail.to_rgb8()).write_with_encoder(encoder)
        };
        if let Err(e) = written {
            let _ = fs::remove_file(&self.task.destination);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Fixed-size worker pool generating thumbnails; torn down when dropped.
pub struct ThumbnailProcessor {
    pool: ThreadPool,
    workers: usize,
    options: ThumbnailOptions,
}

impl ThumbnailProcessor {
    pub fn new(workers: usize, options: ThumbnailOptions) -> Result<ThumbnailProcessor, BooruErrors> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("thumbnailer-{idx}"))
            .panic_handler(|_| error!("A thumbnail worker panicked, counting its image as failed"))
            .build()
            .map_err(|e| BooruErrors::Image(format!("Failure initing threadpool for thumbnails: {e}")))?;
        Ok(ThumbnailProcessor {
            pool,
            workers,
            options,
        })
    }

    /// Runs every task and waits for all of them. Results are collected in
    /// completion order, not submission order.
    pub fn convert_files(&self, tasks: Vec<ThumbnailTask>) -> ThumbnailReport {
        let total = tasks.len();
        let (tx, rx) = crossbeam_channel::unbounded::<(ThumbnailTask, bool)>();
        for task in tasks {
            let tx = tx.clone();
            let options = self.options;
            self.pool.spawn(move || {
                let succeeded = ThumbnailGenerator::from(&task, options).run();
                let _ = tx.send((task, succeeded));
            });
        }
        drop(tx);

        let mut done = 0;
        let mut succeeded = 0;
        for (task, ok) in rx.iter() {
            done += 1;
            if ok {
                succeeded += 1;
            } else {
                debug!("No thumbnail for {}", task.source.display());
            }
            if done % PROGRESS_EVERY == 0 || done == total {
                info!("Generating thumbnails: {done}/{total}");
            }
        }
        ThumbnailReport {
            total,
            succeeded,
            failed: total - succeeded,
            workers: self.workers,
        }
    }
}

/// Generates thumbnails for every image that lacks one.
pub fn generate_missing_thumbnails(
    images_dir: &Path,
    thumbnails_dir: &Path,
    section: &ThumbnailsSection,
    cpu_usage_percent: u32,
) -> Result<ThumbnailReport, BooruErrors> {
    let tasks = pending_tasks(images_dir, thumbnails_dir, section.width)?;
    if tasks.is_empty() {
        info!("Every image already has a thumbnail");
        return Ok(ThumbnailReport::default());
    }
    let workers = worker_count(available_cores(), cpu_usage_percent);
    info!(
        "Starting thumbnail generation for {} images with {workers} workers",
        tasks.len()
    );
    let report = ThumbnailProcessor::new(workers, section.into())?.convert_files(tasks);
    info!(
        "Successfully generated {}/{} thumbnails",
        report.succeeded, report.total
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

    const OPTIONS: ThumbnailOptions = ThumbnailOptions {
        quality: 85,
        compression_level: 7,
    };

    fn write_rgb(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, Rgb([200, 40, 90]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn worker_count_rounds_up_and_floors_at_one() {
        assert_eq!(worker_count(8, 75), 6);
        assert_eq!(worker_count(8, 1), 1);
        assert_eq!(worker_count(8, 100), 8);
        assert_eq!(worker_count(3, 50), 2);
        assert_eq!(worker_count(1, 0), 1);
    }

    #[test]
    fn height_keeps_aspect_ratio() {
        assert_eq!(thumbnail_height(128, 300, 150), 64);
        assert_eq!(thumbnail_height(30, 100, 333), 100);
        assert_eq!(thumbnail_height(128, 4000, 10), 1);
        assert_eq!(thumbnail_height(128, 128, 77), 77);
    }

    #[test]
    fn png_thumbnail_stays_png() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.png");
        RgbaImage::from_pixel(300, 150, Rgba([1, 2, 3, 128]))
            .save(&source)
            .unwrap();
        let task = ThumbnailTask {
            source,
            destination: dir.path().join("thumb.png"),
            width: 128,
        };

        assert!(ThumbnailGenerator::from(&task, OPTIONS).run());
        let bytes = fs::read(&task.destination).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (128, 64));
    }

    #[test]
    fn jpeg_thumbnail_is_reencoded() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.jpeg");
        write_rgb(&source, 100, 333);
        let task = ThumbnailTask {
            source,
            destination: dir.path().join("thumb.jpeg"),
            width: 30,
        };

        assert!(ThumbnailGenerator::from(&task, OPTIONS).run());
        let bytes = fs::read(&task.destination).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Jpeg);
        let thumb = image::load_from_memory(&bytes).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (30, 100));
    }

    #[test]
    fn format_is_detected_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("mislabeled.jpg");
        RgbImage::from_pixel(80, 40, Rgb([5, 6, 7]))
            .save_with_format(&source, ImageFormat::Png)
            .unwrap();
        let task = ThumbnailTask {
            source,
            destination: dir.path().join("thumb.jpg"),
            width: 40,
        };

        assert!(ThumbnailGenerator::from(&task, OPTIONS).run());
        let thumb = image::open(&task.destination).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 20));
    }

    #[test]
    fn undecodable_source_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        fs::write(&source, b"definitely not a jpeg").unwrap();
        let task = ThumbnailTask {
            source,
            destination: dir.path().join("out.jpg"),
            width: 64,
        };

        assert!(!ThumbnailGenerator::from(&task, OPTIONS).run());
        assert!(!task.destination.exists());
    }

    #[test]
    fn pending_tasks_skip_existing_thumbnails() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let thumbs = dir.path().join("thumbs");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&thumbs).unwrap();
        write_rgb(&images.join("a.jpg"), 10, 10);
        write_rgb(&images.join("b.png"), 10, 10);
        fs::write(images.join("c.txt"), "x").unwrap();
        fs::write(thumbs.join("b.png"), "done").unwrap();

        let tasks = pending_tasks(&images, &thumbs, 64).unwrap();
        assert_eq!(
            tasks,
            vec![ThumbnailTask {
                source: images.join("a.jpg"),
                destination: thumbs.join("a.jpg"),
                width: 64,
            }]
        );
    }

    #[test]
    fn pool_tallies_successes_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        let thumbs = dir.path().join("thumbs");
        fs::create_dir_all(&images).unwrap();
        fs::create_dir_all(&thumbs).unwrap();
        for name in ["a.jpg", "b.png", "c.jpeg", "d.jpg"] {
            write_rgb(&images.join(name), 40, 20);
        }
        fs::write(images.join("e.gif"), b"GIF89a-truncated").unwrap();

        let tasks = pending_tasks(&images, &thumbs, 20).unwrap();
        let report = ThumbnailProcessor::new(3, OPTIONS)
            .unwrap()
            .convert_files(tasks);

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.workers, 3);
        assert!(thumbs.join("d.jpg").exists());
        assert!(!thumbs.join("e.gif").exists());
    }

    #[test]
    fn nothing_pending_means_no_pool() {
        let dir = tempfile::tempdir().unwrap();
        let report = generate_missing_thumbnails(
            dir.path(),
            dir.path(),
            &ThumbnailsSection::default(),
            75,
        )
        .unwrap();
        assert_eq!(report, ThumbnailReport::default());
    }
}
