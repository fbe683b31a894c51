use crate::errors::BooruErrors;
use crate::errors::BooruErrors::PathParsing;

use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Suffixes treated as images. Matching is case-sensitive, so `IMG.JPG` is
/// not picked up.
pub const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".png", ".gif", ".jpeg"];

const COPY_PROGRESS_EVERY: usize = 1000;

pub fn is_image_name(name: &str) -> bool {
    IMAGE_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

pub fn is_json_name(name: &str) -> bool {
    name.ends_with(".json")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub name: String,
    pub path: PathBuf,
}

/// Regular files directly inside `dir` whose names pass `accept`, sorted by
/// file name so batch membership is reproducible.
pub fn list_files(dir: &Path, accept: impl Fn(&str) -> bool) -> Result<Vec<ListedFile>, BooruErrors> {
    if !dir.is_dir() {
        return Err(PathParsing(format!("{} is not a directory", dir.display())));
    }
    let mut files = vec![];
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {e}", dir.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let entry = EntryProperties { entry: &entry };
        match entry.file_name() {
            Ok(name) if accept(&name) => files.push(ListedFile {
                name,
                path: entry.entry.path().to_path_buf(),
            }),
            Ok(_) => {}
            Err(e) => warn!("Skipping {}: {e}", entry.entry.path().display()),
        }
    }
    Ok(files)
}

struct EntryProperties<'a> {
    entry: &'a DirEntry,
}

impl EntryProperties<'_> {
    fn file_name(&self) -> Result<String, BooruErrors> {
        Ok(self
            .entry
            .file_name()
            .to_str()
            .ok_or(PathParsing(format!(
                "Failure parsing filename for {}",
                self.entry.path().display()
            )))?
            .to_string())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub found: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Copies every image of `source_dir` missing from `images_dir`. Existing
/// destination files are never overwritten, even if the source changed.
/// Individual copy failures are logged and counted, never fatal; only an
/// unreadable source directory is an error.
pub fn copy_images(source_dir: &Path, images_dir: &Path) -> Result<CopyReport, BooruErrors> {
    let sources = list_files(source_dir, is_image_name)?;
    let mut report = CopyReport {
        found: sources.len(),
        ..CopyReport::default()
    };
    if sources.is_empty() {
        warn!("No image files found in {}", source_dir.display());
        return Ok(report);
    }

    for source in sources {
        let destination = images_dir.join(&source.name);
        if destination.exists() {
            report.skipped += 1;
            continue;
        }
        match fs::copy(&source.path, &destination) {
            Ok(_) => {
                report.copied += 1;
                if report.copied % COPY_PROGRESS_EVERY == 0 {
                    info!("Copied {}/{} images", report.copied, report.found);
                }
            }
            Err(e) => {
                error!("Error copying {}: {e}", source.name);
                report.failed += 1;
            }
        }
    }
    info!(
        "Copied {} images ({} already present, {} failed) out of {}",
        report.copied, report.skipped, report.failed, report.found
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_names_match_case_sensitively() {
        assert!(is_image_name("a.jpg"));
        assert!(is_image_name("a.jpeg"));
        assert!(is_image_name("a.png"));
        assert!(is_image_name("a.gif"));
        assert!(!is_image_name("a.JPG"));
        assert!(!is_image_name("a.webp"));
        assert!(!is_image_name("a.json"));
    }

    #[test]
    fn listing_is_sorted_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();
        fs::create_dir(dir.path().join("d.json")).unwrap();

        let names: Vec<String> = list_files(dir.path(), is_json_name)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn listing_a_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_files(&dir.path().join("nope"), is_json_name).is_err());
    }

    #[test]
    fn copy_is_idempotent_and_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let images = dir.path().join("images");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&images).unwrap();
        fs::write(source.join("one.jpg"), "1").unwrap();
        fs::write(source.join("two.png"), "2").unwrap();
        fs::write(source.join("notes.txt"), "x").unwrap();
        fs::write(images.join("two.png"), "old").unwrap();

        let first = copy_images(&source, &images).unwrap();
        assert_eq!(
            first,
            CopyReport {
                found: 2,
                copied: 1,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(fs::read_to_string(images.join("two.png")).unwrap(), "old");
        assert!(!images.join("notes.txt").exists());

        let count_before = fs::read_dir(&images).unwrap().count();
        let second = copy_images(&source, &images).unwrap();
        assert_eq!(second.copied, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(fs::read_dir(&images).unwrap().count(), count_before);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_images(&dir.path().join("missing"), dir.path()).unwrap_err();
        assert!(matches!(err, BooruErrors::PathParsing(_)));
    }

    #[test]
    fn empty_source_yields_empty_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = copy_images(dir.path(), dir.path()).unwrap();
        assert_eq!(report, CopyReport::default());
    }
}
