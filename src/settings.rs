use crate::db::{RecordFilter, Sort, SortField, SortOrder};
use crate::errors::BooruErrors;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted, human-editable settings document.
///
/// Every write goes through `&mut self` and rewrites the whole file, so a
/// single owner is the only writer.
#[derive(Debug)]
pub struct Settings {
    path: PathBuf,
    document: Mapping,
}

impl Settings {
    /// Reads the document at `path`, synthesizing and persisting the defaults
    /// when it is absent or unreadable. Keys missing from an existing document
    /// are filled in from the defaults and written back.
    pub fn load(path: impl Into<PathBuf>) -> Result<Settings, BooruErrors> {
        let path = path.into();
        let defaults = default_document()?;
        let (mut document, mut dirty) = if path.exists() {
            match read_document(&path) {
                Ok(document) => (document, false),
                Err(e) => {
                    error!(
                        "Error loading settings from {}: {e}. Regenerating defaults.",
                        path.display()
                    );
                    (defaults.clone(), true)
                }
            }
        } else {
            info!("No settings found at {}, writing defaults", path.display());
            (defaults.clone(), true)
        };
        dirty |= backfill(&mut document, &defaults);
        let settings = Settings { path, document };
        if dirty {
            settings.save()?;
        }
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<(), BooruErrors> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_yaml::to_string(&self.document)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.get_path(&[section, key])
    }

    pub fn get_path(&self, keys: &[&str]) -> Option<&Value> {
        let (first, rest) = keys.split_first()?;
        let mut value = self.document.get(*first)?;
        for key in rest {
            value = value.as_mapping()?.get(*key)?;
        }
        if value.is_null() {
            None
        } else {
            Some(value)
        }
    }

    /// Stores `value` under `keys`, creating intermediate sections, and
    /// persists the document.
    pub fn set(&mut self, value: impl Into<Value>, keys: &[&str]) -> Result<(), BooruErrors> {
        let (last, parents) = keys
            .split_last()
            .ok_or_else(|| BooruErrors::Settings("empty settings key".to_owned()))?;
        let mut section = &mut self.document;
        for key in parents {
            let entry = section
                .entry(Value::from(*key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !entry.is_mapping() {
                *entry = Value::Mapping(Mapping::new());
            }
            section = match entry {
                Value::Mapping(mapping) => mapping,
                _ => return Err(BooruErrors::Settings(format!("{key} is not a section"))),
            };
        }
        section.insert(Value::from(*last), value.into());
        self.save()
    }

    /// Replaces whole top-level sections at once and persists.
    pub fn update(&mut self, sections: Mapping) -> Result<(), BooruErrors> {
        for (key, value) in sections {
            self.document.insert(key, value);
        }
        self.save()
    }

    /// Typed view over the document, with tunables clamped into range.
    pub fn config(&self) -> Result<Config, BooruErrors> {
        let config: Config = serde_yaml::from_value(Value::Mapping(self.document.clone()))?;
        Ok(config.normalized())
    }
}

/// `server.debug` of the document at `path`, read without creating or
/// repairing it. Falls back to the default when unreadable or absent.
pub fn debug_enabled(path: &Path) -> bool {
    read_document(path)
        .ok()
        .and_then(|document| document.get("server")?.get("debug")?.as_bool())
        .unwrap_or_else(|| ServerSection::default().debug)
}

fn read_document(path: &Path) -> Result<Mapping, BooruErrors> {
    let contents = fs::read_to_string(path)?;
    match serde_yaml::from_str::<Value>(&contents)? {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(BooruErrors::Settings(format!(
            "expected a mapping at the document root, found {other:?}"
        ))),
    }
}

fn default_document() -> Result<Mapping, BooruErrors> {
    match serde_yaml::to_value(Config::default())? {
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(BooruErrors::Settings(
            "default settings did not serialize to a mapping".to_owned(),
        )),
    }
}

/// Copies every key of `defaults` missing from `document`. Returns whether
/// anything was added.
fn backfill(document: &mut Mapping, defaults: &Mapping) -> bool {
    let mut changed = false;
    for (key, default) in defaults {
        match document.get_mut(key) {
            Some(Value::Mapping(existing)) => {
                if let Value::Mapping(default) = default {
                    changed |= backfill(existing, default);
                }
            }
            Some(value) if !value.is_null() => {}
            _ => {
                document.insert(key.clone(), default.clone());
                changed = true;
            }
        }
    }
    changed
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    pub paths: PathsSection,
    pub thumbnails: ThumbnailsSection,
    pub gallery: GallerySection,
    pub server: ServerSection,
    pub processing: ProcessingSection,
    pub filters: FiltersSection,
    pub ui: UiSection,
}

impl Config {
    fn normalized(mut self) -> Config {
        self.thumbnails.width = self.thumbnails.width.max(1);
        self.thumbnails.quality = self.thumbnails.quality.min(100);
        self.thumbnails.compression_level = self.thumbnails.compression_level.min(9);
        self.gallery.images_per_page = self.gallery.images_per_page.max(1);
        self.processing.batch_size = self.processing.batch_size.max(1);
        self.processing.cpu_usage_percent = self.processing.cpu_usage_percent.clamp(1, 100);
        self
    }

    pub fn record_filter(&self) -> RecordFilter {
        RecordFilter {
            exclude_deleted: self.filters.exclude_deleted,
            exclude_banned: self.filters.exclude_banned,
        }
    }

    pub fn gallery_sort(&self) -> Sort {
        Sort {
            field: self.gallery.sort_by,
            order: self.gallery.sort_order,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    pub source_images: PathBuf,
    pub source_json: PathBuf,
    pub database: PathBuf,
    pub static_folder: PathBuf,
    pub images_folder: String,
    pub thumbnails_folder: String,
}

impl PathsSection {
    pub fn images_dir(&self) -> PathBuf {
        self.static_folder.join(&self.images_folder)
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.static_folder.join(&self.thumbnails_folder)
    }
}

impl Default for PathsSection {
    fn default() -> Self {
        PathsSection {
            source_images: PathBuf::from("source/images"),
            source_json: PathBuf::from("source/json"),
            database: PathBuf::from("booru.db"),
            static_folder: PathBuf::from("static"),
            images_folder: "images".to_owned(),
            thumbnails_folder: "thumbnails".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailsSection {
    pub width: u32,
    pub quality: u8,
    pub compression_level: u8,
}

impl Default for ThumbnailsSection {
    fn default() -> Self {
        ThumbnailsSection {
            width: 128,
            quality: 85,
            compression_level: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GallerySection {
    pub images_per_page: u32,
    pub sort_order: SortOrder,
    pub sort_by: SortField,
}

impl Default for GallerySection {
    fn default() -> Self {
        GallerySection {
            images_per_page: 24,
            sort_order: SortOrder::Desc,
            sort_by: SortField::Id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub secret_key: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            host: "localhost".to_owned(),
            port: 5000,
            debug: true,
            secret_key: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSection {
    pub batch_size: usize,
    pub cpu_usage_percent: u32,
}

impl Default for ProcessingSection {
    fn default() -> Self {
        ProcessingSection {
            batch_size: 1000,
            cpu_usage_percent: 75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiltersSection {
    pub exclude_deleted: bool,
    pub exclude_banned: bool,
    /// Kept in the document only; listings never filter on rating.
    pub allowed_ratings: Vec<String>,
}

impl Default for FiltersSection {
    fn default() -> Self {
        FiltersSection {
            exclude_deleted: true,
            exclude_banned: true,
            allowed_ratings: vec!["s".to_owned(), "q".to_owned(), "e".to_owned()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSection {
    pub tag_cloud_limit: usize,
}

impl Default for UiSection {
    fn default() -> Self {
        UiSection {
            tag_cloud_limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let settings = Settings::load(&path).unwrap();

        assert!(path.exists());
        assert_eq!(settings.get("thumbnails", "width"), Some(&Value::from(128)));
        assert_eq!(
            settings.get("paths", "database"),
            Some(&Value::from("booru.db"))
        );
        let config = settings.config().unwrap();
        assert_eq!(config.processing.cpu_usage_percent, 75);
        assert_eq!(config.gallery.sort_by, SortField::Id);
        assert_eq!(config.gallery.sort_order, SortOrder::Desc);
        assert!(!config.server.secret_key.is_empty());
    }

    #[test]
    fn set_persists_and_creates_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let mut settings = Settings::load(&path).unwrap();
        settings.set(256, &["thumbnails", "width"]).unwrap();
        settings.set("dark", &["theme", "appearance", "mode"]).unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.get("thumbnails", "width"), Some(&Value::from(256)));
        assert_eq!(
            reloaded.get_path(&["theme", "appearance", "mode"]),
            Some(&Value::from("dark"))
        );
        assert_eq!(reloaded.config().unwrap().thumbnails.width, 256);
    }

    #[test]
    fn malformed_document_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "paths: [unclosed").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.get("gallery", "images_per_page"), Some(&Value::from(24)));
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("images_per_page"));
    }

    #[test]
    fn missing_keys_are_materialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "thumbnails:\n  width: 300\nprocessing:\n  batch_size: 5\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        let config = settings.config().unwrap();
        assert_eq!(config.thumbnails.width, 300);
        assert_eq!(config.thumbnails.quality, 85);
        assert_eq!(config.processing.batch_size, 5);
        assert_eq!(config.processing.cpu_usage_percent, 75);
        assert!(fs::read_to_string(&path).unwrap().contains("cpu_usage_percent"));
    }

    #[test]
    fn tunables_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let mut settings = Settings::load(&path).unwrap();
        settings.set(0, &["processing", "cpu_usage_percent"]).unwrap();
        settings.set(42, &["thumbnails", "compression_level"]).unwrap();
        settings.set(0, &["processing", "batch_size"]).unwrap();

        let config = settings.config().unwrap();
        assert_eq!(config.processing.cpu_usage_percent, 1);
        assert_eq!(config.thumbnails.compression_level, 9);
        assert_eq!(config.processing.batch_size, 1);
    }

    #[test]
    fn wrongly_typed_value_is_a_settings_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::load(dir.path().join("settings.yaml")).unwrap();
        settings.set("wide", &["thumbnails", "width"]).unwrap();
        assert!(matches!(settings.config(), Err(BooruErrors::Settings(_))));
    }

    #[test]
    fn debug_flag_is_read_without_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        assert!(debug_enabled(&path));
        assert!(!path.exists());

        fs::write(&path, "server:\n  debug: false\n").unwrap();
        assert!(!debug_enabled(&path));
        fs::write(&path, "server: [broken").unwrap();
        assert!(debug_enabled(&path));
    }

    #[test]
    fn update_replaces_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let mut settings = Settings::load(&path).unwrap();
        let mut ui = Mapping::new();
        ui.insert(Value::from("tag_cloud_limit"), Value::from(7));
        let mut sections = Mapping::new();
        sections.insert(Value::from("ui"), Value::Mapping(ui));
        settings.update(sections).unwrap();

        let reloaded = Settings::load(&path).unwrap();
        assert_eq!(reloaded.config().unwrap().ui.tag_cloud_limit, 7);
    }
}
