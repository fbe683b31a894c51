use crate::errors::BooruErrors;
use crate::time;

use std::fs;
use std::path::PathBuf;

/// One-shot startup steps gated by a completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Step {
    CopyImages,
    GenerateThumbnails,
}

/// Remembers which one-shot steps already ran. Only step-level completion is
/// tracked, never which files inside a step succeeded.
pub trait StepLedger {
    fn has_run(&self, step: Step) -> bool;
    fn mark_run(&self, step: Step) -> Result<(), BooruErrors>;
}

/// Flag files living next to the directory each step fills: `.images_copied`
/// in the images directory and `.thumbnails_generated` in the thumbnails
/// directory. Delete a flag to make its step run again.
pub struct FlagFileLedger {
    images_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

impl FlagFileLedger {
    pub fn new(images_dir: impl Into<PathBuf>, thumbnails_dir: impl Into<PathBuf>) -> Self {
        FlagFileLedger {
            images_dir: images_dir.into(),
            thumbnails_dir: thumbnails_dir.into(),
        }
    }

    pub fn flag_path(&self, step: Step) -> PathBuf {
        match step {
            Step::CopyImages => self.images_dir.join(".images_copied"),
            Step::GenerateThumbnails => self.thumbnails_dir.join(".thumbnails_generated"),
        }
    }
}

impl StepLedger for FlagFileLedger {
    fn has_run(&self, step: Step) -> bool {
        self.flag_path(step).exists()
    }

    fn mark_run(&self, step: Step) -> Result<(), BooruErrors> {
        let flag = self.flag_path(step);
        fs::write(&flag, format!("{step} completed on {}", time::now()))?;
        debug!("Wrote completion flag {}", flag.display());
        Ok(())
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MemoryLedger {
    done: std::sync::Mutex<std::collections::HashSet<Step>>,
}

#[cfg(test)]
impl StepLedger for MemoryLedger {
    fn has_run(&self, step: Step) -> bool {
        self.done
            .lock()
            .map(|done| done.contains(&step))
            .unwrap_or(false)
    }

    fn mark_run(&self, step: Step) -> Result<(), BooruErrors> {
        self.done
            .lock()
            .map_err(|e| BooruErrors::Io(e.to_string()))?
            .insert(step);
        Ok(())
    }
}
