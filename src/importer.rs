use crate::errors::BooruErrors;
use crate::record::ImageRecord;
use crate::scanner::{is_json_name, list_files, ListedFile};

use std::fs;
use std::path::Path;

/// Destination of imported records. One call is one transaction: it either
/// stores the whole batch or nothing.
pub trait RecordSink {
    fn insert_batch(&mut self, records: &[ImageRecord]) -> Result<usize, BooruErrors>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub index: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_reasons: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub files: usize,
    pub batches: Vec<BatchOutcome>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.batches.iter().map(|b| b.succeeded).sum()
    }

    pub fn lost(&self) -> usize {
        self.files - self.imported()
    }
}

pub fn parse_record_file(path: &Path) -> Result<ImageRecord, BooruErrors> {
    let bytes = fs::read(path)?;
    ImageRecord::from_json_slice(&bytes)
}

/// Loads every `.json` file of `dir` into `sink`, `batch_size` files at a
/// time in file-name order.
///
/// A file that fails to parse is skipped without affecting the rest of its
/// batch. A batch whose insert fails is dropped as a whole; later batches are
/// still attempted. Nothing is retried.
pub fn import_directory(
    dir: &Path,
    batch_size: usize,
    sink: &mut impl RecordSink,
) -> Result<ImportReport, BooruErrors> {
    let files = list_files(dir, is_json_name)?;
    info!("Found {} JSON files to process", files.len());
    let mut report = ImportReport {
        files: files.len(),
        batches: vec![],
    };
    let mut processed = 0;
    for (index, chunk) in files.chunks(batch_size.max(1)).enumerate() {
        let outcome = import_batch(index, chunk, sink);
        processed += outcome.succeeded;
        info!("Processed {processed}/{} files", report.files);
        report.batches.push(outcome);
    }
    Ok(report)
}

fn import_batch(index: usize, files: &[ListedFile], sink: &mut impl RecordSink) -> BatchOutcome {
    let mut outcome = BatchOutcome {
        index,
        attempted: files.len(),
        ..BatchOutcome::default()
    };
    let mut records = Vec::with_capacity(files.len());
    for file in files {
        match parse_record_file(&file.path) {
            Ok(record) => records.push(record),
            Err(e) => {
                error!("Error processing {}: {e}", file.name);
                outcome.failed_reasons.push(format!("{}: {e}", file.name));
            }
        }
    }
    if records.is_empty() {
        return outcome;
    }
    match sink.insert_batch(&records) {
        Ok(inserted) => outcome.succeeded = inserted,
        Err(e) => {
            error!("Error committing batch {index}, {} records rolled back: {e}", records.len());
            outcome
                .failed_reasons
                .push(format!("batch {index} rolled back: {e}"));
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FlakySink {
        fail_batches: Vec<usize>,
        calls: usize,
        stored: Vec<ImageRecord>,
    }

    impl RecordSink for FlakySink {
        fn insert_batch(&mut self, records: &[ImageRecord]) -> Result<usize, BooruErrors> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_batches.contains(&call) {
                return Err(BooruErrors::Db("disk I/O error".to_owned()));
            }
            self.stored.extend_from_slice(records);
            Ok(records.len())
        }
    }

    fn write_records(dir: &Path, ids: &[i64]) -> Vec<PathBuf> {
        ids.iter()
            .map(|id| {
                let path = dir.join(format!("{id:04}.json"));
                fs::write(&path, format!(r#"{{"id": {id}, "tags_general": ["t{id}"]}}"#))
                    .unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn malformed_file_only_loses_itself() {
        let dir = tempfile::tempdir().unwrap();
        write_records(dir.path(), &[1, 2, 3, 4]);
        fs::write(dir.path().join("0002.json"), "{ not json").unwrap();
        fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let mut sink = FlakySink::default();
        let report = import_directory(dir.path(), 10, &mut sink).unwrap();

        assert_eq!(report.files, 4);
        assert_eq!(report.batches.len(), 1);
        assert_eq!(report.batches[0].attempted, 4);
        assert_eq!(report.batches[0].succeeded, 3);
        assert_eq!(report.batches[0].failed_reasons.len(), 1);
        assert!(report.batches[0].failed_reasons[0].starts_with("0002.json"));
        let ids: Vec<i64> = sink.stored.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[test]
    fn failed_commit_drops_only_its_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_records(dir.path(), &[1, 2, 3, 4, 5, 6, 7]);

        let mut sink = FlakySink {
            fail_batches: vec![1],
            ..FlakySink::default()
        };
        let report = import_directory(dir.path(), 3, &mut sink).unwrap();

        let succeeded: Vec<usize> = report.batches.iter().map(|b| b.succeeded).collect();
        assert_eq!(succeeded, vec![3, 0, 1]);
        assert_eq!(report.imported(), 4);
        assert_eq!(report.lost(), 3);
        assert_eq!(report.batches[1].attempted, 3);
        assert!(report.batches[1].failed_reasons[0].contains("rolled back"));
        let ids: Vec<i64> = sink.stored.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 7]);
    }

    #[test]
    fn duplicate_ids_roll_back_the_sqlite_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_records(dir.path(), &[1, 2, 3, 4]);
        fs::write(dir.path().join("0003b.json"), r#"{"id": 3}"#).unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let report = import_directory(dir.path(), 2, &mut store).unwrap();

        // 0001 0002 | 0003 0003b | 0004
        let succeeded: Vec<usize> = report.batches.iter().map(|b| b.succeeded).collect();
        assert_eq!(succeeded, vec![2, 0, 1]);
        assert_eq!(store.count().unwrap(), 3);
        assert!(store.get(3).unwrap().is_none());
        assert!(store.get(4).unwrap().is_some());
    }

    #[test]
    fn imports_a_record_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("42.json"),
            r#"{"id": 42, "tags_artist": ["x", "y"], "created_at": "2023-01-02T03:04:05Z"}"#,
        )
        .unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let report = import_directory(dir.path(), 1000, &mut store).unwrap();

        assert_eq!(report.imported(), 1);
        assert_eq!(store.count().unwrap(), 1);
        let record = store.get(42).unwrap().unwrap();
        assert_eq!(record.tags_artist, "x,y");
        assert_eq!(record.fav_count, 0);
        assert_eq!(record.created_at.to_string(), "2023-01-02 03:04:05");
    }

    #[test]
    fn empty_directory_imports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FlakySink::default();
        let report = import_directory(dir.path(), 5, &mut sink).unwrap();
        assert_eq!(report, ImportReport::default());
        assert_eq!(sink.calls, 0);
    }
}
