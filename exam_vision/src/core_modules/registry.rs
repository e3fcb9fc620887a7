// THEORY:
// The registry is the only shared mutable state in the pipeline. It is an
// append-only, id-assigning collection of `ExamRecord`s behind the
// `ExamRegistry` trait, so callers never know whether records live in memory or
// on disk.
//
// Key architectural principles:
// 1.  **Serialized id assignment**: `append` reads the current maximum id,
//     assigns max + 1 and stores the record while holding one write lock. Ids are
//     therefore strictly increasing in creation order, contiguous from 1, and
//     never reused, however many threads append at once.
// 2.  **Append-only**: There is no update or delete. `list` returns records in
//     insertion order, oldest first; `get` is a point lookup.
// 3.  **Explicit durability**: `MemoryRegistry` is volatile and says so.
//     `FileRegistry` journals every record as one JSON line, fsyncs it before the
//     record becomes visible, and replays the journal on open. A write that
//     fails is rolled back, and a torn last line left by a crash is dropped on
//     replay, so the committed records always stay readable.

use crate::core_modules::exam_record::{ExamDraft, ExamId, ExamRecord};
use crate::error::{ExamError, Result};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Append-only store of exam records.
pub trait ExamRegistry: Send + Sync {
    /// Assigns the next id to `draft`, stores it and returns the stored record.
    fn append(&self, draft: ExamDraft) -> Result<ExamRecord>;

    /// All records in insertion order, oldest first.
    fn list(&self) -> Vec<ExamRecord>;

    fn get(&self, id: ExamId) -> Result<ExamRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether records survive a restart.
    fn is_durable(&self) -> bool;
}

fn next_id(records: &[ExamRecord]) -> ExamId {
    records.last().map_or(1, |last| last.id + 1)
}

fn lookup(records: &[ExamRecord], id: ExamId) -> Result<ExamRecord> {
    // Ids are contiguous from 1, so the record for `id` sits at index id - 1.
    usize::try_from(id)
        .ok()
        .and_then(|id| id.checked_sub(1))
        .and_then(|index| records.get(index))
        .cloned()
        .ok_or_else(|| ExamError::NotFound(format!("exam {id}")))
}

/// Volatile registry: everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: RwLock<Vec<ExamRecord>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExamRegistry for MemoryRegistry {
    fn append(&self, draft: ExamDraft) -> Result<ExamRecord> {
        let mut records = self.records.write();
        let record = ExamRecord::from_draft(next_id(&records), draft);
        records.push(record.clone());
        debug!(exam_id = record.id, "exam appended");
        Ok(record)
    }

    fn list(&self) -> Vec<ExamRecord> {
        self.records.read().clone()
    }

    fn get(&self, id: ExamId) -> Result<ExamRecord> {
        lookup(&self.records.read(), id)
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Durable registry backed by a JSON-lines journal.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    records: RwLock<Vec<ExamRecord>>,
    journal: Mutex<Journal>,
}

#[derive(Debug)]
struct Journal {
    file: File,
    /// Byte length of the journal up to the end of the last committed record.
    committed_len: u64,
}

impl Journal {
    /// Appends one newline-terminated record. On any failure the file is cut
    /// back to `committed_len`, so a failed write never leaves part of a line.
    fn append_line(&mut self, line: &[u8]) -> io::Result<()> {
        // Leftovers from an earlier write whose rollback also failed.
        if self.file.metadata()?.len() != self.committed_len {
            self.file.set_len(self.committed_len)?;
        }
        let written = self
            .file
            .write_all(line)
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data());
        match written {
            Ok(()) => {
                self.committed_len += line.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.file.set_len(self.committed_len) {
                    warn!(error = %rollback, "could not roll back a failed journal write");
                }
                Err(e)
            }
        }
    }
}

impl FileRegistry {
    /// Opens the journal at `path`, creating it if needed, and replays it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ExamError::storage(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| ExamError::storage(&path, e))?;

        let (records, committed_len) = Self::replay(&path, &mut file)?;
        info!(path = %path.display(), records = records.len(), "exam journal replayed");
        Ok(Self {
            path,
            records: RwLock::new(records),
            journal: Mutex::new(Journal {
                file,
                committed_len,
            }),
        })
    }

    /// Rebuilds the records from the journal. An unterminated final line is
    /// what an interrupted append leaves behind: it is truncated away. Any
    /// other unreadable line, or a gap in the ids, is an error.
    fn replay(path: &Path, file: &mut File) -> Result<(Vec<ExamRecord>, u64)> {
        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(|e| ExamError::storage(path, e))?;

        let committed_len = raw.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        if committed_len < raw.len() {
            warn!(
                path = %path.display(),
                torn_bytes = raw.len() - committed_len,
                "discarding an incomplete record at the end of the journal"
            );
            file.set_len(committed_len as u64).map_err(|e| ExamError::storage(path, e))?;
        }

        let mut records: Vec<ExamRecord> = Vec::new();
        for (index, line) in raw[..committed_len].split(|b| *b == b'\n').enumerate() {
            if line.trim_ascii().is_empty() {
                continue;
            }
            let record: ExamRecord = serde_json::from_slice(line).map_err(|e| {
                ExamError::Registry(format!("{} line {}: {e}", path.display(), index + 1))
            })?;
            let expected = next_id(&records);
            if record.id != expected {
                return Err(ExamError::Registry(format!(
                    "{} line {}: expected exam {expected}, found exam {}",
                    path.display(),
                    index + 1,
                    record.id
                )));
            }
            records.push(record);
        }
        Ok((records, committed_len as u64))
    }
}

impl ExamRegistry for FileRegistry {
    fn append(&self, draft: ExamDraft) -> Result<ExamRecord> {
        let mut records = self.records.write();
        let record = ExamRecord::from_draft(next_id(&records), draft);

        let mut line = serde_json::to_vec(&record).map_err(|e| ExamError::Registry(e.to_string()))?;
        line.push(b'\n');
        self.journal
            .lock()
            .append_line(&line)
            .map_err(|e| ExamError::storage(&self.path, e))?;

        records.push(record.clone());
        debug!(exam_id = record.id, "exam journaled");
        Ok(record)
    }

    fn list(&self) -> Vec<ExamRecord> {
        self.records.read().clone()
    }

    fn get(&self, id: ExamId) -> Result<ExamRecord> {
        lookup(&self.records.read(), id)
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }

    fn is_durable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::asset_store::{AssetRef, StorageArea};
    use crate::core_modules::exam_record::{Confidence, ExamStatus};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn draft(name: &str) -> ExamDraft {
        ExamDraft {
            original_asset: AssetRef::new(StorageArea::Originals, name),
            result_asset: AssetRef::new(StorageArea::Results, format!("result_{name}")),
            patient_alias: None,
            confidence: Confidence::new(92).unwrap(),
        }
    }

    fn assert_contiguous(records: &[ExamRecord], expected: usize) {
        assert_eq!(records.len(), expected);
        let ids: Vec<ExamId> = records.iter().map(|r| r.id).collect();
        let wanted: Vec<ExamId> = (1..=expected as ExamId).collect();
        assert_eq!(ids, wanted);
    }

    #[test]
    fn first_append_gets_id_one() {
        let registry = MemoryRegistry::new();
        assert!(registry.is_empty());
        let record = registry.append(draft("a.png")).unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.status, ExamStatus::PendingReview);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn list_preserves_insertion_order() {
        let registry = MemoryRegistry::new();
        for name in ["a.png", "b.png", "c.png"] {
            registry.append(draft(name)).unwrap();
        }
        let keys: Vec<String> = registry
            .list()
            .into_iter()
            .map(|r| r.original_asset.key)
            .collect();
        assert_eq!(keys, ["a.png", "b.png", "c.png"]);
        assert_contiguous(&registry.list(), 3);
    }

    #[test]
    fn get_misses_are_not_found() {
        let registry = MemoryRegistry::new();
        registry.append(draft("a.png")).unwrap();
        assert_eq!(registry.get(1).unwrap().original_asset.key, "a.png");
        assert!(matches!(registry.get(0), Err(ExamError::NotFound(_))));
        assert!(matches!(registry.get(2), Err(ExamError::NotFound(_))));
    }

    #[test]
    fn concurrent_appends_yield_distinct_contiguous_ids() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 25;
        let registry = Arc::new(MemoryRegistry::new());

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|i| registry.append(draft(&format!("{t}-{i}.png"))).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut returned = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(returned.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(returned.len(), THREADS * PER_THREAD);
        assert_contiguous(&registry.list(), THREADS * PER_THREAD);
    }

    #[test]
    fn memory_registry_is_volatile() {
        assert!(!MemoryRegistry::new().is_durable());
    }

    #[test]
    fn file_registry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal").join("exams.jsonl");
        {
            let registry = FileRegistry::open(&path).unwrap();
            assert!(registry.is_durable());
            registry.append(draft("a.png")).unwrap();
            registry.append(draft("b.png")).unwrap();
        }
        let reopened = FileRegistry::open(&path).unwrap();
        assert_contiguous(&reopened.list(), 2);
        assert_eq!(reopened.get(2).unwrap().original_asset.key, "b.png");
        assert_eq!(reopened.append(draft("c.png")).unwrap().id, 3);
    }

    #[test]
    fn file_registry_rejects_a_journal_with_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams.jsonl");
        let record = ExamRecord::from_draft(2, draft("a.png"));
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&record).unwrap())).unwrap();

        let err = FileRegistry::open(&path).unwrap_err();
        assert!(matches!(err, ExamError::Registry(_)));
    }

    #[test]
    fn file_registry_rejects_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(matches!(FileRegistry::open(&path), Err(ExamError::Registry(_))));
    }

    #[test]
    fn concurrent_file_appends_stay_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams.jsonl");
        let registry = Arc::new(FileRegistry::open(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        registry.append(draft(&format!("{t}-{i}.png"))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_contiguous(&registry.list(), 40);
        drop(registry);
        assert_contiguous(&FileRegistry::open(&path).unwrap().list(), 40);
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn file_registry_drops_a_torn_last_line_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams.jsonl");
        {
            let registry = FileRegistry::open(&path).unwrap();
            registry.append(draft("a.png")).unwrap();
        }
        let committed = std::fs::metadata(&path).unwrap().len();
        append_raw(&path, br#"{"id":2,"original_as"#);

        let reopened = FileRegistry::open(&path).unwrap();
        assert_contiguous(&reopened.list(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed);
        assert_eq!(reopened.append(draft("b.png")).unwrap().id, 2);
        drop(reopened);
        assert_contiguous(&FileRegistry::open(&path).unwrap().list(), 2);
    }

    #[test]
    fn file_registry_cuts_leftover_bytes_before_the_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exams.jsonl");
        let registry = FileRegistry::open(&path).unwrap();
        registry.append(draft("a.png")).unwrap();
        // What a write that failed halfway leaves behind.
        append_raw(&path, br#"{"id":2,"orig"#);

        assert_eq!(registry.append(draft("b.png")).unwrap().id, 2);
        drop(registry);

        let reopened = FileRegistry::open(&path).unwrap();
        assert_contiguous(&reopened.list(), 2);
        assert_eq!(reopened.get(2).unwrap().original_asset.key, "b.png");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failed_journal_write_publishes_nothing() {
        let path = PathBuf::from("/dev/full");
        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let registry = FileRegistry {
            path,
            records: RwLock::new(Vec::new()),
            journal: Mutex::new(Journal {
                file,
                committed_len: 0,
            }),
        };

        let err = registry.append(draft("a.png")).unwrap_err();

        assert!(matches!(err, ExamError::StorageFailure { .. }));
        assert!(registry.is_empty());
        assert!(matches!(registry.get(1), Err(ExamError::NotFound(_))));
    }
}
