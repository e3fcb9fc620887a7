// THEORY:
// The `AssetStore` owns the two storage areas of the pipeline: "originals", where
// uploads land exactly as received, and "results", where composited overlays are
// written. Everything the rest of the system knows about a stored file is an
// `AssetRef`: an area plus a flat key. Nothing outside this module builds paths.
//
// Key architectural principles:
// 1.  **Flat keys**: A key is always a single path component. Filenames coming
//     from uploads are reduced to their final component before use, and
//     retrieval refuses any key that is not already in that form, so a reference
//     can never escape its storage area.
// 2.  **Whole-file writes**: Bytes are written to a private temp file in the
//     target area, synced, and then renamed over the key. The area directory is
//     synced after the rename, so once `put` returns the asset survives a crash.
//     Two writers racing on the same key never interleave bytes; the last rename
//     wins.
// 3.  **Fresh result keys**: Originals are keyed by filename (last-write-wins on
//     collision). Results carry a per-store sequence number in their key, so each
//     analysis writes a new result asset even when filenames repeat. The sequence
//     resumes past any result files already present when the store is opened.

use crate::error::{ExamError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const RESULT_PREFIX: &str = "result_";
const TEMP_PREFIX: &str = ".incoming-";

/// One of the two logical storage areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Originals,
    Results,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Originals => "originals",
            StorageArea::Results => "results",
        }
    }
}

/// A reference to a persisted asset: `originals/<key>` or `results/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub area: StorageArea,
    pub key: String,
}

impl AssetRef {
    pub fn new(area: StorageArea, key: impl Into<String>) -> Self {
        Self {
            area,
            key: key.into(),
        }
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.area.as_str(), self.key)
    }
}

/// Reduces an uploaded filename to a flat storage key.
/// Returns `None` when nothing usable is left (`""`, `".."`, `"/"`).
pub fn storage_key(filename: &str) -> Option<String> {
    let normalized = filename.replace('\\', "/");
    let name = Path::new(&normalized).file_name()?.to_str()?;
    if name.is_empty() || name.starts_with(TEMP_PREFIX) {
        return None;
    }
    Some(name.to_string())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// Makes a completed rename durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Filesystem-backed storage for originals and results.
#[derive(Debug)]
pub struct AssetStore {
    originals_dir: PathBuf,
    results_dir: PathBuf,
    temp_counter: AtomicU64,
    result_counter: AtomicU64,
}

impl AssetStore {
    /// Opens the store, creating both storage areas if they do not exist.
    pub fn open(originals_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Result<Self> {
        let originals_dir = originals_dir.into();
        let results_dir = results_dir.into();
        for dir in [&originals_dir, &results_dir] {
            fs::create_dir_all(dir).map_err(|e| ExamError::storage(dir, e))?;
        }
        let last_result = Self::highest_result_sequence(&results_dir)?;
        debug!(
            originals = %originals_dir.display(),
            results = %results_dir.display(),
            last_result,
            "asset store opened"
        );
        Ok(Self {
            originals_dir,
            results_dir,
            temp_counter: AtomicU64::new(0),
            result_counter: AtomicU64::new(last_result),
        })
    }

    pub fn area_dir(&self, area: StorageArea) -> &Path {
        match area {
            StorageArea::Originals => &self.originals_dir,
            StorageArea::Results => &self.results_dir,
        }
    }

    /// Resolves a reference to its on-disk path.
    pub fn path_of(&self, reference: &AssetRef) -> PathBuf {
        self.area_dir(reference.area).join(&reference.key)
    }

    /// Writes `bytes` under `key`, replacing any asset already stored there.
    pub fn put(&self, area: StorageArea, key: &str, bytes: &[u8]) -> Result<AssetRef> {
        let key = storage_key(key)
            .ok_or_else(|| ExamError::InvalidUpload(format!("unusable storage key '{key}'")))?;
        let dir = self.area_dir(area);
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = dir.join(format!("{TEMP_PREFIX}{seq}-{key}"));
        let final_path = dir.join(&key);

        if let Err(e) = write_synced(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(ExamError::storage(&temp_path, e));
        }
        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(ExamError::storage(&final_path, e));
        }
        sync_dir(dir).map_err(|e| ExamError::storage(dir, e))?;

        let reference = AssetRef::new(area, key);
        debug!(asset = %reference, bytes = bytes.len(), "asset written");
        Ok(reference)
    }

    /// Returns the raw bytes of a stored asset.
    pub fn read(&self, reference: &AssetRef) -> Result<Vec<u8>> {
        if storage_key(&reference.key).as_deref() != Some(reference.key.as_str()) {
            return Err(ExamError::NotFound(format!("asset {reference}")));
        }
        let path = self.path_of(reference);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ExamError::NotFound(format!("asset {reference}")))
            }
            Err(e) => Err(ExamError::storage(path, e)),
        }
    }

    /// Number of assets currently stored in `area`, ignoring in-flight temp files.
    pub fn count(&self, area: StorageArea) -> Result<usize> {
        let dir = self.area_dir(area);
        let entries = fs::read_dir(dir).map_err(|e| ExamError::storage(dir, e))?;
        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| ExamError::storage(dir, e))?;
            let is_temp = entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX);
            if !is_temp && entry.path().is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Claims a fresh result key derived from the original's key.
    /// `scan.jpg` becomes `result_000007_scan.png`.
    pub fn next_result_key(&self, original_key: &str) -> String {
        let seq = self.result_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let stem = Path::new(original_key)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("exam");
        format!("{RESULT_PREFIX}{seq:06}_{stem}.png")
    }

    fn highest_result_sequence(results_dir: &Path) -> Result<u64> {
        let entries = fs::read_dir(results_dir).map_err(|e| ExamError::storage(results_dir, e))?;
        let mut highest = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let seq = name
                .to_str()
                .and_then(|n| n.strip_prefix(RESULT_PREFIX))
                .and_then(|rest| rest.split_once('_'))
                .and_then(|(digits, _)| digits.parse::<u64>().ok());
            if let Some(seq) = seq {
                highest = highest.max(seq);
            }
        }
        Ok(highest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(root: &Path) -> AssetStore {
        AssetStore::open(root.join("uploads"), root.join("results")).unwrap()
    }

    #[test]
    fn storage_key_keeps_only_the_final_component() {
        assert_eq!(storage_key("scan.png").as_deref(), Some("scan.png"));
        assert_eq!(storage_key("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(storage_key("C:\\scans\\chest.jpg").as_deref(), Some("chest.jpg"));
        assert_eq!(storage_key(""), None);
        assert_eq!(storage_key(".."), None);
        assert_eq!(storage_key("/"), None);
    }

    #[test]
    fn open_creates_both_areas() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        assert!(store.area_dir(StorageArea::Originals).is_dir());
        assert!(store.area_dir(StorageArea::Results).is_dir());
    }

    #[test]
    fn put_then_read_returns_the_same_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let reference = store.put(StorageArea::Originals, "scan.png", b"payload").unwrap();
        assert_eq!(reference.to_string(), "originals/scan.png");
        assert_eq!(store.read(&reference).unwrap(), b"payload");
        assert_eq!(store.count(StorageArea::Originals).unwrap(), 1);
    }

    #[test]
    fn put_overwrites_an_existing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.put(StorageArea::Originals, "scan.png", b"first").unwrap();
        let reference = store.put(StorageArea::Originals, "scan.png", b"second").unwrap();
        assert_eq!(store.read(&reference).unwrap(), b"second");
        assert_eq!(store.count(StorageArea::Originals).unwrap(), 1);
    }

    #[test]
    fn read_of_missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let err = store
            .read(&AssetRef::new(StorageArea::Results, "result_000001_scan.png"))
            .unwrap_err();
        assert!(matches!(err, ExamError::NotFound(_)));
    }

    #[test]
    fn read_refuses_keys_that_leave_the_area() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.put(StorageArea::Results, "secret.png", b"x").unwrap();
        let escaping = AssetRef::new(StorageArea::Originals, "../results/secret.png");
        assert!(matches!(store.read(&escaping), Err(ExamError::NotFound(_))));
    }

    #[test]
    fn result_keys_are_fresh_and_derived_from_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let first = store.next_result_key("scan.jpg");
        let second = store.next_result_key("scan.jpg");
        assert_eq!(first, "result_000001_scan.png");
        assert_eq!(second, "result_000002_scan.png");
    }

    #[test]
    fn result_sequence_resumes_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(dir.path());
            let key = store.next_result_key("scan.png");
            store.put(StorageArea::Results, &key, b"overlay").unwrap();
            let key = store.next_result_key("scan.png");
            store.put(StorageArea::Results, &key, b"overlay").unwrap();
        }
        let reopened = open_store(dir.path());
        assert_eq!(reopened.next_result_key("scan.png"), "result_000003_scan.png");
    }

    #[test]
    fn put_leaves_only_the_final_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        store.put(StorageArea::Results, "overlay.png", b"pixels").unwrap();

        let names: Vec<String> = fs::read_dir(store.area_dir(StorageArea::Results))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["overlay.png".to_string()]);
    }

    #[test]
    fn put_into_a_missing_area_is_a_storage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let results = store.area_dir(StorageArea::Results).to_path_buf();
        fs::remove_dir_all(&results).unwrap();
        fs::write(&results, b"not a directory").unwrap();

        let err = store.put(StorageArea::Results, "overlay.png", b"pixels").unwrap_err();

        assert!(matches!(err, ExamError::StorageFailure { .. }));
    }
}
