use std::{
    collections::BTreeMap,
    fmt,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    storage::types::metadata::{Metadata, MetadataCatalogue, IDS_KEY},
    utils::config::LEDGER_FILE_NAME,
};

/// Bookkeeping for one ingested file (or file variant).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub metadata: Metadata,
    #[serde(default)]
    pub ids: Vec<String>,
}

impl LedgerEntry {
    pub fn new(metadata: Metadata, ids: Vec<String>) -> Self {
        Self { metadata, ids }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    processed_files: BTreeMap<String, LedgerEntry>,
}

/// Persistent record of which files are in the vector store and under which
/// chunk ids.
///
/// Every mutation rewrites the whole JSON file. A single handle serializes its
/// own read-modify-write cycles; separate handles on the same file do not
/// coordinate.
#[derive(Debug)]
pub struct ProcessedFileLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ProcessedFileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(LEDGER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get_all(&self) -> Result<BTreeMap<String, LedgerEntry>, AppError> {
        Ok(self.load().await?.processed_files)
    }

    pub async fn exists(&self, path: impl AsRef<Path>) -> Result<bool, AppError> {
        Ok(self.find_key(path).await?.is_some())
    }

    /// Returns the stored key equivalent to `path`, if any.
    pub async fn find_key(&self, path: impl AsRef<Path>) -> Result<Option<String>, AppError> {
        let ledger = self.load().await?;
        Ok(equivalent_key(&ledger.processed_files, path.as_ref()).cloned())
    }

    /// Upserts the entry for `path`, keyed by the path with its extension stripped.
    pub async fn put(&self, path: impl AsRef<Path>, entry: LedgerEntry) -> Result<(), AppError> {
        let key = ledger_key(path.as_ref());
        let _guard = self.write_lock.lock().await;

        let mut ledger = self.load().await?;
        debug!(key = %key, ids = entry.ids.len(), "Recording ledger entry");
        ledger.processed_files.insert(key, entry);
        self.save(&ledger).await
    }

    /// Removes the entry equivalent to `path`; returns whether one was present.
    pub async fn remove(&self, path: impl AsRef<Path>) -> Result<bool, AppError> {
        let path = path.as_ref();
        let _guard = self.write_lock.lock().await;

        let mut ledger = self.load().await?;
        let Some(key) = equivalent_key(&ledger.processed_files, path).cloned() else {
            warn!(path = %path.display(), "File not present in ledger, nothing to remove");
            return Ok(false);
        };

        ledger.processed_files.remove(&key);
        self.save(&ledger).await?;
        debug!(key = %key, "Removed ledger entry");
        Ok(true)
    }

    /// Removes the entry stored under exactly `key`, as returned by `get_all`.
    pub async fn remove_key(&self, key: &str) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().await;

        let mut ledger = self.load().await?;
        if ledger.processed_files.remove(key).is_none() {
            warn!(key = %key, "Key not present in ledger, nothing to remove");
            return Ok(false);
        }
        self.save(&ledger).await?;
        debug!(key = %key, "Removed ledger entry");
        Ok(true)
    }

    /// Deletes the ledger file. The filter file is left untouched.
    pub async fn reset(&self) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Ledger reset");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Distinct metadata values per key across all entries, excluding chunk ids.
    pub async fn metadata_catalogue(&self) -> Result<MetadataCatalogue, AppError> {
        let mut catalogue = MetadataCatalogue::new();
        for entry in self.get_all().await?.into_values() {
            for (key, value) in entry.metadata {
                if key == IDS_KEY {
                    continue;
                }
                let values = catalogue.entry(key).or_default();
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(catalogue)
    }

    pub async fn listing(&self) -> Result<LedgerListing, AppError> {
        Ok(LedgerListing(self.get_all().await?))
    }

    async fn load(&self) -> Result<LedgerFile, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(LedgerFile::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(LedgerFile::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, ledger: &LedgerFile) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_vec_pretty(ledger)?;
        tokio::fs::write(&self.path, serialized).await?;
        Ok(())
    }
}

/// Human-readable dump of the ledger contents.
#[derive(Debug, Clone)]
pub struct LedgerListing(pub BTreeMap<String, LedgerEntry>);

impl fmt::Display for LedgerListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "This database contains:")?;
        for (key, entry) in &self.0 {
            let metadata: BTreeMap<&String, &Value> = entry
                .metadata
                .iter()
                .filter(|(name, _)| name.as_str() != IDS_KEY)
                .collect();
            let rendered = serde_json::to_string(&metadata).map_err(|_| fmt::Error)?;
            writeln!(f, "  {key}: {rendered} ({} chunks)", entry.ids.len())?;
        }
        Ok(())
    }
}

/// Ledger key for a path: absolutized, lexically cleaned, extension stripped.
pub fn ledger_key(path: &Path) -> String {
    strip_extension(&normalize(path))
        .to_string_lossy()
        .into_owned()
}

/// Stored key for `path`. A key equal to the normalized path itself wins over
/// one equal to the path without its extension, so `q1.2024` never resolves
/// to `q1`.
fn equivalent_key<'a>(
    entries: &'a BTreeMap<String, LedgerEntry>,
    path: &Path,
) -> Option<&'a String> {
    let candidate = normalize(path);
    let stripped = strip_extension(&candidate);
    let normalized: Vec<(&String, PathBuf)> = entries
        .keys()
        .map(|key| (key, normalize(Path::new(key))))
        .collect();

    normalized
        .iter()
        .find(|(_, key)| *key == candidate)
        .or_else(|| normalized.iter().find(|(_, key)| *key == stripped))
        .map(|(key, _)| *key)
}

fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut cleaned = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                cleaned.pop();
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

fn strip_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    fn entry(pairs: &[(&str, Value)], ids: &[&str]) -> LedgerEntry {
        LedgerEntry::new(
            pairs
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
            ids.iter().map(ToString::to_string).collect(),
        )
    }

    #[tokio::test]
    async fn put_then_exists_tolerates_extension_and_dot_segments() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let report = dir.path().join("reports").join("q1.pdf");

        assert!(!ledger.exists(&report).await.unwrap());
        ledger
            .put(&report, entry(&[("year", json!("2024"))], &["a", "b"]))
            .await
            .unwrap();

        assert!(ledger.exists(&report).await.unwrap());
        assert!(ledger
            .exists(dir.path().join("reports/./q1.md"))
            .await
            .unwrap());
        assert!(ledger
            .exists(dir.path().join("reports/../reports/q1"))
            .await
            .unwrap());
        assert!(!ledger
            .exists(dir.path().join("reports").join("q2.pdf"))
            .await
            .unwrap());

        let all = ledger.get_all().await.unwrap();
        let key = ledger_key(&report);
        assert!(!key.ends_with(".pdf"));
        assert_eq!(all[&key].ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn file_shape_flattens_metadata_next_to_ids() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let file = dir.path().join("notes.txt");

        ledger
            .put(&file, entry(&[("year", json!("2023"))], &["x"]))
            .await
            .unwrap();

        let raw: Value =
            serde_json::from_slice(&std::fs::read(ledger.path()).unwrap()).unwrap();
        let key = ledger_key(&file);
        assert_eq!(
            raw["processed_files"][key.as_str()],
            json!({"year": "2023", "ids": ["x"]})
        );
    }

    #[tokio::test]
    async fn put_is_last_write_wins() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let file = dir.path().join("doc.txt");

        ledger.put(&file, entry(&[], &["1"])).await.unwrap();
        ledger.put(&file, entry(&[], &["2", "3"])).await.unwrap();

        let all = ledger.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[&ledger_key(&file)].ids.len(), 2);
    }

    #[tokio::test]
    async fn remove_absent_is_a_no_op() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let file = dir.path().join("doc.txt");

        assert!(!ledger.remove(&file).await.unwrap());

        ledger.put(&file, entry(&[], &["1"])).await.unwrap();
        assert!(ledger.remove(&file).await.unwrap());
        assert!(!ledger.exists(&file).await.unwrap());
    }

    #[tokio::test]
    async fn dotted_names_resolve_to_their_own_entry() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let q1 = dir.path().join("q1.pdf");
        let q1_2024 = dir.path().join("q1.2024.pdf");
        ledger
            .put(&q1, entry(&[("year", json!("2023"))], &["a"]))
            .await
            .unwrap();
        ledger
            .put(&q1_2024, entry(&[("year", json!("2024"))], &["b"]))
            .await
            .unwrap();

        assert_eq!(
            ledger.find_key(&q1_2024).await.unwrap(),
            Some(ledger_key(&q1_2024))
        );
        assert!(ledger.remove(ledger_key(&q1_2024)).await.unwrap());

        let remaining: Vec<String> = ledger.get_all().await.unwrap().into_keys().collect();
        assert_eq!(remaining, vec![ledger_key(&q1)]);
    }

    #[tokio::test]
    async fn remove_key_matches_exactly() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let q1 = dir.path().join("q1.pdf");
        let q1_2024 = dir.path().join("q1.2024.pdf");
        ledger.put(&q1, entry(&[], &["a"])).await.unwrap();
        ledger.put(&q1_2024, entry(&[], &["b"])).await.unwrap();

        assert!(!ledger.remove_key("q1").await.unwrap());
        assert!(ledger.remove_key(&ledger_key(&q1_2024)).await.unwrap());

        assert!(ledger.exists(&q1).await.unwrap());
        assert!(!ledger.exists(&q1_2024).await.unwrap());
    }

    #[tokio::test]
    async fn catalogue_collects_distinct_values_and_skips_ids() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());

        ledger
            .put(dir.path().join("a.txt"), entry(&[("year", json!("2023"))], &["1"]))
            .await
            .unwrap();
        ledger
            .put(dir.path().join("b.txt"), entry(&[("year", json!("2023"))], &["2"]))
            .await
            .unwrap();
        ledger
            .put(dir.path().join("c.txt"), entry(&[("year", json!("2024"))], &["3"]))
            .await
            .unwrap();

        let catalogue = ledger.metadata_catalogue().await.unwrap();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue["year"], vec![json!("2023"), json!("2024")]);
    }

    #[tokio::test]
    async fn reset_removes_the_file_and_listing_renders_entries() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedFileLedger::in_dir(dir.path());
        let file = dir.path().join("doc.txt");
        ledger
            .put(&file, entry(&[("year", json!("2024"))], &["1"]))
            .await
            .unwrap();

        let listing = ledger.listing().await.unwrap().to_string();
        assert!(listing.starts_with("This database contains:\n"));
        assert!(listing.contains("{\"year\":\"2024\"} (1 chunks)"));

        ledger.reset().await.unwrap();
        assert!(!ledger.path().exists());
        assert!(ledger.get_all().await.unwrap().is_empty());
        // Resetting twice is fine.
        ledger.reset().await.unwrap();
    }
}
