use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::types::metadata::{MetadataCatalogue, MetadataFilter},
    utils::config::FILTER_FILE_NAME,
};

/// Persists the active metadata filter next to the ledger.
#[derive(Debug, Clone)]
pub struct MetadataFilterStore {
    path: PathBuf,
}

impl MetadataFilterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(FILTER_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active filter, or an empty one when the file is missing or unreadable.
    pub async fn read(&self) -> MetadataFilter {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return MetadataFilter::default()
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Could not read filter file");
                return MetadataFilter::default();
            }
        };

        if bytes.is_empty() {
            return MetadataFilter::default();
        }

        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(path = %self.path.display(), error = %err, "Ignoring malformed filter file");
            MetadataFilter::default()
        })
    }

    /// Replaces the stored filter entirely.
    pub async fn write(&self, filter: &MetadataFilter) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(filter)?).await?;
        Ok(())
    }

    /// Drops whitelisted values no longer present in `catalogue`, rewriting
    /// the file only when something changed.
    pub async fn prune_stale(
        &self,
        catalogue: &MetadataCatalogue,
    ) -> Result<MetadataFilter, AppError> {
        let current = self.read().await;
        let pruned = current.pruned(catalogue);

        if pruned != current {
            info!(
                before = current.0.len(),
                after = pruned.0.len(),
                "Pruned stale values from the active filter"
            );
            self.write(&pruned).await?;
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn missing_or_malformed_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let store = MetadataFilterStore::in_dir(dir.path());

        assert!(store.read().await.0.is_empty());

        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(store.read().await.0.is_empty());
    }

    #[tokio::test]
    async fn write_overwrites_instead_of_merging() {
        let dir = tempdir().unwrap();
        let store = MetadataFilterStore::in_dir(dir.path());

        let first = MetadataFilter::new()
            .with_clause("year", vec![json!("2024")])
            .with_clause("team", vec![json!("a")]);
        store.write(&first).await.unwrap();
        assert_eq!(store.read().await, first);

        let second = MetadataFilter::new().with_clause("region", vec![json!("eu")]);
        store.write(&second).await.unwrap();
        assert_eq!(store.read().await, second);

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw, json!({"region": {"$in": ["eu"]}}));
    }

    #[tokio::test]
    async fn prune_stale_only_rewrites_on_change() {
        let dir = tempdir().unwrap();
        let store = MetadataFilterStore::in_dir(dir.path());
        let filter = MetadataFilter::new().with_clause("year", vec![json!("2023"), json!("2024")]);
        store.write(&filter).await.unwrap();

        let catalogue: MetadataCatalogue = [(
            "year".to_string(),
            vec![json!("2023"), json!("2024")],
        )]
        .into_iter()
        .collect();
        let modified_before = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        assert_eq!(store.prune_stale(&catalogue).await.unwrap(), filter);
        let modified_after = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        assert_eq!(modified_before, modified_after);

        let shrunk: MetadataCatalogue = [("year".to_string(), vec![json!("2024")])]
            .into_iter()
            .collect();
        let pruned = store.prune_stale(&shrunk).await.unwrap();
        assert_eq!(
            pruned,
            MetadataFilter::new().with_clause("year", vec![json!("2024")])
        );
        assert_eq!(store.read().await, pruned);
    }
}
