use cluster::RemoteStore;
use futures::stream::{self, StreamExt};
use sifherd_core::BuildKey;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};

/// What the remote store said about one artifact this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    /// The probe failed; nothing may be concluded for this key.
    Unknown,
}

/// Per-key artifact presence for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteIndex {
    entries: HashMap<BuildKey, Presence>,
}

impl RemoteIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: BuildKey, presence: Presence) {
        self.entries.insert(key, presence);
    }

    /// Keys that were never probed are `Unknown`.
    pub fn presence(&self, key: &BuildKey) -> Presence {
        self.entries.get(key).copied().unwrap_or(Presence::Unknown)
    }

    pub fn is_present(&self, key: &BuildKey) -> bool {
        self.presence(key) == Presence::Present
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, presence: Presence) -> usize {
        self.entries.values().filter(|p| **p == presence).count()
    }
}

impl FromIterator<(BuildKey, Presence)> for RemoteIndex {
    fn from_iter<I: IntoIterator<Item = (BuildKey, Presence)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Where artifacts live on the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    containers_path: String,
    artifact_name: String,
}

impl RemoteLayout {
    pub fn new(containers_path: impl Into<String>, artifact_name: impl Into<String>) -> Self {
        let containers_path: String = containers_path.into();
        Self {
            containers_path: containers_path.trim_end_matches('/').to_string(),
            artifact_name: artifact_name.into(),
        }
    }

    pub fn root(&self) -> &str {
        &self.containers_path
    }

    /// `<containers_path>/<entity>/<version>/<artifact_name>`
    pub fn artifact_path(&self, key: &BuildKey) -> String {
        format!(
            "{}/{}/{}/{}",
            self.containers_path,
            key.entity(),
            key.version(),
            self.artifact_name
        )
    }
}

/// Builds a [`RemoteIndex`] by probing the remote store.
pub struct RemoteProbe {
    store: Arc<dyn RemoteStore>,
    layout: RemoteLayout,
    max_parallel: usize,
}

impl RemoteProbe {
    pub fn new(store: Arc<dyn RemoteStore>, layout: RemoteLayout, max_parallel: usize) -> Self {
        Self {
            store,
            layout,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Check the containers root, creating it when missing.
    ///
    /// Returns whether the root already existed. Any failure here means the
    /// store is unreachable and the cycle must not proceed.
    pub async fn ensure_root(&self) -> Result<bool> {
        let root = self.layout.root();
        let exists = self.store.directory_exists(root).await.map_err(|e| {
            OrchestratorError::RemoteUnreachable(format!("checking {}: {}", root, e))
        })?;

        if exists {
            return Ok(true);
        }

        info!(root, "Containers root missing on remote store, creating it");
        self.store.create_directory(root).await.map_err(|e| {
            OrchestratorError::RemoteUnreachable(format!("creating {}: {}", root, e))
        })?;
        Ok(false)
    }

    /// Probe artifact presence for `keys`.
    pub async fn probe<'a>(&self, keys: impl IntoIterator<Item = &'a BuildKey>) -> Result<RemoteIndex> {
        let keys: BTreeSet<BuildKey> = keys.into_iter().cloned().collect();

        if !self.ensure_root().await? {
            return Ok(keys.into_iter().map(|key| (key, Presence::Absent)).collect());
        }

        let index: RemoteIndex = stream::iter(keys)
            .map(|key| async move {
                let path = self.layout.artifact_path(&key);
                let presence = match self.store.file_exists(&path).await {
                    Ok(true) => Presence::Present,
                    Ok(false) => Presence::Absent,
                    Err(e) => {
                        warn!(key = %key, path = %path, error = %e, "Artifact probe failed");
                        Presence::Unknown
                    }
                };
                (key, presence)
            })
            .buffer_unordered(self.max_parallel)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect();

        debug!(
            present = index.count(Presence::Present),
            absent = index.count(Presence::Absent),
            unknown = index.count(Presence::Unknown),
            "Probed remote store"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster::MemoryRemoteStore;

    fn key(entity: &str) -> BuildKey {
        BuildKey::new(entity, "1.0").unwrap()
    }

    fn probe(store: Arc<MemoryRemoteStore>) -> RemoteProbe {
        RemoteProbe::new(
            store,
            RemoteLayout::new("/data/containers/", "container.sif"),
            4,
        )
    }

    #[test]
    fn test_artifact_path() {
        let layout = RemoteLayout::new("/data/containers/", "container.sif");
        assert_eq!(
            layout.artifact_path(&key("algoX")),
            "/data/containers/algoX/1.0/container.sif"
        );
        assert_eq!(layout.root(), "/data/containers");
    }

    #[test]
    fn test_unprobed_key_is_unknown() {
        let index = RemoteIndex::new();
        assert_eq!(index.presence(&key("a")), Presence::Unknown);
        assert!(!index.is_present(&key("a")));
    }

    #[tokio::test]
    async fn test_probe_mixed() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.add_file("/data/containers/a/1.0/container.sif");
        store.add_directory("/data/containers/b");
        store.fail_path("/data/containers/c/1.0/container.sif");

        let keys = vec![key("a"), key("b"), key("c")];
        let index = probe(store).probe(&keys).await.unwrap();

        assert_eq!(index.presence(&key("a")), Presence::Present);
        assert_eq!(index.presence(&key("b")), Presence::Absent);
        assert_eq!(index.presence(&key("c")), Presence::Unknown);
    }

    #[tokio::test]
    async fn test_missing_root_created() {
        let store = Arc::new(MemoryRemoteStore::new());

        let keys = vec![key("a"), key("b")];
        let index = probe(store.clone()).probe(&keys).await.unwrap();

        assert!(store.has_directory("/data/containers"));
        assert_eq!(index.count(Presence::Absent), 2);
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.set_unreachable(true);

        let err = probe(store).probe(&[key("a")]).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::RemoteUnreachable(_)));
    }
}
