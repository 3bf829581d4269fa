use async_trait::async_trait;
use regex::Regex;
use sifherd_core::BuildKey;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::Result;

static CONTAINER_VERSION: OnceLock<Regex> = OnceLock::new();

/// Source of the entities that should have an artifact.
#[async_trait]
pub trait EntityCatalog: Send + Sync {
    async fn entities(&self) -> Result<Vec<BuildKey>>;
}

/// Discovers entities from `<algorithms_dir>/<name>/versions.log`.
///
/// The version is the first `container_version: "<v>"` line of the manifest.
#[derive(Debug, Clone)]
pub struct VersionsLogCatalog {
    algorithms_dir: PathBuf,
    excluded: HashSet<String>,
    extra: Vec<BuildKey>,
}

impl VersionsLogCatalog {
    pub fn new(algorithms_dir: impl AsRef<Path>) -> Self {
        Self {
            algorithms_dir: algorithms_dir.as_ref().to_path_buf(),
            excluded: HashSet::new(),
            extra: Vec::new(),
        }
    }

    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = String>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Append a key that is not discovered from a manifest.
    pub fn with_extra(mut self, key: BuildKey) -> Self {
        self.extra.push(key);
        self
    }
}

/// First `container_version: "<v>"` value in a manifest.
pub fn parse_container_version(content: &str) -> Option<String> {
    let pattern = CONTAINER_VERSION.get_or_init(|| {
        Regex::new(r#"container_version:\s*"([^"]*)""#).expect("Invalid container_version regex pattern")
    });

    pattern
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[async_trait]
impl EntityCatalog for VersionsLogCatalog {
    async fn entities(&self) -> Result<Vec<BuildKey>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.algorithms_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || self.excluded.contains(&name) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        let mut keys = Vec::new();
        for name in names {
            let manifest = self.algorithms_dir.join(&name).join("versions.log");
            if !fs::try_exists(&manifest).await? {
                debug!(entity = %name, "No versions.log, skipping");
                continue;
            }

            let content = match fs::read_to_string(&manifest).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Could not read {}: {}", manifest.display(), e);
                    continue;
                }
            };

            let Some(version) = parse_container_version(&content) else {
                warn!("No container_version in {}", manifest.display());
                continue;
            };

            match BuildKey::new(name.as_str(), version.as_str()) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("Skipping {}: {}", manifest.display(), e),
            }
        }

        for key in &self.extra {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }

        info!("Discovered {} entities", keys.len());
        Ok(keys)
    }
}
