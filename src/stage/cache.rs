use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    foundation::error::{SpritecastError, SpritecastResult},
    job::model::StageKind,
};

/// Disk-backed map from content hash to a previously computed stage result.
///
/// Layout: `<root>/<stage>/<sha256hex>.json`, holding the stage's result
/// payload verbatim. Entries are additive only; deterministic stages keyed by
/// input bytes stay valid indefinitely, so nothing expires or evicts.
#[derive(Clone, Debug)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// SHA-256 over the full byte content of the artifact. A single changed
    /// byte changes the key.
    pub async fn hash_file(path: &Path) -> SpritecastResult<String> {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            SpritecastError::cache(format!("cannot read '{}': {err}", path.display()))
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub async fn get(
        &self,
        content_hash: &str,
        stage: StageKind,
    ) -> SpritecastResult<Option<serde_json::Value>> {
        let path = self.entry_path(content_hash, stage);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let value = serde_json::from_str(&text).map_err(|err| {
                    SpritecastError::cache(format!(
                        "corrupt entry '{}': {err}",
                        path.display()
                    ))
                })?;
                debug!(%stage, hash = content_hash, "cache hit");
                Ok(Some(value))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SpritecastError::cache(format!(
                "cannot read entry '{}': {err}",
                path.display()
            ))),
        }
    }

    pub async fn put(
        &self,
        content_hash: &str,
        stage: StageKind,
        result: &serde_json::Value,
    ) -> SpritecastResult<()> {
        let path = self.entry_path(content_hash, stage);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                SpritecastError::cache(format!(
                    "cannot create '{}': {err}",
                    parent.display()
                ))
            })?;
        }
        let text = serde_json::to_string_pretty(result)
            .map_err(|err| SpritecastError::cache(format!("unserializable result: {err}")))?;
        tokio::fs::write(&path, text).await.map_err(|err| {
            SpritecastError::cache(format!("cannot write entry '{}': {err}", path.display()))
        })?;
        debug!(%stage, hash = content_hash, "cache write");
        Ok(())
    }

    fn entry_path(&self, content_hash: &str, stage: StageKind) -> PathBuf {
        self.root
            .join(stage.as_str())
            .join(format!("{content_hash}.json"))
    }
}
