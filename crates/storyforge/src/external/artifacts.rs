//! Local durable storage for materialized artifacts.

use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::MaterializationError;
use crate::external::ArtifactStore;
use crate::project::ArtifactList;

/// Builds `{project}/{images|videos}/shot_{nnn}_{millis}.{ext}`.
///
/// The extension is taken from the remote reference when it has one.
pub fn destination_key(
    project_id: &str,
    list: ArtifactList,
    item_key: i64,
    millis: i64,
    remote_ref: &str,
) -> String {
    let default_ext = match list {
        ArtifactList::Images => "png",
        ArtifactList::Videos => "mp4",
    };
    let path = remote_ref.split(['?', '#']).next().unwrap_or_default();
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(default_ext);
    format!(
        "{}/{}/shot_{:03}_{}.{}",
        project_id,
        list.dir_name(),
        item_key,
        millis,
        ext
    )
}

/// Copies or downloads artifacts under a data directory.
pub struct LocalArtifactStore {
    data_dir: PathBuf,
    client: Client,
}

impl LocalArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, MaterializationError> {
        let data_dir = data_dir.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| MaterializationError::Fetch {
                url: String::new(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { data_dir, client })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn target_path(&self, key: &str) -> Result<PathBuf, MaterializationError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(MaterializationError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(relative))
    }

    fn download(&self, url: &str, target: &Path) -> Result<(), MaterializationError> {
        let fetch_err = |reason: String| MaterializationError::Fetch {
            url: url.to_string(),
            reason,
        };
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| fetch_err(e.to_string()))?;
        if bytes.is_empty() {
            return Err(fetch_err("empty body".to_string()));
        }

        let write_err = |source| MaterializationError::Write {
            path: target.to_path_buf(),
            source,
        };
        let mut file = std::fs::File::create(target).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        Ok(())
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn materialize(
        &self,
        remote_ref: &str,
        destination_key: &str,
    ) -> Result<String, MaterializationError> {
        let target = self.target_path(destination_key)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MaterializationError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        if remote_ref.starts_with("http://") || remote_ref.starts_with("https://") {
            self.download(remote_ref, &target)?;
        } else {
            let source = remote_ref.strip_prefix("file://").unwrap_or(remote_ref);
            std::fs::copy(source, &target).map_err(|e| MaterializationError::Fetch {
                url: remote_ref.to_string(),
                reason: e.to_string(),
            })?;
        }

        log::debug!("Materialized {} to {}", remote_ref, target.display());
        Ok(target.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_key_format() {
        assert_eq!(
            destination_key("p1", ArtifactList::Videos, 7, 1700000000123, "https://cdn/x.mp4?sig=1"),
            "p1/videos/shot_007_1700000000123.mp4"
        );
        assert_eq!(
            destination_key("p1", ArtifactList::Images, 12, 5, "https://cdn/img"),
            "p1/images/shot_012_5.png"
        );
        assert_eq!(
            destination_key("p1", ArtifactList::Images, 1, 5, "/tmp/a.jpeg"),
            "p1/images/shot_001_5.jpeg"
        );
    }

    #[test]
    fn test_materialize_copies_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("remote.mp4");
        std::fs::write(&source, b"frames").unwrap();

        let store = LocalArtifactStore::new(dir.path().join("data")).unwrap();
        let stored = store
            .materialize(source.to_str().unwrap(), "p1/videos/shot_001_1.mp4")
            .unwrap();

        assert!(stored.ends_with("p1/videos/shot_001_1.mp4"));
        assert_eq!(std::fs::read(&stored).unwrap(), b"frames");
    }

    #[test]
    fn test_materialize_missing_source_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();
        let err = store
            .materialize("/definitely/not/here.mp4", "p/videos/a.mp4")
            .unwrap_err();
        assert!(matches!(err, MaterializationError::Fetch { .. }));
    }

    #[test]
    fn test_materialize_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path()).unwrap();
        for key in ["../escape.mp4", "/abs/path.mp4", ""] {
            assert!(matches!(
                store.materialize("/tmp/x", key),
                Err(MaterializationError::InvalidKey(_))
            ));
        }
    }
}
