use std::path::Path;

use serde::{Deserialize, Serialize};
use sgr_blob::BlobConfig;
use sgr_types::RepoUuid;

use crate::error::{SceneError, SceneResult};

/// Scene persistence settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Most node documents sent in one insert request.
    pub node_batch_size: usize,
    /// Branch used by scenes that do not name one.
    pub default_branch: RepoUuid,
    /// Reject nodes over the database's document size limit before writing.
    pub enforce_size_limit: bool,
    /// Suffix of the node collection; empty means the bare project name.
    pub scene_suffix: String,
    pub stash_suffix: String,
    pub history_suffix: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            node_batch_size: 5000,
            default_branch: RepoUuid::master_branch(),
            enforce_size_limit: true,
            scene_suffix: String::new(),
            stash_suffix: "stash".into(),
            history_suffix: "history".into(),
        }
    }
}

/// Top-level configuration file.
///
/// ```toml
/// [blob]
/// fs_root = "/var/lib/sgr/blobs"
/// hierarchy_depth = 2
///
/// [scene]
/// node_batch_size = 2000
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepoConfig {
    pub blob: BlobConfig,
    pub scene: SceneConfig,
}

impl RepoConfig {
    pub fn from_toml_str(s: &str) -> SceneResult<Self> {
        toml::from_str(s).map_err(|e| SceneError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> SceneResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SceneError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> SceneResult<String> {
        toml::to_string(self).map_err(|e| SceneError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgr_blob::Encoding;

    #[test]
    fn default_config() {
        let c = RepoConfig::default();
        assert_eq!(c.scene.node_batch_size, 5000);
        assert!(c.scene.enforce_size_limit);
        assert_eq!(c.scene.stash_suffix, "stash");
        assert!(c.scene.default_branch.is_nil());
        assert_eq!(c.blob.max_file_size, 100 * 1024 * 1024);
    }

    #[test]
    fn parses_partial_file() {
        let c = RepoConfig::from_toml_str(
            r#"
            [blob]
            hierarchy_depth = 3
            encoding = "zstd"

            [scene]
            node_batch_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(c.blob.hierarchy_depth, 3);
        assert_eq!(c.blob.encoding, Encoding::Zstd);
        assert_eq!(c.scene.node_batch_size, 10);
        assert_eq!(c.scene.history_suffix, "history");
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(RepoConfig::from_toml_str("").unwrap(), RepoConfig::default());
    }

    #[test]
    fn toml_roundtrip() {
        let c = RepoConfig::default();
        let text = c.to_toml_string().unwrap();
        assert_eq!(RepoConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn invalid_file_is_config_error() {
        let err = RepoConfig::from_toml_str("[scene]\nnode_batch_size = \"many\"").unwrap_err();
        assert!(matches!(err, SceneError::Config(_)));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sgr.toml");
        std::fs::write(&path, "[scene]\nnode_batch_size = 7\n").unwrap();
        assert_eq!(RepoConfig::load(&path).unwrap().scene.node_batch_size, 7);
        assert!(RepoConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
