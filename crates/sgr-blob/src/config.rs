use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cap on one packed blob file (100 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Transformation applied to file contents before they reach the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    None,
    Zstd,
}

impl Encoding {
    /// Value recorded in a blob reference's `encoding` metadata field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zstd => "zstd",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// Blob storage settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Root directory of the filesystem backend.
    pub fs_root: PathBuf,
    /// Number of hashed directory levels above each file.
    pub hierarchy_depth: u32,
    /// Cap on one packed blob file, in bytes.
    pub max_file_size: u64,
    /// Attempts per file write before giving up.
    pub write_attempts: u32,
    /// Fixed pause between write attempts, in milliseconds.
    pub retry_backoff_ms: u64,
    pub encoding: Encoding,
}

impl BlobConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            fs_root: PathBuf::from("blobs"),
            hierarchy_depth: 2,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            write_attempts: 3,
            retry_backoff_ms: 100,
            encoding: Encoding::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = BlobConfig::default();
        assert_eq!(c.max_file_size, 100 * 1024 * 1024);
        assert_eq!(c.hierarchy_depth, 2);
        assert_eq!(c.write_attempts, 3);
        assert_eq!(c.retry_backoff(), Duration::from_millis(100));
        assert_eq!(c.encoding, Encoding::None);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let c: BlobConfig = toml::from_str(
            r#"
            fs_root = "/var/lib/sgr"
            encoding = "zstd"
            "#,
        )
        .unwrap();
        assert_eq!(c.fs_root, PathBuf::from("/var/lib/sgr"));
        assert_eq!(c.encoding, Encoding::Zstd);
        assert_eq!(c.write_attempts, 3);
    }

    #[test]
    fn encoding_names_roundtrip() {
        for e in [Encoding::None, Encoding::Zstd] {
            assert_eq!(Encoding::parse(e.as_str()), Some(e));
        }
        assert_eq!(Encoding::parse("gzip"), None);
    }
}
