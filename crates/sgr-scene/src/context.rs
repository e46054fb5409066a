use std::fmt;
use std::sync::Arc;

use sgr_blob::{BlobFilePacker, FileManager, FsFileHandler, DEFAULT_MAX_FILE_SIZE};
use sgr_store::DatabaseHandler;

use crate::config::{RepoConfig, SceneConfig};
use crate::scene::Scene;

/// Storage collaborators shared by every scene of a process: the database
/// handle, the file manager and the scene settings.
#[derive(Clone)]
pub struct StorageContext {
    files: Arc<FileManager>,
    config: SceneConfig,
    max_blob_file_size: u64,
}

impl StorageContext {
    pub fn new(files: Arc<FileManager>) -> Self {
        Self {
            files,
            config: SceneConfig::default(),
            max_blob_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    /// Wire a filesystem-backed context from a configuration file.
    pub fn from_config(database: Arc<dyn DatabaseHandler>, config: &RepoConfig) -> Self {
        let handler = Arc::new(FsFileHandler::from_config(&config.blob));
        let files = FileManager::new(database, handler).with_encoding(config.blob.encoding);
        Self {
            files: Arc::new(files),
            config: config.scene.clone(),
            max_blob_file_size: config.blob.max_file_size,
        }
    }

    pub fn with_config(mut self, config: SceneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_blob_file_size(mut self, max: u64) -> Self {
        self.max_blob_file_size = max;
        self
    }

    pub fn database(&self) -> &dyn DatabaseHandler {
        self.files.database().as_ref()
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    /// A fresh packer for one unit of work on `group`.
    pub fn packer(&self, database: &str, group: &str) -> BlobFilePacker {
        BlobFilePacker::new(Arc::clone(&self.files), database, group)
            .with_max_file_size(self.max_blob_file_size)
    }

    pub fn collections(&self, project: &str) -> Collections {
        Collections::new(project, &self.config)
    }

    /// An empty scene following the head of the configured default branch.
    pub fn open_scene(&self, database: &str, project: &str) -> Scene {
        Scene::new(database, project).with_branch(self.config.default_branch)
    }
}

impl fmt::Debug for StorageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageContext")
            .field("blob_backend", &self.files.default_ref_type())
            .field("max_blob_file_size", &self.max_blob_file_size)
            .field("config", &self.config)
            .finish()
    }
}

/// Collection names of one project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collections {
    pub scene: String,
    pub stash: String,
    pub history: String,
}

impl Collections {
    pub fn new(project: &str, config: &SceneConfig) -> Self {
        Self {
            scene: join(project, &config.scene_suffix),
            stash: join(project, &config.stash_suffix),
            history: join(project, &config.history_suffix),
        }
    }
}

fn join(project: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        project.to_string()
    } else {
        format!("{project}.{suffix}")
    }
}
