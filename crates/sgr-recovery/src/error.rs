use sgr_blob::BlobError;
use sgr_scene::SceneError;
use sgr_store::StoreError;

/// Errors that stop a recovery pass.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),
}

pub type RecoveryResult<T> = std::result::Result<T, RecoveryError>;
