//! Blob storage for the scene graph repository.
//!
//! Large binary payloads (vertex buffers, textures, original model files) are
//! kept out of the document database. This crate provides:
//!
//! - [`FileHandler`] -- the storage backend capability (upload, delete,
//!   fetch, fetch-as-stream), with [`FsFileHandler`] as the primary
//!   filesystem-chunked backend and [`InMemoryFileHandler`] for tests
//! - [`FileManager`] -- uploads through a backend and records a
//!   [`BlobReference`] document per stored file in `<group>.ref`
//! - [`BlobFilePacker`] -- accumulates many small payloads into size-bounded
//!   blob files and hands back [`DataRef`](sgr_types::DataRef) byte ranges
//! - [`resolver`] -- moves a document's binary fields into a packed buffer
//!   and back
//!
//! # Design Rules
//!
//! 1. A blob file is written once, when its packer commits it.
//! 2. Every stored file has exactly one reference document.
//! 3. Malformed binary references are fatal data corruption.

pub mod config;
pub mod error;
pub mod fs;
pub mod handler;
pub mod manager;
pub mod memory;
pub mod packer;
pub mod reference;
pub mod resolver;

pub use config::{BlobConfig, Encoding, DEFAULT_MAX_FILE_SIZE};
pub use error::{BlobError, BlobResult};
pub use fs::FsFileHandler;
pub use handler::{FileHandler, ReadSeek};
pub use manager::FileManager;
pub use memory::InMemoryFileHandler;
pub use packer::BlobFilePacker;
pub use reference::{BlobReference, RefId, RefType};
pub use resolver::{PackedDocument, BLOB_REF_FIELD};
