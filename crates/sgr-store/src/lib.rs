//! Document model and database handler interface for the scene graph
//! repository.
//!
//! Scene nodes, revision records and blob references are all stored as
//! schema-flexible documents. This crate defines the [`Document`] value,
//! the abstract [`QueryFilter`] and [`IndexSpec`] consumed by database
//! drivers, and the [`DatabaseHandler`] trait every driver implements.
//!
//! # Storage Backends
//!
//! - [`InMemoryDatabase`] -- `RwLock`-guarded collections for tests and
//!   embedding
//!
//! # Design Rules
//!
//! 1. Binaries attached to a [`Document`] are in-memory only; they must be
//!    externalized into blob files before the document reaches a driver.
//! 2. A driver enforces its maximum document size and reports violations as
//!    [`StoreError::DocumentTooLarge`], distinct from generic failures.
//! 3. Index creation is idempotent.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod document;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

pub use document::{Document, ID_FIELD};
pub use error::{redact_endpoint, StoreError, StoreResult};
pub use memory::InMemoryDatabase;
pub use query::{IndexSpec, QueryFilter, SortOrder};
pub use traits::{DatabaseHandler, DEFAULT_DOCUMENT_SIZE_LIMIT};
