//! Foundation types for the scene graph repository.
//!
//! Every other `sgr-*` crate depends on `sgr-types` for identifiers and the
//! small value types that appear in stored documents.
//!
//! # Key Types
//!
//! - [`RepoUuid`] -- 128-bit identifier used for unique ids, shared ids,
//!   revision ids and branch ids
//! - [`DataRef`] -- byte range `{file, start, size}` inside a packed blob file
//! - [`Vector3d`], [`Matrix4`], [`BoundingBox`] -- double-precision geometry
//!   used for world offsets and scene bounds

pub mod data_ref;
pub mod error;
pub mod geometry;
pub mod id;
pub mod names;

pub use data_ref::DataRef;
pub use error::TypeError;
pub use geometry::{BoundingBox, Matrix4, Vector3d};
pub use id::RepoUuid;
pub use names::sanitize_name;
