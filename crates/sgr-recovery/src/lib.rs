//! Crash and partial-failure recovery for scene graph revisions.
//!
//! A commit writes its revision record before the derived stages run, and
//! the record's upload status names the stage it reached. [`SceneCleaner`]
//! scans a project's history for records left short of COMPLETE:
//!
//! - GEN_DEFAULT: the base write did not finish. The revision's own nodes,
//!   their blob files, its stash nodes, its original files and finally the
//!   record itself are removed.
//! - GEN_REPO_STASH, GEN_WEB_STASH, GEN_SEL_TREE: the base graph is intact.
//!   The scene is reloaded at that revision and the derived stages run again
//!   from the recorded one. A failing stage leaves the status for the next
//!   pass.
//!
//! Records with an unknown status are reported and left alone.

pub mod cleaner;
pub mod error;

pub use cleaner::{RecoveryReport, SceneCleaner};
pub use error::{RecoveryError, RecoveryResult};
