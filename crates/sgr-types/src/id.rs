use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// 128-bit identifier for nodes, revisions and branches.
///
/// Unique ids identify one concrete version of a node document. Shared ids
/// identify the logical element across revisions. The nil value means
/// "not assigned".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoUuid(uuid::Uuid);

impl RepoUuid {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The nil identifier (all zeros).
    pub const fn nil() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Branch id of the default "master" lineage.
    pub const fn master_branch() -> Self {
        Self::nil()
    }

    /// Returns `true` if this is the nil identifier.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 hex characters).
    pub fn short_id(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }

    /// Parse from the hyphenated or simple string form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidUuid(format!("{s}: {e}")))
    }
}

impl Default for RepoUuid {
    fn default() -> Self {
        Self::nil()
    }
}

impl FromStr for RepoUuid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Debug for RepoUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoUuid({})", self.short_id())
    }
}

impl fmt::Display for RepoUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<uuid::Uuid> for RepoUuid {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}
