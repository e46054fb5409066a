use std::fmt;

use serde::{Deserialize, Serialize};

/// A byte range inside one packed blob file.
///
/// Embedded inline in a document's binary-reference block; never stored as
/// its own database row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataRef {
    /// Name of the blob file (also the id of its blob reference record).
    #[serde(rename = "name")]
    pub file_name: String,
    /// Offset of the first byte within the blob file.
    #[serde(rename = "start")]
    pub start_pos: u64,
    /// Number of bytes.
    pub size: u64,
}

impl DataRef {
    pub fn new(file_name: impl Into<String>, start_pos: u64, size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            start_pos,
            size,
        }
    }

    /// Offset one past the last byte of the range.
    pub fn end_pos(&self) -> u64 {
        self.start_pos + self.size
    }
}

impl fmt::Display for DataRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{}]", self.file_name, self.start_pos, self.end_pos())
    }
}
