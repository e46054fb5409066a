use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sgr_store::{Document, ID_FIELD};
use sgr_types::RepoUuid;

use crate::config::Encoding;
use crate::error::{BlobError, BlobResult};

/// Storage backend that holds a referenced file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Fs,
    S3,
    Gridfs,
    Unknown,
}

impl RefType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fs => "fs",
            Self::S3 => "s3",
            Self::Gridfs => "gridfs",
            Self::Unknown => "unknown",
        }
    }

    /// Parse the stored name; anything unrecognized is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "fs" => Self::Fs,
            "s3" => Self::S3,
            "gridfs" => Self::Gridfs,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Id of a blob reference: a file name or a uuid.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RefId {
    Name(String),
    Uuid(RepoUuid),
}

impl RefId {
    /// The string stored in the reference's `_id`.
    pub fn key(&self) -> String {
        match self {
            Self::Name(name) => name.clone(),
            Self::Uuid(id) => id.to_string(),
        }
    }

    fn from_key(key: String) -> Self {
        match RepoUuid::parse(&key) {
            Ok(id) => Self::Uuid(id),
            Err(_) => Self::Name(key),
        }
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl From<&str> for RefId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<RepoUuid> for RefId {
    fn from(id: RepoUuid) -> Self {
        Self::Uuid(id)
    }
}

const TYPE_FIELD: &str = "type";
const LINK_FIELD: &str = "link";
const SIZE_FIELD: &str = "size";
const NAME_FIELD: &str = "name";
pub(crate) const ENCODING_FIELD: &str = "encoding";
pub(crate) const CHECKSUM_FIELD: &str = "checksum";

/// Record of one stored blob file, kept in `<group>.ref`.
#[derive(Clone, Debug, PartialEq)]
pub struct BlobReference {
    pub id: RefId,
    pub ref_type: RefType,
    /// Backend-specific locator.
    pub link: String,
    /// Stored size in bytes.
    pub size: u64,
    pub name: Option<String>,
    /// Free-form fields, written as top-level keys.
    pub metadata: Map<String, Value>,
}

impl BlobReference {
    /// Encoding applied to the stored bytes.
    pub fn encoding(&self) -> Encoding {
        self.metadata
            .get(ENCODING_FIELD)
            .and_then(Value::as_str)
            .and_then(Encoding::parse)
            .unwrap_or_default()
    }

    /// Hex `blake3` of the stored bytes, if recorded.
    pub fn checksum(&self) -> Option<&str> {
        self.metadata.get(CHECKSUM_FIELD).and_then(Value::as_str)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (k, v) in &self.metadata {
            doc.set(k.clone(), v.clone());
        }
        doc.set(ID_FIELD, self.id.key());
        doc.set(TYPE_FIELD, self.ref_type.as_str());
        doc.set(LINK_FIELD, self.link.clone());
        doc.set(SIZE_FIELD, self.size);
        if let Some(name) = &self.name {
            doc.set(NAME_FIELD, name.clone());
        }
        doc
    }

    pub fn from_document(doc: &Document) -> BlobResult<Self> {
        let context = || doc.id_key().unwrap_or_else(|| "<no id>".into());
        let id = doc
            .id_key()
            .ok_or_else(|| BlobError::corrupt("blob reference", "missing _id"))?;
        let link = doc
            .get_str(LINK_FIELD)
            .ok_or_else(|| BlobError::corrupt(context(), "missing link"))?
            .to_string();
        let size = doc
            .get_u64(SIZE_FIELD)
            .ok_or_else(|| BlobError::corrupt(context(), "missing size"))?;
        let ref_type = doc
            .get_str(TYPE_FIELD)
            .map(RefType::parse)
            .unwrap_or(RefType::Unknown);
        let name = doc.get_str(NAME_FIELD).map(str::to_owned);
        let metadata = doc
            .fields()
            .iter()
            .filter(|(k, _)| {
                ![ID_FIELD, TYPE_FIELD, LINK_FIELD, SIZE_FIELD, NAME_FIELD].contains(&k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            id: RefId::from_key(id),
            ref_type,
            link,
            size,
            name,
            metadata,
        })
    }
}
