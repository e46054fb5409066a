//! Moves a document's binary fields into one packed buffer and back.
//!
//! A document that owns externalized binaries carries a reference block:
//!
//! ```text
//! _blobRef: {
//!     elements: { <field>: { start, size }, ... },
//!     buffer:   { name, start, size }
//! }
//! ```
//!
//! `elements` offsets are relative to the packed buffer; `buffer` locates
//! that buffer inside a blob file (its `name` is the blob reference id).

use serde_json::{json, Map, Value};
use sgr_store::Document;
use sgr_types::DataRef;

use crate::error::{BlobError, BlobResult};
use crate::packer::BlobFilePacker;

/// Field holding the binary-reference block.
pub const BLOB_REF_FIELD: &str = "_blobRef";
const ELEMENTS_FIELD: &str = "elements";
const BUFFER_FIELD: &str = "buffer";

/// Output of [`pack`].
#[derive(Clone, Debug, PartialEq)]
pub struct PackedDocument {
    /// The input document without its binary fields.
    pub document: Document,
    /// Field name -> `{start, size}` within `buffer`.
    pub elements: Map<String, Value>,
    /// All binary fields concatenated in field-name order.
    pub buffer: Vec<u8>,
}

impl PackedDocument {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Concatenate every binary field of `doc` into one buffer.
///
/// Without binary fields the document comes back unchanged with an empty
/// buffer.
pub fn pack(doc: &Document) -> PackedDocument {
    let mut document = doc.clone();
    let binaries = document.take_binaries();
    let mut elements = Map::new();
    let mut buffer = Vec::with_capacity(binaries.values().map(Vec::len).sum());
    for (name, data) in binaries {
        elements.insert(name, json!({ "start": buffer.len(), "size": data.len() }));
        buffer.extend_from_slice(&data);
    }
    PackedDocument {
        document,
        elements,
        buffer,
    }
}

/// Install the reference block, replacing the fields it covers.
///
/// Every other field is preserved. In-memory binaries still attached to the
/// document are dropped; they now live behind `file_ref`.
pub fn externalize(doc: &mut Document, file_ref: &DataRef, elements: Map<String, Value>) {
    doc.take_binaries();
    for name in elements.keys() {
        doc.remove(name);
    }
    let buffer = json!({
        "name": file_ref.file_name,
        "start": file_ref.start_pos,
        "size": file_ref.size,
    });
    doc.set(
        BLOB_REF_FIELD,
        json!({ ELEMENTS_FIELD: Value::Object(elements), BUFFER_FIELD: buffer }),
    );
}

/// The blob file range a document's reference block points at.
pub fn blob_reference(doc: &Document) -> BlobResult<Option<DataRef>> {
    let Some(block) = doc.get(BLOB_REF_FIELD) else {
        return Ok(None);
    };
    let context = || doc.id_key().unwrap_or_else(|| "<no id>".into());
    let buffer = block
        .get(BUFFER_FIELD)
        .ok_or_else(|| BlobError::corrupt(context(), "reference block has no buffer"))?;
    let name = buffer
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| BlobError::corrupt(context(), "buffer has no file name"))?;
    let (start, size) = range_of(buffer).ok_or_else(|| BlobError::corrupt(context(), "buffer has no range"))?;
    Ok(Some(DataRef::new(name, start, size)))
}

/// Field names covered by a document's reference block.
pub fn element_names(doc: &Document) -> Vec<String> {
    doc.get(BLOB_REF_FIELD)
        .and_then(|b| b.get(ELEMENTS_FIELD))
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

/// Slice each referenced field out of `fetched` and attach it to `doc`.
///
/// `fetched` holds the bytes of the block's `buffer` range. A range outside
/// it is data corruption.
pub fn hydrate(doc: &mut Document, fetched: &[u8]) -> BlobResult<()> {
    let context = doc.id_key().unwrap_or_else(|| "<no id>".into());
    let elements = doc
        .get(BLOB_REF_FIELD)
        .ok_or_else(|| BlobError::corrupt(&context, "no reference block"))?
        .get(ELEMENTS_FIELD)
        .and_then(Value::as_object)
        .ok_or_else(|| BlobError::corrupt(&context, "reference block has no elements"))?
        .clone();

    let mut slices = Vec::with_capacity(elements.len());
    for (name, range) in &elements {
        let (start, size) = range_of(range)
            .ok_or_else(|| BlobError::corrupt(&context, format!("element {name} has no range")))?;
        let end = start.checked_add(size).filter(|end| *end <= fetched.len() as u64).ok_or_else(|| {
            BlobError::corrupt(
                &context,
                format!("element {name} [{start}, +{size}) outside {} fetched bytes", fetched.len()),
            )
        })?;
        slices.push((name.clone(), fetched[start as usize..end as usize].to_vec()));
    }
    for (name, data) in slices {
        doc.set_binary(name, data);
    }
    Ok(())
}

fn range_of(value: &Value) -> Option<(u64, u64)> {
    Some((value.get("start")?.as_u64()?, value.get("size")?.as_u64()?))
}

// ---------------------------------------------------------------------------
// Packer-backed helpers
// ---------------------------------------------------------------------------

/// Pack `doc`'s binaries into `packer` and install the reference block.
///
/// Returns `false` if the document had no binaries.
pub fn write_binaries(packer: &mut BlobFilePacker, doc: &mut Document) -> BlobResult<bool> {
    if !doc.has_binaries() {
        return Ok(false);
    }
    let packed = pack(doc);
    let file_ref = packer.insert_binary(&packed.buffer)?;
    *doc = packed.document;
    externalize(doc, &file_ref, packed.elements);
    Ok(true)
}

/// Fetch and attach `doc`'s externalized binaries through `packer`.
///
/// Returns `false` if the document has no reference block.
pub fn load_binaries(packer: &mut BlobFilePacker, doc: &mut Document) -> BlobResult<bool> {
    let Some(file_ref) = blob_reference(doc)? else {
        return Ok(false);
    };
    let fetched = packer.read_to_buffer(&file_ref)?;
    hydrate(doc, &fetched)?;
    Ok(true)
}
