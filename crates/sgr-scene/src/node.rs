use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use sgr_blob::BLOB_REF_FIELD;
use sgr_store::{Document, ID_FIELD};
use sgr_types::{BoundingBox, Matrix4, RepoUuid};

use crate::error::{SceneError, SceneResult};

pub const SHARED_ID_FIELD: &str = "shared_id";
pub const TYPE_FIELD: &str = "type";
pub const PARENTS_FIELD: &str = "parents";
pub const REVISION_ID_FIELD: &str = "rev_id";
pub const NAME_FIELD: &str = "name";
const MATRIX_FIELD: &str = "matrix";
const BOUNDING_BOX_FIELD: &str = "bounding_box";
const REF_OWNER_FIELD: &str = "owner";
const REF_PROJECT_FIELD: &str = "project";
const REF_REVISION_FIELD: &str = "_rid";
const REF_UNIQUE_FIELD: &str = "unique";

/// Node variant tag, stored in the `type` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeType {
    Transformation,
    Mesh,
    Material,
    Texture,
    Metadata,
    Reference,
    Revision,
    Unknown,
}

impl NodeType {
    pub const ALL: [NodeType; 8] = [
        Self::Transformation,
        Self::Mesh,
        Self::Material,
        Self::Texture,
        Self::Metadata,
        Self::Reference,
        Self::Revision,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transformation => "transformation",
            Self::Mesh => "mesh",
            Self::Material => "material",
            Self::Texture => "texture",
            Self::Metadata => "metadata",
            Self::Reference => "ref",
            Self::Revision => "revision",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a Reference node: another project's scene.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReferenceTarget {
    /// Database of the referenced project; `None` means the referencing
    /// scene's own database.
    pub database: Option<String>,
    pub project: String,
    /// A revision id when `is_unique_id`, otherwise a branch id.
    pub revision: RepoUuid,
    pub is_unique_id: bool,
}

impl ReferenceTarget {
    /// Follow the head of `branch` in `project`.
    pub fn branch(project: impl Into<String>, branch: RepoUuid) -> Self {
        Self {
            database: None,
            project: project.into(),
            revision: branch,
            is_unique_id: false,
        }
    }

    /// Pin one revision of `project`.
    pub fn revision(project: impl Into<String>, revision: RepoUuid) -> Self {
        Self {
            database: None,
            project: project.into(),
            revision,
            is_unique_id: true,
        }
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Typed payload of a node.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
    Transformation { matrix: Matrix4 },
    Mesh { bounds: Option<BoundingBox> },
    Material,
    Texture,
    Metadata,
    Reference(ReferenceTarget),
    Revision,
    /// A type this crate does not know, with its stored type name.
    Unknown(String),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Transformation { .. } => NodeType::Transformation,
            Self::Mesh { .. } => NodeType::Mesh,
            Self::Material => NodeType::Material,
            Self::Texture => NodeType::Texture,
            Self::Metadata => NodeType::Metadata,
            Self::Reference(_) => NodeType::Reference,
            Self::Revision => NodeType::Revision,
            Self::Unknown(_) => NodeType::Unknown,
        }
    }

    fn type_name(&self) -> &str {
        match self {
            Self::Unknown(name) => name,
            other => other.node_type().as_str(),
        }
    }
}

/// One element of a scene graph.
///
/// `unique_id` names this version of the node and never changes;
/// `shared_id` names the element across revisions. Fields this crate does
/// not interpret live in `properties`, together with any binary fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    unique_id: RepoUuid,
    shared_id: RepoUuid,
    parents: BTreeSet<RepoUuid>,
    name: Option<String>,
    revision_id: Option<RepoUuid>,
    kind: NodeKind,
    properties: Document,
}

impl Node {
    /// A new node with fresh unique and shared ids.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            unique_id: RepoUuid::new(),
            shared_id: RepoUuid::new(),
            parents: BTreeSet::new(),
            name: None,
            revision_id: None,
            kind,
            properties: Document::new(),
        }
    }

    pub fn transformation(matrix: Matrix4) -> Self {
        Self::new(NodeKind::Transformation { matrix })
    }

    pub fn mesh(bounds: Option<BoundingBox>) -> Self {
        Self::new(NodeKind::Mesh { bounds })
    }

    pub fn material() -> Self {
        Self::new(NodeKind::Material)
    }

    pub fn texture() -> Self {
        Self::new(NodeKind::Texture)
    }

    pub fn metadata() -> Self {
        Self::new(NodeKind::Metadata)
    }

    pub fn reference(target: ReferenceTarget) -> Self {
        Self::new(NodeKind::Reference(target))
    }

    // -----------------------------------------------------------------------
    // Builders
    // -----------------------------------------------------------------------

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_shared_id(mut self, shared_id: RepoUuid) -> Self {
        self.shared_id = shared_id;
        self
    }

    pub fn with_parent(mut self, parent: RepoUuid) -> Self {
        self.parents.insert(parent);
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = RepoUuid>) -> Self {
        self.parents.extend(parents);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.set(key, value);
        self
    }

    pub fn with_binary(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.properties.set_binary(name, data);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn unique_id(&self) -> RepoUuid {
        self.unique_id
    }

    pub fn shared_id(&self) -> RepoUuid {
        self.shared_id
    }

    pub fn parents(&self) -> &BTreeSet<RepoUuid> {
        &self.parents
    }

    /// A node without parents is a root candidate.
    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn revision_id(&self) -> Option<RepoUuid> {
        self.revision_id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn properties(&self) -> &Document {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Document {
        &mut self.properties
    }

    /// The transformation matrix, for Transformation nodes.
    pub fn matrix(&self) -> Option<&Matrix4> {
        match &self.kind {
            NodeKind::Transformation { matrix } => Some(matrix),
            _ => None,
        }
    }

    /// The reference target, for Reference nodes.
    pub fn reference_target(&self) -> Option<&ReferenceTarget> {
        match &self.kind {
            NodeKind::Reference(target) => Some(target),
            _ => None,
        }
    }

    /// Whether binaries of this node live in a blob file.
    pub fn has_blob_reference(&self) -> bool {
        self.properties.contains(BLOB_REF_FIELD)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    pub fn add_parent(&mut self, parent: RepoUuid) -> bool {
        self.parents.insert(parent)
    }

    pub fn remove_parent(&mut self, parent: &RepoUuid) -> bool {
        self.parents.remove(parent)
    }

    pub fn set_parents(&mut self, parents: impl IntoIterator<Item = RepoUuid>) {
        self.parents = parents.into_iter().collect();
    }

    pub fn set_revision_id(&mut self, revision: RepoUuid) {
        self.revision_id = Some(revision);
    }

    /// The same element under a fresh unique id.
    pub fn cloned_with_new_unique_id(&self) -> Self {
        Self {
            unique_id: RepoUuid::new(),
            ..self.clone()
        }
    }

    /// Fold another version of this element into this one.
    ///
    /// Ids stay. With `overwrite` everything else is taken from `other`;
    /// otherwise `other`'s properties, binaries and parents are added on top
    /// and its name and payload replace these.
    pub fn merge_from(&mut self, other: Node, overwrite: bool) {
        self.kind = other.kind;
        if other.name.is_some() || overwrite {
            self.name = other.name;
        }
        if overwrite {
            self.parents = other.parents;
            self.properties = other.properties;
            return;
        }
        self.parents.extend(other.parents);
        let mut props = other.properties;
        for (name, data) in props.take_binaries() {
            self.properties.set_binary(name, data);
        }
        for (k, v) in props.into_fields() {
            self.properties.set(k, v);
        }
    }

    // -----------------------------------------------------------------------
    // Document mapping
    // -----------------------------------------------------------------------

    /// The stored form, including in-memory binaries.
    pub fn to_document(&self) -> Document {
        let mut doc = self.properties.clone();
        doc.set(ID_FIELD, self.unique_id.to_string());
        if !self.shared_id.is_nil() {
            doc.set(SHARED_ID_FIELD, self.shared_id.to_string());
        }
        doc.set(TYPE_FIELD, self.kind.type_name());
        if !self.parents.is_empty() {
            let parents: Vec<Value> = self.parents.iter().map(|p| Value::from(p.to_string())).collect();
            doc.set(PARENTS_FIELD, parents);
        }
        if let Some(rev) = self.revision_id {
            doc.set(REVISION_ID_FIELD, rev.to_string());
        }
        if let Some(name) = &self.name {
            doc.set(NAME_FIELD, name.clone());
        }
        match &self.kind {
            NodeKind::Transformation { matrix } => {
                doc.set(MATRIX_FIELD, rows_value(matrix.to_rows()));
            }
            NodeKind::Mesh { bounds: Some(bounds) } => {
                doc.set(BOUNDING_BOX_FIELD, rows_value(bounds.to_rows()));
            }
            NodeKind::Reference(target) => {
                if let Some(db) = &target.database {
                    doc.set(REF_OWNER_FIELD, db.clone());
                }
                doc.set(REF_PROJECT_FIELD, target.project.clone());
                doc.set(REF_REVISION_FIELD, target.revision.to_string());
                doc.set(REF_UNIQUE_FIELD, target.is_unique_id);
            }
            _ => {}
        }
        doc
    }

    /// Decode a stored node. Unknown type names become [`NodeKind::Unknown`].
    pub fn from_document(mut doc: Document) -> SceneResult<Self> {
        let id_text = doc.id_key().unwrap_or_else(|| "<no id>".into());
        let malformed = |reason: String| SceneError::Malformed {
            id: id_text.clone(),
            reason,
        };

        let unique_id = doc
            .get_uuid(ID_FIELD)
            .map_err(|e| malformed(e.to_string()))?
            .ok_or_else(|| malformed("missing _id".into()))?;
        let shared_id = doc
            .get_uuid(SHARED_ID_FIELD)
            .map_err(|e| malformed(e.to_string()))?
            .unwrap_or_default();
        let parents = doc
            .get_uuid_array(PARENTS_FIELD)
            .map_err(|e| malformed(e.to_string()))?;
        let revision_id = doc
            .get_uuid(REVISION_ID_FIELD)
            .map_err(|e| malformed(e.to_string()))?;
        let name = doc.get_str(NAME_FIELD).map(str::to_owned);
        let type_name = doc.get_str(TYPE_FIELD).unwrap_or("").to_string();

        let kind = match NodeType::parse(&type_name) {
            NodeType::Transformation => {
                let matrix = match doc.get(MATRIX_FIELD) {
                    Some(v) => sgr_types::Matrix4::from_rows(&value_rows(v))
                        .map_err(|e| malformed(e.to_string()))?,
                    None => Matrix4::IDENTITY,
                };
                NodeKind::Transformation { matrix }
            }
            NodeType::Mesh => {
                let bounds = doc
                    .get(BOUNDING_BOX_FIELD)
                    .map(|v| BoundingBox::from_rows(&value_rows(v)))
                    .transpose()
                    .map_err(|e| malformed(e.to_string()))?;
                NodeKind::Mesh { bounds }
            }
            NodeType::Material => NodeKind::Material,
            NodeType::Texture => NodeKind::Texture,
            NodeType::Metadata => NodeKind::Metadata,
            NodeType::Reference => {
                let project = doc
                    .get_str(REF_PROJECT_FIELD)
                    .ok_or_else(|| malformed("reference without project".into()))?
                    .to_string();
                let revision = doc
                    .get_uuid(REF_REVISION_FIELD)
                    .map_err(|e| malformed(e.to_string()))?
                    .unwrap_or_else(RepoUuid::master_branch);
                NodeKind::Reference(ReferenceTarget {
                    database: doc.get_str(REF_OWNER_FIELD).map(str::to_owned),
                    project,
                    revision,
                    is_unique_id: doc
                        .get(REF_UNIQUE_FIELD)
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                })
            }
            NodeType::Revision => NodeKind::Revision,
            NodeType::Unknown => NodeKind::Unknown(type_name),
        };

        for key in [ID_FIELD, SHARED_ID_FIELD, TYPE_FIELD, PARENTS_FIELD, REVISION_ID_FIELD, NAME_FIELD] {
            doc.remove(key);
        }
        let typed_fields: &[&str] = match &kind {
            NodeKind::Transformation { .. } => &[MATRIX_FIELD],
            NodeKind::Mesh { .. } => &[BOUNDING_BOX_FIELD],
            NodeKind::Reference(_) => &[REF_OWNER_FIELD, REF_PROJECT_FIELD, REF_REVISION_FIELD, REF_UNIQUE_FIELD],
            _ => &[],
        };
        for key in typed_fields {
            doc.remove(key);
        }

        Ok(Self {
            unique_id,
            shared_id,
            parents: parents.into_iter().collect(),
            name,
            revision_id,
            kind,
            properties: doc,
        })
    }
}

fn rows_value(rows: Vec<Vec<f64>>) -> Value {
    Value::Array(
        rows.into_iter()
            .map(|row| Value::Array(row.into_iter().map(Value::from).collect()))
            .collect(),
    )
}

fn value_rows(value: &Value) -> Vec<Vec<f64>> {
    value
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().filter_map(Value::as_f64).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgr_types::Vector3d;

    #[test]
    fn type_names_roundtrip() {
        for t in NodeType::ALL {
            assert_eq!(NodeType::parse(t.as_str()), t);
        }
        assert_eq!(NodeType::parse("camera"), NodeType::Unknown);
    }

    #[test]
    fn new_nodes_have_fresh_ids() {
        let a = Node::material();
        let b = Node::material();
        assert_ne!(a.unique_id(), b.unique_id());
        assert_ne!(a.shared_id(), b.shared_id());
        assert!(a.is_root());
    }

    #[test]
    fn document_has_core_fields() {
        let parent = RepoUuid::new();
        let rev = RepoUuid::new();
        let mut node = Node::material().with_name("steel").with_parent(parent);
        node.set_revision_id(rev);
        let doc = node.to_document();
        assert_eq!(doc.get_str("_id"), Some(node.unique_id().to_string().as_str()));
        assert_eq!(doc.get_str("type"), Some("material"));
        assert_eq!(doc.get_uuid_array("parents").unwrap(), vec![parent]);
        assert_eq!(doc.get_uuid("rev_id").unwrap(), Some(rev));
        assert_eq!(doc.get_str("name"), Some("steel"));
    }

    #[test]
    fn empty_parents_and_nil_shared_id_are_omitted() {
        let node = Node::texture().with_shared_id(RepoUuid::nil());
        let doc = node.to_document();
        assert!(!doc.contains("parents"));
        assert!(!doc.contains("shared_id"));
        assert!(!doc.contains("rev_id"));
    }

    #[test]
    fn transformation_roundtrip() {
        let node = Node::transformation(Matrix4::translation(Vector3d::new(1.0, 2.0, 3.0)))
            .with_name("level 1")
            .with_parent(RepoUuid::new())
            .with_property("custom", "kept");
        let back = Node::from_document(node.to_document()).unwrap();
        assert_eq!(back, node);
        assert_eq!(back.properties().get_str("custom"), Some("kept"));
        assert!(!back.properties().contains("matrix"));
    }

    #[test]
    fn mesh_and_reference_roundtrip() {
        let bounds = BoundingBox::new(Vector3d::ZERO, Vector3d::new(1.0, 1.0, 1.0));
        let mesh = Node::mesh(Some(bounds));
        assert_eq!(Node::from_document(mesh.to_document()).unwrap(), mesh);

        let target = ReferenceTarget::revision("other", RepoUuid::new()).in_database("db2");
        let reference = Node::reference(target.clone());
        let back = Node::from_document(reference.to_document()).unwrap();
        assert_eq!(back.reference_target(), Some(&target));
        assert_eq!(back, reference);
    }

    #[test]
    fn unknown_types_keep_their_name() {
        let doc = Document::new()
            .with("_id", RepoUuid::new().to_string())
            .with("type", "camera")
            .with("fov", 60);
        let node = Node::from_document(doc).unwrap();
        assert_eq!(node.node_type(), NodeType::Unknown);
        assert_eq!(node.to_document().get_str("type"), Some("camera"));
        assert_eq!(node.properties().get_u64("fov"), Some(60));
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = Node::from_document(Document::new().with("type", "mesh")).unwrap_err();
        assert!(matches!(err, SceneError::Malformed { .. }));
    }

    #[test]
    fn bad_matrix_is_malformed() {
        let doc = Document::new()
            .with("_id", RepoUuid::new().to_string())
            .with("type", "transformation")
            .with("matrix", serde_json::json!([[1.0]]));
        assert!(matches!(Node::from_document(doc), Err(SceneError::Malformed { .. })));
    }

    #[test]
    fn binaries_travel_in_properties() {
        let node = Node::mesh(None).with_binary("vertices", vec![1, 2, 3]);
        let doc = node.to_document();
        assert_eq!(doc.binary("vertices"), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn new_unique_id_keeps_lineage() {
        let node = Node::mesh(None).with_name("m");
        let next = node.cloned_with_new_unique_id();
        assert_eq!(next.shared_id(), node.shared_id());
        assert_ne!(next.unique_id(), node.unique_id());
        assert_eq!(next.name(), Some("m"));
    }

    #[test]
    fn merge_adds_or_replaces() {
        let p1 = RepoUuid::new();
        let p2 = RepoUuid::new();
        let mut base = Node::material().with_name("a").with_parent(p1).with_property("x", 1);
        let update = Node::material().with_parent(p2).with_property("y", 2);
        base.merge_from(update.clone(), false);
        assert_eq!(base.parents().len(), 2);
        assert_eq!(base.name(), Some("a"));
        assert!(base.properties().contains("x") && base.properties().contains("y"));

        base.merge_from(update, true);
        assert_eq!(base.parents().len(), 1);
        assert_eq!(base.name(), None);
        assert!(!base.properties().contains("x"));
    }
}
