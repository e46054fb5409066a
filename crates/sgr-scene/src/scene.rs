use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;

use sgr_types::{sanitize_name, RepoUuid, Vector3d};
use tracing::debug;

use crate::error::GraphIssue;
use crate::graph::{GraphInstance, GraphType};
use crate::node::{Node, NodeType};
use crate::revision::RevisionNode;

/// Shared ids changed since the last successful commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<RepoUuid>,
    pub modified: BTreeSet<RepoUuid>,
    pub removed: BTreeSet<RepoUuid>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Whether the lineage already has a new version in this revision.
    pub fn is_new_version(&self, shared_id: &RepoUuid) -> bool {
        self.added.contains(shared_id) || self.modified.contains(shared_id)
    }

    pub fn clear(&mut self) {
        self.added.clear();
        self.modified.clear();
        self.removed.clear();
    }
}

/// Node counts of a scene.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SceneStatistics {
    pub nodes_by_type: BTreeMap<NodeType, usize>,
    pub stash_nodes: usize,
    pub reference_scenes: usize,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub issues: usize,
}

impl SceneStatistics {
    pub fn total_nodes(&self) -> usize {
        self.nodes_by_type.values().sum()
    }
}

impl fmt::Display for SceneStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} nodes (", self.total_nodes())?;
        let mut first = true;
        for (kind, count) in &self.nodes_by_type {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{kind}: {count}")?;
            first = false;
        }
        write!(
            f,
            "), {} stash nodes, {} federated scenes, +{} ~{} -{}, {} issues",
            self.stash_nodes, self.reference_scenes, self.added, self.modified, self.removed, self.issues
        )
    }
}

/// A versioned scene of one project branch.
///
/// Owns the working graph, the optimized (stash) graph and, through their
/// Reference nodes, any federated sub-scenes. Edits accumulate in a
/// [`ChangeSet`] until the next commit. A scene is not safe for concurrent
/// mutation; callers serialize access to one instance.
pub struct Scene {
    pub(crate) database: String,
    pub(crate) project: String,
    pub(crate) branch: RepoUuid,
    pub(crate) revision: Option<RepoUuid>,
    pub(crate) head_revision: bool,
    pub(crate) revisioned: bool,
    pub(crate) revision_node: Option<RevisionNode>,
    pub(crate) world_offset: Option<Vector3d>,
    pub(crate) graph: GraphInstance,
    pub(crate) stash: GraphInstance,
    pub(crate) changes: ChangeSet,
    pub(crate) to_remove: Vec<Node>,
    pub(crate) original_files: Vec<PathBuf>,
    pub(crate) issues: Vec<GraphIssue>,
    /// Shared ids of offset transformations inserted by federation.
    pub(crate) synthetic: HashSet<RepoUuid>,
    /// `database/project` of every enclosing scene.
    pub(crate) enclosing: Vec<String>,
}

impl Scene {
    /// An empty scene following the head of the master branch.
    pub fn new(database: &str, project: &str) -> Self {
        Self {
            database: sanitize_name(database),
            project: sanitize_name(project),
            branch: RepoUuid::master_branch(),
            revision: None,
            head_revision: true,
            revisioned: false,
            revision_node: None,
            world_offset: None,
            graph: GraphInstance::new(),
            stash: GraphInstance::new(),
            changes: ChangeSet::default(),
            to_remove: Vec::new(),
            original_files: Vec::new(),
            issues: Vec::new(),
            synthetic: HashSet::new(),
            enclosing: Vec::new(),
        }
    }

    /// A scene built from freshly imported nodes, not yet bound to a
    /// project. Every node counts as added.
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>, original_files: Vec<PathBuf>) -> Self {
        let mut scene = Self::new("", "");
        scene.original_files = original_files;
        scene.add_nodes(nodes);
        scene
    }

    pub fn set_database_and_project(&mut self, database: &str, project: &str) {
        self.database = sanitize_name(database);
        self.project = sanitize_name(project);
    }

    /// Follow the head of `branch`.
    pub fn with_branch(mut self, branch: RepoUuid) -> Self {
        self.branch = branch;
        self.revision = None;
        self.head_revision = true;
        self
    }

    /// Pin one revision.
    pub fn with_revision(mut self, revision: RepoUuid) -> Self {
        self.revision = Some(revision);
        self.head_revision = false;
        self
    }

    pub fn with_world_offset(mut self, offset: Vector3d) -> Self {
        self.world_offset = Some(offset);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn branch(&self) -> RepoUuid {
        self.branch
    }

    /// The loaded or pinned revision id.
    pub fn revision_id(&self) -> Option<RepoUuid> {
        self.revision
    }

    pub fn is_head_revision(&self) -> bool {
        self.head_revision
    }

    /// Whether the scene reflects a stored revision.
    pub fn is_revisioned(&self) -> bool {
        self.revisioned
    }

    pub fn revision_node(&self) -> Option<&RevisionNode> {
        self.revision_node.as_ref()
    }

    pub fn world_offset(&self) -> Option<Vector3d> {
        self.world_offset
    }

    pub fn graph(&self, graph_type: GraphType) -> &GraphInstance {
        match graph_type {
            GraphType::Default => &self.graph,
            GraphType::Optimized => &self.stash,
        }
    }

    pub(crate) fn graph_mut(&mut self, graph_type: GraphType) -> &mut GraphInstance {
        match graph_type {
            GraphType::Default => &mut self.graph,
            GraphType::Optimized => &mut self.stash,
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Nodes detached since the last commit, kept until it succeeds.
    pub fn to_remove(&self) -> &[Node] {
        &self.to_remove
    }

    pub fn original_files(&self) -> &[PathBuf] {
        &self.original_files
    }

    pub fn add_original_file(&mut self, path: impl Into<PathBuf>) {
        self.original_files.push(path.into());
    }

    pub fn issues(&self) -> &[GraphIssue] {
        &self.issues
    }

    /// Whether structural problems were found while building or editing.
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn has_stash(&self) -> bool {
        !self.stash.is_empty()
    }

    /// Whether a node was inserted by federation rather than stored.
    pub fn is_synthetic(&self, shared_id: &RepoUuid) -> bool {
        self.synthetic.contains(shared_id)
    }

    pub(crate) fn location(&self) -> String {
        format!("{}/{}", self.database, self.project)
    }

    pub(crate) fn record_issue(&mut self, issue: GraphIssue) {
        issue.log();
        self.issues.push(issue);
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    /// Add new nodes to the working graph. A node without a lineage is
    /// given one.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        for node in nodes {
            let node = if node.shared_id().is_nil() {
                node.with_shared_id(RepoUuid::new())
            } else {
                node
            };
            self.changes.added.insert(node.shared_id());
            if let Some(issue) = self.graph.add_node(node) {
                self.record_issue(issue);
            }
        }
    }

    /// Make `child` a child of `parent`. Both become modified.
    pub fn add_inheritance(&mut self, parent: &RepoUuid, child: &RepoUuid) -> bool {
        match self.graph.add_inheritance(parent, child) {
            Ok(()) => {
                self.touch(parent);
                self.touch(child);
                true
            }
            Err(issue) => {
                self.record_issue(issue);
                false
            }
        }
    }

    /// Remove the edge `parent -> child`. The child becomes modified.
    pub fn abandon_child(&mut self, parent: &RepoUuid, child: &RepoUuid) -> bool {
        match self.graph.abandon_child(parent, child) {
            Ok(()) => {
                self.touch(child);
                true
            }
            Err(issue) => {
                self.record_issue(issue);
                false
            }
        }
    }

    /// Fold `update` into the current version of `shared_id`.
    ///
    /// The lineage keeps its shared id. Unless it already has a new version
    /// in this revision it gets a fresh unique id and counts as modified.
    pub fn modify_node(&mut self, shared_id: &RepoUuid, update: Node, overwrite: bool) -> bool {
        let Some(current) = self.graph.get_by_shared(shared_id) else {
            self.record_issue(GraphIssue::MissingNode(*shared_id));
            return false;
        };
        let mut next = current.clone();
        next.merge_from(update, overwrite);
        if !self.changes.is_new_version(shared_id) {
            next = next.cloned_with_new_unique_id();
            self.changes.modified.insert(*shared_id);
        }
        self.graph.replace_node(next);
        true
    }

    /// Detach a node from one of the graphs.
    ///
    /// In the working graph a node added in this revision is discarded and
    /// any other node is kept in [`Scene::to_remove`] until the next commit
    /// and counts as removed. The optimized graph has no change-set.
    pub fn remove_node(&mut self, graph_type: GraphType, shared_id: &RepoUuid) -> bool {
        let Some(node) = self.graph_mut(graph_type).remove_node(shared_id) else {
            self.record_issue(GraphIssue::MissingNode(*shared_id));
            return false;
        };
        if graph_type == GraphType::Optimized {
            debug!(node = %node.unique_id(), "removed node from the optimized graph");
            return true;
        }
        if self.changes.added.remove(shared_id) {
            debug!(node = %node.unique_id(), "discarded node added in this revision");
        } else {
            self.changes.modified.remove(shared_id);
            self.changes.removed.insert(*shared_id);
            self.to_remove.push(node);
        }
        true
    }

    /// Attach metadata nodes to the transformations and meshes carrying the
    /// same name. Metadata matching nothing is reported and dropped.
    ///
    /// Returns the number of metadata nodes attached.
    pub fn add_metadata(&mut self, metadata: impl IntoIterator<Item = Node>, exact_match: bool) -> usize {
        let mut by_name: BTreeMap<String, Vec<RepoUuid>> = BTreeMap::new();
        for kind in [NodeType::Transformation, NodeType::Mesh] {
            for node in self.graph.nodes_of_type(kind) {
                if let Some(name) = node.name() {
                    by_name
                        .entry(match_key(name, exact_match))
                        .or_default()
                        .push(node.shared_id());
                }
            }
        }

        let mut attached = 0;
        for mut meta in metadata {
            let name = meta.name().unwrap_or_default().to_string();
            match by_name.get(&match_key(&name, exact_match)) {
                Some(targets) => {
                    meta.set_parents(targets.iter().copied());
                    self.add_nodes([meta]);
                    attached += 1;
                }
                None => self.record_issue(GraphIssue::UnmatchedMetadata { name }),
            }
        }
        attached
    }

    /// Replace the optimized graph.
    pub fn add_stash_graph(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.stash.clear();
        for node in nodes {
            if let Some(issue) = self.stash.add_node(node) {
                self.record_issue(issue);
            }
        }
    }

    pub fn clear_stash(&mut self) {
        self.stash.clear();
    }

    /// Give a lineage a new version for this revision.
    fn touch(&mut self, shared_id: &RepoUuid) {
        if self.changes.is_new_version(shared_id) {
            return;
        }
        let Some(node) = self.graph.get_by_shared(shared_id) else {
            return;
        };
        let next = node.cloned_with_new_unique_id();
        self.graph.replace_node(next);
        self.changes.modified.insert(*shared_id);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_node_by_unique_id(&self, graph_type: GraphType, unique_id: &RepoUuid) -> Option<&Node> {
        self.graph(graph_type).get_by_unique(unique_id)
    }

    pub fn get_node_by_shared_id(&self, graph_type: GraphType, shared_id: &RepoUuid) -> Option<&Node> {
        self.graph(graph_type).get_by_shared(shared_id)
    }

    pub fn get_children(&self, graph_type: GraphType, parent: &RepoUuid) -> Vec<&Node> {
        self.graph(graph_type).children(parent)
    }

    pub fn get_children_by_type(&self, graph_type: GraphType, parent: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        self.graph(graph_type).children_by_type(parent, node_type)
    }

    pub fn get_descendants_by_type(&self, graph_type: GraphType, shared_id: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        self.graph(graph_type).descendants_by_type(shared_id, node_type)
    }

    pub fn get_parents_by_type(&self, graph_type: GraphType, shared_id: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        self.graph(graph_type).parents_by_type(shared_id, node_type)
    }

    pub fn get_all_nodes_of_type(&self, graph_type: GraphType, node_type: NodeType) -> Vec<&Node> {
        self.graph(graph_type).nodes_of_type(node_type)
    }

    /// The federated scene behind a Reference node.
    pub fn get_reference_scene(&self, graph_type: GraphType, reference: &RepoUuid) -> Option<&Scene> {
        self.graph(graph_type).reference_scene(reference)
    }

    pub fn statistics(&self) -> SceneStatistics {
        SceneStatistics {
            nodes_by_type: NodeType::ALL
                .into_iter()
                .map(|t| (t, self.graph.count_of_type(t)))
                .filter(|(_, count)| *count > 0)
                .collect(),
            stash_nodes: self.stash.len(),
            reference_scenes: self.graph.reference_scenes().count(),
            added: self.changes.added.len(),
            modified: self.changes.modified.len(),
            removed: self.changes.removed.len(),
            issues: self.issues.len(),
        }
    }

    /// Unique ids of the stored nodes of the working graph.
    pub(crate) fn current_unique_ids(&self) -> Vec<RepoUuid> {
        let mut ids: Vec<RepoUuid> = self
            .graph
            .nodes()
            .filter(|n| !self.synthetic.contains(&n.shared_id()))
            .map(Node::unique_id)
            .collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("database", &self.database)
            .field("project", &self.project)
            .field("branch", &self.branch)
            .field("revision", &self.revision)
            .field("graph", &self.graph)
            .field("stash", &self.stash)
            .field("issues", &self.issues.len())
            .finish()
    }
}

fn match_key(name: &str, exact_match: bool) -> String {
    if exact_match {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sgr_types::Matrix4;

    /// R -> T -> M, as if loaded from a stored revision.
    fn stored_scene() -> (Scene, Node, Node, Node) {
        let r = Node::transformation(Matrix4::IDENTITY).with_name("root");
        let t = Node::transformation(Matrix4::IDENTITY).with_name("level").with_parent(r.shared_id());
        let m = Node::mesh(None).with_name("wall").with_parent(t.shared_id());
        let mut scene = Scene::new("acme", "tower");
        for n in [&r, &t, &m] {
            scene.graph.add_node(n.clone());
        }
        scene.revisioned = true;
        (scene, r, t, m)
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    #[test]
    fn names_are_sanitized() {
        let scene = Scene::new("my db", "system.site.plan");
        assert_eq!(scene.database(), "my_db");
        assert_eq!(scene.project(), "site_plan");
        assert!(scene.is_head_revision());
        assert!(scene.branch().is_nil());
    }

    #[test]
    fn from_nodes_marks_everything_added() {
        let r = Node::transformation(Matrix4::IDENTITY);
        let m = Node::mesh(None).with_parent(r.shared_id());
        let scene = Scene::from_nodes([r.clone(), m.clone()], vec![PathBuf::from("/tmp/model.ifc")]);
        assert_eq!(scene.changes().added.len(), 2);
        assert!(!scene.is_revisioned());
        assert_eq!(scene.original_files().len(), 1);
        assert_eq!(scene.graph(GraphType::Default).root().map(Node::shared_id), Some(r.shared_id()));
    }

    #[test]
    fn pinned_revision_is_not_head() {
        let rev = RepoUuid::new();
        let scene = Scene::new("a", "b").with_revision(rev);
        assert_eq!(scene.revision_id(), Some(rev));
        assert!(!scene.is_head_revision());
    }

    #[test]
    fn second_root_degrades_scene() {
        let a = Node::transformation(Matrix4::IDENTITY).with_name("a");
        let b = Node::material().with_name("b");
        let scene = Scene::from_nodes([a, b], Vec::new());
        assert!(scene.is_degraded());
        assert!(matches!(scene.issues()[0], GraphIssue::DuplicateRoot { identical: false, .. }));
    }

    // -----------------------------------------------------------------------
    // remove_node
    // -----------------------------------------------------------------------

    #[test]
    fn removing_stored_node_keeps_it_until_commit() {
        let (mut scene, _, t, m) = stored_scene();
        assert!(scene.remove_node(GraphType::Default, &m.shared_id()));

        assert_eq!(scene.to_remove().len(), 1);
        assert_eq!(scene.to_remove()[0].unique_id(), m.unique_id());
        assert!(scene.get_all_nodes_of_type(GraphType::Default, NodeType::Mesh).is_empty());
        assert!(scene.get_children(GraphType::Default, &t.shared_id()).is_empty());
        assert!(scene.changes().removed.contains(&m.shared_id()));
        assert!(scene.graph(GraphType::Default).is_consistent());
    }

    #[test]
    fn removing_new_node_discards_it() {
        let (mut scene, _, t, _) = stored_scene();
        let extra = Node::mesh(None).with_parent(t.shared_id());
        scene.add_nodes([extra.clone()]);
        assert!(scene.remove_node(GraphType::Default, &extra.shared_id()));
        assert!(scene.to_remove().is_empty());
        assert!(scene.changes().is_empty());
    }

    #[test]
    fn removing_from_optimized_graph_leaves_change_set() {
        let (mut scene, r, _, _) = stored_scene();
        let stash_root = Node::transformation(Matrix4::IDENTITY);
        let stash_mesh = Node::mesh(None).with_parent(stash_root.shared_id());
        scene.add_stash_graph([stash_root.clone(), stash_mesh.clone()]);

        assert!(scene.remove_node(GraphType::Optimized, &stash_mesh.shared_id()));
        assert_eq!(scene.graph(GraphType::Optimized).len(), 1);
        assert!(scene.get_children(GraphType::Optimized, &stash_root.shared_id()).is_empty());
        assert!(scene.changes().is_empty());
        assert!(scene.to_remove().is_empty());
        assert!(scene.get_node_by_shared_id(GraphType::Default, &r.shared_id()).is_some());
    }

    #[test]
    fn removing_unknown_node_is_reported() {
        let (mut scene, ..) = stored_scene();
        assert!(!scene.remove_node(GraphType::Default, &RepoUuid::new()));
        assert!(matches!(scene.issues()[0], GraphIssue::MissingNode(_)));
    }

    // -----------------------------------------------------------------------
    // Editing
    // -----------------------------------------------------------------------

    #[test]
    fn nodes_without_lineage_get_one() {
        let r = Node::transformation(Matrix4::IDENTITY);
        let a = Node::metadata().with_shared_id(RepoUuid::nil()).with_parent(r.shared_id());
        let b = Node::metadata().with_shared_id(RepoUuid::nil()).with_parent(r.shared_id());
        let scene = Scene::from_nodes([r.clone(), a, b], Vec::new());

        let metadata = scene.get_all_nodes_of_type(GraphType::Default, NodeType::Metadata);
        assert_eq!(metadata.len(), 2);
        assert!(metadata.iter().all(|n| !n.shared_id().is_nil()));
        assert_eq!(scene.get_children(GraphType::Default, &r.shared_id()).len(), 2);
        assert_eq!(scene.changes().added.len(), 3);
    }

    #[test]
    fn modify_assigns_new_version_once() {
        let (mut scene, _, _, m) = stored_scene();
        let update = Node::mesh(None).with_property("colour", "red");
        assert!(scene.modify_node(&m.shared_id(), update, false));
        let first = scene.get_node_by_shared_id(GraphType::Default, &m.shared_id()).unwrap().clone();
        assert_ne!(first.unique_id(), m.unique_id());
        assert_eq!(first.shared_id(), m.shared_id());
        assert_eq!(first.properties().get_str("colour"), Some("red"));
        assert_eq!(first.parents(), m.parents());

        scene.modify_node(&m.shared_id(), Node::mesh(None).with_property("colour", "blue"), false);
        let second = scene.get_node_by_shared_id(GraphType::Default, &m.shared_id()).unwrap();
        assert_eq!(second.unique_id(), first.unique_id());
        assert_eq!(scene.changes().modified.len(), 1);
        assert!(scene.graph(GraphType::Default).is_consistent());
    }

    #[test]
    fn inheritance_edits_mark_nodes_modified() {
        let (mut scene, r, t, m) = stored_scene();
        assert!(scene.abandon_child(&t.shared_id(), &m.shared_id()));
        assert!(scene.changes().modified.contains(&m.shared_id()));
        assert!(!scene.changes().modified.contains(&t.shared_id()));

        assert!(scene.add_inheritance(&r.shared_id(), &m.shared_id()));
        assert!(scene.changes().modified.contains(&r.shared_id()));
        assert_eq!(scene.get_children_by_type(GraphType::Default, &r.shared_id(), NodeType::Mesh).len(), 1);

        assert!(!scene.abandon_child(&t.shared_id(), &m.shared_id()));
        assert!(scene.is_degraded());
    }

    #[test]
    fn metadata_attaches_by_name() {
        let (mut scene, _, t, m) = stored_scene();
        let meta = Node::metadata().with_name("WALL").with_property("fire_rating", "2h");
        let lost = Node::metadata().with_name("door");
        assert_eq!(scene.add_metadata([meta.clone(), lost], false), 1);

        let attached = scene.get_node_by_shared_id(GraphType::Default, &meta.shared_id()).unwrap();
        assert!(attached.parents().contains(&m.shared_id()));
        assert_eq!(scene.get_children_by_type(GraphType::Default, &m.shared_id(), NodeType::Metadata).len(), 1);
        assert!(scene.get_children_by_type(GraphType::Default, &t.shared_id(), NodeType::Metadata).is_empty());
        assert!(matches!(scene.issues()[0], GraphIssue::UnmatchedMetadata { .. }));

        let strict = Node::metadata().with_name("WALL");
        assert_eq!(scene.add_metadata([strict], true), 0);
    }

    #[test]
    fn stash_graph_is_separate() {
        let (mut scene, ..) = stored_scene();
        let mesh = Node::mesh(None);
        scene.add_stash_graph([mesh.clone()]);
        assert!(scene.has_stash());
        assert!(scene.get_node_by_shared_id(GraphType::Default, &mesh.shared_id()).is_none());
        assert!(scene.get_node_by_shared_id(GraphType::Optimized, &mesh.shared_id()).is_some());
        scene.clear_stash();
        assert!(!scene.has_stash());
    }

    #[test]
    fn statistics_count_by_type() {
        let (mut scene, _, _, m) = stored_scene();
        scene.remove_node(GraphType::Default, &m.shared_id());
        let stats = scene.statistics();
        assert_eq!(stats.nodes_by_type.get(&NodeType::Transformation), Some(&2));
        assert_eq!(stats.total_nodes(), 2);
        assert_eq!(stats.removed, 1);
        assert!(stats.to_string().starts_with("2 nodes (transformation: 2)"));
    }
}
