use std::collections::HashSet;

use sgr_blob::resolver::load_binaries;
use sgr_store::QueryFilter;
use sgr_types::{Matrix4, RepoUuid, Vector3d};
use tracing::{debug, info};

use crate::context::StorageContext;
use crate::error::{GraphIssue, SceneError, SceneResult};
use crate::graph::GraphType;
use crate::node::{Node, NodeType, ReferenceTarget, REVISION_ID_FIELD};
use crate::revision::{head_filter, RevisionNode, TIMESTAMP_FIELD};
use crate::scene::Scene;

impl Scene {
    /// Fetch the revision record this scene follows: the newest complete
    /// revision of its branch, or the pinned revision.
    pub fn load_revision(&mut self, ctx: &StorageContext) -> SceneResult<()> {
        let history = ctx.collections(&self.project).history;
        let db = ctx.database();
        let doc = match (self.head_revision, self.revision) {
            (false, Some(id)) => db
                .find_one_by_unique_id(&self.database, &history, &id)?
                .ok_or(SceneError::RevisionNotFound(id))?,
            _ => db
                .find_one_sorted_desc(&self.database, &history, &head_filter(&self.branch), TIMESTAMP_FIELD)?
                .ok_or_else(|| SceneError::NoRevision(format!("branch {} of {}", self.branch, self.location())))?,
        };
        let rev = RevisionNode::from_document(&doc)?;
        if !rev.world_offset.is_zero() {
            self.world_offset = Some(rev.world_offset);
        }
        self.revision = Some(rev.unique_id);
        self.branch = rev.branch;
        self.revisioned = true;
        debug!(revision = %rev.unique_id, status = %rev.status, location = %self.location(), "revision loaded");
        self.revision_node = Some(rev);
        Ok(())
    }

    /// Build the working graph of the revision, then load its federated
    /// scenes.
    pub fn load_scene(&mut self, ctx: &StorageContext) -> SceneResult<()> {
        if self.revision_node.is_none() {
            self.load_revision(ctx)?;
        }
        let current = self
            .revision_node
            .as_ref()
            .map(|rev| rev.current.clone())
            .unwrap_or_default();
        let scene_collection = ctx.collections(&self.project).scene;
        let db = ctx.database();

        let mut docs = Vec::with_capacity(current.len());
        for chunk in current.chunks(ctx.config().node_batch_size.max(1)) {
            docs.extend(db.find_all_by_unique_ids(&self.database, &scene_collection, chunk)?);
        }

        self.graph.clear();
        self.changes.clear();
        self.to_remove.clear();
        self.synthetic.clear();
        self.issues.clear();
        for doc in docs {
            match Node::from_document(doc) {
                Ok(node) => {
                    if let Some(issue) = self.graph.add_node(node) {
                        self.record_issue(issue);
                    }
                }
                Err(e) => self.record_issue(malformed_issue(e)),
            }
        }
        let missing: Vec<RepoUuid> = current
            .iter()
            .filter(|id| self.graph.get_by_unique(id).is_none())
            .copied()
            .collect();
        for id in missing {
            self.record_issue(GraphIssue::MissingNode(id));
        }

        self.resolve_references(ctx, GraphType::Default);
        info!(location = %self.location(), nodes = self.graph.len(), "scene loaded");
        Ok(())
    }

    /// Build the optimized graph from the stash collection. Returns `false`
    /// when the revision has no stored stash graph.
    pub fn load_stash(&mut self, ctx: &StorageContext) -> SceneResult<bool> {
        if self.revision_node.is_none() {
            self.load_revision(ctx)?;
        }
        let Some(revision) = self.revision else {
            return Err(SceneError::NoRevision(self.location()));
        };
        let stash_collection = ctx.collections(&self.project).stash;
        let filter = QueryFilter::eq(REVISION_ID_FIELD, revision.to_string());
        let docs = ctx
            .database()
            .find_all_by_criteria(&self.database, &stash_collection, &filter)?;
        if docs.is_empty() {
            debug!(revision = %revision, "no stash graph stored");
            return Ok(false);
        }

        self.stash.clear();
        for doc in docs {
            match Node::from_document(doc) {
                Ok(node) => {
                    if let Some(issue) = self.stash.add_node(node) {
                        self.record_issue(issue);
                    }
                }
                Err(e) => self.record_issue(malformed_issue(e)),
            }
        }
        self.resolve_references(ctx, GraphType::Optimized);
        info!(location = %self.location(), nodes = self.stash.len(), "stash graph loaded");
        Ok(true)
    }

    /// Fetch the externalized binaries of every node of a graph that has
    /// them. Returns the number of nodes hydrated.
    pub fn hydrate_binaries(&mut self, ctx: &StorageContext, graph_type: GraphType) -> SceneResult<usize> {
        let collections = ctx.collections(&self.project);
        let group = match graph_type {
            GraphType::Default => collections.scene,
            GraphType::Optimized => collections.stash,
        };
        let mut packer = ctx.packer(&self.database, &group);
        let mut hydrated = 0;
        for node in self.graph_mut(graph_type).nodes_mut() {
            if load_binaries(&mut packer, node.properties_mut())? {
                hydrated += 1;
            }
        }
        debug!(group = %group, hydrated, "binaries hydrated");
        Ok(hydrated)
    }

    /// Load the scene behind every Reference node of a graph, then insert
    /// offset transformations where a federated scene sits in a different
    /// world frame.
    fn resolve_references(&mut self, ctx: &StorageContext, graph_type: GraphType) {
        let references: Vec<(RepoUuid, ReferenceTarget)> = self
            .graph(graph_type)
            .nodes_of_type(NodeType::Reference)
            .into_iter()
            .filter_map(|n| n.reference_target().map(|t| (n.shared_id(), t.clone())))
            .collect();
        if references.is_empty() {
            return;
        }

        let here = self.location();
        for (shared_id, target) in references {
            let database = target.database.clone().unwrap_or_else(|| self.database.clone());
            let mut sub = Scene::new(&database, &target.project);
            sub = if target.is_unique_id {
                sub.with_revision(target.revision)
            } else {
                sub.with_branch(target.revision)
            };
            let location = sub.location();
            if location == here || self.enclosing.contains(&location) {
                self.record_issue(GraphIssue::CyclicReference {
                    shared_id,
                    project: target.project,
                });
                continue;
            }
            sub.enclosing = self.enclosing.clone();
            sub.enclosing.push(here.clone());

            match load_federated(&mut sub, ctx) {
                Ok(()) => {
                    if self.world_offset.is_none() {
                        self.world_offset = sub.world_offset;
                    }
                    debug!(reference = %shared_id, location = %location, "federated scene loaded");
                    self.graph_mut(graph_type).set_reference_scene(shared_id, sub);
                }
                Err(e) => self.record_issue(GraphIssue::UnresolvedReference {
                    shared_id,
                    project: target.project,
                    reason: e.to_string(),
                }),
            }
        }
        self.reconcile_offsets(graph_type);
    }

    /// Put a translation between each Reference node and its parents that
    /// moves its federated scene from its own world frame into this one.
    fn reconcile_offsets(&mut self, graph_type: GraphType) {
        let world = self.world_offset.unwrap_or(Vector3d::ZERO);
        let graph = self.graph(graph_type);
        let plans: Vec<(RepoUuid, Vec<RepoUuid>, Vector3d, String)> = graph
            .reference_scenes()
            .filter_map(|(shared_id, sub)| {
                let shift = sub.world_offset.unwrap_or(Vector3d::ZERO) - world;
                if shift.is_zero() {
                    return None;
                }
                let parents = graph.get_by_shared(shared_id)?.parents().iter().copied().collect();
                Some((*shared_id, parents, shift, sub.project.clone()))
            })
            .collect();

        let mut inserted = HashSet::new();
        for (reference, parents, shift, project) in plans {
            for parent in parents {
                let offset = Node::transformation(Matrix4::translation(shift)).with_name(format!("{project}_offset"));
                let offset_id = offset.shared_id();
                match self.graph_mut(graph_type).interpose(&parent, &reference, offset) {
                    Ok(()) => {
                        inserted.insert(offset_id);
                    }
                    Err(issue) => self.record_issue(issue),
                }
            }
        }
        if !inserted.is_empty() {
            debug!(count = inserted.len(), "inserted federation offset transformations");
            self.synthetic.extend(inserted);
        }
    }
}

/// Load a federated scene: its stash graph when stored, else its working
/// graph.
fn load_federated(sub: &mut Scene, ctx: &StorageContext) -> SceneResult<()> {
    sub.load_revision(ctx)?;
    if !sub.load_stash(ctx)? {
        sub.load_scene(ctx)?;
    }
    Ok(())
}

fn malformed_issue(error: SceneError) -> GraphIssue {
    match error {
        SceneError::Malformed { id, reason } => GraphIssue::MalformedNode { id, reason },
        other => GraphIssue::MalformedNode {
            id: String::new(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StagePipeline;
    use crate::revision::UploadStatus;
    use crate::testing::memory_context;
    use sgr_store::{DatabaseHandler, Document};
    use sgr_types::BoundingBox;

    const DB: &str = "acme";

    fn commit_project(ctx: &StorageContext, project: &str, nodes: Vec<Node>, offset: Option<Vector3d>) -> RepoUuid {
        let mut scene = Scene::from_nodes(nodes, Vec::new());
        scene.set_database_and_project(DB, project);
        if let Some(offset) = offset {
            scene = scene.with_world_offset(offset);
        }
        scene
            .commit(ctx, &StagePipeline::new(), "alice", None, None)
            .unwrap()
            .revision_id
    }

    fn unit_mesh_project(ctx: &StorageContext, project: &str, offset: Option<Vector3d>) {
        let root = Node::transformation(Matrix4::IDENTITY);
        let mesh = Node::mesh(Some(BoundingBox::new(Vector3d::ZERO, Vector3d::new(1.0, 1.0, 1.0))))
            .with_parent(root.shared_id());
        commit_project(ctx, project, vec![root, mesh], offset);
    }

    /// A project whose root holds one reference to `target`.
    fn referencing_project(ctx: &StorageContext, project: &str, target: &str, offset: Option<Vector3d>) -> Node {
        let root = Node::transformation(Matrix4::IDENTITY);
        let reference = Node::reference(ReferenceTarget::branch(target, RepoUuid::master_branch()))
            .with_parent(root.shared_id());
        commit_project(ctx, project, vec![root, reference.clone()], offset);
        reference
    }

    fn load(ctx: &StorageContext, project: &str) -> Scene {
        let mut scene = Scene::new(DB, project);
        scene.load_scene(ctx).unwrap();
        scene
    }

    // -----------------------------------------------------------------------
    // Revisions
    // -----------------------------------------------------------------------

    #[test]
    fn missing_revisions_are_errors() {
        let (ctx, ..) = memory_context();
        let mut head = Scene::new(DB, "empty");
        assert!(matches!(head.load_scene(&ctx), Err(SceneError::NoRevision(_))));

        let id = RepoUuid::new();
        let mut pinned = Scene::new(DB, "empty").with_revision(id);
        assert!(matches!(pinned.load_revision(&ctx), Err(SceneError::RevisionNotFound(r)) if r == id));
    }

    #[test]
    fn pinned_revision_loads_older_state() {
        let (ctx, ..) = memory_context();
        let first = commit_project(&ctx, "p", vec![Node::transformation(Matrix4::IDENTITY)], None);
        let mut scene = load(&ctx, "p");
        let root = scene.graph(GraphType::Default).root().map(Node::shared_id).unwrap();
        scene.add_nodes([Node::material().with_parent(root)]);
        scene.commit(&ctx, &StagePipeline::new(), "bob", None, None).unwrap();

        assert_eq!(load(&ctx, "p").graph(GraphType::Default).len(), 2);
        let mut old = Scene::new(DB, "p").with_revision(first);
        old.load_scene(&ctx).unwrap();
        assert_eq!(old.graph(GraphType::Default).len(), 1);
        assert!(!old.is_head_revision());
    }

    #[test]
    fn bad_node_documents_degrade_the_scene() {
        let (ctx, db, _) = memory_context();
        let good = Node::transformation(Matrix4::IDENTITY);
        let bad_id = RepoUuid::new();
        let missing_id = RepoUuid::new();
        db.insert_document(DB, "broken", &good.to_document()).unwrap();
        let bad = Document::new()
            .with("_id", bad_id.to_string())
            .with("type", "transformation")
            .with("matrix", serde_json::json!([[1.0, 0.0]]));
        db.insert_document(DB, "broken", &bad).unwrap();

        let mut rev = RevisionNode::new(RepoUuid::master_branch(), "importer");
        rev.current = vec![good.unique_id(), bad_id, missing_id];
        rev.status = UploadStatus::Complete;
        db.insert_document(DB, "broken.history", &rev.to_document()).unwrap();

        let scene = load(&ctx, "broken");
        assert_eq!(scene.graph(GraphType::Default).len(), 1);
        assert!(scene.is_degraded());
        assert!(scene
            .issues()
            .iter()
            .any(|i| matches!(i, GraphIssue::MalformedNode { id, .. } if *id == bad_id.to_string())));
        assert!(scene.issues().contains(&GraphIssue::MissingNode(missing_id)));
    }

    #[test]
    fn nodes_without_lineage_all_load() {
        let (ctx, db, _) = memory_context();
        let root = Node::transformation(Matrix4::IDENTITY);
        let tags: Vec<Node> = (0..2)
            .map(|_| Node::metadata().with_shared_id(RepoUuid::nil()).with_parent(root.shared_id()))
            .collect();
        let mut rev = RevisionNode::new(RepoUuid::master_branch(), "importer");
        for node in std::iter::once(&root).chain(&tags) {
            db.insert_document(DB, "tags", &node.to_document()).unwrap();
            rev.current.push(node.unique_id());
        }
        rev.status = UploadStatus::Complete;
        db.insert_document(DB, "tags.history", &rev.to_document()).unwrap();

        let scene = load(&ctx, "tags");
        assert_eq!(scene.graph(GraphType::Default).len(), 3);
        assert!(!scene.is_degraded(), "{:?}", scene.issues());
        for tag in &tags {
            assert!(scene.get_node_by_unique_id(GraphType::Default, &tag.unique_id()).is_some());
        }
        assert_eq!(scene.current_unique_ids().len(), 3);
    }

    #[test]
    fn reloading_clears_earlier_issues() {
        let (ctx, db, _) = memory_context();
        let root = Node::transformation(Matrix4::IDENTITY);
        db.insert_document(DB, "heal", &root.to_document()).unwrap();
        let lost = RepoUuid::new();
        let mut rev = RevisionNode::new(RepoUuid::master_branch(), "importer");
        rev.current = vec![root.unique_id(), lost];
        rev.status = UploadStatus::Complete;
        db.insert_document(DB, "heal.history", &rev.to_document()).unwrap();

        let mut scene = Scene::new(DB, "heal");
        scene.load_scene(&ctx).unwrap();
        assert_eq!(scene.issues(), &[GraphIssue::MissingNode(lost)]);

        let restored = Node::metadata()
            .with_parent(root.shared_id())
            .to_document()
            .with("_id", lost.to_string());
        db.insert_document(DB, "heal", &restored).unwrap();
        scene.load_scene(&ctx).unwrap();
        assert!(!scene.is_degraded(), "{:?}", scene.issues());
        assert_eq!(scene.graph(GraphType::Default).len(), 2);
    }

    #[test]
    fn stash_graph_loads_by_revision() {
        let (ctx, ..) = memory_context();
        unit_mesh_project(&ctx, "p", None);
        let mut scene = Scene::new(DB, "p");
        assert!(!scene.load_stash(&ctx).unwrap());

        let root = Node::transformation(Matrix4::IDENTITY);
        scene.add_stash_graph([root.clone(), Node::mesh(None).with_parent(root.shared_id())]);
        scene.commit_stash(&ctx).unwrap();

        let mut fresh = Scene::new(DB, "p");
        assert!(fresh.load_stash(&ctx).unwrap());
        assert_eq!(fresh.graph(GraphType::Optimized).len(), 2);
        assert!(fresh.graph(GraphType::Default).is_empty());
    }

    // -----------------------------------------------------------------------
    // Federation
    // -----------------------------------------------------------------------

    #[test]
    fn references_load_sub_scenes_in_the_shared_frame() {
        let (ctx, ..) = memory_context();
        unit_mesh_project(&ctx, "building", Some(Vector3d::new(100.0, 0.0, 0.0)));
        let reference = referencing_project(&ctx, "site", "building", Some(Vector3d::new(90.0, 0.0, 0.0)));

        let site = load(&ctx, "site");
        assert!(!site.is_degraded());
        let sub = site.get_reference_scene(GraphType::Default, &reference.shared_id()).unwrap();
        assert_eq!(sub.project(), "building");
        assert_eq!(sub.graph(GraphType::Default).len(), 2);

        let placed = site.get_node_by_shared_id(GraphType::Default, &reference.shared_id()).unwrap();
        assert_eq!(placed.parents().len(), 1);
        let offset_id = *placed.parents().iter().next().unwrap();
        assert!(site.is_synthetic(&offset_id));
        let offset = site.get_node_by_shared_id(GraphType::Default, &offset_id).unwrap();
        assert_eq!(offset.matrix(), Some(&Matrix4::translation(Vector3d::new(10.0, 0.0, 0.0))));
        assert_eq!(site.current_unique_ids().len(), 2);

        let bounds = site.scene_bounding_box().unwrap();
        assert_eq!(bounds.min, Vector3d::new(10.0, 0.0, 0.0));
        assert_eq!(bounds.max, Vector3d::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn first_sub_scene_offset_is_adopted() {
        let (ctx, ..) = memory_context();
        unit_mesh_project(&ctx, "building", Some(Vector3d::new(100.0, 0.0, 0.0)));
        referencing_project(&ctx, "site", "building", None);

        let site = load(&ctx, "site");
        assert_eq!(site.world_offset(), Some(Vector3d::new(100.0, 0.0, 0.0)));
        assert_eq!(site.graph(GraphType::Default).len(), 2);
        assert_eq!(site.graph(GraphType::Default).count_of_type(NodeType::Transformation), 1);
    }

    #[test]
    fn sub_scene_prefers_its_stash_graph() {
        let (ctx, ..) = memory_context();
        unit_mesh_project(&ctx, "building", None);
        let mut building = load(&ctx, "building");
        let root = Node::transformation(Matrix4::IDENTITY);
        building.add_stash_graph([root.clone(), Node::mesh(None).with_parent(root.shared_id())]);
        building.commit_stash(&ctx).unwrap();
        let reference = referencing_project(&ctx, "site", "building", None);

        let site = load(&ctx, "site");
        let sub = site.get_reference_scene(GraphType::Default, &reference.shared_id()).unwrap();
        assert!(sub.has_stash());
        assert!(sub.graph(GraphType::Default).is_empty());
    }

    #[test]
    fn unresolved_reference_degrades_without_failing() {
        let (ctx, ..) = memory_context();
        let reference = referencing_project(&ctx, "site", "ghost", None);
        let site = load(&ctx, "site");
        assert!(site.get_reference_scene(GraphType::Default, &reference.shared_id()).is_none());
        assert!(matches!(
            site.issues(),
            [GraphIssue::UnresolvedReference { project, .. }] if project == "ghost"
        ));
    }

    #[test]
    fn reference_cycles_are_cut() {
        let (ctx, ..) = memory_context();
        let self_ref = referencing_project(&ctx, "loop", "loop", None);
        let looped = load(&ctx, "loop");
        assert!(looped.issues().contains(&GraphIssue::CyclicReference {
            shared_id: self_ref.shared_id(),
            project: "loop".into(),
        }));

        let a_to_b = referencing_project(&ctx, "a", "b", None);
        referencing_project(&ctx, "b", "a", None);
        let a = load(&ctx, "a");
        assert!(!a.is_degraded());
        let b = a.get_reference_scene(GraphType::Default, &a_to_b.shared_id()).unwrap();
        assert!(matches!(b.issues(), [GraphIssue::CyclicReference { .. }]));
    }
}
