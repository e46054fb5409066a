//! Graph instances: the node arena of one scene graph and its indexes.
//!
//! [`GraphInstance`] owns every node by unique id. All other maps hold ids:
//! `shared_to_unique` points each lineage at its current version, the
//! adjacency index maps a parent's shared id to its children's shared ids,
//! and the type partitions group unique ids by [`NodeType`].
//!
//! # Invariants
//!
//! - Every owned node sits in exactly one type partition.
//! - Every adjacency entry resolves through `shared_to_unique`.
//! - At most one root is recorded.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use sgr_types::RepoUuid;
use tracing::debug;

use crate::error::GraphIssue;
use crate::node::{Node, NodeType};
use crate::scene::Scene;

/// Which of a scene's two graphs an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GraphType {
    /// The editable working graph.
    Default,
    /// The derived, render-optimized stash graph.
    Optimized,
}

/// One scene graph.
#[derive(Default)]
pub struct GraphInstance {
    root: Option<RepoUuid>,
    nodes: HashMap<RepoUuid, Node>,
    shared_to_unique: HashMap<RepoUuid, RepoUuid>,
    children: HashMap<RepoUuid, Vec<RepoUuid>>,
    partitions: HashMap<NodeType, BTreeSet<RepoUuid>>,
    reference_scenes: HashMap<RepoUuid, Scene>,
}

impl GraphInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.and_then(|id| self.nodes.get(&id))
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert a node and index it.
    ///
    /// A parentless node becomes the root. A second root is reported: when
    /// both roots hold the same content the first one stays; a distinct
    /// transformation replaces it. Nodes without a lineage (nil shared id)
    /// are kept side by side and left out of the shared-id indexes.
    pub fn add_node(&mut self, node: Node) -> Option<GraphIssue> {
        let unique = node.unique_id();
        let shared = node.shared_id();
        let mut issue = None;

        if node.is_root() {
            match self.root() {
                Some(existing) if existing.unique_id() != unique => {
                    let identical = same_content(existing, &node);
                    issue = Some(GraphIssue::DuplicateRoot {
                        existing: existing.unique_id(),
                        candidate: unique,
                        identical,
                    });
                    if !identical && node.node_type() == NodeType::Transformation {
                        self.root = Some(unique);
                    }
                }
                _ => self.root = Some(unique),
            }
        }

        // A nil shared id has no lineage: the node is only reachable by its
        // unique id.
        if !shared.is_nil() {
            for parent in node.parents() {
                let bucket = self.children.entry(*parent).or_default();
                if !bucket.contains(&shared) {
                    bucket.push(shared);
                }
            }
            if let Some(stale) = self.shared_to_unique.insert(shared, unique) {
                if stale != unique {
                    self.forget(&stale);
                }
            }
        }
        self.partitions.entry(node.node_type()).or_default().insert(unique);
        debug!(node = %unique, shared = %shared, kind = %node.node_type(), "added graph node");
        self.nodes.insert(unique, node);
        issue
    }

    /// Replace the current version of a lineage with `node`, keeping the
    /// adjacency index in step with any change of parents. Returns the
    /// replaced version.
    pub fn replace_node(&mut self, node: Node) -> Option<Node> {
        let shared = node.shared_id();
        let Some(old_unique) = self.shared_to_unique.get(&shared).copied() else {
            self.add_node(node);
            return None;
        };
        let old = self.forget(&old_unique)?;

        for parent in old.parents().difference(node.parents()) {
            self.unlink(parent, &shared);
        }
        for parent in node.parents().difference(old.parents()) {
            let bucket = self.children.entry(*parent).or_default();
            if !bucket.contains(&shared) {
                bucket.push(shared);
            }
        }
        if self.root.is_none() && node.is_root() {
            self.root = Some(node.unique_id());
        }

        let unique = node.unique_id();
        self.shared_to_unique.insert(shared, unique);
        self.partitions.entry(node.node_type()).or_default().insert(unique);
        self.nodes.insert(unique, node);
        Some(old)
    }

    /// Detach a node from every index. A federated scene owned through it
    /// is released.
    pub fn remove_node(&mut self, shared_id: &RepoUuid) -> Option<Node> {
        let unique = self.shared_to_unique.remove(shared_id)?;
        let node = self.forget(&unique)?;
        for parent in node.parents() {
            self.unlink(parent, shared_id);
        }
        self.children.remove(shared_id);
        if self.reference_scenes.remove(shared_id).is_some() {
            debug!(reference = %shared_id, "released federated scene");
        }
        Some(node)
    }

    /// Make `child` a child of `parent`.
    pub fn add_inheritance(&mut self, parent: &RepoUuid, child: &RepoUuid) -> Result<(), GraphIssue> {
        if !self.shared_to_unique.contains_key(parent) {
            return Err(GraphIssue::MissingNode(*parent));
        }
        let node = self
            .get_by_shared_mut(child)
            .ok_or(GraphIssue::MissingNode(*child))?;
        node.add_parent(*parent);
        let unique = node.unique_id();
        if self.root == Some(unique) {
            self.root = None;
        }
        let bucket = self.children.entry(*parent).or_default();
        if !bucket.contains(child) {
            bucket.push(*child);
        }
        Ok(())
    }

    /// Remove the edge `parent -> child`.
    pub fn abandon_child(&mut self, parent: &RepoUuid, child: &RepoUuid) -> Result<(), GraphIssue> {
        let linked = self
            .children
            .get(parent)
            .is_some_and(|bucket| bucket.contains(child));
        if !linked {
            return Err(GraphIssue::MissingChild {
                parent: *parent,
                child: *child,
            });
        }
        self.unlink(parent, child);
        if let Some(node) = self.get_by_shared_mut(child) {
            node.remove_parent(parent);
        }
        Ok(())
    }

    /// Insert `node` on the edge `parent -> child`: `node` takes `parent` as
    /// its parent and becomes the only replacement for it on `child`.
    pub fn interpose(&mut self, parent: &RepoUuid, child: &RepoUuid, mut node: Node) -> Result<(), GraphIssue> {
        self.abandon_child(parent, child)?;
        node.set_parents([*parent]);
        let between = node.shared_id();
        if let Some(issue) = self.add_node(node) {
            return Err(issue);
        }
        self.add_inheritance(&between, child)
    }

    pub fn set_reference_scene(&mut self, reference: RepoUuid, scene: Scene) {
        self.reference_scenes.insert(reference, scene);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Drop a version from the arena and its partition.
    fn forget(&mut self, unique: &RepoUuid) -> Option<Node> {
        let node = self.nodes.remove(unique)?;
        if let Some(set) = self.partitions.get_mut(&node.node_type()) {
            set.remove(unique);
        }
        if self.root == Some(*unique) {
            self.root = None;
        }
        Some(node)
    }

    fn unlink(&mut self, parent: &RepoUuid, child: &RepoUuid) {
        if let Some(bucket) = self.children.get_mut(parent) {
            bucket.retain(|c| c != child);
            if bucket.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_by_unique(&self, unique_id: &RepoUuid) -> Option<&Node> {
        self.nodes.get(unique_id)
    }

    pub fn get_by_shared(&self, shared_id: &RepoUuid) -> Option<&Node> {
        self.shared_to_unique
            .get(shared_id)
            .and_then(|unique| self.nodes.get(unique))
    }

    pub fn get_by_shared_mut(&mut self, shared_id: &RepoUuid) -> Option<&mut Node> {
        let unique = self.shared_to_unique.get(shared_id)?;
        self.nodes.get_mut(unique)
    }

    pub fn contains_shared(&self, shared_id: &RepoUuid) -> bool {
        self.shared_to_unique.contains_key(shared_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn unique_ids(&self) -> impl Iterator<Item = &RepoUuid> {
        self.nodes.keys()
    }

    pub fn children(&self, parent: &RepoUuid) -> Vec<&Node> {
        self.children
            .get(parent)
            .map(|bucket| bucket.iter().filter_map(|c| self.get_by_shared(c)).collect())
            .unwrap_or_default()
    }

    pub fn children_by_type(&self, parent: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        self.children(parent)
            .into_iter()
            .filter(|n| n.node_type() == node_type)
            .collect()
    }

    /// Descendants of `shared_id` of one type, in pre-order.
    pub fn descendants_by_type(&self, shared_id: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        let mut out = Vec::new();
        let mut seen = HashSet::from([*shared_id]);
        self.collect_descendants(shared_id, node_type, &mut seen, &mut out);
        out
    }

    fn collect_descendants<'a>(
        &'a self,
        parent: &RepoUuid,
        node_type: NodeType,
        seen: &mut HashSet<RepoUuid>,
        out: &mut Vec<&'a Node>,
    ) {
        for child in self.children(parent) {
            if !seen.insert(child.shared_id()) {
                continue;
            }
            if child.node_type() == node_type {
                out.push(child);
            }
            self.collect_descendants(&child.shared_id(), node_type, seen, out);
        }
    }

    pub fn parents_by_type(&self, shared_id: &RepoUuid, node_type: NodeType) -> Vec<&Node> {
        self.get_by_shared(shared_id)
            .map(|node| {
                node.parents()
                    .iter()
                    .filter_map(|p| self.get_by_shared(p))
                    .filter(|p| p.node_type() == node_type)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<&Node> {
        self.partitions
            .get(&node_type)
            .map(|set| set.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn count_of_type(&self, node_type: NodeType) -> usize {
        self.partitions.get(&node_type).map_or(0, BTreeSet::len)
    }

    pub fn reference_scene(&self, reference: &RepoUuid) -> Option<&Scene> {
        self.reference_scenes.get(reference)
    }

    pub fn reference_scene_mut(&mut self, reference: &RepoUuid) -> Option<&mut Scene> {
        self.reference_scenes.get_mut(reference)
    }

    pub fn reference_scenes(&self) -> impl Iterator<Item = (&RepoUuid, &Scene)> {
        self.reference_scenes.iter()
    }

    /// Whether all indexes agree with the arena.
    pub fn is_consistent(&self) -> bool {
        let partitioned: usize = self.partitions.values().map(BTreeSet::len).sum();
        let partitions_ok = partitioned == self.nodes.len()
            && self
                .nodes
                .values()
                .all(|n| self.partitions.get(&n.node_type()).is_some_and(|s| s.contains(&n.unique_id())));
        let with_lineage = self.nodes.values().filter(|n| !n.shared_id().is_nil()).count();
        let lineage_ok = self.shared_to_unique.len() == with_lineage
            && self
                .shared_to_unique
                .iter()
                .all(|(s, u)| self.nodes.get(u).is_some_and(|n| n.shared_id() == *s));
        let edges_ok = self
            .children
            .values()
            .flatten()
            .all(|c| self.shared_to_unique.contains_key(c));
        partitions_ok && lineage_ok && edges_ok
    }
}

impl fmt::Debug for GraphInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphInstance")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("edges", &self.children.values().map(Vec::len).sum::<usize>())
            .field("reference_scenes", &self.reference_scenes.len())
            .finish()
    }
}

/// Equal apart from identity.
fn same_content(a: &Node, b: &Node) -> bool {
    a.kind() == b.kind() && a.name() == b.name() && a.properties() == b.properties()
}
