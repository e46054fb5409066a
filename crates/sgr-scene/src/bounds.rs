use sgr_types::{BoundingBox, Matrix4, RepoUuid};

use crate::graph::{GraphInstance, GraphType};
use crate::node::NodeKind;
use crate::scene::Scene;

impl Scene {
    /// World-space bounds of the scene.
    ///
    /// Uses the optimized graph when one is loaded, else the working graph.
    /// Transformations compose from the root down; Reference nodes
    /// contribute their federated scene's bounds. `None` for a scene
    /// without meshes.
    pub fn scene_bounding_box(&self) -> Option<BoundingBox> {
        let graph_type = if self.has_stash() {
            GraphType::Optimized
        } else {
            GraphType::Default
        };
        let graph = self.graph(graph_type);
        let root = graph.root()?;
        let mut bounds = None;
        let mut path = Vec::new();
        accumulate(graph, &root.shared_id(), Matrix4::IDENTITY, &mut path, &mut bounds);
        bounds
    }
}

fn accumulate(
    graph: &GraphInstance,
    shared_id: &RepoUuid,
    parent_matrix: Matrix4,
    path: &mut Vec<RepoUuid>,
    bounds: &mut Option<BoundingBox>,
) {
    // Shared nodes are visited once per parent path; only a node already on
    // the current path is skipped.
    if path.contains(shared_id) {
        return;
    }
    let Some(node) = graph.get_by_shared(shared_id) else {
        return;
    };

    let mut matrix = parent_matrix;
    let local = match node.kind() {
        NodeKind::Transformation { matrix: m } => {
            matrix = parent_matrix * *m;
            None
        }
        NodeKind::Mesh { bounds: Some(b) } => Some(b.transformed(&matrix)),
        NodeKind::Reference(_) => graph
            .reference_scene(shared_id)
            .and_then(Scene::scene_bounding_box)
            .map(|b| b.transformed(&matrix)),
        _ => None,
    };
    if let Some(local) = local {
        match bounds {
            Some(b) => b.encapsulate(&local),
            None => *bounds = Some(local),
        }
    }

    path.push(*shared_id);
    for child in graph.children(shared_id) {
        accumulate(graph, &child.shared_id(), matrix, path, bounds);
    }
    path.pop();
}
