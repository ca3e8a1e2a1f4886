use indexmap::{IndexMap, IndexSet};

use crate::{
    input::{DependencyKind, InputTree, NodeId},
    keys::{make_ident, make_locator},
};

/// Mutable counterpart of an input node, carrying the bookkeeping the
/// hoisting passes need.
#[derive(Clone, Debug)]
pub(crate) struct WorkNode {
    pub(crate) name: String,
    /// Reference strings of all instances merged into this node.
    pub(crate) references: IndexSet<String>,
    pub(crate) locator: String,
    pub(crate) ident: String,
    /// Current dependency view; shrinks as instances hoist away.
    pub(crate) dependencies: IndexMap<String, NodeId>,
    /// What the package originally declared. Never mutated after import.
    pub(crate) original_dependencies: IndexMap<String, NodeId>,
    /// Names that used to live here and were moved toward a root.
    pub(crate) hoisted_dependencies: IndexMap<String, NodeId>,
    pub(crate) peer_names: IndexSet<String>,
    /// Why a child stayed put, per name. Diagnostics only.
    pub(crate) reasons: IndexMap<String, String>,
    /// True when this node has a single path from the tree root and may
    /// be mutated in place. Coupled nodes must be cloned first.
    pub(crate) decoupled: bool,
    pub(crate) is_hoist_border: bool,
    pub(crate) hoist_priority: i32,
    pub(crate) dependency_kind: DependencyKind,
    pub(crate) hoisted_from: IndexMap<String, Vec<String>>,
    pub(crate) hoisted_to: IndexMap<String, String>,
}

impl WorkNode {
    /// Locator qualified by the alias the node lives under; two instances
    /// of one package installed under different aliases get distinct
    /// aliased locators.
    pub(crate) fn aliased_locator(&self) -> String {
        format!("{}@{}", self.name, self.locator)
    }
}

/// The mutable tree the hoisting passes transform. Nodes live in an
/// arena; handles stay valid across mutations, clones are appended.
pub struct WorkTree {
    pub(crate) nodes: Vec<WorkNode>,
    pub(crate) root: NodeId,
}

impl WorkTree {
    /// Imports the input graph into a work tree.
    ///
    /// Work nodes are created one to one from input nodes. A node reached
    /// over a single path from the root is decoupled and may be mutated
    /// in place; any node reached twice shares its subgraph with another
    /// parent, so the whole reachable subgraph is marked coupled and will
    /// be cloned on first write.
    pub fn from_input_tree(input: &InputTree) -> WorkTree {
        let nodes = input
            .nodes
            .iter()
            .map(|node| {
                let dependencies: IndexMap<String, NodeId> = node
                    .dependencies
                    .iter()
                    .map(|&dep_id| (input.nodes[dep_id].name.clone(), dep_id))
                    .collect();

                WorkNode {
                    name: node.name.clone(),
                    references: std::iter::once(node.reference.clone()).collect(),
                    locator: make_locator(&node.ident_name, &node.reference),
                    ident: make_ident(&node.ident_name, &node.reference),
                    original_dependencies: dependencies.clone(),
                    dependencies,
                    hoisted_dependencies: IndexMap::new(),
                    peer_names: node.peer_names.clone(),
                    reasons: IndexMap::new(),
                    decoupled: true,
                    is_hoist_border: false,
                    hoist_priority: node.hoist_priority.unwrap_or(0),
                    dependency_kind: node.dependency_kind.unwrap_or_default(),
                    hoisted_from: IndexMap::new(),
                    hoisted_to: IndexMap::new(),
                }
            })
            .collect();

        let mut tree = WorkTree { nodes, root: input.root };

        let mut seen = IndexSet::new();
        seen.insert(tree.root);
        tree.mark_shared_subgraphs(tree.root, &mut seen);

        tree
    }

    fn mark_shared_subgraphs(&mut self, id: NodeId, seen: &mut IndexSet<NodeId>) {
        let dep_ids: Vec<NodeId> = self.nodes[id].dependencies.values().copied().collect();

        for dep_id in dep_ids {
            if seen.insert(dep_id) {
                self.mark_shared_subgraphs(dep_id, seen);
            } else {
                self.mark_coupled(dep_id);
            }
        }
    }

    fn mark_coupled(&mut self, id: NodeId) {
        let mut marked = IndexSet::new();
        let mut pending = vec![id];

        while let Some(id) = pending.pop() {
            if !marked.insert(id) {
                continue;
            }

            self.nodes[id].decoupled = false;

            let node = &self.nodes[id];
            for (name, &dep_id) in &node.dependencies {
                if !node.peer_names.contains(name) {
                    pending.push(dep_id);
                }
            }
        }
    }

    /// Returns a node safe to mutate on behalf of `parent_id`, cloning it
    /// first when it is still coupled.
    ///
    /// The clone is shallow: it copies the maps, not the nodes behind
    /// them, and the parent's edge is repointed at it. A self-dependency
    /// of the clone is redirected so the clone keeps depending on itself
    /// rather than on the original.
    pub(crate) fn decouple(&mut self, parent_id: NodeId, node_id: NodeId) -> NodeId {
        if self.nodes[node_id].decoupled {
            return node_id;
        }

        let mut clone = self.nodes[node_id].clone();
        clone.decoupled = true;

        let clone_id = self.nodes.len();

        if let Some(&self_dep_id) = clone.dependencies.get(&clone.name) {
            if self.nodes[self_dep_id].ident == clone.ident {
                clone.dependencies.insert(clone.name.clone(), clone_id);
            }
        }

        let name = clone.name.clone();
        self.nodes.push(clone);
        self.nodes[parent_id].dependencies.insert(name, clone_id);

        clone_id
    }
}
