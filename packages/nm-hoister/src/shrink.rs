use indexmap::IndexSet;
use serde::Serialize;

use crate::{input::NodeId, keys::ident_name, work::WorkTree};

/// A node of the hoisted output tree, stripped down to the public
/// fields.
///
/// Cycles are cut when a node shows up on its own dependency path: the
/// node is re-attached without re-expanding its dependencies. A node
/// depending on itself collapses into its parent.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HoistedNode {
    pub name: String,
    pub ident_name: String,
    pub references: IndexSet<String>,
    pub dependencies: Vec<HoistedNode>,
}

/// Copies the hoisted work tree into its public form.
pub fn shrink_tree(tree: &WorkTree) -> HoistedNode {
    let root = &tree.nodes[tree.root];

    let mut result = HoistedNode {
        name: root.name.clone(),
        ident_name: ident_name(&root.locator).to_string(),
        references: root.references.clone(),
        dependencies: Vec::new(),
    };

    let mut seen = IndexSet::new();
    seen.insert(tree.root);

    let children: Vec<NodeId> = root.dependencies.values().copied().collect();
    for child_id in children {
        add_node(tree, child_id, tree.root, &mut result, &mut seen);
    }

    result
}

fn add_node(
    tree: &WorkTree,
    node_id: NodeId,
    parent_id: NodeId,
    parent: &mut HoistedNode,
    seen: &mut IndexSet<NodeId>,
) {
    let node = &tree.nodes[node_id];
    let is_seen = seen.contains(&node_id);

    let mut result = if parent_id == node_id {
        parent.clone()
    } else {
        HoistedNode {
            name: node.name.clone(),
            ident_name: ident_name(&node.locator).to_string(),
            references: node.references.clone(),
            dependencies: Vec::new(),
        }
    };

    if !is_seen {
        seen.insert(node_id);

        let children: Vec<NodeId> = node
            .dependencies
            .iter()
            .filter(|(name, _)| !node.peer_names.contains(name.as_str()))
            .map(|(_, &dep_id)| dep_id)
            .collect();

        for child_id in children {
            add_node(tree, child_id, node_id, &mut result, seen);
        }

        seen.shift_remove(&node_id);
    }

    parent.dependencies.push(result);
}
