use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::{
    error::{PromiseViolation, ViolationKind},
    input::NodeId,
    render::pretty_locator,
    work::WorkTree,
};

/// Verifies both hoisting contracts over the whole work tree: every
/// original non-peer dependency must resolve, nearest enclosing instance
/// first, to its declared ident, and every peer-named dependency must be
/// the very instance the parent sees.
pub(crate) fn self_check(tree: &WorkTree) -> Vec<PromiseViolation> {
    let mut violations = Vec::new();
    let mut seen = IndexSet::new();
    let mut parents = IndexSet::new();

    let root_deps = tree.nodes[tree.root].dependencies.clone();
    check_node(
        tree,
        tree.root,
        &root_deps,
        tree.root,
        &mut violations,
        &mut seen,
        &mut parents,
    );

    violations
}

fn check_node(
    tree: &WorkTree,
    node_id: NodeId,
    inherited: &IndexMap<String, NodeId>,
    parent_id: NodeId,
    violations: &mut Vec<PromiseViolation>,
    seen: &mut IndexSet<NodeId>,
    parents: &mut IndexSet<NodeId>,
) {
    if !seen.insert(node_id) {
        return;
    }
    if parents.contains(&node_id) {
        return;
    }

    let node = &tree.nodes[node_id];

    let mut visible = inherited.clone();
    for (name, &dep_id) in &node.dependencies {
        if !node.peer_names.contains(name) {
            visible.insert(name.clone(), dep_id);
        }
    }

    let tree_path = parents
        .iter()
        .chain(std::iter::once(&node_id))
        .map(|&id| pretty_locator(&tree.nodes[id].locator))
        .join("→");

    for (name, &original_id) in &node.original_dependencies {
        let original = &tree.nodes[original_id];

        if node.peer_names.contains(name) {
            let parent_dep_id = inherited.get(name);
            let own_dep_id = visible.get(name);
            let parent_dep = parent_dep_id.map(|&id| &tree.nodes[id]);

            if parent_dep.is_none()
                || parent_dep_id != own_dep_id
                || parent_dep.is_some_and(|dep| dep.ident != original.ident)
            {
                violations.push(PromiseViolation {
                    path: tree_path.clone(),
                    kind: ViolationKind::PeerMismatch {
                        expected: original.ident.clone(),
                        found: parent_dep.map(|dep| dep.ident.clone()),
                    },
                });
            }
        } else {
            let parent = &tree.nodes[parent_id];
            let hoisted_from = parent
                .hoisted_from
                .get(&node.name)
                .map(|entries| entries.join(", "));
            let hoisted_to = node.hoisted_to.get(name).cloned();

            match visible.get(name) {
                None => violations.push(PromiseViolation {
                    path: tree_path.clone(),
                    kind: ViolationKind::MissingRequire {
                        name: name.clone(),
                        hoisted_from,
                        hoisted_to,
                    },
                }),
                Some(&dep_id) => {
                    let dep = &tree.nodes[dep_id];
                    if dep.ident != original.ident {
                        violations.push(PromiseViolation {
                            path: tree_path.clone(),
                            kind: ViolationKind::RequireMismatch {
                                name: name.clone(),
                                expected: original.ident.clone(),
                                found: dep.ident.clone(),
                                hoisted_from,
                                hoisted_to,
                            },
                        });
                    }
                }
            }
        }
    }

    parents.insert(node_id);

    for (name, &dep_id) in &node.dependencies {
        if !node.peer_names.contains(name) {
            check_node(tree, dep_id, &visible, node_id, violations, seen, parents);
        }
    }

    parents.shift_remove(&node_id);
}
