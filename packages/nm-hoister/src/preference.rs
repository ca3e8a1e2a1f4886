use indexmap::{IndexMap, IndexSet};

use crate::{
    input::NodeId,
    work::{WorkNode, WorkTree},
};

/// Which parents pull in a given alias + ident pair. Among instances
/// competing for one name, the one backed by the most distinct parent
/// idents wins the right to be hoisted.
pub(crate) type PreferenceMap = IndexMap<String, PreferenceEntry>;

#[derive(Debug, Default)]
pub(crate) struct PreferenceEntry {
    pub(crate) dependents: IndexSet<String>,
    pub(crate) peer_dependents: IndexSet<String>,
    pub(crate) hoist_priority: i32,
}

impl PreferenceEntry {
    pub(crate) fn usage_count(&self) -> usize {
        self.dependents.len() + self.peer_dependents.len()
    }
}

pub(crate) fn preference_key(node: &WorkNode) -> String {
    format!("{}@{}", node.name, node.ident)
}

fn entry<'m>(map: &'m mut PreferenceMap, node: &WorkNode) -> &'m mut PreferenceEntry {
    map.entry(preference_key(node)).or_default()
}

/// Walks the non-peer dependency subgraph of `root_id` and accumulates,
/// per alias + ident, the idents of the parents depending on it. Peer
/// edges count toward the usage total but are not traversed.
pub(crate) fn build_preference_map(tree: &WorkTree, root_id: NodeId) -> PreferenceMap {
    let mut map = PreferenceMap::new();
    let mut seen = IndexSet::new();
    seen.insert(tree.root);

    fn add_dependent(
        tree: &WorkTree,
        dependent_id: NodeId,
        node_id: NodeId,
        map: &mut PreferenceMap,
        seen: &mut IndexSet<NodeId>,
    ) {
        let is_seen = seen.contains(&node_id);

        let dependent = &tree.nodes[dependent_id];
        let node = &tree.nodes[node_id];
        entry(map, node).dependents.insert(dependent.ident.clone());

        if !is_seen {
            seen.insert(node_id);

            for dep_id in node.dependencies.values() {
                let dep = &tree.nodes[*dep_id];

                let dep_entry = entry(map, dep);
                dep_entry.hoist_priority = dep_entry.hoist_priority.max(dep.hoist_priority);

                if node.peer_names.contains(&dep.name) {
                    dep_entry.peer_dependents.insert(node.ident.clone());
                } else {
                    add_dependent(tree, node_id, *dep_id, map, seen);
                }
            }
        }
    }

    let root = &tree.nodes[root_id];
    for dep_id in root.dependencies.values() {
        let dep = &tree.nodes[*dep_id];
        if !root.peer_names.contains(&dep.name) {
            add_dependent(tree, root_id, *dep_id, &mut map, &mut seen);
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use crate::input::{InputNode, InputTree};

    use super::*;

    fn package(name: &str, reference: &str, dependencies: &[NodeId]) -> InputNode {
        InputNode {
            name: name.to_string(),
            ident_name: name.to_string(),
            reference: reference.to_string(),
            dependencies: dependencies.iter().copied().collect(),
            peer_names: IndexSet::new(),
            hoist_priority: None,
            dependency_kind: None,
        }
    }

    #[test]
    fn counts_distinct_parent_idents() {
        // . -> A -> X@1
        //   -> B -> X@1
        //   -> C -> X@2
        let input = InputTree {
            nodes: vec![
                package(".", "workspace:.", &[1, 2, 3]),
                package("A", "npm:1.0.0", &[4]),
                package("B", "npm:1.0.0", &[4]),
                package("C", "npm:1.0.0", &[5]),
                package("X", "npm:1.0.0", &[]),
                package("X", "npm:2.0.0", &[]),
            ],
            root: 0,
        };

        let tree = WorkTree::from_input_tree(&input);
        let map = build_preference_map(&tree, tree.root);

        assert_eq!(map["X@X@npm:1.0.0"].usage_count(), 2);
        assert_eq!(map["X@X@npm:2.0.0"].usage_count(), 1);
    }
}
