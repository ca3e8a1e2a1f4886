use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;

use crate::{
    input::{DependencyKind, NodeId},
    keys::split_key,
    preference::PreferenceMap,
    render::pretty_locator,
    work::{WorkNode, WorkTree},
};

/// Names blocked from hoisting out of a parent by a conflicting instance
/// somewhere between the hoist root and the parent. Hoisting such a name
/// later invalidates earlier verdicts, so it requests another round.
pub(crate) type ShadowedNodes = IndexMap<NodeId, IndexSet<String>>;

/// Answer to "can this node be lifted into the current hoist root?".
#[derive(Clone, Debug)]
pub(crate) enum HoistVerdict {
    /// Every constraint holds.
    Hoist,
    /// Some constraint is violated; the node stays where it is.
    Keep { reason: Option<String> },
    /// Hoistable iff the given parent-provided peers get hoisted too.
    DependsOn { peers: IndexSet<NodeId> },
}

impl HoistVerdict {
    pub(crate) fn is_hoist(&self) -> bool {
        matches!(self, HoistVerdict::Hoist)
    }

    pub(crate) fn is_keep(&self) -> bool {
        matches!(self, HoistVerdict::Keep { .. })
    }

    pub(crate) fn reason(&self) -> Option<&str> {
        match self {
            HoistVerdict::Keep { reason } => reason.as_deref(),
            _ => None,
        }
    }
}

/// Read-only state shared by every verdict of one hoisting pass.
pub(crate) struct HoistContext<'a> {
    /// The hoist root everything is measured against.
    pub(crate) root_id: NodeId,
    /// Path from the tree root to the hoist root.
    pub(crate) root_path: &'a [NodeId],
    pub(crate) root_path_locators: &'a IndexSet<String>,
    /// Names claimed above the hoist root, with the instances serving
    /// them.
    pub(crate) used_dependencies: &'a IndexMap<String, NodeId>,
    /// Currently attempted candidate per name.
    pub(crate) hoist_idents: &'a IndexMap<String, String>,
    /// Full candidate lists per name, most preferred first.
    pub(crate) hoist_ident_map: &'a IndexMap<String, Vec<String>>,
    /// Shadowed names recorded by the parent sweep.
    pub(crate) parent_shadowed: &'a ShadowedNodes,
    pub(crate) output_reason: bool,
    pub(crate) fast_lookup: bool,
}

/// Builds the per-name candidate ident lists for a hoist root, most
/// preferred first.
///
/// The root's own name and the names it already hosts are pinned to a
/// single candidate; other versions of those packages cannot win. The
/// remaining names are filled from the preference map, highest priority
/// first, then by usage.
pub(crate) fn hoist_ident_map(
    tree: &WorkTree,
    root_id: NodeId,
    preferences: &PreferenceMap,
) -> IndexMap<String, Vec<String>> {
    let root = &tree.nodes[root_id];

    let mut ident_map: IndexMap<String, Vec<String>> = IndexMap::new();
    ident_map.insert(root.name.clone(), vec![root.ident.clone()]);

    for dep_id in root.dependencies.values() {
        let dep = &tree.nodes[*dep_id];
        if !root.peer_names.contains(&dep.name) {
            ident_map.insert(dep.name.clone(), vec![dep.ident.clone()]);
        }
    }

    let pinned: IndexSet<String> = ident_map.keys().cloned().collect();

    let mut keys: Vec<&String> = preferences.keys().collect();
    keys.sort_by(|key1, key2| {
        let entry1 = &preferences[*key1];
        let entry2 = &preferences[*key2];

        entry2
            .hoist_priority
            .cmp(&entry1.hoist_priority)
            .then_with(|| entry2.usage_count().cmp(&entry1.usage_count()))
    });

    for key in keys {
        let (name, ident) = split_key(key);
        if root.peer_names.contains(name) || pinned.contains(name) {
            continue;
        }

        let idents = ident_map.entry(name.to_string()).or_default();
        if !idents.iter().any(|existing| existing == ident) {
            idents.push(ident.to_string());
        }
    }

    ident_map
}

/// Regular (non-peer) dependencies of a node, ordered so that whenever a
/// sibling peer-depends on another sibling, the provider comes first.
/// Simple nodes hoisting before their peer dependents keeps the number
/// of deferred verdicts down.
pub(crate) fn sorted_regular_dependencies(tree: &WorkTree, node_id: NodeId) -> Vec<NodeId> {
    let node = &tree.nodes[node_id];
    let mut sorted: Vec<NodeId> = Vec::new();
    let mut sorted_set: IndexSet<NodeId> = IndexSet::new();

    fn add_dep(
        tree: &WorkTree,
        node: &WorkNode,
        dep_id: NodeId,
        sorted: &mut Vec<NodeId>,
        sorted_set: &mut IndexSet<NodeId>,
        seen: &mut IndexSet<NodeId>,
    ) {
        if !seen.insert(dep_id) {
            return;
        }

        let dep = &tree.nodes[dep_id];
        for peer_name in &dep.peer_names {
            if node.peer_names.contains(peer_name) {
                continue;
            }

            if let Some(&provider_id) = node.dependencies.get(peer_name) {
                if !sorted_set.contains(&provider_id) {
                    add_dep(tree, node, provider_id, sorted, sorted_set, seen);
                }
            }
        }

        if sorted_set.insert(dep_id) {
            sorted.push(dep_id);
        }
    }

    for (name, &dep_id) in &node.dependencies {
        if !node.peer_names.contains(name) {
            let mut seen = IndexSet::new();
            add_dep(tree, node, dep_id, &mut sorted, &mut sorted_set, &mut seen);
        }
    }

    sorted
}

/// Names resolved above the hoist root, first-round variant: every
/// previously hoisted dependency is still where the current sweep put
/// it, so collecting `hoisted_dependencies` over the subgraph is enough.
pub(crate) fn zero_round_used_dependencies(
    tree: &WorkTree,
    root_path: &[NodeId],
) -> IndexMap<String, NodeId> {
    let mut used = IndexMap::new();
    let mut seen = IndexSet::new();

    fn collect(
        tree: &WorkTree,
        node_id: NodeId,
        used: &mut IndexMap<String, NodeId>,
        seen: &mut IndexSet<NodeId>,
    ) {
        if !seen.insert(node_id) {
            return;
        }

        let node = &tree.nodes[node_id];

        for &dep_id in node.hoisted_dependencies.values() {
            used.insert(tree.nodes[dep_id].name.clone(), dep_id);
        }

        for (name, &dep_id) in &node.dependencies {
            if !node.peer_names.contains(name) {
                collect(tree, dep_id, used, seen);
            }
        }
    }

    collect(tree, root_path[root_path.len() - 1], &mut used, &mut seen);

    used
}

/// Names resolved above the hoist root, later-round variant. Earlier
/// rounds may have moved instances around, so each previously hoisted
/// name is resolved through the root path again, and a name redefined at
/// some level hides the ancestor copy for the whole subtree below it.
pub(crate) fn used_dependencies(tree: &WorkTree, root_path: &[NodeId]) -> IndexMap<String, NodeId> {
    let mut used = IndexMap::new();
    let mut seen = IndexSet::new();

    fn collect(
        tree: &WorkTree,
        root_path: &[NodeId],
        node_id: NodeId,
        hidden: &IndexSet<String>,
        used: &mut IndexMap<String, NodeId>,
        seen: &mut IndexSet<NodeId>,
    ) {
        if !seen.insert(node_id) {
            return;
        }

        let node = &tree.nodes[node_id];

        for &dep_id in node.hoisted_dependencies.values() {
            let dep = &tree.nodes[dep_id];
            if hidden.contains(&dep.name) {
                continue;
            }

            for &path_id in root_path {
                if let Some(&reachable_id) = tree.nodes[path_id].dependencies.get(&dep.name) {
                    used.insert(dep.name.clone(), reachable_id);
                }
            }
        }

        let mut children_hidden = hidden.clone();
        for name in node.dependencies.keys() {
            children_hidden.insert(name.clone());
        }

        for (name, &dep_id) in &node.dependencies {
            if !node.peer_names.contains(name) {
                collect(tree, root_path, dep_id, &children_hidden, used, seen);
            }
        }
    }

    collect(
        tree,
        root_path,
        root_path[root_path.len() - 1],
        &IndexSet::new(),
        &mut used,
        &mut seen,
    );

    used
}

fn has_unhoisted_dependencies(tree: &WorkTree, node_id: NodeId) -> bool {
    let node = &tree.nodes[node_id];
    node.dependencies.iter().any(|(name, &dep_id)| {
        !node.peer_names.contains(name) && tree.nodes[dep_id].ident != node.ident
    })
}

/// Classifies a candidate: `node_id` is a child of the last entry of
/// `node_path`, and `node_path[0]` is the hoist root.
///
/// The require promise is checked against everything the candidate's
/// name would collide with between the root and the parent; the peer
/// promise is checked by walking the parent chain for every peer name.
/// A peer still supplied by the immediate parent is not fatal: it turns
/// the verdict into `DependsOn`, resolved once all verdicts of the
/// parent are known.
pub(crate) fn node_hoist_info(
    tree: &WorkTree,
    ctx: &HoistContext<'_>,
    node_path: &[NodeId],
    node_id: NodeId,
    shadowed: &mut ShadowedNodes,
) -> HoistVerdict {
    let node = &tree.nodes[node_id];
    let parent_id = node_path[node_path.len() - 1];
    let parent = &tree.nodes[parent_id];
    let root = &tree.nodes[ctx.root_id];

    let reason_root = ctx.output_reason.then(|| {
        ctx.root_path_locators
            .iter()
            .map(|locator| pretty_locator(locator))
            .join("→")
    });

    // Self-references stay where they are.
    if node.ident == parent.ident {
        return HoistVerdict::Keep {
            reason: ctx.output_reason.then(|| "- self-reference".to_string()),
        };
    }

    if node.dependency_kind == DependencyKind::Workspace {
        return HoistVerdict::Keep {
            reason: ctx.output_reason.then(|| "- workspace".to_string()),
        };
    }

    if node.dependency_kind == DependencyKind::ExternalSoftLink
        && has_unhoisted_dependencies(tree, node_id)
    {
        return HoistVerdict::Keep {
            reason: ctx
                .output_reason
                .then(|| "- external soft link with unhoisted dependencies".to_string()),
        };
    }

    // The root receives this name from its own parent; hosting a copy
    // would shadow the shared peer instance.
    if root.peer_names.contains(&node.name) {
        let reason = reason_root.as_ref().map(|at| {
            match root.original_dependencies.get(&node.name) {
                Some(&original_id) => format!(
                    "- cannot shadow peer: {} at {}",
                    pretty_locator(&tree.nodes[original_id].locator),
                    at
                ),
                None => format!("- cannot shadow peer: {} at {}", node.name, at),
            }
        });
        return HoistVerdict::Keep { reason };
    }

    if let Some(&used_id) = ctx.used_dependencies.get(&node.name) {
        let used = &tree.nodes[used_id];
        if used.ident != node.ident {
            let reason = reason_root
                .as_ref()
                .map(|at| format!("- filled by: {} at {}", pretty_locator(&used.locator), at));
            return HoistVerdict::Keep { reason };
        }
    }

    // An intermediate ancestor holding another instance of this name
    // would capture the candidate's lookups once its own copy is gone.
    for idx in (1..node_path.len()).rev() {
        let ancestor = &tree.nodes[node_path[idx]];
        if let Some(&ancestor_dep_id) = ancestor.dependencies.get(&node.name) {
            let ancestor_dep = &tree.nodes[ancestor_dep_id];
            if ancestor_dep.ident == node.ident {
                continue;
            }

            shadowed
                .entry(parent_id)
                .or_default()
                .insert(node.name.clone());

            let reason = ctx.output_reason.then(|| {
                format!(
                    "- filled by {} at {}",
                    pretty_locator(&ancestor_dep.locator),
                    node_path[..idx]
                        .iter()
                        .map(|&id| pretty_locator(&tree.nodes[id].locator))
                        .join("→")
                )
            });
            return HoistVerdict::Keep { reason };
        }
    }

    match ctx.hoist_idents.get(&node.name) {
        Some(ident) if *ident == node.ident => {}
        _ => {
            let reason = reason_root.as_ref().and_then(|at| {
                ctx.hoist_ident_map
                    .get(&node.name)
                    .map(|idents| format!("- filled by: {} at {}", pretty_locator(&idents[0]), at))
            });
            return HoistVerdict::Keep { reason };
        }
    }

    // Peer walk: each peer must either already live at the root, or be
    // supplied by the immediate parent (in which case this candidate can
    // only follow it up), or be forwarded further by a peer-depending
    // ancestor.
    let mut depends_on: IndexSet<NodeId> = IndexSet::new();
    let mut check_list: IndexSet<String> = node.peer_names.iter().cloned().collect();

    for idx in (1..node_path.len()).rev() {
        let ancestor = &tree.nodes[node_path[idx]];
        let mut resolved = Vec::new();

        for name in &check_list {
            if ancestor.peer_names.contains(name) && ancestor.original_dependencies.contains_key(name) {
                continue;
            }

            if let Some(&ancestor_dep_id) = ancestor.dependencies.get(name) {
                if root.dependencies.get(name) != Some(&ancestor_dep_id) {
                    if idx == node_path.len() - 1 {
                        depends_on.insert(ancestor_dep_id);
                    } else {
                        let reason = reason_root.as_ref().map(|at| {
                            format!(
                                "- peer dependency {} from parent {} was not hoisted to {}",
                                pretty_locator(&tree.nodes[ancestor_dep_id].locator),
                                pretty_locator(&ancestor.locator),
                                at
                            )
                        });
                        return HoistVerdict::Keep { reason };
                    }
                }
            }

            resolved.push(name.clone());
        }

        for name in resolved {
            check_list.shift_remove(&name);
        }
    }

    // Later rounds: names this candidate once delegated upward must still
    // resolve to the same idents from the root.
    if !ctx.fast_lookup {
        for &hoisted_id in node.hoisted_dependencies.values() {
            let hoisted = &tree.nodes[hoisted_id];

            let available_id = ctx
                .used_dependencies
                .get(&hoisted.name)
                .or_else(|| root.dependencies.get(&hoisted.name));

            if let Some(&available_id) = available_id {
                let available = &tree.nodes[available_id];
                if available.ident != hoisted.ident {
                    let reason = ctx.output_reason.then(|| {
                        format!(
                            "- previously hoisted dependency mismatch, needed: {}, available: {}",
                            pretty_locator(&hoisted.locator),
                            pretty_locator(&available.locator)
                        )
                    });
                    return HoistVerdict::Keep { reason };
                }
            }
        }
    }

    if depends_on.is_empty() {
        HoistVerdict::Hoist
    } else {
        HoistVerdict::DependsOn { peers: depends_on }
    }
}
