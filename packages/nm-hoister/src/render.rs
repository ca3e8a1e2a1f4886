use indexmap::IndexSet;
use itertools::Itertools;

use crate::{
    input::NodeId,
    keys::{ident_name, split_key},
    work::WorkTree,
};

const MAX_RENDERED_NODES: usize = 50_000;

/// Compact display form of a locator or ident: the workspace root shows
/// as `.`, virtual instances get a `v:` prefix, workspaces a `w:` prefix,
/// and the protocol noise is dropped from the version.
pub(crate) fn pretty_locator(locator: &str) -> String {
    let (raw_name, reference) = split_key(locator);

    let mut name = match raw_name.strip_suffix("$wsroot$") {
        Some(stripped) => format!("wh:{stripped}"),
        None => raw_name.to_string(),
    };

    if reference.is_empty() {
        return name;
    }
    if reference == "workspace:." {
        return ".".to_string();
    }

    let source_version = reference.split('#').nth(1).unwrap_or(reference);
    let mut version = source_version.replace("npm:", "");

    if reference.starts_with("virtual") {
        name = format!("v:{name}");
    }

    if version.starts_with("workspace") {
        name = format!("w:{name}");
        version = String::new();
    }

    if version.is_empty() {
        name
    } else {
        format!("{name}@{version}")
    }
}

/// Renders a work tree in the `yarn why` style, dependencies annotated
/// with the reasons they stayed put. Troubleshooting only.
pub struct TreeRenderer<'t> {
    tree: &'t WorkTree,
}

impl<'t> TreeRenderer<'t> {
    pub fn new(tree: &'t WorkTree) -> TreeRenderer<'t> {
        TreeRenderer { tree }
    }

    pub fn render(&self) -> String {
        let mut rendered_nodes = 0;
        let mut parents = IndexSet::new();

        let mut output = self.render_node(self.tree.root, &mut parents, "", &mut rendered_nodes);
        if rendered_nodes > MAX_RENDERED_NODES {
            output.push_str("\nTree is too large, part of the tree has been dumped.\n");
        }

        output
    }

    fn render_node(
        &self,
        node_id: NodeId,
        parents: &mut IndexSet<NodeId>,
        prefix: &str,
        rendered_nodes: &mut usize,
    ) -> String {
        if *rendered_nodes > MAX_RENDERED_NODES || parents.contains(&node_id) {
            return String::new();
        }

        *rendered_nodes += 1;
        parents.insert(node_id);

        let node = &self.tree.nodes[node_id];

        let children: Vec<NodeId> = node
            .dependencies
            .values()
            .copied()
            .sorted_by(|&id1, &id2| self.tree.nodes[id1].name.cmp(&self.tree.nodes[id2].name))
            .collect();

        let mut output = String::new();

        for (idx, &child_id) in children.iter().enumerate() {
            let child = &self.tree.nodes[child_id];
            if node.peer_names.contains(&child.name) {
                continue;
            }

            let branch = if idx < children.len() - 1 { "├─" } else { "└─" };
            let cycle_marker = if parents.contains(&child_id) { ">" } else { "" };
            let alias = if ident_name(&child.locator) != child.name {
                format!("a:{}:", child.name)
            } else {
                String::new()
            };
            let reason = node
                .reasons
                .get(&child.name)
                .map(|reason| format!(" {reason}"))
                .unwrap_or_default();

            output.push_str(&format!(
                "{prefix}{branch}{cycle_marker}{alias}{}{reason}\n",
                pretty_locator(&child.locator)
            ));

            let child_prefix = format!("{prefix}{}", if idx < children.len() - 1 { "│ " } else { "  " });
            output.push_str(&self.render_node(child_id, parents, &child_prefix, rendered_nodes));
        }

        parents.shift_remove(&node_id);

        output
    }
}
