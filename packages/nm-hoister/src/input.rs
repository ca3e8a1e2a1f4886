use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Stable handle of a node inside its tree arena.
pub type NodeId = usize;

/// How a package instance entered the dependency graph.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    #[default]
    Regular,
    /// A project workspace; hoisted into, never hoisted itself.
    Workspace,
    /// A portal pointing outside the installed tree; its dependencies
    /// must stay resolvable without the tree above it.
    ExternalSoftLink,
}

/// A single package instance of the input graph.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputNode {
    /// Alias under which parents depend on this package. Differs from
    /// `ident_name` for aliased installs.
    pub name: String,
    /// Real package name.
    pub ident_name: String,
    /// Version or source string; may carry a virtual prefix separated by
    /// `#`.
    pub reference: String,
    /// Handles of dependency nodes. Cycles are allowed; order carries no
    /// meaning.
    #[serde(default)]
    pub dependencies: IndexSet<NodeId>,
    /// Dependency names this package expects to share with its parent.
    #[serde(default)]
    pub peer_names: IndexSet<String>,
    #[serde(default)]
    pub hoist_priority: Option<i32>,
    #[serde(default)]
    pub dependency_kind: Option<DependencyKind>,
}

/// The dependency graph handed to the hoister. Never mutated; the engine
/// works on its own copy.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InputTree {
    pub nodes: Vec<InputNode>,
    pub root: NodeId,
}

impl InputTree {
    /// Checks that every handle points into the arena.
    pub fn validate(&self) -> Result<(), Error> {
        if self.root >= self.nodes.len() {
            return Err(Error::InvalidInputTree(format!(
                "root id {} is out of bounds",
                self.root
            )));
        }

        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(&dep_id) = node.dependencies.iter().find(|&&dep_id| dep_id >= self.nodes.len()) {
                return Err(Error::InvalidInputTree(format!(
                    "dependency id {dep_id} of node {id} is out of bounds"
                )));
            }
        }

        Ok(())
    }
}
