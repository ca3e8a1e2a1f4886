//! Package dependency hoisting engine.
//!
//! Takes a dependency graph of packages and lifts instances toward the
//! root until a flat directory layout can represent the graph, while
//! keeping two contracts intact:
//!
//! 1. Require promise: every package must still resolve each declared
//!    dependency, nearest enclosing instance first, to the exact version
//!    it asked for.
//! 2. Peer dependency promise: a package peer-depending on some name
//!    must share that instance with its direct parent.
//!
//! The overall recipe:
//!
//! 1. Copy the input graph into a mutable work tree. A node reachable
//!    over several paths cannot be mutated in place, so such nodes are
//!    marked and cloned the moment some parent needs to change them, as
//!    if the graph had been unrolled into a tree.
//!
//! 2. Hoist into the top root node first, then into each of its
//!    children, and so on; the node currently being filled is the hoist
//!    root.
//!
//! 3. For every package name reachable from the hoist root, build a list
//!    of candidate versions in descending preference, by hoist priority
//!    and then by the number of distinct parents using the version. Only
//!    the head of a list may be hoisted; when it fails to reach the
//!    root, the next candidate is promoted and the pass repeats.
//!
//! 4. Walk the dependencies of the root's children in an order that puts
//!    peer providers before the packages that rely on them, and ask for
//!    each node whether it may move up. The answer is yes, no, or a set
//!    of parent-provided peers the node could follow upward.
//!
//! 5. Every definite no drags down, transitively, the nodes waiting on
//!    it. Whatever remains — plain yeses plus cycles of nodes waiting on
//!    one another — is hoisted. Cycles of mutually peer-dependent
//!    packages therefore move as a group.
//!
//! 6. Nodes freshly attached to the hoist root are walked again, since
//!    whatever they host may now bubble up too. Once nothing moves, each
//!    remaining child of the root becomes the next hoist root.
//!
//! 7. Whole-tree sweeps repeat until one of them changes nothing.
//!
//! The work tree is arena-backed: nodes live in a flat vector and every
//! reference between them is an index, which keeps cyclic graphs
//! representable without reference counting.

mod check;
mod engine;
mod error;
mod input;
mod keys;
mod plan;
mod preference;
mod render;
mod shrink;
mod work;

pub use engine::{DebugLevel, HoistOptions, Hoister};
pub use error::{Error, PromiseViolation, ViolationKind};
pub use input::{DependencyKind, InputNode, InputTree, NodeId};
pub use render::TreeRenderer;
pub use shrink::{HoistedNode, shrink_tree};
pub use work::WorkTree;

/// Hoists a package tree.
///
/// The input is not mutated: the engine builds a work copy, transforms
/// it and returns the stripped-down result.
pub fn hoist(tree: &InputTree, options: &HoistOptions) -> Result<HoistedNode, Error> {
    let mut work_tree = WorkTree::from_input_tree(tree);

    let mut hoister = Hoister::new(&mut work_tree);
    hoister.set_options(options);
    hoister.hoist()?;

    Ok(shrink_tree(&work_tree))
}
