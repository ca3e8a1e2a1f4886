use std::time::Instant;

use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{debug, info};

use crate::{
    check::self_check,
    error::Error,
    input::{DependencyKind, NodeId},
    plan::{
        HoistContext, HoistVerdict, ShadowedNodes, hoist_ident_map, node_hoist_info,
        sorted_regular_dependencies, used_dependencies, zero_round_used_dependencies,
    },
    preference::build_preference_map,
    render::{TreeRenderer, pretty_locator},
    work::WorkTree,
};

/// Diagnostics verbosity. Read from `NM_DEBUG_LEVEL` unless set
/// explicitly.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum DebugLevel {
    None = -1,
    /// Log the hoisting time.
    Perf = 0,
    /// Run the self-check once hoisting is finished.
    Check = 1,
    /// Collect the reasons dependencies stayed put and log the annotated
    /// tree.
    Reasons = 2,
    /// Run the self-check after every mutation pass.
    IntensiveCheck = 9,
}

impl DebugLevel {
    pub fn from_env() -> DebugLevel {
        std::env::var("NM_DEBUG_LEVEL")
            .ok()
            .and_then(|value| value.parse::<i32>().ok())
            .map(DebugLevel::from_number)
            .unwrap_or(DebugLevel::None)
    }

    pub fn from_number(level: i32) -> DebugLevel {
        match level {
            0 => DebugLevel::Perf,
            1 => DebugLevel::Check,
            2..=8 => DebugLevel::Reasons,
            9.. => DebugLevel::IntensiveCheck,
            _ => DebugLevel::None,
        }
    }
}

/// Options of the hoisting engine.
#[derive(Clone, Debug, Default)]
pub struct HoistOptions {
    /// Runs the self-check after every mutation pass. Expensive; implied
    /// by `DebugLevel::IntensiveCheck`.
    pub check: Option<bool>,
    /// Defaults to the `NM_DEBUG_LEVEL` environment variable.
    pub debug_level: Option<DebugLevel>,
    /// Hoist borders, keyed by parent locator. The named dependencies can
    /// still be hoisted themselves, but nothing is hoisted through them.
    pub hoisting_limits: Option<IndexMap<String, IndexSet<String>>>,
}

#[derive(Clone, Debug)]
struct ResolvedOptions {
    check: bool,
    debug_level: DebugLevel,
    hoisting_limits: IndexMap<String, IndexSet<String>>,
}

impl ResolvedOptions {
    fn resolve(options: &HoistOptions) -> ResolvedOptions {
        let debug_level = options.debug_level.unwrap_or_else(DebugLevel::from_env);

        ResolvedOptions {
            check: options.check.unwrap_or(debug_level >= DebugLevel::IntensiveCheck),
            debug_level,
            hoisting_limits: options.hoisting_limits.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct HoistOutcome {
    /// Some verdict of this pass was taken against state another pass has
    /// since invalidated; the whole sweep must run again.
    another_round_needed: bool,
    graph_changed: bool,
}

impl HoistOutcome {
    fn merge(&mut self, other: HoistOutcome) {
        self.another_round_needed |= other.another_round_needed;
        self.graph_changed |= other.graph_changed;
    }
}

/// Mutable state of one `hoist_graph` walk.
struct WalkState {
    /// Nodes freshly attached to the hoist root; each gets its own walk
    /// so whatever it hosts can bubble up too.
    new_nodes: IndexSet<NodeId>,
    /// Parents currently on the walk stack.
    seen: IndexSet<NodeId>,
    outcome: HoistOutcome,
}

/// Drives hoisting over a work tree.
///
/// Hoisting happens root by root: everything that can live directly
/// under the current hoist root is lifted there, then each remaining
/// child becomes the next hoist root. Whole-tree sweeps repeat until one
/// of them changes nothing.
pub struct Hoister<'t> {
    tree: &'t mut WorkTree,
    options: ResolvedOptions,
    fast_lookup_possible: bool,
}

impl<'t> Hoister<'t> {
    pub fn new(tree: &'t mut WorkTree) -> Hoister<'t> {
        Hoister {
            tree,
            options: ResolvedOptions::resolve(&HoistOptions::default()),
            fast_lookup_possible: true,
        }
    }

    pub fn set_options(&mut self, options: &HoistOptions) {
        self.options = ResolvedOptions::resolve(options);
    }

    /// Hoists the tree to a fixed point.
    pub fn hoist(&mut self) -> Result<(), Error> {
        let start_time = (self.options.debug_level >= DebugLevel::Perf).then(Instant::now);

        self.apply_hoisting_limits();

        let mut round = 0;
        loop {
            round += 1;
            let outcome = self.run_sweep()?;
            self.fast_lookup_possible = false;

            if !outcome.another_round_needed && !outcome.graph_changed {
                break;
            }
        }

        if let Some(start) = start_time {
            info!("hoisting finished in {:?}, rounds: {round}", start.elapsed());
        }

        if self.options.debug_level >= DebugLevel::Check {
            let previous = TreeRenderer::new(self.tree).render();

            let outcome = self.run_sweep()?;
            if outcome.graph_changed {
                return Err(Error::NonTerminalResult {
                    previous,
                    next: TreeRenderer::new(self.tree).render(),
                });
            }

            let violations = self_check(self.tree);
            if !violations.is_empty() {
                return Err(Error::SelfCheckFailed {
                    violations,
                    tree_dump: TreeRenderer::new(self.tree).render(),
                });
            }
        }

        if self.options.debug_level >= DebugLevel::Reasons {
            debug!("{}", TreeRenderer::new(self.tree).render());
        }

        Ok(())
    }

    fn apply_hoisting_limits(&mut self) {
        if self.options.hoisting_limits.is_empty() {
            return;
        }

        for id in 0..self.tree.nodes.len() {
            let Some(limits) = self.options.hoisting_limits.get(&self.tree.nodes[id].locator) else {
                continue;
            };

            // A package is a border as soon as any of its parents
            // declares it one.
            let bordered: Vec<NodeId> = self.tree.nodes[id]
                .dependencies
                .iter()
                .filter(|(name, _)| limits.contains(name.as_str()))
                .map(|(_, &dep_id)| dep_id)
                .collect();

            for dep_id in bordered {
                self.tree.nodes[dep_id].is_hoist_border = true;
            }
        }
    }

    fn run_sweep(&mut self) -> Result<HoistOutcome, Error> {
        let root_id = self.tree.root;

        let mut root_path = vec![root_id];
        let mut path_locators = IndexSet::new();
        path_locators.insert(self.tree.nodes[root_id].locator.clone());

        self.hoist_to(
            &mut root_path,
            &mut path_locators,
            &ShadowedNodes::new(),
            &mut IndexSet::new(),
        )
    }

    /// Hoists everything possible into the last node of `root_path`, then
    /// recurses into each remaining child as the next hoist root.
    ///
    /// When the most preferred candidate for some name failed to reach
    /// the root, the next candidate is promoted and the pass repeats;
    /// a candidate blocked by an ancestor does not doom the less popular
    /// instances of the same package.
    fn hoist_to(
        &mut self,
        root_path: &mut Vec<NodeId>,
        path_locators: &mut IndexSet<String>,
        parent_shadowed: &ShadowedNodes,
        seen_roots: &mut IndexSet<NodeId>,
    ) -> Result<HoistOutcome, Error> {
        let root_id = root_path[root_path.len() - 1];
        if !seen_roots.insert(root_id) {
            return Ok(HoistOutcome::default());
        }

        let preferences = build_preference_map(self.tree, root_id);
        let mut ident_map = hoist_ident_map(self.tree, root_id, &preferences);

        let used = if self.tree.root == root_id {
            IndexMap::new()
        } else if self.fast_lookup_possible {
            zero_round_used_dependencies(self.tree, root_path)
        } else {
            used_dependencies(self.tree, root_path)
        };

        let mut hoist_idents: IndexMap<String, String> = ident_map
            .iter()
            .map(|(name, idents)| (name.clone(), idents[0].clone()))
            .collect();

        let mut outcome = HoistOutcome::default();
        let mut shadowed = ShadowedNodes::new();

        let mut state_changed = true;
        while state_changed {
            let pass = self.hoist_graph(
                root_path,
                path_locators,
                &used,
                &hoist_idents,
                &ident_map,
                parent_shadowed,
                &mut shadowed,
            )?;
            outcome.merge(pass);

            state_changed = false;
            for (name, idents) in &mut ident_map {
                if idents.len() > 1 && !self.tree.nodes[root_id].dependencies.contains_key(name) {
                    idents.remove(0);
                    hoist_idents.insert(name.clone(), idents[0].clone());
                    state_changed = true;
                }
            }
        }

        let children: Vec<NodeId> = self.tree.nodes[root_id].dependencies.values().copied().collect();

        for child_id in children {
            let child = &self.tree.nodes[child_id];
            if self.tree.nodes[root_id].peer_names.contains(&child.name)
                || path_locators.contains(&child.locator)
            {
                continue;
            }

            let locator = child.locator.clone();

            root_path.push(child_id);
            path_locators.insert(locator.clone());

            let pass = self.hoist_to(root_path, path_locators, &shadowed, seen_roots)?;
            outcome.merge(pass);

            path_locators.shift_remove(&locator);
            root_path.pop();
        }

        Ok(outcome)
    }

    /// One mutation pass under a single hoist root: walks the reachable
    /// graph, hoists every node the planner clears, and descends into the
    /// ones that stay behind.
    fn hoist_graph(
        &mut self,
        root_path: &[NodeId],
        path_locators: &IndexSet<String>,
        used: &IndexMap<String, NodeId>,
        hoist_idents: &IndexMap<String, String>,
        ident_map: &IndexMap<String, Vec<String>>,
        parent_shadowed: &ShadowedNodes,
        shadowed: &mut ShadowedNodes,
    ) -> Result<HoistOutcome, Error> {
        let root_id = root_path[root_path.len() - 1];

        let ctx = HoistContext {
            root_id,
            root_path,
            root_path_locators: path_locators,
            used_dependencies: used,
            hoist_idents,
            hoist_ident_map: ident_map,
            parent_shadowed,
            output_reason: self.options.debug_level >= DebugLevel::Reasons,
            fast_lookup: self.fast_lookup_possible,
        };

        let root_locator = self.tree.nodes[root_id].locator.clone();

        let mut node_path: Vec<NodeId> = vec![root_id];
        let mut locator_path: Vec<String> = path_locators.iter().cloned().collect();
        let mut aliased_path: Vec<String> = root_path
            .iter()
            .map(|&id| self.tree.nodes[id].aliased_locator())
            .collect();

        let mut state = WalkState {
            new_nodes: sorted_regular_dependencies(self.tree, root_id).into_iter().collect(),
            seen: IndexSet::new(),
            outcome: HoistOutcome::default(),
        };

        while !state.new_nodes.is_empty() {
            let batch = std::mem::take(&mut state.new_nodes);

            for dep_id in batch {
                let dep = &self.tree.nodes[dep_id];
                if dep.locator == root_locator || dep.is_hoist_border {
                    continue;
                }

                let decoupled_id = self.tree.decouple(root_id, dep_id);
                self.hoist_node_dependencies(
                    &ctx,
                    &mut node_path,
                    &mut locator_path,
                    &mut aliased_path,
                    decoupled_id,
                    shadowed,
                    &mut state,
                )?;
            }
        }

        Ok(state.outcome)
    }

    /// Hoists the dependencies of `parent_id` that the planner clears,
    /// then recurses into the ones that stay.
    fn hoist_node_dependencies(
        &mut self,
        ctx: &HoistContext<'_>,
        node_path: &mut Vec<NodeId>,
        locator_path: &mut Vec<String>,
        aliased_path: &mut Vec<String>,
        parent_id: NodeId,
        shadowed: &mut ShadowedNodes,
        state: &mut WalkState,
    ) -> Result<(), Error> {
        if state.seen.contains(&parent_id) {
            return Ok(());
        }

        node_path.push(parent_id);
        locator_path.push(self.tree.nodes[parent_id].locator.clone());
        aliased_path.push(self.tree.nodes[parent_id].aliased_locator());

        let result = self.hoist_children(ctx, node_path, locator_path, aliased_path, parent_id, shadowed, state);

        node_path.pop();
        locator_path.pop();
        aliased_path.pop();

        result
    }

    fn hoist_children(
        &mut self,
        ctx: &HoistContext<'_>,
        node_path: &mut Vec<NodeId>,
        locator_path: &mut Vec<String>,
        aliased_path: &mut Vec<String>,
        parent_id: NodeId,
        shadowed: &mut ShadowedNodes,
        state: &mut WalkState,
    ) -> Result<(), Error> {
        let mut verdicts: IndexMap<NodeId, HoistVerdict> = IndexMap::new();
        let mut dependants: IndexMap<String, IndexSet<String>> = IndexMap::new();

        for child_id in sorted_regular_dependencies(self.tree, parent_id) {
            let verdict = node_hoist_info(self.tree, ctx, node_path, child_id, shadowed);

            if let HoistVerdict::DependsOn { peers } = &verdict {
                let child_name = self.tree.nodes[child_id].name.clone();
                for &peer_id in peers {
                    dependants
                        .entry(self.tree.nodes[peer_id].name.clone())
                        .or_default()
                        .insert(child_name.clone());
                }
            }

            verdicts.insert(child_id, verdict);
        }

        // Every blocked node drags down, transitively, the nodes whose
        // peers it supplies. Whatever survives — plain hoistable nodes
        // and closed cycles of mutually peer-dependent ones — goes up.
        let mut unhoistable: IndexSet<NodeId> = IndexSet::new();
        let blocked: Vec<(NodeId, String)> = verdicts
            .iter()
            .filter(|(_, verdict)| verdict.is_keep())
            .map(|(&id, verdict)| (id, verdict.reason().unwrap_or_default().to_string()))
            .collect();

        for (child_id, reason) in blocked {
            self.block_node(parent_id, child_id, reason, &dependants, &mut verdicts, &mut unhoistable);
        }

        let mut were_nodes_hoisted = false;
        let hoistable: Vec<NodeId> = verdicts
            .keys()
            .copied()
            .filter(|id| !unhoistable.contains(id))
            .collect();

        for child_id in hoistable {
            state.outcome.graph_changed = true;
            were_nodes_hoisted = true;

            let child_name = self.tree.nodes[child_id].name.clone();

            if ctx
                .parent_shadowed
                .get(&parent_id)
                .is_some_and(|names| names.contains(&child_name))
            {
                state.outcome.another_round_needed = true;
            }

            let existing_id = self.tree.nodes[ctx.root_id].dependencies.get(&child_name).copied();

            let parent = &mut self.tree.nodes[parent_id];
            parent.dependencies.shift_remove(&child_name);
            parent.hoisted_dependencies.insert(child_name.clone(), child_id);
            parent.reasons.shift_remove(&child_name);

            if ctx.output_reason {
                let hoisted_from = locator_path.iter().map(|locator| pretty_locator(locator)).join("→");
                self.tree.nodes[ctx.root_id]
                    .hoisted_from
                    .entry(child_name.clone())
                    .or_default()
                    .push(hoisted_from);

                let hoisted_to = ctx
                    .root_path
                    .iter()
                    .map(|&id| pretty_locator(&self.tree.nodes[id].locator))
                    .join("→");
                self.tree.nodes[parent_id].hoisted_to.insert(child_name.clone(), hoisted_to);
            }

            match existing_id {
                None => {
                    // Never attach another instance of the root to the
                    // root itself.
                    let child_ident = self.tree.nodes[child_id].ident.clone();
                    if self.tree.nodes[ctx.root_id].ident != child_ident {
                        self.tree.nodes[ctx.root_id].dependencies.insert(child_name.clone(), child_id);
                        state.new_nodes.insert(child_id);
                    }
                }
                Some(existing_id) => {
                    let references: Vec<String> =
                        self.tree.nodes[child_id].references.iter().cloned().collect();
                    self.tree.nodes[existing_id].references.extend(references);
                }
            }
        }

        // Things can hoist out of a portal only while the portal keeps no
        // dependencies of its own; re-evaluate it next round.
        if self.tree.nodes[parent_id].dependency_kind == DependencyKind::ExternalSoftLink
            && were_nodes_hoisted
        {
            state.outcome.another_round_needed = true;
        }

        if self.options.check {
            let violations = self_check(self.tree);
            if !violations.is_empty() {
                return Err(Error::SelfCheckFailed {
                    violations,
                    tree_dump: TreeRenderer::new(self.tree).render(),
                });
            }
        }

        for child_id in sorted_regular_dependencies(self.tree, parent_id) {
            if !unhoistable.contains(&child_id) {
                continue;
            }

            let verdict = &verdicts[&child_id];
            let child_name = self.tree.nodes[child_id].name.clone();
            let child_ident = self.tree.nodes[child_id].ident.clone();

            let competes = ctx
                .hoist_idents
                .get(&child_name)
                .is_some_and(|ident| *ident == child_ident);
            let parent_has_reason = self.tree.nodes[parent_id].reasons.contains_key(&child_name);

            if (competes || !parent_has_reason) && !verdict.is_hoist() {
                let reason = verdict.reason().unwrap_or_default().to_string();
                self.tree.nodes[parent_id].reasons.insert(child_name, reason);
            }

            let child_aliased = self.tree.nodes[child_id].aliased_locator();
            if self.tree.nodes[child_id].is_hoist_border || aliased_path.contains(&child_aliased) {
                continue;
            }

            state.seen.insert(parent_id);
            let decoupled_id = self.tree.decouple(parent_id, child_id);
            self.hoist_node_dependencies(
                ctx,
                node_path,
                locator_path,
                aliased_path,
                decoupled_id,
                shadowed,
                state,
            )?;
            state.seen.shift_remove(&parent_id);
        }

        Ok(())
    }

    fn block_node(
        &self,
        parent_id: NodeId,
        node_id: NodeId,
        reason: String,
        dependants: &IndexMap<String, IndexSet<String>>,
        verdicts: &mut IndexMap<NodeId, HoistVerdict>,
        unhoistable: &mut IndexSet<NodeId>,
    ) {
        if !unhoistable.insert(node_id) {
            return;
        }

        verdicts.insert(node_id, HoistVerdict::Keep { reason: Some(reason) });

        let node_name = &self.tree.nodes[node_id].name;
        let Some(dependant_names) = dependants.get(node_name) else {
            return;
        };

        for dependant_name in dependant_names {
            let Some(&dependant_id) = self.tree.nodes[parent_id].dependencies.get(dependant_name) else {
                continue;
            };

            let next_reason = if self.options.debug_level >= DebugLevel::Reasons {
                format!(
                    "- peer dependency {} from parent {} was not hoisted",
                    pretty_locator(&self.tree.nodes[node_id].locator),
                    pretty_locator(&self.tree.nodes[parent_id].locator)
                )
            } else {
                String::new()
            };

            self.block_node(parent_id, dependant_id, next_reason, dependants, verdicts, unhoistable);
        }
    }
}
