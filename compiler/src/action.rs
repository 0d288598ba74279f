// action.rs — Actions, ordering edges and their transitive closure
//
// Discovers regions from `begin`/`end` markers, splits the CFG so that every
// region starts its own block (with a unique predecessor) and ends in its own
// block (with a unique successor), classifies each region, resolves edge
// requests by name, synthesizes pre/post boundary actions, and closes the
// edge tables under the ordering laws:
//
//   v ⊆ x        x ; x ⊆ x        v ; x ⊆ v
//
// Push edges are structural and never composed.
//
// Preconditions: function is S1-S3 well-formed; every `begin` has exactly
//   one matching `end`.
// Postconditions: every action has `main_block`/`out_block` set; the CFG is
//   split accordingly; closure tables are fixed points.
// Failure modes: unknown or duplicate action names return `RealizeError`;
//   malformed regions (missing `end`, bad `give`/`take`) panic.
// Side effects: mutates the function's CFG (block splits).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::cfg::Dominators;
use crate::diag::{codes, Diagnostic};
use crate::id::{ActionId, BlockId, ValueId};
use crate::ir::{AnnotationKind, EdgeKind, Function, InstKind, Ordering, UseSite};
use crate::realize::RealizeError;

// ── Actions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Nop,
    Complex,
    SimpleRead,
    SimpleWrite,
    SimpleRmw,
    Take,
    Give,
    PrePost,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub id: ActionId,
    pub name: String,
    pub kind: ActionKind,
    pub main_block: BlockId,
    pub out_block: BlockId,
    /// Blocks of the region, `main_block` through `out_block`.
    pub blocks: BTreeSet<BlockId>,
    pub loads: usize,
    pub stores: usize,
    pub rmws: usize,
    pub calls: usize,
    pub accesses: Vec<ValueId>,
    pub all_sc: bool,
    /// Value later actions may depend on.
    pub outgoing_dep: Option<ValueId>,
    /// Pointer operand through which this action may depend on earlier ones.
    pub incoming_use: Option<UseSite>,
}

impl Action {
    pub fn is_user(&self) -> bool {
        self.kind != ActionKind::PrePost
    }

    /// Only stores.
    pub fn is_write_only(&self) -> bool {
        self.is_user() && self.calls == 0 && self.loads == 0 && self.rmws == 0 && self.stores > 0
    }

    /// Only loads.
    pub fn is_read_only(&self) -> bool {
        self.is_user() && self.calls == 0 && self.stores == 0 && self.rmws == 0 && self.loads > 0
    }

    /// Writes (stores or RMWs) and no plain loads: cannot be performed
    /// speculatively, so a control dependency orders it.
    pub fn is_write_like(&self) -> bool {
        self.is_user() && self.calls == 0 && self.loads == 0 && self.stores + self.rmws > 0
    }

    /// Reads (loads or RMWs) and no plain stores.
    pub fn is_read_like(&self) -> bool {
        self.is_user() && self.calls == 0 && self.stores == 0 && self.loads + self.rmws > 0
    }

    /// The single block holding every access, if there is one.
    pub fn access_block(&self, func: &Function) -> Option<BlockId> {
        let mut blocks = self.accesses.iter().filter_map(|&v| func.block_of(v));
        let first = blocks.next()?;
        blocks.all(|b| b == first).then_some(first)
    }
}

// ── Edges ───────────────────────────────────────────────────────────────

/// A requested ordering edge. `None` endpoints mean outside the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RmcEdge {
    pub kind: EdgeKind,
    pub src: Option<ActionId>,
    pub dst: Option<ActionId>,
    /// Dominating block the edge is scoped to; `None` means every call.
    pub bind_site: Option<BlockId>,
    /// Replaced by an edge to a synthesized boundary action.
    pub discharged: bool,
}

/// An edge the planners must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlannedEdge {
    pub kind: EdgeKind,
    pub src: ActionId,
    pub dst: ActionId,
    pub bind_site: Option<BlockId>,
}

/// Destination -> justifying bind sites.
pub type EdgeTable = BTreeMap<ActionId, BTreeSet<Option<BlockId>>>;

// ── Graph ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct ActionGraph {
    pub actions: Vec<Action>,
    pub edges: Vec<RmcEdge>,
    /// Transitive execution edges, per source action.
    pub exec: Vec<EdgeTable>,
    /// Transitive visibility edges, per source action.
    pub vis: Vec<EdgeTable>,
    /// Direct push edges, per source action.
    pub push: Vec<EdgeTable>,
    /// Region and edge markers, removed once realization is done.
    pub markers: Vec<ValueId>,
    pub warnings: Vec<Diagnostic>,
    prepost: BTreeMap<BlockId, ActionId>,
}

impl ActionGraph {
    /// Discover, split and classify regions, resolve edges and close them.
    pub fn build(func: &mut Function) -> Result<ActionGraph, RealizeError> {
        let mut graph = ActionGraph::default();

        let begins: Vec<ValueId> = func
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
            .filter(|&v| matches!(func.kind(v), InstKind::Begin { .. }))
            .collect();
        let edge_markers: Vec<ValueId> = func
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter().copied())
            .filter(|&v| matches!(func.kind(v), InstKind::Edge { .. }))
            .collect();

        for begin in begins {
            let end = find_end(func, begin);
            let (main, out) = split_region(func, begin, end);
            let id = ActionId(graph.actions.len() as u32);
            let action = classify(func, id, begin, main, out);
            if graph.actions.iter().any(|a| a.name == action.name) {
                return Err(RealizeError::DuplicateAction {
                    function: func.name.clone(),
                    label: action.name,
                });
            }
            graph.markers.push(end);
            graph.markers.push(begin);
            graph.actions.push(action);
        }

        for marker in edge_markers {
            let InstKind::Edge {
                kind,
                src,
                dst,
                here,
            } = func.kind(marker).clone()
            else {
                unreachable!()
            };
            let src = graph.resolve(func, &src, "pre")?;
            let dst = graph.resolve(func, &dst, "post")?;
            let bind_site = if here { func.block_of(marker) } else { None };
            graph.edges.push(RmcEdge {
                kind,
                src,
                dst,
                bind_site,
                discharged: src.is_none() && dst.is_none(),
            });
            graph.markers.push(marker);
        }

        graph.synthesize_boundaries(func);
        graph.warn_unused(func);

        let doms = Dominators::compute(func);
        graph.compute_closure(&doms);

        tracing::debug!(
            function = %func.name,
            actions = graph.actions.len(),
            edges = graph.edges.len(),
            "built action graph"
        );
        Ok(graph)
    }

    pub fn action(&self, id: ActionId) -> &Action {
        &self.actions[id.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<&Action> {
        self.actions
            .iter()
            .find(|a| a.is_user() && a.name == name)
    }

    fn resolve(
        &self,
        func: &Function,
        label: &str,
        boundary: &str,
    ) -> Result<Option<ActionId>, RealizeError> {
        if label == boundary {
            return Ok(None);
        }
        match self.by_name(label) {
            Some(a) => Ok(Some(a.id)),
            None => Err(RealizeError::UnknownAction {
                function: func.name.clone(),
                label: label.to_string(),
            }),
        }
    }

    // ── Boundary actions ──

    /// The boundary action anchored at `block`, created on first use.
    fn prepost_at(&mut self, block: BlockId) -> ActionId {
        if let Some(&id) = self.prepost.get(&block) {
            return id;
        }
        let id = ActionId(self.actions.len() as u32);
        self.actions.push(Action {
            id,
            name: format!("prepost.{}", block.0),
            kind: ActionKind::PrePost,
            main_block: block,
            out_block: block,
            blocks: [block].into_iter().collect(),
            loads: 0,
            stores: 0,
            rmws: 0,
            calls: 0,
            accesses: Vec::new(),
            all_sc: false,
            outgoing_dep: None,
            incoming_use: None,
        });
        self.prepost.insert(block, id);
        id
    }

    /// Replace every `pre -> a` by `boundary(pred(a.main)) -> a` and every
    /// `a -> post` by `a -> boundary(succ(a.out))`.
    fn synthesize_boundaries(&mut self, func: &Function) {
        for i in 0..self.edges.len() {
            let edge = self.edges[i].clone();
            if edge.discharged {
                continue;
            }
            let (src, dst) = match (edge.src, edge.dst) {
                (None, Some(dst)) => {
                    let preds = func.predecessors(self.action(dst).main_block);
                    assert_eq!(preds.len(), 1, "region entry must have one predecessor");
                    (self.prepost_at(preds[0]), dst)
                }
                (Some(src), None) => {
                    let succs = func.successors(self.action(src).out_block);
                    assert_eq!(succs.len(), 1, "region exit must have one successor");
                    (src, self.prepost_at(succs[0]))
                }
                _ => continue,
            };
            self.edges[i].discharged = true;
            self.edges.push(RmcEdge {
                kind: edge.kind,
                src: Some(src),
                dst: Some(dst),
                bind_site: edge.bind_site,
                discharged: false,
            });
        }
    }

    fn warn_unused(&mut self, func: &Function) {
        let mentioned: BTreeSet<ActionId> = self
            .edges
            .iter()
            .flat_map(|e| [e.src, e.dst])
            .flatten()
            .collect();
        for action in &self.actions {
            if action.is_user() && !mentioned.contains(&action.id) {
                self.warnings.push(
                    Diagnostic::warning(format!("action `{}` is never ordered", action.name))
                        .with_code(codes::W0200)
                        .in_function(func.name.clone())
                        .with_hint("add an edge naming it or drop the region"),
                );
            }
        }
    }

    // ── Closure ──

    /// Seed the tables from direct edges and saturate.
    pub fn compute_closure(&mut self, doms: &Dominators) {
        let n = self.actions.len();
        self.exec = vec![EdgeTable::new(); n];
        self.vis = vec![EdgeTable::new(); n];
        self.push = vec![EdgeTable::new(); n];

        for edge in self.edges.iter().filter(|e| !e.discharged) {
            let (Some(src), Some(dst)) = (edge.src, edge.dst) else {
                continue;
            };
            let table = match edge.kind {
                EdgeKind::Execution => &mut self.exec,
                EdgeKind::Visibility => &mut self.vis,
                EdgeKind::Push => &mut self.push,
            };
            table[src.index()]
                .entry(dst)
                .or_default()
                .insert(edge.bind_site);
        }

        loop {
            let mut changed = false;
            for a in 0..n {
                // v ⊆ x
                for (dst, sites) in self.vis[a].clone() {
                    changed |= insert_all(&mut self.exec[a], dst, sites);
                }
                // x ; x ⊆ x
                for (mid, first) in self.exec[a].clone() {
                    for (dst, second) in self.exec[mid.index()].clone() {
                        let composed = compose_all(doms, &first, &second);
                        changed |= insert_all(&mut self.exec[a], dst, composed);
                    }
                }
                // v ; x ⊆ v
                for (mid, first) in self.vis[a].clone() {
                    for (dst, second) in self.exec[mid.index()].clone() {
                        let composed = compose_all(doms, &first, &second);
                        changed |= insert_all(&mut self.vis[a], dst, composed);
                    }
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Edges to plan, in planning order: actions in creation order; for each,
    /// push, then visibility, then execution; destinations and bind sites in
    /// id order. Edges touching a `Nop` action need no ordering.
    pub fn planned_edges(&self) -> Vec<PlannedEdge> {
        let mut out = Vec::new();
        for action in &self.actions {
            let a = action.id.index();
            for (kind, table) in [
                (EdgeKind::Push, &self.push[a]),
                (EdgeKind::Visibility, &self.vis[a]),
                (EdgeKind::Execution, &self.exec[a]),
            ] {
                for (&dst, sites) in table {
                    if action.kind == ActionKind::Nop || self.action(dst).kind == ActionKind::Nop {
                        continue;
                    }
                    for &bind_site in sites {
                        out.push(PlannedEdge {
                            kind,
                            src: action.id,
                            dst,
                            bind_site,
                        });
                    }
                }
            }
        }
        out
    }

    /// True if the closure holds `src -kind-> dst` for some bind site.
    pub fn has_edge(&self, kind: EdgeKind, src: ActionId, dst: ActionId) -> bool {
        let table = match kind {
            EdgeKind::Execution => &self.exec,
            EdgeKind::Visibility => &self.vis,
            EdgeKind::Push => &self.push,
        };
        table[src.index()].contains_key(&dst)
    }

    /// Remove region and edge markers from the function.
    pub fn remove_markers(&self, func: &mut Function) {
        for &marker in &self.markers {
            func.remove(marker);
        }
    }
}

fn insert_all(table: &mut EdgeTable, dst: ActionId, sites: BTreeSet<Option<BlockId>>) -> bool {
    let entry = table.entry(dst).or_default();
    let before = entry.len();
    entry.extend(sites);
    entry.len() != before
}

fn compose_all(
    doms: &Dominators,
    first: &BTreeSet<Option<BlockId>>,
    second: &BTreeSet<Option<BlockId>>,
) -> BTreeSet<Option<BlockId>> {
    let mut out = BTreeSet::new();
    for &a in first {
        for &b in second {
            out.insert(compose_bind(doms, a, b));
        }
    }
    out
}

/// Bind site of a composed edge: the narrower scope wins.
pub fn compose_bind(doms: &Dominators, a: Option<BlockId>, b: Option<BlockId>) -> Option<BlockId> {
    match (a, b) {
        (None, x) | (x, None) => x,
        (Some(a), Some(b)) if a == b => Some(a),
        (Some(a), Some(b)) => {
            if doms.dominates(a, b) {
                Some(b)
            } else {
                Some(a)
            }
        }
    }
}

// ── Region discovery ────────────────────────────────────────────────────

fn find_end(func: &Function, begin: ValueId) -> ValueId {
    let ends: Vec<ValueId> = func
        .uses(begin)
        .into_iter()
        .map(|u| u.inst)
        .filter(|&v| matches!(func.kind(v), InstKind::End(_)))
        .collect();
    assert_eq!(
        ends.len(),
        1,
        "region `%{}` must have exactly one `end`",
        func.value_name(begin)
    );
    ends[0]
}

/// Split so `begin` starts the main block and `end` finishes the out block.
fn split_region(func: &mut Function, begin: ValueId, end: ValueId) -> (BlockId, BlockId) {
    let main = func.split_block_before(begin);
    let (out, pos) = func
        .position(end)
        .unwrap_or_else(|| panic!("`end` of region is not placed"));
    let next = func.block(out).insts[pos + 1];
    func.split_block_before(next);
    (main, out)
}

fn region_blocks(func: &Function, main: BlockId, out: BlockId) -> BTreeSet<BlockId> {
    let mut blocks = BTreeSet::new();
    let mut stack = vec![main];
    while let Some(b) = stack.pop() {
        if !blocks.insert(b) || b == out || func.is_return(b) {
            continue;
        }
        stack.extend(func.successors(b));
    }
    blocks
}

fn classify(func: &Function, id: ActionId, begin: ValueId, main: BlockId, out: BlockId) -> Action {
    let InstKind::Begin { name, annotation } = func.kind(begin).clone() else {
        unreachable!()
    };
    let blocks = region_blocks(func, main, out);

    let mut action = Action {
        id,
        name,
        kind: ActionKind::Nop,
        main_block: main,
        out_block: out,
        blocks: blocks.clone(),
        loads: 0,
        stores: 0,
        rmws: 0,
        calls: 0,
        accesses: Vec::new(),
        all_sc: false,
        outgoing_dep: None,
        incoming_use: None,
    };
    for &b in &blocks {
        for &v in &func.block(b).insts {
            let kind = func.kind(v);
            if kind.is_load() {
                action.loads += 1;
            } else if kind.is_store() {
                action.stores += 1;
            } else if kind.is_rmw() {
                action.rmws += 1;
            } else if matches!(kind, InstKind::Call { .. }) {
                action.calls += 1;
            }
            if kind.is_access() {
                action.accesses.push(v);
            }
        }
    }
    action.all_sc = !action.accesses.is_empty()
        && action
            .accesses
            .iter()
            .all(|&v| func.kind(v).ordering() == Some(Ordering::SeqCst));
    if action.accesses.len() == 1 {
        action.incoming_use = Some(UseSite {
            inst: action.accesses[0],
            index: 0,
        });
    }

    let only_loads = action.loads == 1 && action.accesses.len() == 1 && action.calls == 0;
    action.kind = match annotation {
        Some((AnnotationKind::Give, v)) => {
            let real_uses = func
                .uses(v)
                .into_iter()
                .filter(|u| !func.kind(u.inst).is_marker())
                .count();
            assert_eq!(
                real_uses,
                1,
                "`give %{}` requires exactly one use besides the marker",
                func.value_name(v)
            );
            action.outgoing_dep = Some(v);
            ActionKind::Give
        }
        Some((AnnotationKind::Take, _)) => {
            assert_eq!(action.loads, 1, "`take` region `{}` must contain exactly one load", action.name);
            let load = action
                .accesses
                .iter()
                .copied()
                .find(|&v| func.kind(v).is_load())
                .unwrap_or_else(|| unreachable!());
            action.outgoing_dep = Some(load);
            action.incoming_use = Some(UseSite {
                inst: load,
                index: 0,
            });
            ActionKind::Take
        }
        None if action.accesses.is_empty() && action.calls == 0 => ActionKind::Nop,
        None if only_loads => {
            action.outgoing_dep = Some(action.accesses[0]);
            ActionKind::SimpleRead
        }
        None if action.calls == 0 && action.loads == 0 && action.rmws == 0 => {
            ActionKind::SimpleWrite
        }
        None if action.calls == 0 && action.rmws == 1 && action.accesses.len() == 1 => {
            action.outgoing_dep = Some(action.accesses[0]);
            ActionKind::SimpleRmw
        }
        None => ActionKind::Complex,
    };
    action
}

impl fmt::Display for ActionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.actions {
            writeln!(f, "{} {:?} {}..{}", a.name, a.kind, a.main_block, a.out_block)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
