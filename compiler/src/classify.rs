// classify.rs — How strongly is one path of one edge already ordered?
//
// Shared by the greedy planner (to decide what to insert) and the plan
// verifier (to check what was inserted). Strength is a total order:
//
//   NoCut < DataCut < SoftCut < HardCut
//
// HardCut comes from a sufficient barrier, ctrl+isync, or release/acquire
// already recorded in the cut table. SoftCut and DataCut come from a control
// or address dependency; the verdict carries the cut that would enforce it
// unless an equivalent one is already recorded.
//
// Preconditions: `path` runs from the edge source's out block to the
//   destination's main block.
// Postconditions: classification never mutates the cut table.
// Failure modes: none.
// Side effects: populates PathCache memo tables.

use crate::action::{Action, ActionGraph, PlannedEdge};
use crate::cut::{Cut, CutKind, CutSite, CutTable};
use crate::deps::{addr_dependency_trails, branches_on};
use crate::id::{BlockId, ValueId};
use crate::ir::{EdgeKind, Function};
use crate::path_cache::{PathCache, PathId};
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutStrength {
    NoCut,
    DataCut,
    SoftCut,
    HardCut,
}

/// Strength of one path and the dependency cut that would realize it.
#[derive(Debug, Clone)]
pub struct PathVerdict {
    pub strength: CutStrength,
    pub enforce: Option<Cut>,
}

impl PathVerdict {
    fn already(strength: CutStrength) -> Self {
        PathVerdict {
            strength,
            enforce: None,
        }
    }

    fn needs(strength: CutStrength, cut: Cut) -> Self {
        PathVerdict {
            strength,
            enforce: Some(cut),
        }
    }
}

/// Read-only inputs shared by every classification of one function.
#[derive(Clone, Copy)]
pub struct PlanContext<'a> {
    pub func: &'a Function,
    pub graph: &'a ActionGraph,
    pub target: Target,
}

/// Does a barrier of `kind` order `src -edge-> dst`?
pub fn barrier_suffices(kind: CutKind, edge: EdgeKind, src: &Action, dst: &Action) -> bool {
    match kind {
        CutKind::Sync => true,
        _ if edge == EdgeKind::Push => false,
        CutKind::Lwsync => true,
        CutKind::DmbSt => src.is_write_only() && dst.is_write_only(),
        CutKind::DmbLd => src.is_read_only(),
        _ => false,
    }
}

pub fn classify_path(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    cuts: &CutTable,
    edge: &PlannedEdge,
    path: PathId,
) -> PathVerdict {
    let src = ctx.graph.action(edge.src);
    let dst = ctx.graph.action(edge.dst);
    let blocks = cache.extract_path(path);

    if src.all_sc && dst.all_sc {
        return PathVerdict::already(CutStrength::HardCut);
    }

    let on_path = cuts.on_path(&blocks);
    if on_path
        .iter()
        .any(|c| barrier_suffices(c.kind, edge.kind, src, dst))
    {
        return PathVerdict::already(CutStrength::HardCut);
    }
    if edge.kind != EdgeKind::Push && has_ordering_cut(ctx, cuts, src, dst) {
        return PathVerdict::already(CutStrength::HardCut);
    }

    // Dependencies only order execution.
    if edge.kind != EdgeKind::Execution {
        return PathVerdict::already(CutStrength::NoCut);
    }
    let Some(dep) = src.outgoing_dep else {
        return PathVerdict::already(CutStrength::NoCut);
    };

    for c in &on_path {
        if c.dep != Some(dep) {
            continue;
        }
        match c.kind {
            CutKind::Isync => return PathVerdict::already(CutStrength::HardCut),
            CutKind::Ctrl if dst.is_write_like() => {
                return PathVerdict::already(CutStrength::SoftCut)
            }
            _ => {}
        }
    }

    // A recorded dependency wins over a new one; otherwise propose the
    // first branch, then the address chain.
    let ctrl = if dst.is_write_like() {
        ctrl_cuts(ctx.func, dep, &blocks)
    } else {
        Vec::new()
    };
    if ctrl.iter().any(|c| cuts.contains(c)) {
        return PathVerdict::already(CutStrength::SoftCut);
    }
    let data = data_cut(ctx, cache, edge, dep, path, &blocks);
    if data.as_ref().is_some_and(|c| cuts.contains(c)) {
        return PathVerdict::already(CutStrength::DataCut);
    }
    if let Some(cut) = ctrl.into_iter().next() {
        return PathVerdict::needs(CutStrength::SoftCut, cut);
    }
    match data {
        Some(cut) => PathVerdict::needs(CutStrength::DataCut, cut),
        None => PathVerdict::already(CutStrength::NoCut),
    }
}

/// A `Ctrl` cut for every branch on `dep` along `blocks`.
pub fn ctrl_cuts(func: &Function, dep: ValueId, blocks: &[BlockId]) -> Vec<Cut> {
    blocks
        .windows(2)
        .filter_map(|w| {
            branches_on(func, w[0], dep).map(|site| {
                Cut::ctrl(CutKind::Ctrl, w[0], w[1], dep, site.use_site(), blocks.to_vec())
            })
        })
        .collect()
}

/// The `Data` cut preserving every address chain from `dep` into the
/// destination's use along `path`, if there is one.
pub fn data_cut(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    edge: &PlannedEdge,
    dep: ValueId,
    path: PathId,
    blocks: &[BlockId],
) -> Option<Cut> {
    let dst = ctx.graph.action(edge.dst);
    let use_site = dst.incoming_use?;
    let trails = addr_dependency_trails(ctx.func, use_site, dep, cache, edge.bind_site, path);
    if trails.is_empty() {
        return None;
    }
    let mut trail = Vec::new();
    for v in trails.into_iter().flatten() {
        if !trail.contains(&v) {
            trail.push(v);
        }
    }
    let block = ctx
        .func
        .block_of(use_site.inst)
        .unwrap_or(dst.main_block);
    Some(Cut::data(block, dep, use_site, trail, blocks.to_vec()))
}

/// Release on the destination's accesses, or acquire on the source's.
fn has_ordering_cut(ctx: PlanContext<'_>, cuts: &CutTable, src: &Action, dst: &Action) -> bool {
    let release = dst.is_write_like()
        && dst.access_block(ctx.func).is_some_and(|b| {
            cuts.at_block(b)
                .any(|c| c.kind == CutKind::Release && c.site == CutSite::Accesses(b))
        });
    let acquire = src.is_read_like()
        && src.access_block(ctx.func).is_some_and(|b| {
            cuts.at_block(b)
                .any(|c| c.kind == CutKind::Acquire && c.site == CutSite::Accesses(b))
        });
    release || acquire
}

/// Classification of every path of an edge.
#[derive(Debug, Clone)]
pub struct EdgeVerdict {
    /// Weakest path; `HardCut` when there are no paths.
    pub strength: CutStrength,
    /// Dependency cuts needed to reach `strength`.
    pub enforce: Vec<Cut>,
    pub paths: usize,
}

pub fn edge_paths(ctx: PlanContext<'_>, cache: &mut PathCache, edge: &PlannedEdge) -> Vec<PathId> {
    let src = ctx.graph.action(edge.src);
    let dst = ctx.graph.action(edge.dst);
    let skip = edge.bind_site.into_iter().collect();
    cache.find_all_simple_paths(ctx.func, src.out_block, dst.main_block, true, &skip)
}

pub fn classify_edge(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    cuts: &CutTable,
    edge: &PlannedEdge,
) -> EdgeVerdict {
    let paths = edge_paths(ctx, cache, edge);
    let mut verdict = EdgeVerdict {
        strength: CutStrength::HardCut,
        enforce: Vec::new(),
        paths: paths.len(),
    };
    for path in paths {
        let v = classify_path(ctx, cache, cuts, edge, path);
        verdict.strength = verdict.strength.min(v.strength);
        if let Some(cut) = v.enforce {
            if !verdict.enforce.iter().any(|c| c.same_placement(&cut)) {
                verdict.enforce.push(cut);
            }
        }
    }
    verdict
}

/// `classify_edge`, demoting a dependency to `NoCut` unless the source
/// is ordered at least as strongly against its own next instance. A
/// dependency orders one iteration only.
pub fn classify_with_self_edge(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    cuts: &CutTable,
    edge: &PlannedEdge,
) -> EdgeVerdict {
    let mut verdict = classify_edge(ctx, cache, cuts, edge);
    let dependency = matches!(verdict.strength, CutStrength::SoftCut | CutStrength::DataCut);
    if !dependency || edge.src == edge.dst {
        return verdict;
    }
    let self_edge = PlannedEdge {
        dst: edge.src,
        ..*edge
    };
    let own = classify_edge(ctx, cache, cuts, &self_edge);
    if own.strength < verdict.strength {
        verdict.strength = CutStrength::NoCut;
        verdict.enforce.clear();
        return verdict;
    }
    for cut in own.enforce {
        if !verdict.enforce.iter().any(|c| c.same_placement(&cut)) {
            verdict.enforce.push(cut);
        }
    }
    verdict
}
