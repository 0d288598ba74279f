// optimal.rs — Minimum-cost cut planning via constraint solving
//
// Every way of ordering an edge becomes a boolean choice variable with a
// cost: a barrier of each enabled kind on each CFG edge, a control
// dependency (with or without isync) on each branch edge, an address
// dependency per path, and release/acquire per block. Each planned edge
// asserts that all of its paths are cut; the backend then minimizes the
// total cost of the chosen variables.
//
// Cost of a choice = unit cost × capacity of its location + 1. The +1 keeps
// zero-frequency locations from being free.
//
// Preconditions: `graph` was built from `func`, `caps` computed for `func`.
// Postconditions: the cuts of the returned plan order every planned edge;
//   no other assignment of the choice variables is cheaper.
// Failure modes: solver errors propagate (`Unknown`, `Unavailable`).
// Side effects: populates PathCache memo tables.

use std::collections::HashMap;

use crate::action::PlannedEdge;
use crate::cfg::Dominators;
use crate::classify::{barrier_suffices, data_cut, edge_paths, PlanContext};
use crate::cut::{Cut, CutKind, CutSite};
use crate::deps::{branches_on, BranchSite};
use crate::frequency::Capacities;
use crate::id::{ActionId, BlockId, ValueId};
use crate::ir::EdgeKind;
use crate::path_cache::{PathCache, PathId};
use crate::smt::{self, Backend, Constraint, Formula, Model, Problem, Search, SolverError, Var};

#[derive(Debug, Clone)]
pub struct OptimalPlan {
    pub cuts: Vec<Cut>,
    pub cost: u64,
    /// Boolean variables in the problem, choice and auxiliary.
    pub variables: usize,
}

/// The constraint problem for one function, before solving.
#[derive(Debug)]
pub struct Encoding {
    pub problem: Problem,
    /// Cost of each choice variable.
    pub cost: Vec<(Var, u64)>,
    choices: Vec<(Var, Cut)>,
}

impl Encoding {
    /// Cuts whose variables are true in `model`.
    pub fn cuts_for(&self, model: &Model) -> Vec<Cut> {
        self.choices
            .iter()
            .filter(|(v, _)| model.bool(*v))
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn is_choice(&self, v: Var) -> bool {
        self.choices.iter().any(|(c, _)| *c == v)
    }
}

// ── Encoder ─────────────────────────────────────────────────────────────

type DataKey = (Option<BlockId>, ActionId, ActionId, PathId);

struct Encoder<'a, 'c> {
    ctx: PlanContext<'a>,
    cache: &'c mut PathCache,
    caps: &'a Capacities,
    doms: Dominators,
    problem: Problem,
    cost: Vec<(Var, u64)>,
    choices: Vec<(Var, Cut)>,
    barriers: HashMap<(CutKind, BlockId, BlockId), Var>,
    branches: HashMap<(CutKind, ValueId, BlockId, BlockId), Var>,
    data: HashMap<DataKey, Var>,
    orderings: HashMap<(CutKind, BlockId), Var>,
    /// Path fully cut by some barrier in the mask.
    vcut: HashMap<(u8, PathId), Formula>,
    self_cut: HashMap<(ActionId, Option<BlockId>), Formula>,
}

impl<'a, 'c> Encoder<'a, 'c> {
    fn new(ctx: PlanContext<'a>, cache: &'c mut PathCache, caps: &'a Capacities) -> Self {
        Encoder {
            ctx,
            cache,
            caps,
            doms: Dominators::compute(ctx.func),
            problem: Problem::new(),
            cost: Vec::new(),
            choices: Vec::new(),
            barriers: HashMap::new(),
            branches: HashMap::new(),
            data: HashMap::new(),
            orderings: HashMap::new(),
            vcut: HashMap::new(),
            self_cut: HashMap::new(),
        }
    }

    fn choice(&mut self, name: String, kind: CutKind, capacity: u64, cut: Cut) -> Var {
        let unit = self.ctx.target.cost(kind).unwrap_or(0);
        let v = self.problem.bool_var(name);
        self.cost.push((v, unit.saturating_mul(capacity).saturating_add(1)));
        self.choices.push((v, cut));
        v
    }

    fn block_name(&self, b: BlockId) -> &str {
        &self.ctx.func.block(b).name
    }

    fn barrier(&mut self, kind: CutKind, from: BlockId, to: BlockId) -> Formula {
        if !self.ctx.target.is_enabled(kind) {
            return Formula::FALSE;
        }
        if let Some(&v) = self.barriers.get(&(kind, from, to)) {
            return Formula::var(v);
        }
        let name = format!("{}.{}.{}", kind, self.block_name(from), self.block_name(to));
        let cut = Cut::barrier(kind, CutSite::Edge(from, to));
        let v = self.choice(name, kind, self.caps.edge(from, to), cut);
        self.barriers.insert((kind, from, to), v);
        Formula::var(v)
    }

    fn branch(
        &mut self,
        kind: CutKind,
        dep: ValueId,
        from: BlockId,
        to: BlockId,
        site: BranchSite,
        path: &[BlockId],
    ) -> Formula {
        if !self.ctx.target.is_enabled(kind) {
            return Formula::FALSE;
        }
        if let Some(&v) = self.branches.get(&(kind, dep, from, to)) {
            return Formula::var(v);
        }
        let name = format!("{}.{}.{}.{}", kind, dep, self.block_name(from), self.block_name(to));
        let cut = Cut::ctrl(kind, from, to, dep, site.use_site(), path.to_vec());
        let v = self.choice(name, kind, self.caps.edge(from, to), cut);
        self.branches.insert((kind, dep, from, to), v);
        Formula::var(v)
    }

    fn ordering(&mut self, kind: CutKind, block: BlockId) -> Formula {
        if !self.ctx.target.is_enabled(kind) {
            return Formula::FALSE;
        }
        if let Some(&v) = self.orderings.get(&(kind, block)) {
            return Formula::var(v);
        }
        let name = format!("{}.{}", kind, self.block_name(block));
        let v = self.choice(name, kind, self.caps.block(block), Cut::ordering(kind, block));
        self.orderings.insert((kind, block), v);
        Formula::var(v)
    }

    /// Some barrier kind in `mask` sits on some edge of `path`.
    fn path_barrier(&mut self, mask: u8, path: PathId) -> Formula {
        if let Some(f) = self.vcut.get(&(mask, path)) {
            return f.clone();
        }
        let tail = if path.is_empty() {
            PathId::EMPTY
        } else {
            self.cache.tail(path)
        };
        let f = if tail.is_empty() {
            Formula::FALSE
        } else {
            let from = self.cache.head(path);
            let to = self.cache.head(tail);
            // The folded return edge has no place to put a fence.
            let here = if self.ctx.func.successors(from).contains(&to) {
                let kinds: Vec<CutKind> = CutKind::BARRIERS
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| mask & (1u8 << i) != 0)
                    .map(|(_, &k)| k)
                    .collect();
                Formula::or(kinds.into_iter().map(|k| self.barrier(k, from, to)))
            } else {
                Formula::FALSE
            };
            let rest = self.path_barrier(mask, tail);
            match Formula::or([here, rest]) {
                f @ (Formula::Const(_) | Formula::Var(_)) => f,
                f => {
                    let aux = self.problem.bool_var(format!("vcut{}", self.problem.num_bools()));
                    self.problem
                        .assert(Constraint::Holds(Formula::iff(Formula::var(aux), f)));
                    Formula::var(aux)
                }
            }
        };
        self.vcut.insert((mask, path), f.clone());
        f
    }

    /// Everything that would order `edge` along `path`.
    fn path_formula(&mut self, edge: &PlannedEdge, path: PathId, allow_data: bool) -> Formula {
        let graph = self.ctx.graph;
        let func = self.ctx.func;
        let src = graph.action(edge.src);
        let dst = graph.action(edge.dst);
        if src.all_sc && dst.all_sc {
            return Formula::TRUE;
        }

        let mask = CutKind::BARRIERS
            .iter()
            .enumerate()
            .filter(|&(_, &k)| barrier_suffices(k, edge.kind, src, dst))
            .fold(0u8, |m, (i, _)| m | (1u8 << i));
        let mut terms = vec![self.path_barrier(mask, path)];

        if edge.kind != EdgeKind::Push {
            if dst.is_write_like() {
                if let Some(b) = dst.access_block(func) {
                    terms.push(self.ordering(CutKind::Release, b));
                }
            }
            if src.is_read_like() {
                if let Some(b) = src.access_block(func) {
                    terms.push(self.ordering(CutKind::Acquire, b));
                }
            }
        }

        if edge.kind == EdgeKind::Execution {
            if let Some(dep) = src.outgoing_dep {
                let blocks = self.cache.extract_path(path);
                let dep_block = func.block_of(dep);
                for w in blocks.windows(2) {
                    let Some(site) = branches_on(func, w[0], dep) else {
                        continue;
                    };
                    let dominated = site == BranchSite::Implicit
                        || dep_block.is_some_and(|d| self.doms.dominates(d, w[0]));
                    if !dominated {
                        continue;
                    }
                    if dst.is_write_like() {
                        let ctrl = self.branch(CutKind::Ctrl, dep, w[0], w[1], site, &blocks);
                        // Without the isync the branch orders one iteration.
                        if edge.src == edge.dst {
                            terms.push(ctrl);
                        } else {
                            let again = self.source_self_cut(edge);
                            terms.push(Formula::and([ctrl, again]));
                        }
                    }
                    terms.push(self.branch(CutKind::Isync, dep, w[0], w[1], site, &blocks));
                }
                if allow_data {
                    terms.push(self.data_term(edge, dep, path, &blocks));
                }
            }
        }
        Formula::or(terms)
    }

    fn data_term(&mut self, edge: &PlannedEdge, dep: ValueId, path: PathId, blocks: &[BlockId]) -> Formula {
        if !self.ctx.target.is_enabled(CutKind::Data) {
            return Formula::FALSE;
        }
        let key = (edge.bind_site, edge.src, edge.dst, path);
        let v = match self.data.get(&key) {
            Some(&v) => v,
            None => {
                let Some(cut) = data_cut(self.ctx, self.cache, edge, dep, path, blocks) else {
                    return Formula::FALSE;
                };
                let block = match cut.site {
                    CutSite::Accesses(b) => b,
                    _ => self.ctx.graph.action(edge.dst).main_block,
                };
                let name = format!(
                    "data.{}.{}.{}",
                    self.ctx.graph.action(edge.src).name,
                    self.ctx.graph.action(edge.dst).name,
                    self.problem.num_bools()
                );
                let v = self.choice(name, CutKind::Data, self.caps.block(block), cut);
                self.data.insert(key, v);
                v
            }
        };
        // An address dependency orders one iteration; the source must also
        // be ordered against its own next instance.
        let again = self.source_self_cut(edge);
        Formula::and([Formula::var(v), again])
    }

    fn source_self_cut(&mut self, edge: &PlannedEdge) -> Formula {
        let key = (edge.src, edge.bind_site);
        if let Some(f) = self.self_cut.get(&key) {
            return f.clone();
        }
        let self_edge = PlannedEdge {
            kind: EdgeKind::Execution,
            dst: edge.src,
            ..*edge
        };
        let f = self.edge_formula(&self_edge, false);
        self.self_cut.insert(key, f.clone());
        f
    }

    fn edge_formula(&mut self, edge: &PlannedEdge, allow_data: bool) -> Formula {
        let paths = edge_paths(self.ctx, self.cache, edge);
        let parts: Vec<Formula> = paths
            .into_iter()
            .map(|p| self.path_formula(edge, p, allow_data))
            .collect();
        Formula::and(parts)
    }

    fn finish(self) -> Encoding {
        Encoding {
            problem: self.problem,
            cost: self.cost,
            choices: self.choices,
        }
    }
}

/// Build the constraint problem for every planned edge of `ctx.graph`.
pub fn encode(ctx: PlanContext<'_>, cache: &mut PathCache, caps: &Capacities) -> Encoding {
    let mut enc = Encoder::new(ctx, cache, caps);
    for edge in ctx.graph.planned_edges() {
        let f = enc.edge_formula(&edge, true);
        tracing::trace!(
            src = %ctx.graph.action(edge.src).name,
            dst = %ctx.graph.action(edge.dst).name,
            kind = edge.kind.keyword(),
            formula = %f,
            "edge constraint"
        );
        enc.problem.assert(Constraint::Holds(f));
    }
    enc.finish()
}

pub fn plan(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    caps: &Capacities,
    backend: &mut dyn Backend,
    search: Search,
) -> Result<OptimalPlan, SolverError> {
    let mut enc = encode(ctx, cache, caps);
    let variables = enc.problem.num_bools();
    tracing::debug!(
        function = %ctx.func.name,
        variables,
        choices = enc.cost.len(),
        backend = backend.name(),
        "solving"
    );
    let (model, cost) = smt::minimize(backend, &mut enc.problem, &enc.cost, search)?;
    let cuts = enc.cuts_for(&model);
    tracing::debug!(function = %ctx.func.name, cost, cuts = cuts.len(), "solved");
    Ok(OptimalPlan {
        cuts,
        cost,
        variables,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionGraph;
    use crate::cfg::LoopInfo;
    use crate::classify::classify_with_self_edge;
    use crate::cut::CutTable;
    use crate::frequency::compute_capacities;
    use crate::ir::Function;
    use crate::smt::builtin::BuiltIn;
    use crate::target::Target;

    fn build(source: &str) -> (Function, ActionGraph, Capacities) {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_module(&parsed.module.unwrap());
        assert!(lowered.diagnostics.is_empty(), "{:?}", lowered.diagnostics);
        let mut func = lowered.functions.into_iter().next().unwrap();
        let graph = ActionGraph::build(&mut func).unwrap();
        let doms = Dominators::compute(&func);
        let loops = LoopInfo::compute(&func, &doms);
        let (caps, _) = compute_capacities(&func, &loops, &mut BuiltIn::new()).unwrap();
        (func, graph, caps)
    }

    fn solve(source: &str, target: Target, search: Search) -> (Function, ActionGraph, OptimalPlan) {
        let (f, graph, caps) = build(source);
        let ctx = PlanContext {
            func: &f,
            graph: &graph,
            target,
        };
        let mut cache = PathCache::new(false);
        let out = plan(ctx, &mut cache, &caps, &mut BuiltIn::new(), search).unwrap();
        (f, graph, out)
    }

    const MP_SEND: &str = "\
fn send(%data, %flag) {
e:
  %w = begin write
  store relaxed %data, 42
  end %w
  %f = begin flag
  store relaxed %flag, 1
  end %f
  vedge write -> flag
  ret
}
";

    #[test]
    fn single_barrier_between_writes() {
        let (_, _, out) = solve(MP_SEND, Target::Power, Search::Native);
        assert_eq!(out.cuts.len(), 1);
        assert_eq!(out.cuts[0].kind, CutKind::Lwsync);
        assert_eq!(out.cost, 501);
    }

    #[test]
    fn armv8_prefers_release() {
        let (f, graph, out) = solve(MP_SEND, Target::ArmV8, Search::Native);
        let flag = graph.by_name("flag").unwrap().access_block(&f).unwrap();
        assert_eq!(out.cuts.len(), 1);
        assert_eq!(out.cuts[0].kind, CutKind::Release);
        assert_eq!(out.cuts[0].site, CutSite::Accesses(flag));
    }

    #[test]
    fn disabled_kinds_are_never_chosen() {
        for target in [Target::Power, Target::ArmV7] {
            let (_, _, out) = solve(MP_SEND, target, Search::Native);
            assert!(
                out.cuts.iter().all(|c| target.is_enabled(c.kind)),
                "{target:?}: {:?}",
                out.cuts
            );
        }
    }

    /// The barrier goes outside the loop even though the edge is inside it.
    #[test]
    fn barrier_hoisted_out_of_loop() {
        let source = "\
fn f(%p, %q, %n) {
e:
  %w = begin w
  store relaxed %p, 1
  end %w
  br head
head:
  %c = cmp eq %n, 0
  br %c, body, out
body:
  br head
out:
  %r = begin r
  store relaxed %q, 1
  end %r
  vedge w -> r
  ret
}
";
        let (f, _, out) = solve(source, Target::Power, Search::Native);
        assert_eq!(out.cuts.len(), 1);
        let CutSite::Edge(a, b) = out.cuts[0].site else {
            panic!("{:?}", out.cuts[0]);
        };
        let body = f.block_ids().find(|&b| f.block(b).name == "body").unwrap();
        assert_ne!(a, body);
        assert_ne!(b, body);
    }

    #[test]
    fn searches_agree_on_cost() {
        let native = solve(MP_SEND, Target::ArmV7, Search::Native).2.cost;
        let binary = solve(MP_SEND, Target::ArmV7, Search::BinarySearch).2.cost;
        assert_eq!(native, binary);
    }

    #[test]
    fn control_dependency_is_cheapest() {
        let source = "\
fn recv(%flag, %out) {
e:
  xedge rd -> wr here
  %r = begin rd
  %x = load relaxed %flag
  end %r
  %c = cmp ne %x, 0
  br %c, yes, done
yes:
  %w = begin wr
  store relaxed %out, 1
  end %w
  br done
done:
  ret
}
";
        let (_, _, out) = solve(source, Target::Power, Search::Native);
        assert!(out.cuts.iter().all(|c| c.kind == CutKind::Ctrl), "{:?}", out.cuts);
        assert!(out.cost < 200);
    }

    #[test]
    fn plan_orders_every_edge() {
        let (f, graph, out) = solve(MP_SEND, Target::ArmV7, Search::Native);
        let ctx = PlanContext {
            func: &f,
            graph: &graph,
            target: Target::ArmV7,
        };
        let mut cuts = CutTable::new();
        for c in out.cuts {
            cuts.insert(c);
        }
        let mut cache = PathCache::new(false);
        for edge in graph.planned_edges() {
            let v = classify_with_self_edge(ctx, &mut cache, &cuts, &edge);
            assert!(v.enforce.is_empty());
            assert!(v.strength > crate::classify::CutStrength::NoCut);
        }
    }
}
