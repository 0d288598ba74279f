// greedy.rs — Greedy cut planner
//
// Walks planned edges in order, classifies every path, and either accepts
// the dependencies it found or inserts the cheapest sufficient barrier at
// the front of the destination. Each decision goes into the cut table
// before the next edge is examined, so later edges see earlier barriers.
//
// Preconditions: `graph` was built from `func` and its closure computed.
// Postconditions: every planned edge classifies above NoCut against the
//   resulting table; a second run inserts nothing.
// Failure modes: none. An edge no enabled barrier can order is impossible
//   (every target has `sync`).
// Side effects: extends the cut table.

use crate::action::PlannedEdge;
use crate::classify::{barrier_suffices, classify_with_self_edge, CutStrength, PlanContext};
use crate::cut::{Cut, CutKind, CutSite, CutTable};
use crate::path_cache::PathCache;

/// What the planner did for one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeDecision {
    AlreadyOrdered,
    Dependency(CutStrength),
    Barrier(CutKind),
}

#[derive(Debug, Default)]
pub struct GreedyPlan {
    pub decisions: Vec<(PlannedEdge, EdgeDecision)>,
    pub inserted: usize,
}

pub fn plan(ctx: PlanContext<'_>, cache: &mut PathCache, cuts: &mut CutTable) -> GreedyPlan {
    let mut out = GreedyPlan::default();
    for edge in ctx.graph.planned_edges() {
        let before = cuts.len();
        let decision = plan_edge(ctx, cache, cuts, &edge);
        out.inserted += cuts.len() - before;
        tracing::debug!(
            function = %ctx.func.name,
            src = %ctx.graph.action(edge.src).name,
            dst = %ctx.graph.action(edge.dst).name,
            kind = edge.kind.keyword(),
            decision = ?decision,
            "planned edge"
        );
        out.decisions.push((edge, decision));
    }
    out
}

fn plan_edge(
    ctx: PlanContext<'_>,
    cache: &mut PathCache,
    cuts: &mut CutTable,
    edge: &PlannedEdge,
) -> EdgeDecision {
    let verdict = classify_with_self_edge(ctx, cache, cuts, edge);
    match verdict.strength {
        CutStrength::HardCut => return EdgeDecision::AlreadyOrdered,
        CutStrength::NoCut => {}
        strength => {
            for cut in verdict.enforce {
                cuts.insert(cut);
            }
            return EdgeDecision::Dependency(strength);
        }
    }

    let src = ctx.graph.action(edge.src);
    let dst = ctx.graph.action(edge.dst);
    let kind = ctx
        .target
        .barriers_by_cost()
        .into_iter()
        .find(|&k| barrier_suffices(k, edge.kind, src, dst))
        .unwrap_or(CutKind::Sync);
    cuts.insert(Cut::barrier(kind, CutSite::Front(dst.main_block)));
    EdgeDecision::Barrier(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionGraph;
    use crate::ir::Function;
    use crate::target::Target;

    fn build(source: &str) -> (Function, ActionGraph) {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_module(&parsed.module.unwrap());
        assert!(lowered.diagnostics.is_empty(), "{:?}", lowered.diagnostics);
        let mut func = lowered.functions.into_iter().next().unwrap();
        let graph = ActionGraph::build(&mut func).unwrap();
        (func, graph)
    }

    fn run(source: &str, target: Target) -> (Function, ActionGraph, CutTable, GreedyPlan) {
        let (f, graph) = build(source);
        let mut cuts = CutTable::new();
        let mut cache = PathCache::new(false);
        let ctx = PlanContext {
            func: &f,
            graph: &graph,
            target,
        };
        let plan = plan(ctx, &mut cache, &mut cuts);
        (f, graph, cuts, plan)
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
    fn message_passing_gets_lwsync_on_power() {
        let (_, graph, cuts, plan) = run(MP_SEND, Target::Power);
        assert_eq!(cuts.len(), 1);
        let flag = graph.by_name("flag").unwrap().main_block;
        assert_eq!(cuts.cuts()[0].kind, CutKind::Lwsync);
        assert_eq!(cuts.cuts()[0].site, CutSite::Front(flag));
        // The execution edge implied by visibility is then free.
        assert_eq!(plan.inserted, 1);
        assert!(plan
            .decisions
            .iter()
            .any(|(_, d)| *d == EdgeDecision::AlreadyOrdered));
    }

    #[test]
    fn arm_uses_store_barrier_between_writes() {
        let (_, _, cuts, _) = run(MP_SEND, Target::ArmV7);
        assert_eq!(cuts.cuts()[0].kind, CutKind::DmbSt);
    }

    #[test]
    fn push_uses_sync() {
        let (_, _, cuts, _) = run(&MP_SEND.replace("vedge", "pedge"), Target::Power);
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts.cuts()[0].kind, CutKind::Sync);
    }

    const RECV_CTRL: &str = "\
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

    /// Bound to the entry block, the read has no path back to itself.
    #[test]
    fn control_dependency_is_used_when_self_edge_holds() {
        let (_, _, cuts, plan) = run(RECV_CTRL, Target::Power);
        assert!(cuts.cuts().iter().all(|c| c.kind == CutKind::Ctrl));
        assert!(!cuts.is_empty());
        assert!(matches!(
            plan.decisions[0].1,
            EdgeDecision::Dependency(CutStrength::SoftCut)
        ));
    }

    #[test]
    fn dependency_in_a_loop_falls_back_to_barrier() {
        // The read repeats every iteration and nothing orders it against
        // its next instance, so the branch alone is not enough.
        let (_, _, cuts, plan) = run(
            "fn spin(%flag, %out) {
e:
  br head
head:
  %r = begin rd
  %x = load relaxed %flag
  end %r
  %c = cmp eq %x, 0
  br %c, head, body
body:
  %w = begin wr
  store relaxed %out, 1
  end %w
  xedge rd -> wr
  ret
}",
            Target::Power,
        );
        assert!(matches!(plan.decisions[0].1, EdgeDecision::Barrier(CutKind::Lwsync)));
        assert!(cuts.cuts().iter().any(|c| c.kind == CutKind::Lwsync));
    }

    #[test]
    fn second_run_inserts_nothing() {
        for source in [MP_SEND, RECV_CTRL] {
            let (f, graph) = build(source);
            let ctx = PlanContext {
                func: &f,
                graph: &graph,
                target: Target::Power,
            };
            let mut cuts = CutTable::new();
            let mut cache = PathCache::new(false);
            plan(ctx, &mut cache, &mut cuts);
            let again = plan(ctx, &mut cache, &mut cuts);
            assert_eq!(again.inserted, 0);
            assert!(again
                .decisions
                .iter()
                .all(|(_, d)| !matches!(d, EdgeDecision::Barrier(_))));
        }
    }

    #[test]
    fn every_edge_is_ordered_afterwards() {
        let (f, graph, cuts, _) = run(RECV_CTRL, Target::ArmV8);
        let ctx = PlanContext {
            func: &f,
            graph: &graph,
            target: Target::ArmV8,
        };
        let mut cache = PathCache::new(false);
        for edge in graph.planned_edges() {
            let v = classify_with_self_edge(ctx, &mut cache, &cuts, &edge);
            assert!(v.strength > CutStrength::NoCut);
            assert!(v.enforce.is_empty());
        }
    }
}
