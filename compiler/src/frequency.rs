// frequency.rs — Flow-based execution frequency estimates
//
// The CFG, with every return folded back to the entry, is a flow network.
// One unit enters at the entry; each block passes its inflow on to its
// successors in proportion to a heuristic weight (1 for an edge leaving a
// loop, 4 otherwise). The resulting linear system is solved once per
// function for integral capacities.
//
// Preconditions: loop info is current for `func`.
// Postconditions: every real and folded edge has a capacity; unreachable
//   blocks have capacity 0.
// Failure modes: a loop nobody leaves makes the system unsatisfiable; the
//   model then falls back to 5^depth and reports W0300.
// Side effects: none.

use std::collections::BTreeMap;

use crate::cfg::LoopInfo;
use crate::diag::{codes, Diagnostic};
use crate::id::BlockId;
use crate::ir::Function;
use crate::smt::{Backend, Constraint, IntVar, Problem, SolverError};

const EXIT_WEIGHT: i64 = 1;
const STAY_WEIGHT: i64 = 4;
const FALLBACK_BASE: u64 = 5;

#[derive(Debug, Clone, Default)]
pub struct Capacities {
    blocks: Vec<u64>,
    edges: BTreeMap<(BlockId, BlockId), u64>,
    /// Derived from loop depth instead of flow.
    pub fallback: bool,
}

impl Capacities {
    pub fn block(&self, b: BlockId) -> u64 {
        self.blocks.get(b.index()).copied().unwrap_or(0)
    }

    pub fn edge(&self, from: BlockId, to: BlockId) -> u64 {
        self.edges.get(&(from, to)).copied().unwrap_or(0)
    }
}

/// Outgoing flow edges of `b`: real successors, or the entry for returns.
fn flow_successors(func: &Function, b: BlockId) -> Vec<BlockId> {
    if func.is_return(b) {
        vec![func.entry]
    } else {
        func.successors(b)
    }
}

fn weight(loops: &LoopInfo, from: BlockId, to: BlockId) -> i64 {
    if loops.is_loop_exit(from, to) {
        EXIT_WEIGHT
    } else {
        STAY_WEIGHT
    }
}

pub fn compute_capacities(
    func: &Function,
    loops: &LoopInfo,
    backend: &mut dyn Backend,
) -> Result<(Capacities, Option<Diagnostic>), SolverError> {
    let mut problem = Problem::new();
    let nodes: Vec<IntVar> = func
        .block_ids()
        .map(|b| problem.int_var(format!("node.{}", func.block(b).name)))
        .collect();
    let mut edges: BTreeMap<(BlockId, BlockId), IntVar> = BTreeMap::new();
    for a in func.block_ids() {
        for b in flow_successors(func, a) {
            let var = problem.int_var(format!(
                "edge.{}.{}",
                func.block(a).name,
                func.block(b).name
            ));
            edges.insert((a, b), var);
        }
    }

    // Conservation: a block's flow is the sum of its inflow.
    for b in func.block_ids().filter(|&b| b != func.entry) {
        let mut terms = vec![(nodes[b.index()], 1)];
        terms.extend(
            edges
                .iter()
                .filter(|((_, to), _)| *to == b)
                .map(|(_, &var)| (var, -1)),
        );
        problem.assert(Constraint::LinearEq { terms, constant: 0 });
    }
    // Distribution: edge × total weight = block × edge weight.
    for a in func.block_ids() {
        let succs = flow_successors(func, a);
        let total: i64 = succs.iter().map(|&b| weight(loops, a, b)).sum();
        for &b in &succs {
            problem.assert(Constraint::LinearEq {
                terms: vec![
                    (edges[&(a, b)], total),
                    (nodes[a.index()], -weight(loops, a, b)),
                ],
                constant: 0,
            });
        }
    }
    problem.assert(Constraint::AtLeast {
        var: nodes[func.entry.index()],
        bound: 1,
    });
    let live = func.reachable_from(func.entry);
    for b in func.block_ids().filter(|b| !live.contains(b)) {
        problem.assert(Constraint::LinearEq {
            terms: vec![(nodes[b.index()], 1)],
            constant: 0,
        });
    }

    let Some(model) = backend.check(&problem)? else {
        tracing::debug!(function = %func.name, "flow system unsatisfiable; using loop depth");
        let diag = Diagnostic::warning("execution frequencies estimated from loop depth")
            .with_code(codes::W0300)
            .in_function(func.name.clone())
            .with_hint("some loop has no exit");
        return Ok((depth_capacities(func, loops), Some(diag)));
    };

    let caps = Capacities {
        blocks: nodes
            .iter()
            .map(|&v| model.int(v).max(0) as u64)
            .collect(),
        edges: edges
            .iter()
            .map(|(&k, &v)| (k, model.int(v).max(0) as u64))
            .collect(),
        fallback: false,
    };
    Ok((caps, None))
}

fn depth_capacities(func: &Function, loops: &LoopInfo) -> Capacities {
    let freq = |b: BlockId| FALLBACK_BASE.saturating_pow(loops.depth(b));
    let mut edges = BTreeMap::new();
    for a in func.block_ids() {
        for b in flow_successors(func, a) {
            edges.insert((a, b), freq(a).min(freq(b)));
        }
    }
    Capacities {
        blocks: func.block_ids().map(freq).collect(),
        edges,
        fallback: true,
    }
}
