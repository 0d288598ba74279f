// cfg.rs — Dominance and loop-nest queries over an IR function
//
// Dominators use the iterative algorithm of Cooper, Harvey and Kennedy over
// a reverse postorder of the real CFG (no return-to-entry folding). Loops
// are natural loops of back edges `m -> n` where `n` dominates `m`; a
// block's depth is the number of loops containing it.
//
// Preconditions: function is S1-well-formed (every block has a terminator).
// Postconditions: queries answer for the CFG as it was when computed;
//   recompute after any CFG mutation.
// Failure modes: none. Unreachable blocks are dominated by nothing and sit
//   at depth 0.
// Side effects: none.

use std::collections::BTreeSet;

use crate::id::BlockId;
use crate::ir::Function;

// ── Postorder ───────────────────────────────────────────────────────────

/// DFS stack state marker for computing the postorder.
enum Visit {
    First,
    Last,
}

/// Blocks reachable from the entry, in CFG postorder.
pub fn postorder(func: &Function) -> Vec<BlockId> {
    let mut seen = vec![false; func.blocks.len()];
    let mut order = Vec::with_capacity(func.blocks.len());
    let mut stack = vec![(Visit::First, func.entry)];
    while let Some((visit, block)) = stack.pop() {
        match visit {
            Visit::First => {
                if seen[block.index()] {
                    continue;
                }
                seen[block.index()] = true;
                stack.push((Visit::Last, block));
                // Push in reverse so the first successor is explored first.
                for succ in func.successors(block).into_iter().rev() {
                    if !seen[succ.index()] {
                        stack.push((Visit::First, succ));
                    }
                }
            }
            Visit::Last => order.push(block),
        }
    }
    order
}

// ── Dominators ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Dominators {
    entry: BlockId,
    idom: Vec<Option<BlockId>>,
    /// Position in reverse postorder; `None` for unreachable blocks.
    rpo_number: Vec<Option<usize>>,
}

impl Dominators {
    pub fn compute(func: &Function) -> Self {
        let n = func.blocks.len();
        let rpo: Vec<BlockId> = postorder(func).into_iter().rev().collect();
        let mut rpo_number = vec![None; n];
        for (i, b) in rpo.iter().enumerate() {
            rpo_number[b.index()] = Some(i);
        }
        let preds: Vec<Vec<BlockId>> = func.block_ids().map(|b| func.predecessors(b)).collect();

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        idom[func.entry.index()] = Some(func.entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &p in &preds[b.index()] {
                    if idom[p.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_number, p, cur),
                    });
                }
                if new_idom.is_some() && idom[b.index()] != new_idom {
                    idom[b.index()] = new_idom;
                    changed = true;
                }
            }
        }

        Dominators {
            entry: func.entry,
            idom,
            rpo_number,
        }
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        if b == self.entry {
            return None;
        }
        self.idom[b.index()]
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.rpo_number[b.index()].is_some()
    }

    /// True if every path from the entry to `b` passes through `a`.
    /// Reflexive.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(up) => cur = up,
                None => return false,
            }
        }
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_number: &[Option<usize>],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    let num = |x: BlockId| rpo_number[x.index()].unwrap_or(usize::MAX);
    while a != b {
        while num(a) > num(b) {
            a = idom[a.index()].unwrap_or(a);
        }
        while num(b) > num(a) {
            b = idom[b.index()].unwrap_or(b);
        }
    }
    a
}

// ── Loops ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub body: BTreeSet<BlockId>,
}

#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
    depth: Vec<u32>,
}

impl LoopInfo {
    pub fn compute(func: &Function, doms: &Dominators) -> Self {
        // A back edge m -> n is an edge where n dominates m. Back edges into
        // the same header are merged into one loop.
        let mut loops: Vec<Loop> = Vec::new();
        for m in func.block_ids() {
            for n in func.successors(m) {
                if !doms.dominates(n, m) {
                    continue;
                }
                let body = natural_loop(func, n, m);
                match loops.iter_mut().find(|l| l.header == n) {
                    Some(existing) => existing.body.extend(body),
                    None => loops.push(Loop { header: n, body }),
                }
            }
        }

        let mut depth = vec![0u32; func.blocks.len()];
        for l in &loops {
            for b in &l.body {
                depth[b.index()] += 1;
            }
        }

        LoopInfo { loops, depth }
    }

    pub fn depth(&self, b: BlockId) -> u32 {
        self.depth[b.index()]
    }

    /// True if `from -> to` leaves some loop containing `from`.
    pub fn is_loop_exit(&self, from: BlockId, to: BlockId) -> bool {
        self.loops
            .iter()
            .any(|l| l.body.contains(&from) && !l.body.contains(&to))
    }
}

/// Blocks of the natural loop of back edge `tail -> header`: the header
/// plus every block that reaches `tail` without passing the header.
fn natural_loop(func: &Function, header: BlockId, tail: BlockId) -> BTreeSet<BlockId> {
    let mut body = BTreeSet::new();
    body.insert(header);
    let mut stack = vec![tail];
    while let Some(b) = stack.pop() {
        if body.insert(b) {
            stack.extend(func.predecessors(b));
        }
    }
    body
}

// ── Tests ───────────────────────────────────────────────────────────────
