// emit.rs — Apply a cut plan to the function
//
// Preconditions: every cut refers to blocks and values of `func`; cuts
//   were planned against the current CFG.
// Postconditions: barriers are fences at their sites; control
//   dependencies have an opaque compare operand and a compiler fence (plus
//   isync for isync cuts) at the branch target; data trails are marked must-preserve;
//   release/acquire cuts strengthen the block's accesses.
// Failure modes: none.
// Side effects: inserts instructions, may split CFG edges.

use std::collections::{HashMap, HashSet};

use crate::cut::{Cut, CutKind, CutSite};
use crate::id::BlockId;
use crate::ir::{FenceKind, Function, InstKind, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct EmitStats {
    pub fences: usize,
    pub split_edges: usize,
    pub opaque_uses: usize,
    pub preserved: usize,
    pub upgraded: usize,
}

impl EmitStats {
    pub fn changed(&self) -> bool {
        self.fences + self.split_edges + self.opaque_uses + self.preserved + self.upgraded > 0
    }
}

/// Where in a block a fence goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Point {
    Front(BlockId),
    Back(BlockId),
}

struct Emitter<'f> {
    func: &'f mut Function,
    /// Blocks created on split edges, by original edge.
    splits: HashMap<(BlockId, BlockId), BlockId>,
    placed: HashSet<(Point, FenceKind)>,
    stats: EmitStats,
}

impl Emitter<'_> {
    /// A point every execution of `from -> to`, and nothing else, passes.
    fn edge_point(&mut self, from: BlockId, to: BlockId) -> Point {
        if let Some(&mid) = self.splits.get(&(from, to)) {
            return Point::Front(mid);
        }
        if self.func.successors(from).len() == 1 {
            return Point::Back(from);
        }
        if self.func.predecessors(to).len() == 1 {
            return Point::Front(to);
        }
        let mid = self.func.split_edge(from, to);
        tracing::trace!(
            from = %self.func.block(from).name,
            to = %self.func.block(to).name,
            "split critical edge"
        );
        self.splits.insert((from, to), mid);
        self.stats.split_edges += 1;
        Point::Front(mid)
    }

    fn fence(&mut self, at: Point, kind: FenceKind) {
        if !self.placed.insert((at, kind)) {
            return;
        }
        match at {
            Point::Front(b) => self.func.insert_front(b, InstKind::Fence(kind)),
            Point::Back(b) => self.func.insert_before_terminator(b, InstKind::Fence(kind)),
        };
        self.stats.fences += 1;
    }

    fn point(&mut self, site: CutSite) -> Point {
        match site {
            CutSite::Front(b) | CutSite::Accesses(b) => Point::Front(b),
            CutSite::Back(b) => Point::Back(b),
            CutSite::Edge(a, b) => self.edge_point(a, b),
        }
    }

    fn apply(&mut self, cut: &Cut) {
        match cut.kind {
            kind if kind.is_barrier() => {
                let at = self.point(cut.site);
                if let Some(fence) = kind.fence_kind() {
                    self.fence(at, fence);
                }
            }
            CutKind::Ctrl | CutKind::Isync => {
                if let Some(site) = cut.use_site {
                    let before = self.func.operand(site);
                    if self.func.mark_opaque_use(site) != before {
                        self.stats.opaque_uses += 1;
                    }
                }
                let at = self.point(cut.site);
                self.fence(at, FenceKind::Compiler);
                if cut.kind == CutKind::Isync {
                    self.fence(at, FenceKind::Isync);
                }
            }
            CutKind::Data => {
                for &v in &cut.trail {
                    if !self.func.value(v).must_preserve {
                        self.func.mark_must_preserve(v);
                        self.stats.preserved += 1;
                    }
                }
            }
            CutKind::Release | CutKind::Acquire => {
                let CutSite::Accesses(block) = cut.site else {
                    return;
                };
                let release = cut.kind == CutKind::Release;
                let insts = self.func.block(block).insts.clone();
                for v in insts {
                    let kind = self.func.kind(v);
                    let eligible = if release {
                        kind.is_store() || kind.is_rmw()
                    } else {
                        kind.is_load() || kind.is_rmw()
                    };
                    if !eligible {
                        continue;
                    }
                    let upgrade: fn(Ordering) -> Ordering = if release {
                        Ordering::with_release
                    } else {
                        Ordering::with_acquire
                    };
                    if self.func.upgrade_ordering(v, upgrade) {
                        self.stats.upgraded += 1;
                    }
                }
            }
            _ => {}
        }
    }
}

/// Rewrite `func` so every cut in `cuts` takes effect.
pub fn emit_cuts(func: &mut Function, cuts: &[Cut]) -> EmitStats {
    let mut emitter = Emitter {
        func,
        splits: HashMap::new(),
        placed: HashSet::new(),
        stats: EmitStats::default(),
    };
    for cut in cuts {
        emitter.apply(cut);
    }
    emitter.stats
}
