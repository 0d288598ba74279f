// cut.rs — Cut decisions and the per-block cut table
//
// A cut is an ordering mechanism placed somewhere in the CFG: a barrier at
// a block boundary or on an edge, a control dependency on a branch edge, a
// data dependency through a chain of address computations, or an ordering
// upgrade on a block's accesses. Planners record cuts here as soon as they
// decide them; later path walks consult the table.
//
// Preconditions: sites name blocks of the function the table belongs to.
// Postconditions: the table holds at most one cut per placement.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::id::{BlockId, ValueId};
use crate::ir::{FenceKind, UseSite};

// ── Kinds and sites ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CutKind {
    Sync,
    Lwsync,
    Isync,
    DmbSt,
    DmbLd,
    Ctrl,
    Data,
    Release,
    Acquire,
}

impl CutKind {
    /// Kinds realized as a standalone fence.
    pub const BARRIERS: [CutKind; 4] = [
        CutKind::Sync,
        CutKind::Lwsync,
        CutKind::DmbSt,
        CutKind::DmbLd,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CutKind::Sync => "sync",
            CutKind::Lwsync => "lwsync",
            CutKind::Isync => "isync",
            CutKind::DmbSt => "dmb.st",
            CutKind::DmbLd => "dmb.ld",
            CutKind::Ctrl => "ctrl",
            CutKind::Data => "data",
            CutKind::Release => "release",
            CutKind::Acquire => "acquire",
        }
    }

    pub fn is_barrier(self) -> bool {
        Self::BARRIERS.contains(&self)
    }

    /// The fence a barrier cut becomes.
    pub fn fence_kind(self) -> Option<FenceKind> {
        match self {
            CutKind::Sync => Some(FenceKind::Sync),
            CutKind::Lwsync => Some(FenceKind::Lwsync),
            CutKind::DmbSt => Some(FenceKind::DmbSt),
            CutKind::DmbLd => Some(FenceKind::DmbLd),
            _ => None,
        }
    }
}

impl fmt::Display for CutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a cut sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CutSite {
    /// First insertion point of the block.
    Front(BlockId),
    /// Just before the block's terminator.
    Back(BlockId),
    /// On the CFG edge `from -> to`.
    Edge(BlockId, BlockId),
    /// The memory accesses of the block.
    Accesses(BlockId),
}

impl CutSite {
    /// Blocks the site touches, for the per-block index.
    fn blocks(self) -> Vec<BlockId> {
        match self {
            CutSite::Front(b) | CutSite::Back(b) | CutSite::Accesses(b) => vec![b],
            CutSite::Edge(a, b) => vec![a, b],
        }
    }

    /// True if every execution along `path` passes the site between the
    /// path's first and last block.
    pub fn is_on_path(self, path: &[BlockId]) -> bool {
        let n = path.len();
        match self {
            CutSite::Front(b) => path.iter().skip(1).any(|&p| p == b),
            CutSite::Back(b) => path.iter().take(n.saturating_sub(1)).any(|&p| p == b),
            CutSite::Edge(a, b) => path.windows(2).any(|w| w[0] == a && w[1] == b),
            CutSite::Accesses(b) => path.contains(&b),
        }
    }
}

// ── Cuts ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cut {
    pub kind: CutKind,
    pub site: CutSite,
    /// Value the dependency hangs off, for `Ctrl`, `Isync` and `Data`.
    pub dep: Option<ValueId>,
    /// Comparison operand to disguise (`Ctrl`/`Isync`) or the dependent
    /// access's pointer operand (`Data`).
    pub use_site: Option<UseSite>,
    /// Path the dependency was found on.
    pub path: Vec<BlockId>,
    /// Instructions that must survive optimization, source side first.
    pub trail: Vec<ValueId>,
}

impl Cut {
    pub fn barrier(kind: CutKind, site: CutSite) -> Cut {
        debug_assert!(kind.is_barrier());
        Cut {
            kind,
            site,
            dep: None,
            use_site: None,
            path: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// A control dependency on the branch `from -> to`, with or without a
    /// trailing isync.
    pub fn ctrl(
        kind: CutKind,
        from: BlockId,
        to: BlockId,
        dep: ValueId,
        use_site: Option<UseSite>,
        path: Vec<BlockId>,
    ) -> Cut {
        debug_assert!(matches!(kind, CutKind::Ctrl | CutKind::Isync));
        Cut {
            kind,
            site: CutSite::Edge(from, to),
            dep: Some(dep),
            use_site,
            path,
            trail: Vec::new(),
        }
    }

    pub fn data(
        block: BlockId,
        dep: ValueId,
        use_site: UseSite,
        trail: Vec<ValueId>,
        path: Vec<BlockId>,
    ) -> Cut {
        Cut {
            kind: CutKind::Data,
            site: CutSite::Accesses(block),
            dep: Some(dep),
            use_site: Some(use_site),
            path,
            trail,
        }
    }

    /// `Release` or `Acquire` on a block's accesses.
    pub fn ordering(kind: CutKind, block: BlockId) -> Cut {
        debug_assert!(matches!(kind, CutKind::Release | CutKind::Acquire));
        Cut {
            kind,
            site: CutSite::Accesses(block),
            dep: None,
            use_site: None,
            path: Vec::new(),
            trail: Vec::new(),
        }
    }

    /// Same effect on the program, ignoring the path it was found on.
    pub fn same_placement(&self, other: &Cut) -> bool {
        self.kind == other.kind
            && self.site == other.site
            && self.dep == other.dep
            && self.use_site == other.use_site
            && self.trail == other.trail
    }
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ ", self.kind)?;
        match self.site {
            CutSite::Front(b) => write!(f, "front({b})")?,
            CutSite::Back(b) => write!(f, "back({b})")?,
            CutSite::Edge(a, b) => write!(f, "edge({a}, {b})")?,
            CutSite::Accesses(b) => write!(f, "accesses({b})")?,
        }
        if let Some(dep) = self.dep {
            write!(f, " dep {dep}")?;
        }
        Ok(())
    }
}

// ── Table ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CutTable {
    cuts: Vec<Cut>,
    by_block: HashMap<BlockId, Vec<usize>>,
}

impl CutTable {
    pub fn new() -> Self {
        CutTable::default()
    }

    /// Record a cut. Returns false if an equivalent one is already present.
    pub fn insert(&mut self, cut: Cut) -> bool {
        if self.contains(&cut) {
            return false;
        }
        let idx = self.cuts.len();
        for b in cut.site.blocks() {
            let slot = self.by_block.entry(b).or_default();
            if !slot.contains(&idx) {
                slot.push(idx);
            }
        }
        tracing::trace!(cut = %cut, "recorded cut");
        self.cuts.push(cut);
        true
    }

    pub fn contains(&self, cut: &Cut) -> bool {
        self.at_block(cut.site.blocks()[0])
            .any(|c| c.same_placement(cut))
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// Cuts whose site touches `block`.
    pub fn at_block(&self, block: BlockId) -> impl Iterator<Item = &Cut> + '_ {
        self.by_block
            .get(&block)
            .into_iter()
            .flatten()
            .map(|&i| &self.cuts[i])
    }

    /// Cuts lying on `path`, each once.
    pub fn on_path(&self, path: &[BlockId]) -> Vec<&Cut> {
        let mut seen: Vec<usize> = Vec::new();
        for b in path {
            for &i in self.by_block.get(b).into_iter().flatten() {
                if !seen.contains(&i) && self.cuts[i].site.is_on_path(path) {
                    seen.push(i);
                }
            }
        }
        seen.sort_unstable();
        seen.into_iter().map(|i| &self.cuts[i]).collect()
    }

    pub fn into_cuts(self) -> Vec<Cut> {
        self.cuts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B0: BlockId = BlockId(0);
    const B1: BlockId = BlockId(1);
    const B2: BlockId = BlockId(2);

    #[test]
    fn site_positions_on_path() {
        let path = [B0, B1, B2];
        assert!(!CutSite::Front(B0).is_on_path(&path));
        assert!(CutSite::Front(B2).is_on_path(&path));
        assert!(CutSite::Back(B0).is_on_path(&path));
        assert!(!CutSite::Back(B2).is_on_path(&path));
        assert!(CutSite::Edge(B1, B2).is_on_path(&path));
        assert!(!CutSite::Edge(B0, B2).is_on_path(&path));
        assert!(CutSite::Accesses(B1).is_on_path(&path));
    }

    #[test]
    fn cycle_path_counts_front_of_its_end() {
        let cycle = [B1, B2, B1];
        assert!(CutSite::Front(B1).is_on_path(&cycle));
        assert!(CutSite::Back(B1).is_on_path(&cycle));
    }

    #[test]
    fn insert_deduplicates_by_placement() {
        let mut table = CutTable::new();
        let dep = ValueId(3);
        assert!(table.insert(Cut::ctrl(CutKind::Ctrl, B0, B1, dep, None, vec![B0, B1])));
        assert!(!table.insert(Cut::ctrl(
            CutKind::Ctrl,
            B0,
            B1,
            dep,
            None,
            vec![B0, B1, B2]
        )));
        assert!(table.insert(Cut::barrier(CutKind::Lwsync, CutSite::Front(B1))));
        assert_eq!(table.len(), 2);
        assert_eq!(table.at_block(B1).count(), 2);
        assert_eq!(table.at_block(B2).count(), 0);
    }

    #[test]
    fn on_path_filters_by_position() {
        let mut table = CutTable::new();
        table.insert(Cut::barrier(CutKind::Sync, CutSite::Front(B0)));
        table.insert(Cut::barrier(CutKind::Lwsync, CutSite::Back(B1)));
        let on: Vec<CutKind> = table.on_path(&[B0, B1, B2]).iter().map(|c| c.kind).collect();
        assert_eq!(on, vec![CutKind::Lwsync]);
    }
}
