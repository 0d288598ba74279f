// path_cache.rs — Simple-path enumeration over a possibly cyclic CFG
//
// Paths are immutable cons cells `(block, tail)` named by a `PathId`, so a
// path list is a list of integers and paths sharing a suffix can share
// storage. Enumeration treats every return block as having an implicit edge
// back to the entry (the function may be called again), so a path may wrap
// around through the entry.
//
// Preconditions: function is S1-well-formed.
// Postconditions: every returned path is simple (no repeated block) except
//   that a self-cycle query starts and ends at the same block.
// Failure modes: none; enumeration is exponential in the worst case.
// Side effects: interns new path cells; caches SCCs per bind site until
//   `clear()`.

use std::collections::{BTreeSet, HashMap};

use crate::id::BlockId;
use crate::ir::Function;

/// Names an interned path cell. `PathId::EMPTY` is the empty path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(i32);

impl PathId {
    pub const EMPTY: PathId = PathId(-1);

    pub fn is_empty(self) -> bool {
        self == PathId::EMPTY
    }
}

/// A set of blocks a walk may not enter.
pub type SkipSet = BTreeSet<BlockId>;

#[derive(Debug, Default)]
pub struct PathCache {
    share_suffixes: bool,
    entries: Vec<(BlockId, PathId)>,
    interned: HashMap<(BlockId, PathId), PathId>,
    /// SCC representative per block, keyed by the bind site that was skipped.
    sccs: HashMap<Option<BlockId>, Vec<BlockId>>,
}

impl PathCache {
    /// With `share_suffixes` off, every cons cell gets a fresh id, so two
    /// structurally equal paths found by different queries stay distinct.
    pub fn new(share_suffixes: bool) -> Self {
        PathCache {
            share_suffixes,
            ..PathCache::default()
        }
    }

    /// Drop all cached state. Must be called whenever the CFG changes.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.interned.clear();
        self.sccs.clear();
    }

    // ── Cells ──

    pub fn add_to_path(&mut self, block: BlockId, tail: PathId) -> PathId {
        if self.share_suffixes {
            if let Some(&id) = self.interned.get(&(block, tail)) {
                return id;
            }
        }
        let id = PathId(self.entries.len() as i32);
        self.entries.push((block, tail));
        if self.share_suffixes {
            self.interned.insert((block, tail), id);
        }
        id
    }

    pub fn head(&self, path: PathId) -> BlockId {
        assert!(!path.is_empty(), "head of empty path");
        self.entries[path.0 as usize].0
    }

    pub fn tail(&self, path: PathId) -> PathId {
        assert!(!path.is_empty(), "tail of empty path");
        self.entries[path.0 as usize].1
    }

    pub fn extract_path(&self, mut path: PathId) -> Vec<BlockId> {
        let mut out = Vec::new();
        while !path.is_empty() {
            out.push(self.head(path));
            path = self.tail(path);
        }
        out
    }

    /// `a->b->c` using block names.
    pub fn format_path(&self, func: &Function, path: PathId) -> String {
        self.extract_path(path)
            .iter()
            .map(|&b| func.block(b).name.as_str())
            .collect::<Vec<_>>()
            .join("->")
    }

    // ── Enumeration ──

    /// Every simple path from `src` to `dst` that avoids `skip`. With
    /// `src == dst`, returns the trivial path unless `allow_self_cycle`, in
    /// which case it returns every simple cycle through `src`. The endpoints
    /// themselves are never skipped.
    pub fn find_all_simple_paths(
        &mut self,
        func: &Function,
        src: BlockId,
        dst: BlockId,
        allow_self_cycle: bool,
        skip: &SkipSet,
    ) -> Vec<PathId> {
        let mut grey = skip.clone();
        grey.remove(&src);
        grey.remove(&dst);
        let paths = self.find_paths_from(func, &mut grey, src, dst, allow_self_cycle);
        tracing::trace!(
            function = %func.name,
            src = %func.block(src).name,
            dst = %func.block(dst).name,
            paths = paths.len(),
            "enumerated simple paths"
        );
        paths
    }

    /// DFS that keeps `src` grey for the duration of its frame. No
    /// memoization: in a cyclic graph the paths out of a block depend on how
    /// it was reached.
    fn find_paths_from(
        &mut self,
        func: &Function,
        grey: &mut SkipSet,
        src: BlockId,
        dst: BlockId,
        allow_self_cycle: bool,
    ) -> Vec<PathId> {
        if src == dst && !allow_self_cycle {
            return vec![self.add_to_path(dst, PathId::EMPTY)];
        }
        if grey.contains(&src) {
            return Vec::new();
        }
        grey.insert(src);

        let mut paths = Vec::new();
        if func.is_return(src) {
            paths = self.find_paths_from(func, grey, func.entry, dst, false);
        }
        for succ in func.successors(src) {
            let sub = self.find_paths_from(func, grey, succ, dst, false);
            paths.extend(sub);
        }
        for path in paths.iter_mut() {
            *path = self.add_to_path(src, *path);
        }

        grey.remove(&src);
        paths
    }

    /// Blocks reachable from `src` (including return-to-entry) without
    /// entering `skip`. `src` itself is included unless skipped.
    pub fn find_all_reachable(&self, func: &Function, src: BlockId, skip: &SkipSet) -> SkipSet {
        let mut seen = skip.clone();
        let mut stack = vec![src];
        while let Some(b) = stack.pop() {
            if !seen.insert(b) {
                continue;
            }
            if func.is_return(b) {
                stack.push(func.entry);
            }
            stack.extend(func.successors(b));
        }
        for b in skip {
            seen.remove(b);
        }
        seen
    }

    // ── Strongly connected components ──

    /// Kosaraju SCCs over real CFG edges (no return folding: a value
    /// computed in one invocation does not flow into the next). Returns the
    /// representative of each block's component; skipped blocks are
    /// singletons.
    pub fn find_sccs(&self, func: &Function, skip: &SkipSet) -> Vec<BlockId> {
        let n = func.blocks.len();

        // Pass 1: forward DFS, record finish order.
        let mut visited = vec![false; n];
        let mut finish = Vec::with_capacity(n);
        for root in func.block_ids() {
            if visited[root.index()] || skip.contains(&root) {
                continue;
            }
            visited[root.index()] = true;
            let mut stack = vec![(root, func.successors(root), 0usize)];
            while let Some((b, succs, i)) = stack.last_mut() {
                if *i < succs.len() {
                    let next = succs[*i];
                    *i += 1;
                    if !visited[next.index()] && !skip.contains(&next) {
                        visited[next.index()] = true;
                        let next_succs = func.successors(next);
                        stack.push((next, next_succs, 0));
                    }
                } else {
                    finish.push(*b);
                    stack.pop();
                }
            }
        }

        // Pass 2: reverse-graph DFS in decreasing finish order.
        let mut rep: Vec<Option<BlockId>> = vec![None; n];
        for &root in finish.iter().rev() {
            if rep[root.index()].is_some() {
                continue;
            }
            rep[root.index()] = Some(root);
            let mut stack = vec![root];
            while let Some(b) = stack.pop() {
                for pred in func.predecessors(b) {
                    if rep[pred.index()].is_none() && !skip.contains(&pred) {
                        rep[pred.index()] = Some(root);
                        stack.push(pred);
                    }
                }
            }
        }

        func.block_ids()
            .map(|b| rep[b.index()].unwrap_or(b))
            .collect()
    }

    /// Union of the SCCs of every block on `path`, with `bind_site` skipped.
    /// Bounds how far a dependency search may detour off the path.
    pub fn path_reachable(
        &mut self,
        func: &Function,
        bind_site: Option<BlockId>,
        path: PathId,
    ) -> BTreeSet<BlockId> {
        if !self.sccs.contains_key(&bind_site) {
            let skip: SkipSet = bind_site.into_iter().collect();
            let reps = self.find_sccs(func, &skip);
            self.sccs.insert(bind_site, reps);
        }
        let reps = &self.sccs[&bind_site];
        let on_path: BTreeSet<BlockId> = self
            .extract_path(path)
            .into_iter()
            .map(|b| reps[b.index()])
            .collect();
        func.block_ids()
            .filter(|b| on_path.contains(&reps[b.index()]))
            .collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
