// deps.rs — Control- and address-dependency queries
//
// A control dependency exists when a block's conditional branch tests a
// value computed from a dependency source; atomic RMWs carry one implicitly
// (their retry loop branches on the loaded value). An address dependency
// exists when an access's pointer is computed from the source through
// address arithmetic only.
//
// Preconditions: function is S2-well-formed.
// Postconditions: trails list the values between source and use, source
//   side first, ending at the dependent access.
// Failure modes: none.
// Side effects: address queries populate the PathCache SCC memo.

use std::collections::BTreeSet;

use crate::id::{BlockId, ValueId};
use crate::ir::{Function, InstKind, UseSite};
use crate::path_cache::{PathCache, PathId};

/// How a block's branch depends on a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSite {
    /// The value is an atomic RMW in this block; its retry loop branches.
    Implicit,
    /// Operand of the comparison (or the branch itself) that carries it.
    Operand(UseSite),
}

impl BranchSite {
    pub fn use_site(self) -> Option<UseSite> {
        match self {
            BranchSite::Implicit => None,
            BranchSite::Operand(site) => Some(site),
        }
    }
}

/// Look through identity wrappers.
fn strip(func: &Function, mut v: ValueId) -> ValueId {
    while let InstKind::Opaque(inner) | InstKind::Cast(inner) = func.kind(v) {
        v = *inner;
    }
    v
}

/// Does `block`'s terminator branch on `value`?
pub fn branches_on(func: &Function, block: BlockId, value: ValueId) -> Option<BranchSite> {
    if func.kind(value).is_rmw() && func.block_of(value) == Some(block) {
        return Some(BranchSite::Implicit);
    }
    let term = func.terminator(block)?;
    let InstKind::CondBr { cond, .. } = *func.kind(term) else {
        return None;
    };
    if strip(func, cond) == value {
        return Some(BranchSite::Operand(UseSite {
            inst: term,
            index: 0,
        }));
    }
    let cmp = strip(func, cond);
    if let InstKind::Cmp { lhs, rhs, .. } = *func.kind(cmp) {
        for (index, op) in [lhs, rhs].into_iter().enumerate() {
            if strip(func, op) == value {
                return Some(BranchSite::Operand(UseSite { inst: cmp, index }));
            }
        }
    }
    None
}

// ── Address dependencies ────────────────────────────────────────────────

/// True if `use_site`'s pointer is computed from `source` through address
/// arithmetic, following phis only from blocks near `path`.
pub fn addr_depends_on(
    func: &Function,
    use_site: UseSite,
    source: ValueId,
    cache: &mut PathCache,
    bind_site: Option<BlockId>,
    path: PathId,
) -> bool {
    !addr_dependency_trails(func, use_site, source, cache, bind_site, path).is_empty()
}

/// Every address-only chain from `source` to `use_site`. Each node is
/// explored once, so chains sharing a prefix are reported once.
pub fn addr_dependency_trails(
    func: &Function,
    use_site: UseSite,
    source: ValueId,
    cache: &mut PathCache,
    bind_site: Option<BlockId>,
    path: PathId,
) -> Vec<Vec<ValueId>> {
    let reachable = cache.path_reachable(func, bind_site, path);
    let mut search = TrailSearch {
        func,
        source,
        sink: use_site.inst,
        reachable: &reachable,
        visited: BTreeSet::new(),
        stack: Vec::new(),
        trails: Vec::new(),
    };
    search.walk(func.operand(use_site));
    search.trails
}

struct TrailSearch<'a> {
    func: &'a Function,
    source: ValueId,
    sink: ValueId,
    reachable: &'a BTreeSet<BlockId>,
    visited: BTreeSet<ValueId>,
    /// Values from the use back to the current one.
    stack: Vec<ValueId>,
    trails: Vec<Vec<ValueId>>,
}

impl TrailSearch<'_> {
    fn walk(&mut self, v: ValueId) {
        if v == self.source {
            let mut trail: Vec<ValueId> = self.stack.iter().rev().copied().collect();
            trail.push(self.sink);
            self.trails.push(trail);
            return;
        }
        if !self.visited.insert(v) {
            return;
        }
        let next: Vec<ValueId> = match self.func.kind(v) {
            InstKind::Gep { base, offsets } => {
                let mut ops = vec![*base];
                ops.extend(offsets.iter().copied());
                ops
            }
            InstKind::Cast(x) | InstKind::Opaque(x) => vec![*x],
            InstKind::Bin { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Phi(incoming) => incoming
                .iter()
                .filter(|(_, pred)| self.reachable.contains(pred))
                .map(|(x, _)| *x)
                .collect(),
            _ => return,
        };
        self.stack.push(v);
        for x in next {
            self.walk(x);
        }
        self.stack.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(source: &str) -> Function {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_module(&parsed.module.unwrap());
        assert!(lowered.diagnostics.is_empty(), "{:?}", lowered.diagnostics);
        lowered.functions.into_iter().next().unwrap()
    }

    fn named(func: &Function, name: &str) -> ValueId {
        (0..func.values.len() as u32)
            .map(ValueId)
            .find(|&v| func.value(v).name.as_deref() == Some(name))
            .unwrap()
    }

    fn block(func: &Function, name: &str) -> BlockId {
        func.block_ids()
            .find(|&b| func.block(b).name == name)
            .unwrap()
    }

    #[test]
    fn branch_on_compare_operand() {
        let f = lower(
            "fn f(%p) { e: %x = load relaxed %p\n %o = opaque %x\n %c = cmp eq 0, %o\n br %c, a, b\n a: ret\n b: ret }",
        );
        let (x, c) = (named(&f, "x"), named(&f, "c"));
        assert_eq!(
            branches_on(&f, block(&f, "e"), x),
            Some(BranchSite::Operand(UseSite { inst: c, index: 1 }))
        );
        assert_eq!(branches_on(&f, block(&f, "a"), x), None);
    }

    #[test]
    fn branch_on_value_directly() {
        let f = lower("fn f(%p) { e: %x = load relaxed %p\n br %x, a, a\n a: ret }");
        let site = branches_on(&f, block(&f, "e"), named(&f, "x")).unwrap();
        assert!(matches!(site, BranchSite::Operand(UseSite { index: 0, .. })));
    }

    #[test]
    fn rmw_branches_implicitly() {
        let f = lower("fn f(%p) { e: %o = rmw add relaxed %p, 1\n br a\n a: ret }");
        let o = named(&f, "o");
        assert_eq!(branches_on(&f, block(&f, "e"), o), Some(BranchSite::Implicit));
        assert_eq!(branches_on(&f, block(&f, "a"), o), None);
    }

    #[test]
    fn address_chain_through_gep_and_cast() {
        let f = lower(
            "fn f(%p, %q) { e: %x = load relaxed %p\n %i = mul %x, 8\n %a = gep %q, %i\n %b = cast %a\n %y = load relaxed %b\n ret }",
        );
        let [x, i, a, b, y] = ["x", "i", "a", "b", "y"].map(|n| named(&f, n));
        let mut cache = PathCache::new(false);
        let e = block(&f, "e");
        let path = cache.add_to_path(e, PathId::EMPTY);
        let use_site = UseSite { inst: y, index: 0 };
        let trails = addr_dependency_trails(&f, use_site, x, &mut cache, None, path);
        assert_eq!(trails, vec![vec![i, a, b, y]]);
        assert!(!addr_depends_on(&f, use_site, y, &mut cache, None, path));
    }

    #[test]
    fn compare_breaks_the_chain() {
        let f = lower(
            "fn f(%p, %q) { e: %x = load relaxed %p\n %c = cmp eq %x, 0\n %a = gep %q, %c\n %y = load relaxed %a\n ret }",
        );
        let mut cache = PathCache::new(false);
        let path = cache.add_to_path(block(&f, "e"), PathId::EMPTY);
        let use_site = UseSite {
            inst: named(&f, "y"),
            index: 0,
        };
        assert!(!addr_depends_on(&f, use_site, named(&f, "x"), &mut cache, None, path));
    }

    #[test]
    fn phi_follows_only_nearby_predecessors() {
        // %a flows into the phi from `near`; from `far` it does not.
        let f = lower(
            "fn f(%p, %q, %c) {
e:
  %x = load relaxed %p
  br %c, near, far
near:
  %a = gep %q, %x
  br join
far:
  br join
join:
  %m = phi [%a, near], [%q, far]
  %y = load relaxed %m
  ret
}",
        );
        let (x, y) = (named(&f, "x"), named(&f, "y"));
        let use_site = UseSite { inst: y, index: 0 };
        let mut cache = PathCache::new(false);

        let via_near = [block(&f, "e"), block(&f, "near"), block(&f, "join")];
        let mut path = PathId::EMPTY;
        for &b in via_near.iter().rev() {
            path = cache.add_to_path(b, path);
        }
        assert!(addr_depends_on(&f, use_site, x, &mut cache, None, path));

        let via_far = [block(&f, "e"), block(&f, "far"), block(&f, "join")];
        let mut path = PathId::EMPTY;
        for &b in via_far.iter().rev() {
            path = cache.add_to_path(b, path);
        }
        assert!(!addr_depends_on(&f, use_site, x, &mut cache, None, path));
    }
}
