// Property-based tests for planner invariants.
//
// Three categories:
// 1. Path enumeration: simple paths on random CFGs match an independent
//    brute-force walk and never repeat a block
// 2. Planner soundness: greedy and optimal plans on random two-action
//    programs pass verification on every target
// 3. Greedy idempotence: a second greedy run inserts nothing
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rmcc::action::ActionGraph;
use rmcc::classify::PlanContext;
use rmcc::cut::CutTable;
use rmcc::id::BlockId;
use rmcc::ir::{Function, InstKind};
use rmcc::pass::StageCert;
use rmcc::path_cache::{PathCache, SkipSet};
use rmcc::realize::{Mode, RealizeConfig, Realizer};
use rmcc::target::Target;

// ── CFG generator ───────────────────────────────────────────────────────────

/// Terminator shape per block: `None` returns, `Some(targets)` branches.
type Shape = Vec<Option<Vec<usize>>>;

/// Random CFG with 1..=6 blocks. Every block either returns or branches to
/// one or two arbitrary blocks, so loops, self-loops and unreachable blocks
/// all occur.
fn arb_shape() -> impl Strategy<Value = Shape> {
    (1usize..=6).prop_flat_map(|n| {
        let term = prop_oneof![
            1 => Just(None),
            3 => prop::collection::vec(0..n, 1..=2).prop_map(Some),
        ];
        prop::collection::vec(term, n)
    })
}

fn build_cfg(shape: &Shape) -> Function {
    let mut f = Function::new("g");
    let c = f.add_param("c");
    let blocks: Vec<BlockId> = (0..shape.len())
        .map(|i| f.add_block(format!("b{i}")))
        .collect();
    for (i, term) in shape.iter().enumerate() {
        let kind = match term {
            None => InstKind::Ret(None),
            Some(t) if t.len() == 1 => InstKind::Br(blocks[t[0]]),
            Some(t) => InstKind::CondBr {
                cond: c,
                then_bb: blocks[t[0]],
                else_bb: blocks[t[1]],
            },
        };
        f.append(blocks[i], kind);
    }
    f
}

/// Successors including the folded return → entry edge.
fn folded_succs(f: &Function, b: BlockId) -> Vec<BlockId> {
    let mut out = Vec::new();
    if f.is_return(b) {
        out.push(f.entry);
    }
    out.extend(f.successors(b));
    out
}

/// Reference enumeration: every walk from `src` to `dst` that repeats no
/// block (other than closing a cycle at `dst`).
fn brute_force_paths(f: &Function, src: BlockId, dst: BlockId) -> BTreeSet<Vec<BlockId>> {
    fn walk(
        f: &Function,
        dst: BlockId,
        path: &mut Vec<BlockId>,
        out: &mut BTreeSet<Vec<BlockId>>,
    ) {
        let last = *path.last().unwrap();
        for next in folded_succs(f, last) {
            if next == dst {
                let mut done = path.clone();
                done.push(dst);
                out.insert(done);
            } else if !path.contains(&next) {
                path.push(next);
                walk(f, dst, path, out);
                path.pop();
            }
        }
    }
    let mut out = BTreeSet::new();
    walk(f, dst, &mut vec![src], &mut out);
    out
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    })]

    #[test]
    fn simple_paths_match_brute_force(shape in arb_shape(), share in any::<bool>(), pick in any::<prop::sample::Index>()) {
        let f = build_cfg(&shape);
        let dst = BlockId(pick.index(shape.len()) as u32);
        let mut cache = PathCache::new(share);
        for src in f.block_ids() {
            let ids = cache.find_all_simple_paths(&f, src, dst, true, &SkipSet::new());
            let got: Vec<Vec<BlockId>> = ids.iter().map(|&p| cache.extract_path(p)).collect();
            let unique: BTreeSet<Vec<BlockId>> = got.iter().cloned().collect();
            prop_assert_eq!(unique.len(), got.len(), "duplicate paths");
            prop_assert_eq!(&unique, &brute_force_paths(&f, src, dst));
            for path in &got {
                prop_assert_eq!(path.first(), Some(&src));
                prop_assert_eq!(path.last(), Some(&dst));
                let interior: BTreeSet<_> = path[..path.len() - 1].iter().collect();
                prop_assert_eq!(interior.len(), path.len() - 1, "block repeated in {:?}", path);
                for w in path.windows(2) {
                    prop_assert!(folded_succs(&f, w[0]).contains(&w[1]));
                }
            }
        }
    }

    #[test]
    fn trivial_path_without_self_cycle(shape in arb_shape()) {
        let f = build_cfg(&shape);
        let mut cache = PathCache::new(false);
        for b in f.block_ids() {
            let paths = cache.find_all_simple_paths(&f, b, b, false, &SkipSet::new());
            prop_assert_eq!(paths.len(), 1);
            prop_assert_eq!(cache.extract_path(paths[0]), vec![b]);
        }
    }

    #[test]
    fn skipped_blocks_never_appear(shape in arb_shape(), skipped in any::<prop::sample::Index>()) {
        let f = build_cfg(&shape);
        let skip: SkipSet = [BlockId(skipped.index(shape.len()) as u32)].into_iter().collect();
        let mut cache = PathCache::new(false);
        let reachable = cache.find_all_reachable(&f, f.entry, &SkipSet::new());
        for dst in f.block_ids() {
            for p in cache.find_all_simple_paths(&f, f.entry, dst, true, &skip) {
                let path = cache.extract_path(p);
                for b in &path[1..path.len() - 1] {
                    prop_assert!(!skip.contains(b));
                }
                prop_assert!(path.iter().all(|b| reachable.contains(b)));
            }
        }
    }
}

// ── Program generator ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TwoActions {
    /// Per block: `Some(t)` adds `br %c, b{i+1}, b{t}`; the last block returns.
    extra: Vec<Option<usize>>,
    a_block: usize,
    b_block: usize,
    a_load: bool,
    b_load: bool,
    edge: &'static str,
}

/// Two labelled accesses in a random reducible-or-not CFG where every block
/// is reachable (block i always falls through to i+1).
fn arb_two_actions() -> impl Strategy<Value = TwoActions> {
    (2usize..=5).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::option::of(0..n), n),
            0..n,
            0..n,
            any::<bool>(),
            any::<bool>(),
            prop_oneof![Just("xedge"), Just("vedge"), Just("pedge")],
        )
            .prop_map(|(extra, a_block, b_block, a_load, b_load, edge)| TwoActions {
                extra,
                a_block,
                b_block,
                a_load,
                b_load,
                edge,
            })
    })
}

fn region(name: &str, ptr: &str, load: bool) -> String {
    if load {
        format!("  %t{name} = begin {name}\n  %x{name} = load relaxed {ptr}\n  end %t{name}\n")
    } else {
        format!("  %t{name} = begin {name}\n  store relaxed {ptr}, 1\n  end %t{name}\n")
    }
}

impl TwoActions {
    fn source(&self) -> String {
        let n = self.extra.len();
        let mut s = String::from("fn g(%p, %q, %c) {\n");
        for i in 0..n {
            s.push_str(&format!("b{i}:\n"));
            if i == 0 {
                s.push_str(&format!("  {} a -> b\n", self.edge));
            }
            if self.a_block == i {
                s.push_str(&region("a", "%p", self.a_load));
            }
            if self.b_block == i {
                s.push_str(&region("b", "%q", self.b_load));
            }
            match (i + 1 < n, self.extra[i]) {
                (false, _) => s.push_str("  ret\n"),
                (true, None) => s.push_str(&format!("  br b{}\n", i + 1)),
                (true, Some(t)) => s.push_str(&format!("  br %c, b{}, b{t}\n", i + 1)),
            }
        }
        s.push_str("}\n");
        s
    }
}

fn lower_one(source: &str) -> Function {
    let parsed = rmcc::parser::parse(source);
    assert!(parsed.errors.is_empty(), "{:?}\n{source}", parsed.errors);
    let lowered = rmcc::lower::lower_module(&parsed.module.unwrap());
    assert!(lowered.diagnostics.is_empty(), "{:?}", lowered.diagnostics);
    lowered.functions.into_iter().next().unwrap()
}

const TARGETS: [Target; 3] = [Target::Power, Target::ArmV7, Target::ArmV8];

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    })]

    #[test]
    fn plans_verify_on_every_target(prog in arb_two_actions()) {
        let source = prog.source();
        for target in TARGETS {
            for mode in [Mode::Greedy, Mode::Optimal] {
                let mut f = lower_one(&source);
                let config = RealizeConfig { mode, target, ..RealizeConfig::default() };
                let outcome = match Realizer::new(&mut f, config).run() {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        return Err(TestCaseError::fail(format!("{mode:?} {target:?}: {e}\n{source}")));
                    }
                };
                prop_assert!(outcome.cuts.iter().all(|c| target.is_enabled(c.kind)));
                let cert = rmcc::lower::verify_function(&f);
                prop_assert!(cert.all_pass(), "{:?}\n{}", cert.obligations(), f);
            }
        }
    }

    #[test]
    fn greedy_is_idempotent(prog in arb_two_actions()) {
        let mut f = lower_one(&prog.source());
        let graph = ActionGraph::build(&mut f).unwrap();
        for target in TARGETS {
            let ctx = PlanContext { func: &f, graph: &graph, target };
            let mut cuts = CutTable::new();
            let mut cache = PathCache::new(false);
            rmcc::greedy::plan(ctx, &mut cache, &mut cuts);
            let before = cuts.len();
            let again = rmcc::greedy::plan(ctx, &mut cache, &mut cuts);
            prop_assert_eq!(again.inserted, 0);
            prop_assert_eq!(cuts.len(), before);
        }
    }
}
