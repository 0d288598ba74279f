// realize.rs — Per-function realization driver
//
// Builds the action graph, plans cuts (greedy or optimal), verifies the
// plan against every path of every planned edge, emits it, and strips the
// region and edge markers.
//
// Preconditions: `func` is well-formed (lower::verify_function passes).
// Postconditions: on success every planned edge is ordered on every path
//   and no marker instruction remains.
// Failure modes: unknown/duplicate action names, solver failure, or a plan
//   that fails verification. `func` may be partially rewritten (regions
//   split) when an error is returned.
// Side effects: mutates `func`.

use crate::action::ActionGraph;
use crate::cfg::{Dominators, LoopInfo};
use crate::classify::{classify_with_self_edge, CutStrength, PlanContext};
use crate::cut::{Cut, CutTable};
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::emit::{emit_cuts, EmitStats};
use crate::frequency::compute_capacities;
use crate::ir::Function;
use crate::pass::StageCert;
use crate::path_cache::PathCache;
use crate::smt::{make_backend, BackendKind, Search, SolverError};
use crate::target::Target;

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Greedy,
    Optimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct RealizeConfig {
    pub mode: Mode,
    pub target: Target,
    pub backend: BackendKind,
    pub search: Search,
    /// Share path suffixes across enumerations. Off by default: the
    /// optimizer keys data-dependency variables by path.
    pub share_suffixes: bool,
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealizeError {
    #[error("edge in `{function}` names unknown action `{label}`")]
    UnknownAction { function: String, label: String },
    #[error("action `{label}` is defined twice in `{function}`")]
    DuplicateAction { function: String, label: String },
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("cut plan for `{function}` failed verification: {failed}")]
    VerificationFailed { function: String, failed: String },
}

impl RealizeError {
    pub fn code(&self) -> DiagCode {
        match self {
            RealizeError::UnknownAction { .. } => codes::E0200,
            RealizeError::DuplicateAction { .. } => codes::E0201,
            RealizeError::Solver(SolverError::Unavailable(_)) => codes::E0301,
            RealizeError::Solver(_) => codes::E0300,
            RealizeError::VerificationFailed { .. } => codes::E0400,
        }
    }

    pub fn to_diagnostic(&self, function: &str) -> Diagnostic {
        Diagnostic::error(self.to_string())
            .with_code(self.code())
            .in_function(function)
    }
}

// ── Verification ────────────────────────────────────────────────────────

/// Evidence that a cut plan orders every planned edge.
#[derive(Debug, Clone)]
pub struct PlanCert {
    /// P1: No path of a planned edge classifies as NoCut or needs more cuts.
    pub p1_every_path_cut: bool,
    /// P2: Every cut is of a kind the target supports.
    pub p2_kinds_enabled: bool,
}

impl StageCert for PlanCert {
    fn all_pass(&self) -> bool {
        self.p1_every_path_cut && self.p2_kinds_enabled
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("P1_every_path_cut", self.p1_every_path_cut),
            ("P2_kinds_enabled", self.p2_kinds_enabled),
        ]
    }
}

/// Re-classify every planned edge against `cuts`.
pub fn verify_plan(ctx: PlanContext<'_>, cache: &mut PathCache, cuts: &CutTable) -> PlanCert {
    let mut p1 = true;
    for edge in ctx.graph.planned_edges() {
        let verdict = classify_with_self_edge(ctx, cache, cuts, &edge);
        if verdict.strength == CutStrength::NoCut || !verdict.enforce.is_empty() {
            tracing::warn!(
                function = %ctx.func.name,
                src = %ctx.graph.action(edge.src).name,
                dst = %ctx.graph.action(edge.dst).name,
                kind = edge.kind.keyword(),
                strength = ?verdict.strength,
                "edge left unordered"
            );
            p1 = false;
        }
    }
    PlanCert {
        p1_every_path_cut: p1,
        p2_kinds_enabled: cuts.cuts().iter().all(|c| ctx.target.is_enabled(c.kind)),
    }
}

// ── Driver ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct RealizeOutcome {
    pub changed: bool,
    pub cuts: Vec<Cut>,
    /// Solver cost in optimal mode; Σ unit cost of the cuts in greedy mode.
    pub cost: u64,
    pub edges: usize,
    pub stats: EmitStats,
    pub warnings: Vec<Diagnostic>,
}

pub struct Realizer<'f> {
    func: &'f mut Function,
    config: RealizeConfig,
}

impl<'f> Realizer<'f> {
    pub fn new(func: &'f mut Function, config: RealizeConfig) -> Self {
        Realizer { func, config }
    }

    pub fn run(self) -> Result<RealizeOutcome, RealizeError> {
        let Realizer { func, config } = self;
        let graph = ActionGraph::build(func)?;
        let mut warnings = graph.warnings.clone();
        let mut cache = PathCache::new(config.share_suffixes);
        let mut cuts = CutTable::new();

        let ctx = PlanContext {
            func: &*func,
            graph: &graph,
            target: config.target,
        };
        let edges = graph.planned_edges().len();
        let cost = match config.mode {
            Mode::Greedy => {
                crate::greedy::plan(ctx, &mut cache, &mut cuts);
                cuts.cuts()
                    .iter()
                    .filter_map(|c| config.target.cost(c.kind))
                    .sum()
            }
            Mode::Optimal => {
                let mut backend = make_backend(config.backend)?;
                let doms = Dominators::compute(ctx.func);
                let loops = LoopInfo::compute(ctx.func, &doms);
                let (caps, fallback) = compute_capacities(ctx.func, &loops, backend.as_mut())?;
                warnings.extend(fallback);
                let plan = crate::optimal::plan(
                    ctx,
                    &mut cache,
                    &caps,
                    backend.as_mut(),
                    config.search,
                )?;
                for cut in plan.cuts {
                    cuts.insert(cut);
                }
                plan.cost
            }
        };

        let cert = verify_plan(ctx, &mut cache, &cuts);
        if !cert.all_pass() {
            let failed: Vec<&str> = cert
                .obligations()
                .into_iter()
                .filter(|(_, ok)| !ok)
                .map(|(name, _)| name)
                .collect();
            return Err(RealizeError::VerificationFailed {
                function: func.name.clone(),
                failed: failed.join(", "),
            });
        }

        let cuts = cuts.into_cuts();
        let stats = emit_cuts(func, &cuts);
        graph.remove_markers(func);
        tracing::debug!(
            function = %func.name,
            mode = ?config.mode,
            target = config.target.name(),
            cuts = cuts.len(),
            cost,
            "realized"
        );
        Ok(RealizeOutcome {
            changed: stats.changed() || !graph.markers.is_empty(),
            cuts,
            cost,
            edges,
            stats,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FenceKind, InstKind};

    fn lower(source: &str) -> Function {
        let parsed = crate::parser::parse(source);
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let lowered = crate::lower::lower_module(&parsed.module.unwrap());
        assert!(lowered.diagnostics.is_empty(), "{:?}", lowered.diagnostics);
        lowered.functions.into_iter().next().unwrap()
    }

    fn fences(func: &Function) -> Vec<FenceKind> {
        func.blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .filter_map(|&v| match func.kind(v) {
                InstKind::Fence(k) => Some(*k),
                _ => None,
            })
            .collect()
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
    fn greedy_inserts_fence_and_strips_markers() {
        let mut f = lower(MP_SEND);
        let out = Realizer::new(&mut f, RealizeConfig::default()).run().unwrap();
        assert!(out.changed);
        assert_eq!(fences(&f), vec![FenceKind::Lwsync]);
        assert!(f
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .all(|&v| !f.kind(v).is_marker()));
        assert!(crate::lower::verify_function(&f).all_pass());
    }

    #[test]
    fn optimal_matches_greedy_on_straight_line() {
        let mut f = lower(MP_SEND);
        let config = RealizeConfig {
            mode: Mode::Optimal,
            ..RealizeConfig::default()
        };
        let out = Realizer::new(&mut f, config).run().unwrap();
        assert_eq!(fences(&f), vec![FenceKind::Lwsync]);
        assert_eq!(out.cost, 501);
    }

    #[test]
    fn no_edges_means_only_markers_change() {
        let mut f = lower("fn f(%p) {\ne:\n  %a = begin a\n  store relaxed %p, 1\n  end %a\n  ret\n}");
        let out = Realizer::new(&mut f, RealizeConfig::default()).run().unwrap();
        assert!(out.cuts.is_empty());
        assert!(out.changed);
        assert_eq!(out.warnings.len(), 1);

        let mut plain = lower("fn g() {\ne:\n  ret\n}");
        let out = Realizer::new(&mut plain, RealizeConfig::default()).run().unwrap();
        assert!(!out.changed);
    }

    #[test]
    fn unknown_action_is_reported() {
        let mut f = lower("fn f() {\ne:\n  xedge a -> b\n  ret\n}");
        let err = Realizer::new(&mut f, RealizeConfig::default()).run().unwrap_err();
        assert_eq!(err.code(), codes::E0200);
        let diag = err.to_diagnostic("f");
        assert!(diag.message.contains("unknown action `a`"), "{}", diag.message);
    }

    #[cfg(not(feature = "z3"))]
    #[test]
    fn missing_backend_is_an_error() {
        let mut f = lower(MP_SEND);
        let config = RealizeConfig {
            mode: Mode::Optimal,
            backend: BackendKind::Z3,
            ..RealizeConfig::default()
        };
        let err = Realizer::new(&mut f, config).run().unwrap_err();
        assert_eq!(err.code(), codes::E0301);
    }

    #[test]
    fn verification_rejects_missing_cut() {
        let mut f = lower(MP_SEND);
        let graph = ActionGraph::build(&mut f).unwrap();
        let ctx = PlanContext {
            func: &f,
            graph: &graph,
            target: Target::Power,
        };
        let mut cache = PathCache::new(false);
        let cert = verify_plan(ctx, &mut cache, &CutTable::new());
        assert!(!cert.p1_every_path_cut);
        assert!(cert.p2_kinds_enabled);
    }
}
