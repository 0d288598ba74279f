// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId. Realization runs one rayon worker per function; functions
// share nothing, so results are collected in source order.
//
// Preconditions: the module was parsed without errors.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::ast::Module;
use crate::diag::{codes, Diagnostic};
use crate::ir::Function;
use crate::lower::LowerCert;
use crate::parser::ParseResult;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::realize::{RealizeConfig, Realizer};
use crate::report::{CutReport, FunctionReport, Provenance};

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
#[derive(Debug)]
pub struct CompilationState {
    pub module: Module,
    pub config: RealizeConfig,
    pub functions: Vec<Function>,
    pub lower_certs: Vec<LowerCert>,
    pub reports: Vec<FunctionReport>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Provenance,
}

impl CompilationState {
    pub fn new(source: &str, module: Module, config: RealizeConfig) -> Self {
        Self {
            module,
            config,
            functions: Vec::new(),
            lower_certs: Vec::new(),
            reports: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: Provenance::compute(source, config),
        }
    }

    pub fn cut_report(&self) -> CutReport {
        CutReport {
            provenance: self.provenance.clone(),
            functions: self.reports.clone(),
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = crate::diag::has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "rmcc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Error diagnostic naming the failed obligations of `cert`.
fn cert_failure(cert: &impl StageCert, what: &str, function: &str) -> Option<Diagnostic> {
    if cert.all_pass() {
        return None;
    }
    let failed: Vec<_> = cert
        .obligations()
        .into_iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| name)
        .collect();
    Some(
        Diagnostic::error(format!("{what} verification failed: {}", failed.join(", ")))
            .in_function(function),
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::Lower => run_lower(state),
            PassId::Realize => run_realize(state),
            PassId::Verify => run_verify(state),
        };
        finish_pass(
            state,
            pass_id,
            diags,
            t.elapsed(),
            verbose,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}

fn run_lower(state: &mut CompilationState) -> Vec<Diagnostic> {
    let result = crate::lower::lower_module(&state.module);
    let mut diags = result.diagnostics;
    state.lower_certs = result
        .functions
        .iter()
        .map(crate::lower::verify_function)
        .collect();
    for (func, cert) in result.functions.iter().zip(&state.lower_certs) {
        if let Some(d) = cert_failure(cert, "lowered IR", &func.name) {
            diags.push(d.with_code(codes::E0108));
        }
    }
    state.functions = result.functions;
    diags
}

fn run_realize(state: &mut CompilationState) -> Vec<Diagnostic> {
    let config = state.config;
    let results: Vec<Result<(FunctionReport, Vec<Diagnostic>), Diagnostic>> = state
        .functions
        .par_iter_mut()
        .map(|func| {
            let name = func.name.clone();
            let _span = tracing::debug_span!("realize", function = %name).entered();
            match Realizer::new(func, config).run() {
                Ok(outcome) => {
                    let report = FunctionReport::new(func, &outcome);
                    Ok((report, outcome.warnings))
                }
                Err(e) => Err(e.to_diagnostic(&name)),
            }
        })
        .collect();

    let mut diags = Vec::new();
    state.reports.clear();
    for result in results {
        match result {
            Ok((report, warnings)) => {
                state.reports.push(report);
                diags.extend(warnings);
            }
            Err(d) => diags.push(d),
        }
    }
    diags
}

fn run_verify(state: &mut CompilationState) -> Vec<Diagnostic> {
    state
        .functions
        .iter()
        .filter_map(|func| {
            cert_failure(&crate::lower::verify_function(func), "realized IR", &func.name)
                .map(|d| d.with_code(codes::E0401))
        })
        .collect()
}

// ── Convenience entry point ────────────────────────────────────────────────

/// Syntax errors as diagnostics.
pub fn parse_diagnostics(parsed: &ParseResult) -> Vec<Diagnostic> {
    parsed
        .errors
        .iter()
        .map(|e| {
            Diagnostic::error(e.to_string())
                .with_code(codes::E0001)
                .with_span(*e.span())
        })
        .collect()
}

/// Parse, lower, realize and verify a whole module.
pub fn compile_module(
    source: &str,
    config: RealizeConfig,
) -> Result<CompilationState, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    let mut diags = parse_diagnostics(&parsed);
    let Some(module) = parsed.module.filter(|_| diags.is_empty()) else {
        if diags.is_empty() {
            diags.push(Diagnostic::error("parse failed with no output").with_code(codes::E0001));
        }
        return Err(diags);
    };
    let mut state = CompilationState::new(source, module, config);
    match run_pipeline(&mut state, PassId::Verify, false, |_, _| {}) {
        Ok(()) => Ok(state),
        Err(_) => Err(state.diagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realize::Mode;

    const TWO: &str = "\
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
fn idle() {
e:
  ret
}
";

    #[test]
    fn reports_follow_source_order() {
        let state = compile_module(TWO, RealizeConfig::default()).unwrap();
        let names: Vec<_> = state.reports.iter().map(|r| r.function.as_str()).collect();
        assert_eq!(names, vec!["send", "idle"]);
        assert_eq!(state.reports[0].cuts.len(), 1);
        assert!(!state.reports[1].changed);
        assert!(!state.has_error);
    }

    #[test]
    fn lower_only_skips_realization() {
        let parsed = crate::parser::parse(TWO);
        let mut state =
            CompilationState::new(TWO, parsed.module.unwrap(), RealizeConfig::default());
        let mut seen = Vec::new();
        run_pipeline(&mut state, PassId::Lower, false, |p, _| seen.push(p)).unwrap();
        assert_eq!(seen, vec![PassId::Lower]);
        assert!(state.reports.is_empty());
        assert_eq!(state.functions.len(), 2);
    }

    #[test]
    fn realization_errors_stop_the_pipeline() {
        let source = "fn f() {\ne:\n  xedge nope -> post\n  ret\n}";
        let diags = compile_module(source, RealizeConfig::default()).unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, Some(codes::E0200));
        assert_eq!(diags[0].function.as_deref(), Some("f"));
    }

    #[test]
    fn syntax_errors_are_diagnostics() {
        let diags = compile_module("fn f( {", RealizeConfig::default()).unwrap_err();
        assert!(!diags.is_empty());
        assert!(diags.iter().all(|d| d.code == Some(codes::E0001)));
    }

    #[test]
    fn optimal_mode_runs_per_function() {
        let config = RealizeConfig {
            mode: Mode::Optimal,
            ..RealizeConfig::default()
        };
        let state = compile_module(TWO, config).unwrap();
        assert_eq!(state.reports[0].cost, 501);
    }
}
