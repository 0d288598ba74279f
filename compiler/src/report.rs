// report.rs — Cut reports and build provenance
//
// `--emit cuts` prints one JSON document per module: the provenance of the
// run, then per function the planned cuts named by block and value names
// so the report reads against the realized IR.
//
// Preconditions: reports are built from the function the cuts were
//   emitted into (names resolve against it).
// Postconditions: output is deterministic for a given source and config.
// Failure modes: none.
// Side effects: none.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cut::{Cut, CutKind, CutSite};
use crate::emit::EmitStats;
use crate::ir::Function;
use crate::realize::{RealizeConfig, RealizeOutcome};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for reproducible runs.
///
/// `source_hash`: SHA-256 of the raw `.rir` source text.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub source_hash: String,
    pub compiler_version: &'static str,
    pub config: RealizeConfig,
}

impl Provenance {
    pub fn compute(source: &str, config: RealizeConfig) -> Provenance {
        let digest = Sha256::digest(source.as_bytes());
        Provenance {
            source_hash: hex(&digest),
            compiler_version: env!("CARGO_PKG_VERSION"),
            config,
        }
    }

    /// Pretty JSON for `--emit build-info`.
    pub fn to_json(&self) -> String {
        to_pretty_json(self)
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    // Only derived impls over strings and integers; cannot fail.
    let mut out = serde_json::to_string_pretty(value).unwrap_or_default();
    out.push('\n');
    out
}

// ── Cut records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutRecord {
    pub kind: CutKind,
    pub site: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dep: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trail: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl CutRecord {
    pub fn new(func: &Function, cut: &Cut) -> CutRecord {
        let block = |b| func.block(b).name.clone();
        let site = match cut.site {
            CutSite::Front(b) => format!("front({})", block(b)),
            CutSite::Back(b) => format!("back({})", block(b)),
            CutSite::Edge(a, b) => format!("edge({} -> {})", block(a), block(b)),
            CutSite::Accesses(b) => format!("accesses({})", block(b)),
        };
        CutRecord {
            kind: cut.kind,
            site,
            dep: cut.dep.map(|v| format!("%{}", func.value_name(v))),
            trail: cut
                .trail
                .iter()
                .map(|&v| format!("%{}", func.value_name(v)))
                .collect(),
            path: cut.path.iter().map(|&b| block(b)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionReport {
    pub function: String,
    pub changed: bool,
    pub edges: usize,
    pub cost: u64,
    pub cuts: Vec<CutRecord>,
    pub emitted: EmitStats,
}

impl FunctionReport {
    pub fn new(func: &Function, outcome: &RealizeOutcome) -> FunctionReport {
        FunctionReport {
            function: func.name.clone(),
            changed: outcome.changed,
            edges: outcome.edges,
            cost: outcome.cost,
            cuts: outcome.cuts.iter().map(|c| CutRecord::new(func, c)).collect(),
            emitted: outcome.stats,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CutReport {
    pub provenance: Provenance,
    pub functions: Vec<FunctionReport>,
}

impl CutReport {
    pub fn to_json(&self) -> String {
        to_pretty_json(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realize::Realizer;

    #[test]
    fn source_hash_is_sha256() {
        let p = Provenance::compute("", RealizeConfig::default());
        assert_eq!(
            p.source_hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(p.compiler_version, env!("CARGO_PKG_VERSION"));
        let json = p.to_json();
        assert!(json.contains("\"mode\": \"greedy\""), "{json}");
        assert!(json.contains("\"target\": \"power\""), "{json}");
    }

    #[test]
    fn cut_records_use_names() {
        let source = "\
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
        let parsed = crate::parser::parse(source);
        let lowered = crate::lower::lower_module(&parsed.module.unwrap());
        let mut func = lowered.functions.into_iter().next().unwrap();
        let outcome = Realizer::new(&mut func, RealizeConfig::default())
            .run()
            .unwrap();
        let report = FunctionReport::new(&func, &outcome);
        assert_eq!(report.cuts.len(), 1);
        assert_eq!(report.cuts[0].kind, CutKind::Lwsync);
        assert!(report.cuts[0].site.starts_with("front("));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["cuts"][0]["kind"], "lwsync");
        assert!(json["cuts"][0].get("dep").is_none());
    }
}
