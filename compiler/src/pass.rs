// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's semantic passes (parse is outside the runner),
// their dependency edges, and the artifacts they produce. Used by the
// pipeline runner to compute the minimal pass subset for each --emit target.

use std::collections::HashSet;

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a stage met its postconditions.
pub trait StageCert {
    /// True if every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations, in a stable order, for diagnostics.
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass (parse runs before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Lower,
    Realize,
    Verify,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Functions, // Vec<Function>
    LowerCert, // LowerCert per function
    Realized,  // Vec<Function>, rewritten in place
    Cuts,      // FunctionReport per function
    Verified,  // LowerCert of the realized IR
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Lower => PassDescriptor {
            name: "lower",
            inputs: &[],
            outputs: &[ArtifactId::Functions, ArtifactId::LowerCert],
            invalidation_key: "source",
            invariants: "S1-S3 obligations verified, names resolved",
        },
        PassId::Realize => PassDescriptor {
            name: "realize",
            inputs: &[PassId::Lower],
            outputs: &[ArtifactId::Realized, ArtifactId::Cuts],
            invalidation_key: "functions + mode + target + solver + search",
            invariants: "P1-P2 obligations verified, markers removed",
        },
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[PassId::Realize],
            outputs: &[ArtifactId::Verified],
            invalidation_key: "realized functions",
            invariants: "realized IR still satisfies S1-S3",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 3] = [PassId::Lower, PassId::Realize, PassId::Verify];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_is_minimal() {
        assert_eq!(required_passes(PassId::Lower), vec![PassId::Lower]);
    }

    #[test]
    fn verify_needs_everything() {
        assert_eq!(
            required_passes(PassId::Verify),
            vec![PassId::Lower, PassId::Realize, PassId::Verify]
        );
    }

    #[test]
    fn no_parse_in_pass_id() {
        for pass in &ALL_PASSES {
            assert_ne!(descriptor(*pass).name, "parse");
        }
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            assert!(
                !descriptor(*pass).outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let order = required_passes(*pass);
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                let self_pos = order.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }

    struct Fixed(bool, bool);

    impl StageCert for Fixed {
        fn all_pass(&self) -> bool {
            self.0 && self.1
        }

        fn obligations(&self) -> Vec<(&'static str, bool)> {
            vec![("A", self.0), ("B", self.1)]
        }
    }

    #[test]
    fn cert_reports_failed_obligations() {
        let cert = Fixed(true, false);
        assert!(!cert.all_pass());
        let failed: Vec<_> = cert
            .obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(n, _)| n)
            .collect();
        assert_eq!(failed, vec!["B"]);
    }
}
