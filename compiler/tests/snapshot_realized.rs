// Snapshot tests: lock realized IR to detect unintended placement changes.
//
// Uses the library API (parse → lower → realize) and snapshots the Display
// output. Snapshots are managed by `insta` and stored under
// `compiler/tests/snapshots/`.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use rmcc::realize::{Mode, RealizeConfig, Realizer};
use rmcc::target::Target;

/// Lower `source` and realize every function; return the printed module.
fn realized(source: &str, config: RealizeConfig) -> String {
    let parsed = rmcc::parser::parse(source);
    assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
    let lowered = rmcc::lower::lower_module(&parsed.module.unwrap());
    assert!(
        lowered.diagnostics.is_empty(),
        "lowering diagnostics: {:?}",
        lowered.diagnostics
    );
    let mut out = String::new();
    for mut func in lowered.functions {
        Realizer::new(&mut func, config)
            .run()
            .unwrap_or_else(|e| panic!("realize failed: {e}"));
        out.push_str(&func.to_string());
    }
    out
}

const SEND: &str = "\
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

const STORE_BUFFERING: &str = "\
fn left(%x, %y) {
entry:
  %w = begin wx
  store relaxed %x, 1
  end %w
  %r = begin ry
  %v = load relaxed %y
  end %r
  pedge wx -> ry
  ret %v
}
";

#[test]
fn snapshot_send_greedy_power() {
    insta::assert_snapshot!(
        "send_greedy_power",
        realized(SEND, RealizeConfig::default())
    );
}

#[test]
fn snapshot_send_optimal_armv8() {
    let config = RealizeConfig {
        mode: Mode::Optimal,
        target: Target::ArmV8,
        ..RealizeConfig::default()
    };
    insta::assert_snapshot!("send_optimal_armv8", realized(SEND, config));
}

#[test]
fn snapshot_store_buffering_greedy_power() {
    insta::assert_snapshot!(
        "store_buffering_greedy_power",
        realized(STORE_BUFFERING, RealizeConfig::default())
    );
}
