// Integration tests for the rmcc binary.
//
// These tests lock the command-line contract:
// - `--emit` selects the output and the minimal pass set
// - exit code 1 for compile errors, 2 for I/O errors
// - diagnostics go to stderr prefixed with `rmcc:`

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn rmcc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rmcc"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

fn run(args: &[&str], source: &Path) -> Output {
    Command::new(rmcc_binary())
        .args(args)
        .arg(source)
        .output()
        .expect("failed to run rmcc")
}

/// Write `source` to a fresh file under the system temp dir.
fn temp_source(tag: &str, source: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("rmcc_cli_{}_{}.rir", tag, std::process::id()));
    std::fs::write(&path, source).expect("failed to write temp source");
    path
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ── Output selection ────────────────────────────────────────────────────────

#[test]
fn realized_output_has_fences_and_no_markers() {
    let output = run(&[], &demo("message_passing.rir"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("fn send(%data, %flag) {"), "{text}");
    assert!(text.contains("fence lwsync"), "{text}");
    assert!(!text.contains("begin "), "{text}");
    assert!(!text.contains("vedge"), "{text}");
}

#[test]
fn emit_ir_keeps_markers() {
    let output = run(&["--emit", "ir"], &demo("message_passing.rir"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("begin write"), "{text}");
    assert!(text.contains("vedge write -> flag"), "{text}");
    assert!(!text.contains("fence"), "{text}");
}

#[test]
fn realized_output_parses_again() {
    let output = run(&["--target", "armv7"], &demo("message_passing.rir"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let parsed = rmcc::parser::parse(&stdout(&output));
    assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
    assert_eq!(parsed.module.unwrap().functions.len(), 2);
}

#[test]
fn emit_cuts_is_json() {
    let output = run(&["--emit", "cuts"], &demo("message_passing.rir"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["provenance"]["config"]["mode"], "greedy");
    let functions = report["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0]["function"], "send");
    assert_eq!(functions[0]["cuts"][0]["kind"], "lwsync");
    assert_eq!(functions[0]["changed"], true);
}

#[test]
fn emit_build_info_skips_compilation() {
    // Build info only hashes the source; unknown actions are not reported.
    let path = temp_source("buildinfo", "fn f() {\ne:\n  xedge a -> b\n  ret\n}\n");
    let output = run(&["--emit", "build-info", "--mode", "optimal"], &path);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let info: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(info["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(info["config"]["mode"], "optimal");
    assert_eq!(info["compiler_version"], env!("CARGO_PKG_VERSION"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn emit_dot_is_a_digraph() {
    let output = run(&["--emit", "dot"], &demo("spinlock.rir"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("digraph rmcc {"));
    assert!(text.contains("subgraph cluster_lock {"));
    assert!(text.contains("subgraph cluster_unlock {"));
}

#[test]
fn output_flag_writes_file() {
    let out = std::env::temp_dir().join(format!("rmcc_cli_out_{}.rir", std::process::id()));
    let output = Command::new(rmcc_binary())
        .arg("-o")
        .arg(&out)
        .arg(demo("store_buffering.rir"))
        .output()
        .expect("failed to run rmcc");
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty());
    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.contains("fence sync"), "{written}");
    let _ = std::fs::remove_file(out);
}

#[test]
fn every_demo_compiles_in_every_configuration() {
    let demos = ["message_passing.rir", "rcu_reader.rir", "spinlock.rir", "store_buffering.rir"];
    for name in demos {
        for mode in ["greedy", "optimal"] {
            for target in ["power", "armv7", "armv8"] {
                let output = run(&["--mode", mode, "--target", target], &demo(name));
                assert!(
                    output.status.success(),
                    "{name} --mode {mode} --target {target} failed.\nstderr: {}",
                    stderr(&output)
                );
            }
        }
    }
}

#[test]
fn verbose_prints_pass_timings() {
    let output = run(&["--verbose"], &demo("rcu_reader.rir"));
    assert!(output.status.success());
    let err = stderr(&output);
    assert!(err.contains("rmcc: lower complete"), "{err}");
    assert!(err.contains("rmcc: realize complete"), "{err}");
    assert!(err.contains("rmcc: verify complete"), "{err}");
}

// ── Exit codes ──────────────────────────────────────────────────────────────

#[test]
fn missing_input_exits_with_2() {
    let output = run(&[], Path::new("/nonexistent/input.rir"));
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).starts_with("rmcc: error:"));
}

#[test]
fn syntax_error_exits_with_1() {
    let path = temp_source("syntax", "fn f( {\n");
    let output = run(&[], &path);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error[E0001]"), "{}", stderr(&output));
    let _ = std::fs::remove_file(path);
}

#[test]
fn unknown_action_exits_with_1() {
    let path = temp_source("unknown", "fn f() {\ne:\n  xedge nope -> post\n  ret\n}\n");
    let output = run(&[], &path);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error[E0200]"), "{err}");
    assert!(err.contains("in function `f`"), "{err}");
    assert!(output.stdout.is_empty());
    let _ = std::fs::remove_file(path);
}

#[test]
fn lowering_error_stops_before_realization() {
    let path = temp_source("lowering", "fn f() {\ne:\n  br nowhere\n}\n");
    let output = run(&["--verbose"], &path);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error[E0101]"), "{err}");
    assert!(!err.contains("realize complete"), "{err}");
    let _ = std::fs::remove_file(path);
}

#[test]
fn unclosed_region_is_an_error_not_a_crash() {
    let path = temp_source(
        "unclosed",
        "fn f(%p) {\ne:\n  %t = begin w\n  store relaxed %p, 1\n  vedge w -> w\n  ret\n}\n",
    );
    let output = run(&["--mode", "optimal"], &path);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("error[E0109]"), "{err}");
    assert!(!err.contains("panicked"), "{err}");
    let _ = std::fs::remove_file(path);
}

#[cfg(not(feature = "z3"))]
#[test]
fn z3_without_feature_is_reported() {
    let output = run(
        &["--mode", "optimal", "--solver", "z3"],
        &demo("message_passing.rir"),
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error[E0301]"), "{}", stderr(&output));
}
