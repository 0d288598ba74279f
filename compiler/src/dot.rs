// dot.rs — Graphviz DOT output for realized functions
//
// One cluster per function, one box per block listing its instructions.
// Blocks holding a fence are filled; back edges are drawn bold red; the
// implicit return→entry edge the planners reason about is drawn dashed.
//
// Preconditions: functions are well-formed.
// Postconditions: returns a valid DOT string representing the CFGs.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::cfg::Dominators;
use crate::id::BlockId;
use crate::ir::{Function, InstKind};

/// Emit the CFGs of `functions` as a Graphviz DOT string.
pub fn emit_dot(functions: &[Function]) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph rmcc {{").unwrap();
    writeln!(buf, "    node [fontname=\"Courier\", fontsize=10, shape=box];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    for func in functions {
        writeln!(buf).unwrap();
        write_function(&mut buf, func);
    }
    writeln!(buf, "}}").unwrap();
    buf
}

fn write_function(buf: &mut String, func: &Function) {
    let fname = sanitize(&func.name);
    let doms = Dominators::compute(func);
    writeln!(buf, "    subgraph cluster_{fname} {{").unwrap();
    writeln!(buf, "        label=\"fn {}\";", escape(&func.name)).unwrap();
    writeln!(buf, "        style=rounded;").unwrap();
    writeln!(buf, "        color=gray50;").unwrap();

    for b in func.block_ids() {
        writeln!(
            buf,
            "        {} [{}];",
            node_id(&fname, b),
            node_attrs(func, b)
        )
        .unwrap();
    }

    for b in func.block_ids() {
        let targets = branch_labels(func, b);
        for (succ, label) in targets {
            let mut attrs = Vec::new();
            if let Some(label) = label {
                attrs.push(format!("label=\"{label}\""));
            }
            if doms.dominates(succ, b) {
                attrs.push("color=red, penwidth=2".to_string());
            }
            writeln!(
                buf,
                "        {} -> {}{};",
                node_id(&fname, b),
                node_id(&fname, succ),
                if attrs.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", attrs.join(", "))
                }
            )
            .unwrap();
        }
        if func.is_return(b) {
            writeln!(
                buf,
                "        {} -> {} [style=dashed, color=gray60, constraint=false];",
                node_id(&fname, b),
                node_id(&fname, func.entry)
            )
            .unwrap();
        }
    }
    writeln!(buf, "    }}").unwrap();
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Build the DOT node ID: `<function>_bb<id>`.
fn node_id(function: &str, block: BlockId) -> String {
    format!("{function}_bb{}", block.0)
}

/// Successors with `T`/`F` labels for conditional branches.
fn branch_labels(func: &Function, b: BlockId) -> Vec<(BlockId, Option<&'static str>)> {
    match func.terminator(b).map(|t| func.kind(t)) {
        Some(InstKind::CondBr {
            then_bb, else_bb, ..
        }) if then_bb != else_bb => vec![(*then_bb, Some("T")), (*else_bb, Some("F"))],
        _ => func.successors(b).into_iter().map(|s| (s, None)).collect(),
    }
}

/// Return DOT attributes for a block: label lists the instructions,
/// fenced blocks are filled.
fn node_attrs(func: &Function, b: BlockId) -> String {
    let block = func.block(b);
    let mut label = format!("{}:\\l", escape(&block.name));
    for &v in &block.insts {
        write!(label, "  {}\\l", escape(&func.fmt_inst(v))).unwrap();
    }
    let fenced = block
        .insts
        .iter()
        .any(|&v| matches!(func.kind(v), InstKind::Fence(_)));
    if fenced {
        format!("style=filled, fillcolor=lightsalmon, label=\"{label}\"")
    } else {
        format!("label=\"{label}\"")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
