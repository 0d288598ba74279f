// lower.rs — AST to IR lowering and structural verification
//
// Resolves block labels and `%` names, materializes integer immediates as
// constants, and builds one `ir::Function` per `fn`. Then checks the IR
// well-formedness obligations S1-S3, which realization relies on and which
// `verify` re-checks after barriers are emitted.
//
// Preconditions: module parsed without errors.
// Postconditions: every returned function passes S1-S3; functions with
//   lowering errors are dropped and their errors reported.
// Failure modes: unknown or duplicate names, misplaced or missing
//   terminators, and `end` on a non-region value produce diagnostics.
// Side effects: none.

use std::collections::{HashMap, HashSet};

use crate::ast::{self, FnDef, Op, Operand};
use crate::diag::{codes, Diagnostic};
use crate::id::{BlockId, ValueId};
use crate::ir::{Function, InstKind};

// ── Output types ────────────────────────────────────────────────────────────

/// Result of lowering a module.
pub struct LowerResult {
    pub functions: Vec<Function>,
    pub diagnostics: Vec<Diagnostic>,
}

impl LowerResult {
    pub fn has_errors(&self) -> bool {
        crate::diag::has_errors(&self.diagnostics)
    }
}

/// Machine-checkable evidence for the IR well-formedness obligations.
#[derive(Debug, Clone)]
pub struct LowerCert {
    /// S1: Every block ends in exactly one terminator.
    pub s1_blocks_terminated: bool,
    /// S2: Every operand is a parameter, a constant, or a placed instruction.
    pub s2_operands_defined: bool,
    /// S3: Every phi lists exactly the block's predecessors.
    pub s3_phis_match_predecessors: bool,
}

impl crate::pass::StageCert for LowerCert {
    fn all_pass(&self) -> bool {
        self.s1_blocks_terminated && self.s2_operands_defined && self.s3_phis_match_predecessors
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("S1_blocks_terminated", self.s1_blocks_terminated),
            ("S2_operands_defined", self.s2_operands_defined),
            ("S3_phis_match_predecessors", self.s3_phis_match_predecessors),
        ]
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Lower every function of a parsed module.
pub fn lower_module(module: &ast::Module) -> LowerResult {
    let mut functions = Vec::new();
    let mut diagnostics = Vec::new();
    let mut seen = HashSet::new();

    for def in &module.functions {
        if !seen.insert(def.name.name.as_str()) {
            diagnostics.push(
                Diagnostic::error(format!("duplicate function `{}`", def.name.name))
                    .with_code(codes::E0106)
                    .with_span(def.name.span),
            );
            continue;
        }
        let mut lowerer = FnLowerer::new(def);
        lowerer.run();
        if lowerer.diagnostics.is_empty() {
            functions.push(lowerer.func);
        } else {
            diagnostics.extend(lowerer.diagnostics);
        }
    }

    LowerResult {
        functions,
        diagnostics,
    }
}

/// Check S1-S3 on a function.
pub fn verify_function(func: &Function) -> LowerCert {
    LowerCert {
        s1_blocks_terminated: verify_s1_blocks_terminated(func),
        s2_operands_defined: verify_s2_operands_defined(func),
        s3_phis_match_predecessors: verify_s3_phis_match_predecessors(func),
    }
}

fn verify_s1_blocks_terminated(func: &Function) -> bool {
    func.blocks.iter().all(|block| {
        let terminators = block
            .insts
            .iter()
            .filter(|&&v| func.kind(v).is_terminator())
            .count();
        terminators == 1 && block.insts.last().is_some_and(|&v| func.kind(v).is_terminator())
    })
}

fn verify_s2_operands_defined(func: &Function) -> bool {
    func.blocks.iter().flat_map(|b| b.insts.iter()).all(|&inst| {
        func.kind(inst).operands().into_iter().all(|op| {
            matches!(func.kind(op), InstKind::Param(_) | InstKind::Const(_))
                || func.block_of(op).is_some()
        })
    })
}

fn verify_s3_phis_match_predecessors(func: &Function) -> bool {
    func.block_ids().all(|b| {
        let mut preds = func.predecessors(b);
        preds.sort();
        func.block(b).insts.iter().all(|&v| match func.kind(v) {
            InstKind::Phi(incoming) => {
                let mut listed: Vec<BlockId> = incoming.iter().map(|(_, p)| *p).collect();
                listed.sort();
                listed.dedup();
                listed == preds
            }
            _ => true,
        })
    })
}

// ── Per-function lowering ───────────────────────────────────────────────────

struct FnLowerer<'a> {
    def: &'a FnDef,
    func: Function,
    blocks: HashMap<&'a str, BlockId>,
    values: HashMap<&'a str, ValueId>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> FnLowerer<'a> {
    fn new(def: &'a FnDef) -> Self {
        FnLowerer {
            def,
            func: Function::new(def.name.name.clone()),
            blocks: HashMap::new(),
            values: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, diag: Diagnostic) {
        self.diagnostics
            .push(diag.in_function(self.def.name.name.clone()));
    }

    fn run(&mut self) {
        self.declare_names();
        let def = self.def;
        for block in &def.blocks {
            self.lower_block(block);
        }
        if self.diagnostics.is_empty() {
            self.check_regions();
        }
    }

    /// Every `begin` is closed by exactly one `end`.
    fn check_regions(&mut self) {
        let def = self.def;
        for inst in def.blocks.iter().flat_map(|b| b.insts.iter()) {
            if !matches!(inst.op, Op::Begin { .. }) {
                continue;
            }
            let ends = match &inst.result {
                Some(token) => {
                    let v = self.values[token.name.as_str()];
                    self.func
                        .uses(v)
                        .into_iter()
                        .filter(|u| matches!(self.func.kind(u.inst), InstKind::End(_)))
                        .count()
                }
                None => 0,
            };
            if ends != 1 {
                let name = inst.result.as_ref().map_or("_", |r| r.name.as_str());
                self.error(
                    Diagnostic::error(format!("region `%{name}` has {ends} `end`s, expected 1"))
                        .with_code(codes::E0109)
                        .with_span(inst.span)
                        .with_hint("name the region `%t = begin ...` and close it once with `end %t`"),
                );
            }
        }
    }

    /// Allocate ids for every block, parameter and named result up front so
    /// that forward references (phis, `take`) resolve.
    fn declare_names(&mut self) {
        let def = self.def;
        for param in &def.params {
            if self.values.contains_key(param.name.as_str()) {
                self.error(duplicate_value(param));
                continue;
            }
            let v = self.func.add_param(param.name.clone());
            self.values.insert(&param.name, v);
        }

        for block in &def.blocks {
            if self.blocks.contains_key(block.label.name.as_str()) {
                self.error(
                    Diagnostic::error(format!("duplicate block label `{}`", block.label.name))
                        .with_code(codes::E0103)
                        .with_span(block.label.span),
                );
                continue;
            }
            let b = self.func.add_block(block.label.name.clone());
            self.blocks.insert(&block.label.name, b);
        }

        for inst in def.blocks.iter().flat_map(|b| b.insts.iter()) {
            let Some(result) = &inst.result else { continue };
            if self.values.contains_key(result.name.as_str()) {
                self.error(duplicate_value(result));
                continue;
            }
            // Placeholder kind; overwritten when the instruction is lowered.
            let v = self
                .func
                .add_value(Some(result.name.clone()), InstKind::Const(0));
            self.values.insert(&result.name, v);
        }
    }

    fn lower_block(&mut self, block: &'a ast::BlockDef) {
        let Some(&b) = self.blocks.get(block.label.name.as_str()) else {
            return;
        };
        if !self.func.block(b).insts.is_empty() {
            // Duplicate label already reported; its body is not lowered.
            return;
        }

        for (i, inst) in block.insts.iter().enumerate() {
            let is_last = i + 1 == block.insts.len();
            if inst.op.is_terminator() && !is_last {
                self.error(
                    Diagnostic::error("terminator in the middle of a block")
                        .with_code(codes::E0105)
                        .with_span(inst.span)
                        .with_hint("split the block with a label after the terminator"),
                );
                continue;
            }
            let Some(kind) = self.lower_op(&inst.op) else {
                continue;
            };
            match &inst.result {
                Some(result) => {
                    let v = self.values[result.name.as_str()];
                    if self.func.block_of(v).is_some() || self.func.params.contains(&v) {
                        // Duplicate definition, already reported.
                        continue;
                    }
                    self.func.values[v.index()].kind = kind;
                    self.func.place(b, v);
                }
                None => {
                    self.func.append(b, kind);
                }
            }
        }

        if !block.insts.last().is_some_and(|i| i.op.is_terminator()) {
            self.error(
                Diagnostic::error(format!(
                    "block `{}` does not end in a terminator",
                    block.label.name
                ))
                .with_code(codes::E0104)
                .with_span(block.span)
                .with_hint("end the block with `br` or `ret`"),
            );
        }
    }

    fn value(&mut self, operand: &Operand) -> Option<ValueId> {
        match operand {
            Operand::Int(v, _) => Some(self.func.add_const(*v)),
            Operand::Local(id) => self.local(id),
        }
    }

    fn local(&mut self, id: &ast::Ident) -> Option<ValueId> {
        match self.values.get(id.name.as_str()) {
            Some(&v) => Some(v),
            None => {
                self.error(
                    Diagnostic::error(format!("unknown value `%{}`", id.name))
                        .with_code(codes::E0100)
                        .with_span(id.span),
                );
                None
            }
        }
    }

    fn label(&mut self, id: &ast::Ident) -> Option<BlockId> {
        match self.blocks.get(id.name.as_str()) {
            Some(&b) => Some(b),
            None => {
                self.error(
                    Diagnostic::error(format!("unknown block `{}`", id.name))
                        .with_code(codes::E0101)
                        .with_span(id.span),
                );
                None
            }
        }
    }

    fn values(&mut self, operands: &[Operand]) -> Option<Vec<ValueId>> {
        let mut out = Vec::with_capacity(operands.len());
        let mut ok = true;
        for op in operands {
            match self.value(op) {
                Some(v) => out.push(v),
                None => ok = false,
            }
        }
        ok.then_some(out)
    }

    fn lower_op(&mut self, op: &Op) -> Option<InstKind> {
        let kind = match op {
            Op::Load { ordering, ptr } => InstKind::Load {
                ordering: *ordering,
                ptr: self.value(ptr)?,
            },
            Op::Store {
                ordering,
                ptr,
                value,
            } => {
                let ops = self.values(&[ptr.clone(), value.clone()])?;
                InstKind::Store {
                    ordering: *ordering,
                    ptr: ops[0],
                    value: ops[1],
                }
            }
            Op::Rmw {
                op,
                ordering,
                ptr,
                value,
            } => {
                let ops = self.values(&[ptr.clone(), value.clone()])?;
                InstKind::Rmw {
                    op: *op,
                    ordering: *ordering,
                    ptr: ops[0],
                    value: ops[1],
                }
            }
            Op::CmpXchg {
                ordering,
                ptr,
                expected,
                new,
            } => {
                let ops = self.values(&[ptr.clone(), expected.clone(), new.clone()])?;
                InstKind::CmpXchg {
                    ordering: *ordering,
                    ptr: ops[0],
                    expected: ops[1],
                    new: ops[2],
                }
            }
            Op::Gep { base, offsets } => {
                let base = self.value(base);
                let offsets = self.values(offsets);
                InstKind::Gep {
                    base: base?,
                    offsets: offsets?,
                }
            }
            Op::Cast(x) => InstKind::Cast(self.value(x)?),
            Op::Opaque(x) => InstKind::Opaque(self.value(x)?),
            Op::Bin { op, lhs, rhs } => {
                let ops = self.values(&[lhs.clone(), rhs.clone()])?;
                InstKind::Bin {
                    op: *op,
                    lhs: ops[0],
                    rhs: ops[1],
                }
            }
            Op::Cmp { pred, lhs, rhs } => {
                let ops = self.values(&[lhs.clone(), rhs.clone()])?;
                InstKind::Cmp {
                    pred: *pred,
                    lhs: ops[0],
                    rhs: ops[1],
                }
            }
            Op::Phi(incoming) => {
                let mut out = Vec::with_capacity(incoming.len());
                let mut ok = true;
                for (value, label) in incoming {
                    match (self.value(value), self.label(label)) {
                        (Some(v), Some(b)) => out.push((v, b)),
                        _ => ok = false,
                    }
                }
                if !ok {
                    return None;
                }
                InstKind::Phi(out)
            }
            Op::Call { callee, args } => InstKind::Call {
                callee: callee.name.clone(),
                args: self.values(args)?,
            },
            Op::Fence(kind) => InstKind::Fence(*kind),
            Op::Begin { name, annotation } => {
                let annotation = match annotation {
                    Some((kind, value)) => Some((*kind, self.local(value)?)),
                    None => None,
                };
                InstKind::Begin {
                    name: name.name.clone(),
                    annotation,
                }
            }
            Op::End(token) => {
                let v = self.local(token)?;
                if !self.is_region_token(v) {
                    self.error(
                        Diagnostic::error(format!("`%{}` is not defined by `begin`", token.name))
                            .with_code(codes::E0107)
                            .with_span(token.span),
                    );
                    return None;
                }
                InstKind::End(v)
            }
            Op::Edge {
                kind,
                src,
                dst,
                here,
            } => InstKind::Edge {
                kind: *kind,
                src: src.name.clone(),
                dst: dst.name.clone(),
                here: *here,
            },
            Op::Br(label) => InstKind::Br(self.label(label)?),
            Op::CondBr {
                cond,
                then_label,
                else_label,
            } => {
                let cond = self.value(cond);
                let then_bb = self.label(then_label);
                let else_bb = self.label(else_label);
                InstKind::CondBr {
                    cond: cond?,
                    then_bb: then_bb?,
                    else_bb: else_bb?,
                }
            }
            Op::Ret(value) => match value {
                Some(v) => InstKind::Ret(Some(self.value(v)?)),
                None => InstKind::Ret(None),
            },
        };
        Some(kind)
    }

    /// A region token is the named result of a `begin` anywhere in the
    /// function (it may not be lowered yet).
    fn is_region_token(&self, v: ValueId) -> bool {
        let name = self.func.value(v).name.as_deref();
        self.def
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .any(|inst| {
                matches!(inst.op, Op::Begin { .. })
                    && inst.result.as_ref().map(|r| r.name.as_str()) == name
            })
    }
}

fn duplicate_value(id: &ast::Ident) -> Diagnostic {
    Diagnostic::error(format!("duplicate definition of `%{}`", id.name))
        .with_code(codes::E0102)
        .with_span(id.span)
}

// ── Tests ───────────────────────────────────────────────────────────────────
