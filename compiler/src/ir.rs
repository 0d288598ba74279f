// ir.rs — SSA function representation consumed by realization
//
// A `Function` is an arena of blocks and values. Every instruction, parameter
// and constant is a value; blocks hold ordered instruction lists ending in a
// terminator. The CFG is implied by terminators: successors are read from
// the terminator, predecessors are recomputed on demand so that mutation
// (splitting, edge insertion) can never leave a stale cache behind.
//
// Preconditions: functions built through `lower` or the builder methods here.
// Postconditions: mutation keeps terminators, phi incoming blocks and
//   `ValueData::block` consistent.
// Failure modes: structural misuse (splitting before a phi, operand index out
//   of range) panics; these are programming errors, not input errors.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use crate::id::{BlockId, ValueId};

// ── Instruction vocabulary ──────────────────────────────────────────────

/// Memory ordering attached to an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ordering {
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl Ordering {
    pub fn keyword(self) -> &'static str {
        match self {
            Ordering::Relaxed => "relaxed",
            Ordering::Acquire => "acquire",
            Ordering::Release => "release",
            Ordering::AcqRel => "acq_rel",
            Ordering::SeqCst => "seq_cst",
        }
    }

    /// Strengthen so the access also has release semantics.
    pub fn with_release(self) -> Self {
        match self {
            Ordering::Relaxed => Ordering::Release,
            Ordering::Acquire => Ordering::AcqRel,
            other => other,
        }
    }

    /// Strengthen so the access also has acquire semantics.
    pub fn with_acquire(self) -> Self {
        match self {
            Ordering::Relaxed => Ordering::Acquire,
            Ordering::Release => Ordering::AcqRel,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
}

impl BinOp {
    pub fn keyword(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl RmwOp {
    pub fn keyword(self) -> &'static str {
        match self {
            RmwOp::Xchg => "xchg",
            RmwOp::Add => "add",
            RmwOp::Sub => "sub",
            RmwOp::And => "and",
            RmwOp::Or => "or",
            RmwOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    pub fn keyword(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        }
    }
}

/// Abstract barrier kinds. `Compiler` only restrains compiler reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FenceKind {
    Sync,
    Lwsync,
    Isync,
    DmbSt,
    DmbLd,
    Compiler,
}

impl FenceKind {
    pub fn keyword(self) -> &'static str {
        match self {
            FenceKind::Sync => "sync",
            FenceKind::Lwsync => "lwsync",
            FenceKind::Isync => "isync",
            FenceKind::DmbSt => "dmb.st",
            FenceKind::DmbLd => "dmb.ld",
            FenceKind::Compiler => "compiler",
        }
    }
}

/// Ordering edge kinds between actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Execution,
    Visibility,
    Push,
}

impl EdgeKind {
    pub fn keyword(self) -> &'static str {
        match self {
            EdgeKind::Execution => "xedge",
            EdgeKind::Visibility => "vedge",
            EdgeKind::Push => "pedge",
        }
    }
}

/// Annotation on a region marker naming a value that carries a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Give,
    Take,
}

impl AnnotationKind {
    pub fn keyword(self) -> &'static str {
        match self {
            AnnotationKind::Give => "give",
            AnnotationKind::Take => "take",
        }
    }
}

/// What a value is.
#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Param(u32),
    Const(i64),
    Load {
        ordering: Ordering,
        ptr: ValueId,
    },
    Store {
        ordering: Ordering,
        ptr: ValueId,
        value: ValueId,
    },
    Rmw {
        op: RmwOp,
        ordering: Ordering,
        ptr: ValueId,
        value: ValueId,
    },
    CmpXchg {
        ordering: Ordering,
        ptr: ValueId,
        expected: ValueId,
        new: ValueId,
    },
    Gep {
        base: ValueId,
        offsets: Vec<ValueId>,
    },
    Cast(ValueId),
    /// Identity copy the optimizer may not see through.
    Opaque(ValueId),
    Bin {
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    },
    Cmp {
        pred: CmpPred,
        lhs: ValueId,
        rhs: ValueId,
    },
    Phi(Vec<(ValueId, BlockId)>),
    Call {
        callee: String,
        args: Vec<ValueId>,
    },
    Fence(FenceKind),
    Begin {
        name: String,
        annotation: Option<(AnnotationKind, ValueId)>,
    },
    End(ValueId),
    Edge {
        kind: EdgeKind,
        src: String,
        dst: String,
        here: bool,
    },
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Ret(Option<ValueId>),
}

impl InstKind {
    pub fn is_terminator(&self) -> bool {
        matches!(self, InstKind::Br(_) | InstKind::CondBr { .. } | InstKind::Ret(_))
    }

    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            InstKind::Begin { .. } | InstKind::End(_) | InstKind::Edge { .. }
        )
    }

    pub fn is_load(&self) -> bool {
        matches!(self, InstKind::Load { .. })
    }

    pub fn is_store(&self) -> bool {
        matches!(self, InstKind::Store { .. })
    }

    pub fn is_rmw(&self) -> bool {
        matches!(self, InstKind::Rmw { .. } | InstKind::CmpXchg { .. })
    }

    pub fn is_access(&self) -> bool {
        self.is_load() || self.is_store() || self.is_rmw()
    }

    /// Ordering of a memory access.
    pub fn ordering(&self) -> Option<Ordering> {
        match self {
            InstKind::Load { ordering, .. }
            | InstKind::Store { ordering, .. }
            | InstKind::Rmw { ordering, .. }
            | InstKind::CmpXchg { ordering, .. } => Some(*ordering),
            _ => None,
        }
    }

    fn ordering_mut(&mut self) -> Option<&mut Ordering> {
        match self {
            InstKind::Load { ordering, .. }
            | InstKind::Store { ordering, .. }
            | InstKind::Rmw { ordering, .. }
            | InstKind::CmpXchg { ordering, .. } => Some(ordering),
            _ => None,
        }
    }

    /// Value operands in a fixed order. The pointer of every memory access
    /// is operand 0.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            InstKind::Param(_)
            | InstKind::Const(_)
            | InstKind::Fence(_)
            | InstKind::Edge { .. }
            | InstKind::Br(_) => vec![],
            InstKind::Load { ptr, .. } => vec![*ptr],
            InstKind::Store { ptr, value, .. } | InstKind::Rmw { ptr, value, .. } => {
                vec![*ptr, *value]
            }
            InstKind::CmpXchg {
                ptr, expected, new, ..
            } => vec![*ptr, *expected, *new],
            InstKind::Gep { base, offsets } => {
                let mut ops = vec![*base];
                ops.extend(offsets.iter().copied());
                ops
            }
            InstKind::Cast(v) | InstKind::Opaque(v) | InstKind::End(v) => vec![*v],
            InstKind::Bin { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Phi(incoming) => incoming.iter().map(|(v, _)| *v).collect(),
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Begin { annotation, .. } => annotation.iter().map(|(_, v)| *v).collect(),
            InstKind::CondBr { cond, .. } => vec![*cond],
            InstKind::Ret(v) => v.iter().copied().collect(),
        }
    }

    /// Mutable references to the operands, in `operands()` order.
    fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            InstKind::Param(_)
            | InstKind::Const(_)
            | InstKind::Fence(_)
            | InstKind::Edge { .. }
            | InstKind::Br(_) => vec![],
            InstKind::Load { ptr, .. } => vec![ptr],
            InstKind::Store { ptr, value, .. } | InstKind::Rmw { ptr, value, .. } => {
                vec![ptr, value]
            }
            InstKind::CmpXchg {
                ptr, expected, new, ..
            } => vec![ptr, expected, new],
            InstKind::Gep { base, offsets } => {
                let mut ops = vec![base];
                ops.extend(offsets.iter_mut());
                ops
            }
            InstKind::Cast(v) | InstKind::Opaque(v) | InstKind::End(v) => vec![v],
            InstKind::Bin { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Phi(incoming) => incoming.iter_mut().map(|(v, _)| v).collect(),
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::Begin { annotation, .. } => annotation.iter_mut().map(|(_, v)| v).collect(),
            InstKind::CondBr { cond, .. } => vec![cond],
            InstKind::Ret(v) => v.iter_mut().collect(),
        }
    }

    /// Branch targets of a terminator, in order (may repeat).
    fn targets(&self) -> Vec<BlockId> {
        match self {
            InstKind::Br(t) => vec![*t],
            InstKind::CondBr {
                then_bb, else_bb, ..
            } => vec![*then_bb, *else_bb],
            _ => vec![],
        }
    }

    fn targets_mut(&mut self) -> Vec<&mut BlockId> {
        match self {
            InstKind::Br(t) => vec![t],
            InstKind::CondBr {
                then_bb, else_bb, ..
            } => vec![then_bb, else_bb],
            _ => vec![],
        }
    }
}

// ── Arena entries ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ValueData {
    pub name: Option<String>,
    pub kind: InstKind,
    /// Block holding the instruction; `None` for params, constants and
    /// removed instructions.
    pub block: Option<BlockId>,
    /// The optimizer must treat this value as unknown.
    pub opaque: bool,
    /// The optimizer must keep this instruction as written.
    pub must_preserve: bool,
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<ValueId>,
}

/// A use of a value: operand `index` of instruction `inst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UseSite {
    pub inst: ValueId,
    pub index: usize,
}

// ── Function ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueId>,
    pub blocks: Vec<BlockData>,
    pub values: Vec<ValueData>,
    pub entry: BlockId,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Function {
            name: name.into(),
            params: Vec::new(),
            blocks: Vec::new(),
            values: Vec::new(),
            entry: BlockId(0),
        }
    }

    // ── Construction ──

    /// Add an empty block. The first block added is the entry.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.into(),
            insts: Vec::new(),
        });
        id
    }

    /// Allocate a value that is not placed in any block.
    pub fn add_value(&mut self, name: Option<String>, kind: InstKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData {
            name,
            kind,
            block: None,
            opaque: false,
            must_preserve: false,
        });
        id
    }

    pub fn add_param(&mut self, name: impl Into<String>) -> ValueId {
        let index = self.params.len() as u32;
        let v = self.add_value(Some(name.into()), InstKind::Param(index));
        self.params.push(v);
        v
    }

    pub fn add_const(&mut self, value: i64) -> ValueId {
        self.add_value(None, InstKind::Const(value))
    }

    /// Place an already-allocated value at the end of `block`.
    pub fn place(&mut self, block: BlockId, v: ValueId) {
        self.blocks[block.index()].insts.push(v);
        self.values[v.index()].block = Some(block);
    }

    /// Create an instruction at the end of `block`.
    pub fn append(&mut self, block: BlockId, kind: InstKind) -> ValueId {
        let v = self.add_value(None, kind);
        self.place(block, v);
        v
    }

    /// Create an instruction at position `pos` of `block`.
    pub fn insert_at(&mut self, block: BlockId, pos: usize, kind: InstKind) -> ValueId {
        let v = self.add_value(None, kind);
        self.blocks[block.index()].insts.insert(pos, v);
        self.values[v.index()].block = Some(block);
        v
    }

    /// Create an instruction at the block's first insertion point.
    pub fn insert_front(&mut self, block: BlockId, kind: InstKind) -> ValueId {
        let pos = self.first_insertion_point(block);
        self.insert_at(block, pos, kind)
    }

    /// Create an instruction right before the block's terminator.
    pub fn insert_before_terminator(&mut self, block: BlockId, kind: InstKind) -> ValueId {
        let len = self.blocks[block.index()].insts.len();
        let pos = if self.terminator(block).is_some() {
            len - 1
        } else {
            len
        };
        self.insert_at(block, pos, kind)
    }

    /// Create an instruction right before `inst`.
    pub fn insert_before(&mut self, inst: ValueId, kind: InstKind) -> ValueId {
        let (block, pos) = self
            .position(inst)
            .unwrap_or_else(|| panic!("{inst} is not placed in a block"));
        self.insert_at(block, pos, kind)
    }

    /// Detach an instruction from its block.
    pub fn remove(&mut self, inst: ValueId) {
        if let Some((block, pos)) = self.position(inst) {
            self.blocks[block.index()].insts.remove(pos);
            self.values[inst.index()].block = None;
        }
    }

    // ── Queries ──

    pub fn block(&self, b: BlockId) -> &BlockData {
        &self.blocks[b.index()]
    }

    pub fn value(&self, v: ValueId) -> &ValueData {
        &self.values[v.index()]
    }

    pub fn kind(&self, v: ValueId) -> &InstKind {
        &self.values[v.index()].kind
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block_of(&self, v: ValueId) -> Option<BlockId> {
        self.values[v.index()].block
    }

    pub fn position(&self, inst: ValueId) -> Option<(BlockId, usize)> {
        let block = self.block_of(inst)?;
        let pos = self.blocks[block.index()]
            .insts
            .iter()
            .position(|&v| v == inst)?;
        Some((block, pos))
    }

    pub fn terminator(&self, b: BlockId) -> Option<ValueId> {
        let last = *self.blocks[b.index()].insts.last()?;
        self.kind(last).is_terminator().then_some(last)
    }

    /// Distinct successors in terminator order.
    pub fn successors(&self, b: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        if let Some(term) = self.terminator(b) {
            for t in self.kind(term).targets() {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        out
    }

    /// Distinct predecessors in block-id order.
    pub fn predecessors(&self, b: BlockId) -> Vec<BlockId> {
        self.block_ids()
            .filter(|&p| self.successors(p).contains(&b))
            .collect()
    }

    pub fn is_return(&self, b: BlockId) -> bool {
        self.terminator(b)
            .is_some_and(|t| matches!(self.kind(t), InstKind::Ret(_)))
    }

    pub fn return_blocks(&self) -> Vec<BlockId> {
        self.block_ids().filter(|&b| self.is_return(b)).collect()
    }

    /// Index of the first non-phi instruction.
    pub fn first_insertion_point(&self, b: BlockId) -> usize {
        self.blocks[b.index()]
            .insts
            .iter()
            .take_while(|&&v| matches!(self.kind(v), InstKind::Phi(_)))
            .count()
    }

    /// Every placed use of `v`.
    pub fn uses(&self, v: ValueId) -> Vec<UseSite> {
        let mut out = Vec::new();
        for block in &self.blocks {
            for &inst in &block.insts {
                for (index, op) in self.kind(inst).operands().into_iter().enumerate() {
                    if op == v {
                        out.push(UseSite { inst, index });
                    }
                }
            }
        }
        out
    }

    pub fn operand(&self, site: UseSite) -> ValueId {
        self.kind(site.inst).operands()[site.index]
    }

    pub fn set_operand(&mut self, site: UseSite, new: ValueId) {
        let mut ops = self.values[site.inst.index()].kind.operands_mut();
        *ops[site.index] = new;
    }

    /// Display name without the `%` sigil.
    pub fn value_name(&self, v: ValueId) -> String {
        match &self.values[v.index()].name {
            Some(name) => name.clone(),
            None => format!("v{}", v.0),
        }
    }

    /// Blocks reachable from `from` over real edges.
    pub fn reachable_from(&self, from: BlockId) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(b) = stack.pop() {
            if seen.insert(b) {
                stack.extend(self.successors(b));
            }
        }
        seen
    }

    // ── Opacity capability ──

    /// Hide `v` from the optimizer.
    pub fn mark_opaque(&mut self, v: ValueId) {
        self.values[v.index()].opaque = true;
    }

    /// Route operand `site` through an opaque copy so the optimizer cannot
    /// reason about the compared value. Returns the copy. Idempotent: an
    /// operand that is already an opaque copy is left alone.
    pub fn mark_opaque_use(&mut self, site: UseSite) -> ValueId {
        let current = self.operand(site);
        if matches!(self.kind(current), InstKind::Opaque(_)) && self.value(current).opaque {
            return current;
        }
        let copy = self.insert_before(site.inst, InstKind::Opaque(current));
        self.mark_opaque(copy);
        self.set_operand(site, copy);
        copy
    }

    pub fn mark_must_preserve(&mut self, v: ValueId) {
        self.values[v.index()].must_preserve = true;
    }

    /// Strengthen the ordering of an access. Returns whether it changed.
    pub fn upgrade_ordering(&mut self, v: ValueId, upgrade: fn(Ordering) -> Ordering) -> bool {
        match self.values[v.index()].kind.ordering_mut() {
            Some(ordering) => {
                let new = upgrade(*ordering);
                let changed = new != *ordering;
                *ordering = new;
                changed
            }
            None => false,
        }
    }

    // ── CFG surgery ──

    fn unique_block_name(&self, base: &str) -> String {
        let taken = |name: &str| self.blocks.iter().any(|b| b.name == name);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}{n}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| unreachable!())
    }

    /// Rewrite phi incoming blocks in `block` from `old` to `new`.
    fn retarget_phis(&mut self, block: BlockId, old: BlockId, new: BlockId) {
        let insts = self.blocks[block.index()].insts.clone();
        for v in insts {
            if let InstKind::Phi(incoming) = &mut self.values[v.index()].kind {
                for (_, pred) in incoming.iter_mut() {
                    if *pred == old {
                        *pred = new;
                    }
                }
            }
        }
    }

    /// Split `inst`'s block so that `inst` starts a new block. The original
    /// block falls through to the new one with an unconditional branch.
    /// Returns the new block.
    pub fn split_block_before(&mut self, inst: ValueId) -> BlockId {
        let (old, pos) = self
            .position(inst)
            .unwrap_or_else(|| panic!("{inst} is not placed in a block"));
        assert!(
            pos >= self.first_insertion_point(old),
            "cannot split {} before a phi",
            self.blocks[old.index()].name
        );

        let name = self.unique_block_name(&format!("{}.split", self.blocks[old.index()].name));
        let new = self.add_block(name);
        let tail = self.blocks[old.index()].insts.split_off(pos);
        for &v in &tail {
            self.values[v.index()].block = Some(new);
        }
        self.blocks[new.index()].insts = tail;

        for succ in self.successors(new) {
            self.retarget_phis(succ, old, new);
        }
        self.append(old, InstKind::Br(new));
        new
    }

    /// Insert a block on the edge `from -> to`. Returns the new block.
    pub fn split_edge(&mut self, from: BlockId, to: BlockId) -> BlockId {
        let name = self.unique_block_name(&format!(
            "{}.{}",
            self.blocks[from.index()].name,
            self.blocks[to.index()].name
        ));
        let mid = self.add_block(name);
        self.append(mid, InstKind::Br(to));
        if let Some(term) = self.terminator(from) {
            for target in self.values[term.index()].kind.targets_mut() {
                if *target == to {
                    *target = mid;
                }
            }
        }
        self.retarget_phis(to, from, mid);
        mid
    }
}

// ── Printing ────────────────────────────────────────────────────────────

/// Action names print bare when they lex as a single identifier.
fn fmt_action_name(name: &str) -> String {
    let lexed = crate::lexer::lex(name);
    let plain = lexed.errors.is_empty()
        && lexed.tokens.len() == 1
        && lexed.tokens[0].0 == crate::lexer::Token::Ident
        && lexed.tokens[0].1.end == name.len();
    if plain {
        name.to_string()
    } else {
        format!("{name:?}")
    }
}

impl Function {
    fn fmt_operand(&self, v: ValueId) -> String {
        match self.kind(v) {
            InstKind::Const(c) if self.value(v).name.is_none() => c.to_string(),
            _ => format!("%{}", self.value_name(v)),
        }
    }

    fn fmt_operands(&self, vs: &[ValueId]) -> String {
        vs.iter()
            .map(|&v| self.fmt_operand(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// One instruction as it prints in the textual IR.
    pub fn fmt_inst(&self, v: ValueId) -> String {
        let op = |x: &ValueId| self.fmt_operand(*x);
        let label = |b: &BlockId| self.blocks[b.index()].name.clone();
        let body = match self.kind(v) {
            InstKind::Param(_) | InstKind::Const(_) => unreachable!("not an instruction"),
            InstKind::Load { ordering, ptr } => {
                format!("load {} {}", ordering.keyword(), op(ptr))
            }
            InstKind::Store {
                ordering,
                ptr,
                value,
            } => format!("store {} {}, {}", ordering.keyword(), op(ptr), op(value)),
            InstKind::Rmw {
                op: rmw,
                ordering,
                ptr,
                value,
            } => format!(
                "rmw {} {} {}, {}",
                rmw.keyword(),
                ordering.keyword(),
                op(ptr),
                op(value)
            ),
            InstKind::CmpXchg {
                ordering,
                ptr,
                expected,
                new,
            } => format!(
                "cmpxchg {} {}, {}, {}",
                ordering.keyword(),
                op(ptr),
                op(expected),
                op(new)
            ),
            InstKind::Gep { base, offsets } => {
                let mut all = vec![*base];
                all.extend(offsets.iter().copied());
                format!("gep {}", self.fmt_operands(&all))
            }
            InstKind::Cast(x) => format!("cast {}", op(x)),
            InstKind::Opaque(x) => format!("opaque {}", op(x)),
            InstKind::Bin { op: bin, lhs, rhs } => {
                format!("{} {}, {}", bin.keyword(), op(lhs), op(rhs))
            }
            InstKind::Cmp { pred, lhs, rhs } => {
                format!("cmp {} {}, {}", pred.keyword(), op(lhs), op(rhs))
            }
            InstKind::Phi(incoming) => {
                let parts: Vec<_> = incoming
                    .iter()
                    .map(|(x, b)| format!("[{}, {}]", op(x), label(b)))
                    .collect();
                format!("phi {}", parts.join(", "))
            }
            InstKind::Call { callee, args } => {
                format!("call @{}({})", callee, self.fmt_operands(args))
            }
            InstKind::Fence(kind) => format!("fence {}", kind.keyword()),
            InstKind::Begin { name, annotation } => match annotation {
                Some((kind, x)) => format!(
                    "begin {} {} {}",
                    fmt_action_name(name),
                    kind.keyword(),
                    op(x)
                ),
                None => format!("begin {}", fmt_action_name(name)),
            },
            InstKind::End(token) => format!("end {}", op(token)),
            InstKind::Edge {
                kind,
                src,
                dst,
                here,
            } => format!(
                "{} {} -> {}{}",
                kind.keyword(),
                fmt_action_name(src),
                fmt_action_name(dst),
                if *here { " here" } else { "" }
            ),
            InstKind::Br(t) => format!("br {}", label(t)),
            InstKind::CondBr {
                cond,
                then_bb,
                else_bb,
            } => format!("br {}, {}, {}", op(cond), label(then_bb), label(else_bb)),
            InstKind::Ret(Some(x)) => format!("ret {}", op(x)),
            InstKind::Ret(None) => "ret".to_string(),
        };

        let data = self.value(v);
        let defines = data.name.is_some() || !self.uses(v).is_empty();
        let mut line = if defines {
            format!("%{} = {}", self.value_name(v), body)
        } else {
            body
        };
        if data.opaque {
            line.push_str("  # opaque");
        }
        if data.must_preserve {
            line.push_str("  # preserve");
        }
        line
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self
            .params
            .iter()
            .map(|&p| format!("%{}", self.value_name(p)))
            .collect();
        writeln!(f, "fn {}({}) {{", self.name, params.join(", "))?;
        for block in &self.blocks {
            writeln!(f, "{}:", block.name)?;
            for &v in &block.insts {
                writeln!(f, "  {}", self.fmt_inst(v))?;
            }
        }
        writeln!(f, "}}")
    }
}

// ── Tests ───────────────────────────────────────────────────────────────
