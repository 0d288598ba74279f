// AST node types for textual RMC IR (.rir) files.
//
// A module is a list of functions; a function is a list of labelled blocks;
// a block is a list of instructions. Names are kept as written: resolution
// to value and block ids happens in `lower`. Every node carries a
// `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

use crate::ir::{AnnotationKind, BinOp, CmpPred, EdgeKind, FenceKind, Ordering, RmwOp};

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// A name with its source location. For locals and globals the sigil
/// (`%` / `@`) is stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub functions: Vec<FnDef>,
    pub span: Span,
}

/// `fn name(%p, ...) { blocks }`
#[derive(Debug, Clone, PartialEq)]
pub struct FnDef {
    pub name: Ident,
    pub params: Vec<Ident>,
    pub blocks: Vec<BlockDef>,
    pub span: Span,
}

/// `label: inst*`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDef {
    pub label: Ident,
    pub insts: Vec<Inst>,
    pub span: Span,
}

// ── Instructions ──

/// An instruction, optionally binding a result: `%r = op ...`.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<Ident>,
    pub op: Op,
    pub span: Span,
}

/// An instruction operand: a named local or an integer immediate.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Local(Ident),
    Int(i64, Span),
}

impl Operand {
    pub fn span(&self) -> Span {
        match self {
            Operand::Local(id) => id.span,
            Operand::Int(_, span) => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Load {
        ordering: Ordering,
        ptr: Operand,
    },
    Store {
        ordering: Ordering,
        ptr: Operand,
        value: Operand,
    },
    Rmw {
        op: RmwOp,
        ordering: Ordering,
        ptr: Operand,
        value: Operand,
    },
    CmpXchg {
        ordering: Ordering,
        ptr: Operand,
        expected: Operand,
        new: Operand,
    },
    Gep {
        base: Operand,
        offsets: Vec<Operand>,
    },
    Cast(Operand),
    Opaque(Operand),
    Bin {
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    Cmp {
        pred: CmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// `phi [%v, label], ...`
    Phi(Vec<(Operand, Ident)>),
    Call {
        callee: Ident,
        args: Vec<Operand>,
    },
    Fence(FenceKind),
    /// `begin name [give %v | take %v]`
    Begin {
        name: Ident,
        annotation: Option<(AnnotationKind, Ident)>,
    },
    /// `end %token`
    End(Ident),
    /// `xedge a -> b [here]`
    Edge {
        kind: EdgeKind,
        src: Ident,
        dst: Ident,
        here: bool,
    },
    Br(Ident),
    CondBr {
        cond: Operand,
        then_label: Ident,
        else_label: Ident,
    },
    Ret(Option<Operand>),
}

impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Br(_) | Op::CondBr { .. } | Op::Ret(_))
    }
}
