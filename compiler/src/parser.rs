// Parser for textual RMC IR (.rir) files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Newlines are insignificant; instructions are recognised by
// their leading keyword, block boundaries by `label:`.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::{AnnotationKind, BinOp, CmpPred, EdgeKind, FenceKind, Ordering, RmwOp};
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<Module>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an RIR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser(source);
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Module, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // `%x` and `@f`: the sigil is not part of the name.
    let sigil_name = move |span: SimpleSpan| Ident {
        name: source[span.start() + 1..span.end()].to_string(),
        span,
    };
    let local = just(Token::Local).map_with(move |_, e| sigil_name(e.span()));
    let global = just(Token::Global).map_with(move |_, e| sigil_name(e.span()));

    // Action names may be bare identifiers or quoted strings.
    let action_name = ident.clone().or(select! {
        Token::StringLit(s) = e => Ident { name: s, span: e.span() },
    });

    let comma = just(Token::Comma);

    // ── Operands ──

    let operand = local.clone().map(Operand::Local).or(select! {
        Token::Int(v) = e => Operand::Int(v, e.span()),
    });

    // ── Keyword classes ──

    let ordering = select! {
        Token::Relaxed => Ordering::Relaxed,
        Token::Acquire => Ordering::Acquire,
        Token::Release => Ordering::Release,
        Token::AcqRel => Ordering::AcqRel,
        Token::SeqCst => Ordering::SeqCst,
    };

    let bin_op = select! {
        Token::Add => BinOp::Add,
        Token::Sub => BinOp::Sub,
        Token::Mul => BinOp::Mul,
        Token::And => BinOp::And,
        Token::Or => BinOp::Or,
        Token::Xor => BinOp::Xor,
        Token::Shl => BinOp::Shl,
    };

    let rmw_op = select! {
        Token::Xchg => RmwOp::Xchg,
        Token::Add => RmwOp::Add,
        Token::Sub => RmwOp::Sub,
        Token::And => RmwOp::And,
        Token::Or => RmwOp::Or,
        Token::Xor => RmwOp::Xor,
    };

    let cmp_pred = select! {
        Token::Eq => CmpPred::Eq,
        Token::Ne => CmpPred::Ne,
        Token::Lt => CmpPred::Lt,
        Token::Le => CmpPred::Le,
        Token::Gt => CmpPred::Gt,
        Token::Ge => CmpPred::Ge,
    };

    let fence_kind = select! {
        Token::Sync => FenceKind::Sync,
        Token::Lwsync => FenceKind::Lwsync,
        Token::Isync => FenceKind::Isync,
        Token::DmbSt => FenceKind::DmbSt,
        Token::DmbLd => FenceKind::DmbLd,
        Token::Compiler => FenceKind::Compiler,
    };

    let edge_kind = select! {
        Token::XEdge => EdgeKind::Execution,
        Token::VEdge => EdgeKind::Visibility,
        Token::PEdge => EdgeKind::Push,
    };

    let annotation_kind = select! {
        Token::Give => AnnotationKind::Give,
        Token::Take => AnnotationKind::Take,
    };

    // ── Memory operations ──

    let load = just(Token::Load)
        .ignore_then(ordering)
        .then(operand.clone())
        .map(|(ordering, ptr)| Op::Load { ordering, ptr });

    let store = just(Token::Store)
        .ignore_then(ordering)
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|((ordering, ptr), value)| Op::Store {
            ordering,
            ptr,
            value,
        });

    let rmw = just(Token::Rmw)
        .ignore_then(rmw_op)
        .then(ordering)
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|(((op, ordering), ptr), value)| Op::Rmw {
            op,
            ordering,
            ptr,
            value,
        });

    let cmpxchg = just(Token::CmpXchg)
        .ignore_then(ordering)
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|(((ordering, ptr), expected), new)| Op::CmpXchg {
            ordering,
            ptr,
            expected,
            new,
        });

    let fence = just(Token::Fence).ignore_then(fence_kind).map(Op::Fence);

    // ── Value computations ──

    let gep = just(Token::Gep)
        .ignore_then(operand.clone())
        .then(
            comma
                .clone()
                .ignore_then(operand.clone())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(base, offsets)| Op::Gep { base, offsets });

    let cast = just(Token::Cast).ignore_then(operand.clone()).map(Op::Cast);
    let opaque = just(Token::Opaque)
        .ignore_then(operand.clone())
        .map(Op::Opaque);

    let bin = bin_op
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|((op, lhs), rhs)| Op::Bin { op, lhs, rhs });

    let cmp = just(Token::Cmp)
        .ignore_then(cmp_pred)
        .then(operand.clone())
        .then_ignore(comma.clone())
        .then(operand.clone())
        .map(|((pred, lhs), rhs)| Op::Cmp { pred, lhs, rhs });

    // `phi [%v, label], [%w, label]`
    let phi = just(Token::Phi)
        .ignore_then(
            operand
                .clone()
                .then_ignore(comma.clone())
                .then(ident.clone())
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .separated_by(comma.clone())
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(Op::Phi);

    let call = just(Token::Call)
        .ignore_then(global)
        .then(
            operand
                .clone()
                .separated_by(comma.clone())
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|(callee, args)| Op::Call { callee, args });

    // ── Region and edge markers ──

    let begin = just(Token::Begin)
        .ignore_then(action_name.clone())
        .then(annotation_kind.then(local.clone()).or_not())
        .map(|(name, annotation)| Op::Begin { name, annotation });

    let end = just(Token::End).ignore_then(local.clone()).map(Op::End);

    let edge = edge_kind
        .then(action_name.clone())
        .then_ignore(just(Token::Arrow))
        .then(action_name)
        .then(just(Token::Here).or_not().map(|h| h.is_some()))
        .map(|(((kind, src), dst), here)| Op::Edge {
            kind,
            src,
            dst,
            here,
        });

    // ── Terminators ──

    let br = just(Token::Br).ignore_then(
        operand
            .clone()
            .then_ignore(comma.clone())
            .then(ident.clone())
            .then_ignore(comma.clone())
            .then(ident.clone())
            .map(|((cond, then_label), else_label)| Op::CondBr {
                cond,
                then_label,
                else_label,
            })
            .or(ident.clone().map(Op::Br)),
    );

    let ret = just(Token::Ret)
        .ignore_then(operand.clone().or_not())
        .map(Op::Ret);

    // ── Instruction dispatch ──

    let op = choice((
        load, store, rmw, cmpxchg, fence, gep, cast, opaque, bin, cmp, phi, call, begin, end,
        edge, br, ret,
    ))
    .boxed();

    let inst = local
        .clone()
        .then_ignore(just(Token::Equals))
        .or_not()
        .then(op)
        .map_with(|(result, op), e| Inst {
            result,
            op,
            span: e.span(),
        });

    // ── Blocks and functions ──

    let block = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .then(inst.repeated().collect::<Vec<_>>())
        .map_with(|(label, insts), e| BlockDef {
            label,
            insts,
            span: e.span(),
        });

    let fn_def = just(Token::Fn)
        .ignore_then(ident)
        .then(
            local
                .separated_by(comma)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(
            block
                .repeated()
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((name, params), blocks), e| FnDef {
            name,
            params,
            blocks,
            span: e.span(),
        });

    // ── Module ──

    fn_def
        .repeated()
        .collect::<Vec<_>>()
        .map_with(|functions, e| Module {
            functions,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.module.expect("expected module")
    }

    fn parse_one_fn(source: &str) -> FnDef {
        let module = parse_ok(source);
        assert_eq!(module.functions.len(), 1, "expected 1 function");
        module.functions.into_iter().next().unwrap()
    }

    fn only_insts(source: &str) -> Vec<Inst> {
        let f = parse_one_fn(source);
        f.blocks.into_iter().flat_map(|b| b.insts).collect()
    }

    // ── Empty / structure ──

    #[test]
    fn empty_module() {
        let module = parse_ok("");
        assert!(module.functions.is_empty());
    }

    #[test]
    fn function_with_params_and_blocks() {
        let f = parse_one_fn("fn send(%data, %flag) {\nentry:\n  br done\ndone:\n  ret\n}");
        assert_eq!(f.name.name, "send");
        let params: Vec<_> = f.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["data", "flag"]);
        assert_eq!(f.blocks.len(), 2);
        assert_eq!(f.blocks[0].label.name, "entry");
        assert!(matches!(&f.blocks[0].insts[0].op, Op::Br(l) if l.name == "done"));
        assert!(matches!(f.blocks[1].insts[0].op, Op::Ret(None)));
    }

    #[test]
    fn two_functions() {
        let module = parse_ok("fn a() { e: ret } fn b() { e: ret }");
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.functions[1].name.name, "b");
    }

    // ── Memory operations ──

    #[test]
    fn load_and_store() {
        let insts = only_insts("fn f(%p) { e: %x = load acquire %p\n store release %p, 1\n ret %x }");
        assert_eq!(insts[0].result.as_ref().map(|r| r.name.as_str()), Some("x"));
        assert!(matches!(
            &insts[0].op,
            Op::Load { ordering: Ordering::Acquire, ptr: Operand::Local(p) } if p.name == "p"
        ));
        assert!(matches!(
            &insts[1].op,
            Op::Store { ordering: Ordering::Release, value: Operand::Int(1, _), .. }
        ));
        assert!(matches!(&insts[2].op, Op::Ret(Some(Operand::Local(_)))));
    }

    #[test]
    fn rmw_and_cmpxchg() {
        let insts = only_insts(
            "fn f(%p) { e: %o = rmw add seq_cst %p, 1\n %c = cmpxchg relaxed %p, 0, 1\n ret }",
        );
        assert!(matches!(
            insts[0].op,
            Op::Rmw { op: RmwOp::Add, ordering: Ordering::SeqCst, .. }
        ));
        assert!(matches!(
            insts[1].op,
            Op::CmpXchg { ordering: Ordering::Relaxed, .. }
        ));
    }

    #[test]
    fn fence_kinds() {
        let insts = only_insts("fn f() { e: fence lwsync\n fence dmb.st\n fence compiler\n ret }");
        assert!(matches!(insts[0].op, Op::Fence(FenceKind::Lwsync)));
        assert!(matches!(insts[1].op, Op::Fence(FenceKind::DmbSt)));
        assert!(matches!(insts[2].op, Op::Fence(FenceKind::Compiler)));
    }

    // ── Value computations ──

    #[test]
    fn gep_with_offsets() {
        let insts = only_insts("fn f(%p, %i) { e: %q = gep %p, %i, 8\n ret }");
        let Op::Gep { offsets, .. } = &insts[0].op else {
            panic!("expected Gep")
        };
        assert_eq!(offsets.len(), 2);
    }

    #[test]
    fn binary_and_compare() {
        let insts = only_insts("fn f(%a) { e: %s = and %a, 3\n %c = cmp ne %s, 0\n ret }");
        assert!(matches!(insts[0].op, Op::Bin { op: BinOp::And, .. }));
        assert!(matches!(insts[1].op, Op::Cmp { pred: CmpPred::Ne, .. }));
    }

    #[test]
    fn phi_incoming_list() {
        let insts = only_insts("fn f(%a, %b) { e: %m = phi [%a, left], [%b, right]\n ret }");
        let Op::Phi(incoming) = &insts[0].op else {
            panic!("expected Phi")
        };
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[1].1.name, "right");
    }

    #[test]
    fn call_with_global_callee() {
        let insts = only_insts("fn f(%a) { e: %r = call @helper(%a, 2)\n call @noop()\n ret }");
        assert!(matches!(
            &insts[0].op,
            Op::Call { callee, args } if callee.name == "helper" && args.len() == 2
        ));
        assert!(insts[1].result.is_none());
    }

    // ── Markers ──

    #[test]
    fn region_markers() {
        let insts = only_insts(
            "fn f(%p) { e: %t = begin recv take %x\n %x = load relaxed %p\n end %t\n ret }",
        );
        let Op::Begin { name, annotation } = &insts[0].op else {
            panic!("expected Begin")
        };
        assert_eq!(name.name, "recv");
        assert!(matches!(annotation, Some((AnnotationKind::Take, v)) if v.name == "x"));
        assert!(matches!(&insts[2].op, Op::End(t) if t.name == "t"));
    }

    #[test]
    fn quoted_action_name() {
        let insts = only_insts(r#"fn f() { e: %t = begin "w data"  end %t  ret }"#);
        assert!(matches!(&insts[0].op, Op::Begin { name, annotation: None } if name.name == "w data"));
    }

    #[test]
    fn edge_declarations() {
        let insts = only_insts("fn f() { e: xedge a -> b\n vedge pre -> a here\n pedge a -> post\n ret }");
        assert!(matches!(
            &insts[0].op,
            Op::Edge { kind: EdgeKind::Execution, here: false, .. }
        ));
        assert!(matches!(
            &insts[1].op,
            Op::Edge { kind: EdgeKind::Visibility, src, here: true, .. } if src.name == "pre"
        ));
        assert!(matches!(&insts[2].op, Op::Edge { kind: EdgeKind::Push, .. }));
    }

    #[test]
    fn conditional_branch() {
        let insts = only_insts("fn f(%c) { e: br %c, yes, no }");
        assert!(matches!(
            &insts[0].op,
            Op::CondBr { then_label, else_label, .. }
                if then_label.name == "yes" && else_label.name == "no"
        ));
    }

    // ── Errors ──

    #[test]
    fn missing_arrow_is_error() {
        let result = parse("fn f() { e: xedge a b\n ret }");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn lex_error_is_reported() {
        let result = parse("fn f() { e: ret $ }");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn instruction_outside_block_is_error() {
        let result = parse("fn f() { ret }");
        assert!(!result.errors.is_empty());
    }
}
