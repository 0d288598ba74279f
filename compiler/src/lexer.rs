// Lexer for textual RMC IR (.rir) files.
//
// Tokenizes the hand-off format produced by the annotation pre-pass: SSA
// functions with region markers and edge requests. Uses the `logos` crate for
// DFA-based lexing. Whitespace (including newlines) is insignificant; `#`
// starts a comment that runs to end of line.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// RIR token types.
///
/// Keywords and symbols are matched as fixed strings. Identifiers, local
/// values (`%x`) and globals (`@f`) carry no value; use the span to
/// retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Structure keywords ──
    #[token("fn")]
    Fn,
    #[token("begin")]
    Begin,
    #[token("end")]
    End,
    #[token("give")]
    Give,
    #[token("take")]
    Take,
    #[token("here")]
    Here,
    #[token("xedge")]
    XEdge,
    #[token("vedge")]
    VEdge,
    #[token("pedge")]
    PEdge,

    // ── Instruction keywords ──
    #[token("load")]
    Load,
    #[token("store")]
    Store,
    #[token("rmw")]
    Rmw,
    #[token("cmpxchg")]
    CmpXchg,
    #[token("gep")]
    Gep,
    #[token("cast")]
    Cast,
    #[token("opaque")]
    Opaque,
    #[token("cmp")]
    Cmp,
    #[token("phi")]
    Phi,
    #[token("call")]
    Call,
    #[token("fence")]
    Fence,
    #[token("br")]
    Br,
    #[token("ret")]
    Ret,

    // ── Binary operators (also RMW operations) ──
    #[token("add")]
    Add,
    #[token("sub")]
    Sub,
    #[token("mul")]
    Mul,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("xor")]
    Xor,
    #[token("shl")]
    Shl,
    #[token("xchg")]
    Xchg,

    // ── Comparison predicates ──
    #[token("eq")]
    Eq,
    #[token("ne")]
    Ne,
    #[token("lt")]
    Lt,
    #[token("le")]
    Le,
    #[token("gt")]
    Gt,
    #[token("ge")]
    Ge,

    // ── Memory orderings ──
    #[token("relaxed")]
    Relaxed,
    #[token("acquire")]
    Acquire,
    #[token("release")]
    Release,
    #[token("acq_rel")]
    AcqRel,
    #[token("seq_cst")]
    SeqCst,

    // ── Fence kinds ──
    #[token("sync")]
    Sync,
    #[token("lwsync")]
    Lwsync,
    #[token("isync")]
    Isync,
    #[token("dmb.st")]
    DmbSt,
    #[token("dmb.ld")]
    DmbLd,
    #[token("compiler")]
    Compiler,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // ── Literals ──
    /// Integer literal (decimal, optionally negative).
    #[regex(r"-?[0-9]+", parse_int)]
    Int(i64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Names ──
    /// Local SSA value: `%name`.
    #[regex(r"%[a-zA-Z0-9_.]+")]
    Local,

    /// Global symbol: `@name`.
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_.]*")]
    Global,

    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_.]*`. Dots let split blocks
    /// (`entry.split`) print back as labels.
    ///
    /// Placed after keywords: logos prioritises fixed `#[token]` matches over
    /// regex for the same length, so `load` matches Load, not Ident.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Fn => "fn",
            Token::Begin => "begin",
            Token::End => "end",
            Token::Give => "give",
            Token::Take => "take",
            Token::Here => "here",
            Token::XEdge => "xedge",
            Token::VEdge => "vedge",
            Token::PEdge => "pedge",
            Token::Load => "load",
            Token::Store => "store",
            Token::Rmw => "rmw",
            Token::CmpXchg => "cmpxchg",
            Token::Gep => "gep",
            Token::Cast => "cast",
            Token::Opaque => "opaque",
            Token::Cmp => "cmp",
            Token::Phi => "phi",
            Token::Call => "call",
            Token::Fence => "fence",
            Token::Br => "br",
            Token::Ret => "ret",
            Token::Add => "add",
            Token::Sub => "sub",
            Token::Mul => "mul",
            Token::And => "and",
            Token::Or => "or",
            Token::Xor => "xor",
            Token::Shl => "shl",
            Token::Xchg => "xchg",
            Token::Eq => "eq",
            Token::Ne => "ne",
            Token::Lt => "lt",
            Token::Le => "le",
            Token::Gt => "gt",
            Token::Ge => "ge",
            Token::Relaxed => "relaxed",
            Token::Acquire => "acquire",
            Token::Release => "release",
            Token::AcqRel => "acq_rel",
            Token::SeqCst => "seq_cst",
            Token::Sync => "sync",
            Token::Lwsync => "lwsync",
            Token::Isync => "isync",
            Token::DmbSt => "dmb.st",
            Token::DmbLd => "dmb.ld",
            Token::Compiler => "compiler",
            Token::Arrow => "->",
            Token::Colon => ":",
            Token::Equals => "=",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Int(v) => return write!(f, "{v}"),
            Token::StringLit(s) => return write!(f, "\"{s}\""),
            Token::Local => "<local>",
            Token::Global => "<global>",
            Token::Ident => "<ident>",
        };
        f.write_str(text)
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an RIR source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
