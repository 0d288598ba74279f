// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by the front end (lex/parse/lower) and by
// realization. Realization errors are reported against a function rather
// than a source span, so both locations are optional.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `W0300`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // Front end
    pub const E0001: DiagCode = DiagCode("E0001"); // syntax error
    pub const E0002: DiagCode = DiagCode("E0002"); // unexpected character

    // Lowering
    pub const E0100: DiagCode = DiagCode("E0100"); // unknown value
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown block label
    pub const E0102: DiagCode = DiagCode("E0102"); // duplicate value definition
    pub const E0103: DiagCode = DiagCode("E0103"); // duplicate block label
    pub const E0104: DiagCode = DiagCode("E0104"); // block without terminator
    pub const E0105: DiagCode = DiagCode("E0105"); // terminator in the middle of a block
    pub const E0106: DiagCode = DiagCode("E0106"); // duplicate function name
    pub const E0107: DiagCode = DiagCode("E0107"); // `end` does not close a `begin`
    pub const E0108: DiagCode = DiagCode("E0108"); // lowered IR failed well-formedness checks
    pub const E0109: DiagCode = DiagCode("E0109"); // `begin` not closed by exactly one `end`

    // Realization
    pub const E0200: DiagCode = DiagCode("E0200"); // edge names an unknown action
    pub const E0201: DiagCode = DiagCode("E0201"); // duplicate action name
    pub const E0300: DiagCode = DiagCode("E0300"); // constraint solver failure
    pub const E0301: DiagCode = DiagCode("E0301"); // requested solver not compiled in
    pub const E0400: DiagCode = DiagCode("E0400"); // plan verification failed
    pub const E0401: DiagCode = DiagCode("E0401"); // realized IR failed well-formedness checks

    // Warnings
    pub const W0200: DiagCode = DiagCode("W0200"); // action never referenced by an edge
    pub const W0300: DiagCode = DiagCode("W0300"); // frequency model fell back to loop depth
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    /// Function the diagnostic belongs to, when known.
    pub function: Option<String>,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, location, hint, or related spans.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            function: None,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the primary source span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach the enclosing function name.
    pub fn in_function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(func) = &self.function {
            write!(f, "\n  in function `{}`", func)?;
        }
        if let Some(span) = &self.span {
            write!(f, "\n  at bytes {}..{}", span.start(), span.end())?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
