// formula.rs — Boolean formulas over problem variables
//
// Constructors simplify eagerly: constants fold, nested conjunctions and
// disjunctions flatten, double negation cancels. A formula built from a
// disabled cut kind therefore collapses instead of growing.

use std::fmt;

/// Boolean problem variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

impl Var {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer problem variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntVar(pub u32);

impl IntVar {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formula {
    Const(bool),
    Var(Var),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Iff(Box<Formula>, Box<Formula>),
}

impl Formula {
    pub const TRUE: Formula = Formula::Const(true);
    pub const FALSE: Formula = Formula::Const(false);

    pub fn var(v: Var) -> Formula {
        Formula::Var(v)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(f: Formula) -> Formula {
        match f {
            Formula::Const(b) => Formula::Const(!b),
            Formula::Not(inner) => *inner,
            f => Formula::Not(Box::new(f)),
        }
    }

    pub fn and(parts: impl IntoIterator<Item = Formula>) -> Formula {
        let mut out = Vec::new();
        for p in parts {
            match p {
                Formula::Const(true) => {}
                Formula::Const(false) => return Formula::FALSE,
                Formula::And(inner) => out.extend(inner),
                p => out.push(p),
            }
        }
        match out.len() {
            0 => Formula::TRUE,
            1 => out.pop().unwrap_or(Formula::TRUE),
            _ => Formula::And(out),
        }
    }

    pub fn or(parts: impl IntoIterator<Item = Formula>) -> Formula {
        let mut out = Vec::new();
        for p in parts {
            match p {
                Formula::Const(false) => {}
                Formula::Const(true) => return Formula::TRUE,
                Formula::Or(inner) => out.extend(inner),
                p => out.push(p),
            }
        }
        match out.len() {
            0 => Formula::FALSE,
            1 => out.pop().unwrap_or(Formula::FALSE),
            _ => Formula::Or(out),
        }
    }

    pub fn iff(a: Formula, b: Formula) -> Formula {
        match (a, b) {
            (Formula::Const(true), f) | (f, Formula::Const(true)) => f,
            (Formula::Const(false), f) | (f, Formula::Const(false)) => Formula::not(f),
            (a, b) if a == b => Formula::TRUE,
            (a, b) => Formula::Iff(Box::new(a), Box::new(b)),
        }
    }

    pub fn implies(a: Formula, b: Formula) -> Formula {
        Formula::or([Formula::not(a), b])
    }

    pub fn eval(&self, value: &impl Fn(Var) -> bool) -> bool {
        match self {
            Formula::Const(b) => *b,
            Formula::Var(v) => value(*v),
            Formula::Not(f) => !f.eval(value),
            Formula::And(fs) => fs.iter().all(|f| f.eval(value)),
            Formula::Or(fs) => fs.iter().any(|f| f.eval(value)),
            Formula::Iff(a, b) => a.eval(value) == b.eval(value),
        }
    }

    /// Every variable mentioned, in first-occurrence order.
    pub fn vars(&self, out: &mut Vec<Var>) {
        match self {
            Formula::Const(_) => {}
            Formula::Var(v) => {
                if !out.contains(v) {
                    out.push(*v);
                }
            }
            Formula::Not(f) => f.vars(out),
            Formula::And(fs) | Formula::Or(fs) => fs.iter().for_each(|f| f.vars(out)),
            Formula::Iff(a, b) => {
                a.vars(out);
                b.vars(out);
            }
        }
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, op: &str, fs: &[Formula]| -> fmt::Result {
            write!(f, "({op}")?;
            for x in fs {
                write!(f, " {x}")?;
            }
            write!(f, ")")
        };
        match self {
            Formula::Const(b) => write!(f, "{b}"),
            Formula::Var(v) => write!(f, "b{}", v.0),
            Formula::Not(x) => write!(f, "(not {x})"),
            Formula::And(fs) => join(f, "and", fs),
            Formula::Or(fs) => join(f, "or", fs),
            Formula::Iff(a, b) => write!(f, "(= {a} {b})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(i: u32) -> Formula {
        Formula::var(Var(i))
    }

    #[test]
    fn constants_fold() {
        assert_eq!(Formula::and([v(0), Formula::FALSE]), Formula::FALSE);
        assert_eq!(Formula::or([v(0), Formula::FALSE]), v(0));
        assert_eq!(Formula::or([]), Formula::FALSE);
        assert_eq!(Formula::and([]), Formula::TRUE);
        assert_eq!(Formula::iff(Formula::FALSE, v(1)), Formula::not(v(1)));
        assert_eq!(Formula::not(Formula::not(v(2))), v(2));
    }

    #[test]
    fn nested_connectives_flatten() {
        let f = Formula::and([v(0), Formula::and([v(1), v(2)])]);
        assert_eq!(f, Formula::And(vec![v(0), v(1), v(2)]));
        assert_eq!(f.to_string(), "(and b0 b1 b2)");
    }

    #[test]
    fn evaluation() {
        let f = Formula::iff(v(0), Formula::or([v(1), Formula::not(v(2))]));
        assert!(f.eval(&|x: Var| x.0 != 2));
        assert!(!f.eval(&|x: Var| x.0 != 1));
        let mut vars = Vec::new();
        f.vars(&mut vars);
        assert_eq!(vars, vec![Var(0), Var(1), Var(2)]);
    }
}
