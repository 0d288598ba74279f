// smt — Constraint problems, solver backends and cost minimization
//
// A `Problem` is an assertion stack over boolean and integer variables.
// Backends are stateless: every query hands them the whole stack. The
// built-in backend is exact for what the planners pose (boolean formulas
// under pseudo-boolean cost bounds, and homogeneous integer flow systems);
// Z3 handles anything, when compiled in.
//
// Preconditions: constraints only mention variables created by the same
//   problem.
// Postconditions: `minimize` returns a model of minimum cost or an error.
// Failure modes: `SolverError` for unsat, unknown, or unavailable backends.
// Side effects: binary search pushes and pops the problem's stack.

pub mod builtin;
pub mod formula;
#[cfg(feature = "z3")]
pub mod z3_backend;

pub use formula::{Formula, IntVar, Var};

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    #[error("constraints are unsatisfiable")]
    Unsat,
    #[error("solver gave up (unknown)")]
    Unknown,
    #[error("the `{0}` backend was not compiled in (rebuild with `--features {0}`)")]
    Unavailable(&'static str),
    #[error("the built-in backend cannot solve this problem: {0}")]
    Unsupported(String),
}

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[value(name = "builtin")]
    BuiltIn,
    Z3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Search {
    /// The backend's own optimizer.
    #[default]
    Native,
    /// Find an upper bound, then bisect the cost bound.
    #[value(name = "binary")]
    BinarySearch,
}

// ── Problems ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Holds(Formula),
    /// Σ weight over true variables ≤ bound.
    CostAtMost { terms: Vec<(Var, u64)>, bound: u64 },
    /// Σ coefficient × variable = constant.
    LinearEq { terms: Vec<(IntVar, i64)>, constant: i64 },
    AtLeast { var: IntVar, bound: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct Problem {
    bool_names: Vec<String>,
    int_names: Vec<String>,
    assertions: Vec<Constraint>,
    scopes: Vec<usize>,
}

impl Problem {
    pub fn new() -> Self {
        Problem::default()
    }

    pub fn bool_var(&mut self, name: impl Into<String>) -> Var {
        self.bool_names.push(name.into());
        Var(self.bool_names.len() as u32 - 1)
    }

    pub fn int_var(&mut self, name: impl Into<String>) -> IntVar {
        self.int_names.push(name.into());
        IntVar(self.int_names.len() as u32 - 1)
    }

    pub fn assert(&mut self, constraint: Constraint) {
        self.assertions.push(constraint);
    }

    pub fn push(&mut self) {
        self.scopes.push(self.assertions.len());
    }

    /// Drop every assertion made since the matching `push`.
    pub fn pop(&mut self) {
        let mark = self.scopes.pop().unwrap_or(0);
        self.assertions.truncate(mark);
    }

    pub fn assertions(&self) -> &[Constraint] {
        &self.assertions
    }

    pub fn num_bools(&self) -> usize {
        self.bool_names.len()
    }

    pub fn num_ints(&self) -> usize {
        self.int_names.len()
    }

    pub fn bool_name(&self, v: Var) -> &str {
        &self.bool_names[v.index()]
    }

    pub fn int_name(&self, v: IntVar) -> &str {
        &self.int_names[v.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Model {
    pub bools: Vec<bool>,
    pub ints: Vec<i64>,
}

impl Model {
    pub fn bool(&self, v: Var) -> bool {
        self.bools.get(v.index()).copied().unwrap_or(false)
    }

    pub fn int(&self, v: IntVar) -> i64 {
        self.ints.get(v.index()).copied().unwrap_or(0)
    }

    pub fn cost(&self, terms: &[(Var, u64)]) -> u64 {
        terms
            .iter()
            .filter(|(v, _)| self.bool(*v))
            .map(|(_, w)| *w)
            .sum()
    }

    /// True if the model satisfies every assertion of `problem`.
    pub fn satisfies(&self, problem: &Problem) -> bool {
        problem.assertions().iter().all(|c| match c {
            Constraint::Holds(f) => f.eval(&|v| self.bool(v)),
            Constraint::CostAtMost { terms, bound } => self.cost(terms) <= *bound,
            Constraint::LinearEq { terms, constant } => {
                terms.iter().map(|(v, c)| c * self.int(*v)).sum::<i64>() == *constant
            }
            Constraint::AtLeast { var, bound } => self.int(*var) >= *bound,
        })
    }
}

// ── Backends ────────────────────────────────────────────────────────────

pub trait Backend {
    fn name(&self) -> &'static str;

    /// A model of every assertion, or `None` if there is none.
    fn check(&mut self, problem: &Problem) -> Result<Option<Model>, SolverError>;

    /// A model of every assertion minimizing `cost`, or `None`.
    fn minimize(
        &mut self,
        problem: &Problem,
        cost: &[(Var, u64)],
    ) -> Result<Option<Model>, SolverError>;
}

pub fn make_backend(kind: BackendKind) -> Result<Box<dyn Backend + Send>, SolverError> {
    match kind {
        BackendKind::BuiltIn => Ok(Box::new(builtin::BuiltIn::new())),
        #[cfg(feature = "z3")]
        BackendKind::Z3 => Ok(Box::new(z3_backend::Z3Backend::new())),
        #[cfg(not(feature = "z3"))]
        BackendKind::Z3 => Err(SolverError::Unavailable("z3")),
    }
}

// ── Minimization ────────────────────────────────────────────────────────

/// Smallest `x` in `[lo, hi]` with `pred(x)`, assuming `pred` is monotone
/// and `pred(hi)` holds.
pub fn find_first_true<E>(
    mut lo: u64,
    mut hi: u64,
    mut pred: impl FnMut(u64) -> Result<bool, E>,
) -> Result<u64, E> {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid)? {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

/// Minimum-cost model of `problem`, with its cost.
pub fn minimize(
    backend: &mut dyn Backend,
    problem: &mut Problem,
    cost: &[(Var, u64)],
    search: Search,
) -> Result<(Model, u64), SolverError> {
    match search {
        Search::Native => {
            let model = backend
                .minimize(problem, cost)?
                .ok_or(SolverError::Unsat)?;
            let total = model.cost(cost);
            Ok((model, total))
        }
        Search::BinarySearch => {
            let first = backend.check(problem)?.ok_or(SolverError::Unsat)?;
            let upper = first.cost(cost);
            tracing::debug!(backend = backend.name(), upper, "found upper bound");
            let mut best = first;
            let lowest = find_first_true(0, upper, |bound| {
                tracing::debug!("trying cost {bound}");
                problem.push();
                problem.assert(Constraint::CostAtMost {
                    terms: cost.to_vec(),
                    bound,
                });
                let result = backend.check(problem);
                problem.pop();
                match result? {
                    Some(model) => {
                        best = model;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            })?;
            debug_assert_eq!(best.cost(cost), lowest);
            Ok((best, lowest))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_true_finds_threshold() {
        let r: Result<u64, ()> = find_first_true(0, 100, |x| Ok(x * x >= 50));
        assert_eq!(r, Ok(8));
        let r: Result<u64, ()> = find_first_true(0, 0, |_| Ok(true));
        assert_eq!(r, Ok(0));
    }

    #[test]
    fn push_pop_restores_assertions() {
        let mut p = Problem::new();
        let a = p.bool_var("a");
        p.assert(Constraint::Holds(Formula::var(a)));
        p.push();
        p.assert(Constraint::Holds(Formula::not(Formula::var(a))));
        assert_eq!(p.assertions().len(), 2);
        p.pop();
        assert_eq!(p.assertions().len(), 1);
        assert_eq!(p.bool_name(a), "a");
    }

    /// Choose at least one of three weighted options, then two of them.
    fn choice_problem() -> (Problem, Vec<(Var, u64)>) {
        let mut p = Problem::new();
        let vars: Vec<Var> = ["x", "y", "z"].iter().map(|n| p.bool_var(*n)).collect();
        let f = |v: Var| Formula::var(v);
        p.assert(Constraint::Holds(Formula::or(vars.iter().map(|&v| f(v)))));
        p.assert(Constraint::Holds(Formula::or([f(vars[0]), f(vars[1])])));
        p.assert(Constraint::Holds(Formula::or([f(vars[1]), f(vars[2])])));
        p.assert(Constraint::Holds(Formula::or([f(vars[0]), f(vars[2])])));
        let cost = vec![(vars[0], 5), (vars[1], 3), (vars[2], 4)];
        (p, cost)
    }

    fn assert_searches_agree(backend: &mut dyn Backend) {
        for search in [Search::Native, Search::BinarySearch] {
            let (mut p, cost) = choice_problem();
            let (model, total) = minimize(backend, &mut p, &cost, search).unwrap();
            assert_eq!(total, 7, "{} {search:?}", backend.name());
            assert!(model.satisfies(&p));
            assert!(model.bool(Var(1)) && model.bool(Var(2)));
            assert_eq!(p.assertions().len(), 4);
        }
    }

    #[test]
    fn both_searches_agree() {
        assert_searches_agree(&mut builtin::BuiltIn::new());
    }

    #[cfg(feature = "z3")]
    #[test]
    fn both_searches_agree_on_z3() {
        assert_searches_agree(&mut z3_backend::Z3Backend::new());
    }

    #[cfg(feature = "z3")]
    #[test]
    fn z3_and_builtin_find_the_same_optimum() {
        let (p, cost) = choice_problem();
        let z3 = z3_backend::Z3Backend::new().minimize(&p, &cost).unwrap().unwrap();
        let own = builtin::BuiltIn::new().minimize(&p, &cost).unwrap().unwrap();
        assert_eq!(z3.cost(&cost), own.cost(&cost));
        assert!(z3.satisfies(&p));
    }

    #[test]
    fn unsat_is_an_error() {
        let mut p = Problem::new();
        let a = p.bool_var("a");
        p.assert(Constraint::Holds(Formula::var(a)));
        p.assert(Constraint::Holds(Formula::not(Formula::var(a))));
        let mut backend = builtin::BuiltIn::new();
        assert_eq!(
            minimize(&mut backend, &mut p, &[], Search::BinarySearch).unwrap_err(),
            SolverError::Unsat
        );
    }

    #[cfg(not(feature = "z3"))]
    #[test]
    fn z3_unavailable_without_feature() {
        assert!(matches!(
            make_backend(BackendKind::Z3),
            Err(SolverError::Unavailable("z3"))
        ));
    }
}
