// z3_backend.rs — Z3 backend
//
// Only available when compiled with `--features z3` (needs libz3 on the
// build host). Each query builds a fresh context, so the backend holds no
// Z3 state between calls and stays `Send`.

use z3::ast::{Ast, Bool, Int};
use z3::{Config, Context, Optimize, SatResult, Solver};

use super::{Backend, Constraint, Formula, Model, Problem, SolverError, Var};

#[derive(Debug, Clone, Default)]
pub struct Z3Backend;

impl Z3Backend {
    pub fn new() -> Self {
        Z3Backend
    }

    fn context(&self) -> Context {
        Context::new(&Config::new())
    }
}

struct Encoded<'ctx> {
    bools: Vec<Bool<'ctx>>,
    ints: Vec<Int<'ctx>>,
    assertions: Vec<Bool<'ctx>>,
}

fn encode<'ctx>(ctx: &'ctx Context, problem: &Problem) -> Encoded<'ctx> {
    let bools: Vec<Bool<'ctx>> = (0..problem.num_bools())
        .map(|i| Bool::new_const(ctx, problem.bool_name(Var(i as u32))))
        .collect();
    let ints: Vec<Int<'ctx>> = (0..problem.num_ints())
        .map(|i| Int::new_const(ctx, problem.int_name(super::IntVar(i as u32))))
        .collect();
    let mut assertions = Vec::new();
    for c in problem.assertions() {
        let a = match c {
            Constraint::Holds(f) => formula(ctx, &bools, f),
            Constraint::CostAtMost { terms, bound } => {
                cost_term(ctx, &bools, terms).le(&Int::from_u64(ctx, *bound))
            }
            Constraint::LinearEq { terms, constant } => {
                let products: Vec<Int<'ctx>> = terms
                    .iter()
                    .map(|(v, c)| Int::mul(ctx, &[&ints[v.index()], &Int::from_i64(ctx, *c)]))
                    .collect();
                let refs: Vec<&Int<'ctx>> = products.iter().collect();
                Int::add(ctx, &refs)._eq(&Int::from_i64(ctx, *constant))
            }
            Constraint::AtLeast { var, bound } => {
                ints[var.index()].ge(&Int::from_i64(ctx, *bound))
            }
        };
        assertions.push(a);
    }
    Encoded {
        bools,
        ints,
        assertions,
    }
}

fn formula<'ctx>(ctx: &'ctx Context, bools: &[Bool<'ctx>], f: &Formula) -> Bool<'ctx> {
    match f {
        Formula::Const(b) => Bool::from_bool(ctx, *b),
        Formula::Var(v) => bools[v.index()].clone(),
        Formula::Not(g) => formula(ctx, bools, g).not(),
        Formula::And(fs) | Formula::Or(fs) => {
            let parts: Vec<Bool<'ctx>> = fs.iter().map(|g| formula(ctx, bools, g)).collect();
            let refs: Vec<&Bool<'ctx>> = parts.iter().collect();
            if matches!(f, Formula::And(_)) {
                Bool::and(ctx, &refs)
            } else {
                Bool::or(ctx, &refs)
            }
        }
        Formula::Iff(a, b) => formula(ctx, bools, a).iff(&formula(ctx, bools, b)),
    }
}

fn cost_term<'ctx>(ctx: &'ctx Context, bools: &[Bool<'ctx>], terms: &[(Var, u64)]) -> Int<'ctx> {
    let zero = Int::from_u64(ctx, 0);
    let parts: Vec<Int<'ctx>> = terms
        .iter()
        .map(|(v, w)| bools[v.index()].ite(&Int::from_u64(ctx, *w), &zero))
        .collect();
    let refs: Vec<&Int<'ctx>> = parts.iter().collect();
    if refs.is_empty() {
        zero
    } else {
        Int::add(ctx, &refs)
    }
}

fn read_model(model: &z3::Model<'_>, enc: &Encoded<'_>) -> Model {
    Model {
        bools: enc
            .bools
            .iter()
            .map(|b| model.eval(b, true).and_then(|x| x.as_bool()).unwrap_or(false))
            .collect(),
        ints: enc
            .ints
            .iter()
            .map(|i| model.eval(i, true).and_then(|x| x.as_i64()).unwrap_or(0))
            .collect(),
    }
}

impl Backend for Z3Backend {
    fn name(&self) -> &'static str {
        "z3"
    }

    fn check(&mut self, problem: &Problem) -> Result<Option<Model>, SolverError> {
        let ctx = self.context();
        let enc = encode(&ctx, problem);
        let solver = Solver::new(&ctx);
        for a in &enc.assertions {
            solver.assert(a);
        }
        match solver.check() {
            SatResult::Sat => Ok(solver.get_model().map(|m| read_model(&m, &enc))),
            SatResult::Unsat => Ok(None),
            SatResult::Unknown => Err(SolverError::Unknown),
        }
    }

    fn minimize(
        &mut self,
        problem: &Problem,
        cost: &[(Var, u64)],
    ) -> Result<Option<Model>, SolverError> {
        let ctx = self.context();
        let enc = encode(&ctx, problem);
        let opt = Optimize::new(&ctx);
        for a in &enc.assertions {
            opt.assert(a);
        }
        opt.minimize(&cost_term(&ctx, &enc.bools, cost));
        match opt.check(&[]) {
            SatResult::Sat => Ok(opt.get_model().map(|m| read_model(&m, &enc))),
            SatResult::Unsat => Ok(None),
            SatResult::Unknown => Err(SolverError::Unknown),
        }
    }
}
