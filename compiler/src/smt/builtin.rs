// builtin.rs — Exact in-process backend
//
// Boolean part: Tseitin encoding to CNF, solved by varisat's CDCL solver.
// Cost bounds become a binary adder network over the weighted terms plus a
// lexicographic comparator against the bound. Minimization takes the first
// model's cost as the upper bound and bisects it, each step adding one
// comparator behind a fresh guard literal that is assumed for that solve
// and retired afterwards, so learnt clauses carry over between steps.
//
// Integer part: Gauss-Jordan elimination over exact rationals. Homogeneous
// systems (every constant zero) get each free variable set to 1 when its
// equations connect it to a lower-bounded variable and 0 otherwise, then
// the solution is scaled to the smallest integral one meeting the lower
// bounds. Anything else must come out integral without scaling, or the
// backend reports `Unsupported`.

use varisat::ExtendFormula;

use super::{Backend, Constraint, Formula, Model, Problem, SolverError, Var};

#[derive(Debug, Clone, Default)]
pub struct BuiltIn;

impl BuiltIn {
    pub fn new() -> Self {
        BuiltIn
    }
}

/// CNF of every `Holds` and `CostAtMost` assertion.
fn boolean_part(problem: &Problem) -> Cnf {
    let mut cnf = Cnf::new(problem.num_bools());
    for c in problem.assertions() {
        match c {
            Constraint::Holds(f) => cnf.assert_formula(f),
            Constraint::CostAtMost { terms, bound } => {
                let sum = cnf.weighted_sum(&cost_terms(terms));
                cnf.at_most(&sum, *bound, None);
            }
            Constraint::LinearEq { .. } | Constraint::AtLeast { .. } => {}
        }
    }
    cnf
}

fn cost_terms(terms: &[(Var, u64)]) -> Vec<(Lit, u64)> {
    terms
        .iter()
        .filter(|(_, w)| *w > 0)
        .map(|&(v, w)| (Lit::pos(v.0), w))
        .collect()
}

fn cost_of(bools: &[bool], cost: &[(Var, u64)]) -> u64 {
    cost.iter()
        .filter(|(v, _)| bools.get(v.index()).copied().unwrap_or(false))
        .map(|(_, w)| *w)
        .sum()
}

impl Backend for BuiltIn {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn check(&mut self, problem: &Problem) -> Result<Option<Model>, SolverError> {
        let Some(ints) = solve_linear(problem)? else {
            return Ok(None);
        };
        let cnf = boolean_part(problem);
        let mut sat = Sat::new();
        sat.load(&cnf);
        Ok(sat
            .solve(&[], problem.num_bools())?
            .map(|bools| Model { bools, ints }))
    }

    fn minimize(
        &mut self,
        problem: &Problem,
        cost: &[(Var, u64)],
    ) -> Result<Option<Model>, SolverError> {
        let Some(ints) = solve_linear(problem)? else {
            return Ok(None);
        };
        let mut cnf = boolean_part(problem);
        let sum = cnf.weighted_sum(&cost_terms(cost));
        let mut sat = Sat::new();
        sat.load(&cnf);
        let Some(mut best) = sat.solve(&[], problem.num_bools())? else {
            return Ok(None);
        };

        let mut hi = cost_of(&best, cost);
        let mut lo = 0;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let guard = Lit::pos(cnf.fresh());
            cnf.at_most(&sum, mid, Some(guard));
            sat.load(&cnf);
            match sat.solve(&[guard], problem.num_bools())? {
                Some(bools) => {
                    hi = cost_of(&bools, cost);
                    best = bools;
                }
                None => lo = mid + 1,
            }
            tracing::trace!(lo, hi, "cost bound bisected");
            cnf.clauses.push(vec![guard.negate()]);
        }
        Ok(Some(Model { bools: best, ints }))
    }
}

// ── CNF ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Lit {
    var: u32,
    neg: bool,
}

impl Lit {
    fn pos(var: u32) -> Lit {
        Lit { var, neg: false }
    }

    fn negate(self) -> Lit {
        Lit {
            var: self.var,
            neg: !self.neg,
        }
    }

    fn to_sat(self) -> varisat::Lit {
        let lit = varisat::Lit::positive(varisat::Var::from_index(self.var as usize));
        if self.neg {
            !lit
        } else {
            lit
        }
    }
}

#[derive(Debug, Default)]
struct Cnf {
    num_vars: u32,
    clauses: Vec<Vec<Lit>>,
    falsum: Option<Lit>,
}

impl Cnf {
    fn new(problem_vars: usize) -> Self {
        Cnf {
            num_vars: problem_vars as u32,
            ..Cnf::default()
        }
    }

    fn fresh(&mut self) -> u32 {
        self.num_vars += 1;
        self.num_vars - 1
    }

    /// A literal that is always false.
    fn falsum(&mut self) -> Lit {
        if let Some(l) = self.falsum {
            return l;
        }
        let l = Lit::pos(self.fresh());
        self.clauses.push(vec![l.negate()]);
        self.falsum = Some(l);
        l
    }

    fn assert_formula(&mut self, f: &Formula) {
        match f {
            Formula::Const(true) => {}
            Formula::Const(false) => self.clauses.push(Vec::new()),
            Formula::And(fs) => fs.iter().for_each(|g| self.assert_formula(g)),
            Formula::Or(fs) => {
                let clause = fs.iter().map(|g| self.literal(g)).collect();
                self.clauses.push(clause);
            }
            f => {
                let l = self.literal(f);
                self.clauses.push(vec![l]);
            }
        }
    }

    /// A literal equivalent to `f`, defining auxiliaries as needed.
    fn literal(&mut self, f: &Formula) -> Lit {
        match f {
            Formula::Var(v) => Lit::pos(v.0),
            Formula::Not(g) => self.literal(g).negate(),
            Formula::Const(b) => {
                let f = self.falsum();
                if *b {
                    f.negate()
                } else {
                    f
                }
            }
            Formula::And(fs) => {
                let lits: Vec<Lit> = fs.iter().map(|g| self.literal(g)).collect();
                let a = Lit::pos(self.fresh());
                let mut back = vec![a];
                for &l in &lits {
                    self.clauses.push(vec![a.negate(), l]);
                    back.push(l.negate());
                }
                self.clauses.push(back);
                a
            }
            Formula::Or(fs) => {
                let lits: Vec<Lit> = fs.iter().map(|g| self.literal(g)).collect();
                let a = Lit::pos(self.fresh());
                let mut forth = vec![a.negate()];
                for &l in &lits {
                    self.clauses.push(vec![a, l.negate()]);
                    forth.push(l);
                }
                self.clauses.push(forth);
                a
            }
            Formula::Iff(x, y) => {
                let p = self.literal(x);
                let q = self.literal(y);
                let t = Lit::pos(self.fresh());
                self.clauses.push(vec![t.negate(), p.negate(), q]);
                self.clauses.push(vec![t.negate(), p, q.negate()]);
                self.clauses.push(vec![t, p, q]);
                self.clauses.push(vec![t, p.negate(), q.negate()]);
                t
            }
        }
    }

    // ── Cost arithmetic ─────────────────────────────────────────────────

    /// Sum and carry of two bits.
    fn half_adder(&mut self, a: Lit, b: Lit) -> (Lit, Lit) {
        let s = Lit::pos(self.fresh());
        let c = Lit::pos(self.fresh());
        self.clauses.push(vec![a.negate(), b.negate(), s.negate()]);
        self.clauses.push(vec![a, b, s.negate()]);
        self.clauses.push(vec![a, b.negate(), s]);
        self.clauses.push(vec![a.negate(), b, s]);
        self.clauses.push(vec![c.negate(), a]);
        self.clauses.push(vec![c.negate(), b]);
        self.clauses.push(vec![a.negate(), b.negate(), c]);
        (s, c)
    }

    /// Sum and carry of three bits.
    fn full_adder(&mut self, a: Lit, b: Lit, x: Lit) -> (Lit, Lit) {
        let s = Lit::pos(self.fresh());
        let c = Lit::pos(self.fresh());
        let inputs = [a, b, x];
        for row in 0u32..8 {
            // One clause per input row: inputs equal to `row` fix the sum.
            let mut clause: Vec<Lit> = inputs
                .iter()
                .enumerate()
                .map(|(i, &l)| if row >> i & 1 == 1 { l.negate() } else { l })
                .collect();
            clause.push(if row.count_ones() % 2 == 1 { s } else { s.negate() });
            self.clauses.push(clause);
        }
        for (p, q) in [(a, b), (a, x), (b, x)] {
            self.clauses.push(vec![p.negate(), q.negate(), c]);
            self.clauses.push(vec![p, q, c.negate()]);
        }
        (s, c)
    }

    /// Bits of Σ weight over true literals, least significant first.
    fn weighted_sum(&mut self, terms: &[(Lit, u64)]) -> Vec<Lit> {
        let mut columns: Vec<Vec<Lit>> = Vec::new();
        for &(l, w) in terms {
            for bit in (0..64usize).filter(|&b| w >> b & 1 == 1) {
                if columns.len() <= bit {
                    columns.resize_with(bit + 1, Vec::new);
                }
                columns[bit].push(l);
            }
        }
        let mut bits = Vec::with_capacity(columns.len());
        let mut k = 0;
        while k < columns.len() {
            while columns[k].len() > 1 {
                let a = columns[k].remove(0);
                let b = columns[k].remove(0);
                let (s, c) = if columns[k].is_empty() {
                    self.half_adder(a, b)
                } else {
                    let x = columns[k].remove(0);
                    self.full_adder(a, b, x)
                };
                columns[k].push(s);
                if columns.len() == k + 1 {
                    columns.push(Vec::new());
                }
                columns[k + 1].push(c);
            }
            let bit = match columns[k].first() {
                Some(&l) => l,
                None => self.falsum(),
            };
            bits.push(bit);
            k += 1;
        }
        bits
    }

    /// Constrain the number `bits` encodes to at most `bound`, only while
    /// `guard` holds when one is given.
    fn at_most(&mut self, bits: &[Lit], bound: u64, guard: Option<Lit>) {
        let bound_bit = |i: usize| i < 64 && bound >> i & 1 == 1;
        if bits.len() < 64 && bound >> bits.len() != 0 {
            return;
        }
        // The sum exceeds the bound iff, at the highest bit where they
        // differ, the sum has 1 and the bound 0. Rule out each such bit.
        for i in (0..bits.len()).filter(|&i| !bound_bit(i)) {
            let mut clause: Vec<Lit> = guard.map(Lit::negate).into_iter().collect();
            clause.push(bits[i].negate());
            for (j, &b) in bits.iter().enumerate().skip(i + 1) {
                clause.push(if bound_bit(j) { b.negate() } else { b });
            }
            self.clauses.push(clause);
        }
    }
}

// ── SAT ─────────────────────────────────────────────────────────────────

/// A varisat solver fed incrementally from a growing `Cnf`.
struct Sat {
    solver: varisat::Solver<'static>,
    loaded: usize,
    conflict: bool,
}

impl Sat {
    fn new() -> Self {
        Sat {
            solver: varisat::Solver::new(),
            loaded: 0,
            conflict: false,
        }
    }

    /// Hand over the clauses added since the last load.
    fn load(&mut self, cnf: &Cnf) {
        for clause in &cnf.clauses[self.loaded..] {
            if clause.is_empty() {
                self.conflict = true;
                continue;
            }
            let lits: Vec<varisat::Lit> = clause.iter().map(|l| l.to_sat()).collect();
            self.solver.add_clause(&lits);
        }
        self.loaded = cnf.clauses.len();
    }

    /// Values of the first `num_bools` variables in a model under
    /// `assumptions`, or `None` if there is none.
    fn solve(
        &mut self,
        assumptions: &[Lit],
        num_bools: usize,
    ) -> Result<Option<Vec<bool>>, SolverError> {
        if self.conflict {
            return Ok(None);
        }
        let assumed: Vec<varisat::Lit> = assumptions.iter().map(|l| l.to_sat()).collect();
        self.solver.assume(&assumed);
        let sat = self.solver.solve().map_err(|err| {
            tracing::debug!(?err, "varisat failed");
            SolverError::Unknown
        })?;
        if !sat {
            return Ok(None);
        }
        let mut bools = vec![false; num_bools];
        for lit in self.solver.model().unwrap_or_default() {
            let v = lit.var().index();
            if v < num_bools {
                bools[v] = lit.is_positive();
            }
        }
        Ok(Some(bools))
    }
}

// ── Linear integer systems ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ratio {
    num: i128,
    den: i128,
}

fn gcd(a: i128, b: i128) -> i128 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl Ratio {
    const ZERO: Ratio = Ratio { num: 0, den: 1 };

    fn new(num: i128, den: i128) -> Ratio {
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num, den).max(1);
        Ratio {
            num: sign * num / g,
            den: sign * den / g,
        }
    }

    fn int(n: i64) -> Ratio {
        Ratio::new(n as i128, 1)
    }

    fn is_zero(self) -> bool {
        self.num == 0
    }

    fn sub(self, o: Ratio) -> Ratio {
        Ratio::new(self.num * o.den - o.num * self.den, self.den * o.den)
    }

    fn mul(self, o: Ratio) -> Ratio {
        Ratio::new(self.num * o.num, self.den * o.den)
    }

    fn div(self, o: Ratio) -> Ratio {
        Ratio::new(self.num * o.den, self.den * o.num)
    }
}

fn unsupported(what: &str) -> SolverError {
    SolverError::Unsupported(what.to_string())
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

/// Per variable: whether some equation chain links it to a variable with
/// a lower bound. Unlinked parts of a homogeneous system stay at 0.
fn anchored_components(n: usize, rows: &[Vec<Ratio>], lower: &[Option<i64>]) -> Vec<bool> {
    let mut parent: Vec<usize> = (0..n).collect();
    for row in rows {
        let mut vars = (0..n).filter(|&v| !row[v].is_zero());
        let Some(first) = vars.next() else { continue };
        for v in vars {
            let (a, b) = (find(&mut parent, first), find(&mut parent, v));
            parent[a] = b;
        }
    }
    let mut bounded = vec![false; n];
    for v in (0..n).filter(|&v| lower[v].is_some()) {
        let root = find(&mut parent, v);
        bounded[root] = true;
    }
    (0..n).map(|v| bounded[find(&mut parent, v)]).collect()
}

/// Integer assignment for every `LinearEq`/`AtLeast`, `None` if the
/// system has no solution of the shape this backend looks for.
fn solve_linear(problem: &Problem) -> Result<Option<Vec<i64>>, SolverError> {
    let n = problem.num_ints();
    let mut rows: Vec<Vec<Ratio>> = Vec::new();
    let mut lower: Vec<Option<i64>> = vec![None; n];
    for c in problem.assertions() {
        match c {
            Constraint::LinearEq { terms, constant } => {
                let mut row = vec![Ratio::ZERO; n + 1];
                for &(v, coef) in terms {
                    let cell = &mut row[v.index()];
                    *cell = Ratio::new(cell.num + coef as i128 * cell.den, cell.den);
                }
                row[n] = Ratio::int(*constant);
                rows.push(row);
            }
            Constraint::AtLeast { var, bound } => {
                let slot = &mut lower[var.index()];
                *slot = Some(slot.map_or(*bound, |b| b.max(*bound)));
            }
            _ => {}
        }
    }
    if n == 0 {
        return Ok(Some(Vec::new()));
    }
    let homogeneous = rows.iter().all(|r| r[n].is_zero());
    let anchored = anchored_components(n, &rows, &lower);

    // Gauss-Jordan to reduced row echelon form.
    let mut pivots: Vec<usize> = Vec::new();
    let mut rank = 0;
    for col in 0..n {
        let Some(r) = (rank..rows.len()).find(|&r| !rows[r][col].is_zero()) else {
            continue;
        };
        rows.swap(rank, r);
        let p = rows[rank][col];
        for x in rows[rank].iter_mut() {
            *x = x.div(p);
        }
        for r in 0..rows.len() {
            if r != rank && !rows[r][col].is_zero() {
                let factor = rows[r][col];
                for c in 0..=n {
                    let sub = rows[rank][c].mul(factor);
                    rows[r][c] = rows[r][c].sub(sub);
                }
            }
        }
        pivots.push(col);
        rank += 1;
    }
    if rows[rank..].iter().any(|r| !r[n].is_zero()) {
        return Ok(None);
    }

    let mut values = vec![Ratio::ZERO; n];
    for v in (0..n).filter(|v| !pivots.contains(v)) {
        let seed = if homogeneous {
            i64::from(anchored[v])
        } else {
            lower[v].map_or(0, |b| b.max(0))
        };
        values[v] = Ratio::int(seed);
    }
    for (r, &col) in pivots.iter().enumerate() {
        let mut x = rows[r][n];
        for c in (0..n).filter(|c| !pivots.contains(c)) {
            x = x.sub(rows[r][c].mul(values[c]));
        }
        values[col] = x;
    }

    let ints: Vec<i128> = if homogeneous {
        let lcm = values
            .iter()
            .fold(1i128, |acc, x| acc / gcd(acc, x.den) * x.den);
        let mut ints: Vec<i128> = values.iter().map(|x| x.num * (lcm / x.den)).collect();
        let g = ints.iter().fold(0i128, |acc, &x| gcd(acc, x));
        if g > 1 {
            ints.iter_mut().for_each(|x| *x /= g);
        }
        let mut scale = 1i128;
        for (v, bound) in lower.iter().enumerate() {
            let Some(bound) = *bound else { continue };
            let x = ints[v];
            if x >= bound as i128 {
                continue;
            }
            if x <= 0 {
                return Ok(None);
            }
            scale = scale.max((bound as i128 + x - 1) / x);
        }
        ints.into_iter().map(|x| x * scale).collect()
    } else {
        if values.iter().any(|x| x.den != 1) {
            return Err(unsupported("non-integral solution of an inhomogeneous system"));
        }
        let ints: Vec<i128> = values.iter().map(|x| x.num).collect();
        if lower
            .iter()
            .enumerate()
            .any(|(v, b)| b.is_some_and(|b| ints[v] < b as i128))
        {
            return Err(unsupported("lower bound on a dependent variable"));
        }
        ints
    };

    ints.into_iter()
        .map(|x| i64::try_from(x).map_err(|_| unsupported("integer overflow")))
        .collect::<Result<Vec<i64>, _>>()
        .map(Some)
}
