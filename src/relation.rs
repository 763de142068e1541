//! Integer relations
//!
//! A [`BasicRelation`] is a conjunction of integer equalities and
//! inequalities over the columns `[params | inputs | outputs | existentials]`.
//! A [`Relation`] is a finite union of basic relations that share the same
//! parameter, input and output arity.
//!
//! Relations are assembled here column by column. Questions about their
//! integer points (emptiness, intersection, injectivity, single-valuedness,
//! fixed values) are answered by isl on the textual form printed by
//! `Display`, e.g. `[p0] -> { [i0] -> [o0] : exists (e0 : o0 - 2*e0 = 0) }`.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use isl_rs::{Context, DimType, Map, Set};

use crate::affine::{floor_div, format_form, LinearForm};
use crate::error::{MappingError, MappingResult};

thread_local! {
    static CTX: Context = Context::alloc();
}

/// Run `f` with this thread's isl context. isl objects must not outlive
/// the closure.
pub(crate) fn with_ctx<T>(f: impl FnOnce(&Context) -> T) -> T {
    CTX.with(|ctx| f(ctx))
}

/// A conjunction of `form == 0` and `form >= 0` rows over `n_cols` columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSystem {
    n_cols: usize,
    eqs: Vec<LinearForm>,
    ineqs: Vec<LinearForm>,
}

impl ConstraintSystem {
    pub fn new(n_cols: usize) -> Self {
        Self {
            n_cols,
            eqs: Vec::new(),
            ineqs: Vec::new(),
        }
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn eqs(&self) -> &[LinearForm] {
        &self.eqs
    }

    pub fn ineqs(&self) -> &[LinearForm] {
        &self.ineqs
    }

    pub fn add_eq(&mut self, form: LinearForm) {
        self.eqs.push(form.resized(self.n_cols));
    }

    pub fn add_ineq(&mut self, form: LinearForm) {
        self.ineqs.push(form.resized(self.n_cols));
    }

    /// Append `count` unconstrained columns and return the first new index.
    pub fn add_cols(&mut self, count: usize) -> usize {
        let first = self.n_cols;
        self.n_cols += count;
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            row.coeffs.resize(self.n_cols, 0);
        }
        first
    }

    /// Drop a column; its coefficients must already be zero.
    pub fn remove_col(&mut self, col: usize) {
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            debug_assert_eq!(row.coeff(col), 0);
            row.remove_col(col);
        }
        self.n_cols -= 1;
    }

    /// Move every row into a new column layout.
    pub fn remap(&self, n_cols: usize, map: impl Fn(usize) -> usize) -> Self {
        Self {
            n_cols,
            eqs: self.eqs.iter().map(|r| r.remap(n_cols, &map)).collect(),
            ineqs: self.ineqs.iter().map(|r| r.remap(n_cols, &map)).collect(),
        }
    }

    /// Append all rows of `other`, which must share this column layout.
    pub fn extend(&mut self, other: &ConstraintSystem) {
        debug_assert_eq!(self.n_cols, other.n_cols);
        self.eqs.extend(other.eqs.iter().cloned());
        self.ineqs.extend(other.ineqs.iter().cloned());
    }

    pub fn involves(&self, col: usize) -> bool {
        self.eqs.iter().chain(self.ineqs.iter()).any(|r| r.involves(col))
    }

    /// Canonicalize rows: divide out the content, drop trivially true rows
    /// and keep the tightest of parallel inequalities. Returns `false` when
    /// a row is trivially contradictory.
    pub fn normalize(&mut self) -> MappingResult<bool> {
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for row in self.eqs.drain(..) {
            let g = row.content();
            if g == 0 {
                if row.constant != 0 {
                    return Ok(false);
                }
                continue;
            }
            if row.constant % g != 0 {
                return Ok(false);
            }
            let mut row = LinearForm {
                coeffs: row.coeffs.iter().map(|c| c / g).collect(),
                constant: row.constant / g,
            };
            if row.coeffs.iter().find(|&&c| c != 0).is_some_and(|&c| c < 0) {
                row = row.negate();
            }
            eqs.push(row);
        }
        eqs.sort_by(|a, b| a.coeffs.cmp(&b.coeffs).then(a.constant.cmp(&b.constant)));
        eqs.dedup();

        let mut tightest: BTreeMap<Vec<i64>, i64> = BTreeMap::new();
        for row in self.ineqs.drain(..) {
            let g = row.content();
            if g == 0 {
                if row.constant < 0 {
                    return Ok(false);
                }
                continue;
            }
            let coeffs: Vec<i64> = row.coeffs.iter().map(|c| c / g).collect();
            let constant = floor_div(row.constant, g);
            tightest
                .entry(coeffs)
                .and_modify(|k| *k = (*k).min(constant))
                .or_insert(constant);
        }
        self.eqs = eqs;
        self.ineqs = tightest
            .into_iter()
            .map(|(coeffs, constant)| LinearForm { coeffs, constant })
            .collect();
        Ok(true)
    }

    /// Substitute `col` away through a unit-coefficient equality.
    fn substitute_col(&mut self, col: usize) -> MappingResult<bool> {
        let Some(idx) = self.eqs.iter().position(|r| r.coeff(col).abs() == 1) else {
            return Ok(false);
        };
        let pivot = self.eqs.swap_remove(idx);
        let c = pivot.coeff(col);
        for row in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            let d = row.coeff(col);
            if d != 0 {
                *row = LinearForm::combine(1, row, -d * c, &pivot)?;
            }
        }
        Ok(true)
    }

    /// Eliminate those of `cols` that have a unit-coefficient equality,
    /// repeatedly. These substitutions are exact over the integers.
    /// Returns the columns that were eliminated.
    pub fn substitute_exact(&mut self, cols: &[usize]) -> MappingResult<Vec<usize>> {
        let mut done = Vec::new();
        while let Some(col) = cols
            .iter()
            .copied()
            .find(|&col| !done.contains(&col) && self.eqs.iter().any(|r| r.coeff(col).abs() == 1))
        {
            self.substitute_col(col)?;
            done.push(col);
        }
        Ok(done)
    }

    fn names(&self) -> Vec<String> {
        (0..self.n_cols).map(|i| format!("x{}", i)).collect()
    }

    /// The rows joined into an isl constraint list, `None` when there are
    /// no rows.
    fn isl_constraints(&self, names: &[String]) -> Option<String> {
        let rows: Vec<String> = self
            .eqs
            .iter()
            .map(|r| format!("{} = 0", format_form(r, names)))
            .chain(self.ineqs.iter().map(|r| format!("{} >= 0", format_form(r, names))))
            .collect();
        (!rows.is_empty()).then(|| rows.join(" and "))
    }

    fn to_set(&self, ctx: &Context) -> Set {
        Set::read_from_str(ctx, &self.to_string())
    }

    pub fn is_empty(&self) -> bool {
        with_ctx(|ctx| self.to_set(ctx).is_empty())
    }

    /// One value `col` takes in some solution. `None` when empty.
    pub fn sample_value(&self, col: usize) -> MappingResult<Option<i64>> {
        with_ctx(|ctx| {
            let point = self.to_set(ctx).sample_point();
            if point.is_void() {
                return Ok(None);
            }
            let val = point.get_coordinate_val(DimType::Set, col as i32);
            if !val.is_int() {
                return Err(MappingError::isl(format!("non-integer sample for column {}", col)));
            }
            Ok(Some(val.get_num_si()))
        })
    }

    /// The value of `col` if it is the same in every solution
    pub fn fixed_value(&self, col: usize) -> MappingResult<Option<i64>> {
        let Some(value) = self.sample_value(col)? else {
            return Ok(None);
        };
        let next = value.checked_add(1).ok_or(MappingError::Overflow)?;
        let prev = value.checked_sub(1).ok_or(MappingError::Overflow)?;
        let x = LinearForm::var(self.n_cols, col);
        // x >= value + 1
        let mut above = self.clone();
        above.add_ineq(x.sub(&LinearForm::constant(self.n_cols, next))?);
        // x <= value - 1
        let mut below = self.clone();
        below.add_ineq(LinearForm::constant(self.n_cols, prev).sub(&x)?);
        Ok((above.is_empty() && below.is_empty()).then_some(value))
    }
}

/// isl set syntax over anonymous columns `x0, x1, ...`
impl fmt::Display for ConstraintSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        write!(f, "{{ [{}]", names.join(", "))?;
        if let Some(rows) = self.isl_constraints(&names) {
            write!(f, " : {}", rows)?;
        }
        write!(f, " }}")
    }
}

/// Column layout of a basic relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dims {
    pub n_param: usize,
    pub n_in: usize,
    pub n_out: usize,
    pub n_div: usize,
}

impl Dims {
    pub fn total(&self) -> usize {
        self.n_param + self.n_in + self.n_out + self.n_div
    }

    pub fn param(&self, i: usize) -> usize {
        i
    }

    pub fn input(&self, i: usize) -> usize {
        self.n_param + i
    }

    pub fn output(&self, i: usize) -> usize {
        self.n_param + self.n_in + i
    }

    pub fn div(&self, i: usize) -> usize {
        self.n_param + self.n_in + self.n_out + i
    }

    /// Number of leading columns (params and inputs) that tile bounds range over
    pub fn outer(&self) -> usize {
        self.n_param + self.n_in
    }

    fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.total());
        names.extend((0..self.n_param).map(|i| format!("p{}", i)));
        names.extend((0..self.n_in).map(|i| format!("i{}", i)));
        names.extend((0..self.n_out).map(|i| format!("o{}", i)));
        names.extend((0..self.n_div).map(|i| format!("e{}", i)));
        names
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, n_param: usize) -> fmt::Result {
    if n_param > 0 {
        let params: Vec<String> = (0..n_param).map(|i| format!("p{}", i)).collect();
        write!(f, "[{}] -> ", params.join(", "))?;
    }
    Ok(())
}

/// A conjunction of affine constraints relating input and output tuples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicRelation {
    dims: Dims,
    system: ConstraintSystem,
}

impl BasicRelation {
    pub fn universe(n_param: usize, n_in: usize, n_out: usize) -> Self {
        let dims = Dims {
            n_param,
            n_in,
            n_out,
            n_div: 0,
        };
        Self {
            dims,
            system: ConstraintSystem::new(dims.total()),
        }
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn system(&self) -> &ConstraintSystem {
        &self.system
    }

    /// A zero form over this relation's columns
    pub fn form(&self) -> LinearForm {
        LinearForm::zero(self.dims.total())
    }

    pub fn add_eq(&mut self, form: LinearForm) {
        self.system.add_eq(form);
    }

    pub fn add_ineq(&mut self, form: LinearForm) {
        self.system.add_ineq(form);
    }

    /// `col_a == col_b`
    pub fn equate(&mut self, col_a: usize, col_b: usize) {
        let mut form = self.form();
        form.coeffs[col_a] += 1;
        form.coeffs[col_b] -= 1;
        self.add_eq(form);
    }

    /// Append an existentially quantified column and return its index.
    pub fn add_div(&mut self) -> usize {
        self.dims.n_div += 1;
        self.system.add_cols(1)
    }

    pub(crate) fn to_map(&self, ctx: &Context) -> Map {
        Map::read_from_str(ctx, &self.to_string())
    }

    pub fn is_empty(&self) -> bool {
        with_ctx(|ctx| self.to_map(ctx).is_empty())
    }

    /// Substitute away existentials defined by unit equalities and drop
    /// unused ones. Returns `false` when a row is trivially contradictory;
    /// use [`BasicRelation::is_empty`] for an exact answer.
    pub fn simplify(&mut self) -> MappingResult<bool> {
        if !self.system.normalize()? {
            return Ok(false);
        }
        let divs: Vec<usize> = (0..self.dims.n_div).map(|d| self.dims.div(d)).collect();
        self.system.substitute_exact(&divs)?;
        if !self.system.normalize()? {
            return Ok(false);
        }
        for d in (0..self.dims.n_div).rev() {
            let col = self.dims.div(d);
            if !self.system.involves(col) {
                self.system.remove_col(col);
                self.dims.n_div -= 1;
            }
        }
        Ok(true)
    }

    /// Intersection of two relations over the same tuples
    pub fn intersect(&self, other: &BasicRelation) -> BasicRelation {
        debug_assert_eq!(
            (self.dims.n_param, self.dims.n_in, self.dims.n_out),
            (other.dims.n_param, other.dims.n_in, other.dims.n_out)
        );
        let dims = Dims {
            n_div: self.dims.n_div + other.dims.n_div,
            ..self.dims
        };
        let mut system = self.system.remap(dims.total(), |c| c);
        let shared = other.dims.div(0);
        let offset = self.dims.n_div;
        system.extend(&other.system.remap(dims.total(), |c| {
            if c < shared {
                c
            } else {
                c + offset
            }
        }));
        BasicRelation { dims, system }
    }

    /// Swap the input and output tuples.
    pub fn reverse(&self) -> BasicRelation {
        let d = self.dims;
        let dims = Dims {
            n_in: d.n_out,
            n_out: d.n_in,
            ..d
        };
        let system = self.system.remap(dims.total(), |c| {
            if c < d.input(0) {
                c
            } else if c < d.output(0) {
                dims.output(c - d.input(0))
            } else if c < d.div(0) {
                dims.input(c - d.output(0))
            } else {
                c
            }
        });
        BasicRelation { dims, system }
    }

    /// Compose `self: X -> Y` with `other: Y -> Z` into `X -> Z`; the
    /// intermediate tuple becomes existential.
    pub fn apply_range(&self, other: &BasicRelation) -> MappingResult<BasicRelation> {
        let (a, b) = (self.dims, other.dims);
        if a.n_param != b.n_param || a.n_out != b.n_in {
            return Err(MappingError::invalid_kernel(format!(
                "cannot compose relations of arity {} -> {} and {} -> {}",
                a.n_in, a.n_out, b.n_in, b.n_out
            )));
        }
        let dims = Dims {
            n_param: a.n_param,
            n_in: a.n_in,
            n_out: b.n_out,
            n_div: a.n_out + a.n_div + b.n_div,
        };
        let mut system = self.system.remap(dims.total(), |c| {
            if c < a.output(0) {
                c
            } else if c < a.div(0) {
                dims.div(c - a.output(0))
            } else {
                dims.div(a.n_out + c - a.div(0))
            }
        });
        system.extend(&other.system.remap(dims.total(), |c| {
            if c < b.input(0) {
                c
            } else if c < b.output(0) {
                dims.div(c - b.input(0))
            } else if c < b.div(0) {
                dims.output(c - b.output(0))
            } else {
                dims.div(a.n_out + a.n_div + c - b.div(0))
            }
        }));
        Ok(BasicRelation { dims, system })
    }

    /// Existentially quantify the input dims in `range` while keeping their
    /// slots: afterwards those inputs are unconstrained.
    pub fn eliminate_inputs(&self, range: Range<usize>) -> BasicRelation {
        let d = self.dims;
        let count = range.len();
        let dims = Dims {
            n_div: d.n_div + count,
            ..d
        };
        let start = range.start;
        let system = self.system.remap(dims.total(), |c| {
            if c >= d.input(range.start) && c < d.input(range.end) {
                dims.div(d.n_div + c - d.input(start))
            } else {
                c
            }
        });
        BasicRelation { dims, system }
    }

    /// Change the output arity: surplus outputs become existential, missing
    /// trailing outputs are added unconstrained.
    pub fn resize_outputs(&self, n_out: usize) -> BasicRelation {
        let d = self.dims;
        let kept = n_out.min(d.n_out);
        let surplus = d.n_out - kept;
        let dims = Dims {
            n_out,
            n_div: d.n_div + surplus,
            ..d
        };
        let system = self.system.remap(dims.total(), |c| {
            if c < d.output(kept) {
                c
            } else if c < d.div(0) {
                dims.div(c - d.output(kept))
            } else {
                dims.div(surplus + c - d.div(0))
            }
        });
        BasicRelation { dims, system }
    }

    /// Prepend copies of the first `prefix` inputs to the output tuple.
    fn with_input_prefix(&self, prefix: usize) -> BasicRelation {
        let d = self.dims;
        let dims = Dims {
            n_out: d.n_out + prefix,
            ..d
        };
        let system = self
            .system
            .remap(dims.total(), |c| if c < d.output(0) { c } else { c + prefix });
        let mut rel = BasicRelation { dims, system };
        for j in 0..prefix {
            rel.equate(dims.output(j), dims.input(j));
        }
        rel
    }

    /// The constant value of `col` if it is the same in every solution
    pub fn fixed_value(&self, col: usize) -> MappingResult<Option<i64>> {
        self.system.fixed_value(col)
    }

    /// Eliminate the innermost input dims whose value is provably fixed,
    /// stopping at the first one that is not.
    pub fn eliminate_fixed_trailing_inputs(&self) -> MappingResult<BasicRelation> {
        let mut rel = self.clone();
        for k in (0..self.dims.n_in).rev() {
            if self.fixed_value(self.dims.input(k))?.is_none() {
                break;
            }
            rel = rel.eliminate_inputs(k..k + 1);
        }
        Ok(rel)
    }

    pub(crate) fn from_parts(dims: Dims, system: ConstraintSystem) -> Self {
        debug_assert_eq!(dims.total(), system.n_cols());
        Self { dims, system }
    }

    /// `[i..] -> [o..] : exists (e.. : rows)` without braces
    fn isl_body(&self) -> String {
        let d = self.dims;
        let names = d.names();
        let mut body = format!(
            "[{}] -> [{}]",
            names[d.input(0)..d.output(0)].join(", "),
            names[d.output(0)..d.div(0)].join(", ")
        );
        if let Some(rows) = self.system.isl_constraints(&names) {
            if d.n_div > 0 {
                body.push_str(&format!(" : exists ({} : {})", names[d.div(0)..].join(", "), rows));
            } else {
                body.push_str(&format!(" : {}", rows));
            }
        }
        body
    }
}

/// isl map syntax, e.g. `[p0] -> { [i0] -> [o0] : o0 - i0 = 0 }`
impl fmt::Display for BasicRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_params(f, self.dims.n_param)?;
        write!(f, "{{ {} }}", self.isl_body())
    }
}

/// A finite union of basic relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    n_param: usize,
    n_in: usize,
    n_out: usize,
    parts: Vec<BasicRelation>,
}

impl Relation {
    pub fn empty(n_param: usize, n_in: usize, n_out: usize) -> Self {
        Self {
            n_param,
            n_in,
            n_out,
            parts: Vec::new(),
        }
    }

    pub fn from_basic(part: BasicRelation) -> Self {
        let d = part.dims();
        Self {
            n_param: d.n_param,
            n_in: d.n_in,
            n_out: d.n_out,
            parts: vec![part],
        }
    }

    pub fn n_param(&self) -> usize {
        self.n_param
    }

    pub fn n_in(&self) -> usize {
        self.n_in
    }

    pub fn n_out(&self) -> usize {
        self.n_out
    }

    pub fn parts(&self) -> &[BasicRelation] {
        &self.parts
    }

    pub(crate) fn to_map(&self, ctx: &Context) -> Map {
        Map::read_from_str(ctx, &self.to_string())
    }

    pub fn union(&self, other: &Relation) -> Relation {
        debug_assert_eq!(
            (self.n_param, self.n_in, self.n_out),
            (other.n_param, other.n_in, other.n_out)
        );
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        Relation { parts, ..*self }
    }

    pub fn is_empty(&self) -> bool {
        with_ctx(|ctx| self.to_map(ctx).is_empty())
    }

    /// Whether the two relations share at least one (input, output) pair
    pub fn intersects(&self, other: &Relation) -> bool {
        with_ctx(|ctx| !self.to_map(ctx).intersect(other.to_map(ctx)).is_empty())
    }

    pub fn map_parts(
        &self,
        f: impl Fn(&BasicRelation) -> MappingResult<BasicRelation>,
    ) -> MappingResult<Relation> {
        self.filter_map_parts(|p| f(p).map(Some))
    }

    /// Like [`Relation::map_parts`], dropping parts for which `f` returns
    /// `None`.
    pub fn filter_map_parts(
        &self,
        f: impl Fn(&BasicRelation) -> MappingResult<Option<BasicRelation>>,
    ) -> MappingResult<Relation> {
        let mut parts = Vec::with_capacity(self.parts.len());
        let mut arity = (self.n_in, self.n_out);
        for part in &self.parts {
            if let Some(p) = f(part)? {
                arity = (p.dims().n_in, p.dims().n_out);
                parts.push(p);
            }
        }
        Ok(Relation {
            n_param: self.n_param,
            n_in: arity.0,
            n_out: arity.1,
            parts,
        })
    }

    pub fn eliminate_inputs(&self, range: Range<usize>) -> Relation {
        Relation {
            parts: self
                .parts
                .iter()
                .map(|p| p.eliminate_inputs(range.clone()))
                .collect(),
            ..*self
        }
    }

    pub fn reverse(&self) -> Relation {
        Relation {
            n_param: self.n_param,
            n_in: self.n_out,
            n_out: self.n_in,
            parts: self.parts.iter().map(BasicRelation::reverse).collect(),
        }
    }
}

/// isl union syntax: `[p0] -> { [i0] -> [o0] : ...; [i0] -> [o0] : ... }`
impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_params(f, self.n_param)?;
        if self.parts.is_empty() {
            let ins: Vec<String> = (0..self.n_in).map(|i| format!("i{}", i)).collect();
            let outs: Vec<String> = (0..self.n_out).map(|i| format!("o{}", i)).collect();
            return write!(f, "{{ [{}] -> [{}] : 1 = 0 }}", ins.join(", "), outs.join(", "));
        }
        let parts: Vec<String> = self.parts.iter().map(BasicRelation::isl_body).collect();
        write!(f, "{{ {} }}", parts.join("; "))
    }
}

/// Two basic relations over one shared parameter space, laid out as
/// `[params | left in | left out | right in | right out | left divs | right divs]`.
pub struct PairSystem {
    system: ConstraintSystem,
    left: Dims,
    right: Dims,
}

impl PairSystem {
    pub fn new(left: &BasicRelation, right: &BasicRelation) -> Self {
        let (l, r) = (left.dims(), right.dims());
        debug_assert_eq!(l.n_param, r.n_param);
        let n_cols = l.total() + r.total() - r.n_param;
        let right_base = l.n_param + l.n_in + l.n_out;
        let left_divs = right_base + r.n_in + r.n_out;
        let right_divs = left_divs + l.n_div;

        let mut system = left.system().remap(n_cols, |c| {
            if c < l.div(0) {
                c
            } else {
                left_divs + c - l.div(0)
            }
        });
        system.extend(&right.system().remap(n_cols, |c| {
            if c < r.input(0) {
                c
            } else if c < r.div(0) {
                right_base + c - r.input(0)
            } else {
                right_divs + c - r.div(0)
            }
        }));
        Self {
            system,
            left: l,
            right: r,
        }
    }

    pub fn left_in(&self, i: usize) -> usize {
        self.left.input(i)
    }

    pub fn left_out(&self, i: usize) -> usize {
        self.left.output(i)
    }

    pub fn right_in(&self, i: usize) -> usize {
        self.left.n_param + self.left.n_in + self.left.n_out + i
    }

    pub fn right_out(&self, i: usize) -> usize {
        self.right_in(0) + self.right.n_in + i
    }

    pub fn form(&self) -> LinearForm {
        LinearForm::zero(self.system.n_cols())
    }

    /// Append an existential column shared by both sides.
    pub fn add_col(&mut self) -> usize {
        self.system.add_cols(1)
    }

    pub fn add_eq(&mut self, form: LinearForm) {
        self.system.add_eq(form);
    }

    pub fn add_ineq(&mut self, form: LinearForm) {
        self.system.add_ineq(form);
    }

    /// `col_a - col_b + offset == 0`
    pub fn equate(&mut self, col_a: usize, col_b: usize, offset: i64) {
        let mut form = self.form();
        form.coeffs[col_a] += 1;
        form.coeffs[col_b] -= 1;
        form.constant = offset;
        self.system.add_eq(form);
    }

    /// `col_a - col_b + offset >= 0`
    pub fn at_least(&mut self, col_a: usize, col_b: usize, offset: i64) {
        let mut form = self.form();
        form.coeffs[col_a] += 1;
        form.coeffs[col_b] -= 1;
        form.constant = offset;
        self.system.add_ineq(form);
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty()
    }
}

/// No two distinct inputs (agreeing on the first `fixed_prefix` dims) map
/// to the same output.
pub fn is_injective(rel: &Relation, fixed_prefix: usize) -> MappingResult<bool> {
    let prefix = fixed_prefix.min(rel.n_in());
    let keyed = rel.map_parts(|p| Ok(p.with_input_prefix(prefix)))?;
    Ok(with_ctx(|ctx| keyed.to_map(ctx).is_injective()))
}

/// Every input maps to at most one output.
pub fn is_single_valued(rel: &Relation) -> bool {
    with_ctx(|ctx| rel.to_map(ctx).is_single_valued())
}

/// The range holds at most one element for each parameter value.
pub fn range_is_singleton(rel: &Relation) -> bool {
    let parts = rel.parts();
    for p in 0..parts.len() {
        for q in p..parts.len() {
            for k in 0..rel.n_out() {
                // a single part is symmetric in its two copies
                let signs: &[i64] = if p == q { &[1] } else { &[1, -1] };
                for &sign in signs {
                    let mut pair = PairSystem::new(&parts[p], &parts[q]);
                    if sign > 0 {
                        pair.at_least(pair.right_out(k), pair.left_out(k), -1);
                    } else {
                        pair.at_least(pair.left_out(k), pair.right_out(k), -1);
                    }
                    if !pair.is_empty() {
                        return false;
                    }
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `{ [i] -> [a] : a = scale * i + offset, 0 <= i < n }` with no parameters
    fn scaled(scale: i64, offset: i64, n: i64) -> BasicRelation {
        let mut rel = BasicRelation::universe(0, 1, 1);
        let d = rel.dims();
        let mut eq = rel.form();
        eq.coeffs[d.output(0)] = 1;
        eq.coeffs[d.input(0)] = -scale;
        eq.constant = -offset;
        rel.add_eq(eq);
        let mut lo = rel.form();
        lo.coeffs[d.input(0)] = 1;
        rel.add_ineq(lo);
        let mut hi = rel.form();
        hi.coeffs[d.input(0)] = -1;
        hi.constant = n - 1;
        rel.add_ineq(hi);
        rel
    }

    fn row(coeffs: &[i64], constant: i64) -> LinearForm {
        LinearForm {
            coeffs: coeffs.to_vec(),
            constant,
        }
    }

    #[test]
    fn test_contradiction_is_empty() {
        let mut sys = ConstraintSystem::new(1);
        sys.add_ineq(row(&[1], 0));
        sys.add_ineq(row(&[-1], -1));
        assert!(sys.is_empty());
    }

    #[test]
    fn test_integer_emptiness() {
        // 1 <= 2x <= 1 has a rational but no integer solution
        let mut sys = ConstraintSystem::new(1);
        sys.add_ineq(row(&[2], -1));
        sys.add_ineq(row(&[-2], 1));
        assert!(sys.is_empty());

        let mut eq = ConstraintSystem::new(2);
        eq.add_eq(row(&[2, 4], 1));
        assert!(eq.is_empty());
    }

    #[test]
    fn test_lattice_gap_is_empty() {
        // 27 <= 11x + 13y <= 45, -10 <= 7x - 9y <= 4: a rational polygon
        // without integer points
        let mut sys = ConstraintSystem::new(2);
        sys.add_ineq(row(&[11, 13], -27));
        sys.add_ineq(row(&[-11, -13], 45));
        sys.add_ineq(row(&[7, -9], 10));
        sys.add_ineq(row(&[-7, 9], 4));
        assert!(sys.is_empty());

        // widening the second band lets (2, 1) in
        let mut wide = ConstraintSystem::new(2);
        wide.add_ineq(row(&[11, 13], -27));
        wide.add_ineq(row(&[-11, -13], 45));
        wide.add_ineq(row(&[7, -9], 10));
        wide.add_ineq(row(&[-7, 9], 5));
        assert!(!wide.is_empty());
    }

    #[test]
    fn test_fixed_value_after_projection() {
        // x = y + 3, y = 2 with y a free column
        let mut sys = ConstraintSystem::new(2);
        sys.add_eq(row(&[1, -1], -3));
        sys.add_eq(row(&[0, 1], -2));
        assert_eq!(sys.fixed_value(0).unwrap(), Some(5));

        // 3 <= x <= 8 is not fixed
        let mut range = ConstraintSystem::new(2);
        range.add_eq(row(&[1, -1], -3));
        range.add_ineq(row(&[0, 1], 0));
        range.add_ineq(row(&[0, -1], 5));
        assert_eq!(range.fixed_value(0).unwrap(), None);
    }

    #[test]
    fn test_implicit_equality_detected() {
        let mut sys = ConstraintSystem::new(1);
        sys.add_ineq(row(&[1], -4));
        sys.add_ineq(row(&[-1], 4));
        assert_eq!(sys.fixed_value(0).unwrap(), Some(4));
    }

    #[test]
    fn test_isl_text() {
        let rel = scaled(2, 1, 4);
        assert_eq!(rel.to_string(), "{ [i0] -> [o0] : -2*i0 + o0 - 1 = 0 and i0 >= 0 and -i0 + 3 >= 0 }");
        let empty = Relation::empty(1, 1, 0);
        assert_eq!(empty.to_string(), "[p0] -> { [i0] -> [] : 1 = 0 }");
        assert!(empty.is_empty());
    }

    #[test]
    fn test_reverse_and_compose() {
        let double = scaled(2, 0, 4);
        let plus_one = {
            let mut rel = BasicRelation::universe(0, 1, 1);
            let d = rel.dims();
            let mut eq = rel.form();
            eq.coeffs[d.output(0)] = 1;
            eq.coeffs[d.input(0)] = -1;
            eq.constant = -1;
            rel.add_eq(eq);
            rel
        };
        let mut composed = double.apply_range(&plus_one).unwrap();
        assert!(composed.simplify().unwrap());
        assert_eq!(composed.dims().n_div, 0);
        // i = 3 maps to 7
        let mut at_three = composed.clone();
        let d = at_three.dims();
        let mut at = at_three.form();
        at.coeffs[d.input(0)] = 1;
        at.constant = -3;
        at_three.add_eq(at);
        assert_eq!(at_three.fixed_value(d.output(0)).unwrap(), Some(7));

        let back = composed.reverse();
        assert_eq!(back.dims().n_in, 1);
        assert!(!back.is_empty());
    }

    #[test]
    fn test_injectivity_and_single_valuedness() {
        let injective = Relation::from_basic(scaled(2, 0, 8));
        assert!(is_injective(&injective, 0).unwrap());
        assert!(is_single_valued(&injective));

        // { [i] -> [0] } touches one element from every point
        let constant = Relation::from_basic(scaled(0, 0, 8));
        assert!(!is_injective(&constant, 0).unwrap());
        assert!(range_is_singleton(&constant));
        assert!(!range_is_singleton(&injective));
    }

    #[test]
    fn test_injective_for_fixed_prefix() {
        // { [i, j] -> [j] }: fixing i separates the writers
        let mut rel = BasicRelation::universe(0, 2, 1);
        let d = rel.dims();
        rel.equate(d.output(0), d.input(1));
        let rel = Relation::from_basic(rel);
        assert!(!is_injective(&rel, 0).unwrap());
        assert!(is_injective(&rel, 1).unwrap());
    }

    #[test]
    fn test_union_overlap() {
        let evens = Relation::from_basic(scaled(2, 0, 4));
        let odds = Relation::from_basic(scaled(2, 1, 4));
        assert!(!evens.intersects(&odds));
        let shifted = Relation::from_basic(scaled(2, 2, 4));
        // same input i, outputs 2i and 2i + 2 never coincide
        assert!(!evens.intersects(&shifted));
        // with the input eliminated the footprints {0,2,4,6} and {2,..,8} meet
        assert!(evens
            .eliminate_inputs(0..1)
            .intersects(&shifted.eliminate_inputs(0..1)));
        let both = evens.union(&odds);
        assert_eq!(both.parts().len(), 2);
        // even and odd elements are disjoint, so the union stays injective
        assert!(is_injective(&both, 0).unwrap());
    }

    #[test]
    fn test_filter_map_parts_drops_empty() {
        let both = Relation::from_basic(scaled(1, 0, 4)).union(&Relation::from_basic(scaled(1, 0, 0)));
        let kept = both
            .filter_map_parts(|p| Ok((!p.is_empty()).then(|| p.clone())))
            .unwrap();
        assert_eq!(kept.parts().len(), 1);
        assert_eq!((kept.n_in(), kept.n_out()), (1, 1));
    }

    #[test]
    fn test_fixed_trailing_inputs() {
        // { [i, 1] -> [i] }
        let mut rel = BasicRelation::universe(0, 2, 1);
        let d = rel.dims();
        rel.equate(d.output(0), d.input(0));
        let mut fixed = rel.form();
        fixed.coeffs[d.input(1)] = 1;
        fixed.constant = -1;
        rel.add_eq(fixed);
        let relaxed = rel.eliminate_fixed_trailing_inputs().unwrap();
        assert_eq!(relaxed.fixed_value(d.input(1)).unwrap(), None);
        assert_eq!(relaxed.dims().n_div, 1);
    }
}
