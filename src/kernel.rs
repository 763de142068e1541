//! Kernel descriptions and their lowering to integer relations
//!
//! A [`KernelDesc`] is the declarative (serde) form of one systolic kernel:
//! parameters, arrays, scheduled statements with their accesses, the
//! spatial partition of the schedule and the order dependences used for
//! live-range analysis. [`KernelDesc::lower`] turns it into a [`Kernel`],
//! where every schedule and access is a [`BasicRelation`].
//!
//! Spatial identifiers become extra parameters bounded by
//! `0 <= id < block_size`, so the relations of a kernel share the parameter
//! space `[user params | spatial ids]`.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::affine::LinearForm;
use crate::ast::{Chain, CmpOp, Expr};
use crate::error::{MappingError, MappingResult};
use crate::parser::{parse_constraints, parse_expr};
use crate::relation::{BasicRelation, Relation};

fn default_true() -> bool {
    true
}

fn default_element_size() -> usize {
    4
}

/// Declarative description of one kernel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDesc {
    #[serde(default)]
    pub name: String,
    /// Symbolic size parameters
    #[serde(default)]
    pub params: Vec<String>,
    /// Constraints over the parameters, e.g. `N >= 1`
    #[serde(default)]
    pub context: Vec<String>,
    pub arrays: Vec<ArrayDesc>,
    pub statements: Vec<StatementDesc>,
    pub schedule: ScheduleDesc,
    #[serde(default)]
    pub order_dependences: Vec<OrderDependenceDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayDesc {
    pub name: String,
    /// Extent expressions, one per index; empty for a scalar
    #[serde(default)]
    pub extents: Vec<String>,
    #[serde(default = "default_element_size")]
    pub element_size: usize,
    /// Elements are structures whose fields are addressed by extra indices
    #[serde(default)]
    pub structure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementDesc {
    pub name: String,
    #[serde(default)]
    pub iterators: Vec<String>,
    /// Iteration domain constraints over iterators and parameters
    #[serde(default)]
    pub domain: Vec<String>,
    /// One expression per schedule dimension
    pub schedule: Vec<String>,
    #[serde(default)]
    pub accesses: Vec<AccessDesc>,
    /// Whether the statement executes inside the kernel being mapped
    #[serde(default = "default_true")]
    pub in_kernel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    /// A write that happens on every statement instance
    Write,
    /// A write that may or may not happen
    MayWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDesc {
    pub array: String,
    #[serde(default)]
    pub index: Vec<String>,
    pub kind: AccessKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDesc {
    /// Number of outer host dims shared by all threads of the kernel
    #[serde(default)]
    pub kernel_depth: usize,
    /// Number of outer dims a shared tile may depend on
    #[serde(default)]
    pub shared_depth: usize,
    #[serde(default)]
    pub spatial: Vec<SpatialDimDesc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialDimDesc {
    pub dim: usize,
    pub block_size: i64,
    pub id: String,
}

/// `source -> sink` instances of statements accessing `array` that must
/// execute in program order. Sink iterators are primed (`i'`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDependenceDesc {
    pub array: String,
    pub source: String,
    pub sink: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl KernelDesc {
    pub fn from_json(source: &str) -> MappingResult<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    pub name: String,
    pub element_size: usize,
    pub n_index: usize,
    pub extents: Vec<String>,
    pub read_only: bool,
    pub structure: bool,
    /// Set by the analyzer when live-range correctness requires registers
    pub force_private: bool,
}

impl ArrayInfo {
    pub fn is_scalar(&self) -> bool {
        self.n_index == 0
    }

    pub fn is_read_only_scalar(&self) -> bool {
        self.read_only && self.is_scalar()
    }
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub name: String,
    pub iterators: Vec<String>,
    /// `[iterators] -> [schedule dims]`, including the domain
    pub schedule: BasicRelation,
    pub in_kernel: bool,
}

/// One static access of a statement
#[derive(Debug, Clone)]
pub struct AccessRef {
    pub id: usize,
    pub stmt: usize,
    pub array: usize,
    pub read: bool,
    pub write: bool,
    /// Must-write with affine indices; reads are exact unless an index
    /// was widened to the whole extent
    pub exact_write: bool,
    /// Number of indices as written
    pub n_index: usize,
    /// `[iterators] -> [indices as written]`
    pub access: BasicRelation,
    /// Owning group, written once by the freeze pass
    pub group_id: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct OrderDependence {
    pub array: usize,
    pub source: usize,
    pub sink: usize,
    /// `[source iterators] -> [sink iterators]`
    pub relation: BasicRelation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpatialDim {
    pub dim: usize,
    pub block_size: i64,
    pub id: String,
    /// Parameter column of the identifier
    pub param: usize,
}

/// A lowered kernel
#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    /// User parameters followed by spatial identifiers
    pub params: Vec<String>,
    pub n_dims: usize,
    pub kernel_depth: usize,
    pub shared_depth: usize,
    pub spatial: Vec<SpatialDim>,
    pub arrays: Vec<ArrayInfo>,
    pub statements: Vec<Statement>,
    pub refs: Vec<AccessRef>,
    pub order_deps: Vec<OrderDependence>,
    context: BasicRelation,
}

/// Name to column resolution for one relation
struct Scope {
    cols: HashMap<String, usize>,
}

impl Scope {
    fn new(params: &[String], inputs: &[String], outputs: &[String], rel: &BasicRelation) -> MappingResult<Self> {
        let d = rel.dims();
        let mut cols = HashMap::new();
        let named = params
            .iter()
            .enumerate()
            .map(|(i, n)| (n, d.param(i)))
            .chain(inputs.iter().enumerate().map(|(i, n)| (n, d.input(i))))
            .chain(outputs.iter().enumerate().map(|(i, n)| (n, d.output(i))));
        for (name, col) in named {
            if cols.insert(name.clone(), col).is_some() {
                return Err(MappingError::invalid_kernel(format!(
                    "name '{}' is declared twice",
                    name
                )));
            }
        }
        Ok(Self { cols })
    }

    fn col(&self, name: &str) -> MappingResult<usize> {
        self.cols
            .get(name)
            .copied()
            .ok_or_else(|| MappingError::unknown(name))
    }
}

/// Introduce `q = floor(f / c)` as an existential and return its column.
fn introduce_quotient(rel: &mut BasicRelation, f: &LinearForm, c: i64) -> MappingResult<usize> {
    let q = rel.add_div();
    let qf = LinearForm::var(rel.dims().total(), q);
    // f - c*q >= 0
    rel.add_ineq(LinearForm::combine(1, f, -c, &qf)?);
    // c*q + c - 1 - f >= 0
    let mut upper = LinearForm::combine(c, &qf, -1, f)?;
    upper.constant += c - 1;
    rel.add_ineq(upper);
    Ok(q)
}

fn lower_expr(expr: &Expr, scope: &Scope, rel: &mut BasicRelation) -> MappingResult<LinearForm> {
    match expr {
        Expr::Int(n) => Ok(LinearForm::constant(rel.dims().total(), *n)),
        Expr::Var(name) => Ok(LinearForm::var(rel.dims().total(), scope.col(name)?)),
        Expr::Neg(e) => Ok(lower_expr(e, scope, rel)?.negate()),
        Expr::Add(a, b) => {
            let a = lower_expr(a, scope, rel)?;
            let b = lower_expr(b, scope, rel)?;
            a.add(&b)
        }
        Expr::Sub(a, b) => {
            let a = lower_expr(a, scope, rel)?;
            let b = lower_expr(b, scope, rel)?;
            a.sub(&b)
        }
        Expr::Mul(a, b) => {
            let fa = lower_expr(a, scope, rel)?;
            let fb = lower_expr(b, scope, rel)?;
            if fa.is_constant() {
                fb.scale(fa.constant)
            } else if fb.is_constant() {
                fa.scale(fb.constant)
            } else {
                Err(MappingError::non_affine(format!(
                    "product of two non-constant terms in '{}'",
                    expr
                )))
            }
        }
        Expr::FloorDiv(e, c) => {
            let f = lower_expr(e, scope, rel)?;
            let q = introduce_quotient(rel, &f, *c)?;
            Ok(LinearForm::var(rel.dims().total(), q))
        }
        Expr::Mod(e, c) => {
            let f = lower_expr(e, scope, rel)?;
            let q = introduce_quotient(rel, &f, *c)?;
            f.sub(&LinearForm::var(rel.dims().total(), q).scale(*c)?)
        }
    }
}

fn lower_chain(chain: &Chain, scope: &Scope, rel: &mut BasicRelation) -> MappingResult<()> {
    for (lhs, op, rhs) in chain.comparisons() {
        let l = lower_expr(lhs, scope, rel)?;
        let r = lower_expr(rhs, scope, rel)?;
        let mut diff = r.sub(&l)?;
        match op {
            CmpOp::Lt => {
                diff.constant -= 1;
                rel.add_ineq(diff);
            }
            CmpOp::Le => rel.add_ineq(diff),
            CmpOp::Eq => rel.add_eq(diff),
            CmpOp::Ge => rel.add_ineq(diff.negate()),
            CmpOp::Gt => {
                let mut diff = diff.negate();
                diff.constant -= 1;
                rel.add_ineq(diff);
            }
        }
    }
    Ok(())
}

fn lower_constraints(sources: &[String], scope: &Scope, rel: &mut BasicRelation) -> MappingResult<()> {
    for source in sources {
        for chain in parse_constraints(source)? {
            lower_chain(&chain, scope, rel)?;
        }
    }
    Ok(())
}

/// `out_k = expr_k` for every output
fn lower_outputs(exprs: &[String], scope: &Scope, rel: &mut BasicRelation) -> MappingResult<()> {
    for (k, source) in exprs.iter().enumerate() {
        let value = lower_expr(&parse_expr(source)?, scope, rel)?;
        let out = LinearForm::var(rel.dims().total(), rel.dims().output(k));
        rel.add_eq(out.sub(&value)?);
    }
    Ok(())
}

/// `out_k = expr_k` for every access index. An index that is not affine
/// (a product or quotient of two symbolic values) only keeps
/// `0 <= out_k < extent_k`. Returns `false` when some index was widened.
fn lower_indices(
    exprs: &[String],
    extents: &[String],
    scope: &Scope,
    rel: &mut BasicRelation,
) -> MappingResult<bool> {
    let mut exact = true;
    for (k, source) in exprs.iter().enumerate() {
        let out = rel.dims().output(k);
        match parse_expr(source).and_then(|e| lower_expr(&e, scope, rel)) {
            Ok(value) => {
                let out = LinearForm::var(rel.dims().total(), out);
                rel.add_eq(out.sub(&value)?);
            }
            Err(MappingError::NonAffine { message }) => {
                warn!("index '{}' is not affine ({}), assuming any element", source, message);
                exact = false;
                let out = LinearForm::var(rel.dims().total(), out);
                rel.add_ineq(out.clone());
                if let Some(extent) = extents.get(k) {
                    let extent = lower_expr(&parse_expr(extent)?, scope, rel)?;
                    // extent - 1 - out >= 0
                    let mut below = extent.sub(&out)?;
                    below.constant -= 1;
                    rel.add_ineq(below);
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(exact)
}

impl KernelDesc {
    /// Validate the description and lower it into relations.
    pub fn lower(&self) -> MappingResult<Kernel> {
        let n_dims = self.statements.first().map_or(0, |s| s.schedule.len());
        if let Some(s) = self.statements.iter().find(|s| s.schedule.len() != n_dims) {
            return Err(MappingError::invalid_kernel(format!(
                "statement {} has {} schedule dims, expected {}",
                s.name,
                s.schedule.len(),
                n_dims
            )));
        }
        let sched = &self.schedule;
        if sched.kernel_depth > sched.shared_depth || sched.shared_depth > n_dims {
            return Err(MappingError::invalid_kernel(format!(
                "need kernel_depth <= shared_depth <= {}, got {} and {}",
                n_dims, sched.kernel_depth, sched.shared_depth
            )));
        }

        let mut params = self.params.clone();
        let mut spatial: Vec<SpatialDim> = Vec::new();
        for s in &sched.spatial {
            if s.dim < sched.shared_depth || s.dim >= n_dims {
                return Err(MappingError::invalid_kernel(format!(
                    "spatial dim {} must lie in [{}, {})",
                    s.dim, sched.shared_depth, n_dims
                )));
            }
            if s.block_size < 1 {
                return Err(MappingError::invalid_kernel(format!(
                    "block size of spatial dim {} must be positive",
                    s.dim
                )));
            }
            if spatial.iter().any(|p| p.dim == s.dim) {
                return Err(MappingError::invalid_kernel(format!(
                    "spatial dim {} is listed twice",
                    s.dim
                )));
            }
            params.push(s.id.clone());
            spatial.push(SpatialDim {
                dim: s.dim,
                block_size: s.block_size,
                id: s.id.clone(),
                param: params.len() - 1,
            });
        }
        spatial.sort_by_key(|s| s.dim);
        let n_param = params.len();

        let mut context = BasicRelation::universe(n_param, 0, 0);
        let scope = Scope::new(&params, &[], &[], &context)?;
        lower_constraints(&self.context, &scope, &mut context)?;
        for s in &spatial {
            let id = LinearForm::var(n_param, s.param);
            context.add_ineq(id.clone());
            let mut below = id.negate();
            below.constant = s.block_size - 1;
            context.add_ineq(below);
        }

        let mut kernel = Kernel {
            name: self.name.clone(),
            params,
            n_dims,
            kernel_depth: sched.kernel_depth,
            shared_depth: sched.shared_depth,
            spatial,
            arrays: Vec::new(),
            statements: Vec::new(),
            refs: Vec::new(),
            order_deps: Vec::new(),
            context,
        };

        for array in &self.arrays {
            if kernel.array_index(&array.name).is_some() {
                return Err(MappingError::invalid_kernel(format!(
                    "array {} is declared twice",
                    array.name
                )));
            }
            for extent in &array.extents {
                let mut check = BasicRelation::universe(n_param, 0, 0);
                let scope = Scope::new(&kernel.params, &[], &[], &check)?;
                lower_expr(&parse_expr(extent)?, &scope, &mut check)?;
            }
            kernel.arrays.push(ArrayInfo {
                name: array.name.clone(),
                element_size: array.element_size,
                n_index: array.extents.len(),
                extents: array.extents.clone(),
                read_only: true,
                structure: array.structure,
                force_private: false,
            });
        }

        for (stmt_id, stmt) in self.statements.iter().enumerate() {
            let n_iter = stmt.iterators.len();
            let mut schedule = BasicRelation::universe(n_param, n_iter, n_dims);
            let scope = Scope::new(&kernel.params, &stmt.iterators, &[], &schedule)?;
            lower_constraints(&stmt.domain, &scope, &mut schedule)?;
            lower_outputs(&stmt.schedule, &scope, &mut schedule)?;
            kernel.add_context(&mut schedule);

            for access in &stmt.accesses {
                let array = kernel
                    .array_index(&access.array)
                    .ok_or_else(|| MappingError::unknown(&access.array))?;
                let mut rel = BasicRelation::universe(n_param, n_iter, access.index.len());
                let scope = Scope::new(&kernel.params, &stmt.iterators, &[], &rel)?;
                let affine = lower_indices(&access.index, &kernel.arrays[array].extents, &scope, &mut rel)?;
                kernel.add_context(&mut rel);

                let write = access.kind != AccessKind::Read;
                if write && stmt.in_kernel {
                    kernel.arrays[array].read_only = false;
                }
                kernel.refs.push(AccessRef {
                    id: kernel.refs.len(),
                    stmt: stmt_id,
                    array,
                    read: access.kind == AccessKind::Read,
                    write,
                    exact_write: affine && access.kind != AccessKind::MayWrite,
                    n_index: access.index.len(),
                    access: rel,
                    group_id: None,
                });
            }

            kernel.statements.push(Statement {
                name: stmt.name.clone(),
                iterators: stmt.iterators.clone(),
                schedule,
                in_kernel: stmt.in_kernel,
            });
        }

        for dep in &self.order_dependences {
            let array = kernel
                .array_index(&dep.array)
                .ok_or_else(|| MappingError::unknown(&dep.array))?;
            let source = kernel.statement_index(&dep.source)?;
            let sink = kernel.statement_index(&dep.sink)?;
            let sink_names: Vec<String> = kernel.statements[sink]
                .iterators
                .iter()
                .map(|i| format!("{}'", i))
                .collect();
            let mut rel = BasicRelation::universe(
                n_param,
                kernel.statements[source].iterators.len(),
                sink_names.len(),
            );
            let scope = Scope::new(
                &kernel.params,
                &kernel.statements[source].iterators,
                &sink_names,
                &rel,
            )?;
            lower_constraints(&dep.constraints, &scope, &mut rel)?;
            kernel.add_context(&mut rel);
            kernel.order_deps.push(OrderDependence {
                array,
                source,
                sink,
                relation: rel,
            });
        }

        Ok(kernel)
    }
}

impl Kernel {
    pub fn n_param(&self) -> usize {
        self.params.len()
    }

    pub fn array_index(&self, name: &str) -> Option<usize> {
        self.arrays.iter().position(|a| a.name == name)
    }

    fn statement_index(&self, name: &str) -> MappingResult<usize> {
        self.statements
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| MappingError::unknown(name))
    }

    /// Number of spatial points in one block
    pub fn fan_out(&self) -> MappingResult<i64> {
        self.spatial
            .iter()
            .try_fold(1i64, |acc, s| acc.checked_mul(s.block_size))
            .ok_or(MappingError::Overflow)
    }

    /// The spatial dim that wraps onto the innermost identifier
    pub fn innermost_spatial(&self) -> Option<&SpatialDim> {
        self.spatial.last()
    }

    pub fn is_spatial(&self, dim: usize) -> bool {
        self.spatial.iter().any(|s| s.dim == dim)
    }

    /// Add the parameter context (user constraints and identifier ranges).
    fn add_context(&self, rel: &mut BasicRelation) {
        let d = self.context.dims();
        let divs: Vec<usize> = (0..d.n_div).map(|_| rel.add_div()).collect();
        let total = rel.dims().total();
        let place = |c: usize| if c < d.n_param { c } else { divs[c - d.div(0)] };
        for row in self.context.system().eqs() {
            rel.add_eq(row.remap(total, &place));
        }
        for row in self.context.system().ineqs() {
            rel.add_ineq(row.remap(total, &place));
        }
    }

    /// `[schedule] -> [array index]` for one reference, padded or truncated
    /// to the array's arity. `None` when the reference is inactive here.
    pub fn scheduled_access(&self, r: &AccessRef) -> MappingResult<Option<Relation>> {
        let stmt = &self.statements[r.stmt];
        if !stmt.in_kernel {
            return Ok(None);
        }
        let mut rel = stmt.schedule.reverse().apply_range(&r.access)?;
        if !rel.simplify()? || rel.is_empty() {
            return Ok(None);
        }
        let n_index = self.arrays[r.array].n_index;
        Ok(Some(Relation::from_basic(rel.resize_outputs(n_index))))
    }

    /// Restrict each spatial dim to the residue owned by its identifier:
    /// `dim = block_size * e + id`.
    pub fn privatize(&self, rel: &Relation) -> MappingResult<Relation> {
        rel.map_parts(|part| {
            let mut part = part.clone();
            for s in &self.spatial {
                let e = part.add_div();
                let d = part.dims();
                let mut eq = part.form();
                eq.coeffs[d.input(s.dim)] = 1;
                eq.coeffs[e] = -s.block_size;
                eq.coeffs[d.param(s.param)] = -1;
                part.add_eq(eq);
            }
            Ok(part)
        })
    }

    /// `[source schedule] -> [sink schedule]` of an order dependence;
    /// `None` when either statement runs outside the kernel.
    pub fn scheduled_dependence(&self, dep: &OrderDependence) -> MappingResult<Option<BasicRelation>> {
        let source = &self.statements[dep.source];
        let sink = &self.statements[dep.sink];
        if !source.in_kernel || !sink.in_kernel {
            return Ok(None);
        }
        let rel = source
            .schedule
            .reverse()
            .apply_range(&dep.relation)?
            .apply_range(&sink.schedule)?;
        Ok(Some(rel))
    }

    /// Names of the outer columns `[params | c0 .. c(n-1)]` of a tile
    pub fn outer_names(&self, n_dims: usize) -> Vec<String> {
        let mut names = self.params.clone();
        names.extend((0..n_dims).map(|i| format!("c{}", i)));
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(json: &str) -> KernelDesc {
        KernelDesc::from_json(json).unwrap()
    }

    const COPY: &str = r#"{
        "name": "copy",
        "params": ["N"],
        "context": ["N >= 1"],
        "arrays": [
            { "name": "A", "extents": ["N"] },
            { "name": "B", "extents": ["N"] }
        ],
        "statements": [{
            "name": "S",
            "iterators": ["i"],
            "domain": ["0 <= i < N"],
            "schedule": ["i"],
            "accesses": [
                { "array": "A", "index": ["2 * i"], "kind": "read" },
                { "array": "B", "index": ["i"], "kind": "write" }
            ]
        }],
        "schedule": {
            "kernel_depth": 0,
            "shared_depth": 0,
            "spatial": [{ "dim": 0, "block_size": 4, "id": "t0" }]
        }
    }"#;

    #[test]
    fn test_lower_copy_kernel() {
        let kernel = desc(COPY).lower().unwrap();
        assert_eq!(kernel.params, vec!["N".to_string(), "t0".to_string()]);
        assert_eq!(kernel.n_dims, 1);
        assert_eq!(kernel.fan_out().unwrap(), 4);
        assert_eq!(kernel.refs.len(), 2);
        assert!(kernel.arrays[0].read_only);
        assert!(!kernel.arrays[1].read_only);
        assert!(kernel.refs[1].exact_write);
    }

    #[test]
    fn test_scheduled_access_composes() {
        let kernel = desc(COPY).lower().unwrap();
        let rel = kernel.scheduled_access(&kernel.refs[0]).unwrap().unwrap();
        assert_eq!(rel.n_in(), 1);
        assert_eq!(rel.n_out(), 1);
        let part = &rel.parts()[0];
        assert_eq!(part.dims().n_div, 0);
        // schedule point c0 = 3 reads A[6]
        let mut at_three = part.clone();
        let d = at_three.dims();
        let mut at = at_three.form();
        at.coeffs[d.input(0)] = 1;
        at.constant = -3;
        at_three.add_eq(at);
        assert_eq!(at_three.fixed_value(d.output(0)).unwrap(), Some(6));
    }

    #[test]
    fn test_floor_and_modulo_lowering() {
        let json = COPY.replace(r#""schedule": ["i"]"#, r#""schedule": ["floor(i / 4) + i % 4"]"#);
        let kernel = desc(&json).lower().unwrap();
        let sched = &kernel.statements[0].schedule;
        // i = 5 runs at 1 + 1 = 2
        let mut at_five = sched.clone();
        let d = at_five.dims();
        let mut at = at_five.form();
        at.coeffs[d.input(0)] = 1;
        at.constant = -5;
        at_five.add_eq(at);
        assert_eq!(at_five.fixed_value(d.output(0)).unwrap(), Some(2));
    }

    #[test]
    fn test_lowering_errors() {
        let json = COPY.replace(r#""schedule": ["i"]"#, r#""schedule": ["i * i"]"#);
        assert!(matches!(desc(&json).lower(), Err(MappingError::NonAffine { .. })));

        let json = COPY.replace(r#""2 * i""#, r#""M""#);
        assert!(matches!(desc(&json).lower(), Err(MappingError::UnknownName { .. })));

        let json = COPY.replace(r#""block_size": 4"#, r#""block_size": 0"#);
        assert!(matches!(desc(&json).lower(), Err(MappingError::InvalidKernel { .. })));

        assert!(matches!(KernelDesc::from_json("{"), Err(MappingError::Json(_))));
    }

    #[test]
    fn test_privatize_owns_residue() {
        let kernel = desc(COPY).lower().unwrap();
        let rel = kernel.scheduled_access(&kernel.refs[1]).unwrap().unwrap();
        let private = kernel.privatize(&rel).unwrap();
        let mut owned = private.parts()[0].clone();
        let d = owned.dims();
        // t0 = 1 never owns c0 = 2
        let mut id = owned.form();
        id.coeffs[d.param(1)] = 1;
        id.constant = -1;
        owned.add_eq(id);
        let mut at = owned.form();
        at.coeffs[d.input(0)] = 1;
        at.constant = -2;
        owned.add_eq(at);
        assert!(owned.is_empty());
    }

    #[test]
    fn test_symbolic_product_index_is_widened() {
        let json = COPY.replace(r#""2 * i""#, r#""N * i""#);
        let kernel = desc(&json).lower().unwrap();
        let r = &kernel.refs[0];
        assert!(r.read);
        assert!(!r.exact_write);
        assert!(kernel.refs[1].exact_write);

        // i = 0 may touch any element of A, but none past the extent
        let mut at_zero = r.access.clone();
        let d = at_zero.dims();
        let mut at = at_zero.form();
        at.coeffs[d.input(0)] = 1;
        at_zero.add_eq(at);
        let mut last = at_zero.clone();
        let mut eq = last.form();
        eq.coeffs[d.output(0)] = 1;
        eq.coeffs[d.param(0)] = -1;
        eq.constant = 1;
        last.add_eq(eq);
        assert!(!last.is_empty());
        let mut past = at_zero;
        let mut eq = past.form();
        eq.coeffs[d.output(0)] = 1;
        eq.coeffs[d.param(0)] = -1;
        past.add_eq(eq);
        assert!(past.is_empty());
    }

    #[test]
    fn test_fan_out_overflow() {
        let mut kernel = desc(COPY).lower().unwrap();
        let mut wide = kernel.spatial[0].clone();
        wide.block_size = i64::MAX;
        kernel.spatial = vec![wide.clone(), wide];
        assert!(matches!(kernel.fan_out(), Err(MappingError::Overflow)));
    }
}
