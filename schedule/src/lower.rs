//! Lowering of an optimized kernel AST into the initial UOp graph.
//!
//! The AST's shape is laid out in zones fixed by the optimizer:
//!
//! ```text
//! | global | local | group | reduce | upcast |
//!                  ^ first_reduce    ^ first_upcasted
//! ```
//!
//! Global and local axes become SPECIAL thread indices (or loops on targets
//! without native indexing), reduce axes become RANGE loops and upcast axes
//! become EXPAND lanes. Grouped reduce axes get a second set of loop indices
//! for the read side of the local staging buffer.

use std::collections::HashMap;
use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::{AstKey, AstNode, AstOp, ConstBuffer, MemBuffer};
use snafu::{OptionExt, Snafu};
use tracing::trace;

use crate::helpers::{get_contraction, limit_dims};
use crate::optimizer::Renderer;

/// Loop axis offset of the second index set of a grouped reduce.
const GROUP_RANGE_OFFSET: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum LowerError {
    #[snafu(display("cannot limit dim {dims:?} to {max_sizes:?}"))]
    LimitDims { dims: Vec<usize>, max_sizes: Vec<usize> },

    #[snafu(display("kernel root must be KERNEL, got {op}"))]
    NotAKernelRoot { op: String },

    #[snafu(display("kernel has no output store"))]
    NoOutput,

    #[snafu(display("locals requested on a kernel with {local_dims} local dims"))]
    LocalsDisabled { local_dims: usize },

    #[snafu(display("{op} lowered before its sources"))]
    MissingSource { op: String },

    #[snafu(display("meta op {op} cannot be lowered"))]
    MetaOp { op: String },
}

type Result<T, E = LowerError> = std::result::Result<T, E>;

/// Thread indices for `dims`, merged to fit `max_sizes` and split back with
/// div/mod so callers always get one index per dim.
pub fn get_grouped_dims(prefix: &str, dims: &[usize], max_sizes: Option<&[usize]>, reverse: bool) -> Result<Vec<Arc<UOp>>> {
    let mut dims = dims.to_vec();
    if reverse {
        dims.reverse();
    }
    let limited = match max_sizes {
        Some(max_sizes) => {
            limit_dims(&dims, max_sizes).context(LimitDimsSnafu { dims: dims.clone(), max_sizes: max_sizes.to_vec() })?
        }
        None => dims.clone(),
    };
    let raw: Vec<Arc<UOp>> =
        limited.iter().enumerate().map(|(i, &s)| UOp::special(i, format!("{prefix}{i}"), s)).collect();

    let mut ret = if limited == dims {
        raw
    } else {
        let contraction = get_contraction(&dims, &limited)
            .context(LimitDimsSnafu { dims: dims.clone(), max_sizes: limited.clone() })?;
        let mut ret = Vec::with_capacity(dims.len());
        for (idx, group) in raw.into_iter().zip(contraction) {
            if group.len() == 1 {
                ret.push(idx);
                continue;
            }
            let mut idx = idx;
            for c in group {
                ret.push(idx.mod_(dims[c] as i64));
                idx = idx.idiv(dims[c] as i64);
            }
        }
        ret
    };
    if reverse {
        ret.reverse();
    }
    Ok(ret)
}

/// Elementwise max of every buffer view's shape.
fn full_shape(ast: &Arc<AstNode>) -> Vec<usize> {
    let mut full: Vec<usize> = Vec::new();
    for node in ast.lazyops() {
        let Some(st) = node.st() else { continue };
        if full.is_empty() {
            full = st.shape().to_vec();
            continue;
        }
        for (f, &s) in full.iter_mut().zip(st.shape()) {
            *f = (*f).max(s);
        }
    }
    full
}

struct Lowerer {
    output_count: usize,
    idxs: Vec<Arc<UOp>>,
    ridxs: Vec<Arc<UOp>>,
}

impl Lowerer {
    fn const_(&self, cb: &ConstBuffer) -> Arc<UOp> {
        let (_, valid) = cb.st.to_uops(&self.idxs, &cb.dtype.scalar_dtype());
        let dt = cb.dtype.scalar_dtype();
        valid.where_(UOp::const_(dt.clone(), cb.val), UOp::const_(dt, 0i64))
    }

    fn define_buffer(&self, mb: &MemBuffer) -> Arc<UOp> {
        if mb.is_local() {
            UOp::define_local("temp", mb.dtype.scalar_dtype(), mb.st.size())
        } else {
            UOp::define_global(mb.idx as usize, mb.dtype.clone(), (mb.idx as usize) < self.output_count)
        }
    }

    fn index(&self, mb: &MemBuffer, idxs: &[Arc<UOp>]) -> (Arc<UOp>, Arc<UOp>) {
        let dtype = if mb.dtype.is_image() && mb.is_local() { mb.dtype.scalar_dtype() } else { mb.dtype.clone() };
        mb.st.to_uops(idxs, &dtype)
    }

    fn load(&self, x: &AstNode, mb: &MemBuffer, cache: &HashMap<AstKey, Arc<UOp>>) -> Arc<UOp> {
        let (idx, valid) = self.index(mb, if mb.is_local() { &self.ridxs } else { &self.idxs });
        let dt = mb.dtype.scalar_dtype();
        let mut src = vec![self.define_buffer(mb), idx];
        if !is_always_true(&valid) {
            src.push(valid);
            src.push(UOp::const_(dt.clone(), 0i64));
        }
        if let Some(staged) = x.src.first().and_then(|s| cache.get(&s.key())) {
            src.push(UOp::barrier([staged.clone()]));
        }
        UOp::new(Op::Load, dt, src)
    }

    fn store(&self, mb: &MemBuffer, value: Arc<UOp>) -> Arc<UOp> {
        let (idx, mut valid) = self.index(mb, &self.idxs);
        let mut has_valid = !is_always_true(&valid);
        // only the first thread of a group stores the reduced value
        if !mb.is_local() {
            has_valid = true;
            for (oidx, ridx) in self.idxs.iter().zip(&self.ridxs) {
                if oidx.id != ridx.id {
                    valid = valid.and(oidx.cmp_eq(0i64));
                }
            }
        }
        let mut src = vec![self.define_buffer(mb), idx, value];
        if has_valid {
            src.push(valid);
        }
        UOp::new(Op::Store, DType::Void, src)
    }

    fn node(&self, x: &AstNode, cache: &HashMap<AstKey, Arc<UOp>>) -> Result<Arc<UOp>> {
        let src = x
            .src
            .iter()
            .map(|s| cache.get(&s.key()).cloned())
            .collect::<Option<Vec<Arc<UOp>>>>()
            .context(MissingSourceSnafu { op: x.op.tag().to_string() })?;
        let uop = match &x.op {
            AstOp::Const(cb) => self.const_(cb),
            AstOp::Load(mb) => self.load(x, mb, cache),
            AstOp::Store(mb) => {
                let value = src.into_iter().next().context(MissingSourceSnafu { op: "STORE".to_string() })?;
                self.store(mb, value)
            }
            AstOp::Kernel(_) => UOp::sink(src),
            AstOp::Cast(dt) => UOp::new(Op::Cast, dt.scalar_dtype(), src),
            AstOp::BitCast(dt) => UOp::new(Op::BitCast, dt.scalar_dtype(), src),
            AstOp::Unary(op) => UOp::new(Op::Unary(*op), src[0].dtype(), src),
            AstOp::Binary(op) => src[0].alu(*op, src[1].clone()),
            AstOp::Ternary(op) => {
                let dtype = src[2].dtype();
                UOp::new(Op::Ternary(*op), dtype, src)
            }
            AstOp::Reduce { op, axes } => {
                let dtype = x.dtype().scalar_dtype();
                let ranges = axes.iter().map(|&i| self.ridxs[i].clone());
                UOp::new(Op::Reduce(*op), dtype, std::iter::once(src[0].clone()).chain(ranges))
            }
            AstOp::Wmma(arg) => {
                let dtype = x.dtype().scalar_dtype();
                let [sz_a, sz_b, sz_c] = arg.sizes;
                let [ax_a, ax_b, ax_c] = arg.upcast_axes;
                let a = src[0].contract(src[0].dtype().vec(sz_a), vec![ax_a]);
                let b = src[1].contract(src[1].dtype().vec(sz_b), vec![ax_b]);
                let acc = UOp::const_(dtype.vec(sz_c), 0.0);
                let wmma = UOp::new(Op::Wmma(arg.clone()), dtype.vec(sz_c), [a, b, acc]);
                UOp::expand(dtype, (0..sz_c).map(|i| wmma.gep(i)), vec![(ax_c, sz_c)])
            }
            AstOp::Copy | AstOp::View | AstOp::Empty => {
                return MetaOpSnafu { op: x.op.tag().to_string() }.fail();
            }
        };
        Ok(uop)
    }
}

fn is_always_true(valid: &UOp) -> bool {
    valid.const_value().is_some_and(|v| v.truthy())
}

/// Build the UOp graph of an optimized kernel AST.
#[tracing::instrument(skip_all)]
pub fn lower(ast: &Arc<AstNode>, renderer: &Renderer) -> Result<Arc<UOp>> {
    let AstOp::Kernel(ki) = &ast.op else {
        return NotAKernelRootSnafu { op: ast.op.tag().to_string() }.fail();
    };
    let output_shape = ast.src.first().and_then(|s| s.st()).context(NoOutputSnafu)?.shape().to_vec();

    let full_shape = full_shape(ast);
    let first_upcasted = full_shape.len() - ki.upcasted;
    let first_reduce = output_shape[..first_upcasted]
        .iter()
        .zip(&full_shape[..first_upcasted])
        .position(|(o, f)| o != f)
        .unwrap_or(first_upcasted);
    let local_load = ast.lazyops().into_iter().find(|x| matches!(&x.op, AstOp::Load(mb) if mb.is_local()));
    let group_for_reduces = local_load.map_or(0, |load| {
        let local_shape = load.st().map(|st| st.shape().to_vec()).unwrap_or_default();
        (first_reduce..first_upcasted).filter(|&i| local_shape.get(i) != output_shape.get(i)).count()
    });
    let global_dims = first_reduce - ki.local_dims;

    let mut idxs = if renderer.has_local {
        if ki.dont_use_locals {
            snafu::ensure!(ki.local_dims == 0, LocalsDisabledSnafu { local_dims: ki.local_dims });
            get_grouped_dims("idx", &full_shape[..global_dims], renderer.global_max.as_deref(), true)?
        } else {
            let mut idxs = get_grouped_dims("gidx", &full_shape[..global_dims], renderer.global_max.as_deref(), true)?;
            idxs.extend(get_grouped_dims(
                "lidx",
                &full_shape[global_dims..first_reduce + group_for_reduces],
                renderer.local_max.as_deref(),
                false,
            )?);
            idxs
        }
    } else {
        (0..first_reduce).map(|i| UOp::range(i, full_shape[i] as i64, false)).collect()
    };

    for (i, &g) in full_shape.iter().enumerate().take(first_upcasted).skip(first_reduce + group_for_reduces) {
        idxs.push(UOp::range(i, g as i64, true));
    }
    for (i, &g) in full_shape.iter().enumerate().skip(first_upcasted) {
        idxs.push(UOp::expand(DType::BigInt, (0..g as i64).map(UOp::index_const), vec![(i, g)]));
    }

    let mut ridxs = idxs.clone();
    for a in first_reduce..first_reduce + group_for_reduces {
        ridxs[a] = UOp::range(GROUP_RANGE_OFFSET + a, full_shape[a] as i64, true);
    }
    trace!(?full_shape, first_reduce, group_for_reduces, global_dims, "lowering kernel");

    let lowerer = Lowerer { output_count: ast.src.len(), idxs, ridxs };
    let mut cache: HashMap<AstKey, Arc<UOp>> = HashMap::new();
    for node in ast.toposort() {
        let uop = lowerer.node(&node, &cache)?;
        cache.insert(node.key(), uop);
    }
    cache.remove(&ast.key()).context(NoOutputSnafu)
}
