//! Vector memory folding for targets with float4 loads and stores.
//!
//! Loads and stores whose index is `base + EXPAND(0..n)` with an aligned
//! base become one vector access; image accesses indexed by `(x, y, lane)`
//! become a vec4 access plus a lane select.

use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::pattern;

fn lane_consts(n: usize) -> Vec<UPat> {
    (0..n).map(|i| UPat::cnst(i as i64)).collect()
}

/// The EXPAND lanes are the constants `0..n` in order.
fn is_lane_ramp(ex: &UOp) -> bool {
    let consts: Vec<i64> = ex.src().iter().filter_map(|x| x.const_value()?.as_i64()).collect();
    consts.iter().copied().eq(0..ex.src().len() as i64)
}

fn vectorizable_buffer(buf: &UOp) -> bool {
    buf.dtype_ref().is_image()
        || buf.dtype_ref().pointee().is_some_and(|p| *p == DType::Float32 || *p == DType::Float16)
}

/// Sum of the optional index terms, `0` when none matched.
fn aligned_base(b: &Bindings, n: usize) -> Option<Arc<UOp>> {
    let mut idx = b.get("idx").cloned().unwrap_or_else(|| UOp::const_(DType::Int32, 0i64));
    for name in ["idx2", "idx3"] {
        if let Some(extra) = b.get(name) {
            idx = idx.add(extra);
        }
    }
    idx.divides(n as i64).then_some(idx)
}

fn expand_arg(ex: &UOp) -> Option<&[(usize, usize)]> {
    match ex.op() {
        Op::Expand(axes) => Some(axes),
        _ => None,
    }
}

fn float4_expand_load(b: &Bindings) -> Option<Arc<UOp>> {
    let (load, buf, ex) = (b.get("load")?, b.get("buf")?, b.get("ex")?);
    if ex.src().len() != 4 || !is_lane_ramp(ex) || !vectorizable_buffer(buf) {
        return None;
    }
    let idx = aligned_base(b, 4)?;
    if load.dtype_ref().is_vector() {
        return None;
    }
    let vec_load = UOp::load(load.dtype().vec(4), buf.clone(), idx);
    Some(UOp::expand(load.dtype(), (0..4).map(|i| vec_load.gep(i)), expand_arg(ex)?.to_vec()))
}

fn float4_contract_store(b: &Bindings) -> Option<Arc<UOp>> {
    let (store, buf, ex, var) = (b.get("store")?, b.get("buf")?, b.get("ex")?, b.get("var")?);
    let n = ex.src().len();
    if !matches!(n, 2 | 4) || !is_lane_ramp(ex) || !vectorizable_buffer(buf) {
        return None;
    }
    let idx = aligned_base(b, n)?;
    let axis = expand_arg(ex)?.first()?.0;
    let new_var = var.contract(var.dtype().vec(n), vec![axis]);
    let srcs = [buf.clone(), idx, new_var].into_iter().chain(store.src()[3..].iter().cloned());
    Some(UOp::new(Op::Store, store.dtype(), srcs))
}

/// Vector load/store folding rules.
pub fn float4_folding<C: 'static>() -> PatternMatcher<C> {
    let mut pm = PatternMatcher::new();
    let ex = || UPat::op(OpTag::Expand).named("ex");

    // bring the lane ramp to the outermost add of a store index
    pattern!(pm, UPat::op(OpTag::Store).named("store").src(vec![
        UPat::var("buf"),
        UPat::var("idx") + (UPat::op(OpTag::Expand).named("ex").src(lane_consts(4)) + UPat::var("idx2")),
        UPat::var("var"),
    ]) => |store, buf, idx, idx2, ex, var| {
        Some(UOp::new(Op::Store, store.dtype(), [buf.clone(), idx.add(idx2).add(ex), var.clone()]))
    });

    for index in [ex() + UPat::var("idx") + UPat::var("idx2"), ex() + UPat::var("idx"), ex()] {
        let load = UPat::op(OpTag::Load).named("load").src(vec![UPat::var("buf"), index]);
        pm.add(load, |b: &Bindings, _ctx: &mut C| float4_expand_load(b));
    }

    for index in [
        ex() + UPat::var("idx") + UPat::var("idx2") + UPat::var("idx3"),
        ex() + UPat::var("idx") + UPat::var("idx2"),
        ex() + UPat::var("idx"),
        ex(),
    ] {
        let store = UPat::op(OpTag::Store).named("store").src_prefix(vec![UPat::var("buf"), index, UPat::var("var")]);
        pm.add(store, |b: &Bindings, _ctx: &mut C| float4_contract_store(b));
    }

    // ========== Images ==========

    pattern!(pm, UPat::op(OpTag::Load).named("ls").src_prefix(vec![
        UPat::var("buf"),
        UPat::op(OpTag::Vectorize).with_dtype(DType::Int32.vec(3)).src(vec![UPat::var("idx"), UPat::var("idy"), UPat::var("id4")]),
    ]) => |ls, buf, idx, idy, id4| {
        let extra: Vec<Arc<UOp>> = if ls.src().len() > 3 {
            let alt = UOp::vectorize(ls.dtype().vec(4), std::iter::repeat(ls.src()[3].clone()).take(4));
            vec![ls.src()[2].clone(), alt]
        } else {
            ls.src()[2..].to_vec()
        };
        let coord = UOp::vectorize(DType::Int32.vec(2), [idx.clone(), idy.clone()]);
        let vec_load = UOp::new(Op::Load, ls.dtype().vec(4), [buf.clone(), coord].into_iter().chain(extra));
        let nan = UOp::const_(ls.dtype(), f64::NAN);
        Some((0..4).fold(nan, |ret, i| id4.cmp_ne(i as i64).where_(ret, vec_load.gep(i))))
    });

    pattern!(pm, UPat::op(OpTag::Store).named("ls").src_prefix(vec![
        UPat::var("buf"),
        UPat::op(OpTag::Vectorize).with_dtype(DType::Int32.vec(3)).src(vec![
            UPat::var("idx"),
            UPat::var("idy"),
            UPat::op(OpTag::Expand).named("ex").src(lane_consts(4)),
        ]),
        UPat::var("var"),
    ]) => |ls, buf, idx, idy, ex, var| {
        let axis = expand_arg(ex)?.first()?.0;
        let coord = UOp::vectorize(DType::Int32.vec(2), [idx.clone(), idy.clone()]);
        let new_var = var.contract(var.dtype().vec(4), vec![axis]);
        let srcs = [buf.clone(), coord, new_var].into_iter().chain(ls.src()[3..].iter().cloned());
        Some(UOp::new(Op::Store, ls.dtype(), srcs))
    });

    pm
}
