//! The constant folder.
//!
//! One rule set applied to every kernel graph before and after expansion.
//! Rules are tried in declaration order, so the vectorizing rewrites and the
//! loop folds come before plain constant folding:
//!
//! - Contraction pushdown (CONTRACT through ALU, REDUCE and CAST)
//! - Index width narrowing (BigInt → int32)
//! - WMMA accumulate folding
//! - Threefry expansion
//! - Arange and sum collapse, with UNMUL bookkeeping
//! - Constant folding and algebraic identities
//! - Gate folding for loads and stores
//!
//! The matcher is generic over the rewrite context so it can be appended to
//! the expander's rules.

use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::uop::exec_alu;
use kernc_ir::pattern;

use super::threefry::expand_threefry;

const PHI_LANES: [&str; 4] = ["v0", "v1", "v2", "v3"];

fn const_i64(u: &UOp) -> Option<i64> {
    u.const_value()?.as_i64()
}

fn fold_binary(op: BinaryOp, dtype: &DType, lhs: &UOp, rhs: &UOp) -> Option<ConstValue> {
    exec_alu(&Op::Binary(op), dtype, &[lhs.const_value()?, rhs.const_value()?])
}

fn umin(a: &Arc<UOp>, b: &Arc<UOp>) -> Arc<UOp> {
    a.neg().max(b.neg()).neg()
}

fn is_float_reduce_dtype(dtype: &DType) -> bool {
    matches!(dtype.scalar(), Some(ScalarDType::Float16 | ScalarDType::BFloat16 | ScalarDType::Float32))
}

/// `where((idx + mval * rng) < compval, multconst, 0)` summed over a reduce
/// loop equals `multconst` times the number of iterations that pass the
/// comparison, which is a closed-form clamp on the loop bounds.
fn loop_collapse(
    idx: &Arc<UOp>,
    mval: &Arc<UOp>,
    compval: &Arc<UOp>,
    multconst: &Arc<UOp>,
    rng: &Arc<UOp>,
) -> Option<Arc<UOp>> {
    let Op::Range { reduce, .. } = rng.op() else { return None };
    if !*reduce {
        return None;
    }
    let (loop_start, loop_end) = (&rng.src()[0], &rng.src()[1]);
    let m = const_i64(mval)?;
    let start = const_i64(loop_start)?;
    if m >= 0 || start != 0 {
        tracing::warn!(mval = m, loop_start = start, "arange loop not folded");
        return None;
    }
    let trip = loop_end.sub(loop_start);
    let passing = idx.sub(compval).sub(mval).idiv(mval).add(&trip).max(loop_start);
    let comprange = umin(loop_end, &passing);
    Some(comprange.cast(multconst.dtype()).mul(multconst).unmul(trip))
}

/// A loop-invariant addend of an accumulator update is pulled out and scaled
/// by the trip count.
fn sum_collapse(phi_input: &Arc<UOp>, lp: &Arc<UOp>, val1: &Arc<UOp>, val2: &Arc<UOp>) -> Option<Arc<UOp>> {
    for (v1, v2) in [(val1, val2), (val2, val1)] {
        if !v1.depends_on(lp) {
            let trip = lp.src()[1].sub(&lp.src()[0]).cast(v1.dtype());
            return Some(UOp::phi(phi_input.clone(), v2.clone()).add(v1.mul(trip)));
        }
    }
    None
}

fn gated_index_load(idx: &Arc<UOp>, rng: &Arc<UOp>, ld: &Arc<UOp>, buf: &Arc<UOp>, add: &Arc<UOp>, mul: &Arc<UOp>) -> Arc<UOp> {
    let load = UOp::load(ld.dtype(), buf.clone(), add.add(mul.mul(idx)));
    load.unmul(rng.src()[1].sub(&rng.src()[0]))
}

/// The constant folder rule set.
pub fn constant_folder<C: 'static>() -> PatternMatcher<C> {
    let mut pm = PatternMatcher::new();

    // ========== Contraction pushdown ==========

    pattern!(pm, UPat::op(OpTag::Contract).named("con").src(vec![UPat::alu().named("alu")]) => |con, alu| {
        let Op::Contract(axes) = con.op() else { return None };
        let count = con.dtype_ref().count();
        let srcs: Vec<_> = alu.src().iter().map(|x| x.contract(x.dtype().vec(count), axes.clone())).collect();
        Some(UOp::new(alu.op().clone(), con.dtype(), srcs))
    });

    pattern!(pm, UPat::op(OpTag::Contract).named("con").src(vec![UPat::op(OpTag::Reduce).named("reduce")]) => |con, reduce| {
        if !is_float_reduce_dtype(reduce.dtype_ref()) {
            return None;
        }
        let Op::Contract(axes) = con.op() else { return None };
        let inner = reduce.src()[0].contract(con.dtype(), axes.clone());
        let srcs = std::iter::once(inner).chain(reduce.src()[1..].iter().cloned());
        Some(UOp::new(reduce.op().clone(), con.dtype(), srcs))
    });

    pattern!(pm, UPat::op(OpTag::Contract).named("con").src(vec![UPat::var("casted").cast().named("cst")]) => |con, casted, cst| {
        if !cst.dtype_ref().is_float() {
            return None;
        }
        let Op::Contract(axes) = con.op() else { return None };
        let count = con.dtype_ref().count();
        Some(casted.contract(casted.dtype().vec(count), axes.clone()).cast(con.dtype()))
    });

    // ========== Index width ==========

    pattern!(pm, UPat::ops(&[OpTag::Const, OpTag::Unary, OpTag::Binary, OpTag::Ternary, OpTag::Special, OpTag::Range, OpTag::Expand])
        .named("x")
        .with_dtype(DType::BigInt) => |x| {
        Some(UOp::new(x.op().clone(), DType::Int32, x.src().iter().cloned()))
    });

    // ========== Vector plumbing ==========

    pattern!(pm, UPat::op(OpTag::Gep).named("gep").src(vec![UPat::op(OpTag::Vectorize).named("vec")]) => |gep, vec| {
        let Op::Gep(i) = gep.op() else { return None };
        vec.src().get(*i).cloned()
    });

    for n in [2, 4, 8] {
        let lanes = (0..n).map(|i| UPat::var("x").gep(i)).collect();
        pattern!(pm, UPat::op(OpTag::Vectorize).with_dtype(DType::Float32.vec(n)).named("root").src(lanes) => |root, x| {
            (x.dtype_ref() == root.dtype_ref()).then(|| x.clone())
        });
    }

    // ========== WMMA ==========

    pattern!(pm, UPat::op(OpTag::Wmma).src(vec![UPat::cnst(0.0), UPat::any_node(), UPat::var("acc")]) => |acc| Some(acc.clone()));
    pattern!(pm, UPat::op(OpTag::Wmma).src(vec![UPat::any_node(), UPat::cnst(0.0), UPat::var("acc")]) => |acc| Some(acc.clone()));

    for n in [2, 8] {
        let lanes = (0..n).map(|i| UPat::var("x").gep(i).with_dtype(DType::Float32)).collect();
        let ex = UPat::op(OpTag::Expand).named("expand").src(lanes);
        pattern!(pm, UPat::op(OpTag::Reduce).named("reduce").src_prefix(vec![ex]) => |reduce, expand, x| {
            let inner = UOp::new(
                reduce.op().clone(),
                x.dtype(),
                std::iter::once(x.clone()).chain(reduce.src()[1..].iter().cloned()),
            );
            let Op::Expand(axes) = expand.op() else { return None };
            Some(UOp::expand(expand.dtype(), (0..n).map(|i| inner.gep(i)), axes.clone()))
        });
    }

    pattern!(pm, UPat::var("add") + UPat::op(OpTag::Wmma).named("wmma") => |add, wmma| {
        let s = wmma.src();
        Some(UOp::new(wmma.op().clone(), wmma.dtype(), [s[0].clone(), s[1].clone(), s[2].add(add)]))
    });

    // ========== Threefry ==========

    pattern!(pm, UPat::binary(BinaryOp::Threefry, UPat::var("x"), UPat::var("seed")).with_dtype(DType::UInt64) => |x, seed| {
        Some(expand_threefry(x, seed))
    });

    // ========== Arange folding ==========

    let range = || UPat::op(OpTag::Range).named("rng");
    pattern!(pm, (UPat::var("idx") + UPat::cvar("mval") * range())
        .cmp_lt(UPat::cvar("compval"))
        .where_(UPat::cvar("multconst"), 0i64) => |idx, mval, compval, multconst, rng| {
        loop_collapse(idx, mval, compval, multconst, rng)
    });
    pattern!(pm, (UPat::var("idx") + -range())
        .cmp_lt(UPat::cvar("compval"))
        .where_(UPat::cvar("multconst"), 0i64) => |idx, compval, multconst, rng| {
        loop_collapse(idx, &UOp::const_(idx.dtype(), -1i64), compval, multconst, rng)
    });

    let acc_over_loop = || UPat::op(OpTag::DefineAcc).src(vec![UPat::op(OpTag::Const), UPat::op(OpTag::Range).named("lp")]);
    pattern!(pm, UPat::op(OpTag::Phi).src(vec![
        acc_over_loop().named("phi_input"),
        UPat::var("val1") + UPat::var("val2"),
    ]) => |phi_input, lp, val1, val2| sum_collapse(phi_input, lp, val1, val2));
    pattern!(pm, UPat::op(OpTag::Phi).src(vec![
        UPat::op(OpTag::Gep).named("phi_input").src(vec![acc_over_loop()]),
        UPat::var("val1") + UPat::var("val2"),
    ]) => |phi_input, lp, val1, val2| sum_collapse(phi_input, lp, val1, val2));

    // UNMUL(value, scale): the value already carries the loop trip count
    let unmul = || UPat::op(OpTag::Unmul).src(vec![UPat::var("v"), UPat::cvar("c2")]);
    pattern!(pm, UPat::cvar("c1") * unmul() => |c1, v, c2| {
        c1.const_value()?.value_eq(&c2.const_value()?).then(|| v.clone())
    });
    pattern!(pm, UPat::cvar("c1") * (UPat::var("add") + unmul()) => |c1, add, v, _c2| {
        Some(add.mul(c1).add(v))
    });
    pattern!(pm, UPat::op(OpTag::Unmul).src(vec![UPat::cnst(0i64).named("zero"), UPat::any_node()]) => |zero| Some(zero.clone()));
    pattern!(pm, UPat::op(OpTag::Unmul).named("u").cast().named("root") => |u, root| {
        Some(UOp::new(Op::Unmul, root.dtype(), [u.src()[0].cast(root.dtype()), u.src()[1].clone()]))
    });

    // ========== Indexing by comparison ==========

    let indexed_load = || {
        UPat::op(OpTag::Load)
            .named("ld")
            .src(vec![UPat::var("buf"), UPat::var("add") + UPat::var("mul") * UPat::op(OpTag::Range).named("rng")])
    };
    pattern!(pm, UPat::var("idx").cmp_eq(UPat::op(OpTag::Range).named("rng")).cast() * indexed_load()
        => |idx, rng, ld, buf, add, mul| Some(gated_index_load(idx, rng, ld, buf, add, mul)));
    pattern!(pm, UPat::var("idx").cmp_eq(UPat::op(OpTag::Range).named("rng")).where_(indexed_load(), 0.0)
        => |idx, rng, ld, buf, add, mul| Some(gated_index_load(idx, rng, ld, buf, add, mul)));

    pattern!(pm, UPat::cvar("c1") - (UPat::var("x") + UPat::cvar("c2")) => |c1, x, c2| Some(c1.sub(c2).sub(x)));

    // max against a constant decided by the other side's bounds
    pattern!(pm, UPat::cvar("c").max(UPat::var("x")) => |c, x| {
        let cv = const_i64(c)?;
        let (lo, hi) = x.bounds()?;
        if lo >= cv {
            Some(x.clone())
        } else if hi <= cv {
            Some(c.clone())
        } else {
            None
        }
    });

    // ========== Constant propagation ==========

    pattern!(pm, UPat::ops(&[OpTag::Gep, OpTag::Cast]).named("root").src(vec![UPat::cvar("c")]) => |root, c| {
        Some(UOp::const_(root.dtype(), c.const_value()?))
    });
    pattern!(pm, UPat::op(OpTag::Vectorize).named("root").src_repeat(UPat::cvar("c")) => |root, c| {
        Some(UOp::const_(root.dtype(), c.const_value()?))
    });

    pattern!(pm, UPat::op(OpTag::Phi).src(vec![UPat::op(OpTag::DefineAcc).named("acc"), UPat::var("acc")]) => |acc| {
        Some(acc.src()[0].cast(acc.dtype()))
    });
    pattern!(pm, UPat::op(OpTag::Phi).src(vec![UPat::op(OpTag::DefineAcc).src(vec![UPat::op(OpTag::Const)]), UPat::var("x")])
        => |x| Some(x.clone()));
    pattern!(pm, UPat::op(OpTag::Phi).src(vec![UPat::op(OpTag::Const), UPat::var("x")]) => |x| Some(x.clone()));
    pattern!(pm, UPat::op(OpTag::DefineAcc).named("root").src(vec![UPat::op(OpTag::Const)]) => |root| {
        Some(root.src()[0].cast(root.dtype()))
    });

    pattern!(pm, UPat::var("x").max(UPat::cnst(i32::MIN as i64).with_dtype(DType::Int32)) => |x| Some(x.clone()));

    pattern!(pm, UPat::var("_x").cmp_lt(UPat::cnst(false).with_dtype(DType::Bool)).named("root") => |_x, root| {
        Some(UOp::const_(root.dtype(), false))
    });
    pattern!(pm, UPat::cnst(true).with_dtype(DType::Bool).cmp_lt(UPat::var("_x")).named("root") => |_x, root| {
        Some(UOp::const_(root.dtype(), false))
    });

    pattern!(pm, UPat::any_node().where_(UPat::var("val"), UPat::var("val")) => |val| Some(val.clone()));
    pattern!(pm, UPat::cvar("gate").where_(UPat::var("c0"), UPat::var("c1")) => |gate, c0, c1| {
        Some(if gate.const_value()?.truthy() { c0.clone() } else { c1.clone() })
    });

    pattern!(pm, UPat::alu().named("root").src_repeat(UPat::op(OpTag::Const)) => |root| {
        let operands: Option<Vec<ConstValue>> = root.src().iter().map(|s| s.const_value()).collect();
        let value = exec_alu(root.op(), root.dtype_ref(), &operands?)?;
        Some(UOp::const_(root.dtype(), value))
    });

    // ========== Self folding ==========

    pattern!(pm, -(-UPat::var("x")) => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x") + 0i64 => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x") * 1i64 => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x") * -1i64 => |x| Some(x.neg()));
    pattern!(pm, UPat::var("x").idiv(UPat::var("x")) => |x| Some(x.const_like(1i64)));
    pattern!(pm, UPat::var("x").idiv(1i64) => |x| Some(x.clone()));
    pattern!(pm, UPat::var("x").idiv(-1i64) => |x| Some(x.neg()));
    pattern!(pm, UPat::var("x") / UPat::var("x") => |x| Some(x.const_like(1.0)));
    pattern!(pm, UPat::var("x") / UPat::cvar("c") => |x, c| {
        let recip = exec_alu(&Op::Unary(UnaryOp::Recip), c.dtype_ref(), &[c.const_value()?])?;
        Some(x.mul(recip))
    });
    pattern!(pm, UPat::var("x").with_dtype(DType::Bool).max(UPat::cnst(false).with_dtype(DType::Bool)) => |x| Some(x.clone()));

    // ========== Zero folding ==========

    pattern!(pm, UPat::var("x") * 0i64 => |x| {
        let nan = x.const_value().is_some_and(|c| c.is_nan_or_inf());
        Some(if nan { x.const_like(f64::NAN) } else { x.const_like(0i64) })
    });
    pattern!(pm, UPat::var("x") - UPat::var("x") => |x| Some(x.const_like(0i64)));

    pattern!(pm, UPat::op(OpTag::Store).src(vec![
        UPat::var("buf"),
        UPat::var("idx"),
        UPat::op(OpTag::Load).src(vec![UPat::var("buf"), UPat::var("idx")]),
    ]) => |_buf, _idx| Some(UOp::noop()));

    // ========== Two-stage folding ==========

    pattern!(pm, (UPat::var("x") + UPat::cvar("c1")) + UPat::cvar("c2") => |x, c1, c2| {
        Some(x.add(fold_binary(BinaryOp::Add, x.dtype_ref(), c1, c2)?))
    });
    pattern!(pm, (UPat::var("x") - UPat::cvar("c1")) + UPat::cvar("c2") => |x, c1, c2| {
        Some(x.add(fold_binary(BinaryOp::Sub, x.dtype_ref(), c2, c1)?))
    });

    pattern!(pm, (UPat::cvar("c") * UPat::var("x")) % UPat::cvar("c") => |x, _c| Some(x.const_like(0i64)));
    pattern!(pm, ((UPat::cvar("c") * UPat::var("x")) + UPat::var("x2")) % UPat::cvar("c") => |c, _x, x2| {
        Some(x2.mod_(c))
    });

    pattern!(pm, (UPat::var("x") * UPat::cvar("c1")) * UPat::cvar("c2") => |x, c1, c2| {
        Some(x.mul(fold_binary(BinaryOp::Mul, x.dtype_ref(), c1, c2)?))
    });
    pattern!(pm, UPat::var("x") % 1i64 => |x| Some(x.const_like(0i64)));
    pattern!(pm, UPat::var("x") * UPat::cvar("c0") + UPat::var("x") * UPat::cvar("c1") => |x, c0, c1| {
        Some(x.mul(fold_binary(BinaryOp::Add, x.dtype_ref(), c0, c1)?))
    });
    pattern!(pm, (UPat::var("x") * UPat::cvar("c0")).idiv(UPat::cvar("c0")) => |x, c0| {
        (const_i64(c0)? != 0).then(|| x.clone())
    });
    pattern!(pm, (UPat::var("x") * UPat::var("x2")) / UPat::var("x2") => |x, _x2| Some(x.clone()));
    pattern!(pm, UPat::var("x").idiv(UPat::cvar("c0")).idiv(UPat::cvar("c1")) => |x, c0, c1| {
        Some(x.idiv(fold_binary(BinaryOp::Mul, x.dtype_ref(), c0, c1)?))
    });
    pattern!(pm, (UPat::var("x") / UPat::var("x2")) / UPat::var("x3") => |x, x2, x3| Some(x.fdiv(x2.mul(x3))));

    // ========== Comparisons ==========

    pattern!(pm, (UPat::cvar("c0") + UPat::var("x")).cmp_lt(UPat::cvar("c1")) => |c0, x, c1| {
        Some(x.cmp_lt(fold_binary(BinaryOp::Sub, x.dtype_ref(), c1, c0)?))
    });
    pattern!(pm, UPat::var("x") + UPat::var("x") * UPat::cvar("c0") => |x, c0| {
        Some(x.mul(exec_alu(&Op::Binary(BinaryOp::Add), x.dtype_ref(), &[c0.const_value()?, ConstValue::Int(1)])?))
    });
    pattern!(pm, UPat::var("x").cmp_ne(0i64) => |x| Some(x.cast(DType::Bool.vec(x.dtype_ref().count()))));
    pattern!(pm, UPat::var("x").with_dtype(DType::Bool).cmp_ne(1i64) => |x| Some(x.neg()));

    pattern!(pm, UPat::op(OpTag::Store).src(vec![
        UPat::var("buf"),
        UPat::var("idx"),
        UPat::var("gate").where_(UPat::var("alt"), UPat::op(OpTag::Load).src(vec![UPat::var("buf"), UPat::var("idx")])),
    ]) => |buf, idx, gate, alt| Some(UOp::store_gated(buf.clone(), idx.clone(), alt.clone(), gate.clone())));

    // accumulator updates gathered back into one vector PHI
    for n in [4, 2] {
        let lanes = (0..n).map(|i| UPat::op(OpTag::Phi).src(vec![UPat::var("val").gep(i), UPat::var(PHI_LANES[i])])).collect();
        pm.add(UPat::op(OpTag::Vectorize).named("root").src(lanes), move |b: &Bindings, _ctx: &mut C| {
            let root = b.get("root")?;
            let val = b.get("val")?;
            let lanes: Option<Vec<Arc<UOp>>> = PHI_LANES[..n].iter().map(|name| b.get(name).cloned()).collect();
            Some(UOp::new(Op::Phi, root.dtype(), [val.clone(), UOp::vectorize(val.dtype(), lanes?)]))
        });
    }

    pattern!(pm, (-UPat::var("x")).cmp_lt(UPat::cvar("c").with_dtype(DType::Int32)) => |x, c| {
        let neg = exec_alu(&Op::Unary(UnaryOp::Neg), c.dtype_ref(), &[c.const_value()?])?;
        Some(UOp::const_(c.dtype(), neg).cmp_lt(x))
    });

    pattern!(pm, UPat::ops(&[OpTag::Cast, OpTag::Vectorize]).named("root") => |root| {
        let src = root.src().first()?;
        (root.src().len() == 1 && src.dtype_ref() == root.dtype_ref()).then(|| src.clone())
    });

    // ========== Gates ==========

    let is_true = || UPat::cnst(true).with_dtype(DType::Bool);
    let is_false = || UPat::cnst(false).with_dtype(DType::Bool);
    pattern!(pm, UPat::op(OpTag::Load).src(vec![UPat::var("buf"), UPat::var("idx"), is_true(), UPat::cvar("var")]) => |buf, idx, var| {
        Some(UOp::load(var.dtype(), buf.clone(), idx.clone()))
    });
    pattern!(pm, UPat::op(OpTag::Load).src(vec![UPat::var("buf"), UPat::var("idx"), is_true(), UPat::cvar("var"), UPat::var("barrier")])
        => |buf, idx, var, barrier| {
        Some(UOp::new(Op::Load, var.dtype(), [buf.clone(), idx.clone(), barrier.clone()]))
    });
    pattern!(pm, UPat::op(OpTag::Load).src(vec![UPat::any_node(), UPat::any_node(), is_false(), UPat::cvar("var")]) => |var| {
        Some(var.clone())
    });
    pattern!(pm, UPat::op(OpTag::Load).src(vec![UPat::any_node(), UPat::any_node(), is_false(), UPat::cvar("var"), UPat::any_node()])
        => |var| Some(var.clone()));
    pattern!(pm, UPat::op(OpTag::Store).src(vec![UPat::var("buf"), UPat::var("idx"), UPat::var("val"), is_true()]) => |buf, idx, val| {
        Some(UOp::store(buf.clone(), idx.clone(), val.clone()))
    });
    pattern!(pm, UPat::op(OpTag::Store).named("_root").src(vec![UPat::any_node(), UPat::any_node(), UPat::any_node(), is_false()])
        => |_root| Some(UOp::noop()));

    pattern!(pm, UPat::op(OpTag::Sink).named("root") => |root| {
        if !root.src().iter().any(|x| x.tag() == OpTag::Noop) {
            return None;
        }
        Some(UOp::sink(root.src().iter().filter(|x| x.tag() != OpTag::Noop).cloned()))
    });

    pm
}
