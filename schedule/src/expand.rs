//! The expander: turns symbolic EXPAND lanes into explicit per-lane values.
//!
//! An EXPAND over axes `[(axis, size), ...]` holds one source per point of
//! the axes' cartesian product, first axis slowest. Every op consuming an
//! EXPAND is replicated per lane, CONTRACT gathers lanes back into vectors,
//! and REDUCE becomes an accumulator (DEFINE_ACC + PHI).
//!
//! After the rewrite reaches a fixed point the graph holds no EXPAND,
//! CONTRACT or REDUCE; vectorized ALU is split into scalar lanes.

use std::collections::HashMap;
use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::pattern;
use smallvec::SmallVec;

/// Rewrite context of the expander.
#[derive(Debug, Default, Clone)]
pub struct ExpandContext {
    /// Next free accumulator number.
    pub acc_number: usize,
}

type LanePick = HashMap<usize, usize>;

/// Flat source index of lane `rpk` in an EXPAND over `args`.
///
/// Declines when `rpk` lacks one of the axes.
fn expand_arg_to_idx(args: &[(usize, usize)], rpk: &LanePick) -> Option<usize> {
    let mut idx = 0;
    let mut mul = 1;
    for &(axis, size) in args.iter().rev() {
        idx += rpk.get(&axis)? * mul;
        mul *= size;
    }
    Some(idx)
}

/// Every lane of `args`, first axis slowest.
fn choices_from_args(args: &[(usize, usize)]) -> Vec<LanePick> {
    let mut out = vec![LanePick::new()];
    for &(axis, size) in args {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..size).map(move |v| {
                    let mut pick = prefix.clone();
                    pick.insert(axis, v);
                    pick
                })
            })
            .collect();
    }
    out
}

fn expand_args(u: &UOp) -> Option<&[(usize, usize)]> {
    match u.op() {
        Op::Expand(args) => Some(args),
        _ => None,
    }
}

fn merged(a: &LanePick, b: &LanePick) -> LanePick {
    let mut out = a.clone();
    out.extend(b.iter().map(|(k, v)| (*k, *v)));
    out
}

fn do_expand(root: &Arc<UOp>) -> Option<Arc<UOp>> {
    let is_reduce = matches!(root.op(), Op::Reduce(_));
    let (mut lane_args, dont_expand): (Vec<(usize, usize)>, Vec<(usize, usize)>) = if is_reduce {
        let src_args = expand_args(&root.src()[0])?;
        let reduce_args: Vec<(usize, usize)> =
            root.src()[1..].iter().filter_map(|x| expand_args(x)).flatten().copied().collect();
        let lanes: Vec<_> = src_args.iter().filter(|x| !reduce_args.contains(x)).copied().collect();
        if lanes.is_empty() {
            return None;
        }
        let dont = src_args.iter().filter(|x| reduce_args.contains(x)).copied().collect();
        (lanes, dont)
    } else {
        let mut args: Vec<(usize, usize)> = root.src().iter().filter_map(|x| expand_args(x)).flatten().copied().collect();
        if !root.src().iter().any(|x| x.tag() == OpTag::Expand) {
            return None;
        }
        args.sort_unstable();
        args.dedup();
        match root.op() {
            Op::Wmma(arg) => args
                .into_iter()
                .partition(|(axis, _)| !arg.upcast_axes.contains(axis) && !arg.reduce_axes.contains(axis)),
            _ => (args, Vec::new()),
        }
    };

    let is_wmma = matches!(root.op(), Op::Wmma(_));
    let inner_picks = choices_from_args(&dont_expand);
    let mut lanes = Vec::new();
    for rpk in choices_from_args(&lane_args) {
        let mut new_src: SmallVec<[Arc<UOp>; 4]> = SmallVec::new();
        for (i, src) in root.src().iter().enumerate() {
            let src_args = match expand_args(src) {
                // reduce ranges keep their lane structure for the accumulator
                Some(args) if !(is_reduce && i > 0) => args,
                _ => {
                    new_src.push(src.clone());
                    continue;
                }
            };
            let picked = inner_picks
                .iter()
                .map(|lrpk| src.src().get(expand_arg_to_idx(src_args, &merged(&rpk, lrpk))?).cloned())
                .collect::<Option<Vec<_>>>()?;
            if dont_expand.is_empty() || is_wmma {
                new_src.push(picked[0].clone());
            } else {
                new_src.push(UOp::expand(root.dtype(), picked, dont_expand.clone()));
            }
        }
        lanes.push(UOp::new(root.op().clone(), root.dtype(), new_src));
    }

    if let Some(root_args) = expand_args(root) {
        let mut all_args: Vec<(usize, usize)> = root_args.iter().chain(&lane_args).copied().collect();
        all_args.sort_unstable();
        lanes = choices_from_args(&all_args)
            .iter()
            .map(|rpk| {
                let outer = lanes.get(expand_arg_to_idx(&lane_args, rpk)?)?;
                outer.src().get(expand_arg_to_idx(root_args, rpk)?).cloned()
            })
            .collect::<Option<Vec<_>>>()?;
        lane_args = all_args;
    }
    Some(UOp::expand(root.dtype(), lanes, lane_args))
}

fn do_reduce_with_expand(root: &Arc<UOp>, ctx: &mut ExpandContext) -> Option<Arc<UOp>> {
    let Op::Reduce(op) = root.op() else { return None };
    let op = *op;
    let src0 = &root.src()[0];
    let src0_args = expand_args(src0);
    let (reduce_expands, other_expands): (Vec<&Arc<UOp>>, Vec<&Arc<UOp>>) =
        root.src()[1..].iter().filter(|x| x.tag() == OpTag::Expand).partition(|x| {
            let args = expand_args(x).unwrap_or_default();
            src0_args.is_some_and(|outer| args.iter().all(|a| outer.contains(a)))
        });

    let identity = UOp::const_(root.dtype().scalar_dtype(), op.identity(root.dtype_ref().base()));
    let ranges = root.src()[1..].iter().filter(|x| x.tag() != OpTag::Expand).cloned();
    let acc = UOp::new(Op::DefineAcc(ctx.acc_number), root.dtype(), std::iter::once(identity).chain(ranges));
    ctx.acc_number += 1;

    let ret = if reduce_expands.is_empty() {
        acc.alu(op.alu(), src0.clone())
    } else {
        src0.src().iter().fold(acc.clone(), |x, y| x.alu(op.alu(), y.clone()))
    };
    let ret = UOp::phi(acc, ret);

    // lanes of a non-reduced unroll all accumulate the same value; a MAX of
    // repeated values is unchanged, so only SUM is scaled
    if op == ReduceOp::Sum && !other_expands.is_empty() {
        let lanes: usize = other_expands.iter().filter_map(|x| expand_args(x)).flatten().map(|(_, size)| size).product();
        return Some(ret.mul(lanes as i64));
    }
    Some(ret)
}

fn do_contract(con: &Arc<UOp>) -> Option<Arc<UOp>> {
    let Op::Contract(con_args) = con.op() else { return None };
    let ex = &con.src()[0];
    let count = con.dtype_ref().count();
    let repeat = || Some(UOp::vectorize(con.dtype(), std::iter::repeat(ex.clone()).take(count)));

    let Some(ex_args) = expand_args(ex) else { return repeat() };
    if ex_args.len() == 1 && con_args.len() == 1 && con_args[0] == ex_args[0].0 {
        return Some(UOp::vectorize(con.dtype(), ex.src().iter().cloned()));
    }
    if con_args.len() != 1 {
        return None;
    }
    let Some(split) = ex_args.iter().position(|(axis, _)| *axis == con_args[0]) else { return repeat() };
    if ex_args[split].1 != count {
        return None;
    }

    let number_after: usize = ex_args[split + 1..].iter().map(|(_, size)| size).product();
    let to_join: Vec<&[Arc<UOp>]> = ex.src().chunks(number_after).collect();
    let mut srcs = Vec::with_capacity(to_join.len() / count * number_after);
    for group in to_join.chunks(count) {
        for j in 0..number_after {
            srcs.push(UOp::vectorize(con.dtype(), group.iter().map(|chunk| chunk[j].clone())));
        }
    }
    let remaining = ex_args.iter().filter(|(axis, _)| *axis != con_args[0]).copied().collect();
    Some(UOp::expand(con.dtype(), srcs, remaining))
}

fn no_vectorized_alu(alu: &Arc<UOp>) -> Option<Arc<UOp>> {
    let count = alu.dtype_ref().count();
    if count == 1 {
        return None;
    }
    let lane_dtype = alu.dtype().scalar_dtype();
    let lanes = (0..count).map(|i| UOp::new(alu.op().clone(), lane_dtype.clone(), alu.src().iter().map(|s| s.gep(i))));
    Some(UOp::vectorize(alu.dtype(), lanes))
}

/// Expansion rules. Append [`constant_folder`](crate::symbolic::constant_folder)
/// to clean up the per-lane graph in the same pass.
pub fn expander() -> PatternMatcher<ExpandContext> {
    let mut pm = PatternMatcher::new();

    pattern!(pm, UPat::ops(&[
        OpTag::Unary, OpTag::Binary, OpTag::Ternary, OpTag::Cast, OpTag::BitCast, OpTag::Gep, OpTag::Wmma,
        OpTag::Load, OpTag::Store, OpTag::Vectorize, OpTag::Reduce, OpTag::Expand, OpTag::If,
    ]).named("root") => |root| do_expand(root));

    pattern!(pm, UPat::op(OpTag::Reduce).named("root") => |root; ctx| do_reduce_with_expand(root, ctx));
    pattern!(pm, UPat::op(OpTag::Contract).named("con") => |con| do_contract(con));

    pattern!(pm, UPat::op(OpTag::Sink).named("root") => |root| {
        if !root.src().iter().any(|x| x.tag() == OpTag::Expand) {
            return None;
        }
        let flat = root.src().iter().flat_map(|x| match x.op() {
            Op::Expand(_) => x.src().to_vec(),
            _ => vec![x.clone()],
        });
        Some(UOp::sink(flat))
    });

    pattern!(pm, UPat::op(OpTag::Barrier).src(vec![UPat::op(OpTag::Expand).named("ex")]) => |ex| {
        let barrier = UOp::barrier(ex.src().iter().cloned());
        Some(UOp::expand(DType::Void, std::iter::repeat(barrier).take(ex.src().len()), expand_args(ex)?.to_vec()))
    });

    pattern!(pm, UPat::op(OpTag::Expand)
        .arg_fn(|op| matches!(op, Op::Expand(args) if args.is_empty()))
        .src(vec![UPat::var("x")]) => |x| Some(x.clone()));

    pattern!(pm, UPat::ops(&[OpTag::Unary, OpTag::Binary, OpTag::Ternary, OpTag::Cast]).named("alu") => |alu| no_vectorized_alu(alu));

    pm
}
