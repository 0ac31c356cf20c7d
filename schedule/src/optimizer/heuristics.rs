//! Hand-coded optimization heuristics.
//!
//! A fixed decision sequence that gets reasonable kernels without search:
//! matvec → grouping → image float4 → masked upcasts → broadcast upcasts →
//! unroll → fallback upcast → locals.

use itertools::{iproduct, Itertools};
use kernc_ir::{AstOp, BinaryOp, ReduceOp};
use snafu::ensure;
use tracing::debug;

use super::config::{HeuristicsConfig, OptimizerConfig};
use super::error::*;
use super::kernel::Kernel;
use super::types::Opt;
use crate::helpers::prod;

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Optimize `k` the way the compiler does when no search is requested.
///
/// Tensor cores are tried first; if none apply, the hand-coded heuristics
/// run. With [`OptStrategy::None`](super::OptStrategy::None) only the
/// optimizations needed for correctness are applied.
#[tracing::instrument(skip_all, fields(kernel = %k.base_name()))]
pub fn optimize_kernel(k: &mut Kernel, config: &OptimizerConfig) -> Result<(), OptError> {
    if config.strategy.is_none() {
        return required_optimizations(k);
    }
    let h = &config.heuristics;
    if k.apply_tensor_cores(h.tc_enabled.as_usize(), None, 0, h.tc_opt.as_usize()) {
        debug!(opts = ?k.applied_opts, "tensor cores applied");
        return Ok(());
    }
    hand_coded_optimizations(k, h)?;
    debug!(opts = ?k.applied_opts, "heuristics applied");
    Ok(())
}

/// Image outputs must be written four channels at a time.
pub fn required_optimizations(k: &mut Kernel) -> Result<(), OptError> {
    if !k.bufs[0].dtype().is_image() {
        return Ok(());
    }
    let st = &k.sts[0];
    let axes: Vec<usize> = st.unit_stride_axes(true).into_iter().filter(|&i| st.shape()[i] % 4 == 0).collect();
    ensure!(!axes.is_empty(), ImageNoUnitStrideSnafu);
    if axes.iter().all(|&x| x < k.first_upcast()) && !k.upcast_in_mid_reduce_axes().contains(&axes[0]) {
        k.apply_opt(Opt::upcast(axes[0], 4), true)?;
    }
    Ok(())
}

/// Apply the hand-coded heuristics to `k`.
pub fn hand_coded_optimizations(k: &mut Kernel, config: &HeuristicsConfig) -> Result<(), OptError> {
    required_optimizations(k)?;

    if try_matvec(k, config)? {
        return Ok(());
    }
    try_grouping(k)?;
    apply_image_upcasts(k)?;
    // nothing else is safe on top of a grouped reduce
    if k.group_for_reduces > 0 {
        return Ok(());
    }

    apply_masked_upcasts(k)?;
    apply_broadcast_upcasts(k)?;
    apply_unroll(k)?;
    apply_default_upcast(k)?;
    apply_local_dims(k, config)?;
    Ok(())
}

// ============================================================================
// STEPS
// ============================================================================

fn try_matvec(k: &mut Kernel, config: &HeuristicsConfig) -> Result<bool, OptError> {
    let (bs, tpr, rpt) = (config.matvec_blocksize, config.matvec_threads_per_row, config.matvec_rows_per_thread);
    if !(k.opts.has_local && k.opts.has_shared && config.matvec_enabled && (bs > 1 || tpr > 1 || rpt > 1)) {
        return Ok(false);
    }
    if k.full_shape().len() < 2 {
        return Ok(false);
    }
    let Some(reduceop) = k.reduceop().cloned() else { return Ok(false) };
    if !matches!(reduceop.op, AstOp::Reduce { op: ReduceOp::Sum, .. }) {
        return Ok(false);
    }
    let Some(mulop) = reduceop.src.first() else { return Ok(false) };
    let operands = match (&mulop.op, mulop.src.first(), mulop.src.get(1)) {
        (AstOp::Binary(BinaryOp::Mul), Some(a), Some(b)) if matches!(a.op, AstOp::Load(_)) && matches!(b.op, AstOp::Load(_)) => {
            k.buf_index(&a.op).zip(k.buf_index(&b.op))
        }
        _ => None,
    };
    let Some((b0, b1)) = operands else { return Ok(false) };

    let (st0, st1) = (&k.sts[b0], &k.sts[b1]);
    let (strides0, strides1) = (st0.real_strides(false), st1.real_strides(false));
    let has_expanded_axis =
        |shape: &[usize], strides: &[Option<i64>]| shape.iter().zip(strides).any(|(&s, &st)| s > 1 && st == Some(0));
    let fr = k.first_reduce();
    if strides0.get(fr).copied().flatten() != Some(1)
        || (has_expanded_axis(st0.shape(), &strides0) && has_expanded_axis(st1.shape(), &strides1))
    {
        return Ok(false);
    }

    for global_idx in 0..k.global_dims() {
        let full = k.full_shape();
        if full[fr] % tpr == 0 && full[global_idx] % (bs * rpt) == 0 {
            debug!(shape = ?full, fr, bs, tpr, rpt, "matvec");
            if tpr > 1 {
                k.apply_opt(Opt::group(0, tpr), true)?;
            }
            if bs > 1 {
                k.apply_opt(Opt::local(global_idx, bs), true)?;
            }
            if rpt > 1 {
                k.apply_opt(Opt::upcast(global_idx, rpt), true)?;
            }
            return Ok(true);
        }
    }
    Ok(false)
}

fn try_grouping(k: &mut Kernel) -> Result<(), OptError> {
    if !(k.opts.has_local && k.opts.has_shared) {
        return Ok(());
    }
    let fr = k.first_reduce();
    let out_size = prod(k.sts[0].shape()[..fr].iter().copied());
    if k.float4_axis(0).is_empty() && fr <= 2 && fr < k.shape_len() && out_size <= 2048 {
        let sizes: &[usize] = if out_size <= 32 { &[256, 16] } else { &[16] };
        for &sz in sizes {
            if k.sts.iter().all(|st| st.shape()[fr] % sz == 0 || st.shape()[fr] == 1) {
                // may not fit in shared memory
                match k.apply_opt(Opt::grouptop(0, sz), true) {
                    Ok(()) => break,
                    Err(err) => debug!(%err, sz, "grouping skipped"),
                }
            }
        }
    }

    // upcast in the middle of the reduce, images only
    let fr = k.first_reduce();
    if k.bufs[0].dtype().is_image()
        && k.float4_axis(0).is_empty()
        && k.group_for_reduces > 0
        && fr <= 2
        && prod(k.sts[0].shape().iter().copied()) > 1
    {
        let axes = k.sts[0].unit_stride_axes(false);
        ensure!(axes.len() == 1, InvalidUpcastMidSnafu { reason: "needs exactly one unit stride axis" });
        if k.sts[0].shape()[axes[0]] % 4 == 0 {
            k.apply_opt(Opt::upcastmid(axes[0], 4), true)?;
        }
    }
    Ok(())
}

fn apply_image_upcasts(k: &mut Kernel) -> Result<(), OptError> {
    for buf_index in 0..k.bufs.len() {
        if !k.bufs[buf_index].dtype().is_image() {
            continue;
        }
        let st = &k.sts[buf_index];
        let axes: Vec<usize> = st.unit_stride_axes(true).into_iter().filter(|&i| st.shape()[i] % 4 == 0).collect();
        let Some(&first) = axes.first() else { continue };
        if axes.iter().all(|&x| x < k.first_upcast()) && !k.upcast_in_mid_reduce_axes().contains(&first) {
            let fr = k.first_reduce();
            let opt = if first < fr { Opt::upcast(first, 4) } else { Opt::unroll(first - fr, 4) };
            k.apply_opt(opt, true)?;
        }
    }
    Ok(())
}

/// Small masked axes usually come from stacking; upcast them whole.
fn apply_masked_upcasts(k: &mut Kernel) -> Result<(), OptError> {
    let full = k.full_shape();
    let upcast_size = k.upcast_size();
    let mut to_upcast: Vec<usize> = Vec::new();
    for axis in 0..k.first_reduce() {
        let pending = prod(to_upcast.iter().map(|&j| full[j]));
        if full[axis] <= 7 && k.sts.iter().any(|st| st.axis_is_masked(axis)) && upcast_size * pending * full[axis] <= 7 * 7 {
            debug!(axis, "upcasting masked axis");
            to_upcast.push(axis);
        }
    }
    for axis in to_upcast.into_iter().rev() {
        k.apply_opt(Opt::upcast(axis, 0), true)?;
    }
    Ok(())
}

/// Upcast broadcast (stride 0) axes while the output stays large.
fn apply_broadcast_upcasts(k: &mut Kernel) -> Result<(), OptError> {
    let mut upcasted_axis: Vec<usize> = Vec::new();
    while prod(k.sts[0].shape()[..k.first_reduce()].iter().copied()) >= 1024 {
        let mut choices: Vec<(usize, i64, usize, usize)> = Vec::new();
        for (axis, amt) in iproduct!(0..k.first_reduce(), [3, 4]) {
            if upcasted_axis.contains(&axis) || k.full_shape()[axis] % amt != 0 {
                continue;
            }
            let broadcast = k.sts.iter().enumerate().any(|(buf_index, st)| {
                st.view().strides[axis] == 0 && !k.upcasted_axis(buf_index).iter().any(|x| x.1 == Some(0))
            });
            if broadcast {
                let positive = k.sts.iter().filter(|st| st.view().strides[axis] > 0).count();
                let total: i64 = k.sts.iter().map(|st| st.view().strides[axis]).sum();
                choices.push((positive, total, axis, amt));
            }
        }
        let Some(&(_, _, axis, amt)) = choices.iter().min() else { break };
        debug!(?choices, "float4 merging axis");
        k.apply_opt(Opt::upcast(axis, amt), true)?;
        upcasted_axis.push(axis);
    }
    Ok(())
}

/// Unroll a small trailing reduce axis, and a second one if both are tiny.
fn apply_unroll(k: &mut Kernel) -> Result<(), OptError> {
    let fr = k.first_reduce();
    let upcast_reduces = k.upcasted_axis(k.full_buf_index).iter().any(|&(_, _, r)| r);
    if !(fr < k.first_upcast() && (k.upcast_size() <= 4 || !upcast_reduces) && (k.upcasted == 0 || k.upcast_size() < 64)) {
        return Ok(());
    }
    let Some(&s) = k.full_unupcasted_shape().last() else { return Ok(()) };
    let last_reduce = |k: &Kernel| k.full_unupcasted_shape().len() - 1 - k.first_reduce();
    if s <= 32 {
        k.apply_opt(Opt::unroll(last_reduce(k), 0), true)?;
        let s2 = k.full_unupcasted_shape().last().copied();
        if k.first_reduce() < k.first_upcast() && s <= 3 && s2.is_some_and(|s2| s2 <= 3) {
            k.apply_opt(Opt::unroll(last_reduce(k), 0), true)?;
        }
    } else if s % 4 == 0 {
        k.apply_opt(Opt::unroll(last_reduce(k), 4), true)?;
    }
    Ok(())
}

fn apply_default_upcast(k: &mut Kernel) -> Result<(), OptError> {
    let unupcasted = k.full_unupcasted_shape();
    let last_axis = unupcasted.len().checked_sub(1);
    if let (0, Some(axis)) = (k.upcasted, last_axis) {
        if k.full_shape()[axis] % 4 == 0 {
            k.apply_opt(Opt::upcast(axis, 4), true)?;
        }
    }
    Ok(())
}

/// Pick up to three local axes, broadcast axes first.
fn apply_local_dims(k: &mut Kernel, config: &HeuristicsConfig) -> Result<(), OptError> {
    if !k.opts.has_local {
        return Ok(());
    }
    if config.disable_locals && k.local_dims == 0 && k.group_for_reduces == 0 {
        return k.apply_opt(Opt::nolocals(), true);
    }

    let ranking = (0..k.first_reduce())
        .map(|axis| (k.sts.iter().any(|st| st.view().strides[axis] == 0), axis))
        .sorted_by(|a, b| b.cmp(a));
    let mut to_local: Vec<(usize, usize)> = Vec::new();
    for (_, axis) in ranking {
        let local_size = prod(to_local.iter().map(|&(_, sz)| sz));
        let candidates = (axis == 0).then_some(32).into_iter().chain([16, 8, 4, 3, 2]);
        if let Some(sz) = candidates.into_iter().find(|&x| k.full_shape()[axis] % x == 0 && local_size * x <= 128) {
            to_local.push((axis, sz));
        }
    }

    let mut deleted_shape = 0;
    for (axis, local_sz) in to_local.into_iter().take(3).sorted() {
        let axis = axis - deleted_shape;
        let will_delete_shape = local_sz == k.full_shape()[axis];
        k.apply_opt(Opt::local(axis, local_sz), true)?;
        if will_delete_shape {
            deleted_shape += 1;
        }
    }
    Ok(())
}
