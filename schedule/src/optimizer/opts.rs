//! `apply_opt`: the single mutating entry point of the optimizer.

use std::sync::Arc;

use kernc_ir::{AstOp, ReduceOp};
use snafu::{ensure, OptionExt};
use tracing::trace;

use super::error::*;
use super::kernel::Kernel;
use super::types::{Opt, OptOps};
use crate::helpers::{prod, round_up};

/// UNROLL amounts above this explode code size.
pub const MAX_UNROLL: usize = 32;
/// UPCAST amounts above this explode register use.
pub const MAX_UPCAST: usize = 8;

impl Kernel {
    /// Apply `opt`, or leave the kernel untouched and say why not.
    ///
    /// With `append_opt` the opt is recorded in [`Kernel::applied_opts`].
    pub fn apply_opt(&mut self, opt: Opt, append_opt: bool) -> Result<(), OptError> {
        let mut next = self.clone();
        next.apply_opt_in_place(opt, append_opt)?;
        *self = next;
        Ok(())
    }

    fn push_opt(&mut self, opt: Opt) {
        Arc::make_mut(&mut self.applied_opts).push(opt);
    }

    fn apply_opt_in_place(&mut self, opt: Opt, append_opt: bool) -> Result<(), OptError> {
        ensure!(
            !self.dont_use_locals || !matches!(opt.op, OptOps::LOCAL | OptOps::GROUP | OptOps::GROUPTOP | OptOps::UPCASTMID),
            LocalsDisabledSnafu { op: opt.op }
        );

        if opt.op == OptOps::TC {
            ensure!(self.applied_opts.is_empty(), TensorCoreNotFirstSnafu);
            let (Some(axis), Some(level)) = (opt.axis, opt.amt) else {
                return TensorCoreArgsSnafu.fail();
            };
            ensure!(self.use_tc == 2 || !self.opts.tensor_cores.is_empty(), NoTensorCoresSnafu);
            ensure!(self.apply_tc_opt(self.use_tc, axis, level)?, TensorCoreNotApplicableSnafu);
            self.push_opt(opt);
            return Ok(());
        }

        let axis = opt.real_axis(self);
        if let Some(axis) = axis {
            ensure!(axis < self.full_shape().len(), InvalidAxisSnafu { axis, len: self.full_shape().len() });
        }
        let amt = match (opt.op, opt.amt) {
            (OptOps::SWAP, amt) => amt,
            (op, Some(amt)) => {
                let axis = axis.context(MissingAxisSnafu { op })?;
                let amt = if amt != 0 { amt } else { self.full_shape()[axis] };
                ensure!(amt != 1, AmountOneSnafu { op });
                let size = self.full_shape()[axis];
                ensure!(op == OptOps::PADTO || size % amt == 0, NotDivisibleSnafu { op, size, amount: amt });
                Some(amt)
            }
            (_, None) => None,
        };

        if let Some(reduceop) = self.reduceop() {
            let uses_smem = matches!(opt.op, OptOps::GROUP | OptOps::GROUPTOP)
                || (self.group_for_reduces > 0 && !matches!(opt.op, OptOps::NOLOCALS | OptOps::PADTO));
            if let (true, Some(amt)) = (uses_smem, amt) {
                let acc_sz = reduceop.dtype().bytes();
                let upcast_idx = self.first_upcast();
                let upcast_sz = prod(
                    self.full_shape()[upcast_idx..]
                        .iter()
                        .zip(&self.sts[0].shape()[upcast_idx..])
                        .filter(|(a, b)| a == b)
                        .map(|(&a, _)| a),
                );
                let fr = self.first_reduce();
                let local_sz = prod(self.full_shape()[fr - self.local_dims..fr + self.group_for_reduces].iter().copied());
                let needed = amt * acc_sz * upcast_sz * local_sz;
                let max = self.opts.shared_max;
                ensure!(needed <= max, SharedMemoryExceededSnafu { needed, max });
            }
        }

        let need_axis = || axis.context(MissingAxisSnafu { op: opt.op });
        let need_amt = || amt.context(MissingAmountSnafu { op: opt.op });
        match opt.op {
            OptOps::TC => {}
            OptOps::LOCAL => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                ensure!(self.opts.has_local, NoLocalSnafu);
                let global_dims = self.global_dims();
                ensure!(axis < global_dims, LocalNotGlobalSnafu { axis, global_dims });
                self.shift_to(axis, amt, false, Some(self.first_reduce()))?;
                self.local_dims += 1;
            }
            OptOps::GROUP | OptOps::GROUPTOP => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                ensure!(self.opts.has_local && self.opts.has_shared, NoSharedSnafu);
                let start = self.first_reduce() + self.group_for_reduces;
                ensure!(axis >= start && axis < self.first_upcast(), GroupNotReduceSnafu);
                ensure!(self.tensor_core.is_none(), GroupWithTensorCoresSnafu);
                ensure!(self.reduceops.len() == 1, GroupMultipleReducesSnafu);
                self.shift_to(axis, amt, opt.op == OptOps::GROUPTOP, Some(start))?;
                self.group_for_reduces += 1;
            }
            OptOps::UNROLL => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                ensure!(axis < self.first_upcast(), UnrollUpcastedSnafu);
                ensure!(amt <= MAX_UNROLL, UnrollTooLargeSnafu { amt });
                // the whole axis moves to the upcast zone
                if self.full_shape()[axis] == amt && axis == self.first_reduce() {
                    self.local_dims += 1;
                }
                if self.full_shape()[axis] == amt && axis < self.first_reduce() + self.group_for_reduces {
                    self.group_for_reduces -= 1;
                }
                self.shift_to(axis, amt, false, None)?;
                self.upcast()?;
            }
            OptOps::UPCAST => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                ensure!(axis < self.first_reduce(), UpcastReduceSnafu);
                if let Some(tc) = &self.tensor_core {
                    let global_dims = self.global_dims();
                    let tc_local = axis >= global_dims && axis < global_dims + tc.threads.len();
                    ensure!(!tc_local, UpcastTensorCoreLocalSnafu { axis });
                }
                ensure!(amt <= MAX_UPCAST, UpcastTooLargeSnafu { amt });
                self.shift_to(axis, amt, false, None)?;
                self.upcast()?;
            }
            OptOps::UPCASTMID => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                let is_image = self.bufs[0].dtype().is_image();
                ensure!(is_image, InvalidUpcastMidSnafu { reason: "output is not an image" });
                ensure!(self.float4_axis(0).is_empty(), InvalidUpcastMidSnafu { reason: "output already vectorized" });
                ensure!(self.group_for_reduces != 0, InvalidUpcastMidSnafu { reason: "no grouped reduce" });
                ensure!(self.first_reduce() <= 2, InvalidUpcastMidSnafu { reason: "too many global axes" });
                ensure!(prod(self.sts[0].shape().iter().copied()) > 1, InvalidUpcastMidSnafu { reason: "scalar output" });
                let axes = self.sts[0].unit_stride_axes(false);
                ensure!(axes.len() == 1, InvalidUpcastMidSnafu { reason: "needs exactly one unit stride axis" });
                ensure!(axes[0] == axis, InvalidUpcastMidSnafu { reason: "axis is not the unit stride axis" });
                ensure!(amt == 4, InvalidUpcastMidSnafu { reason: "amount must be 4" });
                let insert_before = self.first_reduce() + self.group_for_reduces;
                self.shift_to(axis, amt, false, Some(insert_before))?;
                self.group_for_reduces += 1;
            }
            OptOps::NOLOCALS => {
                ensure!(self.opts.has_local && !self.dont_use_locals, NoLocalsMeaninglessSnafu);
                ensure!(self.local_dims == 0 && self.group_for_reduces == 0, NoLocalsWithLocalsSnafu);
                self.dont_use_locals = true;
            }
            OptOps::SWAP => {
                let axis = need_axis()?;
                let other = opt.amt.context(MissingAmountSnafu { op: opt.op })?;
                let global_dims = self.global_dims();
                ensure!(axis < other && other < global_dims, InvalidSwapSnafu { axis, other, global_dims });
                let permute: Vec<usize> = (0..self.shape_len())
                    .map(|i| if i == axis { other } else if i == other { axis } else { i })
                    .collect();
                self.reshape_and_permute(None, Some(&permute))?;
            }
            OptOps::MERGE => {
                let axis = need_axis()?;
                ensure!(axis >= self.first_upcast(), MergeNotUpcastedSnafu);
                let end = (axis + 2).min(self.shape_len());
                ensure!(self.full_shape()[axis..end] == self.output_shape()[axis..end], MergeReducesSnafu);
                let permute: Vec<usize> = (0..self.shape_len())
                    .map(|i| if i == axis { axis + 1 } else if i == axis + 1 { axis } else { i })
                    .collect();
                let merge = move |x: &[usize]| -> Vec<usize> {
                    let mut shape = x[..axis].to_vec();
                    shape.push(x[axis] * x.get(axis + 1).copied().unwrap_or(1));
                    shape.extend_from_slice(x.get(axis + 2..).unwrap_or_default());
                    shape
                };
                self.reshape_and_permute(None, Some(&permute))?;
                self.reshape_and_permute(Some(&merge), None)?;
                self.upcasted -= 1;
            }
            OptOps::PADTO => {
                let (axis, amt) = (need_axis()?, need_amt()?);
                ensure!(axis < self.first_upcast(), PadUpcastedSnafu);
                if self.first_reduce() <= axis {
                    let safe = self.reduceop().is_some_and(|r| {
                        matches!(r.op, AstOp::Reduce { op: ReduceOp::Sum, .. })
                            && r.src.iter().all(|s| s.lazyops().iter().all(|x| !x.op.is_unsafe_pad()))
                    });
                    ensure!(safe, PadUnsafeSnafu);
                }
                let mut padded = false;
                for st in self.sts.iter_mut() {
                    let size = st.shape()[axis];
                    if size == 1 {
                        continue;
                    }
                    ensure!(size > amt / 4, PadTooMuchSnafu { size, amt });
                    let ru = round_up(size, amt) - size;
                    if ru > 0 {
                        let pad: Vec<(usize, usize)> =
                            (0..st.ndim()).map(|i| if i == axis { (0, ru) } else { (0, 0) }).collect();
                        *st = st.pad(&pad)?;
                        padded = true;
                    }
                }
                ensure!(padded, NothingPaddedSnafu);
            }
        }

        if append_opt {
            self.push_opt(opt);
        }
        trace!(%opt, shape = %self.colored_shape(true), "applied opt");
        if self.simplify_ones()? {
            if let (Some(tc_opts), Some(axis)) = (self.tensor_core_opts.as_mut(), axis) {
                tc_opts.fix_axes(axis);
            }
        }
        Ok(())
    }
}
