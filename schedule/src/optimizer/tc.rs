//! Tensor core matching and the per-device opt recipes.
//!
//! A tensor core applies to a SUM over `MUL(a, b)` (optionally CAST) where
//! `a` and `b` are loads broadcast along different global axes: the axis
//! `a` is broadcast over becomes N, the one `b` is broadcast over becomes M,
//! and a reduce axis becomes K.

use std::sync::Arc;

use itertools::iproduct;
use kernc_ir::{AstNode, AstOp, BinaryOp, ReduceOp};
use snafu::OptionExt;
use tracing::debug;

use super::error::*;
use super::kernel::Kernel;
use super::renderer::TensorCore;
use super::types::Opt;
use crate::helpers::prod;

/// Kernel axes chosen for a tensor core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorCoreOptions {
    /// Axes of the N, M and K tile dims.
    pub axes: [usize; 3],
    /// Whether the N and M axes survived simplification.
    pub axes_exist: [bool; 2],
    /// Axes to pad to a tile multiple, as `(axis, tile dim)`.
    pub axis_pads: Vec<(usize, usize)>,
}

impl TensorCoreOptions {
    /// Track the N and M axes after `removed_axis` was dropped.
    pub fn fix_axes(&mut self, removed_axis: usize) {
        for tc_dim in 0..2 {
            if !self.axes_exist[tc_dim] {
                continue;
            }
            if removed_axis < self.axes[tc_dim] {
                self.axes[tc_dim] -= 1;
            } else if removed_axis == self.axes[tc_dim] {
                self.axes_exist[tc_dim] = false;
            }
        }
    }
}

impl Kernel {
    fn tc_axis(&self, dim: usize) -> Result<usize, OptError> {
        self.tensor_core_opts.as_ref().map(|o| o.axes[dim]).context(TensorCoreNotApplicableSnafu)
    }

    /// Match `reduceop` against `tc`, picking the `axis`-th candidate from the end.
    ///
    /// `opt_level` 1 admits casted loads and several reduce axes, 2 also
    /// admits axes that need padding.
    fn create_tc_opts(
        &mut self,
        reduceop: &Arc<AstNode>,
        tc: &TensorCore,
        axis: usize,
        opt_level: usize,
    ) -> Option<TensorCoreOptions> {
        let has_cast = tc.dtype_in != tc.dtype_out;
        let src0 = reduceop.src.first()?;
        if has_cast && !matches!(&src0.op, AstOp::Cast(dt) if *dt == tc.dtype_out) {
            return None;
        }
        let mul_op = if has_cast { src0.src.first()? } else { src0 };
        if !matches!(mul_op.op, AstOp::Binary(BinaryOp::Mul)) {
            return None;
        }

        let buf_index = |src: &AstNode| -> Option<usize> {
            match &src.op {
                AstOp::Load(mb) if mb.dtype == tc.dtype_in => self.buf_index(&src.op),
                AstOp::Cast(dt) if opt_level >= 1 && *dt == tc.dtype_in => self.buf_index(&src.src.first()?.op),
                _ => None,
            }
        };
        let buf0 = buf_index(mul_op.src.first()?)?;
        let buf1 = buf_index(mul_op.src.get(1)?)?;

        let fr = self.first_reduce();
        let shape_len = self.shape_len();
        let strides0 = self.sts[buf0].real_strides(false);
        let strides1 = self.sts[buf1].real_strides(false);
        let axis_buf0: Vec<usize> = (0..fr).filter(|&i| strides0[i] == Some(0)).collect();
        let axis_buf1: Vec<usize> = (0..fr).filter(|&i| strides1[i] == Some(0)).collect();
        if axis_buf0.is_empty() || axis_buf1.is_empty() || !(shape_len - fr == 1 || opt_level >= 1) {
            return None;
        }

        let choices: Vec<(usize, usize, usize)> = iproduct!(axis_buf0, axis_buf1, fr..shape_len).collect();
        let (n, m, k) = *choices.get(choices.len().checked_sub(axis + 1)?)?;
        let full = self.full_shape();
        let axis_pads: Vec<(usize, usize)> =
            [n, m, k].into_iter().zip(tc.dims).filter(|&(x, dim)| full[x] % dim != 0).collect();
        if !axis_pads.is_empty() && opt_level < 2 {
            return None;
        }
        self.bufs_for_tensor_core.insert(reduceop.key(), (buf0, buf1));
        debug!(n, m, k, %tc, "tensor core candidate");
        Some(TensorCoreOptions { axes: [n, m, k], axes_exist: [true, true], axis_pads })
    }

    /// Shape the kernel for the first matching tensor core.
    ///
    /// Returns whether one matched. With `use_tc == 2` the shape is changed
    /// but no WMMA is emitted.
    pub fn apply_tc_opt(&mut self, use_tc: usize, axis: usize, opt_level: usize) -> Result<bool, OptError> {
        let is_sum = self.reduceop().is_some_and(|r| matches!(r.op, AstOp::Reduce { op: ReduceOp::Sum, .. }));
        if use_tc == 0 || !self.opts.has_local || !is_sum {
            return Ok(false);
        }
        let renderer = self.opts.clone();
        for tc in &renderer.tensor_cores {
            let reduceops = self.reduceops.clone();
            let candidates: Vec<Option<TensorCoreOptions>> =
                reduceops.iter().map(|r| self.create_tc_opts(r, tc, axis, opt_level)).collect();
            // fused reduces need the same tensor core axes
            let Some(Some(tc_opts)) = candidates.first().cloned() else { continue };
            if candidates.iter().any(|c| c.as_ref() != Some(&tc_opts)) {
                continue;
            }

            let before_pad = self.clone();
            self.tensor_core_opts = Some(tc_opts.clone());
            let padded = tc_opts.axis_pads.iter().try_for_each(|&(axis, dim)| self.apply_opt(Opt::padto(axis, dim), false));
            if let Err(err) = padded {
                debug!(%err, "tensor core padding failed");
                *self = before_pad;
                continue;
            }

            let threads_of = |dim: usize| prod(tc.threads.iter().filter(|&&(d, _)| d == dim).map(|&(_, amt)| amt));
            match renderer.device.as_str() {
                "AMD" => {
                    // locals first
                    let k_axis = self.tc_axis(2)? - self.first_reduce();
                    self.apply_opt(Opt::unroll(k_axis, tc.dims[2]), false)?;
                    for &(tc_dim, tc_amt) in &tc.threads {
                        let axis = self.tc_axis(tc_dim)?;
                        self.apply_opt(Opt::local(axis, tc_amt), false)?;
                    }
                    for i in 0..2 {
                        let sz = threads_of(i);
                        if tc.dims[i] > sz {
                            let axis = self.tc_axis(i)?;
                            self.apply_opt(Opt::upcast(axis, tc.dims[i] / sz), false)?;
                        }
                    }
                }
                "METAL" => {
                    let k_axis = self.tc_axis(2)? - self.first_reduce();
                    self.apply_opt(Opt::unroll(k_axis, tc.dims[2]), false)?;
                    for i in 0..2 {
                        let sz = threads_of(i);
                        if tc.dims[i] > sz {
                            let axis = self.tc_axis(i)?;
                            self.apply_opt(Opt::upcast(axis, tc.dims[i] / sz), false)?;
                        }
                    }
                    for &(tc_dim, tc_amt) in &tc.threads {
                        let axis = self.tc_axis(tc_dim)?;
                        self.apply_opt(Opt::local(axis, tc_amt), false)?;
                    }
                }
                "CUDA" | "NV" => {
                    for amt in [8, 2] {
                        let k_axis = self.tc_axis(2)? - self.first_reduce();
                        self.apply_opt(Opt::unroll(k_axis, amt), false)?;
                    }
                    let recipe = [Opt::upcast(0, 2), Opt::local(0, 2), Opt::local(0, 2), Opt::local(1, 2), Opt::local(1, 2), Opt::local(1, 2), Opt::upcast(1, 2)];
                    for step in recipe {
                        let tc_dim = step.axis.unwrap_or_default();
                        let opt = Opt::new(step.op, self.tc_axis(tc_dim)?, step.amt);
                        self.apply_opt(opt, false)?;
                    }
                    // two upcasted dims can't be lowered to one WMMA operand
                    self.apply_opt(Opt::merge(self.shape_len() - 2), false)?;
                }
                device => return UnsupportedDeviceSnafu { device }.fail(),
            }
            if use_tc == 1 {
                self.tensor_core = Some(tc.clone());
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Apply a tensor core and its follow-up opts, or leave the kernel as is.
    ///
    /// Without `extra_opts` the N and M axes get late upcasts and N a local
    /// split. Returns whether the tensor core was applied.
    pub fn apply_tensor_cores(&mut self, use_tc: usize, extra_opts: Option<&[Opt]>, axis: usize, tc_opt: usize) -> bool {
        if self.opts.tensor_cores.is_empty() && use_tc != 2 {
            return false;
        }
        let mut k = self.clone();
        k.use_tc = use_tc;
        match k.tensor_cores_with_followups(extra_opts, axis, tc_opt) {
            Ok(()) => {
                *self = k;
                true
            }
            Err(err) => {
                debug!(%err, "tensor cores not applied");
                false
            }
        }
    }

    fn tensor_cores_with_followups(&mut self, extra_opts: Option<&[Opt]>, axis: usize, tc_opt: usize) -> Result<(), OptError> {
        self.apply_opt(Opt::tc(axis, tc_opt), true)?;
        if self.tensor_core_opts.is_none() {
            return Ok(());
        }
        if let Some(extra_opts) = extra_opts {
            for &opt in extra_opts {
                self.apply_opt(opt, true)?;
            }
            return Ok(());
        }

        self.late_upcast_tc(1)?;
        self.late_upcast_tc(0)?;
        let n_axis = self.tensor_core_opts.as_ref().filter(|o| o.axes_exist[0]).map(|o| o.axes[0]);
        if let (true, Some(axis)) = (self.tensor_core.is_some(), n_axis) {
            if let Some(upc) = [4, 2].into_iter().find(|upc| self.full_shape()[axis] % upc == 0) {
                self.apply_opt(Opt::local(axis, upc), true)?;
            }
        }
        Ok(())
    }

    fn late_upcast_tc(&mut self, tc_dim: usize) -> Result<(), OptError> {
        let Some(axis) = self.tensor_core_opts.as_ref().filter(|o| o.axes_exist[tc_dim]).map(|o| o.axes[tc_dim]) else {
            return Ok(());
        };
        let ax_div = [5, 4, 3, 2].into_iter().find(|upc| self.full_shape()[axis] % upc == 0);
        if let Some(ax_div) = ax_div {
            self.apply_opt(Opt::upcast(axis, ax_div), true)?;
        }
        Ok(())
    }
}
