//! Rebuild the kernel AST from the optimized shape state.

use std::collections::HashMap;
use std::sync::Arc;

use kernc_ir::{AstKey, AstNode, AstOp, BinaryOp, KernelInfo, MemBuffer, ShapeTracker, WmmaArg};
use snafu::{ensure, OptionExt};
use tracing::trace;

use super::error::*;
use super::kernel::Kernel;

/// Operand-side view swizzle that lays a tensor core tile out the way the
/// device's WMMA instruction expects.
///
/// Patterns are `(zone, offset)` pairs: zone 0 indexes the warp (local)
/// dims, zone 1 the expanded upcast dims.
#[derive(Debug, Clone, Copy)]
struct TcSwizzle {
    warp_dims: &'static [usize],
    tcd_dims: &'static [usize],
    tcd_expand: &'static [usize],
    pattern_1: &'static [(usize, usize)],
    pattern_2: &'static [(usize, usize)],
}

const AMD_A: TcSwizzle = TcSwizzle {
    warp_dims: &[8, 2, 2],
    tcd_dims: &[16, 8],
    tcd_expand: &[16, 2, 4],
    pattern_1: &[(1, 2), (0, 2), (1, 1), (0, 1)],
    pattern_2: &[(1, 0), (0, 0)],
};

const METAL_A: TcSwizzle = TcSwizzle {
    warp_dims: &[2, 4, 2, 2],
    tcd_dims: &[8, 2],
    tcd_expand: &[2, 2, 2, 2],
    pattern_1: &[(1, 1), (0, 1), (1, 0), (0, 3)],
    pattern_2: &[(0, 0), (0, 2), (1, 3), (1, 2)],
};

const METAL_B: TcSwizzle = TcSwizzle {
    warp_dims: &[2, 4, 2, 2],
    tcd_dims: &[8, 2],
    tcd_expand: &[2, 2, 2, 2],
    pattern_1: &[(0, 0), (1, 1), (1, 2), (0, 2), (1, 0)],
    pattern_2: &[(0, 1), (0, 3), (1, 3)],
};

// mma.m16n8k16 fragment layout
const CUDA_A: TcSwizzle = TcSwizzle {
    warp_dims: &[2, 2, 2, 2, 2],
    tcd_dims: &[8, 2, 4],
    tcd_expand: &[2, 2, 2, 2, 2, 2],
    pattern_1: &[(1, 1), (1, 0), (0, 2), (0, 3), (0, 4)],
    pattern_2: &[(1, 3), (1, 4), (1, 2), (0, 0), (0, 1), (1, 5)],
};

const CUDA_B: TcSwizzle = TcSwizzle {
    warp_dims: &[2, 2, 2, 2, 2],
    tcd_dims: &[8, 2, 4],
    tcd_expand: &[2, 2, 2, 2, 2, 2],
    pattern_1: &[(1, 1), (1, 0), (1, 5), (0, 0), (0, 1)],
    pattern_2: &[(0, 4), (0, 2), (1, 4), (0, 3), (1, 3), (1, 2)],
};

/// Which view transform applies below a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operand {
    Plain,
    Swizzled(SwizzleId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SwizzleId {
    AmdA,
    MetalA,
    MetalB,
    CudaA,
    CudaB,
}

impl SwizzleId {
    fn table(self) -> &'static TcSwizzle {
        match self {
            Self::AmdA => &AMD_A,
            Self::MetalA => &METAL_A,
            Self::MetalB => &METAL_B,
            Self::CudaA => &CUDA_A,
            Self::CudaB => &CUDA_B,
        }
    }
}

/// Per-device WMMA layout: reduce axes, operand lane axes and swizzles,
/// relative to the first upcast axis.
struct TcLayout {
    reduce_axes: &'static [usize],
    upcast_axes: [usize; 3],
    a: Option<SwizzleId>,
    b: Option<SwizzleId>,
}

fn tc_layout(device: &str) -> Result<TcLayout, OptError> {
    Ok(match device {
        "AMD" => TcLayout { reduce_axes: &[0], upcast_axes: [0, 0, 1], a: Some(SwizzleId::AmdA), b: None },
        "METAL" => TcLayout {
            reduce_axes: &[0],
            upcast_axes: [1, 1, 1],
            a: Some(SwizzleId::MetalA),
            b: Some(SwizzleId::MetalB),
        },
        "CUDA" | "NV" => TcLayout {
            reduce_axes: &[0, 1],
            upcast_axes: [0, 2, 2],
            a: Some(SwizzleId::CudaA),
            b: Some(SwizzleId::CudaB),
        },
        device => return UnsupportedDeviceSnafu { device }.fail(),
    })
}

impl Kernel {
    /// The AST with every view replaced by the optimized one.
    ///
    /// Reduce axis lists are recomputed, tensor core reduces become WMMA,
    /// grouped reduces stage their partial result through a local buffer and
    /// the kernel root records the final zone sizes.
    #[tracing::instrument(skip_all)]
    pub fn get_optimized_ast(&self) -> Result<Arc<AstNode>, OptError> {
        let mut memo = HashMap::new();
        let ast = self.fixup_ast(&self.ast, Operand::Plain, &mut memo)?;
        trace!(nodes = memo.len(), "optimized ast");
        Ok(ast)
    }

    fn fix_st(&self, swizzle: &TcSwizzle, st: &ShapeTracker) -> Result<ShapeTracker, OptError> {
        let wd = self.global_dims();
        let tcd = self.first_upcast();
        let shape = st.shape();
        let warp = shape.get(wd..wd + swizzle.warp_dims.len());
        ensure!(
            warp == Some(swizzle.warp_dims),
            TensorCoreLayoutSnafu { detail: format!("warp dims {:?} != {:?}", warp, swizzle.warp_dims) }
        );
        let tcd_slice = shape.get(tcd..tcd + swizzle.tcd_dims.len());
        ensure!(
            tcd_slice == Some(swizzle.tcd_dims),
            TensorCoreLayoutSnafu { detail: format!("tcd dims {:?} != {:?}", tcd_slice, swizzle.tcd_dims) }
        );

        let mut new_shape = shape[..tcd].to_vec();
        new_shape.extend_from_slice(swizzle.tcd_expand);
        new_shape.extend_from_slice(&shape[tcd + swizzle.tcd_dims.len()..]);

        let zone = |&(x, y): &(usize, usize)| y + if x == 0 { wd } else { tcd };
        let mut permaxis: Vec<usize> = (0..wd).collect();
        permaxis.extend(swizzle.pattern_1.iter().map(zone));
        permaxis.extend(wd + swizzle.warp_dims.len()..tcd);
        permaxis.extend(swizzle.pattern_2.iter().map(zone));
        permaxis.extend(tcd + swizzle.tcd_expand.len()..new_shape.len());

        Ok(st.reshape(&new_shape)?.simplify().permute(&permaxis)?.reshape(shape)?.simplify())
    }

    fn fixup_ast(
        &self,
        op: &Arc<AstNode>,
        operand: Operand,
        memo: &mut HashMap<(AstKey, Operand), Arc<AstNode>>,
    ) -> Result<Arc<AstNode>, OptError> {
        if let Some(done) = memo.get(&(op.key(), operand)) {
            return Ok(done.clone());
        }
        let fixed = self.fixup_ast_uncached(op, operand, memo)?;
        memo.insert((op.key(), operand), fixed.clone());
        Ok(fixed)
    }

    fn fixup_srcs(
        &self,
        op: &AstNode,
        operand: Operand,
        memo: &mut HashMap<(AstKey, Operand), Arc<AstNode>>,
    ) -> Result<Vec<Arc<AstNode>>, OptError> {
        op.src.iter().map(|x| self.fixup_ast(x, operand, memo)).collect()
    }

    fn fixup_ast_uncached(
        &self,
        op: &Arc<AstNode>,
        operand: Operand,
        memo: &mut HashMap<(AstKey, Operand), Arc<AstNode>>,
    ) -> Result<Arc<AstNode>, OptError> {
        let arg = match &op.op {
            AstOp::Load(_) | AstOp::Store(_) | AstOp::Const(_) => {
                let idx = self.buf_index(&op.op).context(MalformedSnafu { detail: "buffer not in kernel" })?;
                let st = match operand {
                    Operand::Plain => self.sts[idx].clone(),
                    Operand::Swizzled(id) => self.fix_st(id.table(), &self.sts[idx])?,
                };
                match &op.op {
                    AstOp::Load(mb) => AstOp::Load(MemBuffer { st, ..mb.clone() }),
                    AstOp::Store(mb) => AstOp::Store(MemBuffer { st, ..mb.clone() }),
                    AstOp::Const(cb) => AstOp::Const(kernc_ir::ConstBuffer { st, ..cb.clone() }),
                    other => other.clone(),
                }
            }
            AstOp::Reduce { op: reduce_op, .. } => {
                let index = self
                    .reduceops
                    .iter()
                    .position(|r| r.key() == op.key())
                    .context(MalformedSnafu { detail: "reduce not in kernel" })?;
                let reduce_idx = self.bufs.len() + index * 2;
                let (out, inp) = (self.sts[reduce_idx].shape(), self.sts[reduce_idx + 1].shape());
                let axes: Vec<usize> =
                    (self.first_reduce() + self.group_for_reduces..self.shape_len()).filter(|&i| out[i] != inp[i]).collect();

                if let (true, Some(tc)) = (self.bufs_for_tensor_core.contains_key(&op.key()), &self.tensor_core) {
                    ensure!(operand == Operand::Plain, TensorCoreLayoutSnafu { detail: "nested tensor core" });
                    let mut rsrc = op.src.first().context(MalformedSnafu { detail: "reduce has no source" })?;
                    if matches!(rsrc.op, AstOp::Cast(_)) {
                        rsrc = rsrc.src.first().context(TensorCoreLayoutSnafu { detail: "cast has no source" })?;
                    }
                    ensure!(
                        matches!(rsrc.op, AstOp::Binary(BinaryOp::Mul)) && rsrc.src.len() == 2,
                        TensorCoreLayoutSnafu { detail: "tensor core reduce is not over a MUL" }
                    );

                    let layout = tc_layout(&self.opts.device)?;
                    let tcd = self.first_upcast();
                    let reduce_axes: Vec<usize> = layout.reduce_axes.iter().map(|a| tcd + a).collect();
                    let upcast_axes = layout.upcast_axes.map(|a| tcd + a);
                    let wmma_arg = WmmaArg {
                        name: tc.to_string(),
                        dims: tc.dims,
                        dtype_in: tc.dtype_in.clone(),
                        dtype_out: tc.dtype_out.clone(),
                        sizes: tc.wmma_sizes(),
                        device: self.opts.device.clone(),
                        upcast_axes,
                        reduce_axes: reduce_axes.clone(),
                    };
                    let a = self.fixup_ast(&rsrc.src[0], layout.a.map_or(Operand::Plain, Operand::Swizzled), memo)?;
                    let b = self.fixup_ast(&rsrc.src[1], layout.b.map_or(Operand::Plain, Operand::Swizzled), memo)?;
                    let wmma = AstNode::new(AstOp::Wmma(Arc::new(wmma_arg)), vec![a, b]);
                    let rest: Vec<usize> = axes.into_iter().filter(|i| !reduce_axes.contains(i)).collect();
                    return Ok(if rest.is_empty() { wmma } else { AstNode::reduce(*reduce_op, rest, wmma) });
                }

                if self.group_for_reduces > 0 {
                    let src = self.fixup_srcs(op, operand, memo)?.into_iter().next();
                    let src = src.context(MalformedSnafu { detail: "reduce has no source" })?;
                    let start = AstNode::reduce(*reduce_op, axes, src);
                    let (gd, ld, gfr, fr) = (self.global_dims(), self.local_dims, self.group_for_reduces, self.first_reduce());
                    let mut local_shape = vec![1; gd];
                    local_shape.extend_from_slice(&self.full_shape()[gd..gd + ld + gfr]);
                    local_shape.extend(std::iter::repeat(1).take(self.first_upcast() - gfr - fr));
                    local_shape.extend(self.upcasted_axis(0).into_iter().map(|(size, _, _)| size));
                    let local_buffer = MemBuffer::new(MemBuffer::LOCAL, start.dtype(), ShapeTracker::from_shape(&local_shape));
                    let local_store = AstNode::new(AstOp::Store(local_buffer.clone()), vec![start]);
                    let local_load = AstNode::new(AstOp::Load(local_buffer), vec![local_store]);
                    return Ok(AstNode::reduce(*reduce_op, (fr..fr + gfr).collect(), local_load));
                }
                AstOp::Reduce { op: *reduce_op, axes }
            }
            AstOp::Kernel(_) => AstOp::Kernel(KernelInfo {
                local_dims: self.local_dims,
                upcasted: self.upcasted,
                dont_use_locals: self.dont_use_locals,
            }),
            other => other.clone(),
        };
        Ok(AstNode::new(arg, self.fixup_srcs(op, operand, memo)?))
    }
}
