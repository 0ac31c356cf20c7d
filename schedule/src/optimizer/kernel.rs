//! Shape-optimization state of one kernel.
//!
//! Every buffer of the kernel (plus the input and output of every reduce)
//! has a view over the same N-dimensional shape. Opts reshape and permute
//! all of them together, and the counters below split the axes into zones:
//!
//! ```text
//! | global | local | group | reduce | upcast |
//! 0        ^ global_dims    ^ first_reduce + group_for_reduces
//!                  ^ first_reduce    ^ shape_len - upcasted
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use colored::{Color, Colorize};
use itertools::Itertools;
use kernc_ir::prelude::*;
use kernc_ir::{verify_ast, AstKey, AstNode, AstOp, ConstBuffer, MemBuffer, ShapeTracker};
use once_cell::sync::{Lazy, OnceCell};
use papaya::{Compute, Operation};
use snafu::{ensure, OptionExt};
use tracing::trace;

use super::error::*;
use super::renderer::{Renderer, TensorCore};
use super::tc::TensorCoreOptions;
use super::types::Opt;
use crate::error::{CompileError, MissingViewSnafu};
use crate::helpers::{get_contraction, prod};

/// Times each kernel name was handed out, for disambiguation.
static KERNEL_NAMES: Lazy<papaya::HashMap<String, usize>> = Lazy::new(papaya::HashMap::new);

/// A buffer argument of the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KernelBuffer {
    Mem(MemBuffer),
    Const(ConstBuffer),
}

impl KernelBuffer {
    pub fn of(op: &AstOp) -> Option<Self> {
        match op {
            AstOp::Load(mb) | AstOp::Store(mb) => Some(Self::Mem(mb.clone())),
            AstOp::Const(cb) => Some(Self::Const(cb.clone())),
            _ => None,
        }
    }

    pub fn st(&self) -> &ShapeTracker {
        match self {
            Self::Mem(mb) => &mb.st,
            Self::Const(cb) => &cb.st,
        }
    }

    pub fn dtype(&self) -> &DType {
        match self {
            Self::Mem(mb) => &mb.dtype,
            Self::Const(cb) => &cb.dtype,
        }
    }

    pub fn mem(&self) -> Option<&MemBuffer> {
        match self {
            Self::Mem(mb) => Some(mb),
            Self::Const(_) => None,
        }
    }
}

/// Zone of an axis, as shown by [`Kernel::colored_shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Global,
    /// Global axis of a kernel launched without workgroups.
    GlobalNoLocals,
    Local,
    /// Grouped reduce axis that stays upcasted in the middle of the reduce.
    GroupUpcastMid,
    Group,
    Reduce,
    /// Upcasted reduce axis.
    Unroll,
    Upcast,
}

impl AxisKind {
    pub fn color(&self) -> Color {
        match self {
            Self::Global => Color::Blue,
            Self::GlobalNoLocals => Color::BrightBlue,
            Self::Local => Color::Cyan,
            Self::GroupUpcastMid => Color::White,
            Self::Group => Color::Green,
            Self::Reduce => Color::Red,
            Self::Unroll => Color::Magenta,
            Self::Upcast => Color::Yellow,
        }
    }

    /// Counts towards the upcast product.
    pub fn is_upcast(&self) -> bool {
        matches!(self, Self::Unroll | Self::Upcast)
    }

    /// Counts towards the workgroup size.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local | Self::Group | Self::GroupUpcastMid)
    }
}

/// Shape-optimization state of one kernel AST on one target.
///
/// Cloning is cheap: views are shared immutable stacks and the opt history
/// is copied only when a clone applies a new opt.
#[derive(Debug, Clone)]
pub struct Kernel {
    pub ast: Arc<AstNode>,
    pub opts: Arc<Renderer>,

    /// Reduce nodes, children first.
    pub reduceops: Arc<[Arc<AstNode>]>,
    /// Distinct buffer arguments, in AST preorder.
    pub bufs: Arc<[KernelBuffer]>,
    /// Buffer whose shape is the full (pre-reduce) shape.
    pub full_buf_index: usize,
    /// One view per buffer, then the input and output view of every reduce.
    pub sts: Vec<ShapeTracker>,

    pub applied_opts: Arc<Vec<Opt>>,
    pub group_for_reduces: usize,
    pub upcasted: usize,
    pub local_dims: usize,
    pub dont_use_locals: bool,

    /// Tensor core usage level for TC opts (0 off, 1 on, 2 shape only).
    pub use_tc: usize,
    pub tensor_core: Option<TensorCore>,
    pub tensor_core_opts: Option<TensorCoreOptions>,
    /// Operand buffers of each tensor core reduce.
    pub bufs_for_tensor_core: HashMap<AstKey, (usize, usize)>,

    /// Name handed out by [`Kernel::name`], cleared when the shape changes.
    registered_name: OnceCell<String>,
}

impl Kernel {
    /// Verify `ast` and build the initial shape state.
    ///
    /// A bare STORE is wrapped in a KERNEL root.
    #[tracing::instrument(skip_all)]
    pub fn new(ast: Arc<AstNode>, opts: Arc<Renderer>) -> Result<Self, CompileError> {
        let ast = if matches!(ast.op, AstOp::Store(_)) { AstNode::kernel(vec![ast]) } else { ast };
        let views = verify_ast(&ast)?;

        let reduceops: Vec<Arc<AstNode>> =
            ast.toposort().into_iter().filter(|x| matches!(x.op, AstOp::Reduce { .. })).collect();

        let mut bufs: Vec<KernelBuffer> = Vec::new();
        for buf in ast.lazyops().iter().filter_map(|x| KernelBuffer::of(&x.op)) {
            if !bufs.contains(&buf) {
                bufs.push(buf);
            }
        }
        let full_buf_index = reduceops
            .iter()
            .flat_map(|r| r.lazyops())
            .find_map(|x| KernelBuffer::of(&x.op))
            .and_then(|early| bufs.iter().position(|b| *b == early))
            .unwrap_or(0);

        let mut sts: Vec<ShapeTracker> = bufs.iter().map(|b| b.st().clone()).collect();
        for r in &reduceops {
            let view = |node: &AstNode| views.get(&node.key()).cloned().context(MissingViewSnafu { op: node.op.tag().to_string() });
            sts.push(view(r)?);
            let src = r.src.first().context(MissingViewSnafu { op: r.op.tag().to_string() })?;
            sts.push(view(src)?);
        }

        let dont_use_locals = match &ast.op {
            AstOp::Kernel(info) => info.dont_use_locals,
            _ => false,
        };
        let mut k = Self {
            ast,
            opts,
            reduceops: reduceops.into(),
            bufs: bufs.into(),
            full_buf_index,
            sts,
            applied_opts: Arc::new(Vec::new()),
            group_for_reduces: 0,
            upcasted: 0,
            local_dims: 0,
            dont_use_locals,
            use_tc: 1,
            tensor_core: None,
            tensor_core_opts: None,
            bufs_for_tensor_core: HashMap::new(),
            registered_name: OnceCell::new(),
        };

        // reduce axes go last
        if k.shape_len() > 0 {
            let (full, out) = (k.full_shape(), k.output_shape());
            let permute: Vec<usize> = (0..full.len())
                .filter(|&i| full[i] == out[i])
                .chain((0..full.len()).filter(|&i| full[i] != out[i]))
                .collect();
            k.reshape_and_permute(None, Some(&permute))?;
        }
        k.simplify_ones()?;
        k.simplify_merge_adjacent()?;
        trace!(shape = ?k.full_shape(), bufs = k.bufs.len(), reduces = k.reduceops.len(), "kernel created");
        Ok(k)
    }

    // ========================================================================
    // Zones
    // ========================================================================

    pub fn shape_len(&self) -> usize {
        self.sts.first().map_or(0, ShapeTracker::ndim)
    }

    pub fn full_shape(&self) -> &[usize] {
        self.sts[self.full_buf_index].shape()
    }

    pub fn output_shape(&self) -> &[usize] {
        self.sts[0].shape()
    }

    pub fn full_unupcasted_shape(&self) -> &[usize] {
        &self.full_shape()[..self.first_upcast()]
    }

    pub fn first_upcast(&self) -> usize {
        self.shape_len() - self.upcasted
    }

    /// First axis where the output is smaller than the full shape.
    pub fn first_reduce(&self) -> usize {
        let end = self.first_upcast();
        let (out, full) = (self.output_shape(), self.full_shape());
        (0..end).find(|&i| out[i] != full[i]).unwrap_or(end)
    }

    pub fn global_dims(&self) -> usize {
        self.first_reduce() - self.local_dims
    }

    /// The single reduce op; kernels with several use the first.
    pub fn reduceop(&self) -> Option<&Arc<AstNode>> {
        self.reduceops.first()
    }

    /// Grouped axes that are not reduced by the first stage.
    pub fn upcast_in_mid_reduce_axes(&self) -> Vec<usize> {
        let fr = self.first_reduce();
        (fr..fr + self.group_for_reduces).filter(|&j| self.full_shape()[j] == self.sts[0].shape()[j]).collect()
    }

    /// Upcasted axes of buffer `i` with unit stride and a size divisible by 4,
    /// relative to the first upcasted axis.
    pub fn float4_axis(&self, i: usize) -> Vec<usize> {
        let start = self.first_upcast();
        let st = &self.sts[i];
        st.unit_stride_axes(false)
            .into_iter()
            .filter(|&x| x >= start && st.shape()[x] % 4 == 0)
            .map(|x| x - start)
            .collect()
    }

    /// `(size, stride, is_reduce)` of every upcasted axis of buffer `i`.
    pub fn upcasted_axis(&self, i: usize) -> Vec<(usize, Option<i64>, bool)> {
        let start = self.first_upcast();
        let st = &self.sts[i];
        let strides = st.real_strides(false);
        (start..self.shape_len())
            .map(|x| (st.shape()[x], strides[x], self.sts[0].shape()[x] != self.full_shape()[x]))
            .collect()
    }

    pub fn colors(&self) -> Vec<AxisKind> {
        let global = if self.dont_use_locals { AxisKind::GlobalNoLocals } else { AxisKind::Global };
        let fr = self.first_reduce();
        let mid = self.upcast_in_mid_reduce_axes();
        let mut colors = vec![global; self.global_dims()];
        colors.extend(std::iter::repeat(AxisKind::Local).take(self.local_dims));
        colors.extend(
            (fr..fr + self.group_for_reduces)
                .map(|i| if mid.contains(&i) { AxisKind::GroupUpcastMid } else { AxisKind::Group }),
        );
        colors.extend(std::iter::repeat(AxisKind::Reduce).take(self.first_upcast() - fr - self.group_for_reduces));
        colors.extend((self.first_upcast()..self.shape_len()).map(|i| {
            if self.full_shape()[i] != self.sts[0].shape()[i] { AxisKind::Unroll } else { AxisKind::Upcast }
        }));
        colors
    }

    /// The full shape, each axis colored by its zone.
    pub fn colored_shape(&self, dense: bool) -> String {
        self.full_shape()
            .iter()
            .zip(self.colors())
            .map(|(s, kind)| {
                let s = if dense { s.to_string() } else { format!("{s:4}") };
                s.color(kind.color()).to_string()
            })
            .join(" ")
    }

    /// Kernel name without the disambiguation suffix.
    pub fn base_name(&self) -> String {
        let kind = if !self.reduceops.is_empty() {
            "r"
        } else if self.ast.lazyops().iter().all(|x| x.op.is_buffer() || matches!(x.op, AstOp::Kernel(_))) {
            "C"
        } else {
            "E"
        };
        let outputs = self.ast.src.len();
        let outputs = if outputs > 1 { format!("{outputs}_") } else { "_".to_string() };
        format!("{kind}{outputs}{}", self.full_shape().iter().join("_"))
    }

    /// Register a function name for this kernel.
    ///
    /// The n-th kernel with the same base name gets an `n{n-1}` suffix. The
    /// name is registered once per kernel shape; later calls return it again.
    pub fn name(&self) -> String {
        self.registered_name.get_or_init(|| self.register_name()).clone()
    }

    fn register_name(&self) -> String {
        let base = self.base_name();
        let guard = KERNEL_NAMES.guard();
        let count = match KERNEL_NAMES.compute(
            base.clone(),
            |entry| -> Operation<usize, ()> { Operation::Insert(entry.map_or(1, |(_, n)| n + 1)) },
            &guard,
        ) {
            Compute::Inserted(_, n) => *n,
            Compute::Updated { new: (_, n), .. } => *n,
            _ => 1,
        };
        if count > 1 { format!("{base}n{}", count - 1) } else { base }
    }

    // ========================================================================
    // Movement
    // ========================================================================

    /// Reshape then permute every view.
    pub fn reshape_and_permute(
        &mut self,
        new_shape: Option<&dyn Fn(&[usize]) -> Vec<usize>>,
        axis: Option<&[usize]>,
    ) -> Result<(), OptError> {
        let mut sts = Vec::with_capacity(self.sts.len());
        for st in &self.sts {
            let mut st = st.clone();
            if let Some(f) = new_shape {
                st = st.reshape(&f(st.shape()))?;
            }
            if let Some(axis) = axis {
                st = st.permute(axis)?;
            }
            sts.push(st);
        }
        self.sts = sts;
        self.registered_name = OnceCell::new();
        Ok(())
    }

    /// Split `axis` by `amount` and move the new axis before `insert_before`
    /// (the end when `None`). `top` takes the outer part of the split.
    pub fn shift_to(&mut self, axis: usize, amount: usize, top: bool, insert_before: Option<usize>) -> Result<(), OptError> {
        let shape_len = self.shape_len();
        let mut insert_before = insert_before.unwrap_or(shape_len);
        let move_axis = if top { axis } else { axis + 1 };
        if move_axis < insert_before {
            insert_before += 1;
        }
        let split = move |x: &[usize]| -> Vec<usize> {
            let parts = match (x[axis] > 1, top) {
                (false, _) => [1, 1],
                (true, true) => [amount, x[axis] / amount],
                (true, false) => [x[axis] / amount, amount],
            };
            x[..axis].iter().chain(&parts).chain(&x[axis + 1..]).copied().collect()
        };
        let permute: Vec<usize> = (0..insert_before)
            .filter(|&i| i != move_axis)
            .chain(std::iter::once(move_axis))
            .chain((insert_before..shape_len + 1).filter(|&i| i != move_axis))
            .collect();
        self.reshape_and_permute(Some(&split), Some(&permute))
    }

    /// Drop axes of size 1 in the full shape, keeping the zone counters in
    /// step. Returns whether anything was dropped.
    pub fn simplify_ones(&mut self) -> Result<bool, OptError> {
        let shape_len = self.shape_len();
        if shape_len == 0 {
            return Ok(false);
        }
        let all_ones: Vec<bool> = self.full_shape().iter().map(|&s| s == 1).collect();
        let fr = self.first_reduce();
        self.local_dims -= all_ones[fr - self.local_dims..fr].iter().filter(|&&x| x).count();
        self.upcasted -= all_ones[shape_len - self.upcasted..].iter().filter(|&&x| x).count();
        let ones = all_ones.clone();
        let drop_ones = move |x: &[usize]| -> Vec<usize> {
            x.iter().zip(&ones).filter_map(|(&s, &one)| (!one).then_some(s)).collect()
        };
        self.reshape_and_permute(Some(&drop_ones), None)?;
        Ok(all_ones.contains(&true))
    }

    /// Merge adjacent axes that every view walks contiguously.
    pub fn simplify_merge_adjacent(&mut self) -> Result<(), OptError> {
        let shape_len = self.shape_len();
        if shape_len == 0 {
            return Ok(());
        }
        let mut shapes: Vec<Vec<usize>> = self.sts.iter().map(|st| st.shape().to_vec()).collect();
        let mut strides: Vec<Vec<Option<i64>>> = self.sts.iter().map(|st| st.real_strides(false)).collect();

        // an image output can only merge axes that stay within one image dim
        if let Some(base_shape) = self.bufs.first().and_then(|b| b.dtype().image_shape()) {
            let output_shape = self.output_shape().to_vec();
            if let Some(groups) = get_contraction(&output_shape, base_shape) {
                let mut fake_strides = Vec::with_capacity(shape_len);
                for (i, group) in groups.iter().enumerate() {
                    let shape_a: Vec<usize> = group.iter().map(|&x| output_shape[x]).collect();
                    let st = ShapeTracker::from_shape(&[base_shape[i]]).reshape(&shape_a)?;
                    fake_strides.extend(st.real_strides(false));
                }
                shapes.push(output_shape);
                strides.push(fake_strides);
            }
        }

        let first_reduce = self.first_reduce();
        let mut rets: Vec<Vec<(usize, Option<i64>)>> =
            shapes.iter().zip(&strides).map(|(s, st)| vec![(s[0], st[0])]).collect();
        for i in 1..shape_len {
            let mergeable = i != first_reduce
                && shapes.iter().zip(&strides).zip(&rets).all(|((s, st), ret)| {
                    let last_st = ret.last().and_then(|&(_, st)| st);
                    match (st[i], last_st) {
                        (Some(0), Some(last)) => last == 0,
                        (Some(sti), Some(last)) => last == s[i] as i64 * sti,
                        _ => false,
                    }
                });
            for ((s, st), ret) in shapes.iter().zip(&strides).zip(rets.iter_mut()) {
                match ret.last_mut() {
                    Some(last) if mergeable => *last = (last.0 * s[i], st[i]),
                    _ => ret.push((s[i], st[i])),
                }
            }
        }

        let mut sts = Vec::with_capacity(self.sts.len());
        for (st, ret) in self.sts.iter().zip(&rets) {
            let shape: Vec<usize> = ret.iter().map(|&(s, _)| s).collect();
            sts.push(st.reshape(&shape)?);
        }
        self.sts = sts;
        self.registered_name = OnceCell::new();
        Ok(())
    }

    /// Make the last axis an upcast axis.
    pub fn upcast(&mut self) -> Result<(), OptError> {
        ensure!(self.full_shape().last().is_some_and(|&s| s != 1), UpcastSizeOneSnafu);
        self.upcasted += 1;
        Ok(())
    }

    /// Index of a buffer argument of the AST.
    pub fn buf_index(&self, op: &AstOp) -> Option<usize> {
        let buf = KernelBuffer::of(op)?;
        self.bufs.iter().position(|b| *b == buf)
    }

    /// Product of the upcast zone of the full shape.
    pub fn upcast_size(&self) -> usize {
        prod(self.full_shape()[self.first_upcast()..].iter().copied())
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} :: [{}]", self.colored_shape(false), self.applied_opts.iter().join(", "))
    }
}
