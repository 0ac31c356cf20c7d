//! Kernel input AST.
//!
//! A kernel arrives as a tree of buffer, constant and arithmetic nodes whose
//! leaves carry a [`ShapeTracker`]. The root is a [`AstOp::Kernel`] over one
//! [`AstOp::Store`] per output.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use kernc_dtype::DType;
use snafu::ensure;
use xxhash_rust::xxh64::Xxh64;

use crate::error::*;
use crate::shape::ShapeTracker;
use crate::types::{BinaryOp, ConstValue, ReduceOp, TernaryOp, UnaryOp, WmmaArg};

/// Buffer access: which kernel argument, its element type and its view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemBuffer {
    /// Kernel argument index, [`MemBuffer::LOCAL`] for the local staging buffer.
    pub idx: isize,
    pub dtype: DType,
    pub st: ShapeTracker,
}

impl MemBuffer {
    pub const LOCAL: isize = -1;

    pub fn new(idx: isize, dtype: DType, st: ShapeTracker) -> Self {
        Self { idx, dtype, st }
    }

    pub fn is_local(&self) -> bool {
        self.idx < 0
    }
}

/// A constant broadcast over a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstBuffer {
    pub val: ConstValue,
    pub dtype: DType,
    pub st: ShapeTracker,
}

/// Shape zones fixed by the optimizer, attached to the kernel root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KernelInfo {
    pub local_dims: usize,
    pub upcasted: usize,
    pub dont_use_locals: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::EnumDiscriminants)]
#[strum_discriminants(name(AstOpTag), derive(Hash, strum::Display))]
#[strum_discriminants(strum(serialize_all = "SCREAMING_SNAKE_CASE"))]
pub enum AstOp {
    Load(MemBuffer),
    Store(MemBuffer),
    Const(ConstBuffer),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Ternary(TernaryOp),
    Cast(DType),
    BitCast(DType),
    Reduce { op: ReduceOp, axes: Vec<usize> },
    Wmma(Arc<WmmaArg>),
    Kernel(KernelInfo),

    // Meta ops, never valid inside a kernel.
    Copy,
    View,
    Empty,
}

impl AstOp {
    pub fn tag(&self) -> AstOpTag {
        self.into()
    }

    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Copy | Self::View | Self::Empty)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Store(_) | Self::Const(_))
    }

    /// Ops for which `f(0) != 0`: padding their input with zeros changes the
    /// result of a surrounding reduction.
    pub fn is_unsafe_pad(&self) -> bool {
        matches!(
            self,
            Self::Unary(UnaryOp::Exp2 | UnaryOp::Log2 | UnaryOp::Recip)
                | Self::Binary(
                    BinaryOp::Fdiv | BinaryOp::Idiv | BinaryOp::Mod | BinaryOp::CmpLt | BinaryOp::CmpNe
                )
                | Self::Ternary(TernaryOp::Where)
        )
    }
}

/// Structural identity of an [`AstNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AstKey(pub u64);

#[derive(derive_more::Debug)]
pub struct AstNode {
    pub op: AstOp,
    pub src: Vec<Arc<AstNode>>,
    #[debug(skip)]
    key: AstKey,
}

impl PartialEq for AstNode {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for AstNode {}

impl Hash for AstNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl AstNode {
    pub fn new(op: AstOp, src: Vec<Arc<AstNode>>) -> Arc<Self> {
        let mut hasher = Xxh64::new(0);
        op.hash(&mut hasher);
        for s in &src {
            hasher.write_u64(s.key.0);
        }
        Arc::new(Self { key: AstKey(hasher.finish()), op, src })
    }

    pub fn key(&self) -> AstKey {
        self.key
    }

    pub fn load(idx: isize, dtype: DType, st: ShapeTracker) -> Arc<Self> {
        Self::new(AstOp::Load(MemBuffer::new(idx, dtype, st)), vec![])
    }

    pub fn store(idx: isize, dtype: DType, st: ShapeTracker, value: Arc<AstNode>) -> Arc<Self> {
        Self::new(AstOp::Store(MemBuffer::new(idx, dtype, st)), vec![value])
    }

    pub fn const_(val: impl Into<ConstValue>, dtype: DType, st: ShapeTracker) -> Arc<Self> {
        let val = val.into();
        let val = val.cast(&dtype).unwrap_or(val);
        Self::new(AstOp::Const(ConstBuffer { val, dtype, st }), vec![])
    }

    pub fn unary(op: UnaryOp, x: Arc<AstNode>) -> Arc<Self> {
        Self::new(AstOp::Unary(op), vec![x])
    }

    pub fn binary(op: BinaryOp, a: Arc<AstNode>, b: Arc<AstNode>) -> Arc<Self> {
        Self::new(AstOp::Binary(op), vec![a, b])
    }

    pub fn where_(cond: Arc<AstNode>, t: Arc<AstNode>, f: Arc<AstNode>) -> Arc<Self> {
        Self::new(AstOp::Ternary(TernaryOp::Where), vec![cond, t, f])
    }

    pub fn cast(x: Arc<AstNode>, dtype: DType) -> Arc<Self> {
        Self::new(AstOp::Cast(dtype), vec![x])
    }

    pub fn reduce(op: ReduceOp, axes: Vec<usize>, x: Arc<AstNode>) -> Arc<Self> {
        Self::new(AstOp::Reduce { op, axes }, vec![x])
    }

    pub fn kernel(outputs: Vec<Arc<AstNode>>) -> Arc<Self> {
        Self::new(AstOp::Kernel(KernelInfo::default()), outputs)
    }

    /// Result element type.
    pub fn dtype(&self) -> DType {
        match &self.op {
            AstOp::Load(mb) | AstOp::Store(mb) => mb.dtype.clone(),
            AstOp::Const(cb) => cb.dtype.clone(),
            AstOp::Cast(dt) | AstOp::BitCast(dt) => dt.clone(),
            AstOp::Binary(op) if op.is_comparison() => DType::Bool,
            AstOp::Wmma(arg) => arg.dtype_out.clone(),
            _ => self.src.last().map(|s| s.dtype()).unwrap_or(DType::Void),
        }
    }

    /// View of a buffer node.
    pub fn st(&self) -> Option<&ShapeTracker> {
        match &self.op {
            AstOp::Load(mb) | AstOp::Store(mb) => Some(&mb.st),
            AstOp::Const(cb) => Some(&cb.st),
            _ => None,
        }
    }

    pub fn mem_buffer(&self) -> Option<&MemBuffer> {
        match &self.op {
            AstOp::Load(mb) | AstOp::Store(mb) => Some(mb),
            _ => None,
        }
    }

    /// Axes collapsed by a reduction or a WMMA.
    pub fn reduce_axes(&self) -> Option<&[usize]> {
        match &self.op {
            AstOp::Reduce { axes, .. } => Some(axes),
            AstOp::Wmma(arg) => Some(&arg.reduce_axes),
            _ => None,
        }
    }

    /// Every distinct node, parents before children.
    pub fn lazyops(self: &Arc<Self>) -> Vec<Arc<AstNode>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if !seen.insert(node.key) {
                continue;
            }
            stack.extend(node.src.iter().rev().cloned());
            out.push(node);
        }
        out
    }

    /// Every distinct node, children before parents.
    pub fn toposort(self: &Arc<Self>) -> Vec<Arc<AstNode>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![(self.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                out.push(node);
                continue;
            }
            if !seen.insert(node.key) {
                continue;
            }
            stack.push((node.clone(), true));
            for s in node.src.iter().rev() {
                if !seen.contains(&s.key) {
                    stack.push((s.clone(), false));
                }
            }
        }
        out
    }
}

/// Validate a kernel AST and compute the view every node produces.
#[tracing::instrument(skip_all)]
pub fn verify_ast(root: &Arc<AstNode>) -> std::result::Result<HashMap<AstKey, ShapeTracker>, AstError> {
    ensure!(matches!(root.op, AstOp::Kernel(_)), NotAKernelSnafu { op: root.op.tag().to_string() });

    let Some(last) = root.src.last() else {
        return Ok(HashMap::new());
    };
    let last_size = last.st().map(ShapeTracker::size).unwrap_or(0);
    for (i, out) in root.src.iter().enumerate() {
        let AstOp::Store(mb) = &out.op else {
            return OutputNotStoreSnafu { op: out.op.tag().to_string() }.fail();
        };
        ensure!(mb.idx == i as isize, OutputIndexSnafu { expected: i as isize, actual: mb.idx });
        ensure!(mb.st.size() == last_size, OutputSizeMismatchSnafu { first: mb.st.size(), other: last_size });
    }

    let rank = last.st().map(ShapeTracker::ndim).unwrap_or(0);
    let mut sts: HashMap<AstKey, ShapeTracker> = HashMap::new();
    for node in root.src.iter().flat_map(|out| out.toposort()) {
        if sts.contains_key(&node.key) {
            continue;
        }
        ensure!(!node.op.is_meta(), MetaOpInKernelSnafu { op: node.op.tag().to_string() });

        // The second stage of a grouped reduce reads back what the first stored.
        if let AstOp::Load(mb) = &node.op {
            if mb.is_local() {
                if let Some(staged) = node.src.first().and_then(|store| store.src.first()) {
                    if let Some(st) = sts.get(&staged.key).cloned() {
                        sts.insert(node.key, st);
                        continue;
                    }
                }
            }
        }

        let st = match (&node.op, node.reduce_axes()) {
            (_, Some(axes)) => {
                let src = node.src.first().and_then(|s| sts.get(&s.key));
                let mut shape = src.map(|st| st.shape().to_vec()).unwrap_or_default();
                for &axis in axes {
                    ensure!(axis < shape.len(), ReduceAxisOutOfRangeSnafu { axis, rank: shape.len() });
                    shape[axis] = 1;
                }
                ShapeTracker::from_shape(&shape)
            }
            (op, None) => {
                if let AstOp::Store(mb) = op {
                    ensure!(node.src.len() == 1, StoreSourcesSnafu { count: node.src.len() });
                    // Local staging stores are checked through the load that reads them back.
                    if mb.is_local() {
                        continue;
                    }
                }
                let st = match node.st() {
                    Some(st) => st.clone(),
                    None => match node.src.first().and_then(|s| sts.get(&s.key)) {
                        Some(st) => st.clone(),
                        None => continue,
                    },
                };
                ensure!(st.ndim() == rank, ViewRankSnafu { expected: rank, actual: st.ndim() });
                for s in &node.src {
                    if let Some(src_st) = sts.get(&s.key) {
                        ensure!(
                            src_st.shape() == st.shape(),
                            ImplicitMovementSnafu {
                                op: s.op.tag().to_string(),
                                src: src_st.shape().to_vec(),
                                expected: st.shape().to_vec(),
                            }
                        );
                    }
                }
                st
            }
        };
        sts.insert(node.key, st);
    }

    let mut dims: Vec<Vec<usize>> = vec![Vec::new(); rank];
    for st in sts.values() {
        for (d, &s) in st.shape().iter().enumerate().take(rank) {
            if !dims[d].contains(&s) {
                dims[d].push(s);
            }
        }
    }
    for d in dims.iter_mut() {
        d.sort_unstable();
    }
    ensure!(
        dims.iter().all(|d| d.len() <= 1 || (d.len() == 2 && d[0] == 1)),
        IncompatibleShapesSnafu { dims }
    );
    Ok(sts)
}
