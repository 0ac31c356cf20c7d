//! Kernel ASTs and graph builders shared by the schedule tests.

use std::sync::Arc;

use kernc_ir::prelude::*;
use kernc_ir::{AstNode, ShapeTracker, View};

use crate::optimizer::{Kernel, Renderer};

pub fn st(shape: &[usize]) -> ShapeTracker {
    ShapeTracker::from_shape(shape)
}

pub fn strided(shape: &[usize], strides: &[i64]) -> ShapeTracker {
    ShapeTracker::from_view(View::create(shape.to_vec(), Some(strides.to_vec()), 0, None))
}

pub fn load(idx: isize, dtype: DType, shape: &[usize]) -> Arc<AstNode> {
    AstNode::load(idx, dtype, st(shape))
}

/// `out = in1 + in2` over `shape`.
pub fn elementwise_add(shape: &[usize], dtype: DType) -> Arc<AstNode> {
    let add = AstNode::binary(BinaryOp::Add, load(1, dtype.clone(), shape), load(2, dtype.clone(), shape));
    AstNode::kernel(vec![AstNode::store(0, dtype, st(shape), add)])
}

/// `out = in1 + in1` over `shape`.
pub fn self_add(shape: &[usize], dtype: DType) -> Arc<AstNode> {
    let x = load(1, dtype.clone(), shape);
    let add = AstNode::binary(BinaryOp::Add, x.clone(), x);
    AstNode::kernel(vec![AstNode::store(0, dtype, st(shape), add)])
}

/// `out[i, j] = a[i, j] + b[j]` with `b` broadcast along rows.
pub fn broadcast_add(n: usize) -> Arc<AstNode> {
    let a = load(1, DType::Float32, &[n, n]);
    let b = AstNode::load(2, DType::Float32, strided(&[n, n], &[0, 1]));
    let add = AstNode::binary(BinaryOp::Add, a, b);
    AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[n, n]), add)])
}

/// Row sums of a `rows x cols` matrix.
pub fn row_sum(rows: usize, cols: usize) -> Arc<AstNode> {
    let red = AstNode::reduce(ReduceOp::Sum, vec![1], load(1, DType::Float32, &[rows, cols]));
    AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[rows, 1]), red)])
}

/// `c[i, j] = sum_k a[i, k] * b[k, j]` over the full shape `(n, n, n)`.
pub fn matmul(n: usize, dtype: DType) -> Arc<AstNode> {
    let n_i = n as i64;
    let a = AstNode::load(1, dtype.clone(), strided(&[n, n, n], &[n_i, 0, 1]));
    let b = AstNode::load(2, dtype.clone(), strided(&[n, n, n], &[0, 1, n_i]));
    let red = AstNode::reduce(ReduceOp::Sum, vec![2], AstNode::binary(BinaryOp::Mul, a, b));
    AstNode::kernel(vec![AstNode::store(0, dtype, strided(&[n, n, 1], &[n_i, 1, 0]), red)])
}

pub fn kernel(ast: Arc<AstNode>, renderer: Renderer) -> Kernel {
    Kernel::new(ast, Arc::new(renderer)).unwrap_or_else(|e| panic!("kernel construction failed: {e}"))
}

/// Int32 value the folder knows nothing about.
pub fn opaque(i: i64) -> Arc<UOp> {
    let buf = UOp::define_global(9, DType::Int32, false);
    UOp::load(DType::Int32, buf, UOp::const_(DType::Int32, i))
}

pub fn count_tag(uops: &[Arc<UOp>], tag: OpTag) -> usize {
    uops.iter().filter(|u| u.tag() == tag).count()
}

pub fn position_of(uops: &[Arc<UOp>], tag: OpTag) -> Option<usize> {
    uops.iter().position(|u| u.tag() == tag)
}
