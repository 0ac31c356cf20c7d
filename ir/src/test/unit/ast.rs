use std::sync::Arc;

use kernc_dtype::DType;

use crate::ast::{verify_ast, AstNode, AstOp};
use crate::error::AstError;
use crate::shape::ShapeTracker;
use crate::types::{BinaryOp, ReduceOp, UnaryOp};

fn st(shape: &[usize]) -> ShapeTracker {
    ShapeTracker::from_shape(shape)
}

fn load(idx: isize, shape: &[usize]) -> Arc<AstNode> {
    AstNode::load(idx, DType::Float32, st(shape))
}

fn elementwise_add() -> Arc<AstNode> {
    let add = AstNode::binary(BinaryOp::Add, load(1, &[4, 4]), load(2, &[4, 4]));
    AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4, 4]), add)])
}

#[test]
fn elementwise_kernel_verifies() {
    let ast = elementwise_add();
    let sts = verify_ast(&ast).unwrap_or_else(|e| panic!("{e}"));
    let store = &ast.src[0];
    assert_eq!(sts.get(&store.key()).map(|s| s.shape().to_vec()), Some(vec![4, 4]));
}

#[test]
fn reduce_collapses_axes() {
    let red = AstNode::reduce(ReduceOp::Sum, vec![1], load(1, &[4, 4]));
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4, 1]), red.clone())]);
    let sts = verify_ast(&ast).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(sts.get(&red.key()).map(|s| s.shape().to_vec()), Some(vec![4, 1]));
}

#[test]
fn root_must_be_kernel() {
    let store = AstNode::store(0, DType::Float32, st(&[4]), load(1, &[4]));
    assert!(matches!(verify_ast(&store), Err(AstError::NotAKernel { .. })));
}

#[test]
fn outputs_are_numbered_in_order() {
    let ast = AstNode::kernel(vec![AstNode::store(1, DType::Float32, st(&[4]), load(2, &[4]))]);
    assert!(matches!(verify_ast(&ast), Err(AstError::OutputIndex { expected: 0, actual: 1 })));
}

#[test]
fn outputs_must_be_stores() {
    let ast = AstNode::kernel(vec![load(0, &[4])]);
    assert!(matches!(verify_ast(&ast), Err(AstError::OutputNotStore { .. })));
}

#[test]
fn implicit_movement_is_rejected() {
    let add = AstNode::binary(BinaryOp::Add, load(1, &[4, 4]), load(2, &[4, 1]));
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4, 4]), add)]);
    assert!(matches!(verify_ast(&ast), Err(AstError::ImplicitMovement { .. })));
}

#[test]
fn views_must_share_rank() {
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[16]), load(1, &[4, 4]))]);
    assert!(matches!(verify_ast(&ast), Err(AstError::ViewRank { expected: 1, actual: 2 })));
}

#[test]
fn reduce_axis_must_exist() {
    let red = AstNode::reduce(ReduceOp::Sum, vec![2], load(1, &[4, 4]));
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4, 1]), red)]);
    assert!(matches!(verify_ast(&ast), Err(AstError::ReduceAxisOutOfRange { axis: 2, rank: 2 })));
}

#[test]
fn meta_ops_are_rejected() {
    let copy = AstNode::new(AstOp::Copy, vec![]);
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4]), copy)]);
    assert!(matches!(verify_ast(&ast), Err(AstError::MetaOpInKernel { .. })));
}

#[test]
fn structural_keys() {
    assert_eq!(elementwise_add().key(), elementwise_add().key());
    let other = AstNode::binary(BinaryOp::Mul, load(1, &[4, 4]), load(2, &[4, 4]));
    let other = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4, 4]), other)]);
    assert_ne!(elementwise_add().key(), other.key());
}

#[test]
fn lazyops_start_at_root_and_dedup() {
    let x = load(1, &[4]);
    let sq = AstNode::binary(BinaryOp::Mul, x.clone(), x);
    let ast = AstNode::kernel(vec![AstNode::store(0, DType::Float32, st(&[4]), sq)]);
    let ops = ast.lazyops();
    assert_eq!(ops.len(), 4);
    assert!(matches!(ops[0].op, AstOp::Kernel(_)));
    assert!(matches!(ops[1].op, AstOp::Store(_)));
}

#[test]
fn dtype_inference() {
    let cmp = AstNode::binary(BinaryOp::CmpLt, load(1, &[4]), load(2, &[4]));
    assert_eq!(cmp.dtype(), DType::Bool);
    assert_eq!(AstNode::cast(cmp, DType::Float16).dtype(), DType::Float16);
    assert_eq!(AstNode::unary(UnaryOp::Sqrt, load(1, &[4])).dtype(), DType::Float32);
}

#[test]
fn unsafe_pad_ops() {
    assert!(AstOp::Unary(UnaryOp::Exp2).is_unsafe_pad());
    assert!(AstOp::Binary(BinaryOp::CmpLt).is_unsafe_pad());
    assert!(!AstOp::Binary(BinaryOp::Add).is_unsafe_pad());
    assert!(!AstOp::Unary(UnaryOp::Neg).is_unsafe_pad());
}
