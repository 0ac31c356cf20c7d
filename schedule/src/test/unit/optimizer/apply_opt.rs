//! Single opts: zone bookkeeping and rejection.

use kernc_ir::DType;
use test_case::test_case;

use crate::optimizer::{AxisKind, Opt, OptError, OptOps, Renderer};
use crate::test::helpers::*;

#[test]
fn kernel_merges_contiguous_axes() {
    let k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::clang());
    assert_eq!(k.full_shape(), &[4096]);
    assert_eq!(k.first_reduce(), 1);
}

#[test]
fn reduce_axes_go_last() {
    let k = kernel(row_sum(16, 256), Renderer::gpu());
    assert_eq!(k.full_shape(), &[16, 256]);
    assert_eq!(k.output_shape(), &[16, 1]);
    assert_eq!(k.colors(), vec![AxisKind::Global, AxisKind::Reduce]);
}

#[test_case(2 ; "by two")]
#[test_case(4 ; "by four")]
#[test_case(8 ; "by eight")]
fn upcast_splits_global(amt: usize) {
    let mut k = kernel(elementwise_add(&[16, 16], DType::Float32), Renderer::gpu());
    k.apply_opt(Opt::upcast(0, amt), true).unwrap();
    assert_eq!(k.full_shape(), &[256 / amt, amt]);
    assert_eq!(k.upcasted, 1);
    assert_eq!(k.colors(), vec![AxisKind::Global, AxisKind::Upcast]);
    assert_eq!(k.applied_opts.as_slice(), &[Opt::upcast(0, amt)]);
}

#[test]
fn upcast_whole_axis() {
    let mut k = kernel(row_sum(4, 64), Renderer::gpu());
    k.apply_opt(Opt::upcast(0, 0), true).unwrap();
    assert_eq!(k.full_shape(), &[64, 4]);
    assert_eq!(k.colors(), vec![AxisKind::Reduce, AxisKind::Upcast]);
}

#[test]
fn local_moves_global_into_workgroup() {
    let mut k = kernel(elementwise_add(&[32, 32], DType::Float32), Renderer::gpu());
    k.apply_opt(Opt::local(0, 16), true).unwrap();
    assert_eq!(k.local_dims, 1);
    assert_eq!(k.colors(), vec![AxisKind::Global, AxisKind::Local]);
    assert_eq!(k.full_shape(), &[64, 16]);
}

#[test]
fn unroll_moves_reduce_to_upcast() {
    let mut k = kernel(row_sum(4, 64), Renderer::gpu());
    k.apply_opt(Opt::unroll(0, 4), true).unwrap();
    assert_eq!(k.full_shape(), &[4, 16, 4]);
    assert_eq!(k.colors(), vec![AxisKind::Global, AxisKind::Reduce, AxisKind::Unroll]);
}

#[test]
fn grouptop_stages_reduce() {
    let mut k = kernel(row_sum(16, 256), Renderer::gpu());
    k.apply_opt(Opt::grouptop(0, 16), true).unwrap();
    assert_eq!(k.group_for_reduces, 1);
    assert_eq!(k.full_shape(), &[16, 16, 16]);
    assert_eq!(k.colors(), vec![AxisKind::Global, AxisKind::Group, AxisKind::Reduce]);
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn upcast_over_limit_is_rejected() {
    let mut k = kernel(elementwise_add(&[72], DType::Float32), Renderer::gpu());
    let before = k.full_shape().to_vec();
    let err = k.apply_opt(Opt::upcast(0, 9), true).unwrap_err();
    assert_eq!(err, OptError::UpcastTooLarge { amt: 9 });
    assert_eq!(k.full_shape(), before.as_slice());
    assert!(k.applied_opts.is_empty());
}

#[test]
fn unroll_over_limit_is_rejected() {
    let mut k = kernel(row_sum(4, 66), Renderer::gpu());
    let before = k.full_shape().to_vec();
    let err = k.apply_opt(Opt::unroll(0, 33), true).unwrap_err();
    assert_eq!(err, OptError::UnrollTooLarge { amt: 33 });
    assert_eq!(k.full_shape(), before.as_slice());
    assert_eq!(k.upcasted, 0);
}

#[test]
fn non_divisible_amount_is_rejected() {
    let mut k = kernel(elementwise_add(&[30], DType::Float32), Renderer::gpu());
    let err = k.apply_opt(Opt::upcast(0, 4), true).unwrap_err();
    assert_eq!(err, OptError::NotDivisible { op: OptOps::UPCAST, size: 30, amount: 4 });
}

#[test]
fn amount_one_is_rejected() {
    let mut k = kernel(elementwise_add(&[32], DType::Float32), Renderer::gpu());
    assert_eq!(k.apply_opt(Opt::upcast(0, 1), true), Err(OptError::AmountOne { op: OptOps::UPCAST }));
}

#[test]
fn axis_out_of_range_is_rejected() {
    let mut k = kernel(elementwise_add(&[32], DType::Float32), Renderer::gpu());
    assert_eq!(k.apply_opt(Opt::upcast(3, 2), true), Err(OptError::InvalidAxis { axis: 3, len: 1 }));
}

#[test]
fn local_needs_local_support() {
    let mut k = kernel(elementwise_add(&[32, 32], DType::Float32), Renderer::clang());
    assert_eq!(k.apply_opt(Opt::local(0, 4), true), Err(OptError::NoLocal));
}

#[test]
fn upcast_of_reduce_axis_is_rejected() {
    let mut k = kernel(row_sum(4, 64), Renderer::gpu());
    assert_eq!(k.apply_opt(Opt::upcast(1, 4), true), Err(OptError::UpcastReduce));
}

#[test]
fn group_needs_shared_memory() {
    let mut k = kernel(row_sum(16, 256), Renderer::clang());
    assert_eq!(k.apply_opt(Opt::grouptop(0, 16), true), Err(OptError::NoShared));
}

#[test]
fn nolocals_blocks_later_locals() {
    let mut k = kernel(elementwise_add(&[32, 32], DType::Float32), Renderer::gpu());
    k.apply_opt(Opt::nolocals(), true).unwrap();
    assert!(k.dont_use_locals);
    assert_eq!(k.apply_opt(Opt::local(0, 4), true), Err(OptError::LocalsDisabled { op: OptOps::LOCAL }));
    assert_eq!(k.colors(), vec![AxisKind::GlobalNoLocals]);
}

#[test]
fn padto_rounds_axis_up() {
    let mut k = kernel(elementwise_add(&[30], DType::Float32), Renderer::gpu());
    k.apply_opt(Opt::padto(0, 32), true).unwrap();
    assert_eq!(k.full_shape(), &[32]);
}

#[test]
fn applied_opts_replay_to_the_same_shape() {
    let opts = [Opt::upcast(0, 4), Opt::local(0, 8), Opt::unroll(0, 4)];
    let mut a = kernel(row_sum(64, 128), Renderer::gpu());
    for opt in opts {
        a.apply_opt(opt, true).unwrap();
    }
    let b = crate::optimizer::replay_opts(kernel(row_sum(64, 128), Renderer::gpu()), &a.applied_opts).unwrap();
    assert_eq!(a.full_shape(), b.full_shape());
    assert_eq!(a.sts, b.sts);
    assert_eq!(a.colors(), b.colors());
}
