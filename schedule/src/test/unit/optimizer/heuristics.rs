use kernc_ir::DType;

use crate::optimizer::{
    hand_coded_optimizations, optimize_kernel, HeuristicsConfig, Opt, OptStrategy, OptimizerConfig, Renderer,
};
use crate::test::helpers::*;

#[test]
fn clang_elementwise_gets_one_upcast() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::clang());
    hand_coded_optimizations(&mut k, &HeuristicsConfig::default()).unwrap();
    assert_eq!(k.applied_opts.as_slice(), &[Opt::upcast(0, 4)]);
    assert_eq!(k.full_shape(), &[1024, 4]);
}

#[test]
fn small_output_sum_is_grouped() {
    let mut k = kernel(row_sum(16, 256), Renderer::gpu());
    hand_coded_optimizations(&mut k, &HeuristicsConfig::default()).unwrap();
    assert_eq!(k.applied_opts.as_slice(), &[Opt::grouptop(0, 256)]);
    assert_eq!(k.group_for_reduces, 1);
}

#[test]
fn no_strategy_leaves_plain_kernels_alone() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::gpu());
    let config = OptimizerConfig { strategy: OptStrategy::None, ..OptimizerConfig::default() };
    optimize_kernel(&mut k, &config).unwrap();
    assert!(k.applied_opts.is_empty());
}

#[test]
fn heuristics_skip_tensor_cores_on_clang() {
    let mut k = kernel(matmul(16, DType::Float32), Renderer::clang());
    let config = OptimizerConfig { strategy: OptStrategy::Heuristic, ..OptimizerConfig::default() };
    optimize_kernel(&mut k, &config).unwrap();
    assert!(k.tensor_core.is_none());
    assert!(!k.applied_opts.is_empty());
}

#[test]
fn gpu_elementwise_gets_locals() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::gpu());
    hand_coded_optimizations(&mut k, &HeuristicsConfig::default()).unwrap();
    assert!(k.local_dims > 0);
    let locals: usize = k.full_shape()[k.global_dims()..k.first_reduce()].iter().product();
    assert!(locals <= 128);
}

#[test]
fn disabled_locals_apply_nolocals() {
    let mut k = kernel(elementwise_add(&[64, 64], DType::Float32), Renderer::gpu());
    let config = HeuristicsConfig { disable_locals: true, ..HeuristicsConfig::default() };
    hand_coded_optimizations(&mut k, &config).unwrap();
    assert!(k.dont_use_locals);
    assert_eq!(k.local_dims, 0);
}
